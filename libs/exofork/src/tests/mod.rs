// libs/exofork/src/tests/mod.rs
//! Scénarios de fork COW exécutés sur le substrat simulé.
//!
//! Chaque scénario démarre un environnement racine dont l'espace ressemble à
//! celui d'un petit programme : texte, données, une page en lecture seule et
//! la page haute de la pile.

mod cow_fork;

use exofork_types::{EnvId, PteFlags, VirtAddr};

use crate::fork::{fork, ForkReturn};
use crate::sim::{SimConfig, SimEnv, SimKernel};
use crate::syscall::Syscalls;

pub(crate) const TEXT: VirtAddr = VirtAddr::new(0x0080_0000);
pub(crate) const DATA: VirtAddr = VirtAddr::new(0x0080_1000);
pub(crate) const RODATA: VirtAddr = VirtAddr::new(0x0080_2000);
/// Adresse jamais mappée par `boot`
pub(crate) const UNMAPPED: VirtAddr = VirtAddr::new(0x0090_0000);

/// Pages mappées par `boot`
pub(crate) const BOOT_PAGES: usize = 4;

pub(crate) fn boot() -> (SimKernel, SimEnv) {
    boot_with(SimConfig::default_config())
}

pub(crate) fn boot_with(config: SimConfig) -> (SimKernel, SimEnv) {
    let kernel = SimKernel::new(config);
    let env = kernel.spawn().unwrap();

    env.alloc_pages(TEXT, 3, PteFlags::USER_RW).unwrap();
    env.write(TEXT, &[0x55, 0x89, 0xe5]).unwrap();
    env.write(RODATA, b"const").unwrap();
    env.page_map(EnvId::SELF, RODATA, EnvId::SELF, RODATA, PteFlags::USER_RO)
        .unwrap();
    env.alloc_pages(kernel.layout().ustack_page(), 1, PteFlags::USER_RW)
        .unwrap();

    assert_eq!(kernel.frames_in_use(), BOOT_PAGES);
    (kernel, env)
}

/// `fork()` côté parent ; retourne l'enfant
pub(crate) fn fork_parent(env: &SimEnv) -> EnvId {
    match fork(env).unwrap() {
        ForkReturn::Parent(child) => child,
        ForkReturn::Child => panic!("parent resumed as child"),
    }
}

/// Exécute l'enfant jusqu'à sa sortie de `fork()`
pub(crate) fn run_child(kernel: &SimKernel, child: EnvId) -> SimEnv {
    let env = kernel.env(child).unwrap();
    assert_eq!(fork(&env), Ok(ForkReturn::Child));
    env
}
