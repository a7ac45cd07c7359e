// libs/exofork/src/fork.rs
//! `fork()` copy-on-write.

use exofork_types::{EnvId, EnvStatus, PteFlags};

use crate::duppage::duplicate_address_space;
use crate::error::{ForkError, ForkResult};
use crate::pgfault::{pgfault, set_pgfault_handler};
use crate::syscall::{Exofork, Syscalls};

/// Valeur de retour de `fork()` dans chacun des deux processus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkReturn {
    /// Dans le parent : identifiant de l'enfant
    Parent(EnvId),
    /// Dans l'enfant
    Child,
}

impl ForkReturn {
    /// Convention C : envid de l'enfant dans le parent, 0 dans l'enfant
    pub fn as_raw(&self) -> i32 {
        match self {
            ForkReturn::Parent(child) => child.as_u32() as i32,
            ForkReturn::Child => 0,
        }
    }

    pub fn is_child(&self) -> bool {
        matches!(self, ForkReturn::Child)
    }
}

/// Fork copy-on-write.
///
/// Installe le handler de faute, crée l'enfant, lui duplique notre espace
/// d'adressage, lui alloue une pile d'exception privée puis le rend
/// exécutable. L'enfant ne devient exécutable qu'une fois son espace complet.
///
/// # Retour
/// `Parent(envid)` dans le parent, `Child` dans l'enfant.
pub fn fork<S: Syscalls + ?Sized>(sys: &S) -> ForkResult<ForkReturn> {
    set_pgfault_handler(sys, pgfault)?;

    let child = match sys.exofork().map_err(ForkError::syscall("exofork"))? {
        Exofork::Child => {
            // La copie de ThisEnv désigne encore le parent
            let me = sys.getenvid();
            sys.this_env().refresh(me);
            log::debug!("[{}] fork: child running", me);
            return Ok(ForkReturn::Child);
        }
        Exofork::Parent(child) => child,
    };

    let pages = duplicate_address_space(sys, child)?;

    // Jamais partagée : le handler ne doit pas fauter sur sa propre pile
    let uxstack = sys.layout().uxstack_page();
    sys.page_alloc(child, uxstack, PteFlags::USER_RW)
        .map_err(ForkError::syscall("page_alloc(child UXSTACK)"))?;
    sys.env_set_pgfault_upcall(child, pgfault)
        .map_err(ForkError::syscall("env_set_pgfault_upcall(child)"))?;

    sys.env_set_status(child, EnvStatus::Runnable)
        .map_err(ForkError::syscall("env_set_status"))?;

    log::debug!("[{}] fork: child {} runnable, {} pages shared", sys.getenvid(), child, pages);
    Ok(ForkReturn::Parent(child))
}

/// `fork()` avec la convention de retour C : envid de l'enfant, 0 dans
/// l'enfant, code d'erreur négatif en cas d'échec.
pub fn fork_raw<S: Syscalls + ?Sized>(sys: &S) -> i32 {
    match fork(sys) {
        Ok(ret) => ret.as_raw(),
        Err(err) => {
            log::error!("fork: {}", err);
            err.errno()
        }
    }
}

/// Fork à mémoire partagée : non supporté.
pub fn sfork<S: Syscalls + ?Sized>(_sys: &S) -> ForkResult<ForkReturn> {
    Err(ForkError::NotSupported)
}
