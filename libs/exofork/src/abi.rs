// libs/exofork/src/abi.rs
//! Liaison avec l'exokernel réel.
//!
//! Les appels système sont fournis par les stubs assembleur de la libc du
//! système ; les tables de pages et le tableau des pages physiques sont lus à
//! travers les fenêtres en lecture seule UVPT/UVPD et UPAGES.

use core::ptr;

use exofork_types::{EnvId, EnvStatus, ExoError, Ppn, Pte, PteFlags, Result, VirtAddr, PGSIZE};
use spin::Mutex;

use crate::fork::fork_raw;
use crate::layout::Layout;
use crate::syscall::{Exofork, Level, PageTableView, PgfaultHandler, Syscalls, UTrapframe};
use crate::this_env::ThisEnv;

extern "C" {
    fn sys_getenvid() -> u32;
    fn sys_page_alloc(envid: u32, va: u32, perm: u32) -> i32;
    fn sys_page_map(srcenv: u32, srcva: u32, dstenv: u32, dstva: u32, perm: u32) -> i32;
    fn sys_page_unmap(envid: u32, va: u32) -> i32;
    fn sys_exofork() -> i32;
    fn sys_env_set_status(envid: u32, status: u32) -> i32;
    fn sys_env_set_pgfault_upcall(envid: u32, upcall: usize) -> i32;
    fn sys_env_destroy(envid: u32) -> i32;

    /// Point d'entrée assembleur : bascule sur la pile d'exception, appelle
    /// `exofork_pgfault_dispatch`, puis restaure le contexte fautif.
    fn _pgfault_upcall();
}

// Valeurs ENV_* du noyau
const ENV_DYING: u32 = 1;
const ENV_RUNNABLE: u32 = 2;
const ENV_RUNNING: u32 = 3;
const ENV_NOT_RUNNABLE: u32 = 4;

/// Taille de `struct PageInfo` (pp_link + pp_ref + padding)
const PAGE_INFO_SIZE: usize = 8;
const PAGE_INFO_REF_OFFSET: usize = 4;

/// Identité du processus, initialisée par `libmain_init`
pub static THIS_ENV: ThisEnv = ThisEnv::uninit();

/// Handler appelé par `exofork_pgfault_dispatch`
static PGFAULT_HANDLER: Mutex<Option<PgfaultHandler>> = Mutex::new(None);

/// Appels système de l'exokernel
#[derive(Debug, Clone, Copy, Default)]
pub struct ExoSyscalls;

impl PageTableView for ExoSyscalls {
    fn entry_at(&self, level: Level, index: usize) -> Pte {
        let layout = Layout::default_config();
        let uvpt = layout.uvpt.as_u32() as usize as *const u32;
        let raw = match level {
            Level::Table => unsafe { ptr::read_volatile(uvpt.add(index)) },
            Level::Directory => {
                let uvpd = unsafe { uvpt.add(layout.uvpt.page_number()) };
                unsafe { ptr::read_volatile(uvpd.add(index)) }
            }
        };
        Pte::from_raw(raw)
    }

    fn page_ref(&self, ppn: Ppn) -> u32 {
        let base = Layout::default_config().upages.as_u32() as usize;
        let addr = base + ppn.index() * PAGE_INFO_SIZE + PAGE_INFO_REF_OFFSET;
        // SAFETY: UPAGES est mappé en lecture pour tous les environnements
        u32::from(unsafe { ptr::read_volatile(addr as *const u16) })
    }
}

impl Syscalls for ExoSyscalls {
    fn getenvid(&self) -> EnvId {
        EnvId::new(unsafe { sys_getenvid() })
    }

    fn page_alloc(&self, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<()> {
        let ret = unsafe { sys_page_alloc(env.as_u32(), va.as_u32(), perm.bits()) };
        ExoError::check(ret).map(|_| ())
    }

    fn page_map(
        &self,
        srcenv: EnvId,
        srcva: VirtAddr,
        dstenv: EnvId,
        dstva: VirtAddr,
        perm: PteFlags,
    ) -> Result<()> {
        let ret = unsafe {
            sys_page_map(
                srcenv.as_u32(),
                srcva.as_u32(),
                dstenv.as_u32(),
                dstva.as_u32(),
                perm.bits(),
            )
        };
        ExoError::check(ret).map(|_| ())
    }

    fn page_unmap(&self, env: EnvId, va: VirtAddr) -> Result<()> {
        let ret = unsafe { sys_page_unmap(env.as_u32(), va.as_u32()) };
        ExoError::check(ret).map(|_| ())
    }

    fn exofork(&self) -> Result<Exofork> {
        match ExoError::check(unsafe { sys_exofork() })? {
            0 => Ok(Exofork::Child),
            id => Ok(Exofork::Parent(EnvId::new(id))),
        }
    }

    fn env_set_status(&self, env: EnvId, status: EnvStatus) -> Result<()> {
        let raw = match status {
            EnvStatus::NotRunnable => ENV_NOT_RUNNABLE,
            EnvStatus::Runnable => ENV_RUNNABLE,
            EnvStatus::Running => ENV_RUNNING,
            EnvStatus::Dying => ENV_DYING,
        };
        ExoError::check(unsafe { sys_env_set_status(env.as_u32(), raw) }).map(|_| ())
    }

    fn env_set_pgfault_upcall(&self, env: EnvId, handler: PgfaultHandler) -> Result<()> {
        // Variable statique : l'enfant en hérite par la copie de notre espace
        *PGFAULT_HANDLER.lock() = Some(handler);
        let upcall = _pgfault_upcall as usize;
        ExoError::check(unsafe { sys_env_set_pgfault_upcall(env.as_u32(), upcall) }).map(|_| ())
    }

    fn copy_page(&self, dst: VirtAddr, src: VirtAddr) -> Result<()> {
        // SAFETY: les deux pages sont mappées dans notre espace, `src` au
        // moins en lecture et `dst` en écriture, et ne se recouvrent pas.
        unsafe {
            ptr::copy_nonoverlapping(
                src.as_u32() as usize as *const u8,
                dst.as_u32() as usize as *mut u8,
                PGSIZE,
            );
        }
        Ok(())
    }

    fn this_env(&self) -> &ThisEnv {
        &THIS_ENV
    }
}

/// Appelé par `_pgfault_upcall` sur la pile d'exception.
///
/// Une faute non résolue termine le processus.
#[no_mangle]
pub extern "C" fn exofork_pgfault_dispatch(utf: *const UTrapframe) {
    let handler = *PGFAULT_HANDLER.lock();
    // SAFETY: le trampoline passe un cadre valide sur la pile d'exception
    let frame = unsafe { &*utf };

    let result = match handler {
        Some(handler) => handler(&ExoSyscalls, frame),
        None => {
            log::error!("[{}] page fault at {} without handler", ExoSyscalls.getenvid(), frame.fault_va);
            return destroy_self();
        }
    };

    if let Err(err) = result {
        log::error!("[{}] unresolved page fault: {}", ExoSyscalls.getenvid(), err);
        destroy_self();
    }
}

fn destroy_self() {
    unsafe {
        sys_env_destroy(0);
    }
}

/// Initialise l'identité du processus au démarrage
pub fn libmain_init() {
    THIS_ENV.refresh(ExoSyscalls.getenvid());
}

/// `fork()` avec la convention C
pub fn fork() -> i32 {
    fork_raw(&ExoSyscalls)
}
