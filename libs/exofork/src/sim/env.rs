// libs/exofork/src/sim/env.rs
//! Exécution au nom d'un environnement simulé.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use exofork_types::{EnvId, EnvStatus, Ppn, Pte, PteFlags, Result, VirtAddr, PGSIZE};

use super::kernel::SimKernel;
use crate::error::ForkError;
use crate::layout::Layout;
use crate::syscall::{Exofork, Level, PageTableView, PgfaultHandler, Syscalls, UTrapframe};
use crate::this_env::ThisEnv;

/// Échec d'un accès mémoire simulé
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    /// Faute non résolue : l'environnement a été détruit
    Killed {
        env: EnvId,
        va: VirtAddr,
        /// Erreur du handler, `None` s'il n'y en avait pas
        cause: Option<ForkError>,
    },
    /// L'environnement n'existe pas ou n'est pas exécutable
    NotRunning(EnvId),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::Killed { env, va, cause: Some(cause) } => {
                write!(f, "[{}] killed by fault at {}: {}", env, va, cause)
            }
            SimError::Killed { env, va, cause: None } => {
                write!(f, "[{}] killed by unhandled fault at {}", env, va)
            }
            SimError::NotRunning(env) => write!(f, "[{}] is not running", env),
        }
    }
}

/// Poignée d'exécution : chaque appel est fait au nom de l'environnement
#[derive(Clone)]
pub struct SimEnv {
    kernel: SimKernel,
    id: EnvId,
    this_env: Arc<ThisEnv>,
}

impl SimEnv {
    pub(super) fn new(kernel: SimKernel, id: EnvId, this_env: Arc<ThisEnv>) -> Self {
        Self { kernel, id, this_env }
    }

    pub fn id(&self) -> EnvId {
        self.id
    }

    pub fn kernel(&self) -> &SimKernel {
        &self.kernel
    }

    /// Alloue `count` pages consécutives à partir de `start`
    pub fn alloc_pages(&self, start: VirtAddr, count: usize, perm: PteFlags) -> Result<()> {
        (0..count).try_for_each(|i| {
            self.page_alloc(EnvId::SELF, start.offset((i * PGSIZE) as u32), perm)
        })
    }

    /// Lit la mémoire de l'environnement comme le ferait son code
    pub fn read(&self, va: VirtAddr, buf: &mut [u8]) -> core::result::Result<(), SimError> {
        let mut done = 0;
        while done < buf.len() {
            let addr = va.offset(done as u32);
            let len = (PGSIZE - addr.page_offset()).min(buf.len() - done);
            let ppn = self.access(addr, false)?;

            let state = self.kernel.state.lock();
            let page = state.phys.data(ppn).ok_or(SimError::NotRunning(self.id))?;
            buf[done..done + len].copy_from_slice(&page[addr.page_offset()..addr.page_offset() + len]);
            done += len;
        }
        Ok(())
    }

    /// Écrit dans la mémoire de l'environnement ; une écriture sur une page
    /// COW passe par le handler de faute installé
    pub fn write(&self, va: VirtAddr, data: &[u8]) -> core::result::Result<(), SimError> {
        let mut done = 0;
        while done < data.len() {
            let addr = va.offset(done as u32);
            let len = (PGSIZE - addr.page_offset()).min(data.len() - done);
            let ppn = self.access(addr, true)?;

            let mut state = self.kernel.state.lock();
            let page = state.phys.data_mut(ppn).ok_or(SimError::NotRunning(self.id))?;
            page[addr.page_offset()..addr.page_offset() + len].copy_from_slice(&data[done..done + len]);
            done += len;
        }
        Ok(())
    }

    pub fn read_vec(&self, va: VirtAddr, len: usize) -> core::result::Result<Vec<u8>, SimError> {
        let mut buf = alloc::vec![0u8; len];
        self.read(va, &mut buf)?;
        Ok(buf)
    }

    /// Termine l'environnement
    pub fn exit(&self) {
        self.kernel.destroy(self.id);
    }

    /// Traduit un accès, en délivrant au plus une faute
    fn access(&self, va: VirtAddr, write: bool) -> core::result::Result<Ppn, SimError> {
        self.ensure_running()?;

        let err = match self.kernel.state.lock().translate(self.id, va, write) {
            Ok(ppn) => return Ok(ppn),
            Err(err) => err,
        };
        self.deliver_fault(va, err)?;

        // Après résolution l'accès doit réussir, sinon la faute se répéterait
        match self.kernel.state.lock().translate(self.id, va, write) {
            Ok(ppn) => Ok(ppn),
            Err(_) => Err(self.kill(va, None)),
        }
    }

    fn ensure_running(&self) -> core::result::Result<(), SimError> {
        match self.kernel.status(self.id) {
            Some(EnvStatus::Runnable | EnvStatus::Running) => Ok(()),
            _ => Err(SimError::NotRunning(self.id)),
        }
    }

    /// Bascule sur la pile d'exception et appelle le handler, verrou relâché
    fn deliver_fault(&self, va: VirtAddr, err: u32) -> core::result::Result<(), SimError> {
        let handler = {
            let mut state = self.kernel.state.lock();
            let uxstack = state.layout.uxstack_page();
            let stack_ok = state.translate(self.id, uxstack, true).is_ok();
            let record = state.env_mut(self.id).ok_or(SimError::NotRunning(self.id))?;
            record.faults += 1;
            record.upcall.filter(|_| stack_ok)
        };
        // Sans handler ou sans pile d'exception, le noyau détruit l'environnement
        let Some(handler) = handler else {
            return Err(self.kill(va, None));
        };

        let utf = UTrapframe {
            fault_va: va,
            err,
            eip: 0,
            esp: self.kernel.layout().uxstacktop.as_u32(),
        };
        log::trace!("sim: [{}] fault at {} err {:#x}", self.id, va, err);

        handler(self, &utf).map_err(|cause| self.kill(va, Some(cause)))
    }

    fn kill(&self, va: VirtAddr, cause: Option<ForkError>) -> SimError {
        match cause {
            Some(cause) => log::warn!("sim: [{}] unresolved fault at {}: {}", self.id, va, cause),
            None => log::warn!("sim: [{}] unhandled fault at {}", self.id, va),
        }
        self.kernel.destroy(self.id);
        SimError::Killed { env: self.id, va, cause }
    }
}

impl PageTableView for SimEnv {
    fn entry_at(&self, level: Level, index: usize) -> Pte {
        let state = self.kernel.state.lock();
        let Some(record) = state.env(self.id) else {
            return Pte::empty();
        };
        match level {
            Level::Directory => record.pde(index),
            Level::Table => record.pte(VirtAddr::from_page_number(index)),
        }
    }

    fn page_ref(&self, ppn: Ppn) -> u32 {
        self.kernel.share_count(ppn)
    }
}

impl Syscalls for SimEnv {
    fn getenvid(&self) -> EnvId {
        self.id
    }

    fn page_alloc(&self, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<()> {
        self.kernel.state.lock().page_alloc(self.id, env, va, perm)
    }

    fn page_map(
        &self,
        srcenv: EnvId,
        srcva: VirtAddr,
        dstenv: EnvId,
        dstva: VirtAddr,
        perm: PteFlags,
    ) -> Result<()> {
        self.kernel
            .state
            .lock()
            .page_map(self.id, srcenv, srcva, dstenv, dstva, perm)
    }

    fn page_unmap(&self, env: EnvId, va: VirtAddr) -> Result<()> {
        self.kernel.state.lock().page_unmap(self.id, env, va)
    }

    fn exofork(&self) -> Result<Exofork> {
        self.kernel.state.lock().exofork(self.id)
    }

    fn env_set_status(&self, env: EnvId, status: EnvStatus) -> Result<()> {
        self.kernel.state.lock().env_set_status(self.id, env, status)
    }

    fn env_set_pgfault_upcall(&self, env: EnvId, handler: PgfaultHandler) -> Result<()> {
        self.kernel
            .state
            .lock()
            .env_set_pgfault_upcall(self.id, env, handler)
    }

    fn copy_page(&self, dst: VirtAddr, src: VirtAddr) -> Result<()> {
        self.kernel.state.lock().copy_page(self.id, dst, src)
    }

    fn this_env(&self) -> &ThisEnv {
        &self.this_env
    }

    fn layout(&self) -> Layout {
        self.kernel.layout()
    }
}

impl fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEnv").field("id", &self.id).finish()
    }
}
