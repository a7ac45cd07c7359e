// libs/exofork/src/sim/kernel.rs
//! État du noyau simulé : environnements, tables de pages à deux niveaux et
//! appels système avec les contrôles de l'exokernel.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use exofork_types::{
    EnvId, EnvStatus, ErrorCode, ExoError, Ppn, Pte, PteFlags, Result, VirtAddr, NPDENTRIES,
    NPTENTRIES,
};
use spin::Mutex;

use super::env::SimEnv;
use super::phys::PhysMemory;
use super::SimConfig;
use crate::layout::Layout;
use crate::syscall::{Exofork, PgfaultHandler, FEC_PR, FEC_U, FEC_WR};
use crate::this_env::ThisEnv;

/// Premier identifiant attribué
const FIRST_ENVID: u32 = 0x1000;

type PageTable = [Pte; NPTENTRIES];

/// Descripteur d'environnement côté noyau
pub(super) struct EnvRecord {
    pub(super) parent: Option<EnvId>,
    pub(super) status: EnvStatus,
    pgdir: Vec<Option<Box<PageTable>>>,
    pub(super) upcall: Option<PgfaultHandler>,
    /// Mémoire locale du processus contenant `ThisEnv`
    pub(super) this_env: Arc<ThisEnv>,
    /// Vrai tant que l'enfant n'est pas ressorti de `exofork()`
    resumes_in_fork: bool,
    pub(super) faults: usize,
}

impl EnvRecord {
    fn new(parent: Option<EnvId>, status: EnvStatus, this_env: Arc<ThisEnv>) -> Self {
        let mut pgdir = Vec::with_capacity(NPDENTRIES);
        pgdir.resize_with(NPDENTRIES, || None);
        Self {
            parent,
            status,
            pgdir,
            upcall: None,
            this_env,
            resumes_in_fork: false,
            faults: 0,
        }
    }

    pub(super) fn pde(&self, pdx: usize) -> Pte {
        match self.pgdir.get(pdx) {
            Some(Some(_)) => Pte::new(Ppn::new(0), PteFlags::USER_RW),
            _ => Pte::empty(),
        }
    }

    pub(super) fn pte(&self, va: VirtAddr) -> Pte {
        match self.pgdir.get(va.pdx()) {
            Some(Some(table)) => table[va.ptx()],
            _ => Pte::empty(),
        }
    }

    fn pte_mut(&mut self, va: VirtAddr) -> &mut Pte {
        let table = self.pgdir[va.pdx()].get_or_insert_with(|| Box::new([Pte::empty(); NPTENTRIES]));
        &mut table[va.ptx()]
    }

    fn mapped(&self) -> impl Iterator<Item = (VirtAddr, Pte)> + '_ {
        self.pgdir.iter().enumerate().flat_map(|(pdx, table)| {
            table.iter().flat_map(move |table| {
                table
                    .iter()
                    .enumerate()
                    .filter(|(_, pte)| pte.is_present())
                    .map(move |(ptx, pte)| (VirtAddr::from_indices(pdx, ptx), *pte))
            })
        })
    }

    fn is_alive(&self) -> bool {
        self.status != EnvStatus::Dying
    }
}

/// Traduction refusée : code `FEC_*` de la faute à délivrer
pub(super) type Translation = core::result::Result<Ppn, u32>;

pub(super) struct KernelState {
    pub(super) phys: PhysMemory,
    envs: BTreeMap<EnvId, EnvRecord>,
    next_id: u32,
    max_envs: usize,
    pub(super) layout: Layout,
}

impl KernelState {
    fn new(config: &SimConfig) -> Self {
        Self {
            phys: PhysMemory::new(config.max_frames),
            envs: BTreeMap::new(),
            next_id: FIRST_ENVID,
            max_envs: config.max_envs,
            layout: config.layout,
        }
    }

    pub(super) fn env(&self, id: EnvId) -> Option<&EnvRecord> {
        self.envs.get(&id)
    }

    pub(super) fn env_mut(&mut self, id: EnvId) -> Option<&mut EnvRecord> {
        self.envs.get_mut(&id)
    }

    fn alloc_env(&mut self, parent: Option<EnvId>, this_env: Arc<ThisEnv>) -> Result<EnvId> {
        let live = self.envs.values().filter(|env| env.is_alive()).count();
        if live >= self.max_envs {
            return Err(ExoError::new(ErrorCode::NoFreeEnv));
        }

        let id = EnvId::new(self.next_id);
        self.next_id += 1;
        let status = if parent.is_some() {
            EnvStatus::NotRunnable
        } else {
            EnvStatus::Runnable
        };
        self.envs.insert(id, EnvRecord::new(parent, status, this_env));
        Ok(id)
    }

    /// L'appelant doit être vivant et éligible à l'exécution
    fn caller(&self, caller: EnvId) -> Result<&EnvRecord> {
        match self.envs.get(&caller) {
            Some(env) if matches!(env.status, EnvStatus::Runnable | EnvStatus::Running) => Ok(env),
            _ => Err(ExoError::with_message(ErrorCode::BadEnv, "caller is not running")
                .with_context(u64::from(caller.as_u32()))),
        }
    }

    /// Résout `target` : 0 désigne l'appelant, sinon l'appelant ou un de
    /// ses enfants directs
    fn envid2env(&self, caller: EnvId, target: EnvId) -> Result<EnvId> {
        self.caller(caller)?;
        if target.is_self() || target == caller {
            return Ok(caller);
        }
        match self.envs.get(&target) {
            Some(env) if env.is_alive() && env.parent == Some(caller) => Ok(target),
            _ => Err(ExoError::new(ErrorCode::BadEnv).with_context(u64::from(target.as_u32()))),
        }
    }

    fn check_va(&self, va: VirtAddr) -> Result<()> {
        if !self.layout.is_user(va) || !va.is_page_aligned() {
            return Err(ExoError::with_message(ErrorCode::Invalid, "bad virtual address")
                .with_context(u64::from(va.as_u32())));
        }
        Ok(())
    }

    fn check_perm(perm: PteFlags) -> Result<()> {
        if !perm.contains(PteFlags::USER_RO) || !PteFlags::SYSCALL.contains(perm) {
            return Err(ExoError::with_message(ErrorCode::Invalid, "bad permissions")
                .with_context(u64::from(perm.bits())));
        }
        Ok(())
    }

    /// Insère `ppn` en `va`. La référence est prise avant de relâcher
    /// l'ancien mapping : remapper la même page ne la libère pas.
    fn page_insert(&mut self, env: EnvId, va: VirtAddr, ppn: Ppn, perm: PteFlags) -> Result<()> {
        self.phys.incref(ppn);
        let record = self.envs.get_mut(&env).ok_or(ExoError::new(ErrorCode::BadEnv))?;
        let slot = record.pte_mut(va);
        let old = core::mem::replace(slot, Pte::new(ppn, perm));
        if old.is_present() {
            self.phys.decref(old.ppn());
        }
        Ok(())
    }

    fn page_remove(&mut self, env: EnvId, va: VirtAddr) {
        let Some(record) = self.envs.get_mut(&env) else {
            return;
        };
        if record.pte(va).is_present() {
            let old = core::mem::take(record.pte_mut(va));
            self.phys.decref(old.ppn());
        }
    }

    pub(super) fn page_alloc(&mut self, caller: EnvId, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<()> {
        let env = self.envid2env(caller, env)?;
        self.check_va(va)?;
        Self::check_perm(perm)?;

        let ppn = self.phys.alloc().ok_or(ExoError::new(ErrorCode::NoMem))?;
        self.page_insert(env, va, ppn, perm)
    }

    pub(super) fn page_map(
        &mut self,
        caller: EnvId,
        srcenv: EnvId,
        srcva: VirtAddr,
        dstenv: EnvId,
        dstva: VirtAddr,
        perm: PteFlags,
    ) -> Result<()> {
        let srcenv = self.envid2env(caller, srcenv)?;
        let dstenv = self.envid2env(caller, dstenv)?;
        self.check_va(srcva)?;
        self.check_va(dstva)?;
        Self::check_perm(perm)?;

        let src = self.envs.get(&srcenv).map(|env| env.pte(srcva)).unwrap_or_default();
        if !src.is_present() {
            return Err(ExoError::with_message(ErrorCode::Invalid, "source page not mapped")
                .with_context(u64::from(srcva.as_u32())));
        }
        if perm.contains(PteFlags::WRITABLE) && !src.is_writable() {
            return Err(ExoError::with_message(ErrorCode::Invalid, "write access to read-only page")
                .with_context(u64::from(srcva.as_u32())));
        }

        self.page_insert(dstenv, dstva, src.ppn(), perm)
    }

    pub(super) fn page_unmap(&mut self, caller: EnvId, env: EnvId, va: VirtAddr) -> Result<()> {
        let env = self.envid2env(caller, env)?;
        self.check_va(va)?;
        self.page_remove(env, va);
        Ok(())
    }

    pub(super) fn exofork(&mut self, caller: EnvId) -> Result<Exofork> {
        self.caller(caller)?;
        let record = self.envs.get_mut(&caller).ok_or(ExoError::new(ErrorCode::BadEnv))?;
        if record.resumes_in_fork {
            record.resumes_in_fork = false;
            return Ok(Exofork::Child);
        }

        // L'enfant reçoit une copie brute de la mémoire locale du parent
        let this_env = Arc::new(record.this_env.snapshot());
        let child = self.alloc_env(Some(caller), this_env)?;
        if let Some(record) = self.envs.get_mut(&child) {
            record.resumes_in_fork = true;
        }
        Ok(Exofork::Parent(child))
    }

    pub(super) fn env_set_status(&mut self, caller: EnvId, env: EnvId, status: EnvStatus) -> Result<()> {
        let env = self.envid2env(caller, env)?;
        if !matches!(status, EnvStatus::Runnable | EnvStatus::NotRunnable) {
            return Err(ExoError::new(ErrorCode::Invalid));
        }
        if let Some(record) = self.envs.get_mut(&env) {
            record.status = status;
        }
        Ok(())
    }

    pub(super) fn env_set_pgfault_upcall(&mut self, caller: EnvId, env: EnvId, handler: PgfaultHandler) -> Result<()> {
        let env = self.envid2env(caller, env)?;
        if let Some(record) = self.envs.get_mut(&env) {
            record.upcall = Some(handler);
        }
        Ok(())
    }

    /// Traduit un accès utilisateur de `env`
    pub(super) fn translate(&self, env: EnvId, va: VirtAddr, write: bool) -> Translation {
        let access = if write { FEC_WR | FEC_U } else { FEC_U };
        let pte = self.envs.get(&env).map(|env| env.pte(va)).unwrap_or_default();
        if !pte.is_present() || !pte.is_user() {
            return Err(access);
        }
        if write && !pte.is_writable() {
            return Err(access | FEC_PR);
        }
        Ok(pte.ppn())
    }

    pub(super) fn copy_page(&mut self, env: EnvId, dst: VirtAddr, src: VirtAddr) -> Result<()> {
        self.caller(env)?;
        let fault = |va: VirtAddr| ExoError::new(ErrorCode::Fault).with_context(u64::from(va.as_u32()));
        let src_ppn = self.translate(env, src.round_down(), false).map_err(|_| fault(src))?;
        let dst_ppn = self.translate(env, dst.round_down(), true).map_err(|_| fault(dst))?;
        if self.phys.copy(dst_ppn, src_ppn) {
            Ok(())
        } else {
            Err(fault(src))
        }
    }

    /// Détruit un environnement et relâche toutes ses pages
    pub(super) fn destroy(&mut self, env: EnvId) {
        let Some(record) = self.envs.get_mut(&env) else {
            return;
        };
        let pages: Vec<(VirtAddr, Pte)> = record.mapped().collect();
        record.pgdir.iter_mut().for_each(|table| *table = None);
        record.status = EnvStatus::Dying;
        record.upcall = None;
        for (_, pte) in pages {
            self.phys.decref(pte.ppn());
        }
    }

    pub(super) fn mapped_pages(&self, env: EnvId) -> Vec<(VirtAddr, Pte)> {
        self.envs
            .get(&env)
            .map(|record| record.mapped().collect())
            .unwrap_or_default()
    }
}

/// Noyau simulé, partagé entre tous les environnements
#[derive(Clone)]
pub struct SimKernel {
    pub(super) state: Arc<Mutex<KernelState>>,
}

impl SimKernel {
    pub fn new(config: SimConfig) -> Self {
        log::debug!(
            "sim: kernel with {} frames, {} envs, UTOP {}",
            config.max_frames,
            config.max_envs,
            config.layout.utop
        );
        Self {
            state: Arc::new(Mutex::new(KernelState::new(&config))),
        }
    }

    /// Crée un environnement racine exécutable, avec `ThisEnv` déjà
    /// initialisé comme le ferait `libmain`
    pub fn spawn(&self) -> Result<SimEnv> {
        let this_env = Arc::new(ThisEnv::uninit());
        let id = self.state.lock().alloc_env(None, this_env.clone())?;
        this_env.refresh(id);
        log::debug!("sim: spawned root env {}", id);
        Ok(SimEnv::new(self.clone(), id, this_env))
    }

    /// Poignée sur un environnement existant, pour s'exécuter en son nom
    pub fn env(&self, id: EnvId) -> Option<SimEnv> {
        let this_env = self.state.lock().env(id)?.this_env.clone();
        Some(SimEnv::new(self.clone(), id, this_env))
    }

    pub fn status(&self, id: EnvId) -> Option<EnvStatus> {
        self.state.lock().env(id).map(|env| env.status)
    }

    pub fn parent(&self, id: EnvId) -> Option<EnvId> {
        self.state.lock().env(id).and_then(|env| env.parent)
    }

    /// Nombre de fautes de page délivrées à `id`
    pub fn fault_count(&self, id: EnvId) -> usize {
        self.state.lock().env(id).map_or(0, |env| env.faults)
    }

    /// Entrée de table de `id` pour `va` (vide si non mappée)
    pub fn pte(&self, id: EnvId, va: VirtAddr) -> Pte {
        self.state.lock().env(id).map(|env| env.pte(va)).unwrap_or_default()
    }

    /// Pages présentes dans l'espace de `id`, par adresse croissante
    pub fn mapped_pages(&self, id: EnvId) -> Vec<(VirtAddr, Pte)> {
        self.state.lock().mapped_pages(id)
    }

    pub fn share_count(&self, ppn: Ppn) -> u32 {
        self.state.lock().phys.refcount(ppn)
    }

    /// Pages physiques allouées
    pub fn frames_in_use(&self) -> usize {
        self.state.lock().phys.in_use()
    }

    /// Environnements encore vivants
    pub fn live_envs(&self) -> Vec<EnvId> {
        let state = self.state.lock();
        state
            .envs
            .iter()
            .filter(|(_, env)| env.is_alive())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn destroy(&self, id: EnvId) {
        self.state.lock().destroy(id);
        log::debug!("sim: env {} destroyed", id);
    }

    pub fn layout(&self) -> Layout {
        self.state.lock().layout
    }
}
