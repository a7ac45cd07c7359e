// libs/exofork/src/syscall.rs
//! Interface avec le substrat exokernel.
//!
//! Le moteur COW ne touche jamais directement aux tables de pages : il les
//! lit à travers [`PageTableView`] et ne les modifie qu'au moyen des appels
//! système de [`Syscalls`], chacun atomique du point de vue des processus.

use exofork_types::{EnvId, EnvStatus, Ppn, Pte, PteFlags, Result, VirtAddr};

use crate::error::ForkResult;
use crate::layout::Layout;
use crate::this_env::ThisEnv;

/// Code d'erreur matériel : la page était présente
pub const FEC_PR: u32 = 0x1;
/// Code d'erreur matériel : l'accès était une écriture
pub const FEC_WR: u32 = 0x2;
/// Code d'erreur matériel : l'accès venait du mode utilisateur
pub const FEC_U: u32 = 0x4;

/// Cadre de faute transmis au handler utilisateur par le trampoline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct UTrapframe {
    /// Adresse virtuelle fautive
    pub fault_va: VirtAddr,
    /// Code d'erreur (`FEC_*`)
    pub err: u32,
    /// Pointeur d'instruction au moment de la faute
    pub eip: u32,
    /// Pointeur de pile au moment de la faute
    pub esp: u32,
}

impl UTrapframe {
    pub const fn is_write(&self) -> bool {
        self.err & FEC_WR != 0
    }
}

/// Niveau de la hiérarchie à deux étages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Index = numéro d'entrée du répertoire (`PDX`)
    Directory,
    /// Index = numéro de page virtuelle (`PGNUM`), vue aplatie de toutes les tables
    Table,
}

/// Vue en lecture seule des tables de pages de l'appelant
pub trait PageTableView {
    /// Lit une entrée. Une entrée de table dont le répertoire n'est pas
    /// présent n'a pas de sens : vérifier le niveau `Directory` d'abord.
    fn entry_at(&self, level: Level, index: usize) -> Pte;

    /// Nombre d'espaces d'adressage qui mappent la page physique
    fn page_ref(&self, ppn: Ppn) -> u32;

    /// Descend les deux niveaux ; `None` si l'un d'eux n'est pas présent.
    fn walk(&self, va: VirtAddr) -> Option<Pte> {
        if !self.entry_at(Level::Directory, va.pdx()).is_present() {
            return None;
        }
        let pte = self.entry_at(Level::Table, va.page_number());
        pte.is_present().then_some(pte)
    }
}

/// Retour de `exofork()`, vu depuis chacun des deux processus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exofork {
    /// Exécution dans l'enfant
    Child,
    /// Exécution dans le parent, avec l'identifiant de l'enfant
    Parent(EnvId),
}

/// Handler de faute de page appelé par le trampoline
pub type PgfaultHandler = fn(&dyn Syscalls, &UTrapframe) -> ForkResult<()>;

/// Appels système consommés par le moteur COW
pub trait Syscalls: PageTableView {
    /// Identifiant courant, toujours relu auprès du noyau
    fn getenvid(&self) -> EnvId;

    /// Alloue une page physique remise à zéro et la mappe en `va`
    fn page_alloc(&self, env: EnvId, va: VirtAddr, perm: PteFlags) -> Result<()>;

    /// Mappe la page de `srcenv:srcva` en `dstenv:dstva`. Remplace
    /// atomiquement un mapping existant à la destination.
    fn page_map(
        &self,
        srcenv: EnvId,
        srcva: VirtAddr,
        dstenv: EnvId,
        dstva: VirtAddr,
        perm: PteFlags,
    ) -> Result<()>;

    /// Retire le mapping de `va` (sans erreur si rien n'y est mappé)
    fn page_unmap(&self, env: EnvId, va: VirtAddr) -> Result<()>;

    /// Crée un enfant non exécutable, copie des registres de l'appelant,
    /// avec un espace d'adressage vide
    fn exofork(&self) -> Result<Exofork>;

    fn env_set_status(&self, env: EnvId, status: EnvStatus) -> Result<()>;

    /// Installe le handler de faute de page de `env`
    fn env_set_pgfault_upcall(&self, env: EnvId, handler: PgfaultHandler) -> Result<()>;

    /// Copie une page entière de l'espace de l'appelant
    fn copy_page(&self, dst: VirtAddr, src: VirtAddr) -> Result<()>;

    /// Identité mémorisée par le processus
    fn this_env(&self) -> &ThisEnv;

    fn layout(&self) -> Layout {
        Layout::default_config()
    }
}
