// libs/exofork_types/src/env.rs
use core::fmt;

/// Identifiant opaque d'un environnement (processus).
///
/// La valeur 0 est réservée : passée à un appel système elle désigne
/// l'appelant, et `fork()` la renvoie dans l'enfant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EnvId(u32);

impl EnvId {
    /// Désigne l'environnement appelant
    pub const SELF: EnvId = EnvId(0);

    pub const fn new(id: u32) -> Self {
        EnvId(id)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn is_self(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// État d'ordonnancement d'un environnement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    /// Créé mais pas encore éligible
    NotRunnable,
    Runnable,
    Running,
    /// Détruit (sortie ou faute fatale)
    Dying,
}
