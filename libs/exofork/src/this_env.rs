// libs/exofork/src/this_env.rs
//! Identité du processus courant, mémorisée localement.
//!
//! Juste après `exofork()`, la copie détenue par l'enfant désigne encore le
//! parent : elle n'est valide qu'une fois rafraîchie dans le chemin enfant
//! de `fork()`. Le handler de faute ne la lit jamais.

use core::sync::atomic::{AtomicU32, Ordering};

use exofork_types::EnvId;

use crate::error::{ForkError, ForkResult};

/// Cellule locale au processus
#[derive(Debug)]
pub struct ThisEnv {
    id: AtomicU32,
}

impl ThisEnv {
    pub const fn uninit() -> Self {
        Self { id: AtomicU32::new(0) }
    }

    pub const fn new(id: EnvId) -> Self {
        Self { id: AtomicU32::new(id.as_u32()) }
    }

    /// Lit l'identité ; échoue si elle n'a jamais été initialisée.
    pub fn get(&self) -> ForkResult<EnvId> {
        match self.id.load(Ordering::Acquire) {
            0 => Err(ForkError::IdentityUninitialized),
            id => Ok(EnvId::new(id)),
        }
    }

    /// Réinitialise la cellule avec l'identifiant fourni par le noyau
    pub fn refresh(&self, id: EnvId) {
        self.id.store(id.as_u32(), Ordering::Release);
    }

    pub fn is_initialized(&self) -> bool {
        self.id.load(Ordering::Acquire) != 0
    }

    /// Copie brute, telle que l'enfant la trouve après `exofork()`
    pub fn snapshot(&self) -> Self {
        Self { id: AtomicU32::new(self.id.load(Ordering::Acquire)) }
    }
}

impl Default for ThisEnv {
    fn default() -> Self {
        Self::uninit()
    }
}
