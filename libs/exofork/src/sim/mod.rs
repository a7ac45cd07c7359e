// libs/exofork/src/sim/mod.rs
//! Substrat exokernel simulé en mémoire.
//!
//! Remplace les appels système réels quand la feature `test_mode` est active
//! (et toujours pendant les tests). Chaque [`SimEnv`] exécute les appels au
//! nom d'un environnement : tables de pages à deux niveaux, compteurs de
//! références des pages physiques, statut d'exécution et upcall de faute
//! suivent les règles de l'exokernel.
//!
//! L'enfant créé par `exofork()` n'a pas de registres : il « reprend »
//! dans `fork()` quand on l'exécute via [`SimKernel::env`], son premier
//! `exofork()` retournant alors [`Exofork::Child`](crate::Exofork::Child).

mod env;
mod kernel;
mod phys;

pub use env::{SimEnv, SimError};
pub use kernel::SimKernel;
pub use phys::PhysMemory;

use crate::layout::Layout;

/// Configuration du substrat simulé
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Pages physiques disponibles
    pub max_frames: usize,
    /// Environnements vivants simultanés
    pub max_envs: usize,
    pub layout: Layout,
}

impl SimConfig {
    pub const fn default_config() -> Self {
        Self {
            max_frames: 1024,
            max_envs: 1024,
            layout: Layout::default_config(),
        }
    }

    pub const fn with_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub const fn with_envs(mut self, max_envs: usize) -> Self {
        self.max_envs = max_envs;
        self
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Default for SimKernel {
    fn default() -> Self {
        SimKernel::new(SimConfig::default_config())
    }
}
