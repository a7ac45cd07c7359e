// libs/exofork/src/lib.rs
//! # exofork
//!
//! `fork()` copy-on-write implémenté entièrement en espace utilisateur au-dessus
//! des primitives de l'exokernel (`page_alloc`, `page_map`, `page_unmap`,
//! `exofork`, upcall de faute de page).
//!
//! Aucune page n'est copiée au moment du fork : parent et enfant partagent les
//! pages physiques en lecture seule marquées `COW`, et le premier processus qui
//! écrit reçoit une copie privée via [`pgfault::pgfault`].
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod duppage;
pub mod error;
pub mod fork;
pub mod layout;
pub mod pageref;
pub mod pgfault;
pub mod policy;
pub mod syscall;
pub mod this_env;

#[cfg(not(any(test, feature = "test_mode")))]
pub mod abi;

#[cfg(any(test, feature = "test_mode"))]
pub mod sim;

#[cfg(test)]
mod tests;

// Réexportations
pub use error::{ErrorKind, ForkError, ForkResult};
pub use exofork_types::{EnvId, EnvStatus, ErrorCode, ExoError, Pte, PteFlags, VirtAddr};
pub use fork::{fork, fork_raw, sfork, ForkReturn};
pub use layout::Layout;
pub use pageref::pageref;
pub use policy::MappingClass;
pub use syscall::{Exofork, Level, PageTableView, PgfaultHandler, Syscalls, UTrapframe};
pub use this_env::ThisEnv;

/// Version de la bibliothèque
pub const EXOFORK_VERSION: &str = "0.1.0-alpha";

/// Initialise la bibliothèque
pub fn init() {
    exofork_types::init();
    log::info!("exofork initialized (v{})", EXOFORK_VERSION);
}
