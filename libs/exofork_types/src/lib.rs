#![cfg_attr(not(test), no_std)]

pub mod address;
pub mod env;
pub mod error;
pub mod pte;

// Réexportations
pub use address::{Ppn, VirtAddr, NPDENTRIES, NPTENTRIES, PGSHIFT, PGSIZE, PTSHIFT, PTSIZE};
pub use env::{EnvId, EnvStatus};
pub use error::{ErrorCode, ExoError, Result};
pub use pte::{Pte, PteFlags};

// Initialisation globale
pub fn init() {
    log::trace!("exofork_types initialized");
}
