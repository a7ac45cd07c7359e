// libs/exofork_types/src/pte.rs
//! Encodage des entrées de tables de pages.

use bitflags::bitflags;
use core::fmt;

use crate::address::{Ppn, PGSHIFT};

bitflags! {
    /// Bits de permission d'une entrée de répertoire ou de table
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PteFlags: u32 {
        const PRESENT       = 0x001;
        const WRITABLE      = 0x002;
        const USER          = 0x004;
        const WRITE_THROUGH = 0x008;
        const CACHE_DISABLE = 0x010;
        const ACCESSED      = 0x020;
        const DIRTY         = 0x040;
        const HUGE          = 0x080;
        const GLOBAL        = 0x100;

        /// Partagée sans condition : jamais dupliquée en copy-on-write
        const SHARE = 0x400;
        /// Copy-on-write
        const COW   = 0x800;
        /// Bits laissés au logiciel (ignorés par le matériel et le noyau)
        const AVAIL = 0xE00;

        /// Bits qu'un appelant peut passer aux appels système de mapping
        const SYSCALL = Self::AVAIL.bits() | Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::USER.bits();
    }
}

impl PteFlags {
    /// Permissions d'une page utilisateur privée et inscriptible
    pub const USER_RW: PteFlags = PteFlags::PRESENT
        .union(PteFlags::USER)
        .union(PteFlags::WRITABLE);

    /// Permissions d'une page utilisateur en lecture seule
    pub const USER_RO: PteFlags = PteFlags::PRESENT.union(PteFlags::USER);
}

/// Entrée de table de pages : `(ppn << 12) | flags`
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Pte(u32);

impl Pte {
    const FLAGS_MASK: u32 = 0xFFF;

    /// Entrée non présente
    pub const fn empty() -> Self {
        Pte(0)
    }

    pub const fn new(ppn: Ppn, flags: PteFlags) -> Self {
        Pte((ppn.as_u32() << PGSHIFT) | (flags.bits() & Self::FLAGS_MASK))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Pte(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn ppn(&self) -> Ppn {
        Ppn::new(self.0 >> PGSHIFT)
    }

    pub const fn flags(&self) -> PteFlags {
        PteFlags::from_bits_retain(self.0 & Self::FLAGS_MASK)
    }

    pub const fn is_present(&self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    pub const fn is_user(&self) -> bool {
        self.0 & PteFlags::USER.bits() != 0
    }

    pub const fn is_writable(&self) -> bool {
        self.0 & PteFlags::WRITABLE.bits() != 0
    }

    pub const fn is_cow(&self) -> bool {
        self.0 & PteFlags::COW.bits() != 0
    }
}

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pte({:#x}, {:?})", self.ppn().as_u32(), self.flags())
    }
}

impl fmt::Display for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let pte = Pte::new(Ppn::new(0x1234), PteFlags::USER_RW | PteFlags::COW);
        assert_eq!(pte.raw(), 0x0123_4807);
        assert_eq!(pte.ppn(), Ppn::new(0x1234));
        assert!(pte.is_present() && pte.is_user() && pte.is_writable() && pte.is_cow());
    }

    #[test]
    fn test_syscall_mask() {
        assert_eq!(PteFlags::SYSCALL.bits(), 0xE07);
        assert!(PteFlags::SYSCALL.contains(PteFlags::COW | PteFlags::SHARE));
        assert!(!PteFlags::SYSCALL.contains(PteFlags::DIRTY));
    }

    #[test]
    fn test_empty_entry() {
        let pte = Pte::empty();
        assert!(!pte.is_present());
        assert_eq!(pte.flags(), PteFlags::empty());
    }
}
