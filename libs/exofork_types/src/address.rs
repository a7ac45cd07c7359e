// libs/exofork_types/src/address.rs
//! Adresses virtuelles et numéros de pages physiques.
//!
//! Toute la connaissance du découpage d'une adresse virtuelle (répertoire 10
//! bits, table 10 bits, offset 12 bits) est concentrée ici.

use core::fmt;

/// Taille d'une page en octets
pub const PGSIZE: usize = 4096;

/// log2(PGSIZE)
pub const PGSHIFT: u32 = 12;

/// Nombre d'entrées dans un répertoire de pages
pub const NPDENTRIES: usize = 1024;

/// Nombre d'entrées dans une table de pages
pub const NPTENTRIES: usize = 1024;

/// Octets couverts par une entrée de répertoire
pub const PTSIZE: usize = PGSIZE * NPTENTRIES;

/// log2(PTSIZE)
pub const PTSHIFT: u32 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u32);

impl VirtAddr {
    pub const fn new(addr: u32) -> Self {
        VirtAddr(addr)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Reconstruit l'adresse d'une page à partir de ses deux index.
    pub const fn from_indices(pdx: usize, ptx: usize) -> Self {
        VirtAddr(((pdx as u32) << PTSHIFT) | ((ptx as u32) << PGSHIFT))
    }

    /// Adresse de la page numéro `pn` (index plat dans la vue UVPT).
    pub const fn from_page_number(pn: usize) -> Self {
        VirtAddr((pn as u32) << PGSHIFT)
    }

    /// Index dans le répertoire de pages
    pub const fn pdx(&self) -> usize {
        (self.0 >> PTSHIFT) as usize & (NPDENTRIES - 1)
    }

    /// Index dans la table de pages
    pub const fn ptx(&self) -> usize {
        (self.0 >> PGSHIFT) as usize & (NPTENTRIES - 1)
    }

    /// Numéro de page virtuelle
    pub const fn page_number(&self) -> usize {
        (self.0 >> PGSHIFT) as usize
    }

    pub const fn page_offset(&self) -> usize {
        self.0 as usize & (PGSIZE - 1)
    }

    pub const fn round_down(&self) -> Self {
        VirtAddr(self.0 & !(PGSIZE as u32 - 1))
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.page_offset() == 0
    }

    /// Décale l'adresse de `bytes` octets (arithmétique modulaire).
    pub const fn offset(&self, bytes: u32) -> Self {
        VirtAddr(self.0.wrapping_add(bytes))
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for VirtAddr {
    fn from(addr: u32) -> Self {
        VirtAddr(addr)
    }
}

impl From<VirtAddr> for u32 {
    fn from(addr: VirtAddr) -> Self {
        addr.0
    }
}

/// Numéro de page physique (index dans le tableau `pages` du noyau)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Ppn(u32);

impl Ppn {
    pub const fn new(ppn: u32) -> Self {
        Ppn(ppn)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    /// Adresse physique du début de la page
    pub const fn phys_addr(&self) -> u32 {
        self.0 << PGSHIFT
    }
}

impl fmt::Display for Ppn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ppn {:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(PTSIZE, 1 << PTSHIFT);
    const_assert_eq!(PGSIZE, 1 << PGSHIFT);

    #[test]
    fn test_indices() {
        let va = VirtAddr::new(0xeebf_f123);
        assert_eq!(va.pdx(), 0x3ba);
        assert_eq!(va.ptx(), 0x3ff);
        assert_eq!(va.page_offset(), 0x123);
        assert_eq!(va.round_down(), VirtAddr::new(0xeebf_f000));
        assert_eq!(VirtAddr::from_indices(va.pdx(), va.ptx()), va.round_down());
    }

    #[test]
    fn test_page_number_roundtrip() {
        let va = VirtAddr::new(0x0080_2000);
        assert_eq!(va.page_number(), 0x802);
        assert_eq!(VirtAddr::from_page_number(0x802), va);
        assert_eq!(va.page_number(), va.pdx() * NPTENTRIES + va.ptx());
    }

    #[test]
    fn test_alignment() {
        assert!(VirtAddr::new(0x1000).is_page_aligned());
        assert!(!VirtAddr::new(0x1004).is_page_aligned());
        assert_eq!(Ppn::new(3).phys_addr(), 0x3000);
    }
}
