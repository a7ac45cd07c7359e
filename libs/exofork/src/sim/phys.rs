// libs/exofork/src/sim/phys.rs
//! Pages physiques simulées et leurs compteurs de références.

use alloc::boxed::Box;
use alloc::vec::Vec;

use exofork_types::{Ppn, PGSIZE};

/// Une page physique allouée
struct Frame {
    data: Box<[u8; PGSIZE]>,
    /// Nombre de mappings qui référencent la page
    refs: u32,
}

/// Mémoire physique du substrat simulé.
///
/// La page 0 n'est jamais allouée : une entrée vide désigne toujours un
/// numéro invalide.
pub struct PhysMemory {
    frames: Vec<Option<Frame>>,
    free: Vec<u32>,
    limit: usize,
}

impl PhysMemory {
    /// Crée une mémoire pouvant contenir `limit` pages
    pub fn new(limit: usize) -> Self {
        let mut frames = Vec::new();
        frames.push(None);
        Self {
            frames,
            free: Vec::new(),
            limit,
        }
    }

    /// Alloue une page remise à zéro, sans référence
    pub fn alloc(&mut self) -> Option<Ppn> {
        let frame = Frame {
            data: Box::new([0u8; PGSIZE]),
            refs: 0,
        };

        if let Some(index) = self.free.pop() {
            self.frames[index as usize] = Some(frame);
            return Some(Ppn::new(index));
        }

        if self.in_use() >= self.limit {
            return None;
        }

        self.frames.push(Some(frame));
        Some(Ppn::new((self.frames.len() - 1) as u32))
    }

    pub fn incref(&mut self, ppn: Ppn) {
        if let Some(frame) = self.frame_mut(ppn) {
            frame.refs += 1;
        }
    }

    /// Décrémente le compteur ; la page est libérée quand il atteint 0
    pub fn decref(&mut self, ppn: Ppn) {
        let Some(frame) = self.frame_mut(ppn) else {
            return;
        };

        frame.refs = frame.refs.saturating_sub(1);
        if frame.refs == 0 {
            self.frames[ppn.index()] = None;
            self.free.push(ppn.as_u32());
        }
    }

    /// Compteur de références (0 pour une page libre)
    pub fn refcount(&self, ppn: Ppn) -> u32 {
        self.frame(ppn).map_or(0, |frame| frame.refs)
    }

    pub fn data(&self, ppn: Ppn) -> Option<&[u8; PGSIZE]> {
        self.frame(ppn).map(|frame| &*frame.data)
    }

    pub fn data_mut(&mut self, ppn: Ppn) -> Option<&mut [u8; PGSIZE]> {
        self.frame_mut(ppn).map(|frame| &mut *frame.data)
    }

    /// Copie le contenu de `src` dans `dst`
    pub fn copy(&mut self, dst: Ppn, src: Ppn) -> bool {
        let Some(bytes) = self.data(src).copied() else {
            return false;
        };
        match self.data_mut(dst) {
            Some(page) => {
                *page = bytes;
                true
            }
            None => false,
        }
    }

    /// Nombre de pages allouées
    pub fn in_use(&self) -> usize {
        self.frames.len() - 1 - self.free.len()
    }

    fn frame(&self, ppn: Ppn) -> Option<&Frame> {
        self.frames.get(ppn.index()).and_then(Option::as_ref)
    }

    fn frame_mut(&mut self, ppn: Ppn) -> Option<&mut Frame> {
        self.frames.get_mut(ppn.index()).and_then(Option::as_mut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_zeroed_and_unreferenced() {
        let mut phys = PhysMemory::new(4);
        let ppn = phys.alloc().unwrap();
        assert_ne!(ppn.index(), 0);
        assert_eq!(phys.refcount(ppn), 0);
        assert!(phys.data(ppn).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decref_frees_and_recycles() {
        let mut phys = PhysMemory::new(1);
        let ppn = phys.alloc().unwrap();
        phys.incref(ppn);
        phys.incref(ppn);
        assert!(phys.alloc().is_none());

        phys.decref(ppn);
        assert_eq!(phys.refcount(ppn), 1);
        phys.decref(ppn);
        assert_eq!(phys.refcount(ppn), 0);
        assert_eq!(phys.in_use(), 0);
        assert_eq!(phys.alloc(), Some(ppn));
    }

    #[test]
    fn test_copy() {
        let mut phys = PhysMemory::new(2);
        let a = phys.alloc().unwrap();
        let b = phys.alloc().unwrap();
        phys.data_mut(a).unwrap()[..4].copy_from_slice(b"AAAA");
        assert!(phys.copy(b, a));
        assert_eq!(&phys.data(b).unwrap()[..4], b"AAAA");
    }
}
