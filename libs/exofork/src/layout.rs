// libs/exofork/src/layout.rs
//! Disposition de l'espace d'adressage utilisateur.

use exofork_types::{VirtAddr, PGSIZE, PTSIZE};

/// Adresses fixes de l'espace utilisateur utilisées par le fork COW
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Limite haute de l'espace dupliqué (exclusive)
    pub utop: VirtAddr,
    /// Sommet de la pile d'exception (une seule page en dessous)
    pub uxstacktop: VirtAddr,
    /// Sommet de la pile utilisateur normale
    pub ustacktop: VirtAddr,
    /// Début du code des programmes
    pub utext: VirtAddr,
    /// Emplacement temporaire utilisé par le handler de faute
    pub pftemp: VirtAddr,
    /// Fenêtre en lecture seule sur les tables de pages
    pub uvpt: VirtAddr,
    /// Fenêtre en lecture seule sur le tableau des pages physiques
    pub upages: VirtAddr,
}

const UTOP: u32 = 0xeec0_0000;
const UTEMP: u32 = PTSIZE as u32;

impl Layout {
    /// Disposition par défaut de l'exokernel
    pub const fn default_config() -> Self {
        Layout {
            utop: VirtAddr::new(UTOP),
            uxstacktop: VirtAddr::new(UTOP),
            ustacktop: VirtAddr::new(UTOP - 2 * PGSIZE as u32),
            utext: VirtAddr::new(2 * PTSIZE as u32),
            pftemp: VirtAddr::new(UTEMP + PTSIZE as u32 - PGSIZE as u32),
            uvpt: VirtAddr::new(0xef40_0000),
            upages: VirtAddr::new(0xef00_0000),
        }
    }

    /// Page de la pile d'exception
    pub const fn uxstack_page(&self) -> VirtAddr {
        VirtAddr::new(self.uxstacktop.as_u32() - PGSIZE as u32)
    }

    /// Page la plus haute de la pile utilisateur normale
    pub const fn ustack_page(&self) -> VirtAddr {
        VirtAddr::new(self.ustacktop.as_u32() - PGSIZE as u32)
    }

    /// Vrai si `va` appartient à l'espace dupliqué par `fork()`
    pub const fn is_user(&self, va: VirtAddr) -> bool {
        va.as_u32() < self.utop.as_u32()
    }
}

impl Default for Layout {
    fn default() -> Self {
        Layout::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert;

    const_assert!(UTEMP + PTSIZE as u32 <= 2 * PTSIZE as u32);
    const_assert!(UTOP % PTSIZE as u32 == 0);

    #[test]
    fn test_default_layout() {
        let layout = Layout::default_config();
        assert_eq!(layout.uxstack_page(), VirtAddr::new(0xeebf_f000));
        assert_eq!(layout.pftemp, VirtAddr::new(0x007f_f000));
        assert_eq!(layout.ustack_page(), VirtAddr::new(0xeebf_d000));
        assert!(layout.is_user(layout.uxstack_page()));
        assert!(!layout.is_user(layout.uvpt));
    }

    #[test]
    fn test_scratch_slot_is_below_text() {
        let layout = Layout::default();
        assert!(layout.pftemp < layout.utext);
        assert!(layout.pftemp.is_page_aligned());
    }
}
