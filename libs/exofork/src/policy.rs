// libs/exofork/src/policy.rs
//! Politique de duplication d'un mapping.
//!
//! Décide, à partir des permissions d'une page du parent, des permissions
//! installées à la fois dans l'enfant et, à nouveau, dans le parent.

use exofork_types::PteFlags;

/// Classe d'un mapping utilisateur. Les quatre classes sont exclusives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingClass {
    /// Inscriptible et possédée par un seul espace
    ExclusiveWritable,
    /// Lecture seule, partagée jusqu'à la première écriture
    CowShared,
    /// Partagée sans condition (mémoire partagée explicite)
    AlwaysShared,
    /// Lecture seule, aucune faute possible
    ReadOnly,
}

impl MappingClass {
    pub fn classify(flags: PteFlags) -> Self {
        if flags.contains(PteFlags::SHARE) {
            MappingClass::AlwaysShared
        } else if flags.contains(PteFlags::COW) {
            MappingClass::CowShared
        } else if flags.contains(PteFlags::WRITABLE) {
            MappingClass::ExclusiveWritable
        } else {
            MappingClass::ReadOnly
        }
    }

    /// Classe des deux mappings (parent et enfant) après une duplication
    pub const fn after_fork(self) -> Self {
        match self {
            MappingClass::ExclusiveWritable | MappingClass::CowShared => MappingClass::CowShared,
            MappingClass::AlwaysShared => MappingClass::AlwaysShared,
            MappingClass::ReadOnly => MappingClass::ReadOnly,
        }
    }

    /// Encode la classe sur les bits conservés de `base`
    pub fn apply(self, base: PteFlags) -> PteFlags {
        match self {
            MappingClass::AlwaysShared => base,
            MappingClass::CowShared => {
                (base - PteFlags::WRITABLE - PteFlags::SHARE) | PteFlags::COW | PteFlags::USER_RO
            }
            MappingClass::ExclusiveWritable => {
                (base - PteFlags::COW - PteFlags::SHARE) | PteFlags::USER_RW
            }
            MappingClass::ReadOnly => base - PteFlags::WRITABLE - PteFlags::COW - PteFlags::SHARE,
        }
    }
}

/// Permissions à installer pour une page dupliquée par `fork()`.
///
/// Le parent est remarqué COW même s'il l'était déjà : un petit-enfant ne
/// doit jamais hériter d'un accès en écriture.
pub fn duplicate_perm(flags: PteFlags) -> PteFlags {
    let base = flags & PteFlags::SYSCALL;
    MappingClass::classify(base).after_fork().apply(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const AVAIL_FREE: PteFlags = PteFlags::from_bits_retain(0x200);

    #[test]
    fn test_writable_becomes_cow() {
        let perm = duplicate_perm(PteFlags::USER_RW);
        assert_eq!(perm, PteFlags::USER_RO | PteFlags::COW);
    }

    #[test]
    fn test_cow_stays_cow() {
        let perm = duplicate_perm(PteFlags::USER_RO | PteFlags::COW);
        assert_eq!(perm, PteFlags::USER_RO | PteFlags::COW);
    }

    #[test]
    fn test_read_only_not_marked() {
        assert_eq!(duplicate_perm(PteFlags::USER_RO), PteFlags::USER_RO);
    }

    #[test]
    fn test_shared_passes_through() {
        let shared = PteFlags::USER_RW | PteFlags::SHARE;
        assert_eq!(duplicate_perm(shared), shared);
        assert_eq!(MappingClass::classify(shared), MappingClass::AlwaysShared);
    }

    #[test]
    fn test_hardware_bits_masked() {
        let dirty = PteFlags::USER_RW | PteFlags::DIRTY | PteFlags::ACCESSED;
        assert_eq!(duplicate_perm(dirty), PteFlags::USER_RO | PteFlags::COW);
    }

    fn user_flags() -> impl Strategy<Value = PteFlags> {
        (0u32..=0xE07)
            .prop_map(|bits| PteFlags::from_bits_truncate(bits) & PteFlags::SYSCALL | PteFlags::USER_RO)
            .prop_filter("COW and SHARE are exclusive", |f| {
                !f.contains(PteFlags::COW | PteFlags::SHARE)
            })
    }

    proptest! {
        #[test]
        fn prop_never_writable_unless_shared(flags in user_flags()) {
            let perm = duplicate_perm(flags);
            if perm.contains(PteFlags::WRITABLE) {
                prop_assert!(perm.contains(PteFlags::SHARE));
            }
        }

        #[test]
        fn prop_cow_iff_mutable_and_not_shared(flags in user_flags()) {
            let mutable = flags.intersects(PteFlags::WRITABLE | PteFlags::COW);
            let shared = flags.contains(PteFlags::SHARE);
            prop_assert_eq!(duplicate_perm(flags).contains(PteFlags::COW), mutable && !shared);
        }

        #[test]
        fn prop_stable_across_generations(flags in user_flags()) {
            let child = duplicate_perm(flags);
            prop_assert_eq!(duplicate_perm(child), child);
        }

        #[test]
        fn prop_preserves_free_avail_bit(flags in user_flags()) {
            prop_assert_eq!(
                duplicate_perm(flags).contains(AVAIL_FREE),
                flags.contains(AVAIL_FREE)
            );
        }
    }
}
