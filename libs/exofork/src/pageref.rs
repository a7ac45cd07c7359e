// libs/exofork/src/pageref.rs
use exofork_types::VirtAddr;

use crate::syscall::PageTableView;

/// Nombre d'espaces d'adressage qui partagent la page physique derrière `va`.
///
/// Retourne 0 si `va` n'est mappée à aucun des deux niveaux.
pub fn pageref<V: PageTableView + ?Sized>(view: &V, va: VirtAddr) -> u32 {
    match view.walk(va) {
        Some(pte) => view.page_ref(pte.ppn()),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimKernel;
    use crate::syscall::Syscalls;
    use exofork_types::PteFlags;

    #[test]
    fn test_unmapped_is_zero() {
        let kernel = SimKernel::default();
        let env = kernel.spawn().unwrap();
        assert_eq!(pageref(&env, VirtAddr::new(0x0080_0000)), 0);
        // Répertoire présent, entrée absente
        env.alloc_pages(VirtAddr::new(0x0080_0000), 1, PteFlags::USER_RW).unwrap();
        assert_eq!(pageref(&env, VirtAddr::new(0x0080_1000)), 0);
    }

    #[test]
    fn test_counts_every_mapping() {
        let kernel = SimKernel::default();
        let env = kernel.spawn().unwrap();
        let va = VirtAddr::new(0x0080_0000);
        env.alloc_pages(va, 1, PteFlags::USER_RW).unwrap();
        assert_eq!(pageref(&env, va.offset(0x123)), 1);

        let alias = VirtAddr::new(0x0100_0000);
        env.page_map(env.id(), va, env.id(), alias, PteFlags::USER_RO).unwrap();
        assert_eq!(pageref(&env, va), 2);
        assert_eq!(pageref(&env, alias), 2);
    }
}
