// libs/exofork/src/pgfault.rs
//! Résolution des fautes copy-on-write.

use exofork_types::{EnvId, PteFlags};

use crate::error::{ForkError, ForkResult};
use crate::syscall::{PgfaultHandler, Syscalls, UTrapframe};

/// Handler de faute de page : si la page fautive est copy-on-write, la
/// remplace par une copie privée inscriptible.
///
/// Étapes : allocation d'une page en `PFTEMP`, copie du contenu, remapping à
/// l'adresse fautive (remplacement atomique), puis retrait de `PFTEMP`.
///
/// L'identifiant utilisé est toujours relu via `getenvid()` : une faute peut
/// survenir dans l'enfant avant que `ThisEnv` n'y ait été rafraîchi.
pub fn pgfault(sys: &dyn Syscalls, utf: &UTrapframe) -> ForkResult<()> {
    let va = utf.fault_va;

    if !utf.is_write() {
        return Err(ForkError::ReadFault { va });
    }

    let pte = sys.walk(va).unwrap_or_default();
    if !pte.is_cow() {
        return Err(ForkError::NotCopyOnWrite { va, pte });
    }

    let page = va.round_down();
    let pftemp = sys.layout().pftemp;
    let envid = sys.getenvid();

    sys.page_alloc(envid, pftemp, PteFlags::USER_RW)
        .map_err(ForkError::syscall("page_alloc(PFTEMP)"))?;
    sys.copy_page(pftemp, page)
        .map_err(ForkError::syscall("copy_page"))?;
    sys.page_map(envid, pftemp, envid, page, PteFlags::USER_RW)
        .map_err(ForkError::syscall("page_map(PFTEMP)"))?;
    sys.page_unmap(envid, pftemp)
        .map_err(ForkError::syscall("page_unmap(PFTEMP)"))?;

    log::trace!("[{}] pgfault: private copy of {}", envid, page);
    Ok(())
}

/// Installe `handler` pour l'appelant.
///
/// Au premier appel, la page de pile d'exception de l'appelant est allouée ;
/// les appels suivants se contentent de réinstaller le handler.
pub fn set_pgfault_handler<S: Syscalls + ?Sized>(sys: &S, handler: PgfaultHandler) -> ForkResult<()> {
    let uxstack = sys.layout().uxstack_page();
    if sys.walk(uxstack).is_none() {
        sys.page_alloc(EnvId::SELF, uxstack, PteFlags::USER_RW)
            .map_err(ForkError::syscall("page_alloc(UXSTACK)"))?;
        log::debug!("[{}] exception stack allocated at {}", sys.getenvid(), uxstack);
    }

    sys.env_set_pgfault_upcall(EnvId::SELF, handler)
        .map_err(ForkError::syscall("env_set_pgfault_upcall"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimKernel;
    use crate::syscall::FEC_WR;
    use exofork_types::VirtAddr;

    #[test]
    fn test_handler_install_allocates_stack_once() {
        let kernel = SimKernel::default();
        let env = kernel.spawn().unwrap();
        let uxstack = env.layout().uxstack_page();

        set_pgfault_handler(&env, pgfault).unwrap();
        let first = kernel.pte(env.id(), uxstack);
        assert!(first.is_writable());

        set_pgfault_handler(&env, pgfault).unwrap();
        assert_eq!(kernel.pte(env.id(), uxstack), first);
        assert_eq!(kernel.frames_in_use(), 1);
    }

    #[test]
    fn test_write_to_unmapped_page_rejected() {
        let kernel = SimKernel::default();
        let env = kernel.spawn().unwrap();
        let va = VirtAddr::new(0x0080_0010);
        let utf = UTrapframe { fault_va: va, err: FEC_WR, eip: 0, esp: 0 };

        let err = pgfault(&env, &utf).unwrap_err();
        assert!(matches!(err, ForkError::NotCopyOnWrite { pte, .. } if !pte.is_present()));
        assert_eq!(kernel.frames_in_use(), 0);
    }
}
