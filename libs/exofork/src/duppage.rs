// libs/exofork/src/duppage.rs
//! Duplication de l'espace d'adressage vers un enfant.

use exofork_types::{EnvId, VirtAddr, NPTENTRIES, PTSIZE, PTSHIFT};

use crate::error::{ForkError, ForkResult};
use crate::policy::duplicate_perm;
use crate::syscall::{Level, Syscalls};

/// Mappe notre page virtuelle `pn` dans `envid` à la même adresse.
///
/// L'enfant est mappé en premier : si cet appel échoue, le mapping du parent
/// n'a pas encore été touché. Si le remapping du parent échoue ensuite, la
/// copie de l'enfant est retirée avant de propager l'erreur.
pub fn duppage<S: Syscalls + ?Sized>(sys: &S, envid: EnvId, pn: usize) -> ForkResult<()> {
    let va = VirtAddr::from_page_number(pn);
    if !sys.layout().is_user(va) {
        return Err(ForkError::AboveUtop { va });
    }

    let me = sys.this_env().get()?;
    let pte = sys.entry_at(Level::Table, pn);
    let perm = duplicate_perm(pte.flags());

    sys.page_map(me, va, envid, va, perm)
        .map_err(ForkError::syscall("page_map(child)"))?;

    if let Err(err) = sys.page_map(me, va, me, va, perm) {
        if let Err(unmap_err) = sys.page_unmap(envid, va) {
            log::warn!("duppage: rollback of {} in {} failed: {}", va, envid, unmap_err);
        }
        return Err(ForkError::Syscall { call: "page_map(self)", err });
    }

    log::trace!("duppage: {} -> {} perm {:?}", va, envid, perm);
    Ok(())
}

/// Duplique chaque page présente et utilisateur sous `UTOP` vers `child`,
/// sauf la page de pile d'exception. Retourne le nombre de pages dupliquées.
///
/// Les répertoires puis les entrées sont parcourus dans l'ordre croissant des
/// adresses ; la première erreur interrompt le parcours.
pub fn duplicate_address_space<S: Syscalls + ?Sized>(sys: &S, child: EnvId) -> ForkResult<usize> {
    let layout = sys.layout();
    let uxstack_pn = layout.uxstack_page().page_number();
    let dir_end = (layout.utop.as_u32() as usize + PTSIZE - 1) >> PTSHIFT;

    let mut duplicated = 0;
    for pdx in 0..dir_end {
        if !sys.entry_at(Level::Directory, pdx).is_present() {
            continue;
        }

        for ptx in 0..NPTENTRIES {
            let pn = pdx * NPTENTRIES + ptx;
            if !layout.is_user(VirtAddr::from_page_number(pn)) {
                break;
            }
            if pn == uxstack_pn {
                continue;
            }

            let pte = sys.entry_at(Level::Table, pn);
            if pte.is_present() && pte.is_user() {
                duppage(sys, child, pn)?;
                duplicated += 1;
            }
        }
    }

    Ok(duplicated)
}
