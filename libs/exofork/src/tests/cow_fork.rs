// libs/exofork/src/tests/cow_fork.rs
//! Partage COW, isolation des écritures et contenu après fork

use exofork_types::{EnvStatus, PteFlags, VirtAddr, PGSIZE};

use super::{boot, fork_parent, run_child, DATA, RODATA, TEXT};
use crate::pageref::pageref;

#[test]
fn test_aaaa_bbbb_scenario() {
    let (kernel, parent) = boot();
    parent.write(DATA, b"AAAA").unwrap();

    let child = fork_parent(&parent);
    assert_eq!(pageref(&parent, DATA), 2);

    let child = run_child(&kernel, child);
    child.write(DATA, b"BBBB").unwrap();

    assert_eq!(pageref(&child, DATA), 1);
    assert_eq!(pageref(&parent, DATA), 1);
    assert_eq!(parent.read_vec(DATA, 4).unwrap(), b"AAAA");
    assert_eq!(child.read_vec(DATA, 4).unwrap(), b"BBBB");
}

#[test]
fn test_share_count_grows_by_one() {
    let (kernel, parent) = boot();
    let uxstack = kernel.layout().uxstack_page();

    let before: Vec<_> = kernel
        .mapped_pages(parent.id())
        .into_iter()
        .map(|(va, pte)| (va, pte.ppn(), kernel.share_count(pte.ppn())))
        .collect();

    let child = fork_parent(&parent);

    for (va, ppn, count) in before {
        assert_eq!(kernel.share_count(ppn), count + 1, "page {}", va);
        assert_eq!(kernel.pte(parent.id(), va).ppn(), ppn);
        assert_eq!(kernel.pte(child, va).ppn(), ppn);
    }
    assert_ne!(
        kernel.pte(parent.id(), uxstack).ppn(),
        kernel.pte(child, uxstack).ppn()
    );
}

#[test]
fn test_writable_pages_marked_cow_on_both_sides() {
    let (kernel, parent) = boot();
    let child = fork_parent(&parent);

    for env in [parent.id(), child] {
        for va in [TEXT, DATA, kernel.layout().ustack_page()] {
            let pte = kernel.pte(env, va);
            assert!(pte.is_cow(), "{} in {}", va, env);
            assert!(!pte.is_writable(), "{} in {}", va, env);
        }
    }
}

#[test]
fn test_parent_write_is_invisible_to_child() {
    let (kernel, parent) = boot();
    parent.write(DATA, b"before").unwrap();

    let child = fork_parent(&parent);
    parent.write(DATA, b"after!").unwrap();

    let child = run_child(&kernel, child);
    assert_eq!(child.read_vec(DATA, 6).unwrap(), b"before");
    assert_eq!(parent.read_vec(DATA, 6).unwrap(), b"after!");
}

#[test]
fn test_fault_taken_once_per_page() {
    let (kernel, parent) = boot();
    let child = run_child(&kernel, fork_parent(&parent));

    child.write(DATA, b"one").unwrap();
    assert_eq!(kernel.fault_count(child.id()), 1);
    let pte = kernel.pte(child.id(), DATA);
    assert!(pte.is_writable());
    assert!(!pte.is_cow());

    child.write(DATA.offset(8), b"two").unwrap();
    assert_eq!(kernel.fault_count(child.id()), 1);

    // PFTEMP est libéré après chaque résolution
    assert!(!kernel.pte(child.id(), kernel.layout().pftemp).is_present());
}

#[test]
fn test_last_sharer_still_copies() {
    let (kernel, parent) = boot();
    let child = run_child(&kernel, fork_parent(&parent));

    child.write(DATA, b"x").unwrap();
    assert_eq!(pageref(&parent, DATA), 1);

    // Toujours COW chez le parent : la faute suivante copie même sans partage
    parent.write(DATA, b"y").unwrap();
    assert_eq!(kernel.fault_count(parent.id()), 1);
    assert!(kernel.pte(parent.id(), DATA).is_writable());
}

#[test]
fn test_exception_stacks_are_private() {
    let (kernel, parent) = boot();
    let child = fork_parent(&parent);
    let uxstack = kernel.layout().uxstack_page();

    let mine = kernel.pte(parent.id(), uxstack);
    let theirs = kernel.pte(child, uxstack);
    assert_ne!(mine.ppn(), theirs.ppn());
    for pte in [mine, theirs] {
        assert_eq!(kernel.share_count(pte.ppn()), 1);
        assert!(pte.is_writable());
        assert!(!pte.is_cow());
    }
}

#[test]
fn test_content_survives_fork() {
    let (kernel, parent) = boot();
    let pattern: Vec<u8> = (0..PGSIZE).map(|i| (i % 251) as u8).collect();
    // Écriture à cheval sur TEXT et DATA
    parent.write(TEXT.offset(PGSIZE as u32 / 2), &pattern).unwrap();

    let child = run_child(&kernel, fork_parent(&parent));
    assert_eq!(
        child.read_vec(TEXT.offset(PGSIZE as u32 / 2), PGSIZE).unwrap(),
        pattern
    );
    assert_eq!(child.read_vec(RODATA, 5).unwrap(), b"const");
    assert_eq!(kernel.fault_count(child.id()), 0);
}

#[test]
fn test_read_only_pages_not_cow() {
    let (kernel, parent) = boot();
    let child = fork_parent(&parent);

    let mine = kernel.pte(parent.id(), RODATA);
    let theirs = kernel.pte(child, RODATA);
    assert_eq!(mine.ppn(), theirs.ppn());
    for pte in [mine, theirs] {
        assert!(!pte.is_cow());
        assert!(!pte.is_writable());
        assert!(pte.is_user());
    }
}

#[test]
fn test_shared_pages_pass_through() {
    let (kernel, parent) = boot();
    let shm = VirtAddr::new(0x0a00_0000);
    parent
        .alloc_pages(shm, 1, PteFlags::USER_RW | PteFlags::SHARE)
        .unwrap();

    let child = run_child(&kernel, fork_parent(&parent));
    let pte = kernel.pte(child.id(), shm);
    assert!(pte.flags().contains(PteFlags::SHARE));
    assert!(pte.is_writable());

    child.write(shm, b"hello").unwrap();
    assert_eq!(parent.read_vec(shm, 5).unwrap(), b"hello");
    assert_eq!(kernel.fault_count(child.id()), 0);
    assert_eq!(pageref(&parent, shm), 2);
}

#[test]
fn test_grandchild_sees_cow_transitively() {
    let (kernel, parent) = boot();
    parent.write(DATA, b"gen0").unwrap();

    let child = run_child(&kernel, fork_parent(&parent));
    // L'enfant possède sa propre copie de la pile avant de forker
    let ustack = kernel.layout().ustack_page();
    child.write(ustack, b"mine").unwrap();
    assert!(kernel.pte(child.id(), ustack).is_writable());

    let grandchild = fork_parent(&child);
    assert_eq!(kernel.parent(grandchild), Some(child.id()));
    assert_eq!(pageref(&parent, DATA), 3);
    // Une page redevenue exclusive est de nouveau marquée COW
    assert!(kernel.pte(child.id(), ustack).is_cow());
    assert!(kernel.pte(grandchild, ustack).is_cow());

    let grandchild = run_child(&kernel, grandchild);
    grandchild.write(DATA, b"gen2").unwrap();
    assert_eq!(pageref(&parent, DATA), 2);
    assert_eq!(parent.read_vec(DATA, 4).unwrap(), b"gen0");
    assert_eq!(child.read_vec(DATA, 4).unwrap(), b"gen0");
    assert_eq!(grandchild.read_vec(ustack, 4).unwrap(), b"mine");
}

#[test]
fn test_exit_releases_frames() {
    let (kernel, parent) = boot();
    let frames = kernel.frames_in_use();

    let child = run_child(&kernel, fork_parent(&parent));
    child.write(DATA, b"copy").unwrap();
    child.exit();

    assert_eq!(kernel.status(child.id()), Some(EnvStatus::Dying));
    // Seule la pile d'exception du parent reste en plus
    assert_eq!(kernel.frames_in_use(), frames + 1);
    assert_eq!(pageref(&parent, DATA), 1);
}
