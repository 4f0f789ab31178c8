//! Scenario: a chain of symlinks that loops back on itself is rejected with
//! `loop` once the depth bound is exceeded, not followed forever
//! (SPEC_FULL.md §8 scenario 4).

mod common;

use gxvfs::error::Error;
use gxvfs::inode::{FileType, Mode};
use gxvfs::resolver;

use common::Harness;

#[test]
fn open_through_a_symlink_cycle_fails_with_loop() {
    let h = Harness::new(64);
    let ctx = h.ctx(0, 0, true);
    let root = h.fs.root_inode().expect("root inode");

    // a -> b -> c -> ... -> i -> a, nine links in a ring.
    let names: Vec<String> = "abcdefghi".chars().map(|c| c.to_string()).collect();
    for (i, name) in names.iter().enumerate() {
        let target = &names[(i + 1) % names.len()];
        let link = h
            .driver
            .create_entry(&h.fs, &root, name, FileType::Symlink, Mode::masked(0o777), 0, 0)
            .unwrap_or_else(|_| panic!("create symlink {name}"));
        link.set_symlink_target(format!("/{target}"));
    }

    let err = resolver::resolve(&ctx, None, "/a", false).expect_err("cycle must not resolve");
    assert!(matches!(err, Error::Loop), "expected Loop, got {err:?}");
}

#[test]
fn opening_a_plain_symlink_follows_through_to_its_target() {
    let h = Harness::new(64);
    let ctx = h.ctx(0, 0, true);
    let root = h.fs.root_inode().expect("root inode");

    h.driver
        .create_entry(&h.fs, &root, "real", FileType::RegularFile, Mode::masked(0o644), 0, 0)
        .expect("create real");
    let link = h
        .driver
        .create_entry(&h.fs, &root, "link", FileType::Symlink, Mode::masked(0o777), 0, 0)
        .expect("create link");
    link.set_symlink_target("/real".to_string());

    let dentry_ref = resolver::resolve(&ctx, None, "/link", false).expect("resolve through symlink");
    let inode_ref = resolver::dentry_ref_to_inode_ref(&dentry_ref).expect("inode ref");
    assert_eq!(inode_ref.inode.ftype, FileType::RegularFile);
}

#[test]
fn a_symlink_as_a_non_final_component_redirects_the_rest_of_the_path() {
    let h = Harness::new(64);
    let ctx = h.ctx(0, 0, true);
    let root = h.fs.root_inode().expect("root inode");

    let realdir = h
        .driver
        .create_entry(&h.fs, &root, "realdir", FileType::Directory, Mode::masked(0o755), 0, 0)
        .expect("create realdir");
    h.driver
        .create_entry(&h.fs, &realdir, "file.txt", FileType::RegularFile, Mode::masked(0o644), 0, 0)
        .expect("create realdir/file.txt");

    let link = h
        .driver
        .create_entry(&h.fs, &root, "a", FileType::Symlink, Mode::masked(0o777), 0, 0)
        .expect("create a");
    link.set_symlink_target("/realdir".to_string());

    let dentry_ref = resolver::resolve(&ctx, None, "/a/file.txt", false).expect("resolve through intermediate symlink");
    let inode_ref = resolver::dentry_ref_to_inode_ref(&dentry_ref).expect("inode ref");
    assert_eq!(inode_ref.inode.ftype, FileType::RegularFile);
    assert!(std::sync::Arc::ptr_eq(&dentry_ref.dentry.dir.upgrade().unwrap(), &realdir));
}
