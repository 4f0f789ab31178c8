//! Scenario: mounting a filesystem onto a directory makes path resolution
//! cross into it, and `..` at the mounted root comes back out to the
//! mounting filesystem's identity, not the mounted filesystem's own root
//! (SPEC_FULL.md §8 scenario 2).

mod common;

use std::sync::Arc;

use gxvfs::file::OpenFlags;
use gxvfs::iso9660::{self, IsofsOptions};
use gxvfs::mount::MountFlags;
use gxvfs::resolver;

use common::{make_iso_disk, Harness};

/// Resolves `/mnt` as a fresh `TEMP` placeholder (`bind` refuses an already
/// linked target, SPEC_FULL.md §4.3) and attaches the given filesystem to it.
fn mount_iso_at_mnt(h: &Harness, id: u64) {
    let dentry_ref = resolver::resolve(&h.ctx(0, 0, true), None, "/mnt", true).expect("placeholder for /mnt");
    let (iso_fs, _driver) = iso9660::mount(id, make_iso_disk(), IsofsOptions::default()).expect("mount iso image");
    h.mounts.mount(&dentry_ref.dentry, iso_fs, MountFlags::RDONLY).expect("attach iso mount");
}

#[test]
fn open_through_a_mountpoint_reaches_the_mounted_filesystem() {
    let h = Harness::new(64);
    let ctx = h.ctx(0, 0, true);
    mount_iso_at_mnt(&h, 2);

    // Rock-Ridge-free image: names fall back to case-folded, version-stripped
    // ISO9660 base names ("BOOT" -> "boot", "README;1" -> "readme").
    let fd = common::open_path(&ctx, "/mnt/boot/readme", OpenFlags::RDONLY, 1).expect("open through mount");
    let mut buf = [0u8; 64];
    let n = fd.read(&mut buf).expect("read readme");
    assert_eq!(&buf[..n], common::ISO_README_CONTENTS);
    fd.close().expect("close");
}

#[test]
fn dotdot_at_a_mounted_root_returns_to_the_mounting_filesystem() {
    let h = Harness::new(64);
    let ctx = h.ctx(0, 0, true);
    let root = h.fs.root_inode().expect("root inode");
    mount_iso_at_mnt(&h, 2);

    let dentry_ref = resolver::resolve(&ctx, None, "/mnt/..", false).expect("resolve /mnt/..");
    let inode_ref = resolver::dentry_ref_to_inode_ref(&dentry_ref).expect("inode ref");

    // Must be the gxfs root, not the iso9660 root (both happen to be
    // directories, so identity is what distinguishes them).
    assert!(Arc::ptr_eq(&inode_ref.inode, &root));
    assert!(dentry_ref.mounts.is_empty());
}
