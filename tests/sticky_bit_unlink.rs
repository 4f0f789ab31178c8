//! Scenario: a world-writable sticky directory only lets its owner or a
//! file's own creator unlink that file (SPEC_FULL.md §8 scenario 3, §7
//! Policies).

mod common;

use gxvfs::dentry::UnlinkFlags;
use gxvfs::error::Error;
use gxvfs::inode::{FileType, Mode};

use common::Harness;

#[test]
fn only_owner_or_creator_may_unlink_under_sticky_tmp() {
    let h = Harness::new(64);
    let root = h.fs.root_inode().expect("root inode");

    const TMP_OWNER: u32 = 100;
    const CREATOR: u32 = 200;
    const BYSTANDER: u32 = 300;

    let tmp = h
        .driver
        .create_entry(&h.fs, &root, "tmp", FileType::Directory, Mode::masked(0o1777), TMP_OWNER, TMP_OWNER)
        .expect("mkdir /tmp");
    assert!(tmp.mode().contains(Mode::STICKY));

    h.driver
        .create_entry(&h.fs, &tmp, "f", FileType::RegularFile, Mode::masked(0o644), CREATOR, CREATOR)
        .expect("create /tmp/f");

    let err = h
        .driver
        .remove_entry(&tmp, "f", UnlinkFlags::empty(), BYSTANDER, false)
        .expect_err("bystander must not be able to unlink");
    assert!(matches!(err, Error::Access));

    h.driver
        .remove_entry(&tmp, "f", UnlinkFlags::empty(), CREATOR, false)
        .expect("creator may unlink their own file");

    assert!(tmp.children.lock().find_by_name("f").is_none());
}
