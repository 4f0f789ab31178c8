//! Scenario: unmounting a filesystem with an open file on it fails `busy`;
//! once every reference drains, a retry succeeds (SPEC_FULL.md §8
//! scenario 5, §4.3 unmount).

mod common;

use gxvfs::block::{BlockDevice, MemDisk};
use gxvfs::file::OpenFlags;
use gxvfs::gxfs;
use gxvfs::inode::{FileType, Mode};
use gxvfs::mount::MountFlags;
use gxvfs::resolver;
use std::sync::Arc;

use common::Harness;

#[test]
fn unmount_refuses_while_a_file_is_open_then_succeeds_once_closed() {
    let h = Harness::new(64);
    let ctx = h.ctx(0, 0, true);

    let dev: Arc<dyn BlockDevice> = Arc::new(MemDisk::zeroed_blocks(64 + 1024));
    let (mounted_fs, mounted_driver) =
        gxfs::format(9, dev, 64, [1u8; 16], 1_700_000_001, Mode::masked(0o755)).expect("format second gxfs");
    let mounted_root = mounted_fs.root_inode().expect("mounted root");
    mounted_driver
        .create_entry(&mounted_fs, &mounted_root, "file", FileType::RegularFile, Mode::masked(0o644), 0, 0)
        .expect("create /file on mounted fs");

    let dentry_ref = resolver::resolve(&ctx, None, "/mnt", true).expect("placeholder for /mnt");
    h.mounts
        .mount(&dentry_ref.dentry, mounted_fs.clone(), MountFlags::empty())
        .expect("attach mount");

    let fd = common::open_path(&ctx, "/mnt/file", OpenFlags::RDWR, 1).expect("open /mnt/file");

    let err = h.mounts.unmount(&dentry_ref.dentry).expect_err("must be busy while open");
    assert!(matches!(err, gxvfs::error::Error::Busy));

    fd.close().expect("close");
    drop(fd);

    h.mounts.unmount(&dentry_ref.dentry).expect("unmount succeeds once quiescent");
}
