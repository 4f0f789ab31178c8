//! Shared fixtures for the integration tests: a fresh GXFS image, a
//! hand-built ISO9660 image, and small glue around resolving a path all the
//! way to an open file description (the syscall glue layer this crate
//! doesn't implement, SPEC_FULL.md §1).

#![allow(dead_code)]

use std::sync::Arc;

use gxvfs::block::{BlockDevice, MemDisk};
use gxvfs::error::Result;
use gxvfs::file::{FileDescription, OpenFlags};
use gxvfs::filesystem::FileSystem;
use gxvfs::gxfs::{self, GxfsDriver};
use gxvfs::inode::Mode;
use gxvfs::mount::{InodeRef, MountTable};
use gxvfs::resolver::{self, ResolveContext};

/// Formats a fresh GXFS image on an in-memory disk with `total_blocks`
/// 4 KiB blocks of usable space.
pub fn format_gxfs(total_blocks: u64) -> (Arc<FileSystem>, Arc<GxfsDriver>) {
    let dev: Arc<dyn BlockDevice> = Arc::new(MemDisk::zeroed_blocks(total_blocks + 1024));
    gxfs::format(1, dev, total_blocks, [0u8; 16], 1_700_000_000, Mode::masked(0o755)).expect("format gxfs")
}

/// A convenience bundle used as the ambient identity/context every resolve
/// call in a test needs.
pub struct Harness {
    pub fs: Arc<FileSystem>,
    pub driver: Arc<GxfsDriver>,
    pub root_ref: InodeRef,
    pub mounts: MountTable,
}

impl Harness {
    pub fn new(total_blocks: u64) -> Self {
        let (fs, driver) = format_gxfs(total_blocks);
        let root = fs.root_inode().expect("root inode");
        let root_ref = InodeRef::root(root);
        Self {
            fs,
            driver,
            root_ref,
            mounts: MountTable::new(),
        }
    }

    pub fn ctx(&self, uid: u32, gid: u32, root_equivalent: bool) -> ResolveContext<'_> {
        ResolveContext {
            process_root: &self.root_ref,
            cwd: &self.root_ref,
            uid,
            gid,
            root_equivalent,
            mounts: &self.mounts,
        }
    }
}

/// Resolves `path`, converts the result to an [`InodeRef`], and wraps it in
/// an open [`FileDescription`] — the composition a syscall-level `open`
/// would perform on top of this crate (SPEC_FULL.md §2 Data flow).
pub fn open_path(ctx: &ResolveContext, path: &str, flags: OpenFlags, pid: u64) -> Result<Arc<FileDescription>> {
    let dentry_ref = resolver::resolve(ctx, None, path, false)?;
    let inode_ref = resolver::dentry_ref_to_inode_ref(&dentry_ref)?;
    Ok(FileDescription::new(inode_ref, flags, pid))
}

fn dirent_record(start_lba: u32, file_size: u32, flags: u8, name: &[u8]) -> Vec<u8> {
    let record_len = 33 + name.len();
    let mut buf = vec![0u8; record_len];
    buf[0] = record_len as u8;
    buf[2..6].copy_from_slice(&start_lba.to_le_bytes());
    buf[10..14].copy_from_slice(&file_size.to_le_bytes());
    buf[25] = flags;
    buf[32] = name.len() as u8;
    buf[33..33 + name.len()].copy_from_slice(name);
    buf
}

pub const ISO_SECTOR_SIZE: usize = 2048;
pub const ISO_ROOT_LBA: u32 = 17;
pub const ISO_BOOT_LBA: u32 = 18;
pub const ISO_README_LBA: u32 = 19;
pub const ISO_README_CONTENTS: &[u8] = b"boot readme contents\n";
pub const ISO_IMAGE_SECTORS: u32 = 20;

/// Hand-builds a minimal, Rock-Ridge-free ISO9660 image:
///
/// ```text
/// LBA 16  Primary Volume Descriptor
/// LBA 17  root directory (".", "..", "BOOT")
/// LBA 18  BOOT directory (".", "..", "README;1")
/// LBA 19  README;1 contents
/// ```
///
/// No Rock Ridge `SP`/`NM` records are present, so the driver falls back to
/// ISO9660 base names, case-folded to lowercase (SPEC_FULL.md §4.6A).
pub fn build_iso_image() -> Vec<u8> {
    const FLAG_DIR: u8 = 0x02;
    const FLAG_FILE: u8 = 0x00;

    let readme = dirent_record(ISO_README_LBA, ISO_README_CONTENTS.len() as u32, FLAG_FILE, b"README;1");
    let boot_size = (34 + 34 + readme.len()) as u32;
    let root_size = (34 + 34 + 37) as u32; // self + parent + "BOOT" (4-byte name)

    let boot_self = dirent_record(ISO_BOOT_LBA, boot_size, FLAG_DIR, &[0x00]);
    let boot_parent = dirent_record(ISO_ROOT_LBA, root_size, FLAG_DIR, &[0x01]);
    let mut boot_extent = Vec::new();
    boot_extent.extend_from_slice(&boot_self);
    boot_extent.extend_from_slice(&boot_parent);
    boot_extent.extend_from_slice(&readme);
    assert_eq!(boot_extent.len() as u32, boot_size);

    let root_self = dirent_record(ISO_ROOT_LBA, root_size, FLAG_DIR, &[0x00]);
    let root_parent = dirent_record(ISO_ROOT_LBA, root_size, FLAG_DIR, &[0x01]);
    let root_boot = dirent_record(ISO_BOOT_LBA, boot_size, FLAG_DIR, b"BOOT");
    let mut root_extent = Vec::new();
    root_extent.extend_from_slice(&root_self);
    root_extent.extend_from_slice(&root_parent);
    root_extent.extend_from_slice(&root_boot);
    assert_eq!(root_extent.len() as u32, root_size);

    let mut image = vec![0u8; ISO_IMAGE_SECTORS as usize * ISO_SECTOR_SIZE];

    let pvd_off = 16 * ISO_SECTOR_SIZE;
    image[pvd_off] = 1;
    image[pvd_off + 1..pvd_off + 6].copy_from_slice(b"CD001");
    image[pvd_off + 80..pvd_off + 84].copy_from_slice(&ISO_IMAGE_SECTORS.to_le_bytes());
    image[pvd_off + 128..pvd_off + 130].copy_from_slice(&(ISO_SECTOR_SIZE as u16).to_le_bytes());
    image[pvd_off + 156..pvd_off + 190].copy_from_slice(&root_self);

    let root_off = ISO_ROOT_LBA as usize * ISO_SECTOR_SIZE;
    image[root_off..root_off + root_extent.len()].copy_from_slice(&root_extent);

    let boot_off = ISO_BOOT_LBA as usize * ISO_SECTOR_SIZE;
    image[boot_off..boot_off + boot_extent.len()].copy_from_slice(&boot_extent);

    let content_off = ISO_README_LBA as usize * ISO_SECTOR_SIZE;
    image[content_off..content_off + ISO_README_CONTENTS.len()].copy_from_slice(ISO_README_CONTENTS);

    image
}

pub fn make_iso_disk() -> Arc<dyn BlockDevice> {
    let image = build_iso_image();
    let dev = MemDisk::new(image.len());
    dev.write_at(0, &image).expect("seed iso image");
    Arc::new(dev)
}
