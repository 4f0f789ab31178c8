//! ISO9660 with Rock Ridge extensions: a read-only driver (SPEC_FULL.md
//! §4.6, §4.6A; grounded on `original_source/modules/isofs/isofs.h`'s
//! `Isofs`/`IsofsOptions`).
//!
//! An inode number is the starting LBA of its extent: directories and files
//! alike occupy one contiguous run of sectors on ISO9660, so the LBA
//! uniquely identifies the object within one volume (SPEC_FULL.md §9
//! "inode-number-as-byte-offset scheme"). Directory scanning discovers a
//! child's size and type as a side effect of reading its parent, so those
//! are cached in `meta` the first time they're seen, ahead of the child's
//! own `load_inode` call.

pub mod dirent;
pub mod pvd;
pub mod rockridge;

use std::collections::HashMap;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::block::BlockDevice;
use crate::dentry::DentryFlags;
use crate::error::{Error, Result};
use crate::filesystem::{FileSystem, FileSystemDriver, FsFlags};
use crate::inode::{FileType, Inode, InodeDriverHooks, InodeNumber, Mode};

use self::dirent::{scan_directory, DirentHeader};
use self::pvd::{PrimaryVolumeDescriptor, PVD_SECTOR, SECTOR_SIZE};

bitflags! {
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct IsofsFlags: u32 {
        /// Ignore Rock Ridge `NM` names even if a Rock Ridge `SP` signature
        /// is present (`original_source`'s `ISOFS_MNT_NORRNAME`).
        const NO_ROCK_RIDGE_NAMES = 1 << 0;
    }
}

/// Mount-time options (SPEC_FULL.md §4.6; `IsofsOptions` in
/// `original_source`).
#[derive(Clone, Copy)]
pub struct IsofsOptions {
    pub flags: IsofsFlags,
    pub uid: u32,
    pub gid: u32,
    pub mode: Mode,
    pub ixperm: u64,
    pub oxperm: u64,
    pub dxperm: u64,
}

impl Default for IsofsOptions {
    fn default() -> Self {
        Self {
            flags: IsofsFlags::empty(),
            uid: 0,
            gid: 0,
            mode: Mode::masked(0o755),
            ixperm: 0,
            oxperm: u64::MAX,
            dxperm: u64::MAX,
        }
    }
}

#[derive(Clone, Copy)]
struct ChildMeta {
    size: u32,
    is_directory: bool,
}

struct IsoInodeHooks {
    dev: Arc<dyn BlockDevice>,
    sector_size: u64,
}

impl InodeDriverHooks for IsoInodeHooks {
    fn pread(&self, inode: &Inode, buf: &mut [u8], offset: u64) -> Option<Result<usize>> {
        let size = inode.size();
        if offset >= size {
            return Some(Ok(0));
        }
        let want = buf.len().min((size - offset) as usize);
        let base = inode.ino() * self.sector_size + offset;
        Some(self.dev.read_at(base, &mut buf[..want]).map(|_| want).map_err(Error::from))
    }

    fn pwrite(&self, _inode: &Inode, _buf: &[u8], _offset: u64) -> Option<Result<usize>> {
        Some(Err(Error::ReadOnly))
    }
}

/// The ISO9660 driver instance for one mounted image.
pub struct IsoDriver {
    dev: Arc<dyn BlockDevice>,
    hooks: Arc<IsoInodeHooks>,
    opt: IsofsOptions,
    sector_size: u64,
    rock_ridge_bskip: Option<u8>,
    root_ino: InodeNumber,
    meta: Mutex<HashMap<InodeNumber, ChildMeta>>,
}

impl IsoDriver {
    fn register(&self, ino: InodeNumber, size: u32, is_directory: bool) {
        self.meta.lock().insert(ino, ChildMeta { size, is_directory });
    }

    fn read_extent(&self, lba: u64, size: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; size as usize];
        self.dev.read_at(lba * self.sector_size, &mut buf).map_err(Error::from)?;
        Ok(buf)
    }
}

impl FileSystemDriver for IsoDriver {
    fn load_inode(&self, fs: &Arc<FileSystem>, ino: InodeNumber) -> Result<Arc<Inode>> {
        let meta = *self
            .meta
            .lock()
            .get(&ino)
            .ok_or(Error::Corrupted("isofs: inode referenced before its parent directory was scanned"))?;

        let ftype = if meta.is_directory { FileType::Directory } else { FileType::RegularFile };
        let inode = Inode::new(
            Arc::downgrade(fs),
            ino,
            ftype,
            self.opt.mode,
            self.opt.uid,
            self.opt.gid,
            self.hooks.clone(),
        );
        inode.set_size(meta.size as u64);
        inode.set_xperm(self.opt.ixperm, self.opt.oxperm, self.opt.dxperm);
        inode.clear_dirty();

        if meta.is_directory {
            let bytes = self.read_extent(ino, meta.size as u64)?;
            let entries = scan_directory(&bytes, self.rock_ridge_bskip, true)?;
            let mut children = inode.children.lock();
            for e in entries {
                self.register(e.lba as u64, e.size, e.is_directory);
                children.insert(&inode, e.name, e.lba as u64, DentryFlags::empty())?;
            }
        }
        Ok(inode)
    }

    fn reg_inode(&self, _fs: &Arc<FileSystem>, _inode: &Arc<Inode>) -> Result<InodeNumber> {
        Err(Error::ReadOnly)
    }

    fn root_ino(&self) -> InodeNumber {
        self.root_ino
    }
}

/// Mounts a read-only ISO9660 (optionally Rock Ridge) image.
pub fn mount(id: u64, dev: Arc<dyn BlockDevice>, opt: IsofsOptions) -> Result<(Arc<FileSystem>, Arc<IsoDriver>)> {
    let mut pvd_sector = vec![0u8; SECTOR_SIZE];
    dev.read_at(PVD_SECTOR * SECTOR_SIZE as u64, &mut pvd_sector).map_err(Error::from)?;
    let pvd = PrimaryVolumeDescriptor::decode(&pvd_sector)?;
    let sector_size = pvd.block_size as u64;

    let root_header = DirentHeader::decode(&pvd.root_dirent)?;
    let root_lba = root_header.start_lba as u64;
    let root_size = root_header.file_size;

    let rock_ridge_bskip = if opt.flags.contains(IsofsFlags::NO_ROCK_RIDGE_NAMES) {
        None
    } else {
        let mut root_extent = vec![0u8; root_size as usize];
        dev.read_at(root_lba * sector_size, &mut root_extent).map_err(Error::from)?;
        let self_header = DirentHeader::decode(&root_extent)?;
        let susp_start = self_header.susp_offset();
        if susp_start < root_extent.len() {
            let bskip = rockridge::detect_bskip(&root_extent[susp_start..]);
            if bskip != 0 || root_extent[susp_start..].starts_with(b"SP") {
                Some(bskip)
            } else {
                None
            }
        } else {
            None
        }
    };

    let hooks = Arc::new(IsoInodeHooks {
        dev: dev.clone(),
        sector_size,
    });
    let driver = Arc::new(IsoDriver {
        dev,
        hooks,
        opt,
        sector_size,
        rock_ridge_bskip,
        root_ino: root_lba,
        meta: Mutex::new(HashMap::new()),
    });
    driver.register(root_lba, root_size, true);

    let driver_trait: Arc<dyn FileSystemDriver> = driver.clone();
    let fs = FileSystem::new(
        id,
        "iso9660",
        sector_size as u32,
        pvd.volume_block_count as u64,
        FsFlags::RDONLY,
        [0u8; 16],
        222, // ISO9660 Level 2 / Rock Ridge practical max name length
        driver_trait,
    );
    Ok((fs, driver))
}
