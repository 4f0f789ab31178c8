//! `FileSystem`: driver registry and the inode map (SPEC_FULL.md §3
//! FileSystem, §4.3 mount/unmount, §5 Unmount safety).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::inode::{Inode, InodeNumber};

bitflags! {
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct FsFlags: u32 {
        const RDONLY = 0b01;
        const NOSUID = 0b10;
    }
}

/// Hooks a concrete on-disk format (GXFS, ISO9660, a pseudo root fs) must
/// supply (SPEC_FULL.md §3 FileSystem "Hooks", §9 "Deep driver
/// virtualization via function pointers" translated into one trait per
/// driver, analogous to `GxfsFs`/`IsoFs`/`RootFs`).
pub trait FileSystemDriver: Send + Sync {
    /// Loads a freshly allocated inode structure from disk.
    fn load_inode(&self, fs: &Arc<FileSystem>, ino: InodeNumber) -> Result<Arc<Inode>>;

    /// Assigns a fresh `ino` to a newly created inode and persists its
    /// initial metadata.
    fn reg_inode(&self, fs: &Arc<FileSystem>, inode: &Arc<Inode>) -> Result<InodeNumber>;

    /// Releases driver-private state. Called once, when the last mount of
    /// this filesystem is torn down.
    fn unmount(&self) -> Result<()> {
        Ok(())
    }

    fn root_ino(&self) -> InodeNumber;
}

/// One mounted (or about-to-be-mounted) filesystem instance.
pub struct FileSystem {
    pub id: u64,
    pub type_name: &'static str,
    pub block_size: u32,
    pub total_blocks: AtomicU64,
    pub used_blocks: AtomicU64,
    pub flags: FsFlags,
    pub boot_id: [u8; 16],
    pub max_name_len: usize,
    driver: Arc<dyn FileSystemDriver>,
    /// The only way to find an existing in-memory inode by number
    /// (SPEC_FULL.md §3 FileSystem invariant), searched under this lock.
    inodes: Mutex<BTreeMap<InodeNumber, Arc<Inode>>>,
    mount_count: AtomicU32,
    unmounting: AtomicBool,
}

impl FileSystem {
    pub fn new(
        id: u64,
        type_name: &'static str,
        block_size: u32,
        total_blocks: u64,
        flags: FsFlags,
        boot_id: [u8; 16],
        max_name_len: usize,
        driver: Arc<dyn FileSystemDriver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            type_name,
            block_size,
            total_blocks: AtomicU64::new(total_blocks),
            used_blocks: AtomicU64::new(0),
            flags,
            boot_id,
            max_name_len,
            driver,
            inodes: Mutex::new(BTreeMap::new()),
            mount_count: AtomicU32::new(0),
            unmounting: AtomicBool::new(false),
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.contains(FsFlags::RDONLY)
    }

    /// Returns the cached inode for `ino`, loading it via the driver if
    /// absent (SPEC_FULL.md §3 "an inode map... searched under the
    /// filesystem lock").
    pub fn get_inode(self: &Arc<Self>, ino: InodeNumber) -> Result<Arc<Inode>> {
        let mut map = self.inodes.lock();
        if let Some(inode) = map.get(&ino) {
            inode.upref();
            return Ok(inode.clone());
        }
        if self.unmounting.load(Ordering::Acquire) {
            return Err(Error::Busy);
        }
        drop(map);
        let inode = self.driver.load_inode(self, ino)?;
        let mut map = self.inodes.lock();
        map.insert(ino, inode.clone());
        Ok(inode)
    }

    pub fn root_inode(self: &Arc<Self>) -> Result<Arc<Inode>> {
        self.get_inode(self.driver.root_ino())
    }

    /// Registers a brand-new inode (from `create`/`mkdir`/`symlink`), giving
    /// it a driver-assigned inode number and inserting it into the map.
    pub fn register_new_inode(self: &Arc<Self>, inode: Arc<Inode>) -> Result<Arc<Inode>> {
        let ino = self.driver.reg_inode(self, &inode)?;
        inode.ino.store(ino, Ordering::Release);
        self.inodes.lock().insert(ino, inode.clone());
        Ok(inode)
    }

    /// Called from `Inode::downref` by way of the driver hooks when an
    /// inode's refcount reaches zero: if it was already unlinked (`links ==
    /// 0`), drops it from the map entirely.
    pub fn forget_if_unreferenced(&self, ino: InodeNumber, links: u64) {
        if links != 0 {
            return;
        }
        if self.unmounting.load(Ordering::Acquire) {
            // Skip the "remove me from the map" step during unmount
            // (SPEC_FULL.md §5 Unmount safety) — the map is being drained
            // wholesale by `clear_inode_map`.
            return;
        }
        self.inodes.lock().remove(&ino);
    }

    pub fn inc_mount_count(&self) {
        self.mount_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_mount_count(&self) -> u32 {
        self.mount_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn begin_unmounting(&self) {
        self.unmounting.store(true, Ordering::Release);
    }

    pub fn cancel_unmounting(&self) {
        self.unmounting.store(false, Ordering::Release);
    }

    /// Every inode in the map must be non-blocking-lockable with the
    /// expected refcount: map entry (1) plus whatever dentries from the
    /// parent still reference it, and nothing more (SPEC_FULL.md §4.3
    /// unmount, §5).
    pub fn check_quiescent_for_unmount(&self) -> Result<()> {
        let map = self.inodes.lock();
        for inode in map.values() {
            // The map itself holds one reference; anything beyond that
            // (open file descriptions, extra dentry caches) means busy.
            if inode.refcount.load(Ordering::Acquire) > 1 {
                return Err(Error::Busy);
            }
        }
        Ok(())
    }

    pub fn flush_all(&self) -> Result<()> {
        let map = self.inodes.lock();
        for inode in map.values() {
            if inode.is_dirty() {
                inode.hooks.flush(inode)?;
                inode.clear_dirty();
            }
        }
        Ok(())
    }

    /// Frees the dentry cache and empties the inode map (SPEC_FULL.md §4.3
    /// unmount).
    pub fn clear_inode_map(&self) {
        let mut map = self.inodes.lock();
        for inode in map.values() {
            inode.children.lock().clear();
        }
        map.clear();
    }

    pub fn unmount_driver(&self) -> Result<()> {
        self.driver.unmount()
    }
}
