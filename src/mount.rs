//! Mount table and the reference-carrying `DentryRef`/`InodeRef` triples
//! (SPEC_FULL.md §3 MountPoint and DentryRef/InodeRef, §4.3 mount/unmount).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::dentry::{Dentry, DentryFlags};
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::inode::Inode;

bitflags! {
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct MountFlags: u32 {
        const RDONLY = 0b001;
        const NOSUID = 0b010;
        /// Not persisted in the mount table; removed on last reference
        /// instead of requiring explicit `unmount` (SPEC_FULL.md §9 Open
        /// Questions, DESIGN.md decision 2).
        const TEMP = 0b100;
    }
}

/// One element of the mount stack a resolver/dentry-ref carries: crossing
/// into a mountpoint pushes a frame, `..` at the mounted root pops it
/// (SPEC_FULL.md §3 MountPoint).
#[derive(Clone)]
pub struct MountFrame {
    /// The dentry, in the parent filesystem, that the mount was attached to.
    pub parent_dentry: Arc<Dentry>,
    /// The root inode of the mounted filesystem.
    pub mounted_root: Arc<Inode>,
    pub flags: MountFlags,
}

/// An explicit stack of mount frames, carried through the resolver rather
/// than represented as a cycle in the dentry/inode graph (SPEC_FULL.md §9).
#[derive(Clone, Default)]
pub struct MountStack {
    frames: Vec<MountFrame>,
}

impl MountStack {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn push(&mut self, frame: MountFrame) {
        self.frames.push(frame);
    }

    /// Pops the innermost frame, returning it. Used when `..` crosses out of
    /// a mounted filesystem's root.
    pub fn pop(&mut self) -> Option<MountFrame> {
        self.frames.pop()
    }

    pub fn top(&self) -> Option<&MountFrame> {
        self.frames.last()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// A dentry bundled with the mount stack by which it was reached.
pub struct DentryRef {
    pub dentry: Arc<Dentry>,
    pub mounts: MountStack,
}

impl DentryRef {
    pub fn new(dentry: Arc<Dentry>, mounts: MountStack) -> Self {
        Self { dentry, mounts }
    }
}

/// An inode bundled with the mount stack by which it was reached. The
/// standard argument/return type of every resolver operation (SPEC_FULL.md
/// §3). Dropping an `InodeRef` revokes its inode reference.
pub struct InodeRef {
    pub inode: Arc<Inode>,
    pub mounts: MountStack,
}

impl InodeRef {
    pub fn new(inode: Arc<Inode>, mounts: MountStack) -> Self {
        Self { inode, mounts }
    }

    pub fn root(inode: Arc<Inode>) -> Self {
        Self {
            inode,
            mounts: MountStack::new(),
        }
    }
}

impl Drop for InodeRef {
    fn drop(&mut self) {
        self.inode.downref();
    }
}

/// Registry of active mounts. One instance is shared by the whole VFS; the
/// resolver consults it to detect `MOUNTPOINT` dentries and to implement
/// `mount`/`unmount` (SPEC_FULL.md §4.3).
pub struct MountTable {
    inner: Mutex<Vec<MountEntry>>,
}

struct MountEntry {
    parent_dentry: Arc<Dentry>,
    fs: Arc<FileSystem>,
    flags: MountFlags,
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// `mount(dent, root_inode, flags)` (SPEC_FULL.md §4.3): refuses
    /// double-mount and a busy target, bumps the parent directory's
    /// refcount so that unmounting an ancestor while a child mount exists
    /// is refused.
    pub fn mount(&self, dent: &Arc<Dentry>, fs: Arc<FileSystem>, flags: MountFlags) -> Result<()> {
        if dent.is_mountpoint() {
            return Err(Error::Busy);
        }
        if dent.target_ino() == 0 {
            return Err(Error::NoEntry);
        }
        let root = fs.root_inode()?;
        dent.bind(&root)?;
        // `bind` already set TEMP and the cached target; mountpoints
        // additionally set MOUNTPOINT so the resolver crosses into `fs`.
        dent.mark_mountpoint();
        if let Some(dir) = dent.dir.upgrade() {
            dir.refcount.fetch_add(1, Ordering::AcqRel);
        }
        fs.inc_mount_count();
        self.inner.lock().push(MountEntry {
            parent_dentry: dent.clone(),
            fs,
            flags,
        });
        Ok(())
    }

    /// `unmount(path, flags)` (SPEC_FULL.md §4.3): for the last mount of a
    /// filesystem, every inode in its map must be quiescent. Flushes each
    /// inode, frees the dentry cache, calls the driver's `unmount`, and
    /// releases the filesystem. Otherwise returns `busy`.
    pub fn unmount(&self, dent: &Arc<Dentry>) -> Result<()> {
        let mut table = self.inner.lock();
        let idx = table
            .iter()
            .position(|e| Arc::ptr_eq(&e.parent_dentry, dent))
            .ok_or(Error::Invalid)?;
        let entry = &table[idx];
        entry.fs.begin_unmounting();
        if let Err(e) = entry.fs.check_quiescent_for_unmount() {
            entry.fs.cancel_unmounting();
            return Err(e);
        }
        entry.fs.flush_all()?;
        entry.fs.clear_inode_map();
        entry.fs.unmount_driver()?;
        if let Some(dir) = dent.dir.upgrade() {
            dir.refcount.fetch_sub(1, Ordering::AcqRel);
        }
        table.remove(idx);
        Ok(())
    }

    /// Removes a `TEMP`-flagged mount if its dentry has become
    /// unreferenced, per the open-question decision that `TEMP` mounts
    /// don't require an explicit `unmount` call.
    pub fn release_temp_if_unreferenced(&self, dent: &Arc<Dentry>) {
        let mut table = self.inner.lock();
        if let Some(idx) = table.iter().position(|e| Arc::ptr_eq(&e.parent_dentry, dent)) {
            if table[idx].flags.contains(MountFlags::TEMP) && Arc::strong_count(dent) <= 1 {
                table.remove(idx);
            }
        }
    }
}
