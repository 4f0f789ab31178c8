//! Dentry: a named edge from a directory inode to an inode number
//! (SPEC_FULL.md §3 Dentry, §4.3 Dentry operations, §9 Cyclic pointer
//! graphs).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::inode::{FileType, Inode, InodeNumber};

bitflags! {
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct DentryFlags: u8 {
        /// Not yet committed to disk (manufactured by `get_child(create=true)`
        /// for an unknown name, or used for `bind`).
        const TEMP = 0b01;
        /// Target is the root of another mounted filesystem.
        const MOUNTPOINT = 0b10;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct UnlinkFlags: u8 {
        const REMOVE_DIR = 0b01;
    }
}

/// A named edge inside one directory inode.
///
/// `dir` is `Weak`, not `Arc`: the containing directory inode strongly owns
/// this dentry (via its children list in [`DentryList`]), so a strong
/// back-pointer here would form an unbreakable `Arc` cycle. The semantic
/// "counts as a reference" relationship SPEC_FULL.md §3 describes between a
/// dentry and its containing directory is instead tracked through the
/// directory inode's own explicit `refcount` field, bumped whenever an
/// external holder (a [`crate::mount::DentryRef`], a process cwd, an
/// in-flight resolver frame) stashes a dentry outside the arena.
pub struct Dentry {
    name: Mutex<String>,
    pub dir: Weak<Inode>,
    target_ino: AtomicU64,
    cached_target: Mutex<Option<Arc<Inode>>>,
    /// Per-directory key used by `read_dir` for race-free iteration
    /// (SPEC_FULL.md §4.2 "Directory reading"). Strictly increasing as
    /// entries are appended; 0 and 1 are reserved for synthetic `.`/`..`.
    pub key: u64,
    flags: Mutex<DentryFlags>,
}

impl Dentry {
    pub fn new(dir: &Arc<Inode>, name: String, target_ino: InodeNumber, key: u64, flags: DentryFlags) -> Arc<Self> {
        Arc::new(Self {
            name: Mutex::new(name),
            dir: Arc::downgrade(dir),
            target_ino: AtomicU64::new(target_ino),
            cached_target: Mutex::new(None),
            key,
            flags: Mutex::new(flags),
        })
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn rename_in_place(&self, new_name: String) {
        *self.name.lock() = new_name;
    }

    pub fn target_ino(&self) -> InodeNumber {
        self.target_ino.load(Ordering::Acquire)
    }

    pub fn flags(&self) -> DentryFlags {
        *self.flags.lock()
    }

    pub fn cached_target(&self) -> Option<Arc<Inode>> {
        self.cached_target.lock().clone()
    }

    pub fn set_cached_target(&self, inode: Option<Arc<Inode>>) {
        *self.cached_target.lock() = inode;
    }

    pub fn is_mountpoint(&self) -> bool {
        self.flags().contains(DentryFlags::MOUNTPOINT)
    }

    /// `link(dent, target_inode)` (SPEC_FULL.md §4.3): requires `dent.ino ==
    /// 0`, bumps the target's link count, clears `TEMP`.
    pub fn link(&self, target: &Arc<Inode>) -> Result<()> {
        if self.target_ino() != 0 {
            return Err(Error::Exists);
        }
        target.inc_links();
        self.target_ino.store(target.ino(), Ordering::Release);
        self.set_cached_target(Some(target.clone()));
        self.flags.lock().remove(DentryFlags::TEMP);
        if let Some(dir) = self.dir.upgrade() {
            dir.mark_dirty();
        }
        Ok(())
    }

    /// `bind(dent, target_inode)` (SPEC_FULL.md §4.3): like `link` but keeps
    /// `TEMP` set so the entry is never written to disk.
    pub fn bind(&self, target: &Arc<Inode>) -> Result<()> {
        if self.target_ino() != 0 {
            return Err(Error::Exists);
        }
        self.target_ino.store(target.ino(), Ordering::Release);
        self.set_cached_target(Some(target.clone()));
        self.flags.lock().insert(DentryFlags::TEMP);
        Ok(())
    }

    /// Marks this dentry as the attachment point of a mounted filesystem's
    /// root, so the resolver's mount-crossing step fires on it.
    pub fn mark_mountpoint(&self) {
        self.flags.lock().insert(DentryFlags::MOUNTPOINT);
    }
}

/// Per-directory ordered dentry arena (SPEC_FULL.md §3 "For directories, an
/// ordered list of dentries owned by this inode").
#[derive(Default)]
pub struct DentryList {
    entries: Vec<Arc<Dentry>>,
    next_key: u64,
}

impl DentryList {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            // 0 and 1 are reserved for synthetic `.`/`..`.
            next_key: 2,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Dentry>> {
        self.entries.iter()
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Dentry>> {
        self.entries.iter().find(|d| d.name() == name).cloned()
    }

    /// Returns the entry at `key`, or the entry with the next-higher key if
    /// absent (SPEC_FULL.md §4.2 "Directory reading").
    pub fn find_at_or_after(&self, key: u64) -> Option<Arc<Dentry>> {
        self.entries
            .iter()
            .filter(|d| d.key >= key)
            .min_by_key(|d| d.key)
            .cloned()
    }

    /// Allocates a fresh dentry with a strictly-increasing key and inserts
    /// it, enforcing name uniqueness (SPEC_FULL.md §3 Dentry invariants).
    pub fn insert(&mut self, dir: &Arc<Inode>, name: String, target_ino: InodeNumber, flags: DentryFlags) -> Result<Arc<Dentry>> {
        if self.find_by_name(&name).is_some() {
            return Err(Error::Exists);
        }
        let key = self.next_key;
        self.next_key += 1;
        let dentry = Dentry::new(dir, name, target_ino, key, flags);
        self.entries.push(dentry.clone());
        Ok(dentry)
    }

    /// Removes a dentry by name once it has been unlinked and is
    /// unreferenced (no cached target, see [`Dentry::link`]/unlink flow).
    pub fn remove(&mut self, name: &str) -> Option<Arc<Dentry>> {
        let idx = self.entries.iter().position(|d| d.name() == name)?;
        Some(self.entries.remove(idx))
    }

    /// Drops every entry, breaking the directory/dentry `Arc` graph. Called
    /// on unmount (SPEC_FULL.md §4.3 unmount "frees the dentry cache") and
    /// when a directory inode's own refcount+links reach zero.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// `unlink(dent, flags)` (SPEC_FULL.md §4.3).
///
/// `parent` is the directory inode owning `dent`. `requester` identifies
/// the caller for the sticky-bit check; `root_equivalent` bypasses it.
pub fn unlink(
    parent: &Arc<Inode>,
    dentries: &mut DentryList,
    dent: &Arc<Dentry>,
    target: &Arc<Inode>,
    flags: UnlinkFlags,
    requester_uid: u32,
    root_equivalent: bool,
) -> Result<()> {
    if dent.is_mountpoint() {
        return Err(Error::Busy);
    }
    if dent.key == 1 {
        // The root dentry ('..' at the global root) may never be unlinked.
        return Err(Error::Access);
    }

    let is_dir = target.ftype == FileType::Directory;
    if flags.contains(UnlinkFlags::REMOVE_DIR) {
        if !is_dir {
            return Err(Error::NotDirectory);
        }
        // "refcount exactly 1" per SPEC_FULL.md §4.3: only the caller's
        // transient reference to the about-to-be-removed directory.
        if target.refcount.load(Ordering::Acquire) != 1 {
            return Err(Error::Busy);
        }
        if !target.children.lock().is_empty() {
            return Err(Error::NotEmpty);
        }
    } else if is_dir {
        return Err(Error::IsDirectory);
    }

    // Sticky-bit check (SPEC_FULL.md §4.3, §7 Policies, §8 scenario 3).
    if parent.mode().contains(crate::inode::Mode::STICKY) && !root_equivalent {
        let (parent_uid, _) = parent.owner();
        let (target_uid, _) = target.owner();
        if requester_uid != parent_uid && requester_uid != target_uid {
            return Err(Error::Access);
        }
    }

    dentries
        .remove(&dent.name())
        .ok_or(Error::NoEntry)?;

    let remaining_links = target.dec_links();
    if remaining_links == 0 && target.refcount.load(Ordering::Acquire) == 0 {
        if let Err(e) = target.hooks.drop_inode(target) {
            log::error!("unlink: reclaiming inode {} failed: {e}", target.ino());
            return Err(e);
        }
        *target.file_tree.lock() = None;
        target.mark_dropped();
    }
    parent.touch_mtime(crate::inode::Timestamp::default());
    Ok(())
}
