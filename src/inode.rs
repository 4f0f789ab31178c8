//! In-memory inode representation (SPEC_FULL.md §3 Inode, §3A).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::dentry::{Dentry, DentryList};
use crate::error::{Error, Result};
use crate::filesystem::FileSystem;
use crate::filetree::FileTree;

/// Number of ACL entries an inode carries inline (SPEC_FULL.md §3, §9).
pub const ACL_ENTRIES: usize = 128;

/// Filesystem-relative inode number. `0` means "dropped, to be freed".
pub type InodeNumber = u64;

#[derive(Debug, Clone, Copy, Eq, PartialEq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum FileType {
    RegularFile = 0,
    Directory = 1,
    CharDevice = 2,
    BlockDevice = 3,
    Fifo = 4,
    Symlink = 5,
    Socket = 6,
}

impl FileType {
    pub fn is_directory(self) -> bool {
        matches!(self, FileType::Directory)
    }

    pub fn is_symlink(self) -> bool {
        matches!(self, FileType::Symlink)
    }
}

bitflags! {
    /// The 12 Unix permission bits (setuid/setgid/sticky + rwx x3).
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct Mode: u16 {
        const SETUID = 0o4000;
        const SETGID = 0o2000;
        const STICKY = 0o1000;
        const USER_R = 0o0400;
        const USER_W = 0o0200;
        const USER_X = 0o0100;
        const GROUP_R = 0o0040;
        const GROUP_W = 0o0020;
        const GROUP_X = 0o0010;
        const OTHER_R = 0o0004;
        const OTHER_W = 0o0002;
        const OTHER_X = 0o0001;
    }
}

impl Mode {
    /// Masks to the 12 bits stat() is allowed to observe (SPEC_FULL.md §8
    /// "change_mode followed by stat observes m masked to twelve bits").
    pub fn masked(bits: u16) -> Self {
        Mode::from_bits_truncate(bits & 0o7777)
    }
}

/// Kind of subject an [`AclEntry`] names.
#[derive(Debug, Clone, Copy, Eq, PartialEq, num_enum::TryFromPrimitive, num_enum::IntoPrimitive)]
#[repr(u8)]
pub enum AclKind {
    Unused = 0,
    User = 1,
    Group = 2,
}

#[derive(Debug, Clone, Copy)]
pub struct AclEntry {
    pub kind: AclKind,
    pub id: u32,
    pub rwx: u8,
}

impl Default for AclEntry {
    fn default() -> Self {
        Self {
            kind: AclKind::Unused,
            id: 0,
            rwx: 0,
        }
    }
}

/// Fixed-size Access Control List (SPEC_FULL.md §3, §9 "forward-compatible
/// extension point").
pub struct Acl {
    entries: [AclEntry; ACL_ENTRIES],
}

impl Default for Acl {
    fn default() -> Self {
        Self {
            entries: [AclEntry::default(); ACL_ENTRIES],
        }
    }
}

impl Acl {
    pub fn entries(&self) -> &[AclEntry; ACL_ENTRIES] {
        &self.entries
    }

    /// Inserts a new entry into the first unused slot.
    ///
    /// Returns [`Error::Overflow`] when all 128 slots are occupied, per the
    /// open-question decision recorded in DESIGN.md: no silent eviction.
    pub fn insert(&mut self, entry: AclEntry) -> Result<()> {
        for slot in self.entries.iter_mut() {
            if slot.kind == AclKind::Unused {
                *slot = entry;
                return Ok(());
            }
        }
        Err(Error::Overflow)
    }

    pub fn remove(&mut self, kind: AclKind, id: u32) {
        for slot in self.entries.iter_mut() {
            if slot.kind == kind && slot.id == id {
                *slot = AclEntry::default();
            }
        }
    }

    /// Looks up the rwx bits granted to `(kind, id)`, if an entry exists.
    pub fn lookup(&self, kind: AclKind, id: u32) -> Option<u8> {
        self.entries
            .iter()
            .find(|e| e.kind == kind && e.id == id)
            .map(|e| e.rwx)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timestamps {
    pub atime: Timestamp,
    pub mtime: Timestamp,
    pub ctime: Timestamp,
    pub birthtime: Timestamp,
}

/// Driver hooks an inode may expose (SPEC_FULL.md §3 "Driver hooks"). All
/// are optional: a driver implements only the subset relevant to it, the
/// rest fall back to the file tree or a no-op, mirroring the teacher's
/// translation of the original's function-pointer table into a trait with
/// default methods (SPEC_FULL.md §9).
pub trait InodeDriverHooks: Send + Sync {
    fn pread(&self, _inode: &Inode, _buf: &mut [u8], _offset: u64) -> Option<Result<usize>> {
        None
    }
    fn pwrite(&self, _inode: &Inode, _buf: &[u8], _offset: u64) -> Option<Result<usize>> {
        None
    }
    fn getsize(&self, _inode: &Inode) -> Option<u64> {
        None
    }
    /// Called when an inode's link count and refcount both reach zero: the
    /// driver reclaims on-disk storage (SPEC_FULL.md §3 invariants, §9).
    fn drop_inode(&self, _inode: &Inode) -> Result<()> {
        Ok(())
    }
    fn flush(&self, _inode: &Inode) -> Result<()> {
        Ok(())
    }
}

/// In-memory record of one filesystem object (SPEC_FULL.md §3 Inode).
pub struct Inode {
    pub fs: Weak<FileSystem>,
    pub ino: AtomicU64,
    pub ftype: FileType,
    pub refcount: AtomicI64,
    state: Mutex<InodeState>,
    /// File tree backing random-access reads/writes, present for regular
    /// files (and, in principle, any driver that wants a page cache
    /// instead of raw pread/pwrite hooks).
    pub file_tree: Mutex<Option<Arc<FileTree>>>,
    /// Parent dentry back-reference, non-owning (SPEC_FULL.md §3 "Parent
    /// back-reference... Non-ownership: purely a lookup aid").
    pub parent: Mutex<Option<Weak<Dentry>>>,
    pub dirty: AtomicBool,
    pub no_unlink: bool,
    pub hooks: Arc<dyn InodeDriverHooks>,
    /// Ordered dentry arena, populated for directory inodes only
    /// (SPEC_FULL.md §3 "For directories, an ordered list of dentries
    /// owned by this inode").
    pub children: Mutex<DentryList>,
}

struct InodeState {
    mode: Mode,
    uid: u32,
    gid: u32,
    nlink: u64,
    size: u64,
    timestamps: Timestamps,
    ixperm: u64,
    oxperm: u64,
    dxperm: u64,
    acl: Acl,
    symlink_target: Option<String>,
}

impl Inode {
    pub fn new(
        fs: Weak<FileSystem>,
        ino: InodeNumber,
        ftype: FileType,
        mode: Mode,
        uid: u32,
        gid: u32,
        hooks: Arc<dyn InodeDriverHooks>,
    ) -> Arc<Self> {
        Arc::new(Self {
            fs,
            ino: AtomicU64::new(ino),
            ftype,
            refcount: AtomicI64::new(1),
            state: Mutex::new(InodeState {
                mode,
                uid,
                gid,
                nlink: 1,
                size: 0,
                timestamps: Timestamps::default(),
                ixperm: 0,
                oxperm: 0,
                dxperm: 0,
                acl: Acl::default(),
                symlink_target: None,
            }),
            file_tree: Mutex::new(None),
            parent: Mutex::new(None),
            dirty: AtomicBool::new(false),
            no_unlink: false,
            hooks,
            children: Mutex::new(DentryList::new()),
        })
    }

    pub fn ino(&self) -> InodeNumber {
        self.ino.load(Ordering::Acquire)
    }

    pub fn mark_dropped(&self) {
        self.ino.store(0, Ordering::Release);
    }

    pub fn mode(&self) -> Mode {
        self.state.lock().mode
    }

    pub fn set_mode(&self, mode: Mode) {
        self.state.lock().mode = Mode::masked(mode.bits());
        self.mark_dirty();
    }

    pub fn owner(&self) -> (u32, u32) {
        let s = self.state.lock();
        (s.uid, s.gid)
    }

    pub fn set_owner(&self, uid: u32, gid: u32) {
        let mut s = self.state.lock();
        s.uid = uid;
        s.gid = gid;
        drop(s);
        self.mark_dirty();
    }

    pub fn links(&self) -> u64 {
        self.state.lock().nlink
    }

    pub fn inc_links(&self) {
        self.state.lock().nlink += 1;
        self.mark_dirty();
    }

    /// Restores a link count read back from on-disk metadata. Drivers call
    /// this once, right after constructing an inode in `load_inode`/
    /// `reg_inode`; it does not mark the inode dirty.
    pub fn set_links_from_disk(&self, nlink: u64) {
        self.state.lock().nlink = nlink;
    }

    /// Decrements the hard-link count, returning the new value.
    pub fn dec_links(&self) -> u64 {
        let mut s = self.state.lock();
        s.nlink = s.nlink.saturating_sub(1);
        let n = s.nlink;
        drop(s);
        self.mark_dirty();
        n
    }

    pub fn size(&self) -> u64 {
        if let Some(sz) = self.hooks.getsize(self) {
            return sz;
        }
        if let Some(tree) = self.file_tree.lock().as_ref() {
            return tree.size();
        }
        self.state.lock().size
    }

    pub fn set_size(&self, size: u64) {
        self.state.lock().size = size;
        self.mark_dirty();
    }

    pub fn xperm(&self) -> (u64, u64, u64) {
        let s = self.state.lock();
        (s.ixperm, s.oxperm, s.dxperm)
    }

    pub fn set_xperm(&self, ixperm: u64, oxperm: u64, dxperm: u64) {
        let mut s = self.state.lock();
        s.ixperm = ixperm;
        s.oxperm = oxperm;
        s.dxperm = dxperm;
        drop(s);
        self.mark_dirty();
    }

    pub fn timestamps(&self) -> Timestamps {
        self.state.lock().timestamps
    }

    pub fn set_timestamps(&self, ts: Timestamps) {
        self.state.lock().timestamps = ts;
        self.mark_dirty();
    }

    pub fn touch_mtime(&self, now: Timestamp) {
        let mut s = self.state.lock();
        s.timestamps.mtime = now;
        s.timestamps.ctime = now;
        drop(s);
        self.mark_dirty();
    }

    pub fn symlink_target(&self) -> Option<String> {
        self.state.lock().symlink_target.clone()
    }

    pub fn set_symlink_target(&self, target: String) {
        self.state.lock().symlink_target = Some(target);
        self.mark_dirty();
    }

    pub fn with_acl<R>(&self, f: impl FnOnce(&Acl) -> R) -> R {
        f(&self.state.lock().acl)
    }

    pub fn with_acl_mut<R>(&self, f: impl FnOnce(&mut Acl) -> R) -> R {
        let r = f(&mut self.state.lock().acl);
        self.mark_dirty();
        r
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn upref(self: &Arc<Self>) -> Arc<Self> {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        self.clone()
    }

    /// Decrements the refcount; when it reaches zero with no hard links
    /// left, reclaims the inode's on-disk storage and file tree
    /// (SPEC_FULL.md §3 invariants, §9 Design Notes on `TrackedInode`-style
    /// reclamation via Drop).
    pub fn downref(self: &Arc<Self>) {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        if prev != 1 {
            return;
        }
        if self.links() == 0 {
            *self.file_tree.lock() = None;
            if let Err(e) = self.hooks.drop_inode(self) {
                log::error!("inode {} reclamation failed: {e}", self.ino());
            }
            self.mark_dropped();
        } else if self.is_dirty() {
            if let Err(e) = self.hooks.flush(self) {
                log::warn!("inode {} flush-on-release failed: {e}", self.ino());
            }
        }
    }
}

/// Checks `want` against `inode`'s rwx bits and xperm override masks for a
/// requester, per SPEC_FULL.md §4.3A.
pub fn access_check(
    inode: &Inode,
    requester_uid: u32,
    requester_gid: u32,
    root_equivalent: bool,
    want: AccessMask,
) -> Result<()> {
    if root_equivalent {
        return Ok(());
    }
    let mode = inode.mode();
    let (uid, gid) = inode.owner();
    let bits = if requester_uid == uid {
        (mode.bits() >> 6) & 0o7
    } else if requester_gid == gid {
        (mode.bits() >> 3) & 0o7
    } else {
        mode.bits() & 0o7
    };
    let mut allowed = AccessMask::from_rwx(bits as u8);

    if want.contains(AccessMask::EXECUTE) {
        let (ixperm, oxperm, dxperm) = inode.xperm();
        let mask = match inode.ftype {
            FileType::Directory => dxperm,
            _ if requester_uid == uid => oxperm,
            _ => ixperm,
        };
        if mask != 0 {
            let (kind, id) = if requester_uid == uid {
                (AclKind::User, requester_uid)
            } else {
                (AclKind::Group, requester_gid)
            };
            if let Some(acl_rwx) = inode.with_acl(|acl| acl.lookup(kind, id)) {
                let idx_bit = 1u64 << (id % 64);
                if mask & idx_bit != 0 {
                    allowed.set(AccessMask::EXECUTE, acl_rwx & 0b001 != 0);
                }
            }
        }
    }

    if allowed.contains(want) {
        Ok(())
    } else {
        Err(Error::Access)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub struct AccessMask: u8 {
        const READ = 0b100;
        const WRITE = 0b010;
        const EXECUTE = 0b001;
    }
}

impl AccessMask {
    pub fn from_rwx(bits: u8) -> Self {
        AccessMask::from_bits_truncate(bits)
    }
}
