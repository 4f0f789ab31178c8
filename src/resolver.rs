//! Path resolution (SPEC_FULL.md §4.2).

use std::sync::Arc;

use crate::dentry::{Dentry, DentryFlags};
use crate::error::{Error, Result};
use crate::inode::{access_check, AccessMask, FileType, Inode};
use crate::mount::{DentryRef, InodeRef, MountFrame, MountStack, MountTable};

const MAX_SYMLINK_DEPTH: u32 = 8;

/// The ambient identity and filesystem-tree context every resolve call
/// needs: current process root/cwd, credentials, and the mount table.
/// Mirrors what the syscall glue layer (out of scope, SPEC_FULL.md §1)
/// would otherwise thread through per-thread state.
pub struct ResolveContext<'a> {
    pub process_root: &'a InodeRef,
    pub cwd: &'a InodeRef,
    pub uid: u32,
    pub gid: u32,
    pub root_equivalent: bool,
    pub mounts: &'a MountTable,
}

/// Resolves `path` starting from `start`, or the process cwd if `start` is
/// `None`, per the algorithm in SPEC_FULL.md §4.2. Returns a [`DentryRef`]:
/// the directory is (conceptually) locked for the duration of dentry
/// mutation, and the mount stack records every mountpoint crossed.
pub fn resolve(
    ctx: &ResolveContext,
    start: Option<&InodeRef>,
    path: &str,
    create: bool,
) -> Result<DentryRef> {
    resolve_inner(ctx, start, path, create, 0)
}

fn resolve_inner(
    ctx: &ResolveContext,
    start: Option<&InodeRef>,
    path: &str,
    create: bool,
    depth: u32,
) -> Result<DentryRef> {
    if path.is_empty() {
        return Err(Error::NoEntry);
    }

    let (mut cur_inode, mut mounts): (Arc<Inode>, MountStack) = if let Some(rest) = path.strip_prefix('/') {
        let _ = rest;
        (ctx.process_root.inode.clone(), ctx.process_root.mounts.clone())
    } else {
        match start {
            Some(inode_ref) => (inode_ref.inode.clone(), inode_ref.mounts.clone()),
            None => (ctx.cwd.inode.clone(), ctx.cwd.mounts.clone()),
        }
    };

    let components: Vec<&str> = path
        .trim_start_matches('/')
        .split('/')
        .filter(|c| !c.is_empty())
        .collect();

    if components.is_empty() {
        // Bare "/" or "" after stripping: resolve to self-dentry via "."
        let dentry = self_dentry(&cur_inode);
        return Ok(DentryRef::new(dentry, mounts));
    }

    let last_index = components.len() - 1;
    let mut current_dentry: Option<Arc<Dentry>> = None;

    for (i, name) in components.iter().enumerate() {
        let is_final = i == last_index;

        if !cur_inode.ftype.is_directory() {
            return Err(Error::NotDirectory);
        }
        access_check(&cur_inode, ctx.uid, ctx.gid, ctx.root_equivalent, AccessMask::EXECUTE)?;
        if is_final && create {
            access_check(&cur_inode, ctx.uid, ctx.gid, ctx.root_equivalent, AccessMask::WRITE)?;
        }

        let dentry = match *name {
            "." => self_dentry(&cur_inode),
            ".." => {
                if let Some(frame) = mounts.pop() {
                    // `frame.parent_dentry` is the mountpoint entry itself —
                    // its target was rebound to the mounted root by `bind`,
                    // so it can't stand in for "the directory we've landed
                    // on". Use a fresh self-dentry of the directory we
                    // popped back out to instead.
                    cur_inode = frame.parent_dentry.dir.upgrade().ok_or(Error::NoEntry)?;
                    current_dentry = Some(self_dentry(&cur_inode));
                    continue;
                } else if Arc::ptr_eq(&cur_inode, &ctx.process_root.inode) {
                    // At the process root, ".." is idempotent.
                    self_dentry(&cur_inode)
                } else {
                    match cur_inode.parent.lock().as_ref().and_then(|w| w.upgrade()) {
                        Some(parent_dentry) => {
                            // `parent_dentry` names *this* directory within
                            // its own parent, so its target is still the
                            // directory we're leaving, not the one we're
                            // moving to. Same fix as above.
                            let parent_dir = parent_dentry.dir.upgrade().ok_or(Error::NoEntry)?;
                            cur_inode = parent_dir;
                            current_dentry = Some(self_dentry(&cur_inode));
                            continue;
                        }
                        None => self_dentry(&cur_inode),
                    }
                }
            }
            regular_name => get_child(&cur_inode, regular_name, create && is_final)?,
        };

        if dentry.is_mountpoint() {
            let root = dentry.cached_target().ok_or(Error::Corrupted("mountpoint with no cached root"))?;
            mounts.push(MountFrame {
                parent_dentry: dentry.clone(),
                mounted_root: root.clone(),
                flags: crate::mount::MountFlags::empty(),
            });
            cur_inode = root;
            current_dentry = Some(dentry);
            continue;
        }

        let target_ino = dentry.target_ino();
        if target_ino == 0 {
            // TEMP placeholder for a not-yet-created final component: stop
            // here, the caller (create/mkdir/etc.) will `link` it.
            current_dentry = Some(dentry);
            if !is_final {
                return Err(Error::NoEntry);
            }
            break;
        }

        let target_inode = resolve_dentry_to_inode(&cur_inode, &dentry)?;

        // Always follow through intermediate components; at the final
        // component, `create` doubles as "don't follow" (mkdir/lstat/
        // readlink-style callers that want the link itself, not its
        // target) — a plain lookup (`create == false`) follows through.
        if target_inode.ftype.is_symlink() && !(is_final && create) {
            let link_target = target_inode.symlink_target().ok_or(Error::Corrupted("symlink with no target"))?;
            if depth + 1 > MAX_SYMLINK_DEPTH {
                return Err(Error::Loop);
            }
            let parent_ref = InodeRef::new(cur_inode.clone(), mounts.clone());
            cur_inode.upref();
            let resolved = resolve_inner(ctx, Some(&parent_ref), &link_target, false, depth + 1)?;
            let target_dir = resolved.dentry.dir.upgrade().ok_or(Error::NoEntry)?;
            cur_inode = resolve_dentry_to_inode(&target_dir, &resolved.dentry)?;
            mounts = resolved.mounts.clone();
            current_dentry = Some(resolved.dentry);
            continue;
        }

        cur_inode = target_inode;
        current_dentry = Some(dentry);
    }

    let dentry = current_dentry.ok_or(Error::NoEntry)?;
    Ok(DentryRef::new(dentry, mounts))
}

/// Produces a self-referential dentry for `.`: not stored in any arena,
/// just enough identity (name `.`, target == the directory's own inode
/// number) for callers that treat every resolver step uniformly as a
/// dentry.
fn self_dentry(dir: &Arc<Inode>) -> Arc<Dentry> {
    let d = Dentry::new(dir, ".".to_string(), dir.ino(), 0, DentryFlags::empty());
    d.set_cached_target(Some(dir.clone()));
    d
}

/// `get_child(name, create)` (SPEC_FULL.md §4.2): looks up `name` in `dir`'s
/// dentry arena. For an unknown name with `create`, manufactures a `TEMP`
/// placeholder dentry (`ino == 0`); without `create`, fails with
/// *no entry*.
fn get_child(dir: &Arc<Inode>, name: &str, create: bool) -> Result<Arc<Dentry>> {
    let mut children = dir.children.lock();
    if let Some(existing) = children.find_by_name(name) {
        return Ok(existing);
    }
    if create {
        children.insert(dir, name.to_string(), 0, DentryFlags::TEMP)
    } else {
        Err(Error::NoEntry)
    }
}

/// Peeks the inode a dentry names, loading it via the owning filesystem's
/// driver if not already cached on the dentry (SPEC_FULL.md §2 "Data
/// flow"). Transient: the returned `Arc` is for walking past this
/// component, not a counted reference — the dentry's own cached-target
/// slot already accounts for the one reference backing it. Callers that
/// want to *hold onto* the result use [`dentry_ref_to_inode_ref`], which
/// takes a fresh, properly counted reference.
fn resolve_dentry_to_inode(dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> Result<Arc<Inode>> {
    if let Some(cached) = dentry.cached_target() {
        return Ok(cached);
    }
    let fs = dir.fs.upgrade().ok_or(Error::Corrupted("dangling filesystem reference"))?;
    let inode = fs.get_inode(dentry.target_ino())?;
    *inode.parent.lock() = Some(Arc::downgrade(dentry));
    dentry.set_cached_target(Some(inode.clone()));
    Ok(inode)
}

/// Converts a resolved [`DentryRef`] into an [`InodeRef`] (SPEC_FULL.md §2
/// "Data flow": "Converting a dentry reference to an inode reference loads
/// the inode via the driver if not cached"). Unlike the transient peek
/// `resolve_dentry_to_inode` does while walking, this takes a fresh,
/// counted reference suitable for a file description, a stashed cwd, or
/// any other holder that outlives the resolve call.
pub fn dentry_ref_to_inode_ref(dentry_ref: &DentryRef) -> Result<InodeRef> {
    let dentry = &dentry_ref.dentry;
    let dir = dentry.dir.upgrade().ok_or(Error::NoEntry)?;
    let fs = dir.fs.upgrade().ok_or(Error::Corrupted("dangling filesystem reference"))?;
    let inode = fs.get_inode(dentry.target_ino())?;
    Ok(InodeRef::new(inode, dentry_ref.mounts.clone()))
}

/// `read_dir(inode, key)` (SPEC_FULL.md §4.2 "Directory reading"): returns
/// the entry at `key` or the next-higher key; synthetic keys 0/1 yield `.`
/// and `..`.
pub enum DirEntryResult {
    Entry { name: String, ino: u64, key: u64 },
    NoMore,
}

pub fn read_dir(dir: &Arc<Inode>, parent: &Arc<Inode>, key: u64) -> DirEntryResult {
    if key == 0 {
        return DirEntryResult::Entry {
            name: ".".to_string(),
            ino: dir.ino(),
            key: 0,
        };
    }
    if key <= 1 {
        return DirEntryResult::Entry {
            name: "..".to_string(),
            ino: parent.ino(),
            key: 1,
        };
    }
    let children = dir.children.lock();
    match children.find_at_or_after(key) {
        Some(d) => DirEntryResult::Entry {
            name: d.name(),
            ino: d.target_ino(),
            key: d.key,
        },
        None => DirEntryResult::NoMore,
    }
}

/// `real_path(dent_ref)` (SPEC_FULL.md §6): walks parent back-references to
/// reconstruct an absolute path. Best-effort: stops if a parent link is
/// missing (detached dentry), returning what was accumulated so far
/// prefixed with `?`.
pub fn real_path(dentry_ref: &DentryRef) -> String {
    let mut components = Vec::new();
    let mut cur = dentry_ref.dentry.clone();
    loop {
        let name = cur.name();
        if name == "/" {
            break;
        }
        components.push(name);
        let dir = match cur.dir.upgrade() {
            Some(d) => d,
            None => break,
        };
        let parent_dentry = match dir.parent.lock().as_ref().and_then(|w| w.upgrade()) {
            Some(p) => p,
            None => break,
        };
        if Arc::ptr_eq(&parent_dentry, &cur) {
            break;
        }
        cur = parent_dentry;
    }
    components.reverse();
    if components.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", components.join("/"))
    }
}
