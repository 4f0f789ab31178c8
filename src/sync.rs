//! Locking discipline (SPEC_FULL.md §4.1, §9 "Recursive and re-entrant locks").
//!
//! The original source relies on a per-inode mutex that the same thread can
//! re-acquire (needed by rename between two entries of the same directory).
//! Rust's `parking_lot::Mutex` is not reentrant, and a reentrant mutex would
//! hide the two-handle lock-order requirement from the type system. Instead,
//! two-inode operations (link/unlink/move/mount) take an explicit
//! [`LockOrderToken`] proving the caller already holds both locks in
//! ascending-inode-number order (SPEC_FULL.md §5 "Lock order").

use parking_lot::{Mutex, MutexGuard};

/// Proof that the caller acquired two inode locks in ascending order of
/// inode number, as SPEC_FULL.md §5 requires for link/move/mount. Values are
/// only constructed by [`lock_two`], never directly.
pub struct LockOrderToken;

/// Locks two *distinct* inode-metadata mutexes belonging to the same
/// filesystem in ascending numeric order of `a_ino`/`b_ino`, returning both
/// guards plus a [`LockOrderToken`] as proof of correct ordering.
///
/// `a` and `b` must not be the same mutex (`parking_lot::Mutex` is not
/// reentrant); callers whose two operands may be the same inode — e.g.
/// rename of two entries within one directory — must compare `a_ino ==
/// b_ino` themselves and take a single lock in that case, the direct
/// replacement for the source's recursive-mutex reentry in that case.
pub fn lock_two<'a, T>(
    a_ino: u64,
    a: &'a Mutex<T>,
    b_ino: u64,
    b: &'a Mutex<T>,
) -> (MutexGuard<'a, T>, MutexGuard<'a, T>, LockOrderToken) {
    debug_assert!(
        !std::ptr::eq(a, b),
        "lock_two called with the same mutex twice; caller must special-case a_ino == b_ino"
    );
    if a_ino <= b_ino {
        let ga = a.lock();
        let gb = b.lock();
        (ga, gb, LockOrderToken)
    } else {
        let gb = b.lock();
        let ga = a.lock();
        (ga, gb, LockOrderToken)
    }
}
