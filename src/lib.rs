//! # gxvfs: a Glidix-flavored virtual filesystem core
//!
//! This crate is the kernel's virtual filesystem (VFS) core together with
//! its tightly-coupled inode/dentry cache, generic filesystem driver
//! interface, and two on-disk drivers: GXFS (a block-indirection-tree
//! reference filesystem) and a read-only ISO9660/Rock Ridge driver.
//!
//! It defines the lifetime and concurrency discipline for every file-like
//! object in the system, implements a mountpoint-aware path resolver,
//! coordinates a page-granular file cache, and presents a driver contract
//! precise enough for multiple on-disk formats to plug in.
//!
//! Deliberately out of scope: the scheduler/thread primitives (consumed
//! only as opaque locking facilities via [`parking_lot`]), the physical
//! frame allocator, the ELF loader, the network stack, the boot loader,
//! user-space tools, and the system-call glue layer that would sit on top
//! of this core.
//!
//! ## Layout
//!
//! - [`inode`] — in-memory record of one filesystem object, owning a
//!   [`filetree`] and an ACL.
//! - [`dentry`] — named edges inside a directory inode.
//! - [`mount`] — the mount table and the [`mount::DentryRef`]/
//!   [`mount::InodeRef`] reference-carrying triples.
//! - [`resolver`] — path resolution: mount crossing, symlink depth cap,
//!   `.`/`..` handling.
//! - [`filesystem`] — the [`filesystem::FileSystemDriver`] trait and the
//!   per-filesystem inode map.
//! - [`file`] — open file descriptions (offset, flags, refcount).
//! - [`filetree`] — the page-granular file cache shared by every driver
//!   that doesn't supply its own `pread`/`pwrite`.
//! - [`gxfs`] — the reference on-disk filesystem: free-list block
//!   allocator, a 512-fanout block-pointer tree, and a tagged-record inode
//!   format.
//! - [`iso9660`] — a read-only ISO9660 driver with Rock Ridge `NM`/`SP`
//!   extensions.
//! - [`block`] — the [`block::BlockDevice`] trait drivers are built on, plus
//!   in-memory and file-backed test doubles.
//! - [`sync`] — the two-lock ordering discipline link/rename/mount need.
//! - [`error`] — the crate-wide [`error::Error`] taxonomy.
//! - [`lru`] — a small generic LRU cache, shared by the file tree's page
//!   cache.

pub mod block;
pub mod dentry;
pub mod error;
pub mod file;
pub mod filesystem;
pub mod filetree;
pub mod gxfs;
pub mod inode;
pub mod iso9660;
pub mod lru;
pub mod mount;
pub mod resolver;
pub mod sync;

pub use error::{Error, Result};
