//! Error taxonomy surfaced by every VFS operation (SPEC_FULL.md §6, §7).
//!
//! Mirrors the teacher's `KernelError` (`keos::lib`) in shape: one flat,
//! exhaustive enum instead of a per-thread errno slot, propagated with `?`.

use thiserror::Error;

/// The VFS core's error taxonomy. Every fallible operation in this crate
/// returns `Result<_, Error>` rather than setting a side-channel error slot.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no such entry")]
    NoEntry,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("permission denied")]
    Access,
    #[error("too many levels of symbolic links")]
    Loop,
    #[error("resource busy")]
    Busy,
    #[error("entry already exists")]
    Exists,
    #[error("cross-device link")]
    CrossDevice,
    #[error("directory not empty")]
    NotEmpty,
    #[error("no space left on device")]
    NoSpace,
    #[error("filesystem is read-only")]
    ReadOnly,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid argument")]
    Invalid,
    #[error("operation not permitted")]
    Permission,
    #[error("numeric overflow")]
    Overflow,
    #[error("filesystem corrupted: {0}")]
    Corrupted(&'static str),
}

impl Error {
    /// Logs the error at an appropriate level and returns it unchanged, so
    /// call sites can write `return Err(Error::NoSpace.logged("gxfs: alloc"))`.
    #[track_caller]
    pub fn logged(self, context: &str) -> Self {
        match &self {
            Error::Io(_) | Error::Corrupted(_) => log::error!("{context}: {self}"),
            Error::Busy | Error::NoSpace => log::warn!("{context}: {self}"),
            _ => log::debug!("{context}: {self}"),
        }
        self
    }
}

pub type Result<T> = std::result::Result<T, Error>;
