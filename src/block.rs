//! Block I/O surface and the typed, must-commit-or-discard write guard
//! (SPEC_FULL.md §1 Platform note, §4.5A).
//!
//! Grounded on `keos::fs::Disk` (byte-addressable wrapper over a raw block
//! device) and `access_control::BlockPointsTo`/`BlockPointsToWriteGuard`
//! (typed view over a raw `[u8; 4096]` that panics on `Drop` unless
//! submitted). The teacher casts a raw pointer into the block buffer under
//! an unsafe `MetaData` trait; since this crate has no guarantee of running
//! on the same architecture as the image it opens, on-disk structs here
//! serialize through explicit little-endian field reads/writes instead of a
//! pointer cast, but the "guard panics unless you commit" discipline is kept
//! intact.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Size in bytes of every block this crate reads or writes, on every driver.
pub const BLOCK_SIZE: usize = 4096;

/// Abstract block-addressable storage, supplied by the kernel integrator.
/// The external "Block I/O" collaborator named in SPEC_FULL.md §2.
pub trait BlockDevice: Send + Sync {
    /// Total number of `BLOCK_SIZE`-byte blocks in the device.
    fn block_count(&self) -> u64;

    /// Reads exactly one block at `index` into `buf` (which must be
    /// `BLOCK_SIZE` bytes long).
    fn read_block(&self, index: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes exactly one block at `index` from `buf` (which must be
    /// `BLOCK_SIZE` bytes long).
    fn write_block(&self, index: u64, buf: &[u8]) -> io::Result<()>;

    /// Reads raw bytes at an arbitrary byte offset (used for the GXFS
    /// superblock, which lives at a fixed byte offset rather than a block
    /// index, and for ISO9660's 2 KiB sectors).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes raw bytes at an arbitrary byte offset.
    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()>;
}

/// An in-memory block device, used by unit and integration tests.
pub struct MemDisk {
    data: Mutex<Vec<u8>>,
}

impl MemDisk {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            data: Mutex::new(vec![0u8; size_bytes]),
        }
    }

    pub fn zeroed_blocks(block_count: u64) -> Self {
        Self::new(block_count as usize * BLOCK_SIZE)
    }
}

impl BlockDevice for MemDisk {
    fn block_count(&self) -> u64 {
        (self.data.lock().len() / BLOCK_SIZE) as u64
    }

    fn read_block(&self, index: u64, buf: &mut [u8]) -> io::Result<()> {
        self.read_at(index * BLOCK_SIZE as u64, buf)
    }

    fn write_block(&self, index: u64, buf: &[u8]) -> io::Result<()> {
        self.write_at(index * BLOCK_SIZE as u64, buf)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let data = self.data.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of disk"));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let mut data = self.data.lock();
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "write past end of disk"));
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }
}

/// A block device backed by a regular host file, for on-disk integration
/// tests (remount round-trips).
pub struct FileDisk {
    file: Mutex<std::fs::File>,
    block_count: u64,
}

impl FileDisk {
    pub fn open(file: std::fs::File, block_count: u64) -> Self {
        Self {
            file: Mutex::new(file),
            block_count,
        }
    }
}

impl BlockDevice for FileDisk {
    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_block(&self, index: u64, buf: &mut [u8]) -> io::Result<()> {
        self.read_at(index * BLOCK_SIZE as u64, buf)
    }

    fn write_block(&self, index: u64, buf: &[u8]) -> io::Result<()> {
        self.write_at(index * BLOCK_SIZE as u64, buf)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> io::Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)
    }
}

/// Marker for structs this crate is willing to (de)serialize as a fixed-size
/// on-disk record. Sealed so only this crate's disk-layout types implement
/// it, mirroring the teacher's `Private`-sealed `MetaData` trait.
mod private {
    pub trait Sealed {}
}
pub(crate) use private::Sealed;

/// A fixed-size on-disk struct that can be read from and written to a raw
/// block buffer. Implementors live in `gxfs::record` and `iso9660::pvd`.
pub trait OnDiskStruct: Sized + Sealed {
    /// Encoded size in bytes; must not exceed [`BLOCK_SIZE`].
    const SIZE: usize;

    fn decode(buf: &[u8]) -> Result<Self>;
    fn encode(&self, buf: &mut [u8]);
}

/// A shared, lockable in-memory copy of one on-disk block, read once and
/// cached. Grounded on the teacher's metadata block cache
/// (`FastFileSystemInner::blocks: SpinLock<LRUCache<LBA, Arc<SpinLock<[u8;
/// 4096]>>, 512>>`).
pub type SharedBlock = Arc<Mutex<[u8; BLOCK_SIZE]>>;

/// Reads one block straight from the device into a freshly allocated
/// [`SharedBlock`]. Callers needing caching wrap this with an
/// [`crate::lru::LruCache`] keyed on block index, as the GXFS and ISO9660
/// drivers both do.
pub fn read_shared_block(dev: &dyn BlockDevice, index: u64) -> Result<SharedBlock> {
    let mut buf = [0u8; BLOCK_SIZE];
    dev.read_block(index, &mut buf).map_err(Error::from)?;
    Ok(Arc::new(Mutex::new(buf)))
}

/// A typed read-only view over one field range of a cached block.
pub struct BlockReadGuard<'a, T: OnDiskStruct> {
    decoded: T,
    _marker: std::marker::PhantomData<&'a ()>,
}

impl<'a, T: OnDiskStruct> BlockReadGuard<'a, T> {
    pub fn load(block: &SharedBlock) -> Result<Self> {
        let buf = block.lock();
        Ok(Self {
            decoded: T::decode(&buf[..])?,
            _marker: std::marker::PhantomData,
        })
    }

    pub fn get(&self) -> &T {
        &self.decoded
    }
}

/// A typed read-write view over a cached block. Must be consumed by
/// [`BlockWriteGuard::commit`] or [`BlockWriteGuard::discard`]; dropping it
/// unconsumed is a bug and panics, the direct analogue of the teacher's
/// `BlockPointsToWriteGuard` Drop discipline.
pub struct BlockWriteGuard<T: OnDiskStruct> {
    block: SharedBlock,
    value: T,
    resolved: bool,
}

impl<T: OnDiskStruct> BlockWriteGuard<T> {
    pub fn new(block: SharedBlock, value: T) -> Self {
        Self {
            block,
            value,
            resolved: false,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Serializes the current value back into the shared block buffer.
    pub fn commit(mut self) -> Result<()> {
        {
            let mut buf = self.block.lock();
            self.value.encode(&mut buf[..]);
        }
        self.resolved = true;
        Ok(())
    }

    /// Drops the guard without writing anything back. Used when a caller
    /// decided mid-operation that the in-memory change should not reach
    /// disk (e.g. a failed tree grow that must not leave the superblock's
    /// `used_blocks` bumped).
    pub fn discard(mut self) {
        self.resolved = true;
    }
}

impl<T: OnDiskStruct> Drop for BlockWriteGuard<T> {
    fn drop(&mut self) {
        if !self.resolved && !std::thread::panicking() {
            panic!("BlockWriteGuard dropped without commit() or discard()");
        }
    }
}
