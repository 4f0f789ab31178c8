//! Free-block allocator: a singly-linked free list threaded through the
//! first 8 bytes of each free block (SPEC_FULL.md §4.5, §9 "Manual free
//! lists").
//!
//! Grounded on `modules/gxfs/block.c` (`original_source/`): allocation pops
//! the free-list head if non-empty, else extends the used-block counter;
//! freeing pushes the block back onto the head. The superblock update is
//! the allocator's dedicated critical section (SPEC_FULL.md §4.5 "the
//! superblock is updated under a dedicated allocator mutex").

use std::sync::Arc;

use parking_lot::Mutex;

use crate::block::{BlockDevice, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::gxfs::super_block::{fold_checksum, SuperBlock, BLOCK_REGION_OFFSET, NO_BLOCK, SUPERBLOCK_OFFSET};

pub struct Allocator {
    dev: Arc<dyn BlockDevice>,
    sb: Mutex<SuperBlock>,
}

impl Allocator {
    pub fn new(dev: Arc<dyn BlockDevice>, sb: SuperBlock) -> Self {
        Self {
            dev,
            sb: Mutex::new(sb),
        }
    }

    pub fn block_offset(index: u64) -> u64 {
        BLOCK_REGION_OFFSET + index * BLOCK_SIZE as u64
    }

    pub fn read_block(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        self.dev.read_at(Self::block_offset(index), buf).map_err(Error::from)
    }

    pub fn write_block(&self, index: u64, buf: &[u8]) -> Result<()> {
        self.dev.write_at(Self::block_offset(index), buf).map_err(Error::from)
    }

    pub fn total_blocks(&self) -> u64 {
        self.sb.lock().total_blocks
    }

    pub fn used_blocks(&self) -> u64 {
        self.sb.lock().used_blocks
    }

    pub fn boot_id(&self) -> [u8; 16] {
        self.sb.lock().boot_id
    }

    /// Pops from the free-list head if non-empty; else extends the
    /// used-block counter by one, failing at the total (SPEC_FULL.md
    /// §4.5). The superblock is persisted before returning.
    pub fn allocate(&self) -> Result<u64> {
        let mut sb = self.sb.lock();
        let index = if sb.free_head != NO_BLOCK {
            let head = sb.free_head;
            let mut link = [0u8; 8];
            self.dev
                .read_at(Self::block_offset(head), &mut link)
                .map_err(Error::from)?;
            sb.free_head = u64::from_le_bytes(link);
            head
        } else {
            if sb.used_blocks >= sb.total_blocks {
                return Err(Error::NoSpace);
            }
            let index = sb.used_blocks;
            sb.used_blocks += 1;
            index
        };
        self.persist(&sb)?;
        drop(sb);
        self.zero_block(index)?;
        Ok(index)
    }

    /// Zeroes `index` explicitly; part of allocation whenever the caller
    /// expects an empty block (SPEC_FULL.md §4.5).
    pub fn zero_block(&self, index: u64) -> Result<()> {
        let zeroes = [0u8; BLOCK_SIZE];
        self.write_block(index, &zeroes)
    }

    /// Pushes `index` back onto the free list head and decrements
    /// `used_blocks`'s accounting is intentionally *not* performed here:
    /// the original frees by relinking rather than shrinking the
    /// high-water mark, since blocks freed in the middle of the numbering
    /// space cannot shrink a monotonically-extended counter. Matches
    /// `modules/gxfs/block.c`'s `gxfsFreeBlock`, which only ever threads
    /// the link and updates `sbFreeHead`.
    pub fn free(&self, index: u64) -> Result<()> {
        if index == 0 {
            return Err(Error::Corrupted("gxfs: attempt to free the root block"));
        }
        let mut sb = self.sb.lock();
        self.write_block(index, &sb.free_head.to_le_bytes_padded())?;
        sb.free_head = index;
        self.persist(&sb)
    }

    fn persist(&self, sb: &SuperBlock) -> Result<()> {
        let mut buf = [0u8; BLOCK_SIZE];
        crate::block::OnDiskStruct::encode(sb, &mut buf);
        self.dev.write_at(SUPERBLOCK_OFFSET, &buf).map_err(Error::from)
    }

    /// Formats a fresh image: writes a zeroed superblock with the given
    /// capacity and allocates block 0 for the root directory.
    pub fn format(dev: Arc<dyn BlockDevice>, total_blocks: u64, boot_id: [u8; 16], format_time: i64) -> Result<Self> {
        let sb = SuperBlock {
            boot_id,
            format_time,
            total_blocks,
            used_blocks: 0,
            free_head: NO_BLOCK,
        };
        let alloc = Self::new(dev, sb);
        let root_block = alloc.allocate()?;
        debug_assert_eq!(root_block, 0, "root directory must occupy block 0");
        Ok(alloc)
    }

    pub fn load(dev: Arc<dyn BlockDevice>) -> Result<Self> {
        let mut buf = [0u8; BLOCK_SIZE];
        dev.read_at(SUPERBLOCK_OFFSET, &mut buf).map_err(Error::from)?;
        let sb: SuperBlock = crate::block::OnDiskStruct::decode(&buf)?;
        Ok(Self::new(dev, sb))
    }

    pub fn checksum_of(buf: &[u8]) -> u64 {
        fold_checksum(&buf[0..72])
    }
}

trait PadTo8 {
    fn to_le_bytes_padded(&self) -> [u8; BLOCK_SIZE];
}

impl PadTo8 for u64 {
    fn to_le_bytes_padded(&self) -> [u8; BLOCK_SIZE] {
        let mut buf = [0u8; BLOCK_SIZE];
        buf[0..8].copy_from_slice(&self.to_le_bytes());
        buf
    }
}
