//! ISO9660 Primary Volume Descriptor (SPEC_FULL.md §4.6, grounded on
//! `original_source/modules/isofs/isofs.h`'s `ISOPrimaryVolumeDescriptor`).

use crate::error::{Error, Result};

pub const SECTOR_SIZE: usize = 2048;
pub const PVD_SECTOR: u64 = 16;
const MAGIC: &[u8; 5] = b"CD001";

/// The bytes of a PVD's embedded root directory record, enough for
/// [`crate::iso9660::dirent::DirentHeader::decode`].
pub struct PrimaryVolumeDescriptor {
    pub volume_block_count: u32,
    pub block_size: u16,
    pub root_dirent: [u8; 34],
}

impl PrimaryVolumeDescriptor {
    /// Parses one 2048-byte PVD sector.
    pub fn decode(sector: &[u8]) -> Result<Self> {
        if sector.len() < SECTOR_SIZE {
            return Err(Error::Corrupted("isofs: short PVD sector"));
        }
        if sector[0] != 1 {
            return Err(Error::Corrupted("isofs: not a primary volume descriptor"));
        }
        if &sector[1..6] != MAGIC {
            return Err(Error::Corrupted("isofs: bad ISO9660 magic"));
        }
        let volume_block_count = u32::from_le_bytes(sector[80..84].try_into().unwrap());
        let block_size = u16::from_le_bytes(sector[128..130].try_into().unwrap());
        let mut root_dirent = [0u8; 34];
        root_dirent.copy_from_slice(&sector[156..190]);
        Ok(Self {
            volume_block_count,
            block_size,
            root_dirent,
        })
    }
}
