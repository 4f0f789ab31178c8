//! ISO9660 directory record parsing, with Rock Ridge (SUSP) name overrides
//! (SPEC_FULL.md §4.6, §4.6A; grounded on `ISODirentHeader`/`SUSPHeader`/
//! `SUSP_SP` in `original_source/modules/isofs/isofs.h`).

use crate::error::{Error, Result};

const DIRENT_HEADER_LEN: usize = 33; // up to and including filenameLen
pub const FLAG_DIRECTORY: u8 = 0x02;

pub struct DirentHeader {
    pub record_len: u8,
    pub start_lba: u32,
    pub file_size: u32,
    pub flags: u8,
    pub filename_len: u8,
}

impl DirentHeader {
    /// Parses one directory-record header from the start of `buf`. `buf`
    /// must contain at least `record_len` bytes once `record_len` (the
    /// first byte) is known.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < DIRENT_HEADER_LEN {
            return Err(Error::Corrupted("isofs: short directory record"));
        }
        let record_len = buf[0];
        let start_lba = u32::from_le_bytes(buf[2..6].try_into().unwrap());
        let file_size = u32::from_le_bytes(buf[10..14].try_into().unwrap());
        let flags = buf[25];
        let filename_len = buf[32];
        Ok(Self {
            record_len,
            start_lba,
            file_size,
            flags,
            filename_len,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    /// Byte offset, within the record, where the filename starts.
    pub fn name_offset(&self) -> usize {
        DIRENT_HEADER_LEN
    }

    /// Byte offset, within the record, where the System Use Area (SUSP
    /// records, including Rock Ridge `NM`) begins: the filename padded to
    /// an even length.
    pub fn susp_offset(&self) -> usize {
        let name_end = self.name_offset() + self.filename_len as usize;
        name_end + (name_end % 2)
    }
}

/// Reads the raw ISO9660 base name (before any Rock Ridge override),
/// stripping the trailing `;1` version suffix ISO9660 Level 1 mandates.
pub fn base_name(record: &[u8], header: &DirentHeader) -> Result<String> {
    let start = header.name_offset();
    let end = start + header.filename_len as usize;
    if end > record.len() {
        return Err(Error::Corrupted("isofs: filename runs past record"));
    }
    let raw = std::str::from_utf8(&record[start..end]).map_err(|_| Error::Corrupted("isofs: non-UTF8 filename"))?;
    Ok(raw.split(';').next().unwrap_or(raw).to_string())
}

/// One entry discovered while scanning a directory's extent.
pub struct Entry {
    pub name: String,
    pub lba: u32,
    pub size: u32,
    pub is_directory: bool,
}

/// Scans a directory's contiguous extent (`lba`, `size` bytes, `block_size`
/// per sector) and returns every real child, skipping the synthetic `.`/`..`
/// self-records the resolver already handles (SPEC_FULL.md §4.2). Applies a
/// Rock Ridge `NM` override name when present, per `bskip` established by the
/// volume-wide `SP` record (SPEC_FULL.md §4.6A).
pub fn scan_directory(data: &[u8], rock_ridge_bskip: Option<u8>, case_fold: bool) -> Result<Vec<Entry>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    let mut seen_self_and_parent = 0u8;
    while pos < data.len() {
        let record_len = data[pos];
        if record_len == 0 {
            // Padding to the next sector boundary.
            let next_sector = (pos / pvd_sector_size()) + 1;
            pos = next_sector * pvd_sector_size();
            continue;
        }
        if pos + record_len as usize > data.len() {
            break;
        }
        let record = &data[pos..pos + record_len as usize];
        let header = DirentHeader::decode(record)?;

        if seen_self_and_parent < 2 && header.filename_len == 1 {
            let b = record[header.name_offset()];
            if b == 0x00 || b == 0x01 {
                seen_self_and_parent += 1;
                pos += record_len as usize;
                continue;
            }
        }

        let mut name = base_name(record, &header)?;
        let susp_start = header.susp_offset();
        let rr_name = rock_ridge_bskip.and_then(|bskip| {
            if susp_start < record.len() {
                super::rockridge::find_nm_name(&record[susp_start..], bskip)
            } else {
                None
            }
        });
        match rr_name {
            Some(rr_name) => name = rr_name,
            None if case_fold => name = name.to_ascii_lowercase(),
            None => {}
        }

        out.push(Entry {
            name,
            lba: header.start_lba,
            size: header.file_size,
            is_directory: header.is_directory(),
        });
        pos += record_len as usize;
    }
    Ok(out)
}

fn pvd_sector_size() -> usize {
    super::pvd::SECTOR_SIZE
}
