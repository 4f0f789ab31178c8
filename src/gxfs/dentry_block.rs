//! In-memory directory representation: a directory's content tree holds a
//! concatenation of `DENT` records, each naming a child inode and its file
//! type (SPEC_FULL.md §4.5 "Directory representation in memory").

use crate::gxfs::record::{dent_opt_ftype, encode_record, parse_records, Record, RECORD_HEADER_LEN, TAG_DENT};
use crate::error::{Error, Result};
use crate::inode::FileType;

pub struct DirEntry {
    pub name: String,
    pub ino: u64,
    pub ftype: FileType,
}

/// Parses a directory's raw content bytes (as read out of its data tree)
/// into an ordered list of entries, skipping anything that is not a `DENT`
/// record (forward-compatible with extension records, SPEC_FULL.md §9).
pub fn parse_entries(bytes: &[u8]) -> Result<Vec<DirEntry>> {
    let mut out = Vec::new();
    for record in parse_records(bytes)? {
        if let Record::Other { tag, payload } = record {
            if tag == TAG_DENT {
                if payload.len() < 9 {
                    return Err(Error::Corrupted("gxfs: truncated DENT record"));
                }
                let ino = u64::from_le_bytes(payload[0..8].try_into().unwrap());
                let ftype = dent_opt_ftype(payload[8])?;
                let name = String::from_utf8(payload[9..].to_vec())
                    .map_err(|_| Error::Corrupted("gxfs: DENT name is not valid UTF-8"))?;
                out.push(DirEntry { name, ino, ftype });
            }
        }
    }
    Ok(out)
}

/// Serializes `entries` back into a directory's raw content bytes.
pub fn encode_entries(entries: &[DirEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    for e in entries {
        let mut payload = Vec::with_capacity(9 + e.name.len());
        payload.extend_from_slice(&e.ino.to_le_bytes());
        payload.push(u8::from(e.ftype));
        payload.extend_from_slice(e.name.as_bytes());
        buf.extend_from_slice(&encode_record(TAG_DENT, &payload));
    }
    buf
}

/// Size, in bytes, one more entry named `name` would add to a directory's
/// content stream. Used to decide whether a rename in place (same length)
/// can skip a full re-serialize.
pub fn entry_encoded_len(name: &str) -> usize {
    RECORD_HEADER_LEN + 9 + name.len()
}
