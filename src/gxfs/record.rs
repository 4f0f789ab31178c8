//! GXFS inode record chain: tagged, variable-length records parsed out of
//! an inode block's byte stream (SPEC_FULL.md §4.5, §6).

use crate::error::{Error, Result};
use crate::inode::{FileType, Mode, Timestamp, Timestamps};

pub const TAG_ATTR: [u8; 4] = *b"ATTR";
pub const TAG_DENT: [u8; 4] = *b"DENT";
pub const TAG_TREE: [u8; 4] = *b"TREE";

/// Record header: 4-char type tag followed by a 4-byte total length
/// (header included), per SPEC_FULL.md §6.
pub const RECORD_HEADER_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct AttrRecord {
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub mode: u16,
    pub ftype: FileType,
    pub nlink: u64,
    pub ixperm: u64,
    pub oxperm: u64,
    pub dxperm: u64,
    pub timestamps: Timestamps,
}

impl AttrRecord {
    pub const PAYLOAD_LEN: usize = 8 + 4 + 4 + 2 + 1 + 1 + 8 + 8 + 8 + 8 + (8 + 4) * 4;

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::PAYLOAD_LEN {
            return Err(Error::Corrupted("gxfs: truncated ATTR record"));
        }
        let mut p = 0usize;
        macro_rules! take {
            ($n:expr) => {{
                let s = &payload[p..p + $n];
                p += $n;
                s
            }};
        }
        let size = u64::from_le_bytes(take!(8).try_into().unwrap());
        let uid = u32::from_le_bytes(take!(4).try_into().unwrap());
        let gid = u32::from_le_bytes(take!(4).try_into().unwrap());
        let mode = u16::from_le_bytes(take!(2).try_into().unwrap());
        let ftype = FileType::try_from(take!(1)[0]).map_err(|_| Error::Corrupted("gxfs: bad file type"))?;
        let _pad = take!(1);
        let nlink = u64::from_le_bytes(take!(8).try_into().unwrap());
        let ixperm = u64::from_le_bytes(take!(8).try_into().unwrap());
        let oxperm = u64::from_le_bytes(take!(8).try_into().unwrap());
        let dxperm = u64::from_le_bytes(take!(8).try_into().unwrap());
        let read_ts = |p: &mut usize, payload: &[u8]| -> Timestamp {
            let secs = i64::from_le_bytes(payload[*p..*p + 8].try_into().unwrap());
            *p += 8;
            let nanos = u32::from_le_bytes(payload[*p..*p + 4].try_into().unwrap());
            *p += 4;
            Timestamp { secs, nanos }
        };
        let atime = read_ts(&mut p, payload);
        let mtime = read_ts(&mut p, payload);
        let ctime = read_ts(&mut p, payload);
        let birthtime = read_ts(&mut p, payload);
        Ok(Self {
            size,
            uid,
            gid,
            mode,
            ftype,
            nlink,
            ixperm,
            oxperm,
            dxperm,
            timestamps: Timestamps {
                atime,
                mtime,
                ctime,
                birthtime,
            },
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::PAYLOAD_LEN);
        buf.extend_from_slice(&self.size.to_le_bytes());
        buf.extend_from_slice(&self.uid.to_le_bytes());
        buf.extend_from_slice(&self.gid.to_le_bytes());
        buf.extend_from_slice(&self.mode.to_le_bytes());
        buf.push(self.ftype.into());
        buf.push(0); // padding
        buf.extend_from_slice(&self.nlink.to_le_bytes());
        buf.extend_from_slice(&self.ixperm.to_le_bytes());
        buf.extend_from_slice(&self.oxperm.to_le_bytes());
        buf.extend_from_slice(&self.dxperm.to_le_bytes());
        let mut push_ts = |ts: Timestamp| {
            buf.extend_from_slice(&ts.secs.to_le_bytes());
            buf.extend_from_slice(&ts.nanos.to_le_bytes());
        };
        push_ts(self.timestamps.atime);
        push_ts(self.timestamps.mtime);
        push_ts(self.timestamps.ctime);
        push_ts(self.timestamps.birthtime);
        buf
    }

    pub fn mode_bits(&self) -> Mode {
        Mode::masked(self.mode)
    }
}

#[derive(Debug, Clone)]
pub struct TreeRecord {
    pub depth: u16,
    pub root_block: u64,
}

impl TreeRecord {
    pub const PAYLOAD_LEN: usize = 2 + 6 + 8; // depth + pad + root pointer

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::PAYLOAD_LEN {
            return Err(Error::Corrupted("gxfs: truncated TREE record"));
        }
        let depth = u16::from_le_bytes(payload[0..2].try_into().unwrap());
        let root_block = u64::from_le_bytes(payload[8..16].try_into().unwrap());
        Ok(Self { depth, root_block })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::PAYLOAD_LEN];
        buf[0..2].copy_from_slice(&self.depth.to_le_bytes());
        buf[8..16].copy_from_slice(&self.root_block.to_le_bytes());
        buf
    }
}

/// One parsed record plus its raw payload, from walking an inode's record
/// stream.
pub enum Record {
    Attr(AttrRecord),
    Tree(TreeRecord),
    Other { tag: [u8; 4], payload: Vec<u8> },
}

impl Record {
    /// Serializes this record back to its tag-prefixed wire form, the
    /// inverse of [`parse_records`].
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Record::Attr(a) => encode_record(TAG_ATTR, &a.encode()),
            Record::Tree(t) => encode_record(TAG_TREE, &t.encode()),
            Record::Other { tag, payload } => encode_record(*tag, payload),
        }
    }
}

/// Serializes a full record stream (used when an inode block is rewritten
/// after one of its records changes).
pub fn encode_records(records: &[Record]) -> Vec<u8> {
    let mut buf = Vec::new();
    for r in records {
        buf.extend_from_slice(&r.encode());
    }
    buf
}

/// Walks a record stream (the tail of an inode block, possibly continued
/// across chained blocks) and parses every record until the stream runs
/// out of room for another header.
pub fn parse_records(stream: &[u8]) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos + RECORD_HEADER_LEN <= stream.len() {
        let tag: [u8; 4] = stream[pos..pos + 4].try_into().unwrap();
        if tag == [0, 0, 0, 0] {
            break; // padding / end of used region
        }
        let len = u32::from_le_bytes(stream[pos + 4..pos + 8].try_into().unwrap()) as usize;
        if len < RECORD_HEADER_LEN || pos + len > stream.len() {
            return Err(Error::Corrupted("gxfs: record length out of bounds"));
        }
        let payload = &stream[pos + RECORD_HEADER_LEN..pos + len];
        let record = match tag {
            TAG_ATTR => Record::Attr(AttrRecord::decode(payload)?),
            TAG_TREE => Record::Tree(TreeRecord::decode(payload)?),
            other => Record::Other {
                tag: other,
                payload: payload.to_vec(),
            },
        };
        records.push(record);
        pos += len;
    }
    Ok(records)
}

/// Serializes one record (tag + length header + payload).
pub fn encode_record(tag: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let len = (RECORD_HEADER_LEN + payload.len()) as u32;
    let mut buf = Vec::with_capacity(len as usize);
    buf.extend_from_slice(&tag);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// A directory-block `DENT` record's opt-byte: record length (aligned to
/// 16 bytes, divided by 16) in the upper nibble, file-type tag in the
/// lower nibble (SPEC_FULL.md §4.5 "keyed on the DENT record's opt-byte").
pub fn make_dent_opt(aligned_len: usize, ftype: FileType) -> u8 {
    debug_assert!(aligned_len % 16 == 0);
    let len_units = (aligned_len / 16) as u8;
    (len_units << 4) | (u8::from(ftype) & 0x0F)
}

pub fn dent_opt_len_units(opt: u8) -> usize {
    (opt >> 4) as usize * 16
}

pub fn dent_opt_ftype(opt: u8) -> Result<FileType> {
    FileType::try_from(opt & 0x0F).map_err(|_| Error::Corrupted("gxfs: bad DENT type nibble"))
}
