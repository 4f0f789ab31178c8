//! Rock Ridge SUSP record scanning (SPEC_FULL.md §4.6A; grounded on
//! `SUSPHeader`/`SUSP_SP` in `original_source/modules/isofs/isofs.h`).
//!
//! Multi-record `NM` continuation (a name split across several `CONTINUE`-
//! flagged `NM` entries) is not implemented: only the first `NM` record's
//! payload is used, per the recorded Non-goal extension in SPEC_FULL.md
//! §4.6A.

const NM_CONTINUE_FLAG: u8 = 0x01;

/// Scans a volume's root `.` self-entry's System Use Area for an `SP`
/// record and returns its `bskip` field: the number of bytes of padding
/// every subsequent directory record's SUSP area must skip before its own
/// SUSP entries begin.
pub fn detect_bskip(self_entry_susp: &[u8]) -> u8 {
    if self_entry_susp.len() >= 7 && &self_entry_susp[0..2] == b"SP" {
        self_entry_susp[6]
    } else {
        0
    }
}

/// Scans one directory record's SUSP area for an `NM` (alternate name)
/// entry, returning its payload as a name if found.
pub fn find_nm_name(susp_area: &[u8], bskip: u8) -> Option<String> {
    let mut pos = bskip as usize;
    while pos + 4 <= susp_area.len() {
        let tag = &susp_area[pos..pos + 2];
        let len = susp_area[pos + 2] as usize;
        if len < 4 || pos + len > susp_area.len() {
            break;
        }
        if tag == b"NM" {
            let payload = &susp_area[pos + 4..pos + len];
            if !payload.is_empty() {
                let flags = payload[0];
                let name_bytes = &payload[1..];
                if flags & NM_CONTINUE_FLAG == 0 || !name_bytes.is_empty() {
                    if let Ok(name) = std::str::from_utf8(name_bytes) {
                        return Some(name.to_string());
                    }
                }
            }
        }
        pos += len;
    }
    None
}
