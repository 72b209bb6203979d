//! Rendering of counter-allocated record ids.
//!
//! In-process backends allocate ids from a per-store counter and render
//! them in lowercase hexadecimal. Only the canonical spelling decodes, so
//! `"a"` and `"0a"` never alias the same record.

/// Renders a sequence number as a record id.
pub fn encode(seq: u64) -> String {
    format!("{seq:x}")
}

/// Parses a canonical hexadecimal record id.
pub fn decode(id: &str) -> Option<u64> {
    if id.is_empty() || (id.len() > 1 && id.starts_with('0')) {
        return None;
    }
    if !id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return None;
    }
    u64::from_str_radix(id, 16).ok()
}
