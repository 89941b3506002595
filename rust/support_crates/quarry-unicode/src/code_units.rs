//! Classification of UTF-16 code units.
//!
//! Term text is stored as UTF-16 in the char pool, terminated by
//! [`TERM_TERMINATOR`]. That value is a noncharacter, so it never appears in
//! valid input and is replaced by [`REPLACEMENT_CHAR`] if it does.

/// Marks the end of a term's text inside the char pool.
pub const TERM_TERMINATOR: u16 = 0xFFFF;

/// Substituted for unpaired surrogates and embedded terminators.
pub const REPLACEMENT_CHAR: u16 = 0xFFFD;

pub const LEAD_SURROGATE_START: u16 = 0xD800;
pub const LEAD_SURROGATE_END: u16 = 0xDBFF;
pub const TRAIL_SURROGATE_START: u16 = 0xDC00;
pub const TRAIL_SURROGATE_END: u16 = 0xDFFF;

#[inline]
pub fn is_lead_surrogate(unit: u16) -> bool {
    (LEAD_SURROGATE_START..=LEAD_SURROGATE_END).contains(&unit)
}

#[inline]
pub fn is_trail_surrogate(unit: u16) -> bool {
    (TRAIL_SURROGATE_START..=TRAIL_SURROGATE_END).contains(&unit)
}

/// Encodes `text` as UTF-16 code units.
pub fn to_utf16(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

/// Returns the length of `text` up to (excluding) the first terminator.
pub fn terminated_len(text: &[u16]) -> usize {
    text.iter()
        .position(|&unit| unit == TERM_TERMINATOR)
        .unwrap_or(text.len())
}
