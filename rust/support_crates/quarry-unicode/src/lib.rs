//! UTF-16 code unit helpers shared by the term table and term-vector encoder.

pub mod code_units;
pub mod conversion;
