//! Variable-length integer encoding on top of `std::io`.
//!
//! Integers are written 7 bits per byte, least significant group first; the high
//! bit of a byte is set when more bytes follow.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

/// Maximum encoded length of a `u32`.
pub const MAX_VINT_LEN: usize = 5;

/// Maximum encoded length of a `u64`.
pub const MAX_VLONG_LEN: usize = 10;

pub trait DataOutput: Write {
    #[inline]
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_u8(byte)
    }

    #[inline]
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)
    }

    fn write_vint(&mut self, mut value: u32) -> io::Result<()> {
        while value & !0x7f != 0 {
            self.write_u8(((value & 0x7f) | 0x80) as u8)?;
            value >>= 7;
        }
        self.write_u8(value as u8)
    }

    fn write_vlong(&mut self, mut value: u64) -> io::Result<()> {
        while value & !0x7f != 0 {
            self.write_u8(((value & 0x7f) | 0x80) as u8)?;
            value >>= 7;
        }
        self.write_u8(value as u8)
    }
}

impl<W: Write + ?Sized> DataOutput for W {}

pub trait DataInput: Read {
    #[inline]
    fn read_byte(&mut self) -> io::Result<u8> {
        self.read_u8()
    }

    #[inline]
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.read_exact(buf)
    }

    fn read_vint(&mut self) -> io::Result<u32> {
        let mut result = 0u32;
        for i in 0..MAX_VINT_LEN {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7f) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(io::Error::new(io::ErrorKind::InvalidData, "vint too long"))
    }

    fn read_vlong(&mut self) -> io::Result<u64> {
        let mut result = 0u64;
        for i in 0..MAX_VLONG_LEN {
            let byte = self.read_u8()?;
            result |= ((byte & 0x7f) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(io::Error::new(io::ErrorKind::InvalidData, "vlong too long"))
    }
}

impl<R: Read + ?Sized> DataInput for R {}

/// A reading position over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct SliceCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceCursor { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        debug_assert!(pos <= data.len());
        SliceCursor { data, pos }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Borrows the next `len` bytes without copying.
    pub fn take(&mut self, len: usize) -> io::Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

impl Read for SliceCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vint_layout() {
        let mut out = Vec::new();
        out.write_vint(0).unwrap();
        out.write_vint(127).unwrap();
        out.write_vint(128).unwrap();
        out.write_vint(16384).unwrap();
        assert_eq!(out, [0x00, 0x7f, 0x80, 0x01, 0x80, 0x80, 0x01]);
    }

    #[test]
    fn test_extremes() {
        let mut out = Vec::new();
        out.write_vint(u32::MAX).unwrap();
        out.write_vlong(u64::MAX).unwrap();
        assert_eq!(out.len(), MAX_VINT_LEN + MAX_VLONG_LEN);
        let mut cursor = SliceCursor::new(&out);
        assert_eq!(cursor.read_vint().unwrap(), u32::MAX);
        assert_eq!(cursor.read_vlong().unwrap(), u64::MAX);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_truncated_input() {
        let mut cursor = SliceCursor::new(&[0x80, 0x80]);
        let err = cursor.read_vint().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut cursor = SliceCursor::new(&[0xff; 6]);
        let err = cursor.read_vint().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_take_borrows() {
        let data = [1u8, 2, 3, 4];
        let mut cursor = SliceCursor::at(&data, 1);
        assert_eq!(SliceCursor::take(&mut cursor, 2).unwrap(), &[2, 3]);
        assert_eq!(cursor.position(), 3);
        assert!(SliceCursor::take(&mut cursor, 2).is_err());
        assert_eq!(cursor.read_byte().unwrap(), 4);
    }
}
