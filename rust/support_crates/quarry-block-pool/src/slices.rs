//! Byte slice chains embedded in a [`BytePool`].
//!
//! A stream starts as a [`FIRST_LEVEL_SIZE`]-byte slice. The last byte of every
//! slice holds a non-zero end marker (`16 | level`); all other bytes of a fresh
//! slice are zero. When a writer is about to overwrite a non-zero byte, the slice is
//! full: a slice of the next level is allocated, the three payload bytes preceding
//! the marker move to the new slice, and the last four bytes of the full slice are
//! replaced by the big-endian global address of the new slice.
//!
//! The logical content of a stream is the concatenation of the slice payloads. The
//! chain itself carries no end-of-stream information, readers are given the final
//! write address up front.

use std::io::{Read, Write};

use byteorder::{BigEndian, ByteOrder};
use quarry_budget_tracker::AllocationError;

use crate::{BYTE_BLOCK_SIZE, BytePool};

/// Slice size for each level.
pub const LEVEL_SIZES: [usize; 10] = [5, 14, 20, 30, 40, 40, 80, 80, 120, 200];

/// Level that follows each level; the last level repeats.
pub const NEXT_LEVEL: [usize; 10] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 9];

pub const FIRST_LEVEL_SIZE: usize = LEVEL_SIZES[0];

const END_MARKER: u8 = 16;
const LEVEL_MASK: u8 = 15;
const FORWARD_ADDRESS_LEN: usize = 4;

impl BytePool {
    /// Allocates a fresh slice of `size` bytes and returns its global address.
    pub fn new_slice(&mut self, size: usize) -> Result<usize, AllocationError> {
        self.ensure_room(size)?;
        let address = self.advance(size);
        let end = self.upto() - 1;
        self.current_mut()[end] = END_MARKER;
        Ok(address)
    }

    /// Continues the full slice whose end marker sits at `marker_address`.
    ///
    /// Returns the global address where the writer resumes in the new slice.
    pub fn alloc_slice(&mut self, marker_address: usize) -> Result<usize, AllocationError> {
        let (block, pos) = Self::split(marker_address);
        let level = (self.block(block)[pos] & LEVEL_MASK) as usize;
        let new_level = NEXT_LEVEL[level];
        let new_size = LEVEL_SIZES[new_level];

        self.ensure_room(new_size)?;
        let new_address = self.advance(new_size);
        let (new_block, new_pos) = Self::split(new_address);

        let mut carried = [0u8; 3];
        carried.copy_from_slice(&self.block(block)[pos - 3..pos]);
        BigEndian::write_u32(&mut self.block_mut(block)[pos - 3..=pos], new_address as u32);

        let target = self.block_mut(new_block);
        target[new_pos..new_pos + 3].copy_from_slice(&carried);
        target[new_pos + new_size - 1] = END_MARKER | new_level as u8;
        Ok(new_address + 3)
    }

    /// Writes `byte` at the stream cursor `address`, following or extending the
    /// chain as needed, and returns the advanced cursor.
    #[inline]
    pub fn write_slice_byte(&mut self, address: usize, byte: u8) -> Result<usize, AllocationError> {
        let mut address = address;
        if self.get(address) != 0 {
            address = self.alloc_slice(address)?;
        }
        self.set(address, byte);
        Ok(address + 1)
    }
}

/// Appends to a slice chain starting at a given write cursor.
pub struct ByteSliceWriter<'a> {
    pool: &'a mut BytePool,
    address: usize,
}

impl<'a> ByteSliceWriter<'a> {
    pub fn new(pool: &'a mut BytePool, address: usize) -> Self {
        ByteSliceWriter { pool, address }
    }

    /// Starts a new chain with a first-level slice.
    pub fn start(pool: &'a mut BytePool) -> Result<Self, AllocationError> {
        let address = pool.new_slice(FIRST_LEVEL_SIZE)?;
        Ok(ByteSliceWriter { pool, address })
    }

    /// Repositions the writer at another stream cursor.
    pub fn init(&mut self, address: usize) {
        self.address = address;
    }

    /// The current write cursor.
    pub fn address(&self) -> usize {
        self.address
    }

    pub fn write_slice_byte(&mut self, byte: u8) -> Result<(), AllocationError> {
        self.address = self.pool.write_slice_byte(self.address, byte)?;
        Ok(())
    }
}

impl Write for ByteSliceWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for &b in buf {
            self.write_slice_byte(b)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Reads a slice chain from its start address up to a known end address.
///
/// `Read` reports end of stream once `end` is reached; reading never looks past it.
pub struct ByteSliceReader<'a> {
    pool: &'a BytePool,
    level: usize,
    block: usize,
    upto: usize,
    limit: usize,
    end: usize,
}

impl<'a> ByteSliceReader<'a> {
    pub fn new(pool: &'a BytePool, start: usize, end: usize) -> Self {
        debug_assert!(end >= start);
        let (block, upto) = BytePool::split(start);
        let limit = if start + FIRST_LEVEL_SIZE >= end {
            end - (block << crate::BYTE_BLOCK_SHIFT)
        } else {
            upto + FIRST_LEVEL_SIZE - FORWARD_ADDRESS_LEN
        };
        ByteSliceReader {
            pool,
            level: 0,
            block,
            upto,
            limit,
            end,
        }
    }

    pub fn eof(&self) -> bool {
        debug_assert!(self.position() <= self.end);
        self.position() == self.end
    }

    /// Copies the remaining bytes verbatim to `out`, returning how many were copied.
    pub fn write_to<W: Write + ?Sized>(&mut self, out: &mut W) -> std::io::Result<u64> {
        let mut size = 0u64;
        loop {
            out.write_all(&self.pool.block(self.block)[self.upto..self.limit])?;
            size += (self.limit - self.upto) as u64;
            if self.block_offset() + self.limit == self.end {
                self.upto = self.limit;
                return Ok(size);
            }
            self.next_slice();
        }
    }

    fn position(&self) -> usize {
        self.block_offset() + self.upto
    }

    fn block_offset(&self) -> usize {
        self.block << crate::BYTE_BLOCK_SHIFT
    }

    fn next_slice(&mut self) {
        let block = self.pool.block(self.block);
        let next =
            BigEndian::read_u32(&block[self.limit..self.limit + FORWARD_ADDRESS_LEN]) as usize;

        self.level = NEXT_LEVEL[self.level];
        let size = LEVEL_SIZES[self.level];
        let (block, upto) = BytePool::split(next);
        self.block = block;
        self.upto = upto;
        debug_assert!(upto + size <= BYTE_BLOCK_SIZE);
        self.limit = if next + size >= self.end {
            self.end - self.block_offset()
        } else {
            upto + size - FORWARD_ADDRESS_LEN
        };
    }
}

impl Read for ByteSliceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut copied = 0;
        while copied < buf.len() && !self.eof() {
            if self.upto == self.limit {
                self.next_slice();
            }
            let available = &self.pool.block(self.block)[self.upto..self.limit];
            let n = available.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&available[..n]);
            self.upto += n;
            copied += n;
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use quarry_budget_tracker::RamBudget;

    use super::*;
    use crate::{BlockAllocator, DataInput, DataOutput};

    fn byte_pool() -> BytePool {
        BytePool::new(BlockAllocator::new(BYTE_BLOCK_SIZE, RamBudget::unlimited()))
    }

    #[test]
    fn test_chain_crosses_level_boundary() {
        let mut pool = byte_pool();
        let mut writer = ByteSliceWriter::start(&mut pool).unwrap();
        let start = writer.address();
        let data = (0u8..40).collect::<Vec<_>>();
        writer.write_all(&data).unwrap();
        let end = writer.address();
        // More than the first slice can hold: the chain moved on to later levels.
        assert!(end - start > FIRST_LEVEL_SIZE);

        let mut reader = ByteSliceReader::new(&pool, start, end);
        let mut read = Vec::new();
        reader.read_to_end(&mut read).unwrap();
        assert_eq!(read, data);
        assert!(reader.eof());
    }

    #[test]
    fn test_first_slice_holds_four_bytes() {
        let mut pool = byte_pool();
        let mut writer = ByteSliceWriter::start(&mut pool).unwrap();
        let start = writer.address();
        writer.write_all(&[1, 2, 3, 4]).unwrap();
        assert_eq!(writer.address(), start + 4);
        writer.write_all(&[5]).unwrap();
        // The fifth byte forced a second-level slice right after the first one.
        assert_eq!(writer.address(), start + FIRST_LEVEL_SIZE + 4);
        let end = writer.address();
        let mut reader = ByteSliceReader::new(&pool, start, end);
        let mut read = Vec::new();
        reader.read_to_end(&mut read).unwrap();
        assert_eq!(read, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_full_slice_ends_with_forward_address() {
        let mut pool = byte_pool();
        let mut writer = ByteSliceWriter::start(&mut pool).unwrap();
        let start = writer.address();
        writer.write_all(&[1, 2, 3, 4, 5]).unwrap();
        let forward = (1..=FORWARD_ADDRESS_LEN)
            .map(|i| pool.get(start + i))
            .collect::<Vec<_>>();
        assert_eq!(BigEndian::read_u32(&forward) as usize, start + FIRST_LEVEL_SIZE);
        // The three bytes before the old end marker moved into the new slice.
        assert_eq!(pool.get(start + FIRST_LEVEL_SIZE), 2);
        assert_eq!(pool.get(start + FIRST_LEVEL_SIZE + 3), 5);
    }

    #[test]
    fn test_interleaved_streams() {
        let mut pool = byte_pool();
        let mut cursors = Vec::new();
        let mut starts = Vec::new();
        for _ in 0..3 {
            let address = pool.new_slice(FIRST_LEVEL_SIZE).unwrap();
            starts.push(address);
            cursors.push(address);
        }
        let mut expected = vec![Vec::new(); 3];
        let mut rng = fastrand::Rng::with_seed(42);
        for i in 0..3000u32 {
            let stream = rng.usize(0..3);
            let mut writer = ByteSliceWriter::new(&mut pool, cursors[stream]);
            writer.write_vint(i).unwrap();
            cursors[stream] = writer.address();
            expected[stream].push(i);
        }
        assert!(pool.num_blocks() > 0);
        for stream in 0..3 {
            let mut reader = ByteSliceReader::new(&pool, starts[stream], cursors[stream]);
            for &value in &expected[stream] {
                assert_eq!(reader.read_vint().unwrap(), value);
            }
            assert!(reader.eof());
        }
    }

    #[test]
    fn test_write_to_copies_remaining_bytes() {
        let mut pool = byte_pool();
        let mut writer = ByteSliceWriter::start(&mut pool).unwrap();
        let start = writer.address();
        let data = (0..500).map(|i| (i % 251) as u8 + 1).collect::<Vec<_>>();
        writer.write_all(&data).unwrap();
        let end = writer.address();

        let mut reader = ByteSliceReader::new(&pool, start, end);
        assert_eq!(reader.read_byte().unwrap(), 1);
        let mut out = Vec::new();
        assert_eq!(reader.write_to(&mut out).unwrap(), 499);
        assert_eq!(out, data[1..]);
        assert!(reader.eof());
    }

    #[test]
    fn test_empty_stream() {
        let mut pool = byte_pool();
        let start = pool.new_slice(FIRST_LEVEL_SIZE).unwrap();
        let mut reader = ByteSliceReader::new(&pool, start, start);
        assert!(reader.eof());
        let mut out = Vec::new();
        assert_eq!(reader.write_to(&mut out).unwrap(), 0);
        assert!(reader.read_byte().is_err());
    }
}
