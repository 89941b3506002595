use std::io::Write;

use crate::BlockAllocator;

/// A growable byte buffer assembled from pooled blocks.
///
/// Used for per-document output that is either committed as a whole or thrown
/// away, e.g. the term vectors of one document. Dropping or clearing the buffer
/// returns its blocks to the allocator.
pub struct BlockBuffer {
    allocator: BlockAllocator<u8>,
    blocks: Vec<Box<[u8]>>,
    len: usize,
}

impl BlockBuffer {
    pub fn new(allocator: BlockAllocator<u8>) -> BlockBuffer {
        BlockBuffer {
            allocator,
            blocks: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes of pooled memory held, including the unused tail of the last block.
    pub fn allocated_bytes(&self) -> u64 {
        self.blocks.len() as u64 * self.allocator.block_bytes()
    }

    /// Iterates over the written bytes, one block at a time.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let block_len = self.allocator.block_len();
        let len = self.len;
        self.blocks.iter().enumerate().map(move |(i, block)| {
            let start = i * block_len;
            &block[..(len - start).min(block_len)]
        })
    }

    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        for chunk in self.chunks() {
            out.write_all(chunk)?;
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Recycles all blocks and empties the buffer.
    pub fn clear(&mut self) {
        self.allocator.recycle_blocks(self.blocks.drain(..));
        self.len = 0;
    }
}

impl Write for BlockBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let block_len = self.allocator.block_len();
        let mut written = 0;
        while written < buf.len() {
            let pos = self.len % block_len;
            if pos == 0 && self.len == self.blocks.len() * block_len {
                let block = self.allocator.take_block()?;
                self.blocks.push(block);
            }
            let n = (block_len - pos).min(buf.len() - written);
            let block = self.blocks.last_mut().expect("block was just ensured");
            block[pos..pos + n].copy_from_slice(&buf[written..written + n]);
            self.len += n;
            written += n;
        }
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for BlockBuffer {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for BlockBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockBuffer")
            .field("len", &self.len)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use quarry_budget_tracker::RamBudget;

    use super::*;
    use crate::{DataOutput, PER_DOC_BLOCK_SIZE};

    #[test]
    fn test_spans_blocks() {
        let budget = RamBudget::unlimited();
        let allocator = BlockAllocator::new(PER_DOC_BLOCK_SIZE, budget.clone());
        let mut buffer = BlockBuffer::new(allocator.clone());
        let data = (0..2500).map(|i| (i % 256) as u8).collect::<Vec<_>>();
        buffer.write_bytes(&data[..1000]).unwrap();
        buffer.write_bytes(&data[1000..]).unwrap();
        assert_eq!(buffer.len(), 2500);
        assert_eq!(buffer.allocated_bytes(), 3 * 1024);
        assert_eq!(buffer.chunks().count(), 3);
        assert_eq!(buffer.to_vec(), data);

        let mut out = Vec::new();
        buffer.write_to(&mut out).unwrap();
        assert_eq!(out, data);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(allocator.idle_blocks(), 3);
        assert_eq!(budget.used(), 0);
    }

    #[test]
    fn test_exact_block_boundary() {
        let allocator = BlockAllocator::new(PER_DOC_BLOCK_SIZE, RamBudget::unlimited());
        let mut buffer = BlockBuffer::new(allocator);
        buffer.write_bytes(&[7u8; PER_DOC_BLOCK_SIZE]).unwrap();
        assert_eq!(buffer.chunks().count(), 1);
        buffer.write_byte(8).unwrap();
        let chunks = buffer.chunks().map(|c| c.len()).collect::<Vec<_>>();
        assert_eq!(chunks, [PER_DOC_BLOCK_SIZE, 1]);
    }
}
