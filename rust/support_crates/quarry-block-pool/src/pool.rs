use quarry_budget_tracker::AllocationError;

use crate::{BYTE_BLOCK_SHIFT, BlockAllocator, CHAR_BLOCK_SHIFT, INT_BLOCK_SHIFT};

pub type BytePool = BlockPool<u8, BYTE_BLOCK_SHIFT>;
pub type CharPool = BlockPool<u16, CHAR_BLOCK_SHIFT>;
pub type IntPool = BlockPool<u32, INT_BLOCK_SHIFT>;

/// An append-only arena of `1 << SHIFT`-element blocks.
///
/// Writers fill the current (last) block up to its end and then call
/// [`next_block`](Self::next_block); the pool itself performs no bounds checks
/// beyond the regular slice indexing, so writing past the current block is a
/// programming error. Data is addressed with global offsets
/// `(block_index << SHIFT) | offset_in_block`.
pub struct BlockPool<T: Copy + Default, const SHIFT: u32> {
    allocator: BlockAllocator<T>,
    blocks: Vec<Box<[T]>>,
    /// Write cursor inside the current block. Equals the block size when the pool
    /// holds no block yet, so that the first write check requests one.
    upto: usize,
}

impl<T: Copy + Default, const SHIFT: u32> BlockPool<T, SHIFT> {
    pub const BLOCK_SIZE: usize = 1 << SHIFT;
    pub const BLOCK_MASK: usize = Self::BLOCK_SIZE - 1;

    pub fn new(allocator: BlockAllocator<T>) -> Self {
        assert_eq!(allocator.block_len(), Self::BLOCK_SIZE);
        BlockPool {
            allocator,
            blocks: Vec::new(),
            upto: Self::BLOCK_SIZE,
        }
    }

    /// Appends a new current block and resets the cursor to its start.
    pub fn next_block(&mut self) -> Result<(), AllocationError> {
        let block = self.allocator.take_block()?;
        self.blocks.push(block);
        self.upto = 0;
        Ok(())
    }

    /// Makes sure the current block has room for `len` more elements.
    pub fn ensure_room(&mut self, len: usize) -> Result<(), AllocationError> {
        debug_assert!(len <= Self::BLOCK_SIZE);
        if self.remaining() < len {
            self.next_block()?;
        }
        Ok(())
    }

    /// Cursor within the current block.
    #[inline]
    pub fn upto(&self) -> usize {
        self.upto
    }

    /// Free elements left in the current block.
    #[inline]
    pub fn remaining(&self) -> usize {
        Self::BLOCK_SIZE - self.upto
    }

    /// Moves the cursor forward by `len` elements, returning the global address of
    /// the first of them.
    #[inline]
    pub fn advance(&mut self, len: usize) -> usize {
        debug_assert!(len <= self.remaining());
        let address = self.address();
        self.upto += len;
        address
    }

    /// Global offset of the start of the current block.
    #[inline]
    pub fn offset(&self) -> usize {
        self.blocks.len().saturating_sub(1) << SHIFT
    }

    /// Global address of the cursor.
    #[inline]
    pub fn address(&self) -> usize {
        self.offset() + self.upto
    }

    #[inline]
    pub fn split(address: usize) -> (usize, usize) {
        (address >> SHIFT, address & Self::BLOCK_MASK)
    }

    pub fn current(&self) -> &[T] {
        self.blocks.last().expect("pool has no current block")
    }

    pub fn current_mut(&mut self) -> &mut [T] {
        self.blocks.last_mut().expect("pool has no current block")
    }

    pub fn block(&self, index: usize) -> &[T] {
        &self.blocks[index]
    }

    pub fn block_mut(&mut self, index: usize) -> &mut [T] {
        &mut self.blocks[index]
    }

    #[inline]
    pub fn get(&self, address: usize) -> T {
        let (block, pos) = Self::split(address);
        self.blocks[block][pos]
    }

    #[inline]
    pub fn set(&mut self, address: usize, value: T) {
        let (block, pos) = Self::split(address);
        self.blocks[block][pos] = value;
    }

    /// Returns the rest of the block holding `address`, starting at `address`.
    #[inline]
    pub fn tail(&self, address: usize) -> &[T] {
        let (block, pos) = Self::split(address);
        &self.blocks[block][pos..]
    }

    /// Copies `values` to the cursor and advances past them; the caller must have
    /// ensured there is room.
    pub fn append(&mut self, values: &[T]) -> usize {
        let start = self.upto;
        self.current_mut()[start..start + values.len()].copy_from_slice(values);
        self.advance(values.len())
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes held by this pool.
    pub fn allocated_bytes(&self) -> u64 {
        self.blocks.len() as u64 * self.allocator.block_bytes()
    }

    pub fn allocator(&self) -> &BlockAllocator<T> {
        &self.allocator
    }

    /// Returns every block to the allocator and rewinds the pool.
    ///
    /// The written part of each block is cleared first: byte slices rely on zeroed
    /// memory to recognize their end markers.
    pub fn reset(&mut self) {
        if self.blocks.is_empty() {
            return;
        }
        let last = self.blocks.len() - 1;
        for (i, block) in self.blocks.iter_mut().enumerate() {
            let used = if i == last { self.upto } else { block.len() };
            block[..used].fill(T::default());
        }
        self.allocator.recycle_blocks(self.blocks.drain(..));
        self.upto = Self::BLOCK_SIZE;
    }
}

impl<T: Copy + Default, const SHIFT: u32> Drop for BlockPool<T, SHIFT> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: Copy + Default, const SHIFT: u32> std::fmt::Debug for BlockPool<T, SHIFT> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockPool")
            .field("blocks", &self.blocks.len())
            .field("upto", &self.upto)
            .finish()
    }
}
