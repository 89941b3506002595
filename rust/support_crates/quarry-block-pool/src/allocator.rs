use std::sync::{Arc, Mutex};

use quarry_budget_tracker::{AllocationError, RamBudget};

/// Hands out fixed-size blocks and takes them back for reuse.
///
/// The allocator is a cheap handle: clones share the same free list. Blocks that are
/// handed out count as *used* memory of the budget, blocks parked on the free list
/// count as *idle* memory until they are reused or released with
/// [`free_idle`](Self::free_idle).
pub struct BlockAllocator<T> {
    inner: Arc<AllocatorInner<T>>,
}

struct AllocatorInner<T> {
    block_len: usize,
    budget: RamBudget,
    free: Mutex<Vec<Box<[T]>>>,
}

impl<T: Copy + Default> BlockAllocator<T> {
    pub fn new(block_len: usize, budget: RamBudget) -> BlockAllocator<T> {
        assert!(block_len > 0);
        BlockAllocator {
            inner: Arc::new(AllocatorInner {
                block_len,
                budget,
                free: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns a block, reusing a recycled one when available.
    ///
    /// Recycled blocks keep whatever content their previous owner left behind,
    /// callers that rely on zeroed memory must clear the blocks before recycling
    /// them.
    pub fn take_block(&self) -> Result<Box<[T]>, AllocationError> {
        let recycled = self.free_list().pop();
        if let Some(block) = recycled {
            self.inner.budget.reuse(self.block_bytes());
            return Ok(block);
        }
        self.inner.budget.reserve(self.block_bytes())?;
        Ok(vec![T::default(); self.inner.block_len].into_boxed_slice())
    }

    /// Parks the given blocks on the free list.
    pub fn recycle_blocks(&self, blocks: impl IntoIterator<Item = Box<[T]>>) {
        let mut free = self.free_list();
        let before = free.len();
        for block in blocks {
            debug_assert_eq!(block.len(), self.inner.block_len);
            free.push(block);
        }
        let count = (free.len() - before) as u64;
        drop(free);
        self.inner.budget.park(count * self.block_bytes());
    }

    /// Drops up to `max_blocks` idle blocks, returning how many were freed.
    pub fn free_idle(&self, max_blocks: usize) -> usize {
        let mut free = self.free_list();
        let count = max_blocks.min(free.len());
        let keep = free.len() - count;
        free.truncate(keep);
        drop(free);
        self.inner.budget.release_idle(count as u64 * self.block_bytes());
        count
    }

    pub fn idle_blocks(&self) -> usize {
        self.free_list().len()
    }

    pub fn idle_bytes(&self) -> u64 {
        self.idle_blocks() as u64 * self.block_bytes()
    }

    /// Number of elements in one block.
    pub fn block_len(&self) -> usize {
        self.inner.block_len
    }

    /// Size of one block in bytes.
    pub fn block_bytes(&self) -> u64 {
        (self.inner.block_len * std::mem::size_of::<T>()) as u64
    }

    pub fn budget(&self) -> &RamBudget {
        &self.inner.budget
    }

    fn free_list(&self) -> std::sync::MutexGuard<'_, Vec<Box<[T]>>> {
        // A poisoned free list only means another thread panicked while pushing or
        // popping blocks; the vector itself is still valid.
        self.inner
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T> Clone for BlockAllocator<T> {
    fn clone(&self) -> Self {
        BlockAllocator {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for BlockAllocator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockAllocator")
            .field("block_len", &self.inner.block_len)
            .finish_non_exhaustive()
    }
}

impl<T> Drop for AllocatorInner<T> {
    fn drop(&mut self) {
        let free = self
            .free
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let bytes = free.len() * self.block_len * std::mem::size_of::<T>();
        free.clear();
        self.budget.release_idle(bytes as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_and_recycle_accounting() {
        let budget = RamBudget::unlimited();
        let allocator = BlockAllocator::<u32>::new(256, budget.clone());
        let a = allocator.take_block().unwrap();
        let b = allocator.take_block().unwrap();
        assert_eq!(budget.used(), 2 * 1024);
        allocator.recycle_blocks([a, b]);
        assert_eq!((budget.used(), budget.idle()), (0, 2 * 1024));
        assert_eq!(allocator.idle_blocks(), 2);

        let c = allocator.take_block().unwrap();
        assert_eq!((budget.used(), budget.idle()), (1024, 1024));
        assert_eq!(c.len(), 256);
        allocator.recycle_blocks(std::iter::once(c));
        assert_eq!(allocator.free_idle(5), 2);
        assert_eq!((budget.used(), budget.idle()), (0, 0));
    }

    #[test]
    fn test_hard_limit_fails_fresh_blocks_only() {
        let budget = RamBudget::with_hard_limit(2048);
        let allocator = BlockAllocator::<u8>::new(1024, budget.clone());
        let a = allocator.take_block().unwrap();
        let _b = allocator.take_block().unwrap();
        assert!(allocator.take_block().is_err());
        allocator.recycle_blocks([a]);
        // The parked block can still be handed out again.
        assert!(allocator.take_block().is_ok());
    }

    #[test]
    fn test_drop_releases_idle_blocks() {
        let budget = RamBudget::unlimited();
        {
            let allocator = BlockAllocator::<u16>::new(64, budget.clone());
            let blocks = (0..3)
                .map(|_| allocator.take_block().unwrap())
                .collect::<Vec<_>>();
            allocator.recycle_blocks(blocks);
            assert_eq!(budget.idle(), 3 * 128);
        }
        assert_eq!((budget.used(), budget.idle()), (0, 0));
    }
}
