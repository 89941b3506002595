//! Fixed-size block pools backing the in-memory postings of the indexer.
//!
//! All term data lives in three kinds of pools:
//!
//! - [`CharPool`]: UTF-16 term text, each term terminated by a sentinel code unit;
//! - [`IntPool`]: per-term stream write cursors;
//! - [`BytePool`]: the postings streams themselves, stored as chains of byte
//!   slices (see [`slices`]).
//!
//! Every pool takes its blocks from a [`BlockAllocator`], which keeps a shared free
//! list of recycled blocks and charges memory to a
//! [`RamBudget`](quarry_budget_tracker::RamBudget). Positions inside a pool are
//! addressed by a single integer, `(block_index << SHIFT) | offset_in_block`.

pub mod allocator;
pub mod block_buffer;
pub mod data_io;
pub mod pool;
pub mod slices;

pub use allocator::BlockAllocator;
pub use block_buffer::BlockBuffer;
pub use data_io::{DataInput, DataOutput, SliceCursor};
pub use pool::{BlockPool, BytePool, CharPool, IntPool};
pub use slices::{ByteSliceReader, ByteSliceWriter};

pub const BYTE_BLOCK_SHIFT: u32 = 15;
pub const BYTE_BLOCK_SIZE: usize = 1 << BYTE_BLOCK_SHIFT;

pub const CHAR_BLOCK_SHIFT: u32 = 14;
pub const CHAR_BLOCK_SIZE: usize = 1 << CHAR_BLOCK_SHIFT;

pub const INT_BLOCK_SHIFT: u32 = 13;
pub const INT_BLOCK_SIZE: usize = 1 << INT_BLOCK_SHIFT;

/// Block size of the per-document buffers (term vectors of a single document).
pub const PER_DOC_BLOCK_SIZE: usize = 1024;
