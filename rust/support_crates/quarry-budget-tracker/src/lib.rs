//! Process-wide RAM accounting for pooled buffers.
//!
//! A [`RamBudget`] tracks two quantities:
//!
//! - **used** bytes: memory currently held by live pools, hash tables, postings
//!   arrays and per-document buffers;
//! - **idle** bytes: recycled blocks parked on free lists, ready for reuse.
//!
//! Optionally, `used + idle` is capped by a hard limit. Reserving fresh memory
//! beyond that limit fails with [`AllocationError`], which callers treat as an
//! out-of-memory condition. Moving a block between a pool and a free list
//! (`reuse` / `park`) never fails and never changes `used + idle`.

use std::sync::Arc;

use counter::Counter;

pub mod counter;

/// Shared handle to the RAM accounting of one indexing engine.
#[derive(Clone)]
pub struct RamBudget(Arc<RamBudgetNode>);

impl RamBudget {
    /// Creates a budget without a hard limit.
    pub fn unlimited() -> RamBudget {
        RamBudget(Arc::new(RamBudgetNode {
            remaining: None,
            hard_limit: None,
            used: Counter::new(0),
            idle: Counter::new(0),
        }))
    }

    /// Creates a budget where `used + idle` may never exceed `limit` bytes.
    pub fn with_hard_limit(limit: u64) -> RamBudget {
        RamBudget(Arc::new(RamBudgetNode {
            remaining: Some(Counter::new(limit)),
            hard_limit: Some(limit),
            used: Counter::new(0),
            idle: Counter::new(0),
        }))
    }

    /// Bytes held by live structures.
    pub fn used(&self) -> u64 {
        self.0.used.read()
    }

    /// Bytes held by free lists.
    pub fn idle(&self) -> u64 {
        self.0.idle.read()
    }

    pub fn hard_limit(&self) -> Option<u64> {
        self.0.hard_limit
    }

    /// Remaining headroom under the hard limit, `None` when unlimited.
    ///
    /// **Note**: diagnostic only, the value may be stale in a concurrent environment.
    pub fn remaining(&self) -> Option<u64> {
        self.0.remaining.as_ref().map(Counter::read)
    }

    /// Charges `bytes` of freshly allocated memory as used.
    pub fn reserve(&self, bytes: u64) -> Result<(), AllocationError> {
        if let Some(remaining) = self.0.remaining.as_ref() {
            if !remaining.withdraw(bytes) {
                return Err(AllocationError);
            }
        }
        self.0.used.deposit(bytes);
        Ok(())
    }

    /// Moves `bytes` from idle to used (a parked block is handed out again).
    pub fn reuse(&self, bytes: u64) {
        let moved = self.0.idle.withdraw_saturating(bytes);
        debug_assert_eq!(moved, bytes);
        self.0.used.deposit(moved);
    }

    /// Moves `bytes` from used to idle (a block is parked on a free list).
    pub fn park(&self, bytes: u64) {
        let moved = self.0.used.withdraw_saturating(bytes);
        debug_assert_eq!(moved, bytes);
        self.0.idle.deposit(moved);
    }

    /// Returns `bytes` of idle memory to the system.
    pub fn release_idle(&self, bytes: u64) {
        let released = self.0.idle.withdraw_saturating(bytes);
        debug_assert_eq!(released, bytes);
        self.return_headroom(released);
    }

    /// Returns `bytes` of used memory to the system.
    pub fn release(&self, bytes: u64) {
        let released = self.0.used.withdraw_saturating(bytes);
        debug_assert_eq!(released, bytes);
        self.return_headroom(released);
    }

    /// Creates an RAII allocation of `amount` used bytes, released on drop.
    ///
    /// Suited for structures that resize as a whole (hash slots, parallel
    /// arrays) rather than in fixed blocks.
    pub fn allocate(&self, amount: u64) -> Result<Allocation, AllocationError> {
        self.reserve(amount)?;
        Ok(Allocation {
            budget: self.clone(),
            amount,
        })
    }

    fn return_headroom(&self, bytes: u64) {
        if let Some(remaining) = self.0.remaining.as_ref() {
            remaining.deposit(bytes);
        }
    }
}

impl Default for RamBudget {
    fn default() -> Self {
        RamBudget::unlimited()
    }
}

impl std::fmt::Debug for RamBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RamBudget")
            .field("used", &self.used())
            .field("idle", &self.idle())
            .field("hard_limit", &self.hard_limit())
            .finish()
    }
}

/// Represents a resizable amount of used memory charged to a [`RamBudget`].
///
/// When the allocation is dropped the amount is released back to the budget.
pub struct Allocation {
    budget: RamBudget,
    amount: u64,
}

impl Allocation {
    /// Currently allocated amount.
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Grows the allocation by the given amount.
    pub fn grow(&mut self, additional: u64) -> Result<(), AllocationError> {
        self.budget.reserve(additional)?;
        self.amount += additional;
        Ok(())
    }

    /// Resizes the allocation to exactly `amount`, growing or shrinking as needed.
    pub fn resize(&mut self, amount: u64) -> Result<(), AllocationError> {
        if amount > self.amount {
            self.grow(amount - self.amount)
        } else {
            self.shrink_to(amount);
            Ok(())
        }
    }

    pub fn shrink_to(&mut self, amount: u64) {
        if amount < self.amount {
            self.budget.release(self.amount - amount);
            self.amount = amount;
        }
    }

    pub fn budget(&self) -> &RamBudget {
        &self.budget
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.amount != 0 {
            self.budget.release(self.amount);
        }
    }
}

impl std::fmt::Debug for Allocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocation")
            .field("amount", &self.amount)
            .finish_non_exhaustive()
    }
}

/// An error that occurs when a budget allocation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationError;

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Budget allocation error")
    }
}

impl std::error::Error for AllocationError {}

impl From<AllocationError> for std::io::Error {
    fn from(e: AllocationError) -> Self {
        std::io::Error::new(std::io::ErrorKind::OutOfMemory, e)
    }
}

struct RamBudgetNode {
    /// Headroom under the hard limit. `None` when no limit is configured.
    remaining: Option<Counter>,
    hard_limit: Option<u64>,
    used: Counter,
    idle: Counter,
}
