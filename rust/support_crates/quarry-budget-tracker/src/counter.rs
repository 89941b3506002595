use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, never-negative byte counter.
///
/// Deposits always succeed. Withdrawals succeed only when the counter holds at
/// least the requested amount, so a counter initialized with a limit acts as the
/// remaining headroom of that limit.
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new `Counter` with the given initial amount.
    pub fn new(amount: u64) -> Counter {
        Counter(AtomicU64::new(amount))
    }

    /// Attempts to withdraw the specified `amount` from the counter.
    ///
    /// Returns `false` and leaves the counter unchanged when it holds less than
    /// `amount`.
    pub fn withdraw(&self, amount: u64) -> bool {
        let mut current = self.0.load(Ordering::Relaxed);
        while current >= amount {
            match self.0.compare_exchange_weak(
                current,
                current - amount,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(updated) => current = updated,
            }
        }
        false
    }

    /// Withdraws up to `amount`, returning how much was actually taken.
    ///
    /// Used where the caller knows the counter should hold `amount` but must not
    /// underflow if accounting drifted.
    pub fn withdraw_saturating(&self, amount: u64) -> u64 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let taken = current.min(amount);
            match self.0.compare_exchange_weak(
                current,
                current - taken,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return taken,
                Err(updated) => current = updated,
            }
        }
    }

    /// Deposits the specified `amount` into the counter.
    pub fn deposit(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Release);
    }

    /// Returns the counter value (most likely stale by the time it is observed by the caller).
    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_withdraw_respects_balance() {
        let counter = Counter::new(64);
        assert!(counter.withdraw(40));
        assert!(!counter.withdraw(40));
        assert!(counter.withdraw(24));
        assert_eq!(counter.read(), 0);
        assert!(counter.withdraw(0));
    }

    #[test]
    fn test_withdraw_saturating() {
        let counter = Counter::new(10);
        assert_eq!(counter.withdraw_saturating(4), 4);
        assert_eq!(counter.withdraw_saturating(100), 6);
        assert_eq!(counter.withdraw_saturating(1), 0);
        assert_eq!(counter.read(), 0);
    }

    #[test]
    fn test_deposit_then_withdraw() {
        let counter = Counter::new(0);
        counter.deposit(32768);
        counter.deposit(16384);
        assert!(counter.withdraw(49152));
        assert_eq!(counter.read(), 0);
    }

    #[test]
    fn test_concurrent_block_accounting() {
        let counter = Arc::new(Counter::new(8 * 1024));
        let handles = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    let mut taken = 0u64;
                    for _ in 0..4 {
                        if counter.withdraw(512) {
                            taken += 512;
                        }
                    }
                    taken
                })
            })
            .collect::<Vec<_>>();
        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total + counter.read(), 8 * 1024);
        assert_eq!(total, 8 * 512 * 2);
    }
}
