use std::collections::BTreeMap;

use quarry_common::Result;

use super::{term_vectors::PerDocVectors, vectors_store::TermVectorsStore};

/// Pause threshold as a fraction of the RAM buffer.
const PAUSE_FRACTION: f64 = 0.1;
const RESUME_FRACTION: f64 = 0.05;

/// Thresholds used when flushing by RAM usage is disabled.
const DEFAULT_PAUSE_BYTES: u64 = 4 * 1024 * 1024;
const DEFAULT_RESUME_BYTES: u64 = 2 * 1024 * 1024;

/// Output of a finished document, waiting for its turn.
#[derive(Debug)]
pub enum PendingDoc {
    /// The document failed; it still takes up its doc id.
    Skip,
    /// The document produced no per-document output.
    Empty,
    Vectors(PerDocVectors),
}

impl PendingDoc {
    fn ram_bytes(&self) -> u64 {
        match self {
            PendingDoc::Vectors(vectors) => vectors.allocated_bytes(),
            PendingDoc::Skip | PendingDoc::Empty => 0,
        }
    }
}

/// Commits per-document outputs in doc id order.
///
/// Documents finish in any order; those whose predecessors are still being
/// indexed wait here. Callers are expected to pause once the waiting documents
/// hold more than [`should_pause`](Self::should_pause) allows, until
/// [`should_resume`](Self::should_resume).
#[derive(Debug)]
pub struct WaitQueue {
    waiting: BTreeMap<u32, PendingDoc>,
    next_doc_id: u32,
    waiting_bytes: u64,
    pause_bytes: u64,
    resume_bytes: u64,
}

impl WaitQueue {
    pub fn new(ram_buffer_bytes: Option<u64>) -> WaitQueue {
        let (pause_bytes, resume_bytes) = match ram_buffer_bytes {
            Some(bytes) => (
                (bytes as f64 * PAUSE_FRACTION) as u64,
                (bytes as f64 * RESUME_FRACTION) as u64,
            ),
            None => (DEFAULT_PAUSE_BYTES, DEFAULT_RESUME_BYTES),
        };
        WaitQueue {
            waiting: BTreeMap::new(),
            next_doc_id: 0,
            waiting_bytes: 0,
            pause_bytes,
            resume_bytes,
        }
    }

    /// Hands in the output of `doc_id`, committing it and every waiting successor
    /// that is now in turn.
    pub fn add(
        &mut self,
        doc_id: u32,
        doc: PendingDoc,
        store: &mut TermVectorsStore,
    ) -> Result<()> {
        debug_assert!(doc_id >= self.next_doc_id);
        debug_assert!(!self.waiting.contains_key(&doc_id));
        if doc_id != self.next_doc_id {
            self.waiting_bytes += doc.ram_bytes();
            self.waiting.insert(doc_id, doc);
            return Ok(());
        }

        self.commit(doc_id, doc, store)?;
        while let Some(entry) = self.waiting.first_entry() {
            if *entry.key() != self.next_doc_id {
                break;
            }
            let (doc_id, doc) = entry.remove_entry();
            self.waiting_bytes -= doc.ram_bytes();
            self.commit(doc_id, doc, store)?;
        }
        Ok(())
    }

    fn commit(&mut self, doc_id: u32, doc: PendingDoc, store: &mut TermVectorsStore) -> Result<()> {
        // The doc id is consumed even when the store fails: the failure aborts the
        // whole generation anyway.
        self.next_doc_id = doc_id + 1;
        match doc {
            PendingDoc::Vectors(vectors) => store.append(vectors),
            PendingDoc::Skip | PendingDoc::Empty => {
                store.fill(doc_id);
                Ok(())
            }
        }
    }

    pub fn should_pause(&self) -> bool {
        self.waiting_bytes > self.pause_bytes
    }

    pub fn should_resume(&self) -> bool {
        self.waiting_bytes <= self.resume_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn num_waiting(&self) -> usize {
        self.waiting.len()
    }

    pub fn waiting_bytes(&self) -> u64 {
        self.waiting_bytes
    }

    pub fn next_doc_id(&self) -> u32 {
        self.next_doc_id
    }

    /// Drops every waiting output and starts over at doc id 0.
    pub fn abort(&mut self) {
        self.waiting.clear();
        self.waiting_bytes = 0;
        self.next_doc_id = 0;
    }

    /// Starts a new generation; the queue must be empty.
    pub fn reset(&mut self) {
        debug_assert!(self.waiting.is_empty());
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use quarry_block_pool::{BlockAllocator, DataOutput, PER_DOC_BLOCK_SIZE};
    use quarry_budget_tracker::RamBudget;

    use super::*;

    #[test]
    fn test_commits_in_doc_id_order() {
        let budget = RamBudget::unlimited();
        let mut store = TermVectorsStore::new(&budget).unwrap();
        let mut queue = WaitQueue::new(Some(1 << 20));
        queue.add(2, PendingDoc::Empty, &mut store).unwrap();
        queue.add(1, PendingDoc::Skip, &mut store).unwrap();
        assert_eq!(queue.num_waiting(), 2);
        assert_eq!(store.num_docs(), 0);
        queue.add(0, PendingDoc::Empty, &mut store).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.next_doc_id(), 3);
        assert_eq!(store.num_docs(), 3);
    }

    #[test]
    fn test_pause_and_resume_thresholds() {
        let budget = RamBudget::unlimited();
        let allocator = BlockAllocator::new(PER_DOC_BLOCK_SIZE, budget.clone());
        let mut store = TermVectorsStore::new(&budget).unwrap();
        // Pause above 1000 bytes, resume at or below 500.
        let mut queue = WaitQueue::new(Some(10_000));
        for doc_id in 1..=2 {
            let mut doc = PerDocVectors::new(doc_id, allocator.clone());
            doc.buffer_mut().write_byte(1).unwrap();
            queue.add(doc_id, PendingDoc::Vectors(doc), &mut store).unwrap();
        }
        assert_eq!(queue.waiting_bytes(), 2 * PER_DOC_BLOCK_SIZE as u64);
        assert!(queue.should_pause());
        assert!(!queue.should_resume());
        queue.add(0, PendingDoc::Empty, &mut store).unwrap();
        assert!(queue.should_resume());
        assert_eq!(queue.waiting_bytes(), 0);
        assert!(!store.has_vectors());
    }

    #[test]
    fn test_abort_discards_waiting() {
        let budget = RamBudget::unlimited();
        let mut store = TermVectorsStore::new(&budget).unwrap();
        let mut queue = WaitQueue::new(None);
        queue.add(5, PendingDoc::Empty, &mut store).unwrap();
        queue.abort();
        assert!(queue.is_empty());
        assert_eq!(queue.next_doc_id(), 0);
    }

    #[test]
    fn test_reset_after_drain() {
        let budget = RamBudget::unlimited();
        let mut store = TermVectorsStore::new(&budget).unwrap();
        let mut queue = WaitQueue::new(None);
        queue.add(1, PendingDoc::Empty, &mut store).unwrap();
        queue.add(0, PendingDoc::Skip, &mut store).unwrap();
        assert_eq!(queue.next_doc_id(), 2);
        queue.reset();
        assert!(queue.is_empty());
        assert_eq!(queue.next_doc_id(), 0);
        queue.add(0, PendingDoc::Empty, &mut store).unwrap();
        assert_eq!(queue.next_doc_id(), 1);
    }
}
