//! Accepts documents from many threads and turns them into segments.
//!
//! Every caller checks out an [`IndexingContext`] for the duration of one
//! document. Only acquiring and returning a context are synchronized; inverting
//! the document runs on the checked-out context without holding any lock. Doc
//! ids are handed out at acquisition, so documents finish out of order and their
//! per-document outputs pass through a [`WaitQueue`] that commits them in doc id
//! order.
//!
//! A flush is a barrier: new acquisitions block until every context is back, the
//! postings of all contexts are merged into the segment writer, and the
//! generation starts over.

use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    thread::ThreadId,
};

use ahash::{AHashMap, AHashSet};
use log::{debug, warn};
use quarry_budget_tracker::RamBudget;
use quarry_common::{Result, error::Error};

use crate::{
    buffered_deletes::{BufferedDeletes, DeleteTerm},
    config::IndexerConfig,
    document::Document,
    field_infos::FieldInfos,
    segment::{SegmentInfo, SegmentWriter},
    write::{
        context::{DocOutcome, IndexingContext, PoolAllocators},
        field_merge::{FieldSource, append_postings},
        vectors_store::TermVectorsStore,
        wait_queue::{PendingDoc, WaitQueue},
    },
};

/// Idle blocks are freed until used plus idle memory drops to this fraction of
/// the RAM buffer.
const BALANCE_TARGET_FRACTION: f64 = 0.95;

/// A context checked out by one caller for one document.
struct Checkout {
    slot: usize,
    doc_id: u32,
    context: Box<IndexingContext>,
}

struct WriterState {
    /// `None` while the context is checked out.
    contexts: Vec<Option<Box<IndexingContext>>>,
    /// The slot each thread used last.
    bindings: AHashMap<ThreadId, usize>,
    next_doc_id: u32,
    num_docs: u32,
    flush_pending: bool,
    aborting: bool,
    closed: bool,
    buffer_is_full: bool,
    segment_name: Option<String>,
    segment_counter: u64,
    wait_queue: WaitQueue,
    vectors: TermVectorsStore,
    deletes: BufferedDeletes,
}

impl WriterState {
    fn all_idle(&self) -> bool {
        self.contexts.iter().all(Option::is_some)
    }

    fn contexts_mut(&mut self) -> impl Iterator<Item = &mut IndexingContext> {
        self.contexts.iter_mut().flatten().map(|context| &mut **context)
    }

    /// Picks the slot for the calling thread: its own idle context first, then any
    /// idle context, then a new one while below `max_contexts`.
    fn pick_slot(
        &mut self,
        thread: ThreadId,
        max_contexts: usize,
        allocators: &PoolAllocators,
        config: &IndexerConfig,
    ) -> Option<usize> {
        if let Some(&slot) = self.bindings.get(&thread)
            && self.contexts[slot].is_some()
        {
            return Some(slot);
        }
        if let Some(slot) = self.contexts.iter().position(Option::is_some) {
            return Some(slot);
        }
        if self.contexts.len() < max_contexts {
            self.contexts
                .push(Some(Box::new(IndexingContext::new(allocators, config))));
            return Some(self.contexts.len() - 1);
        }
        None
    }

    fn commit(&mut self, doc_id: u32, doc: PendingDoc) -> Result<()> {
        self.wait_queue.add(doc_id, doc, &mut self.vectors)
    }

    fn skip(&mut self, doc_id: u32) -> Result<()> {
        self.deletes.add_doc_id(doc_id)?;
        self.commit(doc_id, PendingDoc::Skip)
    }

    fn next_segment_name(&mut self) -> String {
        let name = format!("_{}", radix36(self.segment_counter));
        self.segment_counter += 1;
        name
    }

    /// Starts a new generation: contexts give their blocks back and all counters
    /// restart. Buffered deletes are left alone.
    fn reset_generation(&mut self, field_infos: &FieldInfos) {
        for context in self.contexts_mut() {
            context.reset(field_infos);
        }
        self.wait_queue.reset();
        self.vectors.clear();
        self.next_doc_id = 0;
        self.num_docs = 0;
        self.segment_name = None;
        self.buffer_is_full = false;
    }
}

/// Buffers documents in RAM and flushes them into segments.
///
/// `DocumentWriter` is `Sync`; share it between indexing threads by reference or
/// through an `Arc`.
pub struct DocumentWriter {
    config: IndexerConfig,
    allocators: PoolAllocators,
    field_infos: Mutex<FieldInfos>,
    state: Mutex<WriterState>,
    changed: Condvar,
}

impl DocumentWriter {
    pub fn new(config: IndexerConfig) -> Result<DocumentWriter> {
        config.validate()?;
        let budget = match config.hard_ram_limit_bytes() {
            Some(limit) => RamBudget::with_hard_limit(limit),
            None => RamBudget::unlimited(),
        };
        let allocators = PoolAllocators::new(&budget);
        let state = WriterState {
            contexts: Vec::new(),
            bindings: AHashMap::new(),
            next_doc_id: 0,
            num_docs: 0,
            flush_pending: false,
            aborting: false,
            closed: false,
            buffer_is_full: false,
            segment_name: None,
            segment_counter: 0,
            wait_queue: WaitQueue::new(config.ram_buffer_bytes()),
            vectors: TermVectorsStore::new(&budget)?,
            deletes: BufferedDeletes::new(&budget)?,
        };
        Ok(DocumentWriter {
            config,
            allocators,
            field_infos: Mutex::new(FieldInfos::new()),
            state: Mutex::new(state),
            changed: Condvar::new(),
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Indexes `doc`. Returns `true` when the caller should [`flush`](Self::flush).
    ///
    /// A document that fails without damaging shared state (an analysis error,
    /// for instance) is marked deleted and its error returned; everything else
    /// buffered stays. A failure that leaves the buffers in an unknown state, such
    /// as running into the hard RAM limit, aborts all buffered documents first.
    pub fn add_document(&self, doc: Document) -> Result<bool> {
        self.process_document(doc, None)
    }

    /// Deletes the documents matching `delete_term` that were added before this
    /// call, then indexes `doc`.
    pub fn update_document(&self, doc: Document, delete_term: DeleteTerm) -> Result<bool> {
        self.process_document(doc, Some(delete_term))
    }

    /// Buffers a delete of every document added so far that contains `term`.
    /// Returns `true` when the caller should flush.
    pub fn delete_term(&self, term: DeleteTerm) -> Result<bool> {
        self.delete_terms(std::iter::once(term))
    }

    pub fn delete_terms(&self, terms: impl IntoIterator<Item = DeleteTerm>) -> Result<bool> {
        let mut state = self.wait_until_ready(self.lock_state());
        if state.closed {
            return Err(Error::already_closed());
        }
        let horizon = state.next_doc_id;
        for term in terms {
            if let Err(error) = state.deletes.add_term(term, horizon) {
                drop(state);
                self.abort();
                return Err(error);
            }
        }
        Ok(self.flush_wanted(&state))
    }

    fn process_document(&self, doc: Document, delete_term: Option<DeleteTerm>) -> Result<bool> {
        let mut checkout = self.get_thread_state(delete_term)?;
        let outcome = checkout.context.invert_document(
            checkout.doc_id,
            doc,
            &self.field_infos,
            &self.config,
        );
        self.finish_document(checkout, outcome)
    }

    /// Checks out a context and assigns the next doc id, buffering `delete_term`
    /// with that id as its horizon.
    fn get_thread_state(&self, delete_term: Option<DeleteTerm>) -> Result<Checkout> {
        let thread = std::thread::current().id();
        let mut state = self.lock_state();
        let slot = loop {
            state = self.wait_until_ready(state);
            if state.closed {
                return Err(Error::already_closed());
            }
            if let Some(slot) = state.pick_slot(
                thread,
                self.config.max_thread_states,
                &self.allocators,
                &self.config,
            ) {
                break slot;
            }
            state = self.wait(state);
        };

        let doc_id = state.next_doc_id;
        if let Some(term) = delete_term
            && let Err(error) = state.deletes.add_term(term, doc_id)
        {
            drop(state);
            self.abort();
            return Err(error);
        }
        let Some(context) = state.contexts[slot].take() else {
            return Err(Error::invalid_operation("context slot is checked out"));
        };
        state.next_doc_id += 1;
        state.num_docs += 1;
        if state.segment_name.is_none() {
            let name = state.next_segment_name();
            debug!("starting segment {name}");
            state.segment_name = Some(name);
        }
        state.bindings.insert(thread, slot);
        Ok(Checkout {
            slot,
            doc_id,
            context,
        })
    }

    fn finish_document(&self, checkout: Checkout, outcome: DocOutcome) -> Result<bool> {
        let over_budget = self.balance_ram();

        let mut state = self.lock_state();
        let Checkout {
            slot,
            doc_id,
            context,
        } = checkout;
        state.contexts[slot] = Some(context);
        self.changed.notify_all();
        if state.aborting {
            // The document belongs to a generation that is being discarded.
            return Err(Error::aborted());
        }
        state.buffer_is_full |= over_budget;

        let mut failure = None;
        let committed = match outcome {
            DocOutcome::Ok(vectors) => {
                state.commit(doc_id, vectors.map_or(PendingDoc::Empty, PendingDoc::Vectors))
            }
            DocOutcome::DocumentFailed(error) => {
                warn!("doc {doc_id} failed and is marked deleted: {error}");
                failure = Some(error);
                state.skip(doc_id)
            }
            DocOutcome::Fatal(error) => Err(error),
        };
        if let Err(error) = committed {
            drop(state);
            warn!("doc {doc_id} hit an aborting failure: {error}");
            self.abort();
            return Err(error);
        }

        if state.wait_queue.should_pause() {
            debug!(
                "pausing: {} docs waiting hold {} bytes",
                state.wait_queue.num_waiting(),
                state.wait_queue.waiting_bytes()
            );
            while !state.wait_queue.should_resume() && !state.aborting {
                if state.closed {
                    return Err(Error::already_closed());
                }
                state = self.wait(state);
            }
        }
        self.changed.notify_all();

        match failure {
            Some(error) => Err(error),
            None => Ok(self.flush_wanted(&state)),
        }
    }

    /// Writes everything buffered since the last flush into `writer`.
    ///
    /// Waits until no document is being indexed. Returns `None` without touching
    /// the writer when no document was added; buffered deletes are kept for the
    /// next segment in that case. Any failure aborts the buffered documents and is
    /// returned.
    pub fn flush(&self, writer: &mut dyn SegmentWriter) -> Result<Option<SegmentInfo>> {
        let mut state = self.wait_until_ready(self.lock_state());
        if state.closed {
            return Err(Error::already_closed());
        }
        state.flush_pending = true;
        while !state.all_idle() {
            state = self.wait(state);
        }
        debug_assert!(state.wait_queue.is_empty());

        let result = if state.num_docs == 0 {
            Ok(None)
        } else {
            match self.write_segment(&mut state, writer) {
                Ok(info) => {
                    let field_infos = self.lock_field_infos().clone();
                    state.reset_generation(&field_infos);
                    Ok(Some(info))
                }
                Err(error) => {
                    warn!("flush failed, aborting buffered documents: {error}");
                    state = self.abort_locked(state);
                    Err(error)
                }
            }
        };
        state.flush_pending = false;
        self.changed.notify_all();
        result
    }

    fn write_segment(
        &self,
        state: &mut WriterState,
        writer: &mut dyn SegmentWriter,
    ) -> Result<SegmentInfo> {
        let name = match state.segment_name.clone() {
            Some(name) => name,
            None => state.next_segment_name(),
        };
        debug!(
            "flushing segment {name}: {} docs, {} bytes used",
            state.num_docs,
            self.ram_used()
        );

        for context in state.contexts_mut() {
            context.sort_for_flush();
        }
        let contexts = state.contexts.iter().flatten().collect::<Vec<_>>();
        let mut field_names = contexts
            .iter()
            .flat_map(|context| context.field_names())
            .map(str::to_string)
            .collect::<Vec<_>>();
        field_names.sort_unstable();
        field_names.dedup();

        let (delete_terms, deleted_docs) = state.deletes.take();
        let deleted = deleted_docs.iter().copied().collect::<AHashSet<_>>();

        let mut field_infos = self.lock_field_infos();
        for name in &field_names {
            if contexts.iter().any(|context| context.has_payloads(name)) {
                field_infos.set_store_payloads(name);
            }
            let Some(info) = field_infos.get(name) else {
                continue;
            };
            let sources = contexts
                .iter()
                .filter_map(|context| context.field_source(name))
                .collect::<Vec<FieldSource<'_>>>();
            writer.start_field(info)?;
            append_postings(info, &sources, &deleted, writer)?;
            writer.finish_field()?;
        }

        state.vectors.write_to(writer)?;

        let (mut has_prox, mut has_payloads) = (false, false);
        for info in field_names.iter().filter_map(|name| field_infos.get(name)) {
            has_prox |= !info.omit_term_freq_and_positions;
            has_payloads |= info.store_payloads;
        }
        let info = SegmentInfo {
            name,
            doc_count: state.num_docs,
            has_vectors: state.vectors.has_vectors(),
            has_prox,
            has_payloads,
            deleted_docs,
            delete_terms,
        };
        writer.finish(&info)?;
        debug!(
            "flushed segment {}: {} docs, {} fields, {} deleted docs, {} delete terms",
            info.name,
            info.doc_count,
            field_names.len(),
            info.deleted_docs.len(),
            info.delete_terms.len()
        );
        Ok(info)
    }

    /// Refuses any further documents, deletes and flushes with
    /// [`AlreadyClosed`](quarry_common::error::ErrorKind::AlreadyClosed). Callers
    /// blocked waiting for a context or for the wait queue to drain are woken and
    /// fail the same way. Flush first to keep what is buffered.
    pub fn close(&self) {
        let mut state = self.lock_state();
        if !state.closed {
            debug!("closing with {} buffered docs", state.num_docs);
            state.closed = true;
        }
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Discards every document buffered since the last flush, together with the
    /// buffered deletes. Documents being indexed concurrently fail with
    /// [`Aborted`](quarry_common::error::ErrorKind::Aborted).
    pub fn abort(&self) {
        let mut state = self.lock_state();
        while state.aborting {
            state = self.wait(state);
        }
        drop(self.abort_locked(state));
    }

    fn abort_locked<'a>(
        &self,
        mut state: MutexGuard<'a, WriterState>,
    ) -> MutexGuard<'a, WriterState> {
        warn!(
            "aborting {} buffered docs of segment {:?}",
            state.num_docs, state.segment_name
        );
        state.aborting = true;
        state.wait_queue.abort();
        self.changed.notify_all();
        while !state.all_idle() {
            state = self.wait(state);
        }
        state.deletes.clear();
        let field_infos = self.lock_field_infos().clone();
        state.reset_generation(&field_infos);
        self.allocators.free_all_idle();
        state.aborting = false;
        self.changed.notify_all();
        state
    }

    /// Frees idle pool blocks once used plus idle memory reaches the RAM buffer
    /// size. Returns `true` when used memory alone exceeds it.
    fn balance_ram(&self) -> bool {
        let Some(limit) = self.config.ram_buffer_bytes() else {
            return false;
        };
        let budget = self.allocators.budget();
        if budget.used() + budget.idle() < limit {
            return false;
        }
        let target = (limit as f64 * BALANCE_TARGET_FRACTION) as u64;
        let mut freed = 0;
        while budget.used() + budget.idle() > target {
            let bytes = self.allocators.free_largest_idle();
            if bytes == 0 {
                break;
            }
            freed += bytes;
        }
        let used = budget.used();
        debug!(
            "balance ram: freed {freed} bytes, {used} used, {} idle, limit {limit}",
            budget.idle()
        );
        used > limit
    }

    fn flush_wanted(&self, state: &WriterState) -> bool {
        state.buffer_is_full
            || self
                .config
                .ram_buffer_bytes()
                .is_some_and(|limit| self.ram_used() >= limit)
            || self
                .config
                .max_buffered_docs
                .is_some_and(|max| state.num_docs as usize >= max)
            || self
                .config
                .max_buffered_delete_terms
                .is_some_and(|max| state.deletes.num_terms() >= max)
    }

    /// Documents buffered since the last flush, failed ones included.
    pub fn num_docs(&self) -> u32 {
        self.lock_state().num_docs
    }

    pub fn next_doc_id(&self) -> u32 {
        self.lock_state().next_doc_id
    }

    /// Bytes held by pools, tables and buffers.
    pub fn ram_used(&self) -> u64 {
        self.allocators.budget().used()
    }

    /// Bytes held by recycled blocks waiting for reuse.
    pub fn ram_idle(&self) -> u64 {
        self.allocators.budget().idle()
    }

    /// Name of the segment the buffered documents will be flushed into.
    pub fn segment_name(&self) -> Option<String> {
        self.lock_state().segment_name.clone()
    }

    /// Whether anything is buffered: documents or deletes.
    pub fn any_changes(&self) -> bool {
        let state = self.lock_state();
        state.num_docs > 0 || !state.deletes.is_empty()
    }

    /// Number of buffered delete terms.
    pub fn pending_deletes(&self) -> usize {
        self.lock_state().deletes.num_terms()
    }

    pub fn num_thread_states(&self) -> usize {
        self.lock_state().contexts.len()
    }

    /// A snapshot of the fields seen so far.
    pub fn field_infos(&self) -> FieldInfos {
        self.lock_field_infos().clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_field_infos(&self) -> MutexGuard<'_, FieldInfos> {
        self.field_infos
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, WriterState>) -> MutexGuard<'a, WriterState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks while a flush or an abort is in progress, unless the writer is closed.
    fn wait_until_ready<'a>(
        &self,
        mut state: MutexGuard<'a, WriterState>,
    ) -> MutexGuard<'a, WriterState> {
        while (state.flush_pending || state.aborting) && !state.closed {
            state = self.wait(state);
        }
        state
    }
}

impl std::fmt::Debug for DocumentWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("DocumentWriter")
            .field("num_docs", &state.num_docs)
            .field("contexts", &state.contexts.len())
            .field("segment", &state.segment_name)
            .field("closed", &state.closed)
            .field("deletes", &state.deletes)
            .field("ram_used", &self.ram_used())
            .finish_non_exhaustive()
    }
}

fn radix36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut digits = Vec::new();
    loop {
        digits.push(DIGITS[(value % 36) as usize]);
        value /= 36;
        if value == 0 {
            break;
        }
    }
    digits.iter().rev().map(|&digit| digit as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document::{Field, FieldOptions},
        segment::MemorySegmentWriter,
    };

    fn text_doc(body: &str) -> Document {
        Document::new().with_field(Field::text("body", body, FieldOptions::indexed()))
    }

    #[test]
    fn test_radix36() {
        assert_eq!(radix36(0), "0");
        assert_eq!(radix36(35), "z");
        assert_eq!(radix36(36), "10");
    }

    #[test]
    fn test_segment_names_advance_per_flush() {
        let writer = DocumentWriter::new(IndexerConfig::default()).unwrap();
        assert_eq!(writer.segment_name(), None);
        writer.add_document(text_doc("one")).unwrap();
        assert_eq!(writer.segment_name().as_deref(), Some("_0"));

        let mut segment = MemorySegmentWriter::new();
        let info = writer.flush(&mut segment).unwrap().unwrap();
        assert_eq!(info.name, "_0");
        assert_eq!(writer.segment_name(), None);
        assert_eq!(writer.num_docs(), 0);

        writer.add_document(text_doc("two")).unwrap();
        assert_eq!(writer.segment_name().as_deref(), Some("_1"));
    }

    #[test]
    fn test_empty_flush_keeps_deletes() {
        let writer = DocumentWriter::new(IndexerConfig::default()).unwrap();
        writer.delete_term(DeleteTerm::new("id", "7")).unwrap();
        assert!(writer.any_changes());
        let mut segment = MemorySegmentWriter::new();
        assert!(writer.flush(&mut segment).unwrap().is_none());
        assert!(segment.into_segment().is_err());
        assert_eq!(writer.pending_deletes(), 1);
    }

    #[test]
    fn test_update_document_buffers_delete_with_horizon() {
        let writer = DocumentWriter::new(IndexerConfig::default()).unwrap();
        writer.add_document(text_doc("a")).unwrap();
        writer.add_document(text_doc("b")).unwrap();
        writer
            .update_document(text_doc("c"), DeleteTerm::new("body", "a"))
            .unwrap();
        let mut segment = MemorySegmentWriter::new();
        let info = writer.flush(&mut segment).unwrap().unwrap();
        assert_eq!(info.doc_count, 3);
        assert_eq!(info.delete_terms, [(DeleteTerm::new("body", "a"), 2)]);
        assert!(!writer.any_changes());
    }

    #[test]
    fn test_flush_requested_by_doc_count() {
        let config = IndexerConfig {
            max_buffered_docs: Some(2),
            ..IndexerConfig::default()
        };
        let writer = DocumentWriter::new(config).unwrap();
        assert!(!writer.add_document(text_doc("a")).unwrap());
        assert!(writer.add_document(text_doc("b")).unwrap());
    }

    #[test]
    fn test_flush_requested_by_delete_terms() {
        let config = IndexerConfig {
            max_buffered_delete_terms: Some(2),
            ..IndexerConfig::default()
        };
        let writer = DocumentWriter::new(config).unwrap();
        assert!(!writer.delete_term(DeleteTerm::new("id", "1")).unwrap());
        assert!(
            writer
                .delete_terms([DeleteTerm::new("id", "2"), DeleteTerm::new("id", "3")])
                .unwrap()
        );
    }

    #[test]
    fn test_abort_discards_everything() {
        let writer = DocumentWriter::new(IndexerConfig::default()).unwrap();
        writer.add_document(text_doc("lost words")).unwrap();
        writer.delete_term(DeleteTerm::new("body", "x")).unwrap();
        assert!(writer.ram_used() > 0);
        writer.abort();
        assert_eq!(writer.num_docs(), 0);
        assert_eq!(writer.next_doc_id(), 0);
        assert!(!writer.any_changes());
        assert_eq!(writer.ram_idle(), 0);

        let mut segment = MemorySegmentWriter::new();
        assert!(writer.flush(&mut segment).unwrap().is_none());
    }

    #[test]
    fn test_same_thread_reuses_its_context() {
        let writer = DocumentWriter::new(IndexerConfig::default()).unwrap();
        for body in ["a", "b", "c"] {
            writer.add_document(text_doc(body)).unwrap();
        }
        assert_eq!(writer.num_thread_states(), 1);
    }

    #[test]
    fn test_balance_ram_frees_idle_blocks() {
        let config = IndexerConfig {
            ram_buffer_size_mb: Some(0.1),
            ..IndexerConfig::default()
        };
        let writer = DocumentWriter::new(config).unwrap();
        let words = (0..5000).map(|i| format!("w{i}")).collect::<Vec<_>>();
        writer
            .add_document(Document::new().with_field(Field::terms(
                "body",
                &words,
                FieldOptions::indexed(),
            )))
            .unwrap();
        let mut segment = MemorySegmentWriter::new();
        writer.flush(&mut segment).unwrap();
        let limit = writer.config().ram_buffer_bytes().unwrap();
        assert!(writer.ram_idle() > limit);

        // Reusing a few blocks leaves the rest idle; balancing frees them.
        writer.add_document(text_doc("small")).unwrap();
        let target = (limit as f64 * BALANCE_TARGET_FRACTION) as u64;
        assert!(writer.ram_idle() == 0 || writer.ram_used() + writer.ram_idle() <= target);
    }
}
