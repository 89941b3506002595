//! The per-caller indexing state: pools, per-field postings tables and scratch
//! space. A context is used by one thread at a time and recycled across
//! documents and callers.

use std::sync::Mutex;

use ahash::AHashMap;
use itertools::Itertools;
use log::debug;
use quarry_block_pool::{
    BYTE_BLOCK_SIZE, BlockAllocator, CHAR_BLOCK_SIZE, CharPool, INT_BLOCK_SIZE, PER_DOC_BLOCK_SIZE,
};
use quarry_budget_tracker::RamBudget;
use quarry_common::{Result, error::Error};
use quarry_unicode::conversion::utf16_to_string;

use super::{
    field_merge::FieldSource,
    freq_prox::{FieldInvertState, FreqProxField},
    postings_table::{StreamPools, TermAdded},
    term_vectors::{PerDocVectors, TermVectorsField},
};
use crate::{
    config::IndexerConfig,
    document::{Document, Field},
    field_infos::{FieldInfo, FieldInfos},
};

/// Number of leading code units of a skipped term kept for diagnostics.
const MAX_TERM_PREFIX_LEN: usize = 30;

/// The block allocators shared by all contexts of a document writer.
#[derive(Debug, Clone)]
pub struct PoolAllocators {
    pub bytes: BlockAllocator<u8>,
    pub chars: BlockAllocator<u16>,
    pub ints: BlockAllocator<u32>,
    pub per_doc: BlockAllocator<u8>,
}

impl PoolAllocators {
    pub fn new(budget: &RamBudget) -> PoolAllocators {
        PoolAllocators {
            bytes: BlockAllocator::new(BYTE_BLOCK_SIZE, budget.clone()),
            chars: BlockAllocator::new(CHAR_BLOCK_SIZE, budget.clone()),
            ints: BlockAllocator::new(INT_BLOCK_SIZE, budget.clone()),
            per_doc: BlockAllocator::new(PER_DOC_BLOCK_SIZE, budget.clone()),
        }
    }

    pub fn budget(&self) -> &RamBudget {
        self.bytes.budget()
    }

    pub fn idle_bytes(&self) -> u64 {
        self.bytes.idle_bytes()
            + self.chars.idle_bytes()
            + self.ints.idle_bytes()
            + self.per_doc.idle_bytes()
    }

    /// Frees idle blocks of the allocator holding the most idle bytes: one block,
    /// or a batch of per-document blocks. Returns the number of bytes released.
    pub fn free_largest_idle(&self) -> u64 {
        let idle = [
            self.bytes.idle_bytes(),
            self.chars.idle_bytes(),
            self.ints.idle_bytes(),
            self.per_doc.idle_bytes(),
        ];
        let Some((largest, &bytes)) = idle.iter().enumerate().max_by_key(|&(_, bytes)| *bytes)
        else {
            return 0;
        };
        if bytes == 0 {
            return 0;
        }
        match largest {
            0 => self.bytes.free_idle(1) as u64 * self.bytes.block_bytes(),
            1 => self.chars.free_idle(1) as u64 * self.chars.block_bytes(),
            2 => self.ints.free_idle(1) as u64 * self.ints.block_bytes(),
            _ => {
                self.per_doc.free_idle(PER_DOC_FREE_BATCH) as u64 * self.per_doc.block_bytes()
            }
        }
    }

    /// Frees every idle block.
    pub fn free_all_idle(&self) {
        self.bytes.free_idle(usize::MAX);
        self.chars.free_idle(usize::MAX);
        self.ints.free_idle(usize::MAX);
        self.per_doc.free_idle(usize::MAX);
    }
}

/// Per-document blocks are small; they are freed this many at a time.
const PER_DOC_FREE_BATCH: usize = 32;

/// What happened to a document handed to
/// [`IndexingContext::invert_document`].
#[derive(Debug)]
pub enum DocOutcome {
    /// The document was indexed, with its term vectors if it has any.
    Ok(Option<PerDocVectors>),
    /// The document could not be indexed; its postings must be ignored but the
    /// context stays usable.
    DocumentFailed(Error),
    /// The context is in an unknown state; everything buffered must be discarded.
    Fatal(Error),
}

impl DocOutcome {
    fn failed(error: Error) -> DocOutcome {
        if error.is_aborting() {
            DocOutcome::Fatal(error)
        } else {
            DocOutcome::DocumentFailed(error)
        }
    }
}

/// State of the document being inverted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocState {
    pub doc_id: u32,
    /// Start of the first term skipped because it was too long.
    pub max_term_prefix: Option<String>,
    pub skipped_long_terms: u32,
}

struct ContextField {
    number: u32,
    freq: FreqProxField,
    vectors: TermVectorsField,
    /// Seen since the last flush.
    used: bool,
}

pub struct IndexingContext {
    allocators: PoolAllocators,
    max_term_length: usize,
    chars: CharPool,
    freq_pools: StreamPools,
    vector_pools: StreamPools,
    fields: AHashMap<String, ContextField>,
    doc_state: DocState,
    text: Vec<u16>,
    utf8_scratch: [Vec<u8>; 2],
}

impl IndexingContext {
    pub fn new(allocators: &PoolAllocators, config: &IndexerConfig) -> IndexingContext {
        IndexingContext {
            chars: CharPool::new(allocators.chars.clone()),
            freq_pools: StreamPools::new(allocators.ints.clone(), allocators.bytes.clone()),
            vector_pools: StreamPools::new(allocators.ints.clone(), allocators.bytes.clone()),
            allocators: allocators.clone(),
            max_term_length: config.max_term_length,
            fields: AHashMap::new(),
            doc_state: DocState::default(),
            text: Vec::new(),
            utf8_scratch: [Vec::new(), Vec::new()],
        }
    }

    pub fn doc_state(&self) -> &DocState {
        &self.doc_state
    }

    /// Inverts all fields of `doc` into the context's postings tables.
    ///
    /// Fields are processed in ascending name order; fields sharing a name are
    /// indexed as one multi-valued field.
    pub fn invert_document(
        &mut self,
        doc_id: u32,
        mut doc: Document,
        field_infos: &Mutex<FieldInfos>,
        config: &IndexerConfig,
    ) -> DocOutcome {
        self.doc_state = DocState {
            doc_id,
            ..DocState::default()
        };
        doc.fields.sort_by(|a, b| a.name.cmp(&b.name));
        let groups = group_ranges(&doc.fields);

        let infos = {
            let mut field_infos = field_infos
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            groups
                .iter()
                .map(|range| {
                    let mut info = None;
                    for field in &doc.fields[range.clone()] {
                        info = Some(field_infos.add(&field.name, &field.options).clone());
                    }
                    info
                })
                .collect::<Option<Vec<FieldInfo>>>()
        };
        let Some(infos) = infos else {
            return DocOutcome::Ok(None);
        };

        let mut vectors = None;
        for (range, info) in groups.into_iter().zip(infos) {
            let instances = &mut doc.fields[range];
            if let Err(error) = self.invert_field(&info, instances, &mut vectors, config) {
                self.discard_document_vectors();
                return DocOutcome::failed(error);
            }
        }
        DocOutcome::Ok(vectors.filter(|vectors: &PerDocVectors| !vectors.is_empty()))
    }

    fn invert_field(
        &mut self,
        info: &FieldInfo,
        instances: &mut [Field],
        vectors_doc: &mut Option<PerDocVectors>,
        config: &IndexerConfig,
    ) -> Result<()> {
        let budget = self.allocators.budget().clone();
        if !self.fields.contains_key(&info.name) {
            let field = ContextField {
                number: info.number,
                freq: FreqProxField::new(info, self.max_term_length, &budget)?,
                vectors: TermVectorsField::new(self.max_term_length, &budget)?,
                used: false,
            };
            self.fields.insert(info.name.clone(), field);
        }
        let IndexingContext {
            allocators,
            chars,
            freq_pools,
            vector_pools,
            fields,
            doc_state,
            text,
            utf8_scratch,
            ..
        } = self;
        let Some(field) = fields.get_mut(&info.name) else {
            return Ok(());
        };
        field.used = true;
        let doc_id = doc_state.doc_id;

        let do_vectors = field
            .vectors
            .start(instances.iter().map(|instance| &instance.options), vector_pools);
        if do_vectors && vectors_doc.is_none() {
            *vectors_doc = Some(PerDocVectors::new(doc_id, allocators.per_doc.clone()));
        }

        let mut state = FieldInvertState::default();
        'instances: for (i, instance) in instances.iter_mut().enumerate() {
            if i > 0 {
                state.position += config.position_increment_gap;
            }
            let tokens = &mut instance.tokens;
            loop {
                let has_token = tokens
                    .increment_token()
                    .map_err(|e| Error::analysis_with_source(info.name.clone(), e))?;
                if !has_token {
                    break;
                }
                let token = tokens.token();
                state.position += token.position_increment;
                if state.position > 0 {
                    state.position -= 1;
                }

                text.clear();
                text.extend_from_slice(&token.text);
                match field.freq.table_mut().add(text, chars, freq_pools)? {
                    TermAdded::SkippedLongTerm => {
                        doc_state.skipped_long_terms += 1;
                        if doc_state.max_term_prefix.is_none() {
                            let prefix =
                                utf16_to_string(&text[..text.len().min(MAX_TERM_PREFIX_LEN)]);
                            debug!(
                                "doc {doc_id}: skipped term over {} units in '{}': '{prefix}'",
                                config.max_term_length, info.name
                            );
                            doc_state.max_term_prefix = Some(prefix);
                        }
                    }
                    added @ (TermAdded::New(term_id) | TermAdded::Existing(term_id)) => {
                        let payload = token.payload.as_deref();
                        if matches!(added, TermAdded::New(_)) {
                            field.freq.new_term(term_id, doc_id, &mut state, payload, freq_pools)?;
                        } else {
                            field.freq.add_term(term_id, doc_id, &mut state, payload, freq_pools)?;
                        }
                        if do_vectors {
                            let text_start = field.freq.table().text_start(term_id);
                            let (start, end) = (token.start_offset, token.end_offset);
                            match field
                                .vectors
                                .table_mut()
                                .add_by_text_start(text_start, chars, vector_pools)?
                            {
                                TermAdded::New(id) => {
                                    field.vectors.new_term(id, &state, start, end, vector_pools)?
                                }
                                TermAdded::Existing(id) => {
                                    field.vectors.add_term(id, &state, start, end, vector_pools)?
                                }
                                TermAdded::SkippedLongTerm => {}
                            }
                        }
                    }
                }

                state.length += 1;
                state.position += 1;
                if config
                    .max_field_length
                    .is_some_and(|max| state.length as usize >= max)
                {
                    debug!(
                        "doc {doc_id}: field '{}' reached the maximum of {} tokens",
                        info.name, state.length
                    );
                    break 'instances;
                }
            }
            state.offset += tokens.end_offset() + config.offset_gap;
        }

        if do_vectors && let Some(vectors_doc) = vectors_doc.as_mut() {
            field.vectors.finish(
                field.number,
                &info.name,
                chars,
                vector_pools,
                vectors_doc,
                utf8_scratch,
            )?;
        }
        Ok(())
    }

    /// Clears the term-vector tables after a failed document.
    fn discard_document_vectors(&mut self) {
        for field in self.fields.values_mut() {
            if !field.vectors.table().is_empty() {
                field.vectors.table_mut().reset();
            }
        }
        self.vector_pools.reset();
    }

    /// Names of the fields with buffered postings.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, field)| field.used && !field.freq.table().is_empty())
            .map(|(name, _)| name.as_str())
    }

    /// Sorts the postings of every field; required before
    /// [`field_source`](Self::field_source).
    pub fn sort_for_flush(&mut self) {
        for field in self.fields.values_mut().filter(|field| field.used) {
            field.freq.table_mut().sort_postings(&self.chars);
        }
    }

    pub fn field_source(&self, name: &str) -> Option<FieldSource<'_>> {
        let field = self.fields.get(name)?;
        (field.used && !field.freq.table().is_empty()).then_some(FieldSource {
            field: &field.freq,
            chars: &self.chars,
            pools: &self.freq_pools,
        })
    }

    pub fn has_payloads(&self, name: &str) -> bool {
        self.fields
            .get(name)
            .is_some_and(|field| field.freq.has_payloads())
    }

    /// Bytes held by the pools and tables of this context.
    pub fn ram_bytes(&self) -> u64 {
        self.chars.allocated_bytes()
            + self.freq_pools.allocated_bytes()
            + self.vector_pools.allocated_bytes()
            + self
                .fields
                .values()
                .map(|field| {
                    field.freq.table().allocated_bytes() + field.vectors.table().allocated_bytes()
                })
                .sum::<u64>()
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Starts a new generation after a flush or an abort: every pool block goes
    /// back to the allocators, tables are shrunk, and fields not seen since the
    /// last reset are dropped.
    pub fn reset(&mut self, field_infos: &FieldInfos) {
        let budget = self.allocators.budget().clone();
        let max_term_length = self.max_term_length;
        self.fields.retain(|name, field| {
            if !field.used {
                return false;
            }
            field.used = false;
            field.vectors.reset();
            match field_infos.get(name) {
                Some(info) => field.freq.reset(info, max_term_length, &budget).is_ok(),
                None => false,
            }
        });
        self.chars.reset();
        self.freq_pools.reset();
        self.vector_pools.reset();
        self.doc_state = DocState::default();
    }
}

impl std::fmt::Debug for IndexingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingContext")
            .field("fields", &self.fields.len())
            .field("chars", &self.chars)
            .finish_non_exhaustive()
    }
}

/// Index ranges of runs of equally named fields; `fields` must be sorted by name.
fn group_ranges(fields: &[Field]) -> Vec<std::ops::Range<usize>> {
    let mut start = 0;
    fields
        .iter()
        .chunk_by(|field| field.name.as_str())
        .into_iter()
        .map(|(_, group)| {
            let end = start + group.count();
            let range = start..end;
            start = end;
            range
        })
        .collect()
}
