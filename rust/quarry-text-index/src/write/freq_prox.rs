//! Buffers document ids, term frequencies, positions and payloads of one field.
//!
//! Each term has two streams: stream 0 holds the documents, stream 1 the
//! positions. Fields that omit term frequencies and positions use stream 0 only.
//!
//! Stream 0 lags one document behind: the entry of the last document containing
//! the term stays in the postings array (`last_doc_codes`, `doc_freqs`) until the
//! term shows up in a later document, since its frequency is not known before.
//!
//! Encodings:
//! - document entry: `doc_delta << 1 | 1` when the frequency is 1, otherwise
//!   `doc_delta << 1` followed by the frequency; plain `doc_delta` when frequencies
//!   are omitted;
//! - position entry: `position_delta << 1 | has_payload`, followed by the payload
//!   length and bytes when a non-empty payload is present. The first position of a
//!   term in a document is stored as is.

use quarry_budget_tracker::RamBudget;
use quarry_common::Result;

use super::{
    postings_array::FreqProxPostings,
    postings_table::{PostingsTable, StreamPools, TableRole},
};
use crate::field_infos::FieldInfo;

pub const DOC_STREAM: usize = 0;
pub const PROX_STREAM: usize = 1;

/// Per-field inversion state, kept across all instances of a field in one
/// document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldInvertState {
    /// Position of the token being added; one past it between tokens.
    pub position: u32,
    /// Number of indexed tokens.
    pub length: u32,
    /// Offset added to token offsets of the current instance.
    pub offset: u32,
    pub max_term_frequency: u32,
}

impl FieldInvertState {
    pub fn reset(&mut self) {
        *self = FieldInvertState::default();
    }
}

/// The freq/prox consumer of one field of an indexing context.
pub struct FreqProxField {
    table: PostingsTable<FreqProxPostings>,
    omit_term_freq_and_positions: bool,
    has_payloads: bool,
}

impl FreqProxField {
    pub fn new(info: &FieldInfo, max_term_length: usize, budget: &RamBudget) -> Result<Self> {
        let omit = info.omit_term_freq_and_positions;
        let table =
            PostingsTable::new(TableRole::Primary, stream_count(omit), max_term_length, budget)?;
        Ok(FreqProxField {
            table,
            omit_term_freq_and_positions: omit,
            has_payloads: false,
        })
    }

    pub fn table(&self) -> &PostingsTable<FreqProxPostings> {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut PostingsTable<FreqProxPostings> {
        &mut self.table
    }

    /// The layout of the buffered streams, fixed until the next flush.
    pub fn omit_term_freq_and_positions(&self) -> bool {
        self.omit_term_freq_and_positions
    }

    /// Whether any buffered position carries a payload.
    pub fn has_payloads(&self) -> bool {
        self.has_payloads
    }

    /// First occurrence of `term_id` since the last flush.
    pub fn new_term(
        &mut self,
        term_id: u32,
        doc_id: u32,
        state: &mut FieldInvertState,
        payload: Option<&[u8]>,
        pools: &mut StreamPools,
    ) -> Result<()> {
        let id = term_id as usize;
        let postings = self.table.postings_mut();
        postings.last_doc_ids[id] = doc_id;
        if self.omit_term_freq_and_positions {
            postings.last_doc_codes[id] = doc_id;
        } else {
            postings.last_doc_codes[id] = doc_id << 1;
            postings.doc_freqs[id] = 1;
            self.write_prox(term_id, state.position, state.position, payload, pools)?;
        }
        state.max_term_frequency = state.max_term_frequency.max(1);
        Ok(())
    }

    /// Another occurrence of a term that was seen before, in this or an earlier
    /// document.
    pub fn add_term(
        &mut self,
        term_id: u32,
        doc_id: u32,
        state: &mut FieldInvertState,
        payload: Option<&[u8]>,
        pools: &mut StreamPools,
    ) -> Result<()> {
        let id = term_id as usize;
        let postings = self.table.postings();
        let last_doc_id = postings.last_doc_ids[id];
        let last_doc_code = postings.last_doc_codes[id];
        let doc_freq = postings.doc_freqs[id];
        debug_assert!(doc_id >= last_doc_id);

        if self.omit_term_freq_and_positions {
            if doc_id != last_doc_id {
                self.table
                    .streams(term_id, pools)
                    .write_vint(DOC_STREAM, last_doc_code)?;
                let postings = self.table.postings_mut();
                postings.last_doc_codes[id] = doc_id - last_doc_id;
                postings.last_doc_ids[id] = doc_id;
            }
            return Ok(());
        }

        debug_assert!(doc_freq > 0);
        if doc_id != last_doc_id {
            let mut streams = self.table.streams(term_id, pools);
            if doc_freq == 1 {
                streams.write_vint(DOC_STREAM, last_doc_code | 1)?;
            } else {
                streams.write_vint(DOC_STREAM, last_doc_code)?;
                streams.write_vint(DOC_STREAM, doc_freq)?;
            }
            let postings = self.table.postings_mut();
            postings.doc_freqs[id] = 1;
            postings.last_doc_codes[id] = (doc_id - last_doc_id) << 1;
            postings.last_doc_ids[id] = doc_id;
            state.max_term_frequency = state.max_term_frequency.max(1);
            self.write_prox(term_id, state.position, state.position, payload, pools)?;
        } else {
            let postings = self.table.postings_mut();
            postings.doc_freqs[id] += 1;
            state.max_term_frequency = state.max_term_frequency.max(postings.doc_freqs[id]);
            let delta = state.position - postings.last_positions[id];
            self.write_prox(term_id, delta, state.position, payload, pools)?;
        }
        Ok(())
    }

    fn write_prox(
        &mut self,
        term_id: u32,
        prox_code: u32,
        position: u32,
        payload: Option<&[u8]>,
        pools: &mut StreamPools,
    ) -> Result<()> {
        let mut streams = self.table.streams(term_id, pools);
        match payload.filter(|payload| !payload.is_empty()) {
            Some(payload) => {
                streams.write_vint(PROX_STREAM, (prox_code << 1) | 1)?;
                streams.write_vint(PROX_STREAM, payload.len() as u32)?;
                streams.write_bytes(PROX_STREAM, payload)?;
                self.has_payloads = true;
            }
            None => streams.write_vint(PROX_STREAM, prox_code << 1)?,
        }
        self.table.postings_mut().last_positions[term_id as usize] = position;
        Ok(())
    }

    /// Clears the buffered terms after a flush or an abort, releasing the table's
    /// memory, and adopts the current stream layout of the field.
    pub fn reset(
        &mut self,
        info: &FieldInfo,
        max_term_length: usize,
        budget: &RamBudget,
    ) -> Result<()> {
        self.has_payloads = false;
        if self.omit_term_freq_and_positions != info.omit_term_freq_and_positions {
            *self = FreqProxField::new(info, max_term_length, budget)?;
        } else {
            self.table.shrink();
        }
        Ok(())
    }
}

fn stream_count(omit_term_freq_and_positions: bool) -> usize {
    if omit_term_freq_and_positions { 1 } else { 2 }
}
