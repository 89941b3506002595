//! Merges the buffered postings of one field across indexing contexts and streams
//! them to a [`SegmentWriter`].

use ahash::AHashSet;
use quarry_block_pool::{ByteSliceReader, CharPool, DataInput};
use quarry_common::Result;
use quarry_unicode::conversion::utf16_to_string;

use super::{
    freq_prox::{DOC_STREAM, FreqProxField, PROX_STREAM},
    postings_table::{StreamPools, term_text},
};
use crate::{field_infos::FieldInfo, segment::SegmentWriter};

/// The buffered postings of a field in one context, together with the pools that
/// hold them. The table must have been sorted.
pub struct FieldSource<'a> {
    pub field: &'a FreqProxField,
    pub chars: &'a CharPool,
    pub pools: &'a StreamPools,
}

/// Walks the sorted terms of one [`FieldSource`] and the documents of its current
/// term.
struct FieldMergeState<'a> {
    source: &'a FieldSource<'a>,
    term_ids: &'a [u32],
    next_term: usize,
    term_id: u32,
    text: &'a [u16],
    freq: Option<ByteSliceReader<'a>>,
    prox: Option<ByteSliceReader<'a>>,
    doc_id: u32,
    term_freq: u32,
    /// The last document of the term still sits in the postings array.
    last_doc_pending: bool,
}

impl<'a> FieldMergeState<'a> {
    fn new(source: &'a FieldSource<'a>) -> FieldMergeState<'a> {
        FieldMergeState {
            source,
            term_ids: source.field.table().sorted_term_ids(),
            next_term: 0,
            term_id: 0,
            text: &[],
            freq: None,
            prox: None,
            doc_id: 0,
            term_freq: 0,
            last_doc_pending: false,
        }
    }

    fn omits_positions(&self) -> bool {
        self.source.field.omit_term_freq_and_positions()
    }

    /// Moves to the next term and its first document.
    fn next_term(&mut self) -> Result<bool> {
        let Some(&term_id) = self.term_ids.get(self.next_term) else {
            return Ok(false);
        };
        self.next_term += 1;
        let table = self.source.field.table();
        self.term_id = term_id;
        self.text = term_text(self.source.chars, table.text_start(term_id));
        self.doc_id = 0;
        self.last_doc_pending = true;
        self.freq = Some(table.slice_reader(term_id, DOC_STREAM, self.source.pools));
        self.prox = (!self.omits_positions())
            .then(|| table.slice_reader(term_id, PROX_STREAM, self.source.pools));

        let found = self.next_doc()?;
        debug_assert!(found);
        Ok(true)
    }

    /// Moves to the next document of the current term.
    fn next_doc(&mut self) -> Result<bool> {
        let omit = self.omits_positions();
        let Some(freq) = self.freq.as_mut() else {
            return Ok(false);
        };
        if freq.eof() {
            if !self.last_doc_pending {
                return Ok(false);
            }
            let postings = self.source.field.table().postings();
            let id = self.term_id as usize;
            self.last_doc_pending = false;
            self.doc_id = postings.last_doc_ids[id];
            self.term_freq = if omit { 1 } else { postings.doc_freqs[id] };
            return Ok(true);
        }

        let code = freq.read_vint()?;
        if omit {
            self.doc_id += code;
            self.term_freq = 1;
        } else {
            self.doc_id += code >> 1;
            self.term_freq = if code & 1 != 0 { 1 } else { freq.read_vint()? };
        }
        debug_assert_ne!(
            self.doc_id,
            self.source.field.table().postings().last_doc_ids[self.term_id as usize]
        );
        Ok(true)
    }

    /// Decodes the positions of the current document, passing them to `emit`.
    fn read_positions(
        &mut self,
        payload: &mut Vec<u8>,
        mut emit: impl FnMut(u32, Option<&[u8]>) -> Result<()>,
    ) -> Result<()> {
        let Some(prox) = self.prox.as_mut() else {
            return Ok(());
        };
        let mut position = 0u32;
        for _ in 0..self.term_freq {
            let code = prox.read_vint()?;
            position += code >> 1;
            if code & 1 != 0 {
                let len = prox.read_vint()? as usize;
                payload.resize(len, 0);
                prox.read_bytes(payload)?;
                emit(position, Some(payload.as_slice()))?;
            } else {
                emit(position, None)?;
            }
        }
        Ok(())
    }
}

/// Streams the merged postings of `info`'s field to `writer`.
///
/// Terms are visited in ascending text order across all sources and the
/// documents of a term in ascending id order. Documents in `deleted_docs` are
/// dropped; terms left without documents are not started at all.
pub fn append_postings(
    info: &FieldInfo,
    sources: &[FieldSource<'_>],
    deleted_docs: &AHashSet<u32>,
    writer: &mut dyn SegmentWriter,
) -> Result<()> {
    let mut states = Vec::with_capacity(sources.len());
    for source in sources {
        let mut state = FieldMergeState::new(source);
        if state.next_term()? {
            states.push(state);
        }
    }

    let emit_positions = !info.omit_term_freq_and_positions;
    let mut payload = Vec::new();
    let mut matching = Vec::with_capacity(states.len());
    while !states.is_empty() {
        let Some(text) = states.iter().map(|state| state.text).min() else {
            break;
        };
        matching.clear();
        matching.extend((0..states.len()).filter(|&i| states[i].text == text));

        let mut term_started = false;
        let mut doc_freq = 0u32;
        let mut active = matching.clone();
        while !active.is_empty() {
            let Some((k, _)) = active
                .iter()
                .enumerate()
                .min_by_key(|&(_, &i)| states[i].doc_id)
            else {
                break;
            };
            let state = &mut states[active[k]];
            let live = !deleted_docs.contains(&state.doc_id);
            if live {
                if !term_started {
                    writer.start_term(&utf16_to_string(text))?;
                    term_started = true;
                }
                let term_freq = if emit_positions { state.term_freq } else { 1 };
                writer.add_doc(state.doc_id, term_freq)?;
                doc_freq += 1;
            }
            // Positions are consumed even for dropped documents to stay in sync.
            state.read_positions(&mut payload, |position, payload| {
                if live && emit_positions {
                    writer.add_position(position, payload)
                } else {
                    Ok(())
                }
            })?;
            if !state.next_doc()? {
                active.swap_remove(k);
            }
        }
        if term_started {
            writer.finish_term(doc_freq)?;
        }

        for &i in matching.iter().rev() {
            if !states[i].next_term()? {
                states.swap_remove(i);
            }
        }
    }
    Ok(())
}
