//! Per-document term vectors.
//!
//! While a field is inverted, the secondary postings table of the field collects
//! frequencies, positions (stream 0) and offsets (stream 1) of each term in the
//! current document. When the field is done its terms are written, sorted, to the
//! document's [`PerDocVectors`] buffer and the table is cleared again.
//!
//! Layout of one field in the buffer:
//!
//! ```text
//! vint   num_terms
//! byte   flags (0x1 positions, 0x2 offsets)
//! num_terms times:
//!   vint   prefix length shared with the previous term (UTF-8 bytes)
//!   vint   suffix length
//!   bytes  suffix
//!   vint   freq
//!   [freq x vint position delta]                       if positions
//!   [freq x (vint start delta, vint end - start)]      if offsets
//! ```

use quarry_block_pool::{BlockAllocator, BlockBuffer, CharPool, DataOutput};
use quarry_budget_tracker::RamBudget;
use quarry_common::Result;
use quarry_unicode::conversion::{common_prefix_len, utf16_to_utf8_into};

use super::{
    freq_prox::FieldInvertState,
    postings_array::VectorPostings,
    postings_table::{PostingsTable, StreamPools, TableRole},
};
use crate::{document::FieldOptions, segment::VectorFieldPointer};

pub const POSITIONS_STREAM: usize = 0;
pub const OFFSETS_STREAM: usize = 1;

pub const STORE_POSITIONS: u8 = 0x1;
pub const STORE_OFFSETS: u8 = 0x2;

/// The term vectors of one document.
#[derive(Debug)]
pub struct PerDocVectors {
    doc_id: u32,
    buffer: BlockBuffer,
    fields: Vec<VectorFieldPointer>,
    last_field_name: String,
}

impl PerDocVectors {
    pub fn new(doc_id: u32, allocator: BlockAllocator<u8>) -> PerDocVectors {
        PerDocVectors {
            doc_id,
            buffer: BlockBuffer::new(allocator),
            fields: Vec::new(),
            last_field_name: String::new(),
        }
    }

    pub fn doc_id(&self) -> u32 {
        self.doc_id
    }

    pub fn fields(&self) -> &[VectorFieldPointer] {
        &self.fields
    }

    pub fn buffer(&self) -> &BlockBuffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut BlockBuffer {
        &mut self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Bytes of per-document blocks held by this document.
    pub fn allocated_bytes(&self) -> u64 {
        self.buffer.allocated_bytes()
    }

    fn add_field(&mut self, number: u32, name: &str) {
        debug_assert!(
            self.fields.is_empty() || self.last_field_name.as_str() < name,
            "vector fields out of order: {} after {}",
            name,
            self.last_field_name
        );
        self.last_field_name.clear();
        self.last_field_name.push_str(name);
        self.fields.push(VectorFieldPointer {
            field_number: number,
            offset: self.buffer.len() as u64,
        });
    }
}

/// The term-vector consumer of one field of an indexing context.
pub struct TermVectorsField {
    table: PostingsTable<VectorPostings>,
    do_vectors: bool,
    do_positions: bool,
    do_offsets: bool,
}

impl TermVectorsField {
    pub fn new(max_term_length: usize, budget: &RamBudget) -> Result<Self> {
        Ok(TermVectorsField {
            table: PostingsTable::new(TableRole::Secondary, 2, max_term_length, budget)?,
            do_vectors: false,
            do_positions: false,
            do_offsets: false,
        })
    }

    pub fn table(&self) -> &PostingsTable<VectorPostings> {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut PostingsTable<VectorPostings> {
        &mut self.table
    }

    pub fn do_vectors(&self) -> bool {
        self.do_vectors
    }

    /// Prepares for the instances of the field in the current document; returns
    /// whether vectors are recorded.
    pub fn start<'o>(
        &mut self,
        instances: impl IntoIterator<Item = &'o FieldOptions>,
        pools: &mut StreamPools,
    ) -> bool {
        self.do_vectors = false;
        self.do_positions = false;
        self.do_offsets = false;
        for options in instances {
            if options.store_term_vectors {
                self.do_vectors = true;
                self.do_positions |= options.store_positions_with_vectors;
                self.do_offsets |= options.store_offsets_with_vectors;
            }
        }
        if self.do_vectors && !self.table.is_empty() {
            // Left over by a document that failed inside this field.
            self.table.reset();
            pools.reset();
        }
        self.do_vectors
    }

    pub fn new_term(
        &mut self,
        term_id: u32,
        state: &FieldInvertState,
        start_offset: u32,
        end_offset: u32,
        pools: &mut StreamPools,
    ) -> Result<()> {
        let id = term_id as usize;
        let mut streams = self.table.streams(term_id, pools);
        let postings = self.table.postings_mut();
        postings.freqs[id] = 1;
        if self.do_offsets {
            let start = state.offset + start_offset;
            let end = state.offset + end_offset;
            streams.write_vint(OFFSETS_STREAM, start)?;
            streams.write_vint(OFFSETS_STREAM, end.wrapping_sub(start))?;
            postings.last_offsets[id] = end;
        }
        if self.do_positions {
            streams.write_vint(POSITIONS_STREAM, state.position)?;
            postings.last_positions[id] = state.position;
        }
        Ok(())
    }

    pub fn add_term(
        &mut self,
        term_id: u32,
        state: &FieldInvertState,
        start_offset: u32,
        end_offset: u32,
        pools: &mut StreamPools,
    ) -> Result<()> {
        let id = term_id as usize;
        let mut streams = self.table.streams(term_id, pools);
        let postings = self.table.postings_mut();
        postings.freqs[id] += 1;
        if self.do_offsets {
            let start = state.offset + start_offset;
            let end = state.offset + end_offset;
            streams.write_vint(OFFSETS_STREAM, start.wrapping_sub(postings.last_offsets[id]))?;
            streams.write_vint(OFFSETS_STREAM, end.wrapping_sub(start))?;
            postings.last_offsets[id] = end;
        }
        if self.do_positions {
            streams.write_vint(POSITIONS_STREAM, state.position - postings.last_positions[id])?;
            postings.last_positions[id] = state.position;
        }
        Ok(())
    }

    /// Writes the collected vectors of the field to `doc` and clears the table and
    /// the vector pools.
    ///
    /// `scratch` holds the UTF-8 bytes of the previous and the current term.
    pub fn finish(
        &mut self,
        field_number: u32,
        field_name: &str,
        chars: &CharPool,
        pools: &mut StreamPools,
        doc: &mut PerDocVectors,
        scratch: &mut [Vec<u8>; 2],
    ) -> Result<()> {
        let num_postings = self.table.num_postings();
        if !self.do_vectors || num_postings == 0 {
            return Ok(());
        }
        doc.add_field(field_number, field_name);

        self.table.sort_postings(chars);
        let table = &self.table;
        let out = &mut doc.buffer;
        out.write_vint(num_postings as u32)?;
        let mut flags = 0;
        if self.do_positions {
            flags |= STORE_POSITIONS;
        }
        if self.do_offsets {
            flags |= STORE_OFFSETS;
        }
        out.write_byte(flags)?;

        let [first, second] = scratch;
        let (mut last, mut current) = (first, second);
        for (i, &term_id) in table.sorted_term_ids().iter().enumerate() {
            utf16_to_utf8_into(table.term_text(term_id, chars), current);
            let prefix = if i > 0 { common_prefix_len(last, current) } else { 0 };
            out.write_vint(prefix as u32)?;
            out.write_vint((current.len() - prefix) as u32)?;
            out.write_bytes(&current[prefix..])?;
            out.write_vint(table.postings().freqs[term_id as usize])?;
            if self.do_positions {
                table
                    .slice_reader(term_id, POSITIONS_STREAM, pools)
                    .write_to(out)?;
            }
            if self.do_offsets {
                table
                    .slice_reader(term_id, OFFSETS_STREAM, pools)
                    .write_to(out)?;
            }
            std::mem::swap(&mut last, &mut current);
        }

        self.table.reset();
        pools.reset();
        Ok(())
    }

    /// Clears the table after a flush or an abort and releases its memory.
    pub fn reset(&mut self) {
        self.table.shrink();
        self.do_vectors = false;
    }
}
