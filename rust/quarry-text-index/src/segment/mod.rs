//! The interface through which a flush hands its postings to a segment codec.

pub mod memory;

use quarry_common::Result;
use serde::{Deserialize, Serialize};

use crate::{buffered_deletes::DeleteTerm, field_infos::FieldInfo};

pub use memory::{MemorySegment, MemorySegmentWriter};

/// Position of one field's term vectors inside a document's vectors buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorFieldPointer {
    pub field_number: u32,
    /// Byte offset of the field's data in the document buffer.
    pub offset: u64,
}

/// Summary of a flushed segment, passed to [`SegmentWriter::finish`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub name: String,
    /// Number of document ids assigned in the segment, including deleted ones.
    pub doc_count: u32,
    pub has_vectors: bool,
    pub has_prox: bool,
    pub has_payloads: bool,
    /// Documents that failed while being indexed, in ascending order.
    pub deleted_docs: Vec<u32>,
    /// Buffered delete terms with the doc id horizon below which each applies.
    pub delete_terms: Vec<(DeleteTerm, u32)>,
}

/// Receives the content of a segment, in order.
///
/// Fields arrive by ascending name, terms of a field by ascending text, documents
/// of a term by ascending id and positions of a document ascending. A term is only
/// started when at least one of its documents is live.
///
/// Term vectors arrive after all fields, one call per document in doc id order.
/// Documents without vectors are passed with an empty pointer list.
pub trait SegmentWriter {
    fn start_field(&mut self, field: &FieldInfo) -> Result<()>;

    fn start_term(&mut self, term: &str) -> Result<()>;

    /// `term_freq` is 1 for fields that omit term frequencies.
    fn add_doc(&mut self, doc_id: u32, term_freq: u32) -> Result<()>;

    /// Not called for fields that omit term frequencies and positions.
    fn add_position(&mut self, position: u32, payload: Option<&[u8]>) -> Result<()>;

    fn finish_term(&mut self, doc_freq: u32) -> Result<()>;

    fn finish_field(&mut self) -> Result<()>;

    fn add_term_vectors(
        &mut self,
        doc_id: u32,
        fields: &[VectorFieldPointer],
        data: &[u8],
    ) -> Result<()>;

    fn finish(&mut self, info: &SegmentInfo) -> Result<()>;
}
