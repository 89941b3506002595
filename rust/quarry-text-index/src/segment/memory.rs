//! A segment codec that keeps everything in memory.
//!
//! Postings of a term are one byte buffer. Per document:
//!
//! ```text
//! vint  doc_delta << 1 | (freq == 1)
//! vint  freq                                   if freq > 1
//! freq times, for fields with positions:
//!   vint  position_delta << 1 | has_payload
//!   vint  payload length, bytes                if has_payload
//! ```
//!
//! Term vectors are kept exactly as the indexer produced them.

use quarry_block_pool::{DataInput, DataOutput, SliceCursor};
use quarry_common::{Result, error::Error, verify_data};

use super::{SegmentInfo, SegmentWriter, VectorFieldPointer};
use crate::{
    field_infos::FieldInfo,
    write::term_vectors::{STORE_OFFSETS, STORE_POSITIONS},
};

#[derive(Debug, Clone)]
struct MemoryTerm {
    text: String,
    doc_freq: u32,
    data: Vec<u8>,
}

/// The terms and postings of one field.
#[derive(Debug, Clone)]
pub struct MemoryField {
    info: FieldInfo,
    terms: Vec<MemoryTerm>,
}

impl MemoryField {
    pub fn info(&self) -> &FieldInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Terms in ascending order.
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|term| term.text.as_str())
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn doc_freq(&self, term: &str) -> Option<u32> {
        self.find(term).map(|term| term.doc_freq)
    }

    pub fn postings(&self, term: &str) -> Option<PostingsDecoder<'_>> {
        let term = self.find(term)?;
        Some(PostingsDecoder {
            input: SliceCursor::new(&term.data),
            remaining: term.doc_freq,
            doc_id: 0,
            has_positions: !self.info.omit_term_freq_and_positions,
        })
    }

    fn find(&self, term: &str) -> Option<&MemoryTerm> {
        self.terms
            .binary_search_by(|probe| utf16_cmp(&probe.text, term))
            .ok()
            .map(|i| &self.terms[i])
    }
}

/// Terms are ordered by UTF-16 code units, which differs from `str` ordering for
/// characters outside the BMP.
fn utf16_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

/// One document of a term's postings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: u32,
    pub freq: u32,
    pub positions: Vec<u32>,
    /// Payload of each position, parallel to `positions`.
    pub payloads: Vec<Option<Vec<u8>>>,
}

/// Decodes the postings of one term, document by document.
pub struct PostingsDecoder<'a> {
    input: SliceCursor<'a>,
    remaining: u32,
    doc_id: u32,
    has_positions: bool,
}

impl PostingsDecoder<'_> {
    fn read_posting(&mut self) -> Result<Posting> {
        let code = self.input.read_vint()?;
        self.doc_id += code >> 1;
        let freq = if code & 1 != 0 { 1 } else { self.input.read_vint()? };
        let mut posting = Posting {
            doc_id: self.doc_id,
            freq,
            positions: Vec::new(),
            payloads: Vec::new(),
        };
        if self.has_positions {
            let mut position = 0;
            for _ in 0..freq {
                let code = self.input.read_vint()?;
                position += code >> 1;
                let payload = if code & 1 != 0 {
                    let len = self.input.read_vint()? as usize;
                    Some(self.input.take(len)?.to_vec())
                } else {
                    None
                };
                posting.positions.push(position);
                posting.payloads.push(payload);
            }
        }
        Ok(posting)
    }
}

impl Iterator for PostingsDecoder<'_> {
    type Item = Result<Posting>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let posting = quarry_common::try_or_ret_some_err!(self.read_posting());
        Some(Ok(posting))
    }
}

/// A term of a document's term vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorTerm {
    pub text: String,
    pub freq: u32,
    /// Empty unless the field stores positions with its vectors.
    pub positions: Vec<u32>,
    /// `(start, end)` pairs; empty unless the field stores offsets.
    pub offsets: Vec<(u32, u32)>,
}

/// The term vector of one field of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorField {
    pub field_number: u32,
    pub terms: Vec<VectorTerm>,
}

/// Decodes the term vectors of one document, field by field.
pub struct TermVectorsDecoder<'a> {
    data: &'a [u8],
    fields: std::slice::Iter<'a, VectorFieldPointer>,
}

impl TermVectorsDecoder<'_> {
    fn read_field(&self, pointer: &VectorFieldPointer) -> Result<VectorField> {
        verify_data!(offset, pointer.offset as usize <= self.data.len());
        let mut input = SliceCursor::at(self.data, pointer.offset as usize);
        let num_terms = input.read_vint()?;
        let flags = input.read_byte()?;
        let mut last = Vec::new();
        let mut terms = Vec::with_capacity(num_terms as usize);
        for _ in 0..num_terms {
            let prefix = input.read_vint()? as usize;
            let suffix = input.read_vint()? as usize;
            verify_data!(prefix, prefix <= last.len());
            last.truncate(prefix);
            last.extend_from_slice(input.take(suffix)?);
            let text = String::from_utf8(last.clone())
                .map_err(|_| Error::invalid_format("term vector text"))?;
            let freq = input.read_vint()?;

            let mut positions = Vec::new();
            if flags & STORE_POSITIONS != 0 {
                let mut position = 0u32;
                for _ in 0..freq {
                    position += input.read_vint()?;
                    positions.push(position);
                }
            }
            let mut offsets = Vec::new();
            if flags & STORE_OFFSETS != 0 {
                let mut last_end = 0u32;
                for _ in 0..freq {
                    let start = last_end.wrapping_add(input.read_vint()?);
                    let end = start.wrapping_add(input.read_vint()?);
                    offsets.push((start, end));
                    last_end = end;
                }
            }
            terms.push(VectorTerm {
                text,
                freq,
                positions,
                offsets,
            });
        }
        Ok(VectorField {
            field_number: pointer.field_number,
            terms,
        })
    }
}

impl Iterator for TermVectorsDecoder<'_> {
    type Item = Result<VectorField>;

    fn next(&mut self) -> Option<Self::Item> {
        let pointer = self.fields.next()?;
        Some(self.read_field(pointer))
    }
}

#[derive(Debug, Clone)]
struct StoredVectors {
    doc_id: u32,
    fields: Vec<VectorFieldPointer>,
    data: Vec<u8>,
}

#[derive(Debug)]
struct OpenTerm {
    text: String,
    data: Vec<u8>,
    last_doc_id: Option<u32>,
    last_position: u32,
    positions_left: u32,
}

/// Collects a segment in memory; see [`MemorySegment`].
#[derive(Debug, Default)]
pub struct MemorySegmentWriter {
    fields: Vec<MemoryField>,
    field_open: bool,
    term: Option<OpenTerm>,
    vectors: Vec<StoredVectors>,
    info: Option<SegmentInfo>,
}

impl MemorySegmentWriter {
    pub fn new() -> MemorySegmentWriter {
        MemorySegmentWriter::default()
    }

    /// Fields written so far.
    pub fn fields(&self) -> &[MemoryField] {
        &self.fields
    }

    /// The finished segment; fails unless [`SegmentWriter::finish`] was called.
    pub fn into_segment(self) -> Result<MemorySegment> {
        let info = self
            .info
            .ok_or_else(|| Error::invalid_operation("segment not finished"))?;
        Ok(MemorySegment {
            info,
            fields: self.fields,
            vectors: self.vectors,
        })
    }

    fn open_term(&mut self) -> Result<&mut OpenTerm> {
        self.term
            .as_mut()
            .ok_or_else(|| Error::invalid_operation("no open term"))
    }
}

impl SegmentWriter for MemorySegmentWriter {
    fn start_field(&mut self, field: &FieldInfo) -> Result<()> {
        if self.field_open || self.info.is_some() {
            return Err(Error::invalid_operation("start_field"));
        }
        if let Some(last) = self.fields.last() {
            verify_data!(field_order, last.info.name < field.name);
        }
        self.fields.push(MemoryField {
            info: field.clone(),
            terms: Vec::new(),
        });
        self.field_open = true;
        Ok(())
    }

    fn start_term(&mut self, term: &str) -> Result<()> {
        if !self.field_open || self.term.is_some() {
            return Err(Error::invalid_operation("start_term"));
        }
        if let Some(last) = self.fields.last().and_then(|field| field.terms.last()) {
            verify_data!(term_order, utf16_cmp(&last.text, term).is_lt());
        }
        self.term = Some(OpenTerm {
            text: term.to_string(),
            data: Vec::new(),
            last_doc_id: None,
            last_position: 0,
            positions_left: 0,
        });
        Ok(())
    }

    fn add_doc(&mut self, doc_id: u32, term_freq: u32) -> Result<()> {
        let has_positions = self
            .fields
            .last()
            .is_some_and(|field| !field.info.omit_term_freq_and_positions);
        let term = self.open_term()?;
        verify_data!(positions_left, term.positions_left == 0);
        let delta = match term.last_doc_id {
            Some(last) => {
                verify_data!(doc_order, doc_id > last);
                doc_id - last
            }
            None => doc_id,
        };
        verify_data!(term_freq, term_freq > 0);
        if term_freq == 1 {
            term.data.write_vint((delta << 1) | 1)?;
        } else {
            term.data.write_vint(delta << 1)?;
            term.data.write_vint(term_freq)?;
        }
        term.last_doc_id = Some(doc_id);
        term.last_position = 0;
        term.positions_left = if has_positions { term_freq } else { 0 };
        Ok(())
    }

    fn add_position(&mut self, position: u32, payload: Option<&[u8]>) -> Result<()> {
        let term = self.open_term()?;
        verify_data!(positions_left, term.positions_left > 0);
        verify_data!(position_order, position >= term.last_position);
        let delta = position - term.last_position;
        match payload {
            Some(payload) => {
                term.data.write_vint((delta << 1) | 1)?;
                term.data.write_vint(payload.len() as u32)?;
                term.data.write_bytes(payload)?;
            }
            None => term.data.write_vint(delta << 1)?,
        }
        term.last_position = position;
        term.positions_left -= 1;
        Ok(())
    }

    fn finish_term(&mut self, doc_freq: u32) -> Result<()> {
        let term = self
            .term
            .take()
            .ok_or_else(|| Error::invalid_operation("finish_term"))?;
        let field = self
            .fields
            .last_mut()
            .ok_or_else(|| Error::invalid_operation("finish_term"))?;
        verify_data!(positions_left, term.positions_left == 0);
        field.terms.push(MemoryTerm {
            text: term.text,
            doc_freq,
            data: term.data,
        });
        Ok(())
    }

    fn finish_field(&mut self) -> Result<()> {
        if !self.field_open || self.term.is_some() {
            return Err(Error::invalid_operation("finish_field"));
        }
        self.field_open = false;
        Ok(())
    }

    fn add_term_vectors(
        &mut self,
        doc_id: u32,
        fields: &[VectorFieldPointer],
        data: &[u8],
    ) -> Result<()> {
        if let Some(last) = self.vectors.last() {
            verify_data!(vector_doc_order, last.doc_id < doc_id);
        }
        self.vectors.push(StoredVectors {
            doc_id,
            fields: fields.to_vec(),
            data: data.to_vec(),
        });
        Ok(())
    }

    fn finish(&mut self, info: &SegmentInfo) -> Result<()> {
        if self.field_open {
            return Err(Error::invalid_operation("finish"));
        }
        self.info = Some(info.clone());
        Ok(())
    }
}

/// A segment produced by [`MemorySegmentWriter`].
#[derive(Debug, Clone)]
pub struct MemorySegment {
    info: SegmentInfo,
    fields: Vec<MemoryField>,
    vectors: Vec<StoredVectors>,
}

impl MemorySegment {
    pub fn info(&self) -> &SegmentInfo {
        &self.info
    }

    pub fn fields(&self) -> &[MemoryField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&MemoryField> {
        self.fields.iter().find(|field| field.info.name == name)
    }

    pub fn field_by_number(&self, number: u32) -> Option<&MemoryField> {
        self.fields.iter().find(|field| field.info.number == number)
    }

    pub fn postings(&self, field: &str, term: &str) -> Option<PostingsDecoder<'_>> {
        self.field(field)?.postings(term)
    }

    /// Decoded postings of a term; empty when the term does not exist.
    pub fn read_postings(&self, field: &str, term: &str) -> Result<Vec<Posting>> {
        match self.postings(field, term) {
            Some(decoder) => decoder.collect(),
            None => Ok(Vec::new()),
        }
    }

    /// Number of documents passed to
    /// [`add_term_vectors`](SegmentWriter::add_term_vectors).
    pub fn num_vector_docs(&self) -> usize {
        self.vectors.len()
    }

    pub fn term_vectors(&self, doc_id: u32) -> Option<TermVectorsDecoder<'_>> {
        let index = self
            .vectors
            .binary_search_by_key(&doc_id, |stored| stored.doc_id)
            .ok()?;
        let stored = &self.vectors[index];
        Some(TermVectorsDecoder {
            data: &stored.data,
            fields: stored.fields.iter(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{document::FieldOptions, field_infos::FieldInfos};

    fn info(name: &str, options: FieldOptions) -> FieldInfo {
        FieldInfos::new().add(name, &options).clone()
    }

    fn segment_info() -> SegmentInfo {
        SegmentInfo {
            name: "_0".to_string(),
            doc_count: 10,
            has_vectors: false,
            has_prox: true,
            has_payloads: true,
            deleted_docs: Vec::new(),
            delete_terms: Vec::new(),
        }
    }

    #[test]
    fn test_postings_round_trip() {
        let mut writer = MemorySegmentWriter::new();
        writer.start_field(&info("body", FieldOptions::indexed())).unwrap();
        writer.start_term("cat").unwrap();
        writer.add_doc(2, 1).unwrap();
        writer.add_position(7, Some(b"p")).unwrap();
        writer.add_doc(9, 3).unwrap();
        for position in [0, 4, 5] {
            writer.add_position(position, None).unwrap();
        }
        writer.finish_term(2).unwrap();
        writer.finish_field().unwrap();
        writer.finish(&segment_info()).unwrap();

        let segment = writer.into_segment().unwrap();
        let postings = segment.read_postings("body", "cat").unwrap();
        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].doc_id, 2);
        assert_eq!(postings[0].payloads, [Some(b"p".to_vec())]);
        assert_eq!(postings[1].doc_id, 9);
        assert_eq!(postings[1].positions, [0, 4, 5]);
        assert_eq!(segment.field("body").unwrap().doc_freq("cat"), Some(2));
        assert!(segment.read_postings("body", "dog").unwrap().is_empty());
    }

    #[test]
    fn test_docs_only_field() {
        let mut writer = MemorySegmentWriter::new();
        writer.start_field(&info("id", FieldOptions::docs_only())).unwrap();
        writer.start_term("k").unwrap();
        writer.add_doc(0, 1).unwrap();
        writer.add_doc(3, 1).unwrap();
        writer.finish_term(2).unwrap();
        writer.finish_field().unwrap();
        writer.finish(&segment_info()).unwrap();
        let segment = writer.into_segment().unwrap();
        let docs = segment
            .read_postings("id", "k")
            .unwrap()
            .into_iter()
            .map(|p| (p.doc_id, p.positions.len()))
            .collect::<Vec<_>>();
        assert_eq!(docs, [(0, 0), (3, 0)]);
    }

    #[test]
    fn test_out_of_order_calls_are_rejected() {
        let mut writer = MemorySegmentWriter::new();
        assert!(writer.start_term("a").is_err());
        writer.start_field(&info("f", FieldOptions::indexed())).unwrap();
        writer.start_term("b").unwrap();
        writer.add_doc(5, 1).unwrap();
        assert!(writer.add_doc(6, 1).is_err());
        writer.add_position(0, None).unwrap();
        assert!(writer.add_doc(5, 1).is_err());
        writer.finish_term(1).unwrap();
        assert!(writer.start_term("a").is_err());
        assert!(MemorySegmentWriter::new().into_segment().is_err());
    }

    #[test]
    fn test_terms_sort_by_code_units() {
        let mut writer = MemorySegmentWriter::new();
        writer.start_field(&info("f", FieldOptions::docs_only())).unwrap();
        // U+1F600 is a surrogate pair and sorts before U+FF21.
        for term in ["\u{1F600}", "\u{FF21}"] {
            writer.start_term(term).unwrap();
            writer.add_doc(0, 1).unwrap();
            writer.finish_term(1).unwrap();
        }
        writer.finish_field().unwrap();
        assert_eq!(writer.fields()[0].doc_freq("\u{FF21}"), Some(1));
        assert_eq!(writer.fields()[0].doc_freq("\u{1F600}"), Some(1));
    }

    #[test]
    fn test_truncated_vectors_fail() {
        let segment = MemorySegment {
            info: segment_info(),
            fields: Vec::new(),
            vectors: vec![StoredVectors {
                doc_id: 0,
                fields: vec![VectorFieldPointer {
                    field_number: 0,
                    offset: 0,
                }],
                data: vec![2, STORE_POSITIONS, 0, 3, b'a'],
            }],
        };
        let fields = segment.term_vectors(0).unwrap().collect::<Vec<_>>();
        assert!(fields[0].is_err());
        assert!(segment.term_vectors(1).is_none());
    }
}
