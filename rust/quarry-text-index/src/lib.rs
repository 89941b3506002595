//! In-memory construction of inverted indexes.
//!
//! Documents are made of named fields, each carrying a [`TokenStream`]. A
//! [`DocumentWriter`] inverts them from any number of threads into RAM-resident
//! postings (doc ids, term frequencies, positions, payloads and optional term
//! vectors), and a flush streams the accumulated postings in sorted order to a
//! [`SegmentWriter`].
//!
//! # Quick Start
//!
//! ```rust
//! use quarry_text_index::{
//!     Document, DocumentWriter, Field, FieldOptions, IndexerConfig, MemorySegmentWriter,
//! };
//!
//! let writer = DocumentWriter::new(IndexerConfig::default()).unwrap();
//! writer
//!     .add_document(Document::new().with_field(Field::text(
//!         "body",
//!         "the quick brown fox",
//!         FieldOptions::indexed(),
//!     )))
//!     .unwrap();
//!
//! let mut segment_writer = MemorySegmentWriter::new();
//! let info = writer.flush(&mut segment_writer).unwrap().unwrap();
//! assert_eq!(info.doc_count, 1);
//!
//! let segment = segment_writer.into_segment().unwrap();
//! let body = segment.field("body").unwrap();
//! assert_eq!(body.terms().collect::<Vec<_>>(), ["brown", "fox", "quick", "the"]);
//! ```

pub mod analysis;
pub mod buffered_deletes;
pub mod config;
pub mod document;
pub mod document_writer;
pub mod field_infos;
pub mod segment;
pub mod write;

pub use analysis::{PreTokenized, Token, TokenStream, WordTokenStream};
pub use buffered_deletes::DeleteTerm;
pub use config::IndexerConfig;
pub use document::{Document, Field, FieldOptions};
pub use document_writer::DocumentWriter;
pub use field_infos::{FieldInfo, FieldInfos};
pub use segment::{MemorySegment, MemorySegmentWriter, SegmentInfo, SegmentWriter};
