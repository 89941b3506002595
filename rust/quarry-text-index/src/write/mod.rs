//! In-memory inversion of documents.
//!
//! # Architecture Overview
//!
//! - **Postings tables** ([`postings_table`]) map term text to dense term ids and
//!   own the per-term streams, backed by a structure-of-arrays
//!   ([`postings_array`]).
//! - **Consumers** encode what a table sees: [`freq_prox`] writes doc ids,
//!   frequencies, positions and payloads; [`term_vectors`] writes the per-document
//!   term vectors.
//! - **The indexing context** ([`context`]) holds the pools and tables used by
//!   one caller at a time and drives a document through them.
//! - **Flush support**: [`field_merge`] merges the postings of every context into
//!   a [`SegmentWriter`](crate::segment::SegmentWriter); [`wait_queue`] and
//!   [`vectors_store`] put per-document output back into doc id order.

pub mod context;
pub mod field_merge;
pub mod freq_prox;
pub mod postings_array;
pub mod postings_table;
pub mod term_vectors;
pub mod vectors_store;
pub mod wait_queue;
