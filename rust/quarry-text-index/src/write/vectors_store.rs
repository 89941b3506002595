use quarry_budget_tracker::{Allocation, RamBudget};
use quarry_common::Result;

use super::term_vectors::PerDocVectors;
use crate::segment::{SegmentWriter, VectorFieldPointer};

#[derive(Debug, Clone)]
struct StoredDoc {
    doc_id: u32,
    fields: Vec<VectorFieldPointer>,
    start: usize,
    end: usize,
}

/// Term vectors of the committed documents of the current generation, in doc id
/// order.
pub struct TermVectorsStore {
    data: Vec<u8>,
    docs: Vec<StoredDoc>,
    has_vectors: bool,
    allocation: Allocation,
}

impl TermVectorsStore {
    pub fn new(budget: &RamBudget) -> Result<TermVectorsStore> {
        Ok(TermVectorsStore {
            data: Vec::new(),
            docs: Vec::new(),
            has_vectors: false,
            allocation: budget.allocate(0)?,
        })
    }

    /// Appends the vectors of the next document. The per-document blocks go back
    /// to their allocator.
    pub fn append(&mut self, doc: PerDocVectors) -> Result<()> {
        self.check_order(doc.doc_id());
        let start = self.data.len();
        self.allocation.grow(doc.buffer().len() as u64)?;
        doc.buffer().write_to(&mut self.data)?;
        self.has_vectors |= !doc.is_empty();
        self.docs.push(StoredDoc {
            doc_id: doc.doc_id(),
            fields: doc.fields().to_vec(),
            start,
            end: self.data.len(),
        });
        Ok(())
    }

    /// Records a document without vectors.
    pub fn fill(&mut self, doc_id: u32) {
        self.check_order(doc_id);
        let end = self.data.len();
        self.docs.push(StoredDoc {
            doc_id,
            fields: Vec::new(),
            start: end,
            end,
        });
    }

    /// Whether any committed document has vectors.
    pub fn has_vectors(&self) -> bool {
        self.has_vectors
    }

    pub fn num_docs(&self) -> usize {
        self.docs.len()
    }

    pub fn ram_bytes(&self) -> u64 {
        self.allocation.amount()
    }

    /// Passes every committed document to `writer`; nothing is written when no
    /// document has vectors.
    pub fn write_to(&self, writer: &mut dyn SegmentWriter) -> Result<()> {
        if !self.has_vectors {
            return Ok(());
        }
        for doc in &self.docs {
            writer.add_term_vectors(doc.doc_id, &doc.fields, &self.data[doc.start..doc.end])?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.data = Vec::new();
        self.docs.clear();
        self.has_vectors = false;
        self.allocation.shrink_to(0);
    }

    fn check_order(&self, doc_id: u32) {
        debug_assert!(
            self.docs.last().is_none_or(|last| last.doc_id < doc_id),
            "term vectors committed out of order"
        );
    }
}

impl std::fmt::Debug for TermVectorsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermVectorsStore")
            .field("docs", &self.docs.len())
            .field("bytes", &self.data.len())
            .finish()
    }
}
