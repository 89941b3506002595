use std::collections::BTreeMap;

use quarry_budget_tracker::{Allocation, RamBudget};
use quarry_common::Result;
use serde::{Deserialize, Serialize};

/// A term whose documents are to be deleted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeleteTerm {
    pub field: String,
    pub text: String,
}

impl DeleteTerm {
    pub fn new(field: impl Into<String>, text: impl Into<String>) -> DeleteTerm {
        DeleteTerm {
            field: field.into(),
            text: text.into(),
        }
    }

    fn ram_bytes(&self) -> u64 {
        BYTES_PER_DELETE_TERM + 2 * (self.field.len() + self.text.len()) as u64
    }
}

/// Estimated bookkeeping cost of one buffered term, beyond its text.
const BYTES_PER_DELETE_TERM: u64 = 64;

const BYTES_PER_DELETE_DOC_ID: u64 = 28;

/// Deletes buffered since the last flush.
///
/// A delete term carries a horizon: the number of documents that had been
/// assigned ids when it was buffered. It applies to documents with smaller ids
/// only, so a document added after the delete survives it. Documents that failed
/// while being indexed are deleted by id.
pub struct BufferedDeletes {
    terms: BTreeMap<DeleteTerm, u32>,
    doc_ids: Vec<u32>,
    allocation: Allocation,
}

impl BufferedDeletes {
    pub fn new(budget: &RamBudget) -> Result<BufferedDeletes> {
        Ok(BufferedDeletes {
            terms: BTreeMap::new(),
            doc_ids: Vec::new(),
            allocation: budget.allocate(0)?,
        })
    }

    /// Buffers `term` with the given horizon. Deleting the same term again moves
    /// its horizon forward.
    pub fn add_term(&mut self, term: DeleteTerm, horizon: u32) -> Result<()> {
        match self.terms.get_mut(&term) {
            Some(existing) => {
                *existing = (*existing).max(horizon);
            }
            None => {
                self.allocation.grow(term.ram_bytes())?;
                self.terms.insert(term, horizon);
            }
        }
        Ok(())
    }

    pub fn add_doc_id(&mut self, doc_id: u32) -> Result<()> {
        self.allocation.grow(BYTES_PER_DELETE_DOC_ID)?;
        self.doc_ids.push(doc_id);
        Ok(())
    }

    pub fn num_terms(&self) -> usize {
        self.terms.len()
    }

    pub fn terms(&self) -> impl Iterator<Item = (&DeleteTerm, u32)> {
        self.terms.iter().map(|(term, &horizon)| (term, horizon))
    }

    pub fn doc_ids(&self) -> &[u32] {
        &self.doc_ids
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.doc_ids.is_empty()
    }

    pub fn ram_bytes(&self) -> u64 {
        self.allocation.amount()
    }

    /// Removes and returns everything buffered: the terms with their horizons in
    /// term order, and the deleted doc ids in ascending order.
    pub fn take(&mut self) -> (Vec<(DeleteTerm, u32)>, Vec<u32>) {
        let terms = std::mem::take(&mut self.terms).into_iter().collect();
        let mut doc_ids = std::mem::take(&mut self.doc_ids);
        doc_ids.sort_unstable();
        self.allocation.shrink_to(0);
        (terms, doc_ids)
    }

    pub fn clear(&mut self) {
        self.take();
    }
}

impl std::fmt::Debug for BufferedDeletes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedDeletes")
            .field("terms", &self.terms.len())
            .field("doc_ids", &self.doc_ids.len())
            .finish()
    }
}
