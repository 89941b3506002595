//! Per-term metadata stored as a structure of arrays, indexed by term id.

/// Fields shared by every postings array.
#[derive(Debug, Default, Clone)]
pub struct PostingsBase {
    /// Char pool address of the term text (terminated by `TERM_TERMINATOR`).
    pub text_starts: Vec<u32>,
    /// Int pool address of the term's stream write cursors.
    pub int_starts: Vec<u32>,
    /// Byte pool address of the term's first stream slice.
    pub byte_starts: Vec<u32>,
}

impl PostingsBase {
    pub const BYTES_PER_POSTING: usize = 3 * std::mem::size_of::<u32>();

    fn resize(&mut self, len: usize) {
        self.text_starts.resize(len, 0);
        self.int_starts.resize(len, 0);
        self.byte_starts.resize(len, 0);
    }
}

/// A structure-of-arrays holding per-term state for one kind of consumer.
pub trait PostingsArray: Default {
    /// Size of one entry over all arrays, used for RAM accounting.
    const BYTES_PER_POSTING: usize;

    fn base(&self) -> &PostingsBase;

    fn base_mut(&mut self) -> &mut PostingsBase;

    /// Grows or shrinks every array to `len` entries, keeping existing entries.
    fn resize(&mut self, len: usize);

    fn len(&self) -> usize {
        self.base().text_starts.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// State of the document/frequency/position encoder.
#[derive(Debug, Default, Clone)]
pub struct FreqProxPostings {
    pub base: PostingsBase,
    /// Occurrences of the term in its last document.
    pub doc_freqs: Vec<u32>,
    /// Last document containing the term.
    pub last_doc_ids: Vec<u32>,
    /// Pending doc code of the last document: the doc delta shifted left by one, or
    /// the plain delta when term frequencies are omitted.
    pub last_doc_codes: Vec<u32>,
    pub last_positions: Vec<u32>,
}

impl PostingsArray for FreqProxPostings {
    const BYTES_PER_POSTING: usize = PostingsBase::BYTES_PER_POSTING + 4 * 4;

    fn base(&self) -> &PostingsBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PostingsBase {
        &mut self.base
    }

    fn resize(&mut self, len: usize) {
        self.base.resize(len);
        self.doc_freqs.resize(len, 0);
        self.last_doc_ids.resize(len, 0);
        self.last_doc_codes.resize(len, 0);
        self.last_positions.resize(len, 0);
    }
}

/// State of the term-vector encoder.
#[derive(Debug, Default, Clone)]
pub struct VectorPostings {
    pub base: PostingsBase,
    pub freqs: Vec<u32>,
    pub last_offsets: Vec<u32>,
    pub last_positions: Vec<u32>,
}

impl PostingsArray for VectorPostings {
    const BYTES_PER_POSTING: usize = PostingsBase::BYTES_PER_POSTING + 3 * 4;

    fn base(&self) -> &PostingsBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PostingsBase {
        &mut self.base
    }

    fn resize(&mut self, len: usize) {
        self.base.resize(len);
        self.freqs.resize(len, 0);
        self.last_offsets.resize(len, 0);
        self.last_positions.resize(len, 0);
    }
}

/// Returns an array size of at least `min_target` with some headroom, so that
/// repeated growth by one entry stays amortized.
pub fn oversize(min_target: usize, bytes_per_element: usize) -> usize {
    if min_target == 0 {
        return 0;
    }
    let extra = (min_target >> 3).max(3);
    let size = min_target + extra;
    match bytes_per_element {
        4 => (size + 1) & !1,
        2 => (size + 3) & !3,
        1 => (size + 7) & !7,
        _ => size,
    }
}
