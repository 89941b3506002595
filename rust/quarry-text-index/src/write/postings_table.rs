//! Open-addressing hash table from term text to dense term ids.
//!
//! The table itself only stores term ids; the text of a term lives in a
//! [`CharPool`] and is reached through `text_starts[term_id]` of the
//! [`PostingsArray`]. Each term owns `stream_count` byte-slice streams in a
//! [`BytePool`], whose write cursors are kept in an [`IntPool`].
//!
//! A table has one of two roles. The *primary* table of a field hashes and stores
//! the term text. The *secondary* table (term vectors) is fed with the char pool
//! address assigned by the primary table and uses that address both as hash code
//! and as identity, so the text is never hashed or compared twice.

use quarry_block_pool::{
    BlockAllocator, ByteSliceReader, ByteSliceWriter, BytePool, CHAR_BLOCK_SIZE, CharPool,
    DataOutput, IntPool, slices::FIRST_LEVEL_SIZE,
};
use quarry_budget_tracker::{Allocation, RamBudget};
use quarry_common::Result;
use quarry_unicode::code_units::{
    REPLACEMENT_CHAR, TERM_TERMINATOR, is_lead_surrogate, is_trail_surrogate,
};

use super::postings_array::{PostingsArray, oversize};

/// Marks an unused hash slot.
pub const EMPTY_SLOT: u32 = u32::MAX;

const INITIAL_HASH_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Primary,
    Secondary,
}

/// Outcome of adding a token to a [`PostingsTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermAdded {
    /// First occurrence since the table was last reset.
    New(u32),
    Existing(u32),
    /// The term is too long to be stored and was dropped.
    SkippedLongTerm,
}

impl TermAdded {
    pub fn term_id(&self) -> Option<u32> {
        match *self {
            TermAdded::New(id) | TermAdded::Existing(id) => Some(id),
            TermAdded::SkippedLongTerm => None,
        }
    }
}

/// Int and byte pools holding the postings streams of one role.
#[derive(Debug)]
pub struct StreamPools {
    pub ints: IntPool,
    pub bytes: BytePool,
}

impl StreamPools {
    pub fn new(ints: BlockAllocator<u32>, bytes: BlockAllocator<u8>) -> StreamPools {
        StreamPools {
            ints: IntPool::new(ints),
            bytes: BytePool::new(bytes),
        }
    }

    pub fn reset(&mut self) {
        self.ints.reset();
        self.bytes.reset();
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.ints.allocated_bytes() + self.bytes.allocated_bytes()
    }
}

/// A lookup key of a postings table.
pub trait TermKey {
    fn hash_code(&self) -> i32;

    /// Whether the term stored at `text_start` is this key.
    fn matches(&self, text_start: u32, chars: &CharPool) -> bool;
}

/// Looks a term up by its text.
pub struct TextKey<'a> {
    text: &'a [u16],
    code: i32,
}

impl<'a> TextKey<'a> {
    /// Builds the key, replacing unpaired surrogates and embedded terminators in
    /// `text` with `U+FFFD`.
    pub fn new(text: &'a mut [u16]) -> TextKey<'a> {
        let code = sanitize_and_hash(text);
        TextKey { text, code }
    }

    pub fn text(&self) -> &'a [u16] {
        self.text
    }
}

impl TermKey for TextKey<'_> {
    fn hash_code(&self) -> i32 {
        self.code
    }

    fn matches(&self, text_start: u32, chars: &CharPool) -> bool {
        let stored = chars.tail(text_start as usize);
        let len = self.text.len();
        stored.len() > len && stored[len] == TERM_TERMINATOR && stored[..len] == *self.text
    }
}

/// Looks a term up by the char pool address of its text.
pub struct TextStartKey(pub u32);

impl TermKey for TextStartKey {
    fn hash_code(&self) -> i32 {
        self.0 as i32
    }

    fn matches(&self, text_start: u32, _chars: &CharPool) -> bool {
        text_start == self.0
    }
}

/// Hashes `text` from its last code unit to its first (`code * 31 + unit`), fixing
/// invalid UTF-16 on the way.
///
/// A valid surrogate pair contributes both of its units; an unpaired surrogate or
/// a terminator code unit is replaced by `U+FFFD` before it is hashed. The result
/// equals [`hash_units`] over the sanitized text.
pub fn sanitize_and_hash(text: &mut [u16]) -> i32 {
    let mut code = 0i32;
    let mut downto = text.len();
    while downto > 0 {
        downto -= 1;
        let mut ch = text[downto];
        if is_trail_surrogate(ch) {
            if downto > 0 && is_lead_surrogate(text[downto - 1]) {
                let lead = text[downto - 1];
                code = code
                    .wrapping_mul(31)
                    .wrapping_add(ch as i32)
                    .wrapping_mul(31)
                    .wrapping_add(lead as i32);
                downto -= 1;
                continue;
            }
            ch = REPLACEMENT_CHAR;
            text[downto] = ch;
        } else if is_lead_surrogate(ch) || ch == TERM_TERMINATOR {
            ch = REPLACEMENT_CHAR;
            text[downto] = ch;
        }
        code = code.wrapping_mul(31).wrapping_add(ch as i32);
    }
    code
}

/// Hashes already sanitized text, as stored in a char pool.
pub fn hash_units(text: &[u16]) -> i32 {
    text.iter()
        .rev()
        .fold(0i32, |code, &unit| code.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Returns the text stored at `text_start`, without its terminator.
pub fn term_text(chars: &CharPool, text_start: u32) -> &[u16] {
    let tail = chars.tail(text_start as usize);
    let len = tail
        .iter()
        .position(|&unit| unit == TERM_TERMINATOR)
        .expect("term text is terminated");
    &tail[..len]
}

#[inline]
fn probe_increment(code: i32) -> i32 {
    ((code >> 8).wrapping_add(code)) | 1
}

#[inline]
fn slot_of(code: i32, mask: usize) -> usize {
    (code as u32 as usize) & mask
}

/// Hash table of the terms of one field, generic over the per-term state `A`.
pub struct PostingsTable<A: PostingsArray> {
    role: TableRole,
    stream_count: usize,
    max_term_length: usize,
    slots: Vec<u32>,
    mask: usize,
    num_postings: usize,
    compacted: bool,
    postings: A,
    slots_allocation: Allocation,
    postings_allocation: Allocation,
}

impl<A: PostingsArray> PostingsTable<A> {
    pub fn new(
        role: TableRole,
        stream_count: usize,
        max_term_length: usize,
        budget: &RamBudget,
    ) -> Result<Self> {
        debug_assert!(stream_count > 0);
        let slots_allocation = budget.allocate((INITIAL_HASH_SIZE * 4) as u64)?;
        let postings_allocation = budget.allocate(0)?;
        Ok(PostingsTable {
            role,
            stream_count,
            max_term_length: max_term_length.min(CHAR_BLOCK_SIZE - 1),
            slots: vec![EMPTY_SLOT; INITIAL_HASH_SIZE],
            mask: INITIAL_HASH_SIZE - 1,
            num_postings: 0,
            compacted: false,
            postings: A::default(),
            slots_allocation,
            postings_allocation,
        })
    }

    pub fn role(&self) -> TableRole {
        self.role
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count
    }

    pub fn num_postings(&self) -> usize {
        self.num_postings
    }

    pub fn is_empty(&self) -> bool {
        self.num_postings == 0
    }

    pub fn hash_size(&self) -> usize {
        self.slots.len()
    }

    pub fn postings(&self) -> &A {
        &self.postings
    }

    pub fn postings_mut(&mut self) -> &mut A {
        &mut self.postings
    }

    pub fn text_start(&self, term_id: u32) -> u32 {
        self.postings.base().text_starts[term_id as usize]
    }

    pub fn term_text<'c>(&self, term_id: u32, chars: &'c CharPool) -> &'c [u16] {
        term_text(chars, self.text_start(term_id))
    }

    /// Bytes charged for the hash slots and the postings array.
    pub fn allocated_bytes(&self) -> u64 {
        self.slots_allocation.amount() + self.postings_allocation.amount()
    }

    /// Looks up a term without inserting it.
    pub fn find<K: TermKey>(&self, key: &K, chars: &CharPool) -> Option<u32> {
        debug_assert!(!self.compacted);
        self.probe(key, chars).1
    }

    /// Primary entry point: adds one occurrence of `text`.
    ///
    /// `text` is sanitized in place (see [`sanitize_and_hash`]). New terms are
    /// copied into `chars` and get their streams allocated in `pools`.
    pub fn add(
        &mut self,
        text: &mut [u16],
        chars: &mut CharPool,
        pools: &mut StreamPools,
    ) -> Result<TermAdded> {
        debug_assert_eq!(self.role, TableRole::Primary);
        debug_assert!(!self.compacted);
        let key = TextKey::new(text);
        let (slot, found) = self.probe(&key, chars);
        if let Some(term_id) = found {
            return Ok(TermAdded::Existing(term_id));
        }

        let text = key.text();
        if text.len() > self.max_term_length {
            return Ok(TermAdded::SkippedLongTerm);
        }
        self.reserve_posting()?;
        chars.ensure_room(text.len() + 1)?;
        let text_start = chars.address() as u32;
        chars.append(text);
        chars.append(&[TERM_TERMINATOR]);

        let term_id = self.insert(slot, text_start, chars, pools)?;
        Ok(TermAdded::New(term_id))
    }

    /// Secondary entry point: adds one occurrence of the term whose text the
    /// primary table stored at `text_start`.
    pub fn add_by_text_start(
        &mut self,
        text_start: u32,
        chars: &CharPool,
        pools: &mut StreamPools,
    ) -> Result<TermAdded> {
        debug_assert_eq!(self.role, TableRole::Secondary);
        debug_assert!(!self.compacted);
        let key = TextStartKey(text_start);
        let (slot, found) = self.probe(&key, chars);
        if let Some(term_id) = found {
            return Ok(TermAdded::Existing(term_id));
        }
        self.reserve_posting()?;
        let term_id = self.insert(slot, text_start, chars, pools)?;
        Ok(TermAdded::New(term_id))
    }

    /// Gives write access to the streams of `term_id`.
    pub fn streams<'p>(&self, term_id: u32, pools: &'p mut StreamPools) -> TermStreams<'p> {
        TermStreams {
            pools,
            int_start: self.postings.base().int_starts[term_id as usize] as usize,
            stream_count: self.stream_count,
        }
    }

    /// Reads back stream `stream` of `term_id`, from its first byte to the current
    /// write cursor.
    pub fn slice_reader<'p>(
        &self,
        term_id: u32,
        stream: usize,
        pools: &'p StreamPools,
    ) -> ByteSliceReader<'p> {
        assert!(stream < self.stream_count);
        let base = self.postings.base();
        let id = term_id as usize;
        let end = pools.ints.get(base.int_starts[id] as usize + stream) as usize;
        let start = base.byte_starts[id] as usize + stream * FIRST_LEVEL_SIZE;
        ByteSliceReader::new(&pools.bytes, start, end)
    }

    /// Moves all live term ids to the front of the slot array, in no particular
    /// order. Lookups are not possible afterwards until [`reset`](Self::reset).
    pub fn compact(&mut self) {
        if self.compacted {
            return;
        }
        let mut upto = 0;
        for i in 0..self.slots.len() {
            if self.slots[i] != EMPTY_SLOT {
                if upto < i {
                    self.slots[upto] = self.slots[i];
                    self.slots[i] = EMPTY_SLOT;
                }
                upto += 1;
            }
        }
        debug_assert_eq!(upto, self.num_postings);
        self.compacted = true;
    }

    /// Compacts the table and orders the term ids by their text.
    ///
    /// Texts compare code unit by code unit, a text sorts before all its
    /// extensions.
    pub fn sort_postings(&mut self, chars: &CharPool) -> &[u32] {
        self.compact();
        let n = self.num_postings;
        let text_starts = &self.postings.base().text_starts;
        self.slots[..n].sort_unstable_by(|&a, &b| {
            term_text(chars, text_starts[a as usize]).cmp(term_text(chars, text_starts[b as usize]))
        });
        &self.slots[..n]
    }

    /// Term ids in the order established by the last
    /// [`sort_postings`](Self::sort_postings).
    pub fn sorted_term_ids(&self) -> &[u32] {
        debug_assert!(self.compacted || self.num_postings == 0);
        &self.slots[..self.num_postings]
    }

    /// Forgets all terms but keeps the slot and postings arrays for reuse.
    pub fn reset(&mut self) {
        self.compact();
        if self.num_postings > 0 {
            self.slots[..self.num_postings].fill(EMPTY_SLOT);
            self.num_postings = 0;
        }
        self.compacted = false;
    }

    /// Same as [`reset`](Self::reset): the table keeps no state that a failure
    /// could leave half-written beyond its terms.
    pub fn abort(&mut self) {
        self.reset();
    }

    /// Resets the table and releases its memory, back to the initial hash size and
    /// an empty postings array.
    pub fn shrink(&mut self) {
        self.reset();
        if self.slots.len() != INITIAL_HASH_SIZE {
            self.slots = vec![EMPTY_SLOT; INITIAL_HASH_SIZE];
            self.mask = INITIAL_HASH_SIZE - 1;
            self.slots_allocation
                .shrink_to((INITIAL_HASH_SIZE * 4) as u64);
        }
        self.postings = A::default();
        self.postings_allocation.shrink_to(0);
    }

    fn probe<K: TermKey>(&self, key: &K, chars: &CharPool) -> (usize, Option<u32>) {
        let text_starts = &self.postings.base().text_starts;
        let mut code = key.hash_code();
        let mut slot = slot_of(code, self.mask);
        let mut term_id = self.slots[slot];
        if term_id != EMPTY_SLOT && !key.matches(text_starts[term_id as usize], chars) {
            let inc = probe_increment(code);
            loop {
                code = code.wrapping_add(inc);
                slot = slot_of(code, self.mask);
                term_id = self.slots[slot];
                if term_id == EMPTY_SLOT || key.matches(text_starts[term_id as usize], chars) {
                    break;
                }
            }
        }
        (slot, (term_id != EMPTY_SLOT).then_some(term_id))
    }

    /// Makes room in the postings array for one more term.
    fn reserve_posting(&mut self) -> Result<()> {
        let needed = self.num_postings + 1;
        if needed > self.postings.len() {
            let len = oversize(needed, A::BYTES_PER_POSTING);
            self.postings_allocation
                .resize((len * A::BYTES_PER_POSTING) as u64)?;
            self.postings.resize(len);
        }
        Ok(())
    }

    fn insert(
        &mut self,
        slot: usize,
        text_start: u32,
        chars: &CharPool,
        pools: &mut StreamPools,
    ) -> Result<u32> {
        debug_assert!(self.num_postings < self.postings.len());
        debug_assert_eq!(self.slots[slot], EMPTY_SLOT);
        pools.ints.ensure_room(self.stream_count)?;
        pools.bytes.ensure_room(self.stream_count * FIRST_LEVEL_SIZE)?;

        let term_id = self.num_postings as u32;
        let id = term_id as usize;
        self.num_postings += 1;
        self.slots[slot] = term_id;

        let int_start = pools.ints.advance(self.stream_count);
        for stream in 0..self.stream_count {
            let address = pools.bytes.new_slice(FIRST_LEVEL_SIZE)?;
            pools.ints.set(int_start + stream, address as u32);
        }
        let base = self.postings.base_mut();
        base.text_starts[id] = text_start;
        base.int_starts[id] = int_start as u32;
        base.byte_starts[id] = pools.ints.get(int_start);

        if self.num_postings * 2 >= self.slots.len() {
            self.rehash(2 * self.slots.len(), chars)?;
        }
        Ok(term_id)
    }

    fn rehash(&mut self, new_size: usize, chars: &CharPool) -> Result<()> {
        self.slots_allocation.resize((new_size * 4) as u64)?;
        let new_mask = new_size - 1;
        let mut new_slots = vec![EMPTY_SLOT; new_size];
        let text_starts = &self.postings.base().text_starts;
        for &term_id in self.slots.iter().filter(|&&id| id != EMPTY_SLOT) {
            let text_start = text_starts[term_id as usize];
            let mut code = match self.role {
                TableRole::Primary => hash_units(term_text(chars, text_start)),
                TableRole::Secondary => text_start as i32,
            };
            let mut slot = slot_of(code, new_mask);
            if new_slots[slot] != EMPTY_SLOT {
                let inc = probe_increment(code);
                loop {
                    code = code.wrapping_add(inc);
                    slot = slot_of(code, new_mask);
                    if new_slots[slot] == EMPTY_SLOT {
                        break;
                    }
                }
            }
            new_slots[slot] = term_id;
        }
        self.slots = new_slots;
        self.mask = new_mask;
        Ok(())
    }
}

/// Write access to the byte streams of a single term.
pub struct TermStreams<'p> {
    pools: &'p mut StreamPools,
    int_start: usize,
    stream_count: usize,
}

impl TermStreams<'_> {
    pub fn write_byte(&mut self, stream: usize, byte: u8) -> Result<()> {
        self.write_with(stream, |writer| writer.write_byte(byte))
    }

    pub fn write_bytes(&mut self, stream: usize, bytes: &[u8]) -> Result<()> {
        self.write_with(stream, |writer| writer.write_bytes(bytes))
    }

    pub fn write_vint(&mut self, stream: usize, value: u32) -> Result<()> {
        self.write_with(stream, |writer| writer.write_vint(value))
    }

    fn write_with(
        &mut self,
        stream: usize,
        write: impl FnOnce(&mut ByteSliceWriter) -> std::io::Result<()>,
    ) -> Result<()> {
        debug_assert!(stream < self.stream_count);
        let cursor = self.int_start + stream;
        let address = self.pools.ints.get(cursor) as usize;
        let mut writer = ByteSliceWriter::new(&mut self.pools.bytes, address);
        let result = write(&mut writer);
        let address = writer.address();
        self.pools.ints.set(cursor, address as u32);
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use ahash::AHashMap;
    use quarry_block_pool::{BYTE_BLOCK_SIZE, DataInput, INT_BLOCK_SIZE};
    use quarry_unicode::code_units::to_utf16;

    use super::*;
    use crate::write::postings_array::{FreqProxPostings, VectorPostings};

    struct Fixture {
        budget: RamBudget,
        chars: CharPool,
        pools: StreamPools,
    }

    impl Fixture {
        fn new() -> Fixture {
            let budget = RamBudget::unlimited();
            Fixture {
                chars: CharPool::new(BlockAllocator::new(CHAR_BLOCK_SIZE, budget.clone())),
                pools: StreamPools::new(
                    BlockAllocator::new(INT_BLOCK_SIZE, budget.clone()),
                    BlockAllocator::new(BYTE_BLOCK_SIZE, budget.clone()),
                ),
                budget,
            }
        }

        fn table(&self, role: TableRole) -> PostingsTable<FreqProxPostings> {
            PostingsTable::new(role, 2, CHAR_BLOCK_SIZE - 1, &self.budget).unwrap()
        }

        fn add(&mut self, table: &mut PostingsTable<FreqProxPostings>, text: &str) -> TermAdded {
            let mut units = to_utf16(text);
            table.add(&mut units, &mut self.chars, &mut self.pools).unwrap()
        }
    }

    #[test]
    fn test_same_text_same_id_across_rehashes() {
        let mut fx = Fixture::new();
        let mut table = fx.table(TableRole::Primary);
        let mut ids = AHashMap::new();
        let mut rng = fastrand::Rng::with_seed(11);
        for _ in 0..5000 {
            let term = format!("t{}", rng.u32(0..700));
            match fx.add(&mut table, &term) {
                TermAdded::New(id) => assert!(ids.insert(term, id).is_none()),
                TermAdded::Existing(id) => assert_eq!(ids[&term], id),
                TermAdded::SkippedLongTerm => unreachable!(),
            }
        }
        assert_eq!(table.num_postings(), ids.len());
        assert!(table.hash_size() >= 1024);
        for (term, &id) in &ids {
            assert_eq!(table.term_text(id, &fx.chars), to_utf16(term));
        }
    }

    #[test]
    fn test_sorted_order() {
        let mut fx = Fixture::new();
        let mut table = fx.table(TableRole::Primary);
        for term in ["dog", "cat", "dog", "bird", "ca", "", "cats", "Zebra"] {
            fx.add(&mut table, term);
        }
        let sorted = table
            .sort_postings(&fx.chars)
            .to_vec()
            .iter()
            .map(|&id| String::from_utf16(term_text(&fx.chars, table.text_start(id))).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(sorted, ["", "Zebra", "bird", "ca", "cat", "cats", "dog"]);
    }

    #[test]
    fn test_sort_invariant_random() {
        let mut fx = Fixture::new();
        let mut table = fx.table(TableRole::Primary);
        let mut rng = fastrand::Rng::with_seed(3);
        for _ in 0..2000 {
            let len = rng.usize(0..6);
            let term = (0..len)
                .map(|_| rng.choice(['a', 'b', 'é', '\u{1F600}']).unwrap())
                .collect::<String>();
            fx.add(&mut table, &term);
        }
        let ids = table.sort_postings(&fx.chars).to_vec();
        for pair in ids.windows(2) {
            let a = table.term_text(pair[0], &fx.chars);
            let b = table.term_text(pair[1], &fx.chars);
            assert!(a < b);
        }
    }

    #[test]
    fn test_invalid_utf16_is_replaced() {
        let mut fx = Fixture::new();
        let mut table = fx.table(TableRole::Primary);
        let mut units = vec![0x61, 0xD800, 0xFFFF, 0xDC00];
        let added = table.add(&mut units, &mut fx.chars, &mut fx.pools).unwrap();
        assert_eq!(units, [0x61, 0xFFFD, 0xFFFD, 0xFFFD]);
        let id = added.term_id().unwrap();
        assert_eq!(table.term_text(id, &fx.chars), units);

        let mut pair = to_utf16("\u{1F600}");
        let code = sanitize_and_hash(&mut pair);
        assert_eq!(pair, to_utf16("\u{1F600}"));
        assert_eq!(code, hash_units(&pair));
    }

    #[test]
    fn test_long_terms_are_skipped() {
        let mut fx = Fixture::new();
        let mut table = PostingsTable::<FreqProxPostings>::new(TableRole::Primary, 2, 8, &fx.budget)
            .unwrap();
        let mut long = to_utf16("abcdefghi");
        let added = table.add(&mut long, &mut fx.chars, &mut fx.pools).unwrap();
        assert_eq!(added, TermAdded::SkippedLongTerm);
        assert_eq!(table.num_postings(), 0);

        let mut huge = vec![0x61u16; CHAR_BLOCK_SIZE];
        let mut table = fx.table(TableRole::Primary);
        let added = table.add(&mut huge, &mut fx.chars, &mut fx.pools).unwrap();
        assert_eq!(added, TermAdded::SkippedLongTerm);
        assert!(matches!(fx.add(&mut table, "ok"), TermAdded::New(0)));
    }

    #[test]
    fn test_secondary_keyed_by_text_start() {
        let mut fx = Fixture::new();
        let mut primary = fx.table(TableRole::Primary);
        let mut secondary = PostingsTable::<VectorPostings>::new(
            TableRole::Secondary,
            2,
            CHAR_BLOCK_SIZE,
            &fx.budget,
        )
        .unwrap();
        let mut vector_pools = StreamPools::new(
            BlockAllocator::new(INT_BLOCK_SIZE, fx.budget.clone()),
            BlockAllocator::new(BYTE_BLOCK_SIZE, fx.budget.clone()),
        );
        let mut seen = AHashMap::new();
        for i in 0..300 {
            let term = format!("w{}", i % 120);
            let id = fx.add(&mut primary, &term).term_id().unwrap();
            let text_start = primary.text_start(id);
            let added = secondary
                .add_by_text_start(text_start, &fx.chars, &mut vector_pools)
                .unwrap();
            match added {
                TermAdded::New(sid) => assert!(seen.insert(text_start, sid).is_none()),
                TermAdded::Existing(sid) => assert_eq!(seen[&text_start], sid),
                TermAdded::SkippedLongTerm => unreachable!(),
            }
        }
        assert_eq!(secondary.num_postings(), 120);
        let ids = secondary.sort_postings(&fx.chars).to_vec();
        let first = String::from_utf16(secondary.term_text(ids[0], &fx.chars)).unwrap();
        assert_eq!(first, "w0");
    }

    #[test]
    fn test_streams_round_trip() {
        let mut fx = Fixture::new();
        let mut table = fx.table(TableRole::Primary);
        let dog = fx.add(&mut table, "dog").term_id().unwrap();
        let cat = fx.add(&mut table, "cat").term_id().unwrap();
        for i in 0..100u32 {
            let id = if i % 3 == 0 { cat } else { dog };
            let mut streams = table.streams(id, &mut fx.pools);
            streams.write_vint(0, i * 1000).unwrap();
            streams.write_vint(1, i).unwrap();
        }
        let mut reader = table.slice_reader(cat, 0, &fx.pools);
        for i in (0..100u32).filter(|i| i % 3 == 0) {
            assert_eq!(reader.read_vint().unwrap(), i * 1000);
        }
        assert!(reader.eof());
        let mut reader = table.slice_reader(dog, 1, &fx.pools);
        for i in (0..100u32).filter(|i| i % 3 != 0) {
            assert_eq!(reader.read_vint().unwrap(), i);
        }
        assert!(reader.eof());
    }

    #[test]
    fn test_reset_and_shrink_release_memory() {
        let mut fx = Fixture::new();
        let baseline = fx.budget.used();
        let mut table = fx.table(TableRole::Primary);
        for i in 0..100 {
            fx.add(&mut table, &format!("term{i}"));
        }
        table.reset();
        assert_eq!(table.num_postings(), 0);
        assert!(matches!(fx.add(&mut table, "term5"), TermAdded::New(0)));

        table.shrink();
        assert_eq!(table.hash_size(), 4);
        assert_eq!(table.allocated_bytes(), 16);
        drop(table);
        fx.chars.reset();
        fx.pools.reset();
        assert_eq!(fx.budget.used(), baseline);
    }
}
