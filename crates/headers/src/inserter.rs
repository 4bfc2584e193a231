//! Writing downloaded headers to storage.
//!
//! [`HeaderInserter`] consumes headers in ascending height order, scores
//! each chain by total difficulty and tracks whether the canonical head
//! changed during the pass. When a heavier side chain takes over, the
//! inserter walks the losing chain down to the forking point so the caller
//! knows from which height downstream state must be unwound.

use crate::{error::InsertError, metrics::HeaderInserterMetrics};
use cairn_primitives::{BlockHash, BlockNumber, HeaderRecord, U256};
use cairn_storage::HeaderStoreMut;
use schnellru::{ByLength, LruMap};

/// How many canonical marks are kept in memory for forking point lookups.
const CANONICAL_CACHE: u32 = 1000;

/// Inserts headers into storage and detects canonical chain changes.
///
/// One inserter lives for one insertion pass. It assumes headers arrive
/// sorted by ascending height, which the downloader's drain order
/// guarantees.
pub struct HeaderInserter {
    /// Total difficulty of the local canonical head.
    local_td: U256,
    /// Hash of the most recently fed header, to skip immediate duplicates.
    prev_hash: BlockHash,
    /// Height of the most recently inserted header.
    prev_height: BlockNumber,
    /// Height of the canonical head taken during this pass.
    highest: BlockNumber,
    /// Hash at [`Self::highest`].
    highest_hash: BlockHash,
    /// Timestamp at [`Self::highest`].
    highest_timestamp: u64,
    /// Whether an inserted header outweighed the local head.
    new_canonical: bool,
    /// Whether the canonical switch forked below the pass start.
    unwind: bool,
    /// Lowest forking point observed; starts at the pass progress.
    unwind_point: BlockNumber,
    canonical_cache: LruMap<BlockNumber, BlockHash>,
    metrics: HeaderInserterMetrics,
}

impl HeaderInserter {
    /// Inserter for a pass starting at `progress` with the given head
    /// total difficulty.
    pub fn new(local_td: U256, progress: BlockNumber) -> Self {
        Self {
            local_td,
            prev_hash: BlockHash::ZERO,
            prev_height: 0,
            highest: 0,
            highest_hash: BlockHash::ZERO,
            highest_timestamp: 0,
            new_canonical: false,
            unwind: false,
            unwind_point: progress,
            canonical_cache: LruMap::new(ByLength::new(CANONICAL_CACHE)),
            metrics: HeaderInserterMetrics::default(),
        }
    }

    /// Writes one header with its total difficulty.
    ///
    /// Returns the total difficulty of the written header, or `None` when
    /// the header was already stored and nothing happened. Feeding a
    /// header below the previous one or one whose parent has no stored
    /// total difficulty is fatal for the pass.
    pub fn feed_header<S: HeaderStoreMut>(
        &mut self,
        store: &S,
        record: &HeaderRecord,
    ) -> Result<Option<U256>, InsertError> {
        let hash = record.hash();
        let number = record.number();
        if hash == self.prev_hash {
            return Ok(None)
        }
        if number < self.prev_height {
            return Err(InsertError::UnsortedHeader { number, prev: self.prev_height })
        }
        if store.header(&hash)?.is_some() {
            return Ok(None)
        }
        let parent_hash = record.header.parent_hash;
        let Some(parent_td) = store.header_td(&parent_hash)? else {
            return Err(InsertError::ParentNotFound { hash, number, parent_hash })
        };
        let td = parent_td + record.header.difficulty;
        if td > self.local_td {
            // this chain outweighs the local head
            self.new_canonical = true;
            let forking_point = self.forking_point(store, record)?;
            self.highest = number;
            self.highest_hash = hash;
            self.highest_timestamp = record.header.timestamp;
            self.canonical_cache.insert(number, hash);
            if forking_point < self.unwind_point {
                self.unwind_point = forking_point;
                self.unwind = true;
                self.metrics.reorgs_detected.increment(1);
            }
            self.local_td = td;
        }
        store.insert_header(record, td)?;
        self.metrics.inserted_headers.increment(1);
        self.prev_hash = hash;
        self.prev_height = number;
        Ok(Some(td))
    }

    /// Height of the deepest canonical ancestor of `record`.
    ///
    /// Walks the parent chain until a header is found whose hash carries
    /// the canonical mark for its height. The common case, a child of the
    /// canonical head, resolves without walking.
    fn forking_point<S: HeaderStoreMut>(
        &mut self,
        store: &S,
        record: &HeaderRecord,
    ) -> Result<BlockNumber, InsertError> {
        let number = record.number();
        let hash = record.hash();
        let Some(parent_height) = number.checked_sub(1) else { return Ok(0) };
        let parent_hash = record.header.parent_hash;
        if self.canonical_lookup(store, parent_height)? == Some(parent_hash) {
            return Ok(parent_height)
        }
        let Some(parent) = store.header(&parent_hash)? else {
            return Err(InsertError::NoForkingPoint { hash, number })
        };
        let mut ancestor_hash = parent.header.parent_hash;
        let Some(mut height) = parent_height.checked_sub(1) else {
            return Err(InsertError::NoForkingPoint { hash, number })
        };
        loop {
            if self.canonical_lookup(store, height)? == Some(ancestor_hash) {
                return Ok(height)
            }
            let Some(ancestor) = store.header(&ancestor_hash)? else {
                return Err(InsertError::NoForkingPoint { hash, number })
            };
            ancestor_hash = ancestor.header.parent_hash;
            height = match height.checked_sub(1) {
                Some(h) => h,
                None => return Err(InsertError::NoForkingPoint { hash, number }),
            };
        }
    }

    fn canonical_lookup<S: HeaderStoreMut>(
        &mut self,
        store: &S,
        number: BlockNumber,
    ) -> Result<Option<BlockHash>, InsertError> {
        if let Some(hash) = self.canonical_cache.get(&number) {
            return Ok(Some(*hash))
        }
        let hash = store.canonical_hash(number)?;
        if let Some(hash) = hash {
            self.canonical_cache.insert(number, hash);
        }
        Ok(hash)
    }

    /// Total difficulty of the heaviest chain seen so far.
    pub fn local_td(&self) -> U256 {
        self.local_td
    }

    /// Whether an inserted header replaced the canonical head.
    pub fn best_header_changed(&self) -> bool {
        self.new_canonical
    }

    /// Height everything above must be unwound from, when the canonical
    /// switch forked below the pass start.
    pub fn unwind_point(&self) -> Option<BlockNumber> {
        self.unwind.then_some(self.unwind_point)
    }

    /// Height of the canonical head established during this pass.
    ///
    /// Stays zero while no inserted chain outweighed the local head; side
    /// chains never move it.
    pub fn highest(&self) -> BlockNumber {
        self.highest
    }

    /// Hash of the canonical head established during this pass.
    pub fn highest_hash(&self) -> BlockHash {
        self.highest_hash
    }

    /// Timestamp of the canonical head established during this pass.
    pub fn highest_timestamp(&self) -> u64 {
        self.highest_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use cairn_primitives::{
        test_utils::{child_header, header_chain, random_header},
        Header, SealedHeader,
    };
    use cairn_storage::{HeaderStore, MemoryHeaderStore, StorageResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(header: &SealedHeader) -> HeaderRecord {
        HeaderRecord::from_sealed(header.clone())
    }

    #[test]
    fn ascending_chain_extends_head_without_unwind() {
        let genesis = random_header(0, None);
        let store = MemoryHeaderStore::with_canonical([&genesis]);
        let mut inserter = HeaderInserter::new(genesis.difficulty, 0);

        let chain = header_chain(&genesis, 5);
        let mut expected_td = genesis.difficulty;
        for header in &chain {
            expected_td += header.difficulty;
            let td = inserter.feed_header(&store, &record(header)).unwrap();
            assert_eq!(td, Some(expected_td));
        }

        assert!(inserter.best_header_changed());
        assert_eq!(inserter.unwind_point(), None);
        assert_eq!(inserter.highest(), 5);
        assert_eq!(inserter.highest_hash(), chain[4].hash());
        assert_eq!(inserter.local_td(), expected_td);
        assert_eq!(store.header_td(&chain[4].hash()).unwrap(), Some(expected_td));
    }

    #[test]
    fn duplicates_and_stored_headers_are_skipped() {
        let genesis = random_header(0, None);
        let child = child_header(&genesis);
        let store = MemoryHeaderStore::with_canonical([&genesis]);
        let mut inserter = HeaderInserter::new(genesis.difficulty, 0);

        assert!(inserter.feed_header(&store, &record(&child)).unwrap().is_some());
        // same hash immediately again
        assert_eq!(inserter.feed_header(&store, &record(&child)).unwrap(), None);

        // a fresh inserter still skips it through the storage lookup
        let mut fresh = HeaderInserter::new(genesis.difficulty, 0);
        assert_eq!(fresh.feed_header(&store, &record(&child)).unwrap(), None);
        assert!(!fresh.best_header_changed());
    }

    #[test]
    fn missing_parent_is_fatal() {
        let genesis = random_header(0, None);
        let store = MemoryHeaderStore::with_canonical([&genesis]);
        let mut inserter = HeaderInserter::new(genesis.difficulty, 0);

        let orphan = random_header(7, None);
        assert_matches!(
            inserter.feed_header(&store, &record(&orphan)),
            Err(InsertError::ParentNotFound { number: 7, .. })
        );
    }

    #[test]
    fn descending_input_is_fatal() {
        let genesis = random_header(0, None);
        let chain = header_chain(&genesis, 5);
        let store = MemoryHeaderStore::with_canonical([&genesis]);
        let mut inserter = HeaderInserter::new(genesis.difficulty, 0);

        for header in &chain {
            inserter.feed_header(&store, &record(header)).unwrap();
        }
        // a sibling at height 3 arrives after height 5
        let sibling = child_header(&chain[1]);
        assert_matches!(
            inserter.feed_header(&store, &record(&sibling)),
            Err(InsertError::UnsortedHeader { number: 3, prev: 5 })
        );
    }

    #[test]
    fn heavier_fork_reports_forking_point() {
        let genesis = random_header(0, None);
        let mut canonical = vec![genesis.clone()];
        canonical.extend(header_chain(&genesis, 5));
        let store = MemoryHeaderStore::with_canonical(canonical.iter());
        let local_td = canonical.iter().map(|h| h.difficulty).sum::<U256>();
        let mut inserter = HeaderInserter::new(local_td, 5);

        // heavier fork splitting off after height 2, reaching height 6
        let fork = header_chain(&canonical[2], 4);
        for header in &fork {
            inserter.feed_header(&store, &record(header)).unwrap();
        }

        assert!(inserter.best_header_changed());
        assert_eq!(inserter.unwind_point(), Some(2));
        assert_eq!(inserter.highest(), 6);
        assert_eq!(inserter.highest_hash(), fork[3].hash());
    }

    #[test]
    fn heavier_short_chain_keeps_the_head_over_a_taller_one() {
        let genesis = random_header(0, None);
        let store = MemoryHeaderStore::with_canonical([&genesis]);
        let mut inserter = HeaderInserter::new(genesis.difficulty, 0);

        // one massive child against a taller featherweight branch, fed in
        // the ascending order the drain produces
        let heavy = Header {
            parent_hash: genesis.hash(),
            number: 1,
            difficulty: U256::from(1_000_000u64),
            timestamp: 1,
            ..Default::default()
        }
        .seal_slow();
        let light_1 = Header {
            parent_hash: genesis.hash(),
            number: 1,
            difficulty: U256::from(1u64),
            timestamp: 2,
            ..Default::default()
        }
        .seal_slow();
        let light_2 = Header {
            parent_hash: light_1.hash(),
            number: 2,
            difficulty: U256::from(1u64),
            timestamp: 3,
            ..Default::default()
        }
        .seal_slow();

        for header in [&heavy, &light_1, &light_2] {
            assert!(inserter.feed_header(&store, &record(header)).unwrap().is_some());
        }

        // the featherweights are stored as a side chain; the head they
        // never outweighed stays where the heavy child put it
        assert!(inserter.best_header_changed());
        assert_eq!(inserter.local_td(), genesis.difficulty + U256::from(1_000_000u64));
        assert_eq!(inserter.highest(), 1);
        assert_eq!(inserter.highest_hash(), heavy.hash());
        assert_eq!(inserter.highest_timestamp(), 1);
        assert!(store.header(&light_2.hash()).unwrap().is_some());
    }

    #[test]
    fn lighter_side_chain_does_not_change_head() {
        let genesis = random_header(0, None);
        let mut canonical = vec![genesis.clone()];
        canonical.extend(header_chain(&genesis, 5));
        let store = MemoryHeaderStore::with_canonical(canonical.iter());
        let local_td = canonical.iter().map(|h| h.difficulty).sum::<U256>();
        let mut inserter = HeaderInserter::new(local_td, 5);

        // single-header branch off height 2, far lighter than the head
        let side = child_header(&canonical[2]);
        let td = inserter.feed_header(&store, &record(&side)).unwrap();

        assert!(td.is_some());
        assert!(!inserter.best_header_changed());
        assert_eq!(inserter.unwind_point(), None);
        assert_eq!(inserter.highest(), 0);
        // the side header is stored regardless
        assert!(store.header(&side.hash()).unwrap().is_some());
        assert_eq!(store.canonical_hash(3).unwrap(), Some(canonical[3].hash()));
    }

    struct CountingStore {
        inner: MemoryHeaderStore,
        header_reads: AtomicUsize,
    }

    impl HeaderStore for CountingStore {
        fn header(&self, hash: &BlockHash) -> StorageResult<Option<HeaderRecord>> {
            self.header_reads.fetch_add(1, Ordering::Relaxed);
            self.inner.header(hash)
        }

        fn header_td(&self, hash: &BlockHash) -> StorageResult<Option<U256>> {
            self.inner.header_td(hash)
        }

        fn canonical_hash(&self, number: BlockNumber) -> StorageResult<Option<BlockHash>> {
            self.inner.canonical_hash(number)
        }

        fn best_number(&self) -> StorageResult<BlockNumber> {
            self.inner.best_number()
        }

        fn headers_in_range(
            &self,
            range: std::ops::RangeInclusive<BlockNumber>,
            limit: usize,
        ) -> StorageResult<Vec<HeaderRecord>> {
            self.inner.headers_in_range(range, limit)
        }
    }

    impl HeaderStoreMut for CountingStore {
        fn insert_header(&self, record: &HeaderRecord, td: U256) -> StorageResult<()> {
            self.inner.insert_header(record, td)
        }

        fn update_canonical_hash(
            &self,
            number: BlockNumber,
            hash: BlockHash,
        ) -> StorageResult<()> {
            self.inner.update_canonical_hash(number, hash)
        }

        fn update_best_number(&self, number: BlockNumber) -> StorageResult<()> {
            self.inner.update_best_number(number)
        }
    }

    #[test]
    fn forking_point_for_extensions_resolves_from_cache() {
        let genesis = random_header(0, None);
        let store = CountingStore {
            inner: MemoryHeaderStore::with_canonical([&genesis]),
            header_reads: AtomicUsize::new(0),
        };
        let mut inserter = HeaderInserter::new(genesis.difficulty, 0);

        let chain = header_chain(&genesis, 5);
        for header in &chain {
            inserter.feed_header(&store, &record(header)).unwrap();
        }

        assert!(inserter.best_header_changed());
        assert_eq!(inserter.highest(), 5);
        // one lookup per header for the already-stored check; every forking
        // point comes out of the canonical cache without walking headers,
        // even though the new marks are not in storage yet
        assert_eq!(store.header_reads.load(Ordering::Relaxed), chain.len());
    }
}
