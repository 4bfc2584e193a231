//! In-memory header store for tests.

use crate::{HeaderStore, HeaderStoreMut, StorageResult};
use cairn_primitives::{BlockHash, BlockNumber, HeaderRecord, SealedHeader, U256};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Header store backed by in-memory maps.
#[derive(Debug, Default)]
pub struct MemoryHeaderStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    headers: HashMap<BlockHash, HeaderRecord>,
    tds: HashMap<BlockHash, U256>,
    canonical: HashMap<BlockNumber, BlockHash>,
    best: BlockNumber,
}

impl MemoryHeaderStore {
    /// Store pre-populated with a canonical chain.
    ///
    /// Each header is written with a cumulative total difficulty and marked
    /// canonical at its height. The best number is set to the height of the
    /// last header.
    pub fn with_canonical<'a>(headers: impl IntoIterator<Item = &'a SealedHeader>) -> Self {
        let store = Self::default();
        {
            let mut inner = store.inner.write();
            let mut td = U256::ZERO;
            for header in headers {
                td += header.difficulty;
                let record = HeaderRecord::from_sealed(header.clone());
                inner.headers.insert(header.hash(), record);
                inner.tds.insert(header.hash(), td);
                inner.canonical.insert(header.number, header.hash());
                inner.best = header.number;
            }
        }
        store
    }

    /// Number of stored headers.
    pub fn header_count(&self) -> usize {
        self.inner.read().headers.len()
    }
}

impl HeaderStore for MemoryHeaderStore {
    fn header(&self, hash: &BlockHash) -> StorageResult<Option<HeaderRecord>> {
        Ok(self.inner.read().headers.get(hash).cloned())
    }

    fn header_td(&self, hash: &BlockHash) -> StorageResult<Option<U256>> {
        Ok(self.inner.read().tds.get(hash).copied())
    }

    fn canonical_hash(&self, number: BlockNumber) -> StorageResult<Option<BlockHash>> {
        Ok(self.inner.read().canonical.get(&number).copied())
    }

    fn best_number(&self) -> StorageResult<BlockNumber> {
        Ok(self.inner.read().best)
    }

    fn headers_in_range(
        &self,
        range: std::ops::RangeInclusive<BlockNumber>,
        limit: usize,
    ) -> StorageResult<Vec<HeaderRecord>> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for number in range {
            if out.len() >= limit {
                break
            }
            if let Some(record) =
                inner.canonical.get(&number).and_then(|hash| inner.headers.get(hash))
            {
                out.push(record.clone());
            }
        }
        Ok(out)
    }
}

impl HeaderStoreMut for MemoryHeaderStore {
    fn insert_header(&self, record: &HeaderRecord, td: U256) -> StorageResult<()> {
        let mut inner = self.inner.write();
        inner.tds.insert(record.hash(), td);
        inner.headers.insert(record.hash(), record.clone());
        Ok(())
    }

    fn update_canonical_hash(&self, number: BlockNumber, hash: BlockHash) -> StorageResult<()> {
        self.inner.write().canonical.insert(number, hash);
        Ok(())
    }

    fn update_best_number(&self, number: BlockNumber) -> StorageResult<()> {
        self.inner.write().best = number;
        Ok(())
    }
}
