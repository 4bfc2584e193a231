//! Header storage interface used by the sync pipeline.
//!
//! The pipeline reads and writes headers through the traits in this crate
//! so that the graph logic stays independent of the database backend.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(no_crate_inject, attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))))]

use cairn_primitives::{BlockHash, BlockNumber, HeaderRecord, U256};
use thiserror::Error;

#[cfg(any(test, feature = "test-utils"))]
mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryHeaderStore;

/// Storage error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A read from the backend failed.
    #[error("storage read failed: {0}")]
    Read(String),
    /// A write to the backend failed.
    #[error("storage write failed: {0}")]
    Write(String),
}

/// Storage result type.
pub type StorageResult<T> = Result<T, StorageError>;

/// Read access to stored headers.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait HeaderStore: Send + Sync {
    /// Returns the header with the given hash, if present.
    fn header(&self, hash: &BlockHash) -> StorageResult<Option<HeaderRecord>>;

    /// Returns the total difficulty recorded for the header with the given
    /// hash, if present.
    fn header_td(&self, hash: &BlockHash) -> StorageResult<Option<U256>>;

    /// Returns the canonical hash at the given height, if one is marked.
    fn canonical_hash(&self, number: BlockNumber) -> StorageResult<Option<BlockHash>>;

    /// The highest height up to which headers have been processed.
    fn best_number(&self) -> StorageResult<BlockNumber>;

    /// Headers within the ascending height range, capped at `limit`.
    ///
    /// Used to seed the persisted tips of the reconstruction graph at the
    /// start of a pass.
    fn headers_in_range(
        &self,
        range: std::ops::RangeInclusive<BlockNumber>,
        limit: usize,
    ) -> StorageResult<Vec<HeaderRecord>>;
}

/// Write access to stored headers.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait HeaderStoreMut: HeaderStore {
    /// Writes a header together with its total difficulty.
    ///
    /// Side chain headers are written too; canonical marks are managed
    /// separately through [`Self::update_canonical_hash`].
    fn insert_header(&self, record: &HeaderRecord, td: U256) -> StorageResult<()>;

    /// Marks `hash` canonical at `number`, replacing any previous mark.
    fn update_canonical_hash(&self, number: BlockNumber, hash: BlockHash) -> StorageResult<()>;

    /// Updates the highest processed height.
    fn update_best_number(&self, number: BlockNumber) -> StorageResult<()>;
}
