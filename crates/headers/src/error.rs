//! Error types of the header sync pipeline.

use cairn_primitives::{BlockHash, BlockNumber};
use cairn_storage::StorageError;
use thiserror::Error;

/// Fatal faults of an insertion pass.
///
/// Any of these aborts the pass; the pass is retried from the last
/// confirmed height rather than worked around.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InsertError {
    /// Headers were fed out of ascending height order.
    #[error("header at height {number} fed after height {prev}, expected ascending order")]
    UnsortedHeader {
        /// Height of the offending header.
        number: BlockNumber,
        /// Height fed immediately before it.
        prev: BlockNumber,
    },
    /// The parent of a fed header has no stored total difficulty, so the
    /// chain cannot be scored.
    #[error("parent {parent_hash} of header {hash} at height {number} has no stored total difficulty")]
    ParentNotFound {
        /// Hash of the header being inserted.
        hash: BlockHash,
        /// Height of the header being inserted.
        number: BlockNumber,
        /// Parent hash with the missing entry.
        parent_hash: BlockHash,
    },
    /// Walking down from a header never met the canonical chain.
    #[error("no canonical ancestor found below header {hash} at height {number}")]
    NoForkingPoint {
        /// Hash of the header whose ancestry was walked.
        hash: BlockHash,
        /// Height of that header.
        number: BlockNumber,
    },
    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors surfaced by the sync driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// An insertion pass hit a fatal fault.
    #[error(transparent)]
    Insert(#[from] InsertError),
    /// The storage backend failed outside of an insertion pass.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Rewriting canonical marks met a header that is not stored.
    #[error("header {hash} at height {number} is not stored, cannot fix canonical marks")]
    MissingHeader {
        /// Hash of the missing header.
        hash: BlockHash,
        /// Height the mark was being written for.
        number: BlockNumber,
    },
}
