//! Nodes of the in-memory header graph.

use cairn_primitives::{BlockHash, BlockNumber, HeaderRecord};

/// A downloaded header waiting to be attached and persisted.
///
/// Links are owned by the hash-keyed arena inside the coordinator and refer
/// to their children by hash, so the graph carries no ownership cycles.
pub(crate) struct Link {
    /// The header this link wraps, with its wire encoding.
    pub(crate) record: HeaderRecord,
    /// Hashes of the child links attached on top of this one.
    pub(crate) next: Vec<BlockHash>,
    /// Whether the header has been written to storage.
    pub(crate) persisted: bool,
    /// Whether the header lies on a chain ending in a known-canonical hash.
    pub(crate) preverified: bool,
    /// Position inside whichever queue currently holds the link.
    pub(crate) idx: usize,
}

impl Link {
    pub(crate) fn new(record: HeaderRecord, persisted: bool) -> Self {
        Self { record, next: Vec::new(), persisted, preverified: false, idx: 0 }
    }

    pub(crate) fn number(&self) -> BlockNumber {
        self.record.number()
    }
}
