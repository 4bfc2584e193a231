//! Attachment points for chains whose ancestry is still missing.

use cairn_primitives::{BlockHash, BlockNumber, PeerId};
use std::time::Instant;

/// A missing parent header that one or more downloaded chains depend on.
///
/// The anchor is keyed in the coordinator by the hash the dependent links
/// name as their parent. While the anchor lives, the coordinator repeatedly
/// requests the headers below it; the anchor remembers when to retry and
/// how often it already has.
pub(crate) struct Anchor {
    /// Hash of the missing header, equal to the arena key.
    pub(crate) parent_hash: BlockHash,
    /// Peer whose response created the anchor.
    pub(crate) peer_id: PeerId,
    /// Hashes of the links waiting on this anchor. All dependents share the
    /// same parent, so they sit at the same height.
    pub(crate) links: Vec<BlockHash>,
    /// Height of the dependent links; the missing header is one below.
    pub(crate) number: BlockNumber,
    /// Earliest time the next retry request may be produced.
    pub(crate) next_retry_time: Instant,
    /// How many requests have been sent for this anchor.
    pub(crate) timeouts: u32,
    /// Position inside the retry queue.
    pub(crate) idx: usize,
}

impl Anchor {
    pub(crate) fn new(
        parent_hash: BlockHash,
        number: BlockNumber,
        peer_id: PeerId,
        now: Instant,
    ) -> Self {
        Self {
            parent_hash,
            peer_id,
            links: Vec::new(),
            number,
            next_retry_time: now,
            timeouts: 0,
            idx: 0,
        }
    }
}
