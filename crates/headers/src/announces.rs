//! Block announcements and the dedup window over them.

use cairn_primitives::{BlockHash, BlockNumber};
use schnellru::{ByLength, LruMap};

/// How many recently seen announcement hashes are remembered.
const SEEN_ANNOUNCES: u32 = 1000;

/// A new block hash announced by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announce {
    /// Hash of the announced block.
    pub hash: BlockHash,
    /// Height of the announced block.
    pub number: BlockNumber,
}

/// Bounded window of recently seen announcement hashes.
///
/// Keeps duplicate announcements from triggering repeated fetches while
/// staying bounded: once more than [`SEEN_ANNOUNCES`] distinct hashes have
/// been added, the oldest are forgotten and may be fetched again.
pub struct SeenAnnounces {
    hashes: LruMap<BlockHash, ()>,
}

impl SeenAnnounces {
    /// Empty window.
    pub fn new() -> Self {
        Self { hashes: LruMap::new(ByLength::new(SEEN_ANNOUNCES)) }
    }

    /// Whether the hash is inside the window.
    ///
    /// A hit counts as fresh use, so hashes that keep getting announced
    /// stay in the window.
    pub fn seen(&mut self, hash: &BlockHash) -> bool {
        self.hashes.get(hash).is_some()
    }

    /// Remembers the hash. Returns `false` if it was already present.
    pub fn add(&mut self, hash: BlockHash) -> bool {
        if self.hashes.peek(&hash).is_some() {
            return false
        }
        self.hashes.insert(hash, ());
        true
    }

    /// Removes the hash from the window. Returns whether it was present.
    pub fn pop(&mut self, hash: &BlockHash) -> bool {
        self.hashes.remove(hash).is_some()
    }

    /// Number of remembered hashes.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Whether no hashes are remembered.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

impl Default for SeenAnnounces {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_primitives::B256;

    fn hash(i: u64) -> BlockHash {
        B256::from(cairn_primitives::U256::from(i))
    }

    #[test]
    fn add_and_pop() {
        let mut seen = SeenAnnounces::new();
        assert!(seen.add(hash(1)));
        assert!(!seen.add(hash(1)));
        assert!(seen.seen(&hash(1)));
        assert!(seen.pop(&hash(1)));
        assert!(!seen.seen(&hash(1)));
        assert!(!seen.pop(&hash(1)));
    }

    #[test]
    fn window_evicts_oldest() {
        let mut seen = SeenAnnounces::new();
        for i in 0..u64::from(SEEN_ANNOUNCES) + 1 {
            seen.add(hash(i));
        }
        assert_eq!(seen.len(), SEEN_ANNOUNCES as usize);
        assert!(!seen.seen(&hash(0)));
        assert!(seen.seen(&hash(u64::from(SEEN_ANNOUNCES))));
    }

    #[test]
    fn seen_refreshes_recency() {
        let mut seen = SeenAnnounces::new();
        for i in 0..u64::from(SEEN_ANNOUNCES) {
            seen.add(hash(i));
        }
        // touching the oldest hash keeps it through the next overflow
        assert!(seen.seen(&hash(0)));
        seen.add(hash(u64::from(SEEN_ANNOUNCES)));
        assert!(seen.seen(&hash(0)));
        assert!(!seen.seen(&hash(1)));
    }
}
