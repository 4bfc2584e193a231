//! Priority queues over the header graph.
//!
//! Both queues are binary heaps that write the position of every entry back
//! into the arena node it belongs to. Storing the index makes removal of an
//! arbitrary entry O(log n) and lets the retry queue restore its invariant
//! after an anchor's retry time is changed in place.

use crate::{anchor::Anchor, link::Link};
use cairn_primitives::{BlockHash, BlockNumber};
use std::collections::HashMap;

/// Ordering applied by a [`LinkQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkOrder {
    /// Lowest height at the root: evicting persisted links drops the oldest
    /// first, keeping the recent frontier for reorg tolerance.
    LowestFirst,
    /// Highest height at the root: evicting pending links drops the ones
    /// farthest from becoming insertable.
    HighestFirst,
}

/// Height-ordered queue of links, used for bounded eviction.
pub(crate) struct LinkQueue {
    order: LinkOrder,
    heap: Vec<(BlockNumber, BlockHash)>,
}

impl LinkQueue {
    pub(crate) const fn new(order: LinkOrder) -> Self {
        Self { order, heap: Vec::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    fn before(&self, a: (BlockNumber, BlockHash), b: (BlockNumber, BlockHash)) -> bool {
        match self.order {
            LinkOrder::LowestFirst => a.0 < b.0,
            LinkOrder::HighestFirst => a.0 > b.0,
        }
    }

    /// Adds an entry for a link already present in the arena.
    pub(crate) fn push(
        &mut self,
        number: BlockNumber,
        hash: BlockHash,
        links: &mut HashMap<BlockHash, Link>,
    ) {
        let idx = self.heap.len();
        self.heap.push((number, hash));
        if let Some(link) = links.get_mut(&hash) {
            link.idx = idx;
        }
        self.sift_up(idx, links);
    }

    /// Removes and returns the root entry.
    pub(crate) fn pop(
        &mut self,
        links: &mut HashMap<BlockHash, Link>,
    ) -> Option<(BlockNumber, BlockHash)> {
        self.remove(0, links)
    }

    /// Removes the entry at `idx`, as stored in the owning link.
    pub(crate) fn remove(
        &mut self,
        idx: usize,
        links: &mut HashMap<BlockHash, Link>,
    ) -> Option<(BlockNumber, BlockHash)> {
        if idx >= self.heap.len() {
            return None
        }
        let last = self.heap.len() - 1;
        self.heap.swap(idx, last);
        let removed = self.heap.pop();
        if idx < self.heap.len() {
            let (_, moved) = self.heap[idx];
            if let Some(link) = links.get_mut(&moved) {
                link.idx = idx;
            }
            self.sift_down(idx, links);
            self.sift_up(idx, links);
        }
        removed
    }

    fn sift_up(&mut self, mut idx: usize, links: &mut HashMap<BlockHash, Link>) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.before(self.heap[idx], self.heap[parent]) {
                break
            }
            self.swap_entries(idx, parent, links);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize, links: &mut HashMap<BlockHash, Link>) {
        loop {
            let left = 2 * idx + 1;
            if left >= self.heap.len() {
                break
            }
            let right = left + 1;
            let mut child = left;
            if right < self.heap.len() && self.before(self.heap[right], self.heap[left]) {
                child = right;
            }
            if !self.before(self.heap[child], self.heap[idx]) {
                break
            }
            self.swap_entries(idx, child, links);
            idx = child;
        }
    }

    fn swap_entries(&mut self, i: usize, j: usize, links: &mut HashMap<BlockHash, Link>) {
        self.heap.swap(i, j);
        if let Some(link) = links.get_mut(&self.heap[i].1) {
            link.idx = i;
        }
        if let Some(link) = links.get_mut(&self.heap[j].1) {
            link.idx = j;
        }
    }
}

/// Retry queue of anchors, soonest retry first with height as tiebreak.
///
/// Entries are anchor keys and comparisons go through the arena, so a
/// retry time mutated in place is re-ordered with [`AnchorQueue::fix`].
pub(crate) struct AnchorQueue {
    heap: Vec<BlockHash>,
}

impl AnchorQueue {
    pub(crate) const fn new() -> Self {
        Self { heap: Vec::new() }
    }

    /// Key of the anchor due for retry first.
    pub(crate) fn peek(&self) -> Option<BlockHash> {
        self.heap.first().copied()
    }

    fn before(a: &Anchor, b: &Anchor) -> bool {
        (a.next_retry_time, a.number) < (b.next_retry_time, b.number)
    }

    fn entry_before(&self, anchors: &HashMap<BlockHash, Anchor>, i: usize, j: usize) -> bool {
        Self::before(&anchors[&self.heap[i]], &anchors[&self.heap[j]])
    }

    /// Adds an entry for an anchor already present in the arena.
    pub(crate) fn push(&mut self, hash: BlockHash, anchors: &mut HashMap<BlockHash, Anchor>) {
        let idx = self.heap.len();
        self.heap.push(hash);
        if let Some(anchor) = anchors.get_mut(&hash) {
            anchor.idx = idx;
        }
        self.sift_up(idx, anchors);
    }

    /// Removes the entry at `idx`, as stored in the owning anchor.
    pub(crate) fn remove(
        &mut self,
        idx: usize,
        anchors: &mut HashMap<BlockHash, Anchor>,
    ) -> Option<BlockHash> {
        if idx >= self.heap.len() {
            return None
        }
        let last = self.heap.len() - 1;
        self.heap.swap(idx, last);
        let removed = self.heap.pop();
        if idx < self.heap.len() {
            let moved = self.heap[idx];
            if let Some(anchor) = anchors.get_mut(&moved) {
                anchor.idx = idx;
            }
            self.fix(idx, anchors);
        }
        removed
    }

    /// Restores the heap invariant around `idx` after the anchor's retry
    /// time changed.
    pub(crate) fn fix(&mut self, idx: usize, anchors: &mut HashMap<BlockHash, Anchor>) {
        if idx < self.heap.len() {
            self.sift_down(idx, anchors);
            self.sift_up(idx, anchors);
        }
    }

    /// Index of the lowest-priority entry.
    ///
    /// The worst entry of a heap is one of its leaves, so only the bottom
    /// half is scanned. Used when deciding whether a new anchor may evict
    /// an existing one at the anchor limit.
    pub(crate) fn worst(&self, anchors: &HashMap<BlockHash, Anchor>) -> Option<usize> {
        if self.heap.is_empty() {
            return None
        }
        let mut worst = self.heap.len() / 2;
        for idx in worst + 1..self.heap.len() {
            if self.entry_before(anchors, worst, idx) {
                worst = idx;
            }
        }
        Some(worst)
    }

    /// Key stored at a heap position.
    pub(crate) fn key_at(&self, idx: usize) -> Option<BlockHash> {
        self.heap.get(idx).copied()
    }

    fn sift_up(&mut self, mut idx: usize, anchors: &mut HashMap<BlockHash, Anchor>) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.entry_before(anchors, idx, parent) {
                break
            }
            self.swap_entries(idx, parent, anchors);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize, anchors: &mut HashMap<BlockHash, Anchor>) {
        loop {
            let left = 2 * idx + 1;
            if left >= self.heap.len() {
                break
            }
            let right = left + 1;
            let mut child = left;
            if right < self.heap.len() && self.entry_before(anchors, right, left) {
                child = right;
            }
            if !self.entry_before(anchors, child, idx) {
                break
            }
            self.swap_entries(idx, child, anchors);
            idx = child;
        }
    }

    fn swap_entries(&mut self, i: usize, j: usize, anchors: &mut HashMap<BlockHash, Anchor>) {
        self.heap.swap(i, j);
        if let Some(anchor) = anchors.get_mut(&self.heap[i]) {
            anchor.idx = i;
        }
        if let Some(anchor) = anchors.get_mut(&self.heap[j]) {
            anchor.idx = j;
        }
    }
}
