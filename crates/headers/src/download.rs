//! Coordinator of header download and chain reconstruction.
//!
//! [`HeaderDownload`] owns the anchor/link graph: links are downloaded
//! headers keyed by hash, anchors are missing parents that downloaded
//! chains still depend on. Peer responses attach to the graph through the
//! segment entry points in this crate, persisted progress is drained out
//! through [`HeaderDownload::take_insertable`], and everything is bounded
//! so adversarial input cannot grow memory without limit.

use crate::{
    anchor::Anchor,
    announces::{Announce, SeenAnnounces},
    client::HeaderRequest,
    config::DownloadConfig,
    link::Link,
    metrics::HeaderGraphMetrics,
    penalty::{PeerPenalty, Penalty},
    queue::{AnchorQueue, LinkOrder, LinkQueue},
};
use cairn_primitives::{BlockHash, BlockNumber, HeaderRecord, PeerId};
use cairn_storage::{HeaderStore, StorageError};
use std::{
    collections::{HashMap, HashSet},
    time::{Duration, Instant},
};
use tracing::{debug, trace, warn};

/// Direction the sync currently runs in.
enum SyncMode {
    /// Fork-tolerant reconstruction from many peers.
    Forward,
    /// Single-predecessor walk down from an externally trusted tip.
    Backward(BackwardSync),
}

/// State of a backward walk.
struct BackwardSync {
    /// Hash the next processed header must carry.
    expected_hash: BlockHash,
    /// Height most recently accepted; the next header sits one below.
    last_processed: BlockNumber,
    /// Whether the walk met the stored canonical chain.
    synced: bool,
}

/// The header download coordinator.
///
/// All state lives behind one lock when shared (see
/// [`ShareableHeaderDownload`](crate::ShareableHeaderDownload)); methods
/// here assume exclusive access and never perform network I/O.
pub struct HeaderDownload<V> {
    /// Consensus rules used to check seals and difficulty.
    pub(crate) verifier: V,
    /// Links keyed by their header hash.
    pub(crate) links: HashMap<BlockHash, Link>,
    /// Anchors keyed by the missing parent hash their dependents await.
    pub(crate) anchors: HashMap<BlockHash, Anchor>,
    /// Hashes that must never be processed again.
    pub(crate) bad_headers: HashSet<BlockHash>,
    /// Out-of-band hashes known to lie on the canonical chain.
    pub(crate) preverified_hashes: HashSet<BlockHash>,
    /// Height up to which the preverified hashes reach.
    pub(crate) preverified_height: BlockNumber,
    /// Links whose parent is persisted, waiting to be drained to storage.
    pub(crate) insert_list: Vec<BlockHash>,
    /// Window of recently seen announcement hashes.
    pub(crate) seen_announces: SeenAnnounces,
    /// Verified announcements waiting to be re-broadcast.
    pub(crate) to_announce: Vec<Announce>,
    /// Pending links ordered for eviction, highest height first.
    pub(crate) link_queue: LinkQueue,
    /// Persisted links ordered for eviction, lowest height first.
    pub(crate) persisted_link_queue: LinkQueue,
    /// Anchors ordered by retry time.
    pub(crate) anchor_queue: AnchorQueue,
    pub(crate) anchor_limit: usize,
    pub(crate) link_limit: usize,
    pub(crate) persisted_link_limit: usize,
    pub(crate) request_length: u64,
    pub(crate) skeleton_stride: u64,
    pub(crate) request_retries: u32,
    /// Highest height known to be written to storage.
    pub(crate) highest_in_db: BlockNumber,
    /// Highest height seen in announcements and new-block segments.
    pub(crate) top_seen_height: BlockNumber,
    /// Whether a successful attachment may immediately chain into another
    /// request.
    pub(crate) request_chaining: bool,
    /// Whether a sync pass is actively draining; announcements are not
    /// re-broadcast while catching up.
    pub(crate) fetching: bool,
    mode: SyncMode,
    pub(crate) metrics: HeaderGraphMetrics,
}

impl<V> HeaderDownload<V> {
    /// Coordinator with an empty graph.
    pub fn new(config: &DownloadConfig, verifier: V) -> Self {
        Self {
            verifier,
            links: HashMap::new(),
            anchors: HashMap::new(),
            bad_headers: HashSet::new(),
            preverified_hashes: HashSet::new(),
            preverified_height: 0,
            insert_list: Vec::new(),
            seen_announces: SeenAnnounces::new(),
            to_announce: Vec::new(),
            link_queue: LinkQueue::new(LinkOrder::HighestFirst),
            persisted_link_queue: LinkQueue::new(LinkOrder::LowestFirst),
            anchor_queue: AnchorQueue::new(),
            anchor_limit: config.anchor_limit,
            link_limit: config.pending_link_limit(),
            persisted_link_limit: config.persisted_link_limit(),
            request_length: config.request_length,
            skeleton_stride: config.skeleton_stride,
            request_retries: config.request_retries,
            highest_in_db: 0,
            top_seen_height: 0,
            request_chaining: true,
            fetching: false,
            mode: SyncMode::Forward,
            metrics: HeaderGraphMetrics::default(),
        }
    }

    /// Highest height known to be written to storage.
    pub fn progress(&self) -> BlockNumber {
        self.highest_in_db
    }

    /// Highest height observed in announcements and new-block segments.
    pub fn top_seen_height(&self) -> BlockNumber {
        self.top_seen_height
    }

    /// Whether the sync has caught up with everything it knows about.
    ///
    /// In forward mode that means storage has reached the highest height
    /// seen on the network; in backward mode, that the walk down from the
    /// trusted tip met the stored canonical chain.
    pub fn is_synced(&self) -> bool {
        match &self.mode {
            SyncMode::Forward => self.highest_in_db >= self.top_seen_height,
            SyncMode::Backward(state) => state.synced,
        }
    }

    /// Number of live anchors.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Number of pending links.
    pub fn pending_link_count(&self) -> usize {
        self.link_queue.len()
    }

    /// Number of persisted links retained for reorg tolerance.
    pub fn persisted_link_count(&self) -> usize {
        self.persisted_link_queue.len()
    }

    /// Number of links currently eligible for insertion.
    pub fn insertable_count(&self) -> usize {
        self.insert_list.len()
    }

    /// Marks a sync pass as running or finished.
    pub fn set_fetching(&mut self, fetching: bool) {
        self.fetching = fetching;
    }

    /// Whether a sync pass is running.
    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    /// Controls whether attachments may immediately chain into further
    /// requests.
    pub fn set_request_chaining(&mut self, chaining: bool) {
        self.request_chaining = chaining;
    }

    /// Installs the out-of-band hashes known to be canonical up to
    /// `height`.
    ///
    /// Links at or below this height are only inserted once a chain of
    /// hashes connects them to one of these.
    pub fn set_preverified_hashes(&mut self, hashes: HashSet<BlockHash>, height: BlockNumber) {
        self.preverified_hashes = hashes;
        self.preverified_height = height;
    }

    /// Permanently blacklists a header and drops it and its descendants
    /// from the graph.
    pub fn report_bad_header(&mut self, hash: BlockHash) {
        self.bad_headers.insert(hash);
        if self.links.contains_key(&hash) {
            self.remove_upwards(vec![hash]);
            self.update_graph_gauges();
        }
    }

    pub(crate) fn is_forward(&self) -> bool {
        matches!(self.mode, SyncMode::Forward)
    }

    /// Reloads the persisted frontier from storage records.
    ///
    /// The retained tip of the stored chain doubles as the attachment
    /// surface for new segments: a segment whose parent is one of these
    /// links becomes insertable immediately. Replaces any previously
    /// seeded frontier.
    pub fn seed_persisted_frontier(
        &mut self,
        records: Vec<HeaderRecord>,
        progress: BlockNumber,
    ) {
        while let Some((_, hash)) = self.persisted_link_queue.pop(&mut self.links) {
            self.links.remove(&hash);
        }
        for record in records {
            if self.links.contains_key(&record.hash()) {
                continue
            }
            self.add_header_as_link(record, true);
        }
        while self.persisted_link_queue.len() > self.persisted_link_limit {
            if let Some((_, hash)) = self.persisted_link_queue.pop(&mut self.links) {
                self.links.remove(&hash);
            }
        }
        self.highest_in_db = progress;
        self.update_graph_gauges();
    }

    /// Inserts a header into the arena and the matching eviction queue.
    pub(crate) fn add_header_as_link(&mut self, record: HeaderRecord, persisted: bool) -> BlockHash {
        let hash = record.hash();
        let number = record.number();
        self.links.insert(hash, Link::new(record, persisted));
        if persisted {
            self.persisted_link_queue.push(number, hash, &mut self.links);
        } else {
            self.link_queue.push(number, hash, &mut self.links);
        }
        hash
    }

    /// Marks the link and all its unmarked ancestors preverified.
    ///
    /// A hash match proves the whole parent chain below it, so the walk
    /// stops at the first link already marked.
    pub(crate) fn mark_preverified(&mut self, mut hash: BlockHash) {
        while let Some(link) = self.links.get_mut(&hash) {
            if link.preverified {
                break
            }
            link.preverified = true;
            hash = link.record.header.parent_hash;
        }
    }

    /// Removes an anchor from the arena and the retry queue.
    pub(crate) fn remove_anchor(&mut self, parent_hash: &BlockHash) -> Option<Anchor> {
        let anchor = self.anchors.remove(parent_hash)?;
        self.anchor_queue.remove(anchor.idx, &mut self.anchors);
        Some(anchor)
    }

    /// Drops an anchor together with the entire subtree hanging off it.
    pub(crate) fn invalidate_anchor(&mut self, parent_hash: &BlockHash, reason: &str) {
        if let Some(anchor) = self.remove_anchor(parent_hash) {
            warn!(
                target: "sync::headers",
                height = anchor.number,
                reason,
                "Invalidating anchor"
            );
            self.remove_upwards(anchor.links);
            self.metrics.invalidated_anchors.increment(1);
        }
    }

    /// Deletes the given links and every descendant reachable from them.
    pub(crate) fn remove_upwards(&mut self, mut to_remove: Vec<BlockHash>) {
        while let Some(hash) = to_remove.pop() {
            if let Some(link) = self.links.remove(&hash) {
                if link.persisted {
                    self.persisted_link_queue.remove(link.idx, &mut self.links);
                } else {
                    self.link_queue.remove(link.idx, &mut self.links);
                }
                to_remove.extend(link.next);
            }
        }
    }

    /// Returns the existing anchor for `parent_hash` or registers a new
    /// one at the given dependent height.
    ///
    /// At the anchor limit a new anchor is only admitted by invalidating
    /// the lowest-priority queue entry, and only if the candidate would
    /// outrank it; otherwise `None` is returned and the caller drops its
    /// segment. Returns the key and whether the anchor was created.
    pub(crate) fn find_or_create_anchor(
        &mut self,
        parent_hash: BlockHash,
        number: BlockNumber,
        peer_id: PeerId,
        now: Instant,
    ) -> Option<(BlockHash, bool)> {
        if self.anchors.contains_key(&parent_hash) {
            return Some((parent_hash, false))
        }
        if number == 0 {
            // nothing below genesis to request
            return None
        }
        if self.anchors.len() >= self.anchor_limit {
            let worst_idx = self.anchor_queue.worst(&self.anchors)?;
            let worst_key = self.anchor_queue.key_at(worst_idx)?;
            let worst = &self.anchors[&worst_key];
            if (now, number) < (worst.next_retry_time, worst.number) {
                self.invalidate_anchor(&worst_key, "evicted by higher priority anchor");
            } else {
                debug!(
                    target: "sync::headers",
                    count = self.anchors.len(),
                    limit = self.anchor_limit,
                    "Anchor limit reached, refusing new anchor"
                );
                return None
            }
        }
        self.anchors.insert(parent_hash, Anchor::new(parent_hash, number, peer_id, now));
        self.anchor_queue.push(parent_hash, &mut self.anchors);
        Some((parent_hash, true))
    }

    /// Evicts links above the memory bounds.
    ///
    /// Pending links go highest first, so the graph sheds the headers
    /// farthest from being insertable; persisted links go lowest first,
    /// keeping the recent frontier. An anchor left without dependents by
    /// an eviction is removed with its entry.
    pub(crate) fn enforce_link_limits(&mut self) {
        if self.link_queue.len() > self.link_limit {
            trace!(
                target: "sync::headers",
                count = self.link_queue.len(),
                limit = self.link_limit,
                "Too many pending links, evicting"
            );
        }
        while self.link_queue.len() > self.link_limit {
            let Some((_, hash)) = self.link_queue.pop(&mut self.links) else { break };
            self.drop_evicted(hash);
        }
        while self.persisted_link_queue.len() > self.persisted_link_limit {
            let Some((_, hash)) = self.persisted_link_queue.pop(&mut self.links) else { break };
            self.links.remove(&hash);
            self.metrics.evicted_links.increment(1);
        }
    }

    /// Removes an evicted pending link from the arena and from whatever
    /// refers to it.
    fn drop_evicted(&mut self, hash: BlockHash) {
        let Some(link) = self.links.remove(&hash) else { return };
        let parent_hash = link.record.header.parent_hash;
        if let Some(parent) = self.links.get_mut(&parent_hash) {
            parent.next.retain(|h| *h != hash);
        }
        let mut anchor_emptied = false;
        if let Some(anchor) = self.anchors.get_mut(&parent_hash) {
            anchor.links.retain(|h| *h != hash);
            anchor_emptied = anchor.links.is_empty();
        }
        if anchor_emptied {
            self.remove_anchor(&parent_hash);
        }
        self.metrics.evicted_links.increment(1);
    }

    /// Takes up to `max` links eligible for insertion, lowest height
    /// first.
    ///
    /// Links at or below the preverified height that have not been
    /// preverified yet stay queued until a verified descendant confirms
    /// them. Links that were blacklisted in the meantime are dropped with
    /// their descendants.
    pub fn take_insertable(&mut self, max: usize) -> Vec<HeaderRecord> {
        if self.insert_list.is_empty() || max == 0 {
            return Vec::new()
        }
        // parents always sit lower than their children, so height order
        // feeds whole chains bottom-up
        self.insert_list
            .sort_by_key(|hash| self.links.get(hash).map(|link| link.number()).unwrap_or(0));
        let drained = std::mem::take(&mut self.insert_list);
        let mut out = Vec::new();
        let mut retained = Vec::new();
        for hash in drained {
            if out.len() >= max {
                retained.push(hash);
                continue
            }
            let Some(link) = self.links.get(&hash) else { continue };
            let number = link.number();
            if number <= self.preverified_height && !link.preverified {
                retained.push(hash);
                continue
            }
            if self.bad_headers.contains(&hash) {
                debug!(
                    target: "sync::headers",
                    %hash,
                    height = number,
                    "Dropping blacklisted header and its descendants"
                );
                self.remove_upwards(vec![hash]);
                continue
            }
            out.push(link.record.clone());
        }
        self.insert_list = retained;
        out
    }

    /// Records that a header was written to storage.
    ///
    /// Moves the link into the persisted queue, queues its children for
    /// insertion and advances the stored-progress watermark.
    pub fn mark_persisted(&mut self, hash: BlockHash) {
        let Some(link) = self.links.get_mut(&hash) else {
            debug!(target: "sync::headers", %hash, "Persisted header no longer tracked");
            return
        };
        if !link.persisted {
            link.persisted = true;
            let number = link.number();
            let idx = link.idx;
            let children = link.next.clone();
            self.link_queue.remove(idx, &mut self.links);
            self.persisted_link_queue.push(number, hash, &mut self.links);
            self.insert_list.extend(children);
            if number > self.highest_in_db {
                self.highest_in_db = number;
            }
        }
        while self.persisted_link_queue.len() > self.persisted_link_limit {
            if let Some((_, evicted)) = self.persisted_link_queue.pop(&mut self.links) {
                self.links.remove(&evicted);
                self.metrics.evicted_links.increment(1);
            }
        }
        self.update_graph_gauges();
    }

    /// Produces the next due anchor request, if any.
    ///
    /// Anchors whose retry budget is exhausted are invalidated along the
    /// way and their creating peer penalized. `None` with no penalties
    /// means nothing is due yet.
    pub fn request_more_headers(
        &mut self,
        now: Instant,
    ) -> (Option<HeaderRequest>, Vec<PeerPenalty>) {
        let mut penalties = Vec::new();
        if !self.is_forward() {
            return (None, penalties)
        }
        while let Some(key) = self.anchor_queue.peek() {
            let anchor = &self.anchors[&key];
            if anchor.next_retry_time > now {
                // the soonest anchor is not due yet, so neither is any other
                break
            }
            if anchor.timeouts < self.request_retries {
                let request = HeaderRequest {
                    hash: Some(key),
                    number: anchor.number.saturating_sub(1),
                    length: self.request_length,
                    skip: 0,
                    reverse: true,
                };
                trace!(
                    target: "downloaders::headers",
                    hash = %key,
                    number = request.number,
                    "Requesting headers below anchor"
                );
                return (Some(request), penalties)
            }
            // ancestry looks unavailable, hold the creating peer responsible
            penalties.push(PeerPenalty::new(anchor.peer_id, Penalty::AbandonedAnchor));
            let parent_hash = anchor.parent_hash;
            self.invalidate_anchor(&parent_hash, "retries exhausted");
            self.update_graph_gauges();
        }
        (None, penalties)
    }

    /// Records that an anchor request went out.
    ///
    /// Charges one retry and reschedules the anchor `timeout` into the
    /// future, re-ordering the retry queue around it.
    pub fn sent_request(&mut self, request: &HeaderRequest, now: Instant, timeout: Duration) {
        let Some(hash) = request.hash else { return };
        let Some(anchor) = self.anchors.get_mut(&hash) else { return };
        anchor.timeouts += 1;
        anchor.next_retry_time = now + timeout;
        let idx = anchor.idx;
        self.anchor_queue.fix(idx, &mut self.anchors);
    }

    /// Produces a sparse forward request probing above the known frontier.
    ///
    /// The skeleton walks from one stride above stored progress towards
    /// the highest seen height, stopping below the lowest anchor already
    /// covering that range. Responses attach as new anchors whose gaps the
    /// anchor requests then fill backwards.
    pub fn request_skeleton(&self) -> Option<HeaderRequest> {
        if !self.is_forward() {
            return None
        }
        let stride = self.skeleton_stride;
        let start = self.highest_in_db + stride;
        let mut upper = self.top_seen_height + 1;
        if upper <= start {
            return None
        }
        for anchor in self.anchors.values() {
            if anchor.number > start && anchor.number < upper {
                upper = anchor.number;
            }
        }
        let length = ((upper - start) / stride).clamp(1, self.request_length);
        debug!(
            target: "downloaders::headers",
            start,
            length,
            anchors = self.anchors.len(),
            top_seen = self.top_seen_height,
            highest_in_db = self.highest_in_db,
            "Requesting skeleton"
        );
        Some(HeaderRequest { hash: None, number: start, length, skip: stride - 1, reverse: false })
    }

    /// Filters announced block hashes down to the ones worth fetching.
    ///
    /// Hashes inside the seen window are dropped silently. Announces far
    /// above the seen frontier or below the persisted retention floor earn
    /// penalties instead of fetches.
    pub fn note_block_hashes(
        &mut self,
        peer_id: PeerId,
        announces: &[Announce],
    ) -> (Vec<Announce>, Vec<PeerPenalty>) {
        let mut unseen = Vec::new();
        let mut penalties = Vec::new();
        if !self.is_forward() {
            return (unseen, penalties)
        }
        let floor = self.highest_in_db.saturating_sub(self.persisted_link_limit as u64);
        for announce in announces {
            if self.seen_announces.seen(&announce.hash) {
                continue
            }
            if self.top_seen_height > 0
                && announce.number > self.top_seen_height + self.skeleton_stride
            {
                penalties.push(PeerPenalty::new(peer_id, Penalty::TooFarFuture));
                continue
            }
            if announce.number < floor {
                penalties.push(PeerPenalty::new(peer_id, Penalty::TooFarPast));
                continue
            }
            self.seen_announces.add(announce.hash);
            unseen.push(*announce);
        }
        (unseen, penalties)
    }

    /// Drains the verified announcements buffered for re-broadcast.
    pub fn take_announces(&mut self) -> Vec<Announce> {
        std::mem::take(&mut self.to_announce)
    }

    /// Switches to a backward walk down from a trusted tip.
    ///
    /// The forward graph is discarded: its contents are meaningless for a
    /// single-predecessor walk.
    pub fn start_backward_sync(&mut self, tip_hash: BlockHash, tip_number: BlockNumber) {
        debug!(target: "sync::headers", %tip_hash, tip_number, "Entering backward sync");
        self.clear_graph();
        self.mode = SyncMode::Backward(BackwardSync {
            expected_hash: tip_hash,
            last_processed: tip_number + 1,
            synced: false,
        });
    }

    /// Leaves backward mode, re-entering forward mode with a fresh graph.
    pub fn finish_backward_sync(&mut self) {
        if !self.is_forward() {
            debug!(target: "sync::headers", "Leaving backward sync");
            self.clear_graph();
            self.mode = SyncMode::Forward;
        }
    }

    /// The request fetching the next run of headers below the trusted
    /// tip, or `None` outside backward mode or once it finished.
    pub fn request_backward(&self) -> Option<HeaderRequest> {
        match &self.mode {
            SyncMode::Backward(state) if !state.synced => Some(HeaderRequest {
                hash: Some(state.expected_hash),
                number: state.last_processed.saturating_sub(1),
                length: self.request_length,
                skip: 0,
                reverse: true,
            }),
            _ => None,
        }
    }

    /// Height most recently accepted by the backward walk.
    pub fn backward_progress(&self) -> Option<BlockNumber> {
        match &self.mode {
            SyncMode::Backward(state) => Some(state.last_processed),
            SyncMode::Forward => None,
        }
    }

    /// Verifies a newest-first run of headers against the expected hash
    /// chain of the backward walk.
    ///
    /// Accepted records are returned for the caller to persist. A header
    /// whose hash does not match the expectation stops the walk from
    /// advancing and earns the peer a [`Penalty::BadBlock`]; a response
    /// starting at the wrong height is ignored as stale. The walk
    /// terminates once a processed header is already canonical in
    /// storage, or genesis is reached.
    pub fn process_backward_segment<S: HeaderStore>(
        &mut self,
        headers: &[HeaderRecord],
        peer_id: PeerId,
        store: &S,
    ) -> Result<(Vec<HeaderRecord>, Option<PeerPenalty>), StorageError> {
        let SyncMode::Backward(state) = &mut self.mode else { return Ok((Vec::new(), None)) };
        if state.synced {
            return Ok((Vec::new(), None))
        }
        let Some(first) = headers.first() else { return Ok((Vec::new(), None)) };
        if first.number() != state.last_processed.saturating_sub(1) {
            // likely an answer to an outdated request, not enough evidence
            // to penalize
            trace!(
                target: "sync::headers",
                got = first.number(),
                expected = state.last_processed.saturating_sub(1),
                "Ignoring stale backward response"
            );
            return Ok((Vec::new(), None))
        }
        let mut accepted = Vec::new();
        for record in headers {
            if record.hash() != state.expected_hash {
                debug!(
                    target: "sync::headers",
                    hash = %record.hash(),
                    expected = %state.expected_hash,
                    "Backward header does not match expected hash"
                );
                return Ok((accepted, Some(PeerPenalty::new(peer_id, Penalty::BadBlock))))
            }
            if store.canonical_hash(record.number())? == Some(record.hash()) {
                state.synced = true;
                debug!(
                    target: "sync::headers",
                    height = record.number(),
                    "Backward sync reached the canonical chain"
                );
                return Ok((accepted, None))
            }
            state.expected_hash = record.header.parent_hash;
            state.last_processed = record.number();
            accepted.push(record.clone());
            if record.number() == 0 {
                state.synced = true;
                break
            }
        }
        Ok((accepted, None))
    }

    fn clear_graph(&mut self) {
        self.links.clear();
        self.anchors.clear();
        self.link_queue = LinkQueue::new(LinkOrder::HighestFirst);
        self.persisted_link_queue = LinkQueue::new(LinkOrder::LowestFirst);
        self.anchor_queue = AnchorQueue::new();
        self.insert_list.clear();
        self.to_announce.clear();
        self.update_graph_gauges();
    }

    pub(crate) fn update_graph_gauges(&self) {
        self.metrics.active_anchors.set(self.anchors.len() as f64);
        self.metrics.active_links.set(self.link_queue.len() as f64);
        self.metrics.persisted_links.set(self.persisted_link_queue.len() as f64);
    }
}
