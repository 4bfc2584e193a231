//! Attaching peer responses to the header graph.
//!
//! A response batch is first split into parent-linked [`ChainSegment`]s
//! along its fork points, with per-pair validation done on the way. Each
//! segment is then attached to the graph through one of four cases,
//! depending on whether its ends meet an existing anchor, an existing
//! link, both, or neither. All validation happens before the graph is
//! mutated, so a rejected segment leaves no trace.

use crate::{
    announces::Announce,
    download::HeaderDownload,
    penalty::{Penalty, PeerPenalty},
    segment::ChainSegment,
};
use cairn_consensus::{ConsensusError, HeaderVerifier};
use cairn_primitives::{BlockHash, HeaderRecord, PeerId};
use std::{
    collections::{HashMap, HashSet},
    time::{Instant, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, trace};

/// Seconds since the unix epoch, for seal timestamp checks.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Result of attaching one segment.
#[derive(Debug, Default)]
pub struct SegmentOutcome {
    /// Whether the attachment surfaced a new gap worth requesting
    /// immediately, without waiting for the next scheduling round.
    pub request_more: bool,
    /// Penalties earned by peers over this segment.
    pub penalties: Vec<PeerPenalty>,
}

impl<V: HeaderVerifier> HeaderDownload<V> {
    /// Splits a response batch into parent-linked segments.
    ///
    /// Headers are sorted child-most first and grouped so that a segment
    /// never branches: a header with zero or several children in the batch
    /// starts a new segment. Duplicates, blacklisted hashes and parent/child
    /// pairs violating height or difficulty rules reject the whole batch
    /// with the penalty the responding peer deserves.
    pub fn split_into_segments(
        &self,
        headers: &[HeaderRecord],
    ) -> Result<Vec<ChainSegment>, Penalty> {
        let mut sorted: Vec<&HeaderRecord> = headers.iter().collect();
        sorted.sort_by(|a, b| b.number().cmp(&a.number()));

        let mut segments: Vec<Vec<HeaderRecord>> = Vec::new();
        let mut segment_by_parent: HashMap<BlockHash, usize> = HashMap::new();
        let mut children: HashMap<BlockHash, Vec<&HeaderRecord>> = HashMap::new();
        let mut seen: HashSet<BlockHash> = HashSet::new();

        for record in sorted {
            let hash = record.hash();
            if self.bad_headers.contains(&hash) {
                return Err(Penalty::BadBlock)
            }
            if !seen.insert(hash) {
                return Err(Penalty::DuplicateHeader)
            }
            let dependents = children.get(&hash).map(Vec::as_slice).unwrap_or_default();
            for child in dependents {
                if let Some(penalty) = self.child_parent_valid(child, record) {
                    return Err(penalty)
                }
            }
            // a single child continues its segment, anything else starts one
            let idx = if dependents.len() == 1 {
                segment_by_parent.get(&hash).copied().unwrap_or_else(|| {
                    segments.push(Vec::new());
                    segments.len() - 1
                })
            } else {
                segments.push(Vec::new());
                segments.len() - 1
            };
            segments[idx].push(record.clone());
            segment_by_parent.insert(record.header.parent_hash, idx);
            children.entry(record.header.parent_hash).or_default().push(record);
        }
        Ok(segments.into_iter().map(ChainSegment::new).collect())
    }

    fn child_parent_valid(&self, child: &HeaderRecord, parent: &HeaderRecord) -> Option<Penalty> {
        if parent.number() + 1 != child.number() {
            return Some(Penalty::WrongChildBlockHeight)
        }
        let expected = self.verifier.expected_difficulty(&parent.header, child.header.timestamp);
        if child.header.difficulty != expected {
            return Some(Penalty::WrongChildDifficulty)
        }
        None
    }

    /// Attaches one segment to the graph.
    ///
    /// `new_block` marks segments from new-block gossip, which are allowed
    /// to raise the seen frontier without a prior announcement. The four
    /// attachment cases are: connect (anchor above, link below), extend
    /// down (anchor above only), extend up (link below only) and new
    /// anchor (neither).
    pub fn process_segment(
        &mut self,
        segment: &ChainSegment,
        new_block: bool,
        peer_id: PeerId,
        now: Instant,
    ) -> SegmentOutcome {
        let mut outcome = SegmentOutcome::default();
        if !self.is_forward() {
            return outcome
        }
        let Some(highest) = segment.highest() else { return outcome };
        let highest_hash = highest.hash();
        let highest_num = highest.number();

        let (found_anchor, start) = self.find_anchor(segment);
        let (found_link, end) = self.find_link(segment, start);
        if end == 0 {
            trace!(
                target: "sync::headers",
                hash = %highest_hash,
                height = highest_num,
                "Duplicate segment"
            );
            if found_anchor {
                // the header this anchor waits for is already a link, drop
                // the anchor or it keeps requesting duplicates
                let key = segment.headers()[start].hash();
                self.remove_anchor(&key);
                self.update_graph_gauges();
            }
            return outcome
        }

        if highest_num > self.top_seen_height
            && (new_block || self.seen_announces.seen(&highest_hash))
        {
            self.top_seen_height = highest_num;
        }

        let sub = &segment.headers()[start..end];

        // seal checks above the preverified floor; below it the chain of
        // preverified hashes is the proof
        for record in sub {
            if record.number() <= self.preverified_height {
                continue
            }
            if let Err(err) = self.verifier.verify_seal(&record.header, unix_now()) {
                let penalty = match &err {
                    ConsensusError::TimestampInFuture { .. } => Penalty::TooFarFuture,
                    ConsensusError::InvalidSeal { .. } => Penalty::InvalidSeal,
                };
                debug!(
                    target: "sync::headers",
                    hash = %record.hash(),
                    height = record.number(),
                    %err,
                    "Rejecting segment with invalid seal"
                );
                outcome.penalties.push(PeerPenalty::with_reason(peer_id, penalty, err));
                return outcome
            }
        }

        // the hashes inside the segment were validated by the split; the
        // boundary towards the attachment link was not
        if found_link {
            let Some(lowest) = sub.last() else { return outcome };
            if let Some(attachment) = self.links.get(&lowest.header.parent_hash) {
                if attachment.preverified && !attachment.next.is_empty() {
                    // the preverified chain is unique, a sibling of its
                    // child cannot be canonical
                    debug!(
                        target: "sync::headers",
                        hash = %lowest.hash(),
                        height = lowest.number(),
                        "Rejecting sibling of a preverified header"
                    );
                    outcome.penalties.push(PeerPenalty::new(peer_id, Penalty::BadBlock));
                    return outcome
                }
                if let Some(penalty) = self.child_parent_valid(lowest, &attachment.record) {
                    outcome.penalties.push(PeerPenalty::new(peer_id, penalty));
                    return outcome
                }
            }
        }
        if found_anchor {
            if let Some(first) = sub.first() {
                // the delivered header's content is pinned by the anchor
                // hash; a height mismatch means the dependents that created
                // the anchor lied about theirs
                let key = first.hash();
                let mismatch = self
                    .anchors
                    .get(&key)
                    .is_some_and(|anchor| anchor.number != first.number() + 1);
                if mismatch {
                    let bad_peer = self.anchors[&key].peer_id;
                    self.invalidate_anchor(&key, "dependent headers at wrong height");
                    outcome
                        .penalties
                        .push(PeerPenalty::new(bad_peer, Penalty::WrongChildBlockHeight));
                    self.update_graph_gauges();
                    return outcome
                }
            }
        }

        match (found_anchor, found_link) {
            (true, true) => {
                if let Some(first) = sub.first() {
                    let anchor_key = first.hash();
                    self.connect(sub, anchor_key);
                    trace!(
                        target: "sync::headers",
                        lowest = sub.last().map(|r| r.number()).unwrap_or_default(),
                        highest = first.number(),
                        "Connected segment"
                    );
                }
            }
            (true, false) => {
                if let Some(first) = sub.first() {
                    let anchor_key = first.hash();
                    outcome.request_more = self.extend_down(sub, anchor_key, now);
                    trace!(
                        target: "sync::headers",
                        lowest = sub.last().map(|r| r.number()).unwrap_or_default(),
                        highest = first.number(),
                        "Extended anchor down"
                    );
                }
            }
            (false, true) => {
                self.extend_up(sub);
                trace!(
                    target: "sync::headers",
                    lowest = sub.last().map(|r| r.number()).unwrap_or_default(),
                    highest = highest_num,
                    "Extended chain up"
                );
            }
            (false, false) => {
                outcome.request_more = self.new_anchor(sub, peer_id, now);
                trace!(
                    target: "sync::headers",
                    lowest = sub.last().map(|r| r.number()).unwrap_or_default(),
                    highest = highest_num,
                    "Created new anchor"
                );
            }
        }

        // a validated announcement is worth relaying, unless a sync pass is
        // still catching up
        if self.seen_announces.pop(&highest_hash) && !self.fetching {
            self.to_announce.push(Announce { hash: highest_hash, number: highest_num });
        }

        self.enforce_link_limits();
        self.update_graph_gauges();
        if !self.request_chaining {
            outcome.request_more = false;
        }
        outcome
    }

    /// Position of the first header an existing anchor waits for.
    fn find_anchor(&self, segment: &ChainSegment) -> (bool, usize) {
        for (i, record) in segment.headers().iter().enumerate() {
            if self.anchors.contains_key(&record.hash()) {
                return (true, i)
            }
        }
        (false, 0)
    }

    /// End bound of the attachable run, walking children towards parents.
    ///
    /// Returns `(false, 0)` when the header at `start` is already a link,
    /// which makes the remaining run a duplicate.
    fn find_link(&self, segment: &ChainSegment, start: usize) -> (bool, usize) {
        let headers = segment.headers();
        let Some(first) = headers.get(start) else { return (false, 0) };
        if self.links.contains_key(&first.hash()) {
            return (false, 0)
        }
        for (i, record) in headers.iter().enumerate().skip(start) {
            if self.links.contains_key(&record.header.parent_hash) {
                return (true, i + 1)
            }
        }
        (false, headers.len())
    }

    /// Adds the run bottom-up, wiring each new link to the previous one.
    ///
    /// Returns the hashes of the lowest and highest new link.
    fn wire_segment(&mut self, sub: &[HeaderRecord]) -> Option<(BlockHash, BlockHash)> {
        let mut lowest = None;
        let mut prev: Option<BlockHash> = None;
        for record in sub.iter().rev() {
            let hash = self.add_header_as_link(record.clone(), false);
            match prev {
                Some(parent) => {
                    if let Some(parent_link) = self.links.get_mut(&parent) {
                        parent_link.next.push(hash);
                    }
                }
                None => lowest = Some(hash),
            }
            if self.preverified_hashes.contains(&hash) {
                self.mark_preverified(hash);
            }
            prev = Some(hash);
        }
        Some((lowest?, prev?))
    }

    /// Attaches a segment whose parent is an existing link.
    fn extend_up(&mut self, sub: &[HeaderRecord]) {
        let Some(lowest) = sub.last() else { return };
        let attach_hash = lowest.header.parent_hash;
        let Some((low, _)) = self.wire_segment(sub) else { return };
        let mut attached_persisted = false;
        if let Some(attachment) = self.links.get_mut(&attach_hash) {
            attachment.next.push(low);
            attached_persisted = attachment.persisted;
        }
        if attached_persisted {
            self.insert_list.push(low);
        }
    }

    /// Attaches a segment that fills the gap below an anchor, replacing it
    /// with a deeper one. Returns whether a new anchor was created.
    fn extend_down(&mut self, sub: &[HeaderRecord], anchor_key: BlockHash, now: Instant) -> bool {
        let Some(old_anchor) = self.remove_anchor(&anchor_key) else { return false };
        let anchor_preverified = old_anchor
            .links
            .iter()
            .any(|hash| self.links.get(hash).is_some_and(|link| link.preverified));
        let Some(lowest) = sub.last() else { return false };
        let new_parent = lowest.header.parent_hash;
        let new_number = lowest.number();
        let slot = self.find_or_create_anchor(new_parent, new_number, old_anchor.peer_id, now);
        let created = matches!(slot, Some((_, true)));
        let Some((low, high)) = self.wire_segment(sub) else { return created };
        if let Some((key, _)) = slot {
            if let Some(anchor) = self.anchors.get_mut(&key) {
                anchor.links.push(low);
            }
        }
        if let Some(top) = self.links.get_mut(&high) {
            top.next.extend(old_anchor.links);
        }
        if anchor_preverified {
            // a preverified dependent proves the freshly attached run
            self.mark_preverified(high);
        }
        created
    }

    /// Attaches a segment bridging an anchor above and a link below.
    fn connect(&mut self, sub: &[HeaderRecord], anchor_key: BlockHash) {
        let Some(lowest) = sub.last() else { return };
        let attach_hash = lowest.header.parent_hash;
        let Some(old_anchor) = self.remove_anchor(&anchor_key) else { return };
        let anchor_preverified = old_anchor
            .links
            .iter()
            .any(|hash| self.links.get(hash).is_some_and(|link| link.preverified));
        let Some((low, high)) = self.wire_segment(sub) else { return };
        let mut attached_persisted = false;
        if let Some(attachment) = self.links.get_mut(&attach_hash) {
            attachment.next.push(low);
            attached_persisted = attachment.persisted;
        }
        if let Some(top) = self.links.get_mut(&high) {
            top.next.extend(old_anchor.links);
        }
        if anchor_preverified {
            self.mark_preverified(high);
        }
        if attached_persisted {
            self.insert_list.push(low);
        }
    }

    /// Registers a segment with no attachment point under a new anchor.
    /// Returns whether an anchor was created.
    fn new_anchor(&mut self, sub: &[HeaderRecord], peer_id: PeerId, now: Instant) -> bool {
        let Some(lowest) = sub.last() else { return false };
        let number = lowest.number();
        let parent_hash = lowest.header.parent_hash;
        if !self.anchors.contains_key(&parent_hash) && number < self.highest_in_db {
            debug!(
                target: "sync::headers",
                height = number,
                highest_in_db = self.highest_in_db,
                "Segment is below stored progress, ignoring"
            );
            return false
        }
        let Some((key, created)) = self.find_or_create_anchor(parent_hash, number, peer_id, now)
        else {
            return false
        };
        let Some((low, _)) = self.wire_segment(sub) else { return created };
        if let Some(anchor) = self.anchors.get_mut(&key) {
            anchor.links.push(low);
        }
        created
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloadConfig;
    use assert_matches::assert_matches;
    use cairn_consensus::test_utils::TestVerifier;
    use cairn_primitives::{
        test_utils::{child_header, header_chain, random_header},
        Header, SealedHeader, U256,
    };

    const PEER: PeerId = PeerId::repeat_byte(0x33);
    const OTHER_PEER: PeerId = PeerId::repeat_byte(0x44);

    fn downloader() -> HeaderDownload<TestVerifier> {
        HeaderDownload::new(&DownloadConfig::default(), TestVerifier::default())
    }

    fn records(headers: &[SealedHeader]) -> Vec<HeaderRecord> {
        headers.iter().cloned().map(HeaderRecord::from_sealed).collect()
    }

    /// Splits and attaches a batch the way a delivery does.
    fn deliver(
        hd: &mut HeaderDownload<TestVerifier>,
        headers: &[SealedHeader],
        peer_id: PeerId,
    ) -> SegmentOutcome {
        let segments = hd.split_into_segments(&records(headers)).unwrap();
        let mut combined = SegmentOutcome::default();
        for segment in segments {
            let outcome = hd.process_segment(&segment, false, peer_id, Instant::now());
            combined.request_more |= outcome.request_more;
            combined.penalties.extend(outcome.penalties);
        }
        combined
    }

    #[test]
    fn split_orders_child_most_first() {
        let hd = downloader();
        let genesis = random_header(0, None);
        let chain = header_chain(&genesis, 4);
        let segments = hd.split_into_segments(&records(&chain)).unwrap();

        assert_eq!(segments.len(), 1);
        let numbers: Vec<_> = segments[0].headers().iter().map(|r| r.number()).collect();
        assert_eq!(numbers, vec![4, 3, 2, 1]);
        assert_eq!(segments[0].span(), Some((1, 4)));
    }

    #[test]
    fn split_detects_duplicates() {
        let hd = downloader();
        let header = random_header(7, None);
        let batch = records(&[header.clone(), header]);
        assert_eq!(hd.split_into_segments(&batch), Err(Penalty::DuplicateHeader));
    }

    #[test]
    fn split_rejects_known_bad_hash() {
        let mut hd = downloader();
        let header = random_header(7, None);
        hd.report_bad_header(header.hash());
        assert_eq!(hd.split_into_segments(&records(&[header])), Err(Penalty::BadBlock));
    }

    #[test]
    fn split_validates_child_height() {
        let hd = downloader();
        let parent = random_header(5, None);
        let child = Header {
            parent_hash: parent.hash(),
            number: 8, // not 6
            difficulty: parent.difficulty,
            ..Default::default()
        };
        let batch = records(&[parent, child.seal_slow()]);
        assert_eq!(hd.split_into_segments(&batch), Err(Penalty::WrongChildBlockHeight));
    }

    #[test]
    fn split_validates_child_difficulty() {
        let hd = downloader();
        let parent = random_header(5, None);
        let mut child = child_header(&parent).unseal();
        child.difficulty = parent.difficulty + U256::from(1);
        let batch = records(&[parent, child.seal_slow()]);
        assert_eq!(hd.split_into_segments(&batch), Err(Penalty::WrongChildDifficulty));
    }

    #[test]
    fn split_separates_fork_branches() {
        let hd = downloader();
        let genesis = random_header(0, None);
        let chain = header_chain(&genesis, 3);
        // sibling of chain[2] on top of chain[1]
        let sibling = child_header(&chain[1]);
        assert_ne!(sibling.hash(), chain[2].hash());

        let batch = records(&[chain[0].clone(), chain[1].clone(), chain[2].clone(), sibling]);
        let segments = hd.split_into_segments(&batch).unwrap();

        // two single-header branch tips and the trunk below the fork
        assert_eq!(segments.len(), 3);
        let mut lens: Vec<_> = segments.iter().map(ChainSegment::len).collect();
        lens.sort_unstable();
        assert_eq!(lens, vec![1, 1, 2]);
    }

    #[test]
    fn response_reassembles_into_one_chain() {
        let mut hd = downloader();
        let genesis = random_header(0, None);
        let chain = header_chain(&genesis, 9);
        hd.seed_persisted_frontier(records(&[genesis]), 0);

        // top arrives first: nothing to attach to, a new anchor is created
        let outcome = deliver(&mut hd, &chain[6..9], PEER);
        assert!(outcome.request_more);
        assert!(outcome.penalties.is_empty());
        assert_eq!(hd.anchor_count(), 1);
        assert_eq!(hd.pending_link_count(), 3);

        // the middle extends the anchor downwards
        let outcome = deliver(&mut hd, &chain[3..6], PEER);
        assert!(outcome.request_more);
        assert_eq!(hd.anchor_count(), 1);
        assert_eq!(hd.pending_link_count(), 6);

        // the bottom connects the anchor to the persisted frontier
        let outcome = deliver(&mut hd, &chain[0..3], PEER);
        assert!(!outcome.request_more);
        assert_eq!(hd.anchor_count(), 0);
        assert_eq!(hd.pending_link_count(), 9);

        // draining persists the whole chain bottom-up
        let mut persisted = Vec::new();
        loop {
            let batch = hd.take_insertable(100);
            if batch.is_empty() {
                break
            }
            for record in batch {
                persisted.push(record.number());
                hd.mark_persisted(record.hash());
            }
        }
        assert_eq!(persisted, (1..=9).collect::<Vec<_>>());
        assert_eq!(hd.progress(), 9);
        assert_eq!(hd.pending_link_count(), 0);
    }

    #[test]
    fn extend_up_schedules_insertion_only_from_persisted_parent() {
        let mut hd = downloader();
        let genesis = random_header(0, None);
        let chain = header_chain(&genesis, 4);
        hd.seed_persisted_frontier(records(&[genesis]), 0);

        deliver(&mut hd, &chain[0..2], PEER);
        assert_eq!(hd.insertable_count(), 1);

        // attaches to the pending tip, nothing new to insert yet
        deliver(&mut hd, &chain[2..4], PEER);
        assert_eq!(hd.insertable_count(), 1);
        assert_eq!(hd.pending_link_count(), 4);
    }

    #[test]
    fn repeated_response_is_inert() {
        let mut hd = downloader();
        let genesis = random_header(0, None);
        let chain = header_chain(&genesis, 3);
        hd.seed_persisted_frontier(records(&[genesis]), 0);

        deliver(&mut hd, &chain, PEER);
        let links = hd.pending_link_count();
        let insertable = hd.insertable_count();

        let outcome = deliver(&mut hd, &chain, OTHER_PEER);
        assert!(outcome.penalties.is_empty());
        assert!(!outcome.request_more);
        assert_eq!(hd.pending_link_count(), links);
        assert_eq!(hd.insertable_count(), insertable);
    }

    #[test]
    fn link_limit_evicts_farthest_from_insertable() {
        let config = DownloadConfig { link_limit: 2, ..Default::default() };
        let mut hd = HeaderDownload::new(&config, TestVerifier::default());
        assert_eq!(hd.link_limit, 2);

        let base = random_header(9, None);
        let chain = header_chain(&base, 3); // heights 10, 11, 12
        deliver(&mut hd, &chain, PEER);

        // the highest link went; the orphaned chain of 10 and 11 stays
        // requestable through its anchor
        assert_eq!(hd.pending_link_count(), 2);
        assert!(hd.links.contains_key(&chain[0].hash()));
        assert!(hd.links.contains_key(&chain[1].hash()));
        assert!(!hd.links.contains_key(&chain[2].hash()));
        assert_eq!(hd.anchor_count(), 1);
        // the evicted link is no longer referenced by its parent
        assert!(hd.links[&chain[1].hash()].next.is_empty());
    }

    #[test]
    fn eviction_of_last_dependent_removes_anchor() {
        let config = DownloadConfig { link_limit: 1, ..Default::default() };
        let mut hd = HeaderDownload::new(&config, TestVerifier::default());
        assert_eq!(hd.link_limit, 1);

        let lower = random_header(10, None);
        deliver(&mut hd, &[lower.clone()], PEER);
        assert_eq!(hd.anchor_count(), 1);

        // an unrelated higher chain evicts the lower one entirely
        let higher = random_header(50, None);
        deliver(&mut hd, &[higher.clone()], OTHER_PEER);
        assert_eq!(hd.pending_link_count(), 1);
        assert!(hd.links.contains_key(&lower.hash()));
        assert!(!hd.links.contains_key(&higher.hash()));
        // the anchor of the evicted chain went with it
        assert_eq!(hd.anchor_count(), 1);
        assert!(hd.anchors.contains_key(&lower.parent_hash));
    }

    #[test]
    fn preverified_mark_walks_down_the_chain() {
        let mut hd = downloader();
        let genesis = random_header(0, None);
        let chain = header_chain(&genesis, 4);
        hd.seed_persisted_frontier(records(&[genesis]), 0);
        hd.set_preverified_hashes([chain[3].hash()].into_iter().collect(), 4);

        deliver(&mut hd, &chain, PEER);

        for header in &chain {
            assert!(hd.links[&header.hash()].preverified, "height {}", header.number);
        }
        // below the preverified height everything is connected, so the
        // whole chain drains
        let drained = hd.take_insertable(100);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].number(), 1);
    }

    #[test]
    fn sibling_of_preverified_child_is_rejected() {
        let mut hd = downloader();
        let genesis = random_header(0, None);
        let chain = header_chain(&genesis, 2);
        hd.seed_persisted_frontier(records(&[genesis]), 0);
        hd.set_preverified_hashes([chain[1].hash()].into_iter().collect(), 2);
        deliver(&mut hd, &chain, PEER);
        assert!(hd.links[&chain[0].hash()].preverified);

        // second child of the preverified chain[0]
        let sibling = child_header(&chain[0]);
        let outcome = deliver(&mut hd, &[sibling.clone()], OTHER_PEER);

        assert_eq!(outcome.penalties.len(), 1);
        assert_eq!(outcome.penalties[0].peer_id, OTHER_PEER);
        assert_eq!(outcome.penalties[0].penalty, Penalty::BadBlock);
        assert!(!hd.links.contains_key(&sibling.hash()));
    }

    #[test]
    fn invalid_seal_rejects_segment_without_mutation() {
        let mut hd = downloader();
        let genesis = random_header(0, None);
        let chain = header_chain(&genesis, 2);
        hd.seed_persisted_frontier(records(&[genesis]), 0);

        hd.verifier.set_fail_seal(true);
        let outcome = deliver(&mut hd, &chain, PEER);

        assert_eq!(outcome.penalties.len(), 1);
        assert_eq!(outcome.penalties[0].penalty, Penalty::InvalidSeal);
        assert_matches!(
            outcome.penalties[0].reason,
            Some(ConsensusError::InvalidSeal { .. })
        );
        assert_eq!(hd.pending_link_count(), 0);
        assert_eq!(hd.anchor_count(), 0);
    }

    #[test]
    fn future_timestamp_is_a_separate_penalty() {
        let mut hd = downloader();
        let header = random_header(5, None);

        hd.verifier.set_future_seal(true);
        let outcome = deliver(&mut hd, &[header], PEER);

        assert_eq!(outcome.penalties.len(), 1);
        assert_eq!(outcome.penalties[0].penalty, Penalty::TooFarFuture);
    }

    #[test]
    fn seal_checks_skipped_below_preverified_floor() {
        let mut hd = downloader();
        let genesis = random_header(0, None);
        let chain = header_chain(&genesis, 2);
        hd.seed_persisted_frontier(records(&[genesis]), 0);
        hd.set_preverified_hashes([chain[1].hash()].into_iter().collect(), 2);

        // seals would fail, but the whole segment sits under the floor
        hd.verifier.set_fail_seal(true);
        let outcome = deliver(&mut hd, &chain, PEER);

        assert!(outcome.penalties.is_empty());
        assert_eq!(hd.pending_link_count(), 2);
    }

    #[test]
    fn attachment_boundary_height_is_checked() {
        let mut hd = downloader();
        let genesis = random_header(0, None);
        hd.seed_persisted_frontier(records(&[genesis.clone()]), 0);

        // claims the persisted frontier as parent but skips heights
        let liar = random_header(5, Some(genesis.hash()));
        let outcome = deliver(&mut hd, &[liar.clone()], PEER);

        assert_eq!(outcome.penalties.len(), 1);
        assert_eq!(outcome.penalties[0].penalty, Penalty::WrongChildBlockHeight);
        assert!(!hd.links.contains_key(&liar.hash()));
    }

    #[test]
    fn anchor_height_mismatch_invalidates_dependents() {
        let mut hd = downloader();
        // the real parent sits at height 5
        let parent = random_header(5, None);
        // a dependent claiming to sit at height 10 above it
        let liar = random_header(10, Some(parent.hash()));
        deliver(&mut hd, &[liar.clone()], PEER);
        assert_eq!(hd.anchor_count(), 1);

        // an honest peer delivers the actual parent
        let outcome = deliver(&mut hd, &[parent], OTHER_PEER);

        // the anchor creator is penalized, not the honest responder
        assert_eq!(outcome.penalties.len(), 1);
        assert_eq!(outcome.penalties[0].peer_id, PEER);
        assert_eq!(outcome.penalties[0].penalty, Penalty::WrongChildBlockHeight);
        assert_eq!(hd.anchor_count(), 0);
        assert!(!hd.links.contains_key(&liar.hash()));
    }

    #[test]
    fn new_block_raises_seen_frontier() {
        let mut hd = downloader();
        let header = random_header(42, None);
        let segment = ChainSegment::new(records(&[header]));
        hd.process_segment(&segment, true, PEER, Instant::now());
        assert_eq!(hd.top_seen_height(), 42);
        assert!(!hd.is_synced());
    }

    #[test]
    fn announced_header_is_rebroadcast_after_validation() {
        let mut hd = downloader();
        let header = random_header(42, None);
        let announce = Announce { hash: header.hash(), number: 42 };
        let (unseen, _) = hd.note_block_hashes(PEER, &[announce]);
        assert_eq!(unseen.len(), 1);

        deliver(&mut hd, &[header], PEER);
        assert_eq!(hd.top_seen_height(), 42);
        assert_eq!(hd.take_announces(), vec![announce]);
        assert!(hd.take_announces().is_empty());
    }

    #[test]
    fn segments_below_stored_progress_are_ignored() {
        let mut hd = downloader();
        let genesis = random_header(0, None);
        hd.seed_persisted_frontier(records(&[genesis]), 100);

        let stale = random_header(40, None);
        let outcome = deliver(&mut hd, &[stale.clone()], PEER);
        assert!(!outcome.request_more);
        assert!(outcome.penalties.is_empty());
        assert!(!hd.links.contains_key(&stale.hash()));
        assert_eq!(hd.anchor_count(), 0);
    }
}
