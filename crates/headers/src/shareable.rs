//! Shareable handle over the downloader.

use crate::{announces::Announce, download::HeaderDownload, penalty::PeerPenalty};
use cairn_consensus::HeaderVerifier;
use cairn_primitives::{BlockHash, BlockNumber, HeaderRecord, PeerId};
use cairn_storage::{HeaderStore, StorageError};
use parking_lot::RwLock;
use std::{sync::Arc, time::Instant};
use tokio::sync::Notify;
use tracing::trace;

/// Thread-safe, cloneable handle over a [`HeaderDownload`].
///
/// Message handlers deliver responses and announcements through this
/// handle from any task; the sync driver waits on the delivery notifier
/// instead of polling the graph.
pub struct ShareableHeaderDownload<V> {
    /// The downloader behind its lock.
    pub download: Arc<RwLock<HeaderDownload<V>>>,
    /// Signalled when a delivery changed what the sync driver should do
    /// next.
    pub delivery: Arc<Notify>,
    /// Signalled to stop a running sync pass after its current round.
    pub interrupt: Arc<Notify>,
}

impl<V> Clone for ShareableHeaderDownload<V> {
    fn clone(&self) -> Self {
        Self {
            download: Arc::clone(&self.download),
            delivery: Arc::clone(&self.delivery),
            interrupt: Arc::clone(&self.interrupt),
        }
    }
}

impl<V> ShareableHeaderDownload<V> {
    /// Wraps a downloader for shared use.
    pub fn new(download: HeaderDownload<V>) -> Self {
        Self {
            download: Arc::new(RwLock::new(download)),
            delivery: Arc::new(Notify::new()),
            interrupt: Arc::new(Notify::new()),
        }
    }

    /// Asks a running sync pass to stop after its current round.
    ///
    /// The signal is buffered, so interrupting before a pass starts stops
    /// it at its first round.
    pub fn request_interrupt(&self) {
        trace!(target: "sync::headers", "Interrupt requested");
        self.interrupt.notify_one();
    }

    /// Highest height known to be written to storage.
    pub fn progress(&self) -> BlockNumber {
        self.download.read().progress()
    }

    /// Whether the sync has caught up with everything it knows about.
    pub fn is_synced(&self) -> bool {
        self.download.read().is_synced()
    }

    /// Switches the downloader to a backward walk from a trusted tip.
    pub fn start_backward_sync(&self, tip_hash: BlockHash, tip_number: BlockNumber) {
        trace!(target: "sync::headers", %tip_hash, tip_number, "Starting backward sync");
        self.download.write().start_backward_sync(tip_hash, tip_number);
        self.delivery.notify_one();
    }

    /// Returns the downloader to forward mode.
    pub fn finish_backward_sync(&self) {
        self.download.write().finish_backward_sync();
        self.delivery.notify_one();
    }

    /// Filters announced block hashes down to the ones worth fetching.
    pub fn note_block_hashes(
        &self,
        peer_id: PeerId,
        announces: &[Announce],
    ) -> (Vec<Announce>, Vec<PeerPenalty>) {
        trace!(
            target: "sync::headers",
            count = announces.len(),
            %peer_id,
            "Noting block hash announcements"
        );
        self.download.write().note_block_hashes(peer_id, announces)
    }
}

impl<V: HeaderVerifier> ShareableHeaderDownload<V> {
    /// Splits a response batch and attaches every segment to the graph.
    ///
    /// Returns whether the attachment opened a gap worth requesting right
    /// away, together with the penalties earned by peers. The delivery
    /// notifier fires when the batch made new headers insertable or opened
    /// such a gap.
    pub fn deliver(
        &self,
        headers: &[HeaderRecord],
        new_block: bool,
        peer_id: PeerId,
        now: Instant,
    ) -> (bool, Vec<PeerPenalty>) {
        trace!(
            target: "sync::headers",
            count = headers.len(),
            %peer_id,
            new_block,
            "Delivering headers"
        );
        let segments = {
            let download = self.download.read();
            match download.split_into_segments(headers) {
                Ok(segments) => segments,
                Err(penalty) => return (false, vec![PeerPenalty::new(peer_id, penalty)]),
            }
        };
        let (request_more, penalties, wake) = {
            let mut download = self.download.write();
            let before = download.insertable_count();
            let mut request_more = false;
            let mut penalties = Vec::new();
            for segment in &segments {
                let outcome = download.process_segment(segment, new_block, peer_id, now);
                request_more |= outcome.request_more;
                penalties.extend(outcome.penalties);
            }
            (request_more, penalties, download.insertable_count() > before)
        };
        if wake || request_more {
            self.delivery.notify_one();
        }
        (request_more, penalties)
    }

    /// Verifies a newest-first run of headers against the backward walk.
    ///
    /// Accepted records are returned for the caller to persist. The
    /// delivery notifier fires when the walk advanced or finished.
    pub fn deliver_backward<S: HeaderStore>(
        &self,
        headers: &[HeaderRecord],
        peer_id: PeerId,
        store: &S,
    ) -> Result<(Vec<HeaderRecord>, Option<PeerPenalty>), StorageError> {
        trace!(
            target: "sync::headers",
            count = headers.len(),
            %peer_id,
            "Delivering backward headers"
        );
        let (accepted, penalty) = {
            let mut download = self.download.write();
            download.process_backward_segment(headers, peer_id, store)?
        };
        if !accepted.is_empty() || self.download.read().is_synced() {
            self.delivery.notify_one();
        }
        Ok((accepted, penalty))
    }

    /// Blacklists a header and penalizes the peers of every response that
    /// carried it from now on.
    pub fn report_bad_header(&self, hash: BlockHash) {
        trace!(target: "sync::headers", %hash, "Reporting bad header");
        self.download.write().report_bad_header(hash);
    }
}
