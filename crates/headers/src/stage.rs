//! The forward sync driver.
//!
//! [`HeaderStage::execute`] runs one sync pass: it schedules anchor and
//! skeleton requests, sleeps until a delivery wakes it, drains insertable
//! headers into storage and stops once the stored chain has caught up with
//! the seen frontier, the pass is interrupted, or nothing has moved for a
//! while. Network message handlers run concurrently and feed the
//! downloader through its shareable handle.

use crate::{
    client::HeadersClient,
    config::DownloadConfig,
    error::SyncError,
    inserter::HeaderInserter,
    shareable::ShareableHeaderDownload,
};
use cairn_consensus::HeaderVerifier;
use cairn_primitives::{BlockHash, BlockNumber, U256};
use cairn_storage::HeaderStoreMut;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Requests sent per scheduling round, so responses get a chance to be
/// inserted between bursts.
const MAX_REQUESTS_PER_ROUND: usize = 64;

/// Consecutive idle polls after which a pass gives up.
const IDLE_ROUNDS: u32 = 5;

/// What a sync pass accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Stored progress when the pass ended.
    pub progress: BlockNumber,
    /// Height to unwind to, when a reorg crossed the pass start.
    pub unwind_point: Option<BlockNumber>,
    /// Whether the pass was stopped by an interrupt rather than finishing.
    pub interrupted: bool,
}

/// Drives forward header sync against a storage backend and a network
/// client.
pub struct HeaderStage<S, C, V> {
    download: ShareableHeaderDownload<V>,
    client: C,
    store: S,
    insert_batch: usize,
    retry_timeout: Duration,
    pub(crate) poll_interval: Duration,
}

impl<S, C, V> HeaderStage<S, C, V>
where
    S: HeaderStoreMut,
    C: HeadersClient,
    V: HeaderVerifier,
{
    /// Builds the stage and seeds the downloader's persisted frontier from
    /// storage.
    pub fn new(
        download: ShareableHeaderDownload<V>,
        client: C,
        store: S,
        config: &DownloadConfig,
    ) -> Result<Self, SyncError> {
        let progress = store.best_number()?;
        let retain = config.persisted_link_limit();
        let low = progress.saturating_sub(retain.saturating_sub(1) as u64);
        let frontier = store.headers_in_range(low..=progress, retain)?;
        debug!(
            target: "sync::headers",
            progress,
            frontier = frontier.len(),
            "Seeding persisted frontier"
        );
        download.download.write().seed_persisted_frontier(frontier, progress);
        Ok(Self {
            download,
            client,
            store,
            insert_batch: config.insert_batch,
            retry_timeout: config.retry_timeout,
            poll_interval: Duration::from_secs(1),
        })
    }

    /// Runs one sync pass to completion.
    ///
    /// Returns once the stored chain reaches the seen frontier, the pass
    /// is interrupted, or [`IDLE_ROUNDS`] polls go by without progress.
    /// When the pass replaced the canonical head without an unwind, the
    /// canonical marks are rewritten to follow the new head.
    pub async fn execute(&mut self) -> Result<SyncReport, SyncError> {
        let progress = self.store.best_number()?;
        let local_td = match self.store.canonical_hash(progress)? {
            Some(head) => self.store.header_td(&head)?.unwrap_or(U256::ZERO),
            None => U256::ZERO,
        };
        let mut inserter = HeaderInserter::new(local_td, progress);

        self.download.download.write().set_fetching(true);
        let result = self.run_loop(&mut inserter).await;
        self.download.download.write().set_fetching(false);
        let interrupted = result?;

        if inserter.highest() != 0 && inserter.best_header_changed() {
            if inserter.unwind_point().is_none() {
                fix_canonical_marks(&self.store, inserter.highest(), inserter.highest_hash())?;
            }
            self.store.update_best_number(inserter.highest())?;
        }
        Ok(SyncReport {
            progress: self.download.progress(),
            unwind_point: inserter.unwind_point(),
            interrupted,
        })
    }

    /// Returns whether the pass was interrupted.
    async fn run_loop(&mut self, inserter: &mut HeaderInserter) -> Result<bool, SyncError> {
        let mut idle_rounds = 0u32;
        let mut prev_progress = self.download.progress();
        loop {
            self.dispatch_requests();
            self.insert_pass(inserter)?;
            self.broadcast_announces();
            if self.download.is_synced() {
                debug!(
                    target: "sync::headers",
                    progress = self.download.progress(),
                    "Headers synced to the seen frontier"
                );
                return Ok(false)
            }
            tokio::select! {
                _ = self.download.delivery.notified() => {
                    trace!(target: "sync::headers", "Woken by a delivery");
                }
                _ = self.download.interrupt.notified() => {
                    debug!(target: "sync::headers", "Pass interrupted");
                    return Ok(true)
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    let progress = self.download.progress();
                    if progress == prev_progress {
                        idle_rounds += 1;
                        if idle_rounds >= IDLE_ROUNDS {
                            warn!(
                                target: "sync::headers",
                                progress,
                                "Chain is not progressing, stopping the pass"
                            );
                            return Ok(false)
                        }
                    } else {
                        idle_rounds = 0;
                        prev_progress = progress;
                    }
                }
            }
        }
    }

    /// Sends due anchor retries and at most one skeleton probe.
    ///
    /// The downloader lock is taken per step and released before every
    /// client call, so message handlers keep feeding the graph while
    /// requests go out and clients are free to read the shared handle.
    fn dispatch_requests(&self) {
        let mut sent = 0usize;
        while sent < MAX_REQUESTS_PER_ROUND {
            let now = Instant::now();
            let (request, penalties) =
                self.download.download.write().request_more_headers(now);
            for penalty in penalties {
                self.client.penalize(penalty);
            }
            let Some(request) = request else { break };
            if self.client.dispatch_request(&request).is_none() {
                // no peer right now, the anchor stays due for the next round
                break
            }
            self.download.download.write().sent_request(&request, now, self.retry_timeout);
            sent += 1;
        }
        let skeleton = self.download.download.write().request_skeleton();
        if let Some(request) = skeleton {
            if self.client.dispatch_request(&request).is_some() {
                trace!(
                    target: "downloaders::headers",
                    number = request.number,
                    length = request.length,
                    "Skeleton request sent"
                );
            }
        }
    }

    /// Drains insertable headers into storage until none are left.
    fn insert_pass(&self, inserter: &mut HeaderInserter) -> Result<usize, SyncError> {
        let mut total = 0usize;
        loop {
            let batch = self.download.download.write().take_insertable(self.insert_batch);
            if batch.is_empty() {
                return Ok(total)
            }
            for record in batch {
                let hash = record.hash();
                inserter.feed_header(&self.store, &record)?;
                self.download.download.write().mark_persisted(hash);
                total += 1;
            }
        }
    }

    fn broadcast_announces(&self) {
        let announces = self.download.download.write().take_announces();
        for announce in announces {
            self.client.broadcast(announce);
        }
    }
}

/// Rewrites canonical marks downwards from the new head until they agree
/// with the stored chain.
fn fix_canonical_marks<S: HeaderStoreMut>(
    store: &S,
    mut number: BlockNumber,
    mut hash: BlockHash,
) -> Result<(), SyncError> {
    if number == 0 {
        return Ok(())
    }
    while store.canonical_hash(number)? != Some(hash) {
        store.update_canonical_hash(number, hash)?;
        let Some(record) = store.header(&hash)? else {
            return Err(SyncError::MissingHeader { hash, number })
        };
        if number == 0 {
            break
        }
        hash = record.header.parent_hash;
        number -= 1;
    }
    Ok(())
}
