//! Header sync metrics.

use metrics::{Counter, Gauge};
use metrics_derive::Metrics;

/// Gauges and counters over the reconstruction graph.
#[derive(Metrics)]
#[metrics(scope = "headers")]
pub(crate) struct HeaderGraphMetrics {
    /// Number of live anchors.
    pub(crate) active_anchors: Gauge,
    /// Number of pending links.
    pub(crate) active_links: Gauge,
    /// Number of persisted links retained for reorg tolerance.
    pub(crate) persisted_links: Gauge,
    /// Total links dropped by the memory bound.
    pub(crate) evicted_links: Counter,
    /// Total anchors abandoned after exhausting retries or losing an
    /// eviction contest.
    pub(crate) invalidated_anchors: Counter,
}

/// Counters over the insertion path.
#[derive(Metrics)]
#[metrics(scope = "headers")]
pub(crate) struct HeaderInserterMetrics {
    /// Total headers written to storage.
    pub(crate) inserted_headers: Counter,
    /// Total canonical-chain switches observed while inserting.
    pub(crate) reorgs_detected: Counter,
}
