//! Downloader configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs of the header downloader.
///
/// The defaults are production values; tests shrink the limits to make
/// eviction observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Maximum number of live anchors.
    pub anchor_limit: usize,
    /// Total number of links kept in memory. A sixteenth of this budget is
    /// reserved for persisted links, the rest holds pending ones.
    pub link_limit: usize,
    /// Number of headers asked for in one request.
    pub request_length: u64,
    /// Height distance between headers of a skeleton request.
    pub skeleton_stride: u64,
    /// How many times an anchor is requested before it is abandoned and
    /// its subtree dropped.
    pub request_retries: u32,
    /// How long to wait for a response before an anchor request may be
    /// retried.
    #[serde(with = "humantime_serde")]
    pub retry_timeout: Duration,
    /// Maximum number of headers drained towards storage in one batch.
    pub insert_batch: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            anchor_limit: 512,
            link_limit: 16384,
            request_length: 192,
            skeleton_stride: 8 * 192,
            request_retries: 10,
            retry_timeout: Duration::from_secs(5),
            insert_batch: 32768,
        }
    }
}

impl DownloadConfig {
    /// Portion of the link budget reserved for persisted links.
    pub const fn persisted_link_limit(&self) -> usize {
        self.link_limit / 16
    }

    /// Portion of the link budget left for pending links.
    pub const fn pending_link_limit(&self) -> usize {
        self.link_limit - self.persisted_link_limit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_splits_link_budget() {
        let config = DownloadConfig::default();
        assert_eq!(config.persisted_link_limit(), 1024);
        assert_eq!(config.pending_link_limit(), 15360);
        assert_eq!(config.skeleton_stride, 1536);
    }

    #[test]
    fn toml_roundtrip_with_durations() {
        let config = DownloadConfig {
            retry_timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let encoded = toml::to_string(&config).unwrap();
        assert!(encoded.contains("retry_timeout = \"30s\""));
        let decoded: DownloadConfig = toml::from_str(&encoded).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let decoded: DownloadConfig = toml::from_str("anchor_limit = 64\n").unwrap();
        assert_eq!(decoded.anchor_limit, 64);
        assert_eq!(decoded.link_limit, 16384);
        assert_eq!(decoded.retry_timeout, Duration::from_secs(5));
    }
}
