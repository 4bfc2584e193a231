//! Header verification interface used by the sync pipeline.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(no_crate_inject, attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))))]

use cairn_primitives::{Header, SealedHeader, B256, U256};
use thiserror::Error;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Stateless verification of individual headers.
///
/// Implementations carry the chain rules (proof of work, fork schedule)
/// needed to check a header without access to state.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait HeaderVerifier: Send + Sync {
    /// Validates the seal of the header against chain rules.
    ///
    /// `now` is the wall clock in seconds, used to reject headers with a
    /// timestamp too far ahead of it.
    fn verify_seal(&self, header: &SealedHeader, now: u64) -> Result<(), ConsensusError>;

    /// The difficulty a child of `parent` must carry at `timestamp`.
    fn expected_difficulty(&self, parent: &Header, timestamp: u64) -> U256;
}

/// Consensus error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    /// The header seal does not satisfy chain rules.
    #[error("invalid seal for header {hash}")]
    InvalidSeal {
        /// Hash of the offending header.
        hash: B256,
    },
    /// The header timestamp lies too far in the future.
    #[error("header {hash} timestamp {timestamp} is ahead of now {now}")]
    TimestampInFuture {
        /// Hash of the offending header.
        hash: B256,
        /// Timestamp carried by the header.
        timestamp: u64,
        /// Wall clock at the time of verification.
        now: u64,
    },
}
