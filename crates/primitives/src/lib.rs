//! Commonly used types for the cairn header-synchronization client.
//!
//! This crate carries the header representations shared by every other
//! crate in the workspace: the parsed [`Header`], the hash-memoizing
//! [`SealedHeader`] and the wire-preserving [`HeaderRecord`], together with
//! aliases for hashes, heights and peer identities.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

mod header;
pub use header::{Header, HeaderRecord, SealedHeader};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// A block height.
pub type BlockNumber = u64;

/// Keccak-256 hash of a block header.
pub type BlockHash = alloy_primitives::B256;

/// Devp2p peer identifier, the 64-byte uncompressed public key.
pub type PeerId = alloy_primitives::B512;

pub use alloy_primitives::{self, Bytes, B256, B512, U256};
