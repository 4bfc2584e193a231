//! A verifier with switchable failure points for tests.

use crate::{ConsensusError, HeaderVerifier};
use cairn_primitives::{Header, SealedHeader, U256};
use std::sync::atomic::{AtomicBool, Ordering};

/// Verifier that accepts everything unless told otherwise.
///
/// Expected difficulty is the parent's difficulty, so constant-difficulty
/// chains from the generators validate cleanly.
#[derive(Debug, Default)]
pub struct TestVerifier {
    /// Flag whether the seal check should fail.
    fail_seal: AtomicBool,
    /// Flag whether every header should be treated as too far in the future.
    future_seal: AtomicBool,
}

impl TestVerifier {
    /// Update the seal failure flag.
    pub fn set_fail_seal(&self, val: bool) {
        self.fail_seal.store(val, Ordering::SeqCst)
    }

    /// Update the future timestamp flag.
    pub fn set_future_seal(&self, val: bool) {
        self.future_seal.store(val, Ordering::SeqCst)
    }
}

impl HeaderVerifier for TestVerifier {
    fn verify_seal(&self, header: &SealedHeader, now: u64) -> Result<(), ConsensusError> {
        if self.future_seal.load(Ordering::SeqCst) {
            return Err(ConsensusError::TimestampInFuture {
                hash: header.hash(),
                timestamp: header.timestamp,
                now,
            })
        }
        if self.fail_seal.load(Ordering::SeqCst) {
            return Err(ConsensusError::InvalidSeal { hash: header.hash() })
        }
        Ok(())
    }

    fn expected_difficulty(&self, parent: &Header, _timestamp: u64) -> U256 {
        parent.difficulty
    }
}
