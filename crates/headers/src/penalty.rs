//! Verdicts the downloader issues against misbehaving peers.
//!
//! The graph never talks to the network itself; every rejection is turned
//! into a [`PeerPenalty`] and handed back to the caller, which applies it
//! to the peer's reputation through its networking layer.

use cairn_consensus::ConsensusError;
use cairn_primitives::PeerId;
use std::fmt;

/// Reason a peer response was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    /// The response referenced a header known to be bad.
    BadBlock,
    /// The response carried the same header more than once.
    DuplicateHeader,
    /// A child header does not sit exactly one height above its parent.
    WrongChildBlockHeight,
    /// A child header does not carry the difficulty the consensus rules
    /// require for its parent and timestamp.
    WrongChildDifficulty,
    /// A header seal failed verification.
    InvalidSeal,
    /// A header or announcement lies too far ahead of the known frontier.
    TooFarFuture,
    /// An announcement refers to a height below the persisted retention
    /// floor.
    TooFarPast,
    /// An anchor exhausted its retry budget, so the peer that created it is
    /// held responsible for the unavailable ancestry.
    AbandonedAnchor,
}

impl fmt::Display for Penalty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadBlock => "BadBlock",
            Self::DuplicateHeader => "DuplicateHeader",
            Self::WrongChildBlockHeight => "WrongChildBlockHeight",
            Self::WrongChildDifficulty => "WrongChildDifficulty",
            Self::InvalidSeal => "InvalidSeal",
            Self::TooFarFuture => "TooFarFuture",
            Self::TooFarPast => "TooFarPast",
            Self::AbandonedAnchor => "AbandonedAnchor",
        };
        f.write_str(s)
    }
}

/// A [`Penalty`] attached to the peer that earned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPenalty {
    /// Peer the verdict applies to.
    pub peer_id: PeerId,
    /// What the peer did.
    pub penalty: Penalty,
    /// Underlying verification error, when one exists.
    pub reason: Option<ConsensusError>,
}

impl PeerPenalty {
    /// Penalty without an underlying error.
    pub const fn new(peer_id: PeerId, penalty: Penalty) -> Self {
        Self { peer_id, penalty, reason: None }
    }

    /// Penalty caused by a consensus failure.
    pub const fn with_reason(peer_id: PeerId, penalty: Penalty, reason: ConsensusError) -> Self {
        Self { peer_id, penalty, reason: Some(reason) }
    }
}

impl fmt::Display for PeerPenalty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for peer {}", self.penalty, self.peer_id)?;
        if let Some(reason) = &self.reason {
            write!(f, ": {reason}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_primitives::B256;

    #[test]
    fn display_includes_reason() {
        let peer = PeerId::repeat_byte(0x11);
        let plain = PeerPenalty::new(peer, Penalty::BadBlock);
        assert!(plain.to_string().starts_with("BadBlock for peer"));

        let sealed = PeerPenalty::with_reason(
            peer,
            Penalty::InvalidSeal,
            ConsensusError::InvalidSeal { hash: B256::with_last_byte(1) },
        );
        assert!(sealed.to_string().contains("invalid seal"));
    }
}
