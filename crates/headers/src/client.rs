//! Interface between the downloader and the networking layer.

use crate::{announces::Announce, penalty::PeerPenalty};
use cairn_primitives::{BlockHash, BlockNumber, PeerId};

/// A request for a run of headers.
///
/// Anchor requests walk downwards from the hash of a missing header;
/// skeleton requests walk upwards from a height with a gap between the
/// returned headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderRequest {
    /// Hash of the first requested header when the request services an
    /// anchor; `None` for height-origin requests.
    pub hash: Option<BlockHash>,
    /// Height of the first requested header.
    pub number: BlockNumber,
    /// Maximum number of headers to return.
    pub length: u64,
    /// Heights skipped between consecutive returned headers; `0` asks for
    /// a contiguous run.
    pub skip: u64,
    /// Whether the run walks towards lower heights.
    pub reverse: bool,
}

/// Outbound side of the header downloader.
///
/// Implementations pick a peer, encode and send. Responses come back
/// asynchronously through the coordinator's delivery entry points, so all
/// methods here are fire-and-forget.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait HeadersClient: Send + Sync {
    /// Sends the request to a suitable peer and returns which one was
    /// chosen, or `None` if no peer is currently available.
    fn dispatch_request(&self, request: &HeaderRequest) -> Option<PeerId>;

    /// Applies a penalty verdict to the peer's reputation.
    fn penalize(&self, penalty: PeerPenalty);

    /// Re-broadcasts a verified block announcement.
    fn broadcast(&self, announce: Announce);
}

#[cfg(any(test, feature = "test-utils"))]
pub use test_client::TestHeadersClient;

#[cfg(any(test, feature = "test-utils"))]
mod test_client {
    use super::{Announce, HeaderRequest, HeadersClient, PeerId, PeerPenalty};
    use parking_lot::Mutex;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    /// A headers client that records everything it is asked to send.
    #[derive(Debug, Clone, Default)]
    pub struct TestHeadersClient {
        requests: Arc<Mutex<Vec<HeaderRequest>>>,
        penalties: Arc<Mutex<Vec<PeerPenalty>>>,
        announces: Arc<Mutex<Vec<Announce>>>,
        no_peers: Arc<AtomicBool>,
    }

    impl TestHeadersClient {
        /// The peer id every dispatched request is attributed to.
        pub const PEER: PeerId = PeerId::repeat_byte(0x11);

        /// Makes [`HeadersClient::dispatch_request`] report no available
        /// peers.
        pub fn set_no_peers(&self, val: bool) {
            self.no_peers.store(val, Ordering::SeqCst);
        }

        /// Requests dispatched so far.
        pub fn requests(&self) -> Vec<HeaderRequest> {
            self.requests.lock().clone()
        }

        /// Penalties applied so far.
        pub fn penalties(&self) -> Vec<PeerPenalty> {
            self.penalties.lock().clone()
        }

        /// Announcements broadcast so far.
        pub fn announces(&self) -> Vec<Announce> {
            self.announces.lock().clone()
        }
    }

    impl HeadersClient for TestHeadersClient {
        fn dispatch_request(&self, request: &HeaderRequest) -> Option<PeerId> {
            if self.no_peers.load(Ordering::SeqCst) {
                return None
            }
            self.requests.lock().push(*request);
            Some(Self::PEER)
        }

        fn penalize(&self, penalty: PeerPenalty) {
            self.penalties.lock().push(penalty);
        }

        fn broadcast(&self, announce: Announce) {
            self.announces.lock().push(announce);
        }
    }
}
