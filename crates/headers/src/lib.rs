//! Header download and chain reconstruction engine.
//!
//! Peer responses arrive as loose batches of headers in any order and from
//! any chain. [`HeaderDownload`] reassembles them into chains attached to
//! locally stored headers: contiguous pieces of a response become
//! [`ChainSegment`]s, segments attach to the graph of downloaded links and
//! missing-parent anchors, and headers whose full ancestry is known drain
//! out in ascending height order. [`HeaderInserter`] writes that drain to
//! storage, scores chains by total difficulty and reports the forking
//! point when a heavier side chain takes over the canonical head.
//!
//! [`HeaderStage`] drives one sync pass over the downloader: it schedules
//! anchor retries and skeleton probes through a [`HeadersClient`] and
//! sleeps until network handlers feed responses in through the
//! [`ShareableHeaderDownload`] handle.
//!
//! [`HeadersClient`]: client::HeadersClient
//! [`ChainSegment`]: segment::ChainSegment

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![doc(test(no_crate_inject, attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))))]

pub mod announces;
pub mod client;
pub mod config;
pub mod error;
pub mod penalty;
pub mod segment;

mod anchor;
mod download;
mod inserter;
mod link;
mod metrics;
mod process;
mod queue;
mod shareable;
mod stage;

pub use download::HeaderDownload;
pub use inserter::HeaderInserter;
pub use process::SegmentOutcome;
pub use shareable::ShareableHeaderDownload;
pub use stage::{HeaderStage, SyncReport};
