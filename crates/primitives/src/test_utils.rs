//! Generators for random headers and header chains.

use crate::{BlockHash, BlockNumber, Header, SealedHeader, U256};
use rand::Rng;

/// Generates a random [`SealedHeader`].
///
/// The header is not expected to pass consensus validation.
pub fn random_header(number: BlockNumber, parent: Option<BlockHash>) -> SealedHeader {
    let header = Header {
        number,
        nonce: rand::random(),
        difficulty: U256::from(rand::thread_rng().gen_range(1u64..100_000)),
        parent_hash: parent.unwrap_or_default(),
        ..Default::default()
    };
    header.seal_slow()
}

/// Generates a range of random [`SealedHeader`]s linked by parent hash.
///
/// The parent hash of the first header in the result equals `head`.
pub fn random_header_range(
    range: std::ops::Range<u64>,
    head: BlockHash,
) -> Vec<SealedHeader> {
    let mut headers = Vec::with_capacity(range.end.saturating_sub(range.start) as usize);
    for number in range {
        headers.push(random_header(
            number,
            Some(headers.last().map(|h: &SealedHeader| h.hash()).unwrap_or(head)),
        ));
    }
    headers
}

/// Child of `parent` carrying the same difficulty.
///
/// Constant difficulty keeps generated chains valid under the test
/// verifier's difficulty rule.
pub fn child_header(parent: &SealedHeader) -> SealedHeader {
    let mut child = parent.header().clone();
    child.number += 1;
    child.parent_hash = parent.hash();
    child.nonce = rand::random();
    child.seal_slow()
}

/// A parent-linked, constant-difficulty chain of `len` headers on top of
/// `parent`.
pub fn header_chain(parent: &SealedHeader, len: usize) -> Vec<SealedHeader> {
    let mut headers = Vec::with_capacity(len);
    let mut parent = parent.clone();
    for _ in 0..len {
        let child = child_header(&parent);
        parent = child.clone();
        headers.push(child);
    }
    headers
}
