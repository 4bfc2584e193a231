//! Chain segments cut out of peer responses.

use cairn_primitives::{BlockNumber, HeaderRecord};

/// A parent-linked run of headers from a single peer response.
///
/// Headers are ordered child-most first: position `0` carries the highest
/// height and every following header is the parent of the one before it.
/// Segments are produced by splitting a response batch along its fork
/// points, so a segment never branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSegment {
    headers: Vec<HeaderRecord>,
}

impl ChainSegment {
    pub(crate) const fn new(headers: Vec<HeaderRecord>) -> Self {
        Self { headers }
    }

    /// The headers of the segment, child-most first.
    pub fn headers(&self) -> &[HeaderRecord] {
        &self.headers
    }

    /// Number of headers in the segment.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Whether the segment carries no headers.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// The child-most (highest) header.
    pub fn highest(&self) -> Option<&HeaderRecord> {
        self.headers.first()
    }

    /// The parent-most (lowest) header.
    pub fn lowest(&self) -> Option<&HeaderRecord> {
        self.headers.last()
    }

    /// Height span as `(lowest, highest)`, if the segment is not empty.
    pub fn span(&self) -> Option<(BlockNumber, BlockNumber)> {
        match (self.lowest(), self.highest()) {
            (Some(low), Some(high)) => Some((low.number(), high.number())),
            _ => None,
        }
    }
}

impl From<Vec<HeaderRecord>> for ChainSegment {
    fn from(headers: Vec<HeaderRecord>) -> Self {
        Self::new(headers)
    }
}
