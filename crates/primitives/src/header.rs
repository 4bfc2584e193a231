use crate::{BlockHash, BlockNumber};
use alloy_primitives::{keccak256, Bytes, B256, U256};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// A block header.
///
/// Carries only the fields the header-synchronization core consumes; the
/// hash of a header is the Keccak-256 digest of its RLP encoding.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    RlpEncodable,
    RlpDecodable,
)]
pub struct Header {
    /// The Keccak-256 hash of the parent block's header.
    pub parent_hash: BlockHash,
    /// The block's height.
    pub number: BlockNumber,
    /// Scalar value corresponding to the difficulty level of this block.
    pub difficulty: U256,
    /// Seconds since the unix epoch at which this block was sealed.
    pub timestamp: u64,
    /// Arbitrary bytes the sealer may attach.
    pub extra_data: Bytes,
    /// Seal nonce.
    pub nonce: u64,
}

impl Header {
    /// Heavy function that will calculate the hash of the fully encoded
    /// header.
    pub fn hash_slow(&self) -> B256 {
        let mut out = Vec::<u8>::new();
        self.encode(&mut out);
        keccak256(&out)
    }

    /// Seal the header with a known hash.
    ///
    /// WARNING: the hash is not verified against the header.
    pub const fn seal(self, hash: B256) -> SealedHeader {
        SealedHeader { header: self, hash }
    }

    /// Calculate the hash and seal the header with it.
    pub fn seal_slow(self) -> SealedHeader {
        let hash = self.hash_slow();
        self.seal(hash)
    }
}

/// A [`Header`] sealed with its Keccak-256 hash.
///
/// The hash is memoized so lookups never re-encode the header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SealedHeader {
    header: Header,
    hash: B256,
}

impl SealedHeader {
    /// Seal a header with a hash computed elsewhere.
    ///
    /// The caller is responsible for the hash matching the header.
    pub const fn new(header: Header, hash: B256) -> Self {
        Self { header, hash }
    }

    /// The memoized header hash.
    pub const fn hash(&self) -> B256 {
        self.hash
    }

    /// The wrapped header.
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Discard the hash and return the header.
    pub fn unseal(self) -> Header {
        self.header
    }
}

impl Default for SealedHeader {
    fn default() -> Self {
        Header::default().seal_slow()
    }
}

impl Deref for SealedHeader {
    type Target = Header;

    fn deref(&self) -> &Self::Target {
        &self.header
    }
}

/// A sealed header together with the raw encoding it arrived with.
///
/// Responses keep the wire bytes next to the parsed form so persistence
/// never has to re-encode a header it already received encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    /// Parsed and sealed header.
    pub header: SealedHeader,
    /// Raw RLP encoding as received.
    pub raw: Bytes,
}

impl HeaderRecord {
    /// Build a record from a sealed header by encoding it.
    pub fn from_sealed(header: SealedHeader) -> Self {
        let mut out = Vec::<u8>::new();
        header.header().encode(&mut out);
        Self { header, raw: out.into() }
    }

    /// Decode a record from raw bytes, sealing the header with the computed
    /// hash.
    pub fn decode_raw(raw: Bytes) -> alloy_rlp::Result<Self> {
        let mut buf = raw.as_ref();
        let header = Header::decode(&mut buf)?;
        Ok(Self { header: header.seal_slow(), raw })
    }

    /// The memoized header hash.
    pub const fn hash(&self) -> B256 {
        self.header.hash()
    }

    /// The header height.
    pub const fn number(&self) -> BlockNumber {
        self.header.header().number
    }
}

impl From<SealedHeader> for HeaderRecord {
    fn from(header: SealedHeader) -> Self {
        Self::from_sealed(header)
    }
}
