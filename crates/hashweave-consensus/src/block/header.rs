//! Block header.

use super::{ensure_remaining, read_hash};
use crate::hash::Hash;
use crate::target::compact_to_target;
use crate::ConsensusResult;
use bytes::{Buf, BufMut};
use num_bigint::BigUint;

/// Current header version.
pub const BLOCK_VERSION: u16 = 1;

/// Fixed-size block header. Its digest is both the block identity and the
/// proof-of-work hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u16,
    pub prev_hash: Hash,
    pub interlink_hash: Hash,
    pub body_hash: Hash,
    pub accounts_hash: Hash,
    /// Compact target.
    pub n_bits: u32,
    pub height: u32,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SERIALIZED_SIZE: usize = 2 + 4 * 32 + 4 + 4 + 8 + 4;

    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(Self::SERIALIZED_SIZE);
        self.encode(&mut buf);
        Hash::digest(&buf)
    }

    /// Full target expanded from `n_bits`.
    pub fn target(&self) -> BigUint {
        compact_to_target(self.n_bits)
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.version);
        buf.put_slice(self.prev_hash.as_bytes());
        buf.put_slice(self.interlink_hash.as_bytes());
        buf.put_slice(self.body_hash.as_bytes());
        buf.put_slice(self.accounts_hash.as_bytes());
        buf.put_u32(self.n_bits);
        buf.put_u32(self.height);
        buf.put_u64(self.timestamp);
        buf.put_u32(self.nonce);
    }

    pub fn decode<B: Buf>(buf: &mut B) -> ConsensusResult<Self> {
        ensure_remaining(buf, Self::SERIALIZED_SIZE, "header")?;
        Ok(Self {
            version: buf.get_u16(),
            prev_hash: read_hash(buf)?,
            interlink_hash: read_hash(buf)?,
            body_hash: read_hash(buf)?,
            accounts_hash: read_hash(buf)?,
            n_bits: buf.get_u32(),
            height: buf.get_u32(),
            timestamp: buf.get_u64(),
            nonce: buf.get_u32(),
        })
    }
}
