//! Block data model and canonical encoding.
//!
//! A block is a header, an interlink and an optional body. Blocks without
//! a body ("light" blocks) are what chain proofs carry. The canonical
//! big-endian encoding is used for hashing, size limits and storage.

mod body;
mod header;
mod interlink;

pub use body::{Address, BlockBody, Transaction, ADDRESS_SIZE, MAX_EXTRA_DATA};
pub use header::{BlockHeader, BLOCK_VERSION};
pub use interlink::{BlockInterlink, MAX_INTERLINK_LEN};

use crate::hash::{Hash, HASH_SIZE};
use crate::params::ChainParams;
use crate::{ConsensusError, ConsensusResult};
use bytes::{Buf, BufMut};
use num_bigint::BigUint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub interlink: BlockInterlink,
    pub body: Option<BlockBody>,
}

impl Block {
    pub fn new(header: BlockHeader, interlink: BlockInterlink, body: Option<BlockBody>) -> Self {
        Self {
            header,
            interlink,
            body,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u32 {
        self.header.height
    }

    pub fn prev_hash(&self) -> &Hash {
        &self.header.prev_hash
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    pub fn n_bits(&self) -> u32 {
        self.header.n_bits
    }

    pub fn target(&self) -> BigUint {
        self.header.target()
    }

    pub fn is_full(&self) -> bool {
        self.body.is_some()
    }

    /// Copy without the body.
    pub fn to_light(&self) -> Block {
        Block {
            header: self.header.clone(),
            interlink: self.interlink.clone(),
            body: None,
        }
    }

    pub fn serialized_size(&self) -> usize {
        BlockHeader::SERIALIZED_SIZE
            + self.interlink.serialized_size()
            + 1
            + self.body.as_ref().map_or(0, |b| b.serialized_size())
    }

    pub fn encode(&self) -> ConsensusResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.serialized_size());
        self.header.encode(&mut buf);
        self.interlink.encode(&mut buf);
        match &self.body {
            Some(body) => {
                buf.put_u8(1);
                body.encode(&mut buf)?;
            }
            None => buf.put_u8(0),
        }
        Ok(buf)
    }

    pub fn decode(mut bytes: &[u8]) -> ConsensusResult<Self> {
        let buf = &mut bytes;
        let header = BlockHeader::decode(buf)?;
        let interlink = BlockInterlink::decode(buf, &header.prev_hash)?;
        ensure_remaining(buf, 1, "body flag")?;
        let body = match buf.get_u8() {
            0 => None,
            1 => Some(BlockBody::decode(buf)?),
            flag => {
                return Err(ConsensusError::Decode(format!("invalid body flag {}", flag)));
            }
        };
        if buf.has_remaining() {
            return Err(ConsensusError::Decode(format!(
                "{} trailing bytes after block",
                buf.remaining()
            )));
        }
        Ok(Self::new(header, interlink, body))
    }

    /// Interlink the successor of this block must carry when mined under
    /// `next_target`.
    pub fn next_interlink(
        &self,
        next_target: &BigUint,
        params: &ChainParams,
    ) -> ConsensusResult<BlockInterlink> {
        let hash = self.hash();
        let this_pow_depth = params.hash_depth(&hash);
        let next_target_depth = params.target_depth(next_target);
        let occurrences = (this_pow_depth - next_target_depth + 1).max(0) as usize;

        let mut hashes = vec![hash; occurrences];

        let this_target_depth = params.target_depth(&self.target());
        let offset = occurrences as i64 + next_target_depth as i64 - this_target_depth as i64;
        let offset = offset.max(0) as usize;
        hashes.extend(self.interlink.hashes().iter().skip(offset).copied());

        BlockInterlink::new(hashes, &hash)
    }
}

pub(crate) fn ensure_remaining<B: Buf>(buf: &B, needed: usize, what: &str) -> ConsensusResult<()> {
    if buf.remaining() < needed {
        return Err(ConsensusError::Decode(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

pub(crate) fn read_array<const N: usize, B: Buf>(buf: &mut B) -> ConsensusResult<[u8; N]> {
    ensure_remaining(buf, N, "fixed-size field")?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

pub(crate) fn read_hash<B: Buf>(buf: &mut B) -> ConsensusResult<Hash> {
    Ok(Hash::new(read_array::<HASH_SIZE, _>(buf)?))
}
