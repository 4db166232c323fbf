//! Block interlink: per-level pointers to earlier superblocks.
//!
//! Entry `i` of a block's interlink references the most recent ancestor
//! whose hash depth is at least `i` levels above the block's own target
//! depth. Consecutive entries often repeat, so the canonical form stores
//! a repeat bitmap plus only the hashes that differ from their left
//! neighbour (the first entry is compared to the previous block hash).

use super::{ensure_remaining, read_hash};
use crate::hash::{merkle_root, Hash};
use crate::{ConsensusError, ConsensusResult};
use bytes::{Buf, BufMut};

/// Longest interlink representable in the canonical encoding.
pub const MAX_INTERLINK_LEN: usize = u8::MAX as usize;

#[derive(Debug, Clone, Default)]
pub struct BlockInterlink {
    hashes: Vec<Hash>,
    repeat_bits: Vec<u8>,
    compressed: Vec<Hash>,
}

impl BlockInterlink {
    /// Build an interlink, compressing against `prev_hash`.
    pub fn new(hashes: Vec<Hash>, prev_hash: &Hash) -> ConsensusResult<Self> {
        if hashes.len() > MAX_INTERLINK_LEN {
            return Err(ConsensusError::InvalidInterlink(format!(
                "{} entries, max {}",
                hashes.len(),
                MAX_INTERLINK_LEN
            )));
        }

        let mut repeat_bits = vec![0u8; hashes.len().div_ceil(8)];
        let mut compressed = Vec::new();
        let mut last = *prev_hash;
        for (i, hash) in hashes.iter().enumerate() {
            if *hash == last {
                repeat_bits[i / 8] |= 0x80 >> (i % 8);
            } else {
                compressed.push(*hash);
                last = *hash;
            }
        }

        Ok(Self {
            hashes,
            repeat_bits,
            compressed,
        })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn hashes(&self) -> &[Hash] {
        &self.hashes
    }

    pub fn get(&self, index: usize) -> Option<&Hash> {
        self.hashes.get(index)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Position-independent membership test.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.hashes.contains(hash)
    }

    /// Commitment stored in the header.
    pub fn hash(&self, genesis_hash: &Hash) -> Hash {
        let mut leaves: Vec<&[u8]> = Vec::with_capacity(2 + self.compressed.len());
        leaves.push(&self.repeat_bits);
        leaves.push(genesis_hash.as_bytes());
        leaves.extend(self.compressed.iter().map(|h| h.as_bytes().as_slice()));
        merkle_root(&leaves)
    }

    pub fn serialized_size(&self) -> usize {
        1 + self.repeat_bits.len() + self.compressed.len() * 32
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.hashes.len() as u8);
        buf.put_slice(&self.repeat_bits);
        for hash in &self.compressed {
            buf.put_slice(hash.as_bytes());
        }
    }

    /// Decode, expanding repeats against `prev_hash`.
    pub fn decode<B: Buf>(buf: &mut B, prev_hash: &Hash) -> ConsensusResult<Self> {
        ensure_remaining(buf, 1, "interlink length")?;
        let count = buf.get_u8() as usize;
        let bits_len = count.div_ceil(8);
        ensure_remaining(buf, bits_len, "interlink repeat bits")?;
        let mut repeat_bits = vec![0u8; bits_len];
        buf.copy_to_slice(&mut repeat_bits);

        let mut hashes = Vec::with_capacity(count);
        let mut compressed = Vec::new();
        let mut current = *prev_hash;
        for i in 0..count {
            let repeated = repeat_bits[i / 8] & (0x80 >> (i % 8)) != 0;
            if !repeated {
                current = read_hash(buf)?;
                compressed.push(current);
            }
            hashes.push(current);
        }

        Ok(Self {
            hashes,
            repeat_bits,
            compressed,
        })
    }
}

impl PartialEq for BlockInterlink {
    fn eq(&self, other: &Self) -> bool {
        self.hashes == other.hashes
    }
}

impl Eq for BlockInterlink {}
