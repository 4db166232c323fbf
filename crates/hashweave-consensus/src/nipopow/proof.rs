//! Chain proof structures.
//!
//! A [`ChainProof`] is a prefix of light blocks sampled from the superchains
//! of the main chain, anchored at genesis, followed by a dense suffix of the
//! most recent headers.

use crate::block::{Block, BlockHeader};
use crate::params::ChainParams;
use crate::validation::BlockValidator;
use crate::{ConsensusError, ConsensusResult};
use bytes::{Buf, BufMut};
use num_bigint::BigUint;
use num_traits::Zero;
use std::fmt;

/// Maximum number of entries in a proof chain.
pub const MAX_CHAIN_LEN: usize = u16::MAX as usize;

/// Ordered (by height) sequence of light blocks, not necessarily dense.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockChain {
    blocks: Vec<Block>,
}

impl BlockChain {
    pub fn new(blocks: Vec<Block>) -> ConsensusResult<Self> {
        if blocks.len() > MAX_CHAIN_LEN {
            return Err(ConsensusError::InvalidProof(format!(
                "block chain of {} blocks",
                blocks.len()
            )));
        }
        if blocks.iter().any(Block::is_full) {
            return Err(ConsensusError::InvalidProof(
                "block chain must contain light blocks only".to_string(),
            ));
        }
        Ok(Self { blocks })
    }

    /// Union of two height-sorted chains. Two different blocks at the same
    /// height cannot be merged.
    pub fn merge(a: &BlockChain, b: &BlockChain) -> ConsensusResult<BlockChain> {
        let mut merged = Vec::with_capacity(a.len() + b.len());
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            let (x, y) = (&a.blocks[i], &b.blocks[j]);
            if x.height() == y.height() {
                if x != y {
                    return Err(ConsensusError::InvalidProof(format!(
                        "different blocks at height {} during merge",
                        x.height()
                    )));
                }
                merged.push(x.clone());
                i += 1;
                j += 1;
            } else if x.height() < y.height() {
                merged.push(x.clone());
                i += 1;
            } else {
                merged.push(y.clone());
                j += 1;
            }
        }
        merged.extend_from_slice(&a.blocks[i..]);
        merged.extend_from_slice(&b.blocks[j..]);
        BlockChain::new(merged)
    }

    /// Highest block present in both chains.
    pub fn lowest_common_ancestor<'a>(a: &'a BlockChain, b: &BlockChain) -> Option<&'a Block> {
        let (mut i, mut j) = (a.len(), b.len());
        while i > 0 && j > 0 {
            let (x, y) = (&a.blocks[i - 1], &b.blocks[j - 1]);
            if x == y {
                return Some(x);
            }
            if x.height() > y.height() {
                i -= 1;
            } else {
                j -= 1;
            }
        }
        None
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn head(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn tail(&self) -> Option<&Block> {
        self.blocks.first()
    }

    /// Every block is a successor of the block before it. Block contents
    /// are not validated here.
    pub fn verify(&self, validator: &BlockValidator) -> ConsensusResult<()> {
        for pair in self.blocks.windows(2) {
            validator.is_successor_of(&pair[1], &pair[0]).map_err(|e| {
                ConsensusError::InvalidProof(format!(
                    "block at height {} does not follow height {}: {}",
                    pair[1].height(),
                    pair[0].height(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Longest run of blocks at the end of the chain linked by prev hash.
    pub fn dense_suffix(&self) -> &[Block] {
        let Some(mut start) = self.blocks.len().checked_sub(1) else {
            return &[];
        };
        while start > 0 && self.blocks[start - 1].hash() == *self.blocks[start].prev_hash() {
            start -= 1;
        }
        &self.blocks[start..]
    }

    /// Blocks grouped by superchain level. A block whose hash reaches depth
    /// `d` is a member of every level up to `d`; negative depths count as 0.
    pub fn super_chains(&self, params: &ChainParams) -> Vec<Vec<&Block>> {
        let mut chains: Vec<Vec<&Block>> = Vec::new();
        for block in &self.blocks {
            let depth = params.hash_depth(&block.hash()).max(0) as usize;
            if chains.len() <= depth {
                chains.resize_with(depth + 1, Vec::new);
            }
            for chain in &mut chains[..=depth] {
                chain.push(block);
            }
        }
        chains
    }

    pub fn is_anchored(&self, validator: &BlockValidator) -> bool {
        self.tail()
            .is_some_and(|tail| tail.hash() == *validator.genesis_hash())
    }

    pub fn total_difficulty(&self, params: &ChainParams) -> BigUint {
        self.blocks
            .iter()
            .fold(BigUint::zero(), |sum, block| sum + params.difficulty(&block.target()))
    }

    /// `u16` count, then each block as `u32` length and its encoding.
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> ConsensusResult<()> {
        buf.put_u16(self.blocks.len() as u16);
        for block in &self.blocks {
            let bytes = block.encode()?;
            buf.put_u32(bytes.len() as u32);
            buf.put_slice(&bytes);
        }
        Ok(())
    }

    pub fn decode<B: Buf>(buf: &mut B) -> ConsensusResult<Self> {
        crate::block::ensure_remaining(buf, 2, "block chain length")?;
        let count = buf.get_u16() as usize;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            crate::block::ensure_remaining(buf, 4, "block length")?;
            let len = buf.get_u32() as usize;
            crate::block::ensure_remaining(buf, len, "block")?;
            let bytes = buf.copy_to_bytes(len);
            blocks.push(Block::decode(&bytes)?);
        }
        BlockChain::new(blocks)
    }
}

impl fmt::Display for BlockChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockChain{{length={}}}", self.len())
    }
}

/// Dense run of headers, each the direct child of the one before.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderChain {
    headers: Vec<BlockHeader>,
}

impl HeaderChain {
    pub fn new(headers: Vec<BlockHeader>) -> ConsensusResult<Self> {
        if headers.len() > MAX_CHAIN_LEN {
            return Err(ConsensusError::InvalidProof(format!(
                "header chain of {} headers",
                headers.len()
            )));
        }
        Ok(Self { headers })
    }

    pub fn headers(&self) -> &[BlockHeader] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn head(&self) -> Option<&BlockHeader> {
        self.headers.last()
    }

    pub fn tail(&self) -> Option<&BlockHeader> {
        self.headers.first()
    }

    pub fn verify(&self, validator: &BlockValidator) -> ConsensusResult<()> {
        for pair in self.headers.windows(2) {
            validator
                .is_header_successor_of(&pair[1], &pair[0])
                .map_err(|e| {
                    ConsensusError::InvalidProof(format!(
                        "header at height {} does not follow its predecessor: {}",
                        pair[1].height, e
                    ))
                })?;
        }
        Ok(())
    }

    pub fn total_difficulty(&self, params: &ChainParams) -> BigUint {
        self.headers
            .iter()
            .fold(BigUint::zero(), |sum, header| sum + params.difficulty(&header.target()))
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u16(self.headers.len() as u16);
        for header in &self.headers {
            header.encode(buf);
        }
    }

    pub fn decode<B: Buf>(buf: &mut B) -> ConsensusResult<Self> {
        crate::block::ensure_remaining(buf, 2, "header chain length")?;
        let count = buf.get_u16() as usize;
        let headers = (0..count)
            .map(|_| BlockHeader::decode(buf))
            .collect::<ConsensusResult<Vec<_>>>()?;
        HeaderChain::new(headers)
    }
}

/// Succinct proof of the main chain: superchain prefix plus dense suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainProof {
    prefix: BlockChain,
    suffix: HeaderChain,
}

impl ChainProof {
    pub fn new(prefix: BlockChain, suffix: HeaderChain) -> ConsensusResult<Self> {
        if prefix.is_empty() {
            return Err(ConsensusError::InvalidProof("empty prefix".to_string()));
        }
        Ok(Self { prefix, suffix })
    }

    pub fn prefix(&self) -> &BlockChain {
        &self.prefix
    }

    pub fn suffix(&self) -> &HeaderChain {
        &self.suffix
    }

    /// Head header of the proven chain.
    pub fn head(&self) -> &BlockHeader {
        match self.suffix.head() {
            Some(header) => header,
            // The prefix is never empty.
            None => &self.prefix.blocks[self.prefix.len() - 1].header,
        }
    }

    /// Anchored at genesis, both halves are internally linked and the
    /// suffix starts right after the prefix head.
    pub fn verify(&self, validator: &BlockValidator) -> ConsensusResult<()> {
        if !self.prefix.is_anchored(validator) {
            return Err(ConsensusError::InvalidProof(
                "prefix is not anchored at genesis".to_string(),
            ));
        }
        self.prefix.verify(validator)?;
        self.suffix.verify(validator)?;

        if let (Some(first), Some(prefix_head)) = (self.suffix.tail(), self.prefix.head()) {
            validator
                .is_header_successor_of(first, &prefix_head.header)
                .map_err(|e| {
                    ConsensusError::InvalidProof(format!("suffix does not follow prefix: {}", e))
                })?;
        }
        Ok(())
    }

    pub fn encode(&self) -> ConsensusResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.prefix.encode(&mut buf)?;
        self.suffix.encode(&mut buf);
        Ok(buf)
    }

    pub fn decode(mut bytes: &[u8]) -> ConsensusResult<Self> {
        let buf = &mut bytes;
        let prefix = BlockChain::decode(buf)?;
        let suffix = HeaderChain::decode(buf)?;
        if buf.has_remaining() {
            return Err(ConsensusError::Decode(format!(
                "{} trailing bytes after chain proof",
                buf.remaining()
            )));
        }
        ChainProof::new(prefix, suffix)
    }
}

impl fmt::Display for ChainProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ChainProof{{prefix={}, suffix={}, height={}}}",
            self.prefix.len(),
            self.suffix.len(),
            self.head().height
        )
    }
}
