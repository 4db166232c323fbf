//! Per-block chain record.

use crate::{ChainError, ChainResult};
use bytes::{Buf, BufMut};
use hashweave_consensus::nipopow::{SuperBlockCounts, SuperChainEntry};
use hashweave_consensus::{Block, ChainParams, Hash};
use num_bigint::BigUint;

/// Everything the engine knows about a stored block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainData {
    pub block: Block,
    /// Sum of target difficulties from genesis to this block.
    pub total_difficulty: BigUint,
    /// Sum of `max / hash` from genesis to this block.
    pub total_work: BigUint,
    pub super_block_counts: SuperBlockCounts,
    pub on_main_chain: bool,
    /// Child on the main chain, set while this block is on it and not head.
    pub main_chain_successor: Option<Hash>,
}

impl ChainData {
    /// Record for the genesis block, which is on the main chain by definition.
    pub fn initial(genesis: Block, params: &ChainParams) -> Self {
        let hash = genesis.hash();
        let depth = params.hash_depth(&hash).max(0) as u32;
        Self {
            total_difficulty: params.difficulty(&genesis.target()),
            total_work: params.real_difficulty(&hash),
            super_block_counts: SuperBlockCounts::new().copy_and_add(depth),
            on_main_chain: true,
            main_chain_successor: None,
            block: genesis,
        }
    }

    /// Record for `block` as a child of this one, not yet on the main chain.
    pub fn next(&self, block: Block, params: &ChainParams) -> Self {
        let hash = block.hash();
        let depth = params.hash_depth(&hash).max(0) as u32;
        Self {
            total_difficulty: &self.total_difficulty + params.difficulty(&block.target()),
            total_work: &self.total_work + params.real_difficulty(&hash),
            super_block_counts: self.super_block_counts.copy_and_add(depth),
            on_main_chain: false,
            main_chain_successor: None,
            block,
        }
    }

    pub fn hash(&self) -> Hash {
        self.block.hash()
    }

    pub fn height(&self) -> u32 {
        self.block.height()
    }

    /// Copy with the block body stripped.
    pub fn to_light(&self) -> ChainData {
        ChainData {
            block: self.block.to_light(),
            ..self.clone()
        }
    }

    pub fn encode(&self) -> ChainResult<Vec<u8>> {
        let block = self.block.encode()?;
        let mut buf = Vec::with_capacity(block.len() + 128);
        buf.put_u32(block.len() as u32);
        buf.put_slice(&block);
        put_biguint(&mut buf, &self.total_difficulty);
        put_biguint(&mut buf, &self.total_work);
        self.super_block_counts.encode(&mut buf);
        buf.put_u8(self.on_main_chain as u8);
        match &self.main_chain_successor {
            Some(hash) => {
                buf.put_u8(1);
                buf.put_slice(hash.as_bytes());
            }
            None => buf.put_u8(0),
        }
        Ok(buf)
    }

    pub fn decode(mut bytes: &[u8]) -> ChainResult<Self> {
        let buf = &mut bytes;
        let block_len = get_u32(buf)? as usize;
        let block_bytes = take(buf, block_len)?;
        let block = Block::decode(block_bytes)?;
        let total_difficulty = get_biguint(buf)?;
        let total_work = get_biguint(buf)?;
        let super_block_counts = SuperBlockCounts::decode(buf)
            .ok_or_else(|| corrupt("truncated super block counts"))?;
        let on_main_chain = match take(buf, 1)?[0] {
            0 => false,
            1 => true,
            flag => return Err(corrupt(&format!("invalid main chain flag {}", flag))),
        };
        let main_chain_successor = match take(buf, 1)?[0] {
            0 => None,
            1 => Some(Hash::from_slice(take(buf, 32)?).ok_or_else(|| corrupt("bad hash"))?),
            flag => return Err(corrupt(&format!("invalid successor flag {}", flag))),
        };
        Ok(Self {
            block,
            total_difficulty,
            total_work,
            super_block_counts,
            on_main_chain,
            main_chain_successor,
        })
    }
}

impl SuperChainEntry for ChainData {
    fn height(&self) -> u32 {
        self.block.height()
    }

    fn super_block_counts(&self) -> &SuperBlockCounts {
        &self.super_block_counts
    }
}

fn put_biguint(buf: &mut Vec<u8>, value: &BigUint) {
    let bytes = value.to_bytes_be();
    buf.put_u8(bytes.len() as u8);
    buf.put_slice(&bytes);
}

fn get_biguint(buf: &mut &[u8]) -> ChainResult<BigUint> {
    let len = take(buf, 1)?[0] as usize;
    Ok(BigUint::from_bytes_be(take(buf, len)?))
}

fn get_u32(buf: &mut &[u8]) -> ChainResult<u32> {
    let mut bytes = take(buf, 4)?;
    Ok(bytes.get_u32())
}

fn take<'a>(buf: &mut &'a [u8], len: usize) -> ChainResult<&'a [u8]> {
    if buf.len() < len {
        return Err(corrupt("truncated chain data"));
    }
    let (head, rest) = buf.split_at(len);
    *buf = rest;
    Ok(head)
}

fn corrupt(message: &str) -> ChainError {
    ChainError::Serialization(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::GenesisBuilder;

    #[test]
    fn test_initial_and_next_accumulate() {
        let params = ChainParams::devnet();
        let genesis = GenesisBuilder::new(&params).build().unwrap();
        let data = ChainData::initial(genesis.clone(), &params);
        assert!(data.on_main_chain);
        assert_eq!(data.total_difficulty, BigUint::from(1u32));
        assert_eq!(data.super_block_counts.get(0), 1);

        let child = data.next(genesis.clone(), &params);
        assert!(!child.on_main_chain);
        assert_eq!(child.total_difficulty, BigUint::from(2u32));
        assert_eq!(child.total_work, &data.total_work * 2u32);
        assert_eq!(child.super_block_counts.get(0), 2);
    }

    #[test]
    fn test_encoding_round_trip() {
        let params = ChainParams::devnet();
        let genesis = GenesisBuilder::new(&params).build().unwrap();
        let mut data = ChainData::initial(genesis, &params);
        data.main_chain_successor = Some(Hash::digest(b"next"));

        let decoded = ChainData::decode(&data.encode().unwrap()).unwrap();
        assert_eq!(decoded, data);

        let light = data.to_light();
        assert!(!light.block.is_full());
        assert_eq!(ChainData::decode(&light.encode().unwrap()).unwrap(), light);
    }

    #[test]
    fn test_truncated_record_rejected() {
        let params = ChainParams::devnet();
        let genesis = GenesisBuilder::new(&params).build().unwrap();
        let bytes = ChainData::initial(genesis, &params).encode().unwrap();
        assert!(ChainData::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
