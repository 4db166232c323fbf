//! Genesis block construction.

use crate::accounts::StagedAccounts;
use crate::producer::mine;
use crate::{ChainError, ChainResult};
use hashweave_consensus::block::{Address, BlockBody, BlockHeader, BlockInterlink, BLOCK_VERSION};
use hashweave_consensus::target::target_to_compact;
use hashweave_consensus::{Block, ChainParams, Hash};

const DEFAULT_EXTRA_DATA: &[u8] = b"hashweave genesis";

/// Builds the height-1 block of a network: maximum target, empty
/// interlink with a zero interlink hash, accounts hash of the state after
/// the genesis reward.
pub struct GenesisBuilder<'a> {
    params: &'a ChainParams,
    miner: Address,
    extra_data: Vec<u8>,
    timestamp: u64,
}

impl<'a> GenesisBuilder<'a> {
    pub fn new(params: &'a ChainParams) -> Self {
        Self {
            params,
            miner: Address::ZERO,
            extra_data: DEFAULT_EXTRA_DATA.to_vec(),
            timestamp: params.genesis_timestamp,
        }
    }

    pub fn miner(mut self, miner: Address) -> Self {
        self.miner = miner;
        self
    }

    pub fn extra_data(mut self, extra_data: impl Into<Vec<u8>>) -> Self {
        self.extra_data = extra_data.into();
        self
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn build(self) -> ChainResult<Block> {
        let mut body = BlockBody::new(self.miner, vec![]);
        body.extra_data = self.extra_data;

        let mut block = Block::new(
            BlockHeader {
                version: BLOCK_VERSION,
                prev_hash: Hash::ZERO,
                interlink_hash: Hash::ZERO,
                body_hash: body.hash(),
                accounts_hash: Hash::ZERO,
                n_bits: target_to_compact(self.params.block_target_max()),
                height: 1,
                timestamp: self.timestamp,
                nonce: 0,
            },
            BlockInterlink::empty(),
            Some(body),
        );

        let mut accounts = StagedAccounts::detached(self.params.block_reward);
        accounts.apply(&block)?;
        block.header.accounts_hash = accounts.state_hash()?;

        if !mine(&mut block, u32::MAX) {
            return Err(ChainError::Genesis(
                "no nonce satisfies the maximum target".to_string(),
            ));
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashweave_consensus::BlockValidator;
    use std::sync::Arc;

    #[test]
    fn test_genesis_is_valid_and_deterministic() {
        let params = Arc::new(ChainParams::devnet());
        let genesis = GenesisBuilder::new(&params).build().unwrap();
        assert_eq!(genesis.height(), 1);
        assert!(genesis.interlink.is_empty());
        assert!(genesis.header.interlink_hash.is_zero());
        assert_eq!(genesis.hash(), GenesisBuilder::new(&params).build().unwrap().hash());

        let validator = BlockValidator::new(params.clone(), genesis.hash());
        validator.verify(&genesis, genesis.timestamp()).unwrap();
    }

    #[test]
    fn test_builder_options_change_identity() {
        let params = ChainParams::devnet();
        let base = GenesisBuilder::new(&params).build().unwrap();
        let other = GenesisBuilder::new(&params)
            .miner(Address::new([7; 20]))
            .extra_data(b"testnet".to_vec())
            .timestamp(params.genesis_timestamp + 1)
            .build()
            .unwrap();
        assert_ne!(base.hash(), other.hash());
        assert_ne!(base.header.accounts_hash, other.header.accounts_hash);
    }
}
