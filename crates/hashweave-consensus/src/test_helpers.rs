//! Shared fixtures for consensus unit tests: a devnet genesis and mined
//! chains at a constant target.

use crate::block::{Address, Block, BlockBody, BlockHeader, BlockInterlink, BLOCK_VERSION};
use crate::hash::Hash;
use crate::params::ChainParams;
use crate::target::{is_proof_of_work, target_to_compact};
use crate::validation::BlockValidator;
use std::sync::Arc;

pub(crate) struct TestNet {
    pub params: Arc<ChainParams>,
    pub genesis: Block,
    pub validator: BlockValidator,
}

impl TestNet {
    pub fn new() -> Self {
        let params = Arc::new(ChainParams::devnet());
        let genesis = genesis_block(&params);
        let validator = BlockValidator::new(params.clone(), genesis.hash());
        Self {
            params,
            genesis,
            validator,
        }
    }

    pub fn set_block_size_max(&mut self, size: usize) {
        let mut params = (*self.params).clone();
        params.block_size_max = size;
        self.params = Arc::new(params);
        self.validator = BlockValidator::new(self.params.clone(), self.genesis.hash());
    }
}

pub(crate) fn genesis_block(params: &ChainParams) -> Block {
    let mut body = BlockBody::new(Address::ZERO, vec![]);
    body.extra_data = b"genesis".to_vec();
    let mut block = Block::new(
        BlockHeader {
            version: BLOCK_VERSION,
            prev_hash: Hash::ZERO,
            interlink_hash: Hash::ZERO,
            body_hash: body.hash(),
            accounts_hash: Hash::ZERO,
            n_bits: target_to_compact(params.block_target_max()),
            height: 1,
            timestamp: params.genesis_timestamp,
            nonce: 0,
        },
        BlockInterlink::empty(),
        Some(body),
    );
    mine(&mut block);
    block
}

/// Increment the nonce until the header meets its own target.
pub(crate) fn mine(block: &mut Block) {
    let target = block.target();
    while !is_proof_of_work(&block.hash(), &target) {
        block.header.nonce += 1;
    }
}

/// Mined child of `prev` at the same target, `spacing` seconds later.
pub(crate) fn next_block(net: &TestNet, prev: &Block, body: BlockBody, spacing: u64) -> Block {
    let target = prev.target();
    let interlink = prev
        .next_interlink(&target, &net.params)
        .expect("interlink fits");
    let mut block = Block::new(
        BlockHeader {
            version: BLOCK_VERSION,
            prev_hash: prev.hash(),
            interlink_hash: interlink.hash(&net.genesis.hash()),
            body_hash: body.hash(),
            accounts_hash: Hash::ZERO,
            n_bits: prev.n_bits(),
            height: prev.height() + 1,
            timestamp: prev.timestamp() + spacing,
            nonce: 0,
        },
        interlink,
        Some(body),
    );
    mine(&mut block);
    block
}

/// Genesis followed by `len - 1` mined blocks with empty bodies.
pub(crate) fn build_chain(net: &TestNet, len: usize) -> Vec<Block> {
    let mut chain = vec![net.genesis.clone()];
    while chain.len() < len {
        let prev = &chain[chain.len() - 1];
        let miner = Address::new([(chain.len() % 251) as u8; 20]);
        let block = next_block(net, prev, BlockBody::new(miner, vec![]), net.params.block_time);
        chain.push(block);
    }
    chain
}
