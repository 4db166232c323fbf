//! Block templates and a CPU miner for devnets and tests.

use crate::{Blockchain, ChainError, ChainResult};
use hashweave_consensus::block::{Address, BlockBody, BlockHeader, Transaction, BLOCK_VERSION};
use hashweave_consensus::target::{compact_to_target, is_proof_of_work, target_to_compact};
use hashweave_consensus::{Block, ConsensusError, Hash};
use tracing::{debug, trace};

/// Builds successors of the current head of a [`Blockchain`].
#[derive(Clone, Debug)]
pub struct BlockProducer {
    chain: Blockchain,
}

impl BlockProducer {
    pub fn new(chain: Blockchain) -> Self {
        Self { chain }
    }

    /// Unmined successor of the current head. The timestamp is raised to
    /// the head's if it is earlier.
    pub async fn next_block(
        &self,
        miner: Address,
        transactions: Vec<Transaction>,
        timestamp: u64,
    ) -> ChainResult<Block> {
        let head = self.chain.head();
        let params = self.chain.params();

        let n_bits = target_to_compact(&self.chain.get_next_target(None).await?);
        let target = compact_to_target(n_bits);
        let interlink = head.block.next_interlink(&target, params)?;
        let body = BlockBody::new(miner, transactions);

        let mut block = Block::new(
            BlockHeader {
                version: BLOCK_VERSION,
                prev_hash: head.hash(),
                interlink_hash: interlink.hash(&self.chain.genesis_hash()),
                body_hash: body.hash(),
                accounts_hash: Hash::ZERO,
                n_bits,
                height: head.height() + 1,
                timestamp: timestamp.max(head.block.timestamp()),
                nonce: 0,
            },
            interlink,
            Some(body),
        );

        // Dropped without committing.
        let mut accounts_tx = self.chain.accounts().transaction().await?;
        accounts_tx.commit_block(&block).await?;
        block.header.accounts_hash = accounts_tx.hash().await?;

        trace!(height = block.height(), n_bits, "Built block template");
        Ok(block)
    }

    /// [`Self::next_block`], mined.
    pub async fn produce(
        &self,
        miner: Address,
        transactions: Vec<Transaction>,
        timestamp: u64,
    ) -> ChainResult<Block> {
        let mut block = self.next_block(miner, transactions, timestamp).await?;
        if !mine(&mut block, u32::MAX) {
            return Err(ChainError::Consensus(ConsensusError::InvalidPow(format!(
                "nonce space exhausted at height {}",
                block.height()
            ))));
        }
        debug!(height = block.height(), hash = %block.hash(), "Mined block");
        Ok(block)
    }
}

/// Search nonces from the current one up to `max_nonce` until the header
/// meets its target. Returns whether it succeeded.
pub fn mine(block: &mut Block, max_nonce: u32) -> bool {
    let target = block.target();
    loop {
        if is_proof_of_work(&block.hash(), &target) {
            return true;
        }
        if block.header.nonce >= max_nonce {
            return false;
        }
        block.header.nonce += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{miner, TestChain};
    use crate::PushOutcome;

    #[test]
    fn test_mine_respects_max_nonce() {
        let params = hashweave_consensus::ChainParams::devnet();
        let mut block = crate::genesis::GenesisBuilder::new(&params).build().unwrap();
        assert!(mine(&mut block, u32::MAX));

        // No hash meets a target of one.
        block.header.n_bits = target_to_compact(&num_bigint::BigUint::from(1u32));
        block.header.nonce = 0;
        assert!(!mine(&mut block, 10));
        assert_eq!(block.header.nonce, 10);
    }

    #[tokio::test]
    async fn test_produced_blocks_extend_the_chain() {
        let test = TestChain::new().await;
        let producer = BlockProducer::new(test.chain.clone());
        let head = test.chain.head();

        // Earlier timestamps are clamped to the head's.
        let block = producer
            .produce(miner(1), vec![], head.block.timestamp() - 100)
            .await
            .unwrap();
        assert_eq!(block.timestamp(), head.block.timestamp());
        assert_eq!(block.height(), 2);
        assert_eq!(test.chain.push_block(block).await.unwrap(), PushOutcome::Extended);
    }
}
