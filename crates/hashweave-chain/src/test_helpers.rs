//! Chain fixture over in-memory storage.

use crate::{
    Blockchain, BlockProducer, GenesisBuilder, KvChainStore, PruningConfig, PushOutcome,
    StoredAccounts,
};
use hashweave_consensus::block::Address;
use hashweave_consensus::{Block, ChainParams};
use hashweave_storage::MemoryStorage;
use std::sync::Arc;

pub(crate) fn miner(seed: u8) -> Address {
    Address::new([seed; 20])
}

pub(crate) struct TestChain {
    pub storage: Arc<MemoryStorage>,
    pub params: Arc<ChainParams>,
    pub genesis: Block,
    pub chain: Blockchain,
    pub producer: BlockProducer,
}

impl TestChain {
    pub async fn new() -> Self {
        Self::with_pruning(PruningConfig::default()).await
    }

    pub async fn with_pruning(pruning: PruningConfig) -> Self {
        let params = Arc::new(ChainParams::devnet());
        let genesis = GenesisBuilder::new(&params).build().unwrap();
        Self::open(params, genesis, Arc::new(MemoryStorage::new()), pruning).await
    }

    pub async fn open(
        params: Arc<ChainParams>,
        genesis: Block,
        storage: Arc<MemoryStorage>,
        pruning: PruningConfig,
    ) -> Self {
        let store = Arc::new(KvChainStore::new(storage.clone()));
        let accounts = Arc::new(StoredAccounts::new(storage.clone(), params.block_reward));
        let chain = Blockchain::open_with_pruning(params.clone(), genesis.clone(), store, accounts, pruning)
            .await
            .unwrap();
        Self {
            storage,
            params,
            genesis,
            producer: BlockProducer::new(chain.clone()),
            chain,
        }
    }

    /// Second chain with the same genesis and its own storage.
    pub async fn sibling(&self) -> Self {
        Self::open(
            self.params.clone(),
            self.genesis.clone(),
            Arc::new(MemoryStorage::new()),
            PruningConfig::default(),
        )
        .await
    }

    /// Mine the next block `spacing` seconds after the head, without
    /// pushing it.
    pub async fn mine_next(&self, miner_seed: u8, spacing: u64) -> Block {
        let timestamp = self.chain.head().block.timestamp() + spacing;
        self.producer
            .produce(miner(miner_seed), vec![], timestamp)
            .await
            .unwrap()
    }

    /// Mine and push `count` blocks at the ideal spacing.
    pub async fn extend(&self, count: usize, miner_seed: u8) -> Vec<Block> {
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let block = self.mine_next(miner_seed, self.params.block_time).await;
            assert_eq!(
                self.chain.push_block(block.clone()).await.unwrap(),
                PushOutcome::Extended
            );
            blocks.push(block);
        }
        blocks
    }
}
