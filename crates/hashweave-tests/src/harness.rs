//! Test harness for integration tests.
//!
//! Provides chain fixtures over RocksDB in temporary directories and over
//! in-memory storage.

use hashweave_chain::{
    BlockProducer, Blockchain, ChainResult, GenesisBuilder, KvChainStore, PruningConfig,
    PushOutcome, StoredAccounts,
};
use hashweave_consensus::block::{Address, Transaction};
use hashweave_consensus::{Block, ChainParams};
use hashweave_storage::{Database, MemoryStorage, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Test database wrapper that cleans up on drop.
pub struct TestDatabase {
    db: Arc<Database>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    /// Create a new test database in a temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(temp_dir.path()).expect("Failed to open database");
        Self {
            db: Arc::new(db),
            _temp_dir: temp_dir,
        }
    }

    /// Get the path to the database.
    pub fn path(&self) -> PathBuf {
        self._temp_dir.path().to_path_buf()
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        self.db.clone()
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// A chain engine with its collaborators, ready to push blocks into.
pub struct TestNode {
    pub params: Arc<ChainParams>,
    pub genesis: Block,
    pub storage: Arc<dyn Storage>,
    pub accounts: Arc<StoredAccounts>,
    pub chain: Blockchain,
    pub producer: BlockProducer,
}

impl TestNode {
    /// Devnet chain over in-memory storage.
    pub async fn in_memory() -> Self {
        Self::with_params(ChainParams::devnet()).await
    }

    pub async fn with_params(params: ChainParams) -> Self {
        let params = Arc::new(params);
        let genesis = GenesisBuilder::new(&params).build().expect("genesis");
        Self::open(params, genesis, Arc::new(MemoryStorage::new()), PruningConfig::default())
            .await
            .expect("open chain")
    }

    /// Devnet chain over RocksDB.
    pub async fn on_disk(db: &TestDatabase) -> ChainResult<Self> {
        let params = Arc::new(ChainParams::devnet());
        let genesis = GenesisBuilder::new(&params).build()?;
        Self::open(params, genesis, db.storage(), PruningConfig::default()).await
    }

    pub async fn open(
        params: Arc<ChainParams>,
        genesis: Block,
        storage: Arc<dyn Storage>,
        pruning: PruningConfig,
    ) -> ChainResult<Self> {
        let store = Arc::new(KvChainStore::new(storage.clone()));
        let accounts = Arc::new(StoredAccounts::new(storage.clone(), params.block_reward));
        let chain = Blockchain::open_with_pruning(
            params.clone(),
            genesis.clone(),
            store,
            accounts.clone(),
            pruning,
        )
        .await?;
        Ok(Self {
            params,
            genesis,
            storage,
            accounts,
            producer: BlockProducer::new(chain.clone()),
            chain,
        })
    }

    /// Fresh in-memory engine sharing this node's parameters and genesis.
    pub async fn peer(&self) -> Self {
        Self::open(
            self.params.clone(),
            self.genesis.clone(),
            Arc::new(MemoryStorage::new()),
            PruningConfig::default(),
        )
        .await
        .expect("open peer chain")
    }

    /// Mine the next block `spacing` seconds after the head without
    /// pushing it.
    pub async fn mine(&self, miner: Address, transactions: Vec<Transaction>, spacing: u64) -> Block {
        let timestamp = self.chain.head().block.timestamp() + spacing;
        self.producer
            .produce(miner, transactions, timestamp)
            .await
            .expect("produce block")
    }

    /// Mine and push `count` empty blocks at the given spacing.
    pub async fn extend(&self, count: usize, miner: Address, spacing: u64) -> Vec<Block> {
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            let block = self.mine(miner, vec![], spacing).await;
            assert_eq!(self.push(&block).await, PushOutcome::Extended);
            blocks.push(block);
        }
        blocks
    }

    pub async fn extend_ideal(&self, count: usize, miner: Address) -> Vec<Block> {
        self.extend(count, miner, self.params.block_time).await
    }

    pub async fn push(&self, block: &Block) -> PushOutcome {
        self.chain.push_block(block.clone()).await.expect("push block")
    }

    pub async fn push_all(&self, blocks: &[Block]) -> Vec<PushOutcome> {
        let mut outcomes = Vec::with_capacity(blocks.len());
        for block in blocks {
            outcomes.push(self.push(block).await);
        }
        outcomes
    }
}
