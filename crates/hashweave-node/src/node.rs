//! Node implementation.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use hashweave_chain::{
    BlockProducer, Blockchain, ChainEvent, GenesisBuilder, KvChainStore, PushOutcome,
    StoredAccounts,
};
use hashweave_consensus::block::Address;
use hashweave_consensus::ChainParams;
use hashweave_storage::{Database, Storage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Seconds between status lines.
const STATUS_INTERVAL_SECS: u64 = 30;

/// The main node struct coordinating all components.
#[derive(Clone)]
pub struct Node {
    /// Node configuration.
    config: NodeConfig,
    /// Storage database.
    storage: Arc<Database>,
    /// Chain engine.
    chain: Blockchain,
    /// Shutdown flag.
    shutdown: Arc<AtomicBool>,
}

impl Node {
    /// Open the database and boot the chain.
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let params = Arc::new(config.chain_params()?);

        std::fs::create_dir_all(&config.data_dir)?;
        let storage = Arc::new(Database::open(config.data_dir.join("db"))?);
        let shared: Arc<dyn Storage> = storage.clone();

        let genesis = GenesisBuilder::new(&params)
            .build()
            .context("Failed to build genesis block")?;
        let store = Arc::new(KvChainStore::new(shared.clone()));
        let accounts = Arc::new(StoredAccounts::new(shared, params.block_reward));
        let chain = Blockchain::open_with_pruning(
            params,
            genesis,
            store,
            accounts,
            config.storage.pruning(),
        )
        .await
        .context("Failed to open chain")?;

        let head = chain.head();
        info!(
            height = head.height(),
            head = %head.hash(),
            total_difficulty = %head.total_difficulty,
            "Chain loaded"
        );

        Ok(Self {
            config,
            storage,
            chain,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    pub fn params(&self) -> &ChainParams {
        self.chain.params()
    }

    /// Run until [`Self::shutdown`] is called.
    pub async fn run(&self) -> Result<()> {
        info!("Starting node services...");
        self.start_event_log();

        if self.config.devnet.mine_blocks > 0 {
            let node = self.clone();
            let miner = self.config.devnet.miner()?;
            let count = self.config.devnet.mine_blocks;
            tokio::spawn(async move {
                if let Err(e) = node.produce_blocks(miner, count).await {
                    warn!("Block production stopped: {:#}", e);
                }
            });
        }

        let mut ticks = 0u64;
        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(1)).await;
            ticks += 1;
            if ticks % STATUS_INTERVAL_SECS == 0 {
                self.log_status();
            }
        }

        info!("Node main loop stopped");
        Ok(())
    }

    /// Mine and push `count` blocks on top of the current head.
    ///
    /// Timestamps advance by the block time from the head, capped at the
    /// wall clock, so a devnet keeps its difficulty near the maximum target.
    pub async fn produce_blocks(&self, miner: Address, count: u64) -> Result<u64> {
        let producer = BlockProducer::new(self.chain.clone());
        let interval = Duration::from_millis(self.config.devnet.block_interval_ms);
        let mut extended = 0;

        for _ in 0..count {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let head = self.chain.head();
            let timestamp = (head.block.timestamp() + self.params().block_time).min(now_secs());
            let block = producer.produce(miner, vec![], timestamp).await?;
            let hash = block.hash();

            match self.chain.push_block(block).await? {
                PushOutcome::Extended => extended += 1,
                other => warn!(%hash, outcome = ?other, "Produced block did not extend the chain"),
            }
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        info!(extended, height = self.chain.height(), "Block production finished");
        Ok(extended)
    }

    fn start_event_log(&self) {
        let mut events = self.chain.subscribe();
        let shutdown = Arc::clone(&self.shutdown);
        tokio::spawn(async move {
            while !shutdown.load(Ordering::SeqCst) {
                match events.recv().await {
                    Ok(ChainEvent::HeadChanged {
                        hash,
                        height,
                        rebranching,
                    }) => {
                        if !rebranching {
                            info!(%hash, height, "Head changed");
                        } else {
                            debug!(%hash, height, "Head changed during rebranch");
                        }
                    }
                    Ok(ChainEvent::Rebranched {
                        reverted,
                        adopted,
                        head,
                    }) => {
                        info!(
                            reverted = reverted.len(),
                            adopted = adopted.len(),
                            %head,
                            "Rebranched"
                        );
                    }
                    Ok(event) => debug!(?event, "Chain event"),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event log fell behind");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    fn log_status(&self) {
        let head = self.chain.head();
        let counters = self.chain.counters();
        info!(
            node = %self.config.node_name,
            height = head.height(),
            head = %head.hash(),
            total_difficulty = %head.total_difficulty,
            forks = self.chain.fork_count(),
            extended = counters.extended,
            rebranched = counters.rebranched,
            invalid = counters.invalid,
            "Node status"
        );
    }

    /// Shutdown the node.
    pub async fn shutdown(&self) {
        info!("Shutting down node...");
        self.shutdown.store(true, Ordering::SeqCst);

        if let Err(e) = self.storage.flush() {
            warn!("Error flushing database: {}", e);
        }

        info!("Node shutdown complete");
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devnet_config(dir: &tempfile::TempDir) -> NodeConfig {
        let mut config = NodeConfig::default_for_network("devnet");
        config.data_dir = dir.path().to_path_buf();
        config.devnet.block_interval_ms = 0;
        config
    }

    #[tokio::test]
    async fn test_devnet_production_persists() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(devnet_config(&dir)).await.unwrap();
        assert_eq!(node.chain().height(), 1);

        let extended = node.produce_blocks(Address::new([7; 20]), 3).await.unwrap();
        assert_eq!(extended, 3);
        let head = node.chain().head();
        assert_eq!(head.height(), 4);
        node.shutdown().await;
        drop(node);

        let reopened = Node::new(devnet_config(&dir)).await.unwrap();
        assert_eq!(reopened.chain().head(), head);
    }

    #[tokio::test]
    async fn test_pruning_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = devnet_config(&dir);
        config.storage.blocks_to_keep = 10;
        let node = Node::new(config).await.unwrap();
        node.produce_blocks(Address::ZERO, 2).await.unwrap();
        assert_eq!(node.chain().height(), 3);
    }
}
