//! Persistent chain data: per-block records, the main chain height index
//! and the head pointer.

use crate::{columns, ChainData, ChainError, ChainResult};
use async_trait::async_trait;
use hashweave_consensus::{Block, Hash};
use hashweave_storage::{Storage, WriteBatch};
use std::sync::Arc;
use tracing::debug;

const HEAD_KEY: &[u8] = b"head";

/// One logical write in a [`ChainStoreTransaction`].
#[derive(Debug, Clone)]
pub enum ChainWrite {
    PutChainData(Box<ChainData>),
    RemoveChainData(Hash),
    SetMainChain { height: u32, hash: Hash },
    RemoveMainChain(u32),
    SetHead(Hash),
}

/// Writes staged for one atomic commit, together with the accounts
/// changes that belong to them.
#[derive(Debug, Default)]
pub struct ChainStoreTransaction {
    writes: Vec<ChainWrite>,
    accounts: WriteBatch,
}

impl ChainStoreTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_chain_data(&mut self, data: ChainData) {
        self.writes.push(ChainWrite::PutChainData(Box::new(data)));
    }

    pub fn remove_chain_data(&mut self, hash: Hash) {
        self.writes.push(ChainWrite::RemoveChainData(hash));
    }

    pub fn set_main_chain(&mut self, height: u32, hash: Hash) {
        self.writes.push(ChainWrite::SetMainChain { height, hash });
    }

    pub fn remove_main_chain(&mut self, height: u32) {
        self.writes.push(ChainWrite::RemoveMainChain(height));
    }

    pub fn set_head(&mut self, hash: Hash) {
        self.writes.push(ChainWrite::SetHead(hash));
    }

    /// Attach the staged accounts writes.
    pub fn merge_accounts(&mut self, batch: WriteBatch) {
        self.accounts.merge(batch);
    }

    pub fn writes(&self) -> &[ChainWrite] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.accounts.is_empty()
    }

    pub fn into_parts(self) -> (Vec<ChainWrite>, WriteBatch) {
        (self.writes, self.accounts)
    }
}

/// Chain data persistence consumed by the engine.
#[async_trait]
pub trait ChainDataStore: Send + Sync {
    async fn get_chain_data(&self, hash: &Hash) -> ChainResult<Option<ChainData>>;

    /// Hash of the main chain block at `height`.
    async fn get_hash_at(&self, height: u32) -> ChainResult<Option<Hash>>;

    async fn get_head(&self) -> ChainResult<Option<Hash>>;

    /// Apply every write of `tx` or none of them.
    async fn commit(&self, tx: ChainStoreTransaction) -> ChainResult<()>;

    /// Every stored record with the block body stripped.
    async fn all_chain_data(&self) -> ChainResult<Vec<ChainData>>;

    async fn get_chain_data_at(&self, height: u32) -> ChainResult<Option<ChainData>> {
        match self.get_hash_at(height).await? {
            Some(hash) => self.get_chain_data(&hash).await,
            None => Ok(None),
        }
    }

    /// Main chain block at `height`.
    async fn get_block_at(&self, height: u32) -> ChainResult<Option<Block>> {
        Ok(self.get_chain_data_at(height).await?.map(|data| data.block))
    }

    fn transaction(&self) -> ChainStoreTransaction {
        ChainStoreTransaction::new()
    }
}

/// [`ChainDataStore`] over a key-value [`Storage`].
///
/// - `ChainData`: block hash -> encoded record
/// - `MainChain`: big-endian height -> block hash
/// - `Metadata`: `head` -> block hash
pub struct KvChainStore {
    storage: Arc<dyn Storage>,
}

impl KvChainStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    fn to_batch(&self, tx: ChainStoreTransaction) -> ChainResult<WriteBatch> {
        let (writes, accounts) = tx.into_parts();
        let mut batch = WriteBatch::new();
        for write in writes {
            match write {
                ChainWrite::PutChainData(data) => {
                    batch.put(columns::CHAIN_DATA, data.hash().as_bytes().to_vec(), data.encode()?);
                }
                ChainWrite::RemoveChainData(hash) => {
                    batch.delete(columns::CHAIN_DATA, hash.as_bytes().to_vec());
                }
                ChainWrite::SetMainChain { height, hash } => {
                    batch.put(
                        columns::MAIN_CHAIN,
                        height.to_be_bytes().to_vec(),
                        hash.as_bytes().to_vec(),
                    );
                }
                ChainWrite::RemoveMainChain(height) => {
                    batch.delete(columns::MAIN_CHAIN, height.to_be_bytes().to_vec());
                }
                ChainWrite::SetHead(hash) => {
                    batch.put(columns::METADATA, HEAD_KEY.to_vec(), hash.as_bytes().to_vec());
                }
            }
        }
        batch.merge(accounts);
        Ok(batch)
    }
}

fn decode_hash(bytes: &[u8]) -> ChainResult<Hash> {
    Hash::from_slice(bytes)
        .ok_or_else(|| ChainError::Serialization(format!("invalid hash length {}", bytes.len())))
}

#[async_trait]
impl ChainDataStore for KvChainStore {
    async fn get_chain_data(&self, hash: &Hash) -> ChainResult<Option<ChainData>> {
        match self.storage.get(columns::CHAIN_DATA, hash.as_bytes())? {
            Some(bytes) => Ok(Some(ChainData::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_hash_at(&self, height: u32) -> ChainResult<Option<Hash>> {
        match self.storage.get(columns::MAIN_CHAIN, &height.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode_hash(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_head(&self) -> ChainResult<Option<Hash>> {
        match self.storage.get(columns::METADATA, HEAD_KEY)? {
            Some(bytes) => Ok(Some(decode_hash(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn commit(&self, tx: ChainStoreTransaction) -> ChainResult<()> {
        let batch = self.to_batch(tx)?;
        let ops = batch.len();
        self.storage.write_batch(batch)?;
        debug!(ops, "Committed chain store transaction");
        Ok(())
    }

    async fn all_chain_data(&self) -> ChainResult<Vec<ChainData>> {
        self.storage
            .iter(columns::CHAIN_DATA)?
            .map(|(_, bytes)| ChainData::decode(&bytes).map(|data| data.to_light()))
            .collect()
    }
}
