//! # hashweave-storage
//!
//! Storage layer for the hashweave node.
//!
//! The chain engine treats storage as an opaque transactional key-value
//! store. This crate provides that abstraction plus two backends:
//! - [`Database`]: RocksDB with one column family per data type
//! - [`MemoryStorage`]: an in-process map for volatile chains and tests
//!
//! ## Column Families
//!
//! - `ChainData`: per-block chain records indexed by block hash
//! - `MainChain`: main chain index (height -> block hash)
//! - `Accounts`: account balances indexed by address
//! - `Transactions`: hashes of included transactions
//! - `Metadata`: head pointer and other node metadata

mod batch;
mod database;
mod error;
mod memory;

pub use batch::{BatchOperation, OperationKind, WriteBatch};
pub use database::{ColumnFamily, Database};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;

/// Storage trait for abstracting database operations.
///
/// All multi-key mutations go through [`Storage::write_batch`], which must
/// apply the whole batch or nothing.
pub trait Storage: Send + Sync {
    /// Get a value by key from a column family.
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Put a key-value pair into a column family.
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()>;

    /// Delete a key from a column family.
    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()>;

    /// Check if a key exists in a column family.
    fn contains(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<bool> {
        Ok(self.get(cf, key)?.is_some())
    }

    /// Execute a batch of writes atomically.
    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Iterate over a column family in key order.
    fn iter(&self, cf: ColumnFamily) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>>;

    /// Get multiple values by keys from a column family.
    fn multi_get(&self, cf: ColumnFamily, keys: &[&[u8]]) -> StorageResult<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(cf, k)).collect()
    }
}
