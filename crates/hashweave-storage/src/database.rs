//! RocksDB database implementation.

use crate::batch::OperationKind;
use crate::{Storage, StorageError, StorageResult, WriteBatch};
use parking_lot::RwLock;
use rocksdb::{ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Column families for organizing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ColumnFamily {
    /// Chain records (block + cumulative values) indexed by block hash.
    ChainData,
    /// Main chain index (height -> block hash).
    MainChain,
    /// Account balances indexed by address.
    Accounts,
    /// Included transaction hashes (hash -> block height).
    Transactions,
    /// Head pointer and node metadata.
    Metadata,
    /// Default column family (required by RocksDB).
    Default,
}

impl ColumnFamily {
    /// Get the string name of the column family.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::ChainData => "chain_data",
            ColumnFamily::MainChain => "main_chain",
            ColumnFamily::Accounts => "accounts",
            ColumnFamily::Transactions => "transactions",
            ColumnFamily::Metadata => "metadata",
            ColumnFamily::Default => "default",
        }
    }

    /// Get all column families.
    pub fn all() -> &'static [ColumnFamily] {
        &[
            ColumnFamily::ChainData,
            ColumnFamily::MainChain,
            ColumnFamily::Accounts,
            ColumnFamily::Transactions,
            ColumnFamily::Metadata,
            ColumnFamily::Default,
        ]
    }
}

/// RocksDB database wrapper.
pub struct Database {
    db: Arc<RwLock<DBWithThreadMode<MultiThreaded>>>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref();
        info!("Opening database at {:?}", path);

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(256);
        opts.set_keep_log_file_num(1);
        opts.set_max_total_wal_size(64 * 1024 * 1024);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ColumnFamily::all()
            .iter()
            .map(|cf| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                ColumnFamilyDescriptor::new(cf.name(), cf_opts)
            })
            .collect();

        let db =
            DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(&opts, path, cf_descriptors)?;

        debug!("Database opened successfully");

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
        })
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> StorageResult<()> {
        let db = self.db.read();
        for cf in ColumnFamily::all() {
            if let Some(handle) = db.cf_handle(cf.name()) {
                db.flush_cf(&handle)?;
            }
        }
        Ok(())
    }
}

fn missing_cf(cf: ColumnFamily) -> StorageError {
    StorageError::ColumnFamilyNotFound(cf.name().to_string())
}

impl Storage for Database {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let db = self.db.read();
        let handle = db.cf_handle(cf.name()).ok_or_else(|| missing_cf(cf))?;
        Ok(db.get_cf(&handle, key)?)
    }

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let db = self.db.read();
        let handle = db.cf_handle(cf.name()).ok_or_else(|| missing_cf(cf))?;
        db.put_cf(&handle, key, value)?;
        Ok(())
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()> {
        let db = self.db.read();
        let handle = db.cf_handle(cf.name()).ok_or_else(|| missing_cf(cf))?;
        db.delete_cf(&handle, key)?;
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        let db = self.db.read();
        let mut rocks_batch = rocksdb::WriteBatch::default();

        for op in batch.into_operations() {
            let handle = db.cf_handle(op.cf.name()).ok_or_else(|| missing_cf(op.cf))?;
            match op.kind {
                OperationKind::Put { value } => rocks_batch.put_cf(&handle, &op.key, &value),
                OperationKind::Delete => rocks_batch.delete_cf(&handle, &op.key),
            }
        }

        db.write(rocks_batch)?;
        Ok(())
    }

    fn iter(
        &self,
        cf: ColumnFamily,
    ) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>> {
        let db = self.db.read();
        let handle = db.cf_handle(cf.name()).ok_or_else(|| missing_cf(cf))?;

        // The iterator borrows the read guard, so entries are collected first.
        let mut collected = Vec::new();
        for entry in db.iterator_cf(&handle, rocksdb::IteratorMode::Start) {
            let (k, v) = entry?;
            collected.push((k.to_vec(), v.to_vec()));
        }

        Ok(Box::new(collected.into_iter()))
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
        }
    }
}
