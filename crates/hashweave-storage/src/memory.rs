//! Volatile in-memory storage.

use crate::batch::OperationKind;
use crate::{ColumnFamily, Storage, StorageError, StorageResult, WriteBatch};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

type Key = (ColumnFamily, Vec<u8>);

/// In-memory [`Storage`] backend.
///
/// Batches are applied under a single write lock, so readers never observe
/// a half-applied batch. Writes can be made to fail on demand to exercise
/// abort paths.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<Key, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with an I/O error until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of keys stored in a column family.
    pub fn len(&self, cf: ColumnFamily) -> usize {
        self.entries.read().keys().filter(|(c, _)| *c == cf).count()
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "writes disabled",
            )));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(&(cf, key.to_vec())).cloned())
    }

    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        self.entries.write().insert((cf, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, cf: ColumnFamily, key: &[u8]) -> StorageResult<()> {
        self.check_writable()?;
        self.entries.write().remove(&(cf, key.to_vec()));
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        self.check_writable()?;
        let mut entries = self.entries.write();
        for op in batch.into_operations() {
            match op.kind {
                OperationKind::Put { value } => {
                    entries.insert((op.cf, op.key), value);
                }
                OperationKind::Delete => {
                    entries.remove(&(op.cf, op.key));
                }
            }
        }
        Ok(())
    }

    fn iter(
        &self,
        cf: ColumnFamily,
    ) -> StorageResult<Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + '_>> {
        let collected: Vec<_> = self
            .entries
            .read()
            .range((cf, Vec::new())..)
            .take_while(|((c, _), _)| *c == cf)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(collected.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_is_all_or_nothing_when_writes_fail() {
        let storage = MemoryStorage::new();
        storage.put(ColumnFamily::Metadata, b"head", b"h0").unwrap();
        storage.set_fail_writes(true);

        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::ChainData, b"h1", b"r1");
        batch.put(ColumnFamily::Metadata, b"head", b"h1");
        assert!(storage.write_batch(batch).is_err());

        assert_eq!(
            storage.get(ColumnFamily::Metadata, b"head").unwrap(),
            Some(b"h0".to_vec())
        );
        assert_eq!(storage.len(ColumnFamily::ChainData), 0);
    }

    #[test]
    fn test_iter_stays_within_column_family() {
        let storage = MemoryStorage::new();
        storage.put(ColumnFamily::ChainData, b"x", b"1").unwrap();
        storage.put(ColumnFamily::Accounts, b"b", b"2").unwrap();
        storage.put(ColumnFamily::Accounts, b"a", b"3").unwrap();
        storage.put(ColumnFamily::Metadata, b"a", b"4").unwrap();

        let accounts: Vec<_> = storage.iter(ColumnFamily::Accounts).unwrap().collect();
        assert_eq!(
            accounts,
            vec![
                (b"a".to_vec(), b"3".to_vec()),
                (b"b".to_vec(), b"2".to_vec())
            ]
        );
    }

    #[test]
    fn test_later_batch_operation_wins() {
        let storage = MemoryStorage::new();
        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::Accounts, b"a", b"1");
        batch.delete(ColumnFamily::Accounts, b"a");
        batch.put(ColumnFamily::Accounts, b"b", b"1");
        batch.put(ColumnFamily::Accounts, b"b", b"2");
        storage.write_batch(batch).unwrap();

        assert!(!storage.contains(ColumnFamily::Accounts, b"a").unwrap());
        assert_eq!(
            storage.get(ColumnFamily::Accounts, b"b").unwrap(),
            Some(b"2".to_vec())
        );
    }
}
