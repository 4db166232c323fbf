//! Write batch for atomic operations.
//!
//! A batch collects puts and deletes from several writers (chain records,
//! head pointer, account balances) so they land in one atomic write.
//! Operations are applied in insertion order; a later operation on the same
//! key wins.

use crate::ColumnFamily;

/// Kind of batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// Put a key-value pair.
    Put { value: Vec<u8> },
    /// Delete a key.
    Delete,
}

/// A single batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOperation {
    /// Target column family.
    pub cf: ColumnFamily,
    /// Key to operate on.
    pub key: Vec<u8>,
    /// Kind of operation.
    pub kind: OperationKind,
}

/// A batch of write operations to be executed atomically.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    operations: Vec<BatchOperation>,
}

impl WriteBatch {
    /// Create a new empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a put operation to the batch.
    pub fn put(&mut self, cf: ColumnFamily, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.operations.push(BatchOperation {
            cf,
            key: key.into(),
            kind: OperationKind::Put {
                value: value.into(),
            },
        });
    }

    /// Add a delete operation to the batch.
    pub fn delete(&mut self, cf: ColumnFamily, key: impl Into<Vec<u8>>) {
        self.operations.push(BatchOperation {
            cf,
            key: key.into(),
            kind: OperationKind::Delete,
        });
    }

    /// Number of operations in the batch.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Append all operations of `other` after the ones already queued.
    pub fn merge(&mut self, other: WriteBatch) {
        self.operations.extend(other.operations);
    }

    /// Operations in application order.
    pub fn operations(&self) -> &[BatchOperation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<BatchOperation> {
        self.operations
    }
}
