//! Accounts state consumed by the chain engine.
//!
//! The engine only needs `hash`, block commit/revert and an isolated
//! transaction whose writes can be committed together with its own.
//! [`StoredAccounts`] is the implementation used by the node: balances plus
//! an index of included transactions that rejects replays.

use crate::{columns, AccountsError, AccountsResult};
use async_trait::async_trait;
use hashweave_consensus::block::Address;
use hashweave_consensus::{merkle_root, Block, Hash};
use hashweave_storage::{Storage, WriteBatch};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// Transactional accounts state.
#[async_trait]
pub trait AccountsState: Send + Sync {
    /// Commitment to the current state.
    async fn hash(&self) -> AccountsResult<Hash>;

    /// Open an isolated view. Dropping it without committing its batch
    /// aborts it.
    async fn transaction(&self) -> AccountsResult<Box<dyn AccountsTransaction>>;
}

/// Isolated view over an [`AccountsState`].
#[async_trait]
pub trait AccountsTransaction: Send {
    async fn commit_block(&mut self, block: &Block) -> AccountsResult<()>;

    async fn revert_block(&mut self, block: &Block) -> AccountsResult<()>;

    async fn hash(&self) -> AccountsResult<Hash>;

    /// Staged writes, to be applied in the same atomic write as the chain
    /// data they belong to.
    fn into_batch(self: Box<Self>) -> WriteBatch;
}

/// Whether an accounts error means the block itself is unacceptable rather
/// than the node failing.
pub(crate) fn is_rejection(error: &AccountsError) -> bool {
    matches!(
        error,
        AccountsError::InsufficientFunds { .. }
            | AccountsError::PrunedAccountNotEmpty(_)
            | AccountsError::DuplicateTransaction(_)
            | AccountsError::MissingBody(_)
            | AccountsError::Overflow(_)
    )
}

/// Account balances in the `Accounts` column of a [`Storage`], and the
/// hashes of included transactions in the `Transactions` column.
///
/// Accounts with a zero balance are not stored. A transaction hash stays
/// in the index until the block including it is reverted.
pub struct StoredAccounts {
    storage: Arc<dyn Storage>,
    block_reward: u64,
}

impl StoredAccounts {
    pub fn new(storage: Arc<dyn Storage>, block_reward: u64) -> Self {
        Self {
            storage,
            block_reward,
        }
    }

    pub fn balance(&self, address: &Address) -> AccountsResult<u64> {
        read_balance(self.storage.as_ref(), address)
    }

    fn staged(&self) -> StagedAccounts {
        StagedAccounts::new(self.storage.clone(), self.block_reward)
    }
}

#[async_trait]
impl AccountsState for StoredAccounts {
    async fn hash(&self) -> AccountsResult<Hash> {
        self.staged().state_hash()
    }

    async fn transaction(&self) -> AccountsResult<Box<dyn AccountsTransaction>> {
        Ok(Box::new(self.staged()))
    }
}

/// Balance and transaction index changes layered over the stored state.
pub(crate) struct StagedAccounts {
    storage: Arc<dyn Storage>,
    block_reward: u64,
    changes: BTreeMap<Address, u64>,
    /// `Some(height)` adds a transaction hash, `None` removes it.
    included: BTreeMap<Hash, Option<u32>>,
    /// Stored balances, read once per view on the first hash.
    stored: Mutex<Option<Arc<BTreeMap<Address, u64>>>>,
}

impl StagedAccounts {
    fn new(storage: Arc<dyn Storage>, block_reward: u64) -> Self {
        Self {
            storage,
            block_reward,
            changes: BTreeMap::new(),
            included: BTreeMap::new(),
            stored: Mutex::new(None),
        }
    }

    /// Empty state that only ever sees staged changes.
    pub(crate) fn detached(block_reward: u64) -> Self {
        Self::new(Arc::new(hashweave_storage::MemoryStorage::new()), block_reward)
    }

    fn is_included(&self, hash: &Hash) -> AccountsResult<bool> {
        match self.included.get(hash) {
            Some(staged) => Ok(staged.is_some()),
            None => Ok(self.storage.contains(columns::TRANSACTIONS, hash.as_bytes())?),
        }
    }

    fn balance(&self, address: &Address) -> AccountsResult<u64> {
        match self.changes.get(address) {
            Some(balance) => Ok(*balance),
            None => read_balance(self.storage.as_ref(), address),
        }
    }

    fn credit(&mut self, address: &Address, amount: u64) -> AccountsResult<()> {
        let balance = self
            .balance(address)?
            .checked_add(amount)
            .ok_or(AccountsError::Overflow(*address))?;
        self.changes.insert(*address, balance);
        Ok(())
    }

    fn debit(&mut self, address: &Address, amount: u64) -> AccountsResult<()> {
        let balance = self.balance(address)?;
        let remaining = balance
            .checked_sub(amount)
            .ok_or(AccountsError::InsufficientFunds {
                address: *address,
                balance,
                needed: amount,
            })?;
        self.changes.insert(*address, remaining);
        Ok(())
    }

    pub(crate) fn apply(&mut self, block: &Block) -> AccountsResult<()> {
        let body = block
            .body
            .as_ref()
            .ok_or_else(|| AccountsError::MissingBody(block.hash()))?;

        let mut fees = 0u64;
        for tx in &body.transactions {
            let hash = tx.hash();
            if self.is_included(&hash)? {
                return Err(AccountsError::DuplicateTransaction(hash));
            }
            self.included.insert(hash, Some(block.height()));

            let total = tx
                .value
                .checked_add(tx.fee)
                .ok_or(AccountsError::Overflow(tx.sender()))?;
            self.debit(&tx.sender(), total)?;
            self.credit(&tx.recipient, tx.value)?;
            fees = fees
                .checked_add(tx.fee)
                .ok_or(AccountsError::Overflow(body.miner))?;
        }
        let reward = self
            .block_reward
            .checked_add(fees)
            .ok_or(AccountsError::Overflow(body.miner))?;
        self.credit(&body.miner, reward)?;

        for address in &body.pruned_accounts {
            if self.balance(address)? != 0 {
                return Err(AccountsError::PrunedAccountNotEmpty(*address));
            }
        }
        trace!(height = block.height(), txs = body.transactions.len(), "Applied block to accounts");
        Ok(())
    }

    fn unapply(&mut self, block: &Block) -> AccountsResult<()> {
        let body = block
            .body
            .as_ref()
            .ok_or_else(|| AccountsError::MissingBody(block.hash()))?;
        let inconsistent = |e: AccountsError| {
            AccountsError::InconsistentState(format!(
                "reverting block at height {}: {}",
                block.height(),
                e
            ))
        };

        let fees = body
            .transactions
            .iter()
            .try_fold(0u64, |sum, tx| sum.checked_add(tx.fee))
            .ok_or(AccountsError::Overflow(body.miner))?;
        let reward = self
            .block_reward
            .checked_add(fees)
            .ok_or(AccountsError::Overflow(body.miner))?;
        self.debit(&body.miner, reward).map_err(inconsistent)?;

        for tx in body.transactions.iter().rev() {
            self.debit(&tx.recipient, tx.value).map_err(inconsistent)?;
            let total = tx
                .value
                .checked_add(tx.fee)
                .ok_or(AccountsError::Overflow(tx.sender()))?;
            self.credit(&tx.sender(), total)?;
            self.included.insert(tx.hash(), None);
        }
        Ok(())
    }

    fn stored_balances(&self) -> AccountsResult<Arc<BTreeMap<Address, u64>>> {
        let mut cached = self.stored.lock();
        if let Some(balances) = cached.as_ref() {
            return Ok(balances.clone());
        }
        let mut balances = BTreeMap::new();
        for (key, value) in self.storage.iter(columns::ACCOUNTS)? {
            let address = Address::from_slice(&key)
                .ok_or_else(|| AccountsError::Serialization("bad account key".to_string()))?;
            balances.insert(address, decode_balance(&value)?);
        }
        let balances = Arc::new(balances);
        *cached = Some(balances.clone());
        Ok(balances)
    }

    /// Merkle root over `address || balance` of every non-empty account,
    /// in address order.
    ///
    /// Linear in the number of accounts. The stored column is scanned once
    /// per view; later calls only merge the staged changes.
    pub(crate) fn state_hash(&self) -> AccountsResult<Hash> {
        let stored = self.stored_balances()?;
        let mut balances: BTreeMap<&Address, u64> =
            stored.iter().map(|(address, balance)| (address, *balance)).collect();
        for (address, balance) in &self.changes {
            balances.insert(address, *balance);
        }

        let leaves: Vec<Vec<u8>> = balances
            .iter()
            .filter(|(_, balance)| **balance > 0)
            .map(|(address, balance)| {
                let mut leaf = address.as_bytes().to_vec();
                leaf.extend_from_slice(&balance.to_be_bytes());
                leaf
            })
            .collect();
        Ok(merkle_root(&leaves))
    }

    fn batch(&self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (address, balance) in &self.changes {
            if *balance == 0 {
                batch.delete(columns::ACCOUNTS, address.as_bytes().to_vec());
            } else {
                batch.put(
                    columns::ACCOUNTS,
                    address.as_bytes().to_vec(),
                    balance.to_be_bytes().to_vec(),
                );
            }
        }
        for (hash, height) in &self.included {
            match height {
                Some(height) => batch.put(
                    columns::TRANSACTIONS,
                    hash.as_bytes().to_vec(),
                    height.to_be_bytes().to_vec(),
                ),
                None => batch.delete(columns::TRANSACTIONS, hash.as_bytes().to_vec()),
            }
        }
        batch
    }
}

#[async_trait]
impl AccountsTransaction for StagedAccounts {
    async fn commit_block(&mut self, block: &Block) -> AccountsResult<()> {
        // Apply on a copy so a failing block leaves the view unchanged.
        let snapshot = (self.changes.clone(), self.included.clone());
        let result = self.apply(block);
        if result.is_err() {
            (self.changes, self.included) = snapshot;
        }
        result
    }

    async fn revert_block(&mut self, block: &Block) -> AccountsResult<()> {
        let snapshot = (self.changes.clone(), self.included.clone());
        let result = self.unapply(block);
        if result.is_err() {
            (self.changes, self.included) = snapshot;
        }
        result
    }

    async fn hash(&self) -> AccountsResult<Hash> {
        self.state_hash()
    }

    fn into_batch(self: Box<Self>) -> WriteBatch {
        self.batch()
    }
}

fn read_balance(storage: &dyn Storage, address: &Address) -> AccountsResult<u64> {
    match storage.get(columns::ACCOUNTS, address.as_bytes())? {
        Some(bytes) => decode_balance(&bytes),
        None => Ok(0),
    }
}

fn decode_balance(bytes: &[u8]) -> AccountsResult<u64> {
    let bytes: [u8; 8] = bytes
        .try_into()
        .map_err(|_| AccountsError::Serialization("bad balance length".to_string()))?;
    Ok(u64::from_be_bytes(bytes))
}
