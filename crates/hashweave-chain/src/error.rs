//! Error types for the chain engine and the accounts state.

use hashweave_consensus::block::Address;
use hashweave_consensus::{ConsensusError, Hash};
use thiserror::Error;

/// Chain engine errors.
///
/// Expected rejections of a pushed block are not errors; they are reported
/// through [`crate::PushOutcome`]. These variants are failures of the node
/// itself.
#[derive(Error, Debug)]
pub enum ChainError {
    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] hashweave_storage::StorageError),

    /// Consensus error outside of block validation.
    #[error("Consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    /// Accounts state error.
    #[error("Accounts error: {0}")]
    Accounts(#[from] AccountsError),

    /// A block the engine needed is not in the store.
    #[error("Missing chain data for block {0}")]
    MissingChainData(Hash),

    /// An invariant the engine relies on does not hold for the stored data.
    #[error("Chain store corrupted: {0}")]
    Corrupted(String),

    /// Stored record could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Genesis block does not match the stored chain or the parameters.
    #[error("Genesis error: {0}")]
    Genesis(String),

    /// The mutation queue worker is gone.
    #[error("Mutation queue closed")]
    QueueClosed,
}

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Accounts state errors.
#[derive(Error, Debug)]
pub enum AccountsError {
    #[error("Storage error: {0}")]
    Storage(#[from] hashweave_storage::StorageError),

    /// A sender cannot cover value plus fee.
    #[error("Insufficient funds in {address}: balance {balance}, needed {needed}")]
    InsufficientFunds {
        address: Address,
        balance: u64,
        needed: u64,
    },

    /// A block lists an account for pruning that still holds funds.
    #[error("Cannot prune non-empty account {0}")]
    PrunedAccountNotEmpty(Address),

    /// The transaction was already included on this chain.
    #[error("Transaction {0} already included")]
    DuplicateTransaction(Hash),

    /// A block body is required to apply a block.
    #[error("Block {0} has no body")]
    MissingBody(Hash),

    /// Balance arithmetic overflowed.
    #[error("Balance overflow in {0}")]
    Overflow(Address),

    /// Reverting a block would produce a state that never existed.
    #[error("Inconsistent accounts state: {0}")]
    InconsistentState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for accounts operations.
pub type AccountsResult<T> = Result<T, AccountsError>;
