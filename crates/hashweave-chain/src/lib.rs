//! # hashweave-chain
//!
//! Chain selection and fork resolution for the hashweave node.
//!
//! This crate provides:
//! - The chain extension engine ([`Blockchain`]): extend, fork, rebranch
//! - Chain data persistence through the [`ChainDataStore`] trait
//! - The accounts state consumed by the engine ([`AccountsState`])
//! - NIPoPoW chain proofs built from the interlink structure
//! - Genesis construction and a block producer for devnets
//!
//! ## Architecture
//!
//! All mutations of a [`Blockchain`] pass through a FIFO [`MutationQueue`]
//! and commit chain data, head pointer and accounts changes in a single
//! storage write. Reads go straight to the store.

mod accounts;
mod chain;
mod chain_data;
mod error;
mod events;
mod genesis;
mod interlink_index;
mod producer;
mod prover;
mod queue;
mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use accounts::{AccountsState, AccountsTransaction, StoredAccounts};
pub use chain::{BlockCounters, Blockchain, PruningConfig, PushOutcome, MAX_LOCATORS};
pub use chain_data::ChainData;
pub use error::{AccountsError, AccountsResult, ChainError, ChainResult};
pub use events::{ChainEvent, ChainEvents};
pub use genesis::GenesisBuilder;
pub use interlink_index::InterlinkIndex;
pub use producer::{mine, BlockProducer};
pub use prover::ChainProver;
pub use queue::MutationQueue;
pub use store::{ChainDataStore, ChainStoreTransaction, ChainWrite, KvChainStore};

use hashweave_storage::ColumnFamily;

/// Column families used by the chain.
pub mod columns {
    use super::ColumnFamily;

    /// Block hash -> chain data record.
    pub const CHAIN_DATA: ColumnFamily = ColumnFamily::ChainData;
    /// Height -> main chain block hash.
    pub const MAIN_CHAIN: ColumnFamily = ColumnFamily::MainChain;
    /// Address -> balance.
    pub const ACCOUNTS: ColumnFamily = ColumnFamily::Accounts;
    /// Transaction hash -> height of the main chain block including it.
    pub const TRANSACTIONS: ColumnFamily = ColumnFamily::Transactions;
    /// Head pointer.
    pub const METADATA: ColumnFamily = ColumnFamily::Metadata;
}
