//! # hashweave-tests
//!
//! Integration tests for the hashweave chain.
//!
//! This crate provides:
//! - Chain fixtures over RocksDB and in-memory storage
//! - Deterministic keys, transfers and multi-branch block trees
//! - Scenario tests for fork choice, rebranching, retargeting and proofs
//! - Property-based tests for arrival-order independence

pub mod generators;
pub mod harness;

#[cfg(test)]
mod sanity_tests;

#[cfg(test)]
mod storage_tests;


#[cfg(test)]
mod proof_tests;

#[cfg(test)]
mod property_tests;

pub use generators::*;
pub use harness::*;
