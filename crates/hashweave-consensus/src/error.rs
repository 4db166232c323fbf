//! Error types for consensus validation.

use thiserror::Error;

/// Consensus validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// Header hash does not satisfy the declared target.
    #[error("Invalid PoW: {0}")]
    InvalidPow(String),

    /// Invalid block header.
    #[error("Invalid block header: {0}")]
    InvalidHeader(String),

    /// Invalid block structure.
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    /// Invalid transaction.
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Timestamp too far in the future.
    #[error("Invalid timestamp: block {block_time}, max allowed {max_time}")]
    InvalidTimestamp { block_time: u64, max_time: u64 },

    /// Declared difficulty differs from the retargeted one.
    #[error("Invalid difficulty: got {got:#010x}, expected {expected:#010x}")]
    InvalidDifficulty { got: u32, expected: u32 },

    /// Block too large.
    #[error("Block too large: {size} bytes, max {max} bytes")]
    BlockTooLarge { size: usize, max: usize },

    /// Interlink or interlink hash is inconsistent.
    #[error("Invalid interlink: {0}")]
    InvalidInterlink(String),

    /// Block is not a valid successor of the given predecessor.
    #[error("Not a successor: {0}")]
    NotSuccessor(String),

    /// Malformed or inconsistent chain proof.
    #[error("Invalid chain proof: {0}")]
    InvalidProof(String),

    /// Canonical decoding failed.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Generic validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
