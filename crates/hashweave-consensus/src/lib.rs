//! # hashweave-consensus
//!
//! Consensus rules for the hashweave chain.
//!
//! This crate provides:
//! - Blake2b hashing and merkle roots
//! - Compact target encoding and hash depth math
//! - The block data model and its canonical encoding
//! - Intrinsic block validation and successor checks
//! - Difficulty retargeting
//! - NIPoPoW superchain predicates, chain proofs and proof comparison
//!
//! ## Targets and depth
//!
//! A target is an unsigned 256-bit integer; a hash meets it when its
//! big-endian value is not above it. The depth of a target is how many
//! powers of two it lies below the network maximum, and the depth of a hash
//! is the depth of the hash read as a target. Blocks whose hash depth exceeds
//! their target depth are superblocks.

pub mod block;
mod difficulty;
mod error;
pub mod hash;
pub mod nipopow;
mod params;
pub mod target;
mod validation;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use block::{Address, Block, BlockBody, BlockHeader, BlockInterlink, Transaction};
pub use difficulty::DifficultyAdjustment;
pub use error::{ConsensusError, ConsensusResult};
pub use hash::{merkle_root, Hash, HASH_SIZE};
pub use nipopow::{BlockChain, ChainProof, HeaderChain, SuperBlockCounts};
pub use params::{ChainParams, ChainParamsConfig, ChainParamsError};
pub use validation::BlockValidator;
