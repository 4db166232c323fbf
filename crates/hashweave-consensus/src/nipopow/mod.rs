//! Non-interactive proofs of proof-of-work.
//!
//! Every block carries an interlink: for each level above the current
//! target, the most recent ancestor whose hash reached that level. Following
//! interlinks yields the superchains a [`ChainProof`] is sampled from.
//!
//! - [`superchain`]: super block counts and the quality predicates used
//!   when choosing which levels to include.
//! - [`proof`]: the proof containers and their structural verification.
//! - [`verifier`]: proof scoring and best-proof tracking.

pub mod proof;
pub mod superchain;
pub mod verifier;

pub use proof::{BlockChain, ChainProof, HeaderChain, MAX_CHAIN_LEN};
pub use superchain::{
    has_multi_level_quality, has_super_quality, is_good_super_chain, is_locally_good,
    SuperBlockCounts, SuperChainEntry,
};
pub use verifier::{is_better_proof, proof_score, ProofVerificationResult, ProofVerifier};
