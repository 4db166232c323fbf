//! Chain proof comparison and verification.
//!
//! Proofs are compared on the part of their prefixes above the lowest
//! common ancestor: the side holding more superchain work there wins, with
//! the suffix difficulty as tie breaker.

use super::proof::{BlockChain, ChainProof};
use crate::block::Block;
use crate::params::ChainParams;
use crate::target::pow2;
use crate::validation::BlockValidator;
use crate::{ConsensusError, ConsensusResult};
use num_bigint::BigUint;
use tracing::{debug, info, warn};

/// Superchain score of `chain` above `lca`: `2^μ · |C↑μ|`, maximised over
/// the levels at or below the deepest one with at least `m` blocks.
pub fn proof_score(chain: &BlockChain, lca: &Block, m: u32, params: &ChainParams) -> BigUint {
    let mut counts: Vec<u64> = Vec::new();
    for block in chain.blocks() {
        if block.height() < lca.height() {
            continue;
        }
        let depth = params.hash_depth(&block.hash()).max(0) as usize;
        if counts.len() <= depth {
            counts.resize(depth + 1, 0);
        }
        counts[depth] += 1;
    }

    let mut sum = 0u64;
    let mut depth = counts.len() as i64 - 1;
    while sum < m as u64 && depth >= 0 {
        sum += counts[depth as usize];
        depth -= 1;
    }

    let mut max_score = pow2((depth + 1) as u32) * sum;
    let mut length = sum;
    while depth >= 0 {
        length += counts[depth as usize];
        let score = pow2(depth as u32) * length;
        if score > max_score {
            max_score = score;
        }
        depth -= 1;
    }
    max_score
}

/// Whether `a` proves more work than `b`.
pub fn is_better_proof(
    a: &ChainProof,
    b: &ChainProof,
    m: u32,
    params: &ChainParams,
) -> ConsensusResult<bool> {
    let lca = BlockChain::lowest_common_ancestor(a.prefix(), b.prefix()).ok_or_else(|| {
        ConsensusError::InvalidProof("proofs share no common ancestor".to_string())
    })?;
    let score_a = proof_score(a.prefix(), lca, m, params);
    let score_b = proof_score(b.prefix(), lca, m, params);
    debug!(
        lca = lca.height(),
        score_a = %score_a,
        score_b = %score_b,
        "Comparing chain proofs"
    );

    if score_a == score_b {
        Ok(a.suffix().total_difficulty(params) > b.suffix().total_difficulty(params))
    } else {
        Ok(score_a > score_b)
    }
}

/// Outcome of [`ProofVerifier::process`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofVerificationResult {
    /// The proof is valid and now the best known one.
    BetterChain { proofs_processed: u32 },
    /// The proof is valid but does not beat the current best.
    NoBetterChain { proofs_processed: u32 },
    ValidationError { message: String },
    /// The prefix starts at a different genesis block.
    WrongGenesis,
}

/// Tracks the best chain proof received so far.
#[derive(Debug)]
pub struct ProofVerifier {
    validator: BlockValidator,
    best_proof: Option<ChainProof>,
    proofs_processed: u32,
}

impl ProofVerifier {
    pub fn new(validator: BlockValidator) -> Self {
        Self {
            validator,
            best_proof: None,
            proofs_processed: 0,
        }
    }

    pub fn best_proof(&self) -> Option<&ChainProof> {
        self.best_proof.as_ref()
    }

    pub fn best_height(&self) -> Option<u32> {
        self.best_proof.as_ref().map(|p| p.head().height)
    }

    pub fn proofs_processed(&self) -> u32 {
        self.proofs_processed
    }

    pub fn process(&mut self, proof: ChainProof) -> ProofVerificationResult {
        self.proofs_processed += 1;

        if let Some(tail) = proof.prefix().tail() {
            if tail.hash() != *self.validator.genesis_hash() {
                warn!(
                    expected = %self.validator.genesis_hash(),
                    got = %tail.hash(),
                    "Chain proof has wrong genesis"
                );
                return ProofVerificationResult::WrongGenesis;
            }
        }

        if let Err(e) = proof.verify(&self.validator) {
            warn!(error = %e, "Invalid chain proof");
            return ProofVerificationResult::ValidationError {
                message: e.to_string(),
            };
        }

        let is_better = match &self.best_proof {
            None => {
                info!(height = proof.head().height, "First chain proof received");
                true
            }
            Some(best) => {
                let params = self.validator.params();
                match is_better_proof(&proof, best, params.nipopow_m, params) {
                    Ok(true) => {
                        info!(
                            old_height = best.head().height,
                            new_height = proof.head().height,
                            "Found better chain proof"
                        );
                        true
                    }
                    Ok(false) => {
                        debug!(
                            best_height = best.head().height,
                            proof_height = proof.head().height,
                            "Chain proof not better than current"
                        );
                        false
                    }
                    Err(e) => {
                        return ProofVerificationResult::ValidationError {
                            message: e.to_string(),
                        };
                    }
                }
            }
        };

        if is_better {
            self.best_proof = Some(proof);
            ProofVerificationResult::BetterChain {
                proofs_processed: self.proofs_processed,
            }
        } else {
            ProofVerificationResult::NoBetterChain {
                proofs_processed: self.proofs_processed,
            }
        }
    }

    pub fn reset(&mut self) {
        self.best_proof = None;
        self.proofs_processed = 0;
    }
}
