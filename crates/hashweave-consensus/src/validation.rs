//! Block validation.
//!
//! `verify` checks everything that can be decided from the block alone.
//! The successor checks relate a block to a given predecessor, either its
//! direct parent or an earlier block it references through its interlink.

use crate::block::{Block, BlockBody, BlockHeader};
use crate::hash::Hash;
use crate::params::ChainParams;
use crate::target::{is_proof_of_work, pow2, target_height};
use crate::{ConsensusError, ConsensusResult};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Validator bound to one network's parameters and genesis block.
#[derive(Debug, Clone)]
pub struct BlockValidator {
    params: Arc<ChainParams>,
    genesis_hash: Hash,
}

impl BlockValidator {
    pub fn new(params: Arc<ChainParams>, genesis_hash: Hash) -> Self {
        Self {
            params,
            genesis_hash,
        }
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    pub fn genesis_hash(&self) -> &Hash {
        &self.genesis_hash
    }

    /// Intrinsic checks, in order: timestamp drift, proof of work, size,
    /// interlink hash, body hash, signatures, one transaction per sender,
    /// no self-sends. `now` is in seconds.
    #[instrument(skip(self, block), fields(height = block.height()))]
    pub fn verify(&self, block: &Block, now: u64) -> ConsensusResult<()> {
        let header = &block.header;

        let max_time = now.saturating_add(self.params.timestamp_drift_max);
        if header.timestamp > max_time {
            return Err(ConsensusError::InvalidTimestamp {
                block_time: header.timestamp,
                max_time,
            });
        }

        self.verify_proof_of_work(header)?;

        let size = block.serialized_size();
        if size > self.params.block_size_max {
            return Err(ConsensusError::BlockTooLarge {
                size,
                max: self.params.block_size_max,
            });
        }

        self.verify_interlink_hash(block)?;

        if let Some(body) = &block.body {
            self.verify_body(header, body)?;
            self.verify_validity_window(header, body)?;
        }

        debug!("Block verification passed");
        Ok(())
    }

    /// Target validity and `hash <= target`.
    pub fn verify_proof_of_work(&self, header: &BlockHeader) -> ConsensusResult<()> {
        let target = header.target();
        if !self.params.is_valid_target(&target) {
            return Err(ConsensusError::InvalidPow(format!(
                "n_bits {:#010x} outside the valid target range",
                header.n_bits
            )));
        }
        if !is_proof_of_work(&header.hash(), &target) {
            return Err(ConsensusError::InvalidPow(format!(
                "hash {} above target",
                header.hash()
            )));
        }
        Ok(())
    }

    fn verify_interlink_hash(&self, block: &Block) -> ConsensusResult<()> {
        // Genesis cannot commit to its own hash.
        if block.height() == 1 && block.header.interlink_hash.is_zero() {
            return Ok(());
        }
        if block.interlink.hash(&self.genesis_hash) != block.header.interlink_hash {
            return Err(ConsensusError::InvalidInterlink(
                "interlink hash mismatch".to_string(),
            ));
        }
        Ok(())
    }

    fn verify_body(&self, header: &BlockHeader, body: &BlockBody) -> ConsensusResult<()> {
        if body.hash() != header.body_hash {
            return Err(ConsensusError::InvalidBlock("body hash mismatch".to_string()));
        }

        for tx in &body.transactions {
            if !tx.verify_signature() {
                return Err(ConsensusError::InvalidTransaction(format!(
                    "bad signature on {}",
                    tx.hash()
                )));
            }
        }

        let mut senders = HashSet::with_capacity(body.transactions.len());
        for tx in &body.transactions {
            if !senders.insert(tx.sender()) {
                return Err(ConsensusError::InvalidTransaction(format!(
                    "more than one transaction from {}",
                    tx.sender()
                )));
            }
        }

        if let Some(tx) = body.transactions.iter().find(|tx| tx.sender() == tx.recipient) {
            return Err(ConsensusError::InvalidTransaction(format!(
                "sender {} equals recipient",
                tx.recipient
            )));
        }

        Ok(())
    }

    /// Every transaction must be inside its validity window at this
    /// block's height.
    fn verify_validity_window(&self, header: &BlockHeader, body: &BlockBody) -> ConsensusResult<()> {
        let window = self.params.transaction_validity_window;
        for tx in &body.transactions {
            let start = tx.validity_start_height;
            if header.height < start || header.height >= start.saturating_add(window) {
                return Err(ConsensusError::InvalidTransaction(format!(
                    "{} valid from height {} for {} blocks, included at {}",
                    tx.hash(),
                    start,
                    window,
                    header.height
                )));
            }
        }
        Ok(())
    }

    /// Header-only parent check, used for dense header chains.
    pub fn is_header_successor_of(
        &self,
        header: &BlockHeader,
        pred: &BlockHeader,
    ) -> ConsensusResult<()> {
        if header.height != pred.height + 1 {
            return Err(not_successor("height"));
        }
        if header.timestamp < pred.timestamp {
            return Err(not_successor("timestamp"));
        }
        if header.prev_hash != pred.hash() {
            return Err(not_successor("prev hash"));
        }
        Ok(())
    }

    /// `block` directly follows `pred`, including the interlink it must
    /// inherit from it.
    pub fn is_immediate_successor_of(&self, block: &Block, pred: &Block) -> ConsensusResult<()> {
        self.is_header_successor_of(&block.header, &pred.header)?;

        let expected = pred.next_interlink(&block.target(), &self.params)?;
        if block.interlink != expected {
            return Err(not_successor("interlink"));
        }
        Ok(())
    }

    /// `block` may legitimately reference `pred` through its interlink.
    pub fn is_interlink_successor_of(&self, block: &Block, pred: &Block) -> ConsensusResult<()> {
        let header = &block.header;
        if header.height <= pred.height() {
            return Err(not_successor("height"));
        }
        if header.timestamp < pred.timestamp() {
            return Err(not_successor("timestamp"));
        }

        let pred_hash = pred.hash();
        if pred_hash != self.genesis_hash {
            let target_height = target_height(&block.target()) as usize;
            let mut found = false;
            for (depth, hash) in block.interlink.hashes().iter().enumerate() {
                if *hash != pred_hash {
                    continue;
                }
                found = true;
                let admitted = depth <= target_height
                    && is_proof_of_work(&pred_hash, &pow2((target_height - depth) as u32));
                if !admitted {
                    return Err(not_successor("invalid position in interlink"));
                }
            }
            if !found {
                return Err(not_successor("not in interlink"));
            }
        }

        if header.prev_hash == pred_hash {
            if header.height != pred.height() + 1 {
                return Err(not_successor("immediate height"));
            }
            let expected = pred.next_interlink(&block.target(), &self.params)?;
            if expected.hash(&self.genesis_hash) != header.interlink_hash {
                return Err(not_successor("immediate interlink"));
            }
        } else if header.height == pred.height() + 1 {
            // Adjacent heights but a different parent.
            return Err(not_successor("immediate height"));
        } else {
            let this_links = block.interlink.hashes();
            let pred_links = pred.interlink.hashes();

            let previous: HashSet<&Hash> = pred_links.iter().collect();
            let new_hashes = this_links
                .iter()
                .filter(|h| !previous.contains(h))
                .collect::<HashSet<_>>()
                .len();
            if new_hashes as u64 > (header.height - pred.height()) as u64 {
                return Err(not_successor("too many new blocks"));
            }

            let depth_diff = self.params.target_depth(&block.target()) as i64
                - self.params.target_depth(&pred.target()) as i64;
            if (this_links.len() as i64) < pred_links.len() as i64 - depth_diff {
                return Err(not_successor("interlink too short"));
            }

            // Once both interlinks agree at some level they must agree on
            // every level above it.
            let mut common = false;
            for i in 1..pred_links.len() {
                let j = i as i64 - depth_diff;
                if j >= this_links.len() as i64 {
                    break;
                }
                if j < 0 {
                    continue;
                }
                if pred_links[i] == this_links[j as usize] {
                    common = true;
                } else if common {
                    return Err(not_successor("invalid common suffix"));
                }
            }
        }

        trace!(height = header.height, pred = pred.height(), "Interlink successor");
        Ok(())
    }

    /// Immediate or interlink successor.
    pub fn is_successor_of(&self, block: &Block, pred: &Block) -> ConsensusResult<()> {
        self.is_immediate_successor_of(block, pred)
            .or_else(|_| self.is_interlink_successor_of(block, pred))
    }
}

fn not_successor(reason: &str) -> ConsensusError {
    ConsensusError::NotSuccessor(reason.to_string())
}
