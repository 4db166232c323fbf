//! NIPoPoW chain proof construction from stored chain data.
//!
//! The prefix is the union of superchains extracted by following interlink
//! pointers from the block `k` below the head, descending one level at a
//! time; every level that is of good quality moves the lower bound up to
//! its `m`-th last block. The suffix is the dense header chain of the last
//! `k` blocks.

use crate::store::ChainDataStore;
use crate::{ChainData, ChainError, ChainResult};
use hashweave_consensus::nipopow::is_good_super_chain;
use hashweave_consensus::{Block, BlockChain, ChainParams, ChainProof, Hash, HeaderChain};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct ChainProver {
    store: Arc<dyn ChainDataStore>,
    params: Arc<ChainParams>,
    genesis: ChainData,
}

impl ChainProver {
    pub fn new(store: Arc<dyn ChainDataStore>, params: Arc<ChainParams>, genesis: ChainData) -> Self {
        Self {
            store,
            params,
            genesis,
        }
    }

    /// Proof for the main chain ending at `head`.
    pub async fn prove(&self, head: &ChainData) -> ChainResult<ChainProof> {
        let m = self.params.nipopow_m;
        let k = self.params.nipopow_k;
        let delta = self.params.nipopow_delta;

        let suffix_start = head.height().saturating_sub(k).max(1);
        let anchor = self
            .store
            .get_chain_data_at(suffix_start)
            .await?
            .ok_or_else(|| ChainError::Corrupted(format!("no main chain block at height {}", suffix_start)))?;
        let max_depth = anchor.super_block_counts.candidate_depth(m);

        let mut prefix = BlockChain::default();
        let mut start_height = 1;
        for depth in (0..=max_depth).rev() {
            let alpha = self.super_chain(depth, &anchor, start_height).await?;
            let level = BlockChain::new(alpha.iter().map(|data| data.block.clone()).collect())?;
            prefix = BlockChain::merge(&prefix, &level)?;

            let boundary = alpha
                .len()
                .checked_sub(m as usize)
                .and_then(|index| alpha.get(index));
            if let (true, Some(boundary)) = (is_good_super_chain(&alpha, depth, m, delta), boundary) {
                start_height = boundary.height();
                trace!(
                    depth,
                    length = alpha.len(),
                    start_height,
                    "Good superchain"
                );
            }
        }

        let suffix = self.header_chain(head.height() - anchor.height(), &head.block).await?;
        debug!(
            height = head.height(),
            prefix = prefix.len(),
            suffix = suffix.len(),
            "Built chain proof"
        );
        Ok(ChainProof::new(prefix, suffix)?)
    }

    /// Light records of the level-`depth` superchain from `head` down to
    /// `tail_height`, ascending. Ends at genesis when `tail_height` is 1.
    pub async fn super_chain(
        &self,
        depth: u32,
        head: &ChainData,
        tail_height: u32,
    ) -> ChainResult<Vec<ChainData>> {
        let depth = depth as i32;
        let mut chain = Vec::new();
        if self.params.hash_depth(&head.hash()) >= depth {
            chain.push(head.to_light());
        }

        let mut current = head.to_light();
        let mut j = self.interlink_index(&current.block, depth);
        while j < current.block.interlink.len() as i32 && current.height() > tail_height {
            let reference = if j < 0 {
                *current.block.prev_hash()
            } else {
                current.block.interlink.hashes()[j as usize]
            };
            match self.store.get_chain_data(&reference).await? {
                Some(data) => current = data.to_light(),
                None => {
                    warn!(%reference, depth, "Superchain reference missing, truncating");
                    break;
                }
            }
            chain.push(current.clone());
            j = self.interlink_index(&current.block, depth);
        }

        if tail_height == 1 && chain.last().map_or(true, |last| last.height() > 1) {
            chain.push(self.genesis.to_light());
        }
        chain.reverse();
        Ok(chain)
    }

    fn interlink_index(&self, block: &Block, depth: i32) -> i32 {
        (depth - self.params.target_depth(&block.target())).max(-1)
    }

    /// Headers of the `length` blocks ending at `head`, ascending.
    pub async fn header_chain(&self, length: u32, head: &Block) -> ChainResult<HeaderChain> {
        let mut headers = Vec::with_capacity(length as usize);
        let mut block = Some(head.clone());
        while let Some(current) = block {
            if headers.len() >= length as usize {
                break;
            }
            block = self
                .store
                .get_chain_data(current.prev_hash())
                .await?
                .map(|data| data.block);
            headers.push(current.header);
        }
        headers.reverse();
        Ok(HeaderChain::new(headers)?)
    }

    /// Interlink path from `known` down to `to_prove`, ascending and
    /// starting with `to_prove`. `None` if the interlinks do not lead there.
    pub async fn block_proof(&self, to_prove: &Block, known: &Block) -> ChainResult<Option<BlockChain>> {
        let hash_to_prove = to_prove.hash();
        if known.height() <= to_prove.height() {
            return Ok(None);
        }

        let prove_depth = self.params.hash_depth(&hash_to_prove);
        let mut depth =
            self.params.target_depth(&known.target()) + known.interlink.len() as i32 - 1;
        let mut block = known.clone();
        let mut blocks = Vec::new();

        let mut reference = self.interlink_reference(&block, depth);
        while reference != hash_to_prove {
            let Some(next) = self.store.get_chain_data(&reference).await?.map(|d| d.block) else {
                warn!(%reference, "Block missing while building inclusion proof");
                return Ok(None);
            };

            if next.height() < to_prove.height() {
                // Stepped past the target at this level; retry one level lower.
                if depth <= prove_depth {
                    return Ok(None);
                }
                depth -= 1;
                reference = self.interlink_reference(&block, depth);
            } else if next.height() > to_prove.height() {
                blocks.push(next.to_light());
                block = next;
                reference = self.interlink_reference(&block, depth);
            } else {
                warn!(
                    %hash_to_prove,
                    other = %reference,
                    "Different block at the height to prove"
                );
                return Ok(None);
            }
        }

        blocks.push(to_prove.to_light());
        blocks.reverse();
        Ok(Some(BlockChain::new(blocks)?))
    }

    fn interlink_reference(&self, block: &Block, depth: i32) -> Hash {
        let index = (depth - self.params.target_depth(&block.target()))
            .min(block.interlink.len() as i32 - 1);
        if index < 0 {
            *block.prev_hash()
        } else {
            block.interlink.hashes()[index as usize]
        }
    }
}
