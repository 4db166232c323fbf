//! Test data generators for integration tests.
//!
//! Deterministic keys and addresses, signed transfers, and block trees
//! mined on top of a shared genesis.

use crate::harness::TestNode;
use ed25519_dalek::SigningKey;
use hashweave_consensus::block::{Address, Transaction};
use hashweave_consensus::{Block, Hash};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashSet;

/// Deterministic signing key for a seed.
pub fn test_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Address owned by [`test_key`] with the same seed.
pub fn key_address(seed: u8) -> Address {
    Address::from_public_key_bytes(&test_key(seed).verifying_key().to_bytes())
}

/// Address nobody holds a key for.
pub fn test_address(seed: u8) -> Address {
    Address::new([seed; 20])
}

/// Transfer signed by the key with `sender_seed`.
pub fn transfer(sender_seed: u8, recipient: Address, value: u64, fee: u64, height: u32) -> Transaction {
    Transaction::new_signed(&test_key(sender_seed), recipient, value, fee, height)
}

/// Blocks mined by independent engines that share a genesis.
#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    pub blocks: Vec<Block>,
}

impl BlockTree {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Order the blocks so every block follows its parent, picking among
    /// the ready ones at random.
    pub fn topological_order(&self, genesis: &Hash, seed: u64) -> Vec<Block> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut known: HashSet<Hash> = HashSet::from([*genesis]);
        let mut pending = self.blocks.clone();
        let mut ordered = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            let ready: Vec<usize> = pending
                .iter()
                .enumerate()
                .filter(|(_, block)| known.contains(block.prev_hash()))
                .map(|(i, _)| i)
                .collect();
            if ready.is_empty() {
                // Parents outside the tree; keep the rest in mined order.
                ordered.append(&mut pending);
                break;
            }
            let pick = ready[rng.gen_range(0..ready.len())];
            let block = pending.remove(pick);
            known.insert(block.hash());
            ordered.push(block);
        }
        ordered
    }
}

/// Shape of a generated fork tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeShape {
    /// Blocks shared by every branch.
    pub trunk: usize,
    /// Length of each branch on top of the trunk.
    pub branches: [usize; 3],
    /// Block spacing of each branch, in seconds.
    pub spacings: [u64; 3],
}

/// Mine a trunk and three competing branches on engines sharing `base`'s
/// genesis. Branches differ by miner, so their blocks never collide.
pub async fn mine_tree(base: &TestNode, shape: TreeShape) -> BlockTree {
    let trunk_node = base.peer().await;
    let trunk = trunk_node.extend_ideal(shape.trunk, test_address(1)).await;

    let mut tree = BlockTree {
        blocks: trunk.clone(),
    };
    for (i, (&length, &spacing)) in shape.branches.iter().zip(&shape.spacings).enumerate() {
        let branch_node = base.peer().await;
        branch_node.push_all(&trunk).await;
        let miner = test_address(10 + i as u8);
        tree.blocks.extend(branch_node.extend(length, miner, spacing).await);
    }
    tree
}
