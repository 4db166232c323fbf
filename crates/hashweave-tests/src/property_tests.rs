//! Property-based tests using proptest.
//!
//! Chain level cases mine real blocks on devnet parameters, so their case
//! counts are kept small.

use crate::generators::{mine_tree, test_address, TreeShape};
use crate::harness::TestNode;
use hashweave_chain::{AccountsState, PushOutcome};
use hashweave_consensus::block::{BlockHeader, BlockInterlink};
use hashweave_consensus::target::{compact_to_target, target_to_compact};
use hashweave_consensus::{Block, BlockChain, ChainParams, Hash};
use num_bigint::BigUint;
use proptest::prelude::*;
use std::cmp::Reverse;
use std::collections::BTreeSet;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

/// Valid targets for the devnet maximum: 1 ..= 2^252.
fn arb_target() -> impl Strategy<Value = BigUint> {
    prop::array::uniform32(any::<u8>()).prop_map(|bytes| {
        let max = ChainParams::devnet().block_target_max().clone();
        BigUint::from_bytes_be(&bytes) % &max + 1u32
    })
}

/// Light stand-in for the main chain block at `height`.
fn light_block(height: u32) -> Block {
    Block::new(
        BlockHeader {
            version: 1,
            prev_hash: Hash::digest(&(height - 1).to_be_bytes()),
            interlink_hash: Hash::ZERO,
            body_hash: Hash::ZERO,
            accounts_hash: Hash::ZERO,
            n_bits: 0x2010_0000,
            height,
            timestamp: height as u64 * 60,
            nonce: height,
        },
        BlockInterlink::empty(),
        None,
    )
}

fn light_chain(heights: &BTreeSet<u32>) -> BlockChain {
    BlockChain::new(heights.iter().map(|&h| light_block(h)).collect()).unwrap()
}

fn arb_shape() -> impl Strategy<Value = TreeShape> {
    let spacing = prop::sample::select(vec![20u64, 45, 60, 90]);
    (
        0usize..3,
        prop::array::uniform3(1usize..4),
        prop::array::uniform3(spacing),
    )
        .prop_map(|(trunk, branches, spacings)| TreeShape {
            trunk,
            branches,
            spacings,
        })
}

// ============================================================================
// Target Math Properties
// ============================================================================

proptest! {
    /// Compact encoding truncates by less than 2^-15 of the target and is
    /// stable once applied.
    #[test]
    fn compact_keeps_precision(target in arb_target()) {
        let compact = target_to_compact(&target);
        let rounded = compact_to_target(compact);

        prop_assert!(rounded <= target);
        prop_assert!(&target - &rounded <= &target >> 15);
        prop_assert_eq!(target_to_compact(&rounded), compact);
    }

    /// Harder targets never have a smaller depth.
    #[test]
    fn target_depth_is_monotonic(a in arb_target(), b in arb_target()) {
        let params = ChainParams::devnet();
        let (easy, hard) = if a >= b { (a, b) } else { (b, a) };
        prop_assert!(params.target_depth(&hard) >= params.target_depth(&easy));
        prop_assert!(params.target_depth(&easy) >= 0);
    }
}

// ============================================================================
// Proof Chain Properties
// ============================================================================

proptest! {
    /// Merging two pieces of one chain yields their height-sorted union,
    /// in either order, and their common top block is the common ancestor.
    #[test]
    fn merge_is_a_sorted_union(
        a in prop::collection::btree_set(1u32..80, 0..30),
        b in prop::collection::btree_set(1u32..80, 0..30),
    ) {
        let (chain_a, chain_b) = (light_chain(&a), light_chain(&b));
        let merged = BlockChain::merge(&chain_a, &chain_b).unwrap();

        let union: Vec<u32> = a.union(&b).copied().collect();
        let heights: Vec<u32> = merged.blocks().iter().map(Block::height).collect();
        prop_assert_eq!(&heights, &union);
        prop_assert_eq!(&merged, &BlockChain::merge(&chain_b, &chain_a).unwrap());

        let common = a.intersection(&b).max().copied();
        let lca = BlockChain::lowest_common_ancestor(&chain_a, &chain_b).map(Block::height);
        prop_assert_eq!(lca, common);
    }
}

// ============================================================================
// Fork Choice Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Engines fed the same blocks in different parent-first orders agree
    /// on the head, and the head is the heaviest tip with the lowest hash.
    #[test]
    fn head_is_independent_of_arrival_order(
        shape in arb_shape(),
        first_seed in any::<u64>(),
        second_seed in any::<u64>(),
    ) {
        runtime().block_on(async {
            let base = TestNode::in_memory().await;
            let tree = mine_tree(&base, shape).await;
            let genesis = base.genesis.hash();

            let mut heads = Vec::new();
            for seed in [first_seed, second_seed] {
                let node = base.peer().await;
                let outcomes = node.push_all(&tree.topological_order(&genesis, seed)).await;
                prop_assert!(outcomes
                    .iter()
                    .all(|outcome| !matches!(outcome, PushOutcome::Invalid(_) | PushOutcome::Orphan)));
                heads.push((
                    node.chain.head(),
                    node.accounts.hash().await.unwrap(),
                    node,
                ));
            }

            let (first_head, first_accounts, first) = &heads[0];
            let (second_head, second_accounts, _) = &heads[1];
            prop_assert_eq!(first_head.hash(), second_head.hash());
            prop_assert_eq!(&first_head.total_difficulty, &second_head.total_difficulty);
            prop_assert_eq!(first_accounts, second_accounts);

            let mut tips = Vec::new();
            for block in &tree.blocks {
                let data = first.chain.get_chain_data(&block.hash()).await.unwrap().unwrap();
                tips.push((data.total_difficulty, Reverse(data.block.hash())));
            }
            let best = tips.into_iter().max().unwrap();
            prop_assert_eq!(first_head.hash(), best.1 .0);
            Ok(())
        })?;
    }
}

// ============================================================================
// Retarget Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// The next target is representable, never above the maximum, and at
    /// most one adjustment factor away from the head's target.
    #[test]
    fn next_target_stays_within_factor(spacing in 1u64..300, count in 1usize..13) {
        runtime().block_on(async {
            let node = TestNode::in_memory().await;
            node.extend(count, test_address(1), spacing).await;

            let head_target = node.chain.head().block.target();
            let next = node.chain.get_next_target(None).await.unwrap();
            let factor = BigUint::from(node.params.max_adjustment_factor);

            prop_assert_eq!(compact_to_target(target_to_compact(&next)), next.clone());
            prop_assert!(&next <= node.params.block_target_max());
            prop_assert!(next <= &head_target * &factor);
            // Compact rounding only ever truncates a little.
            prop_assert!(&next * &factor * 2u32 >= head_target);

            if spacing < node.params.block_time {
                prop_assert!(next <= head_target);
            } else if spacing > node.params.block_time {
                prop_assert!(next >= compact_to_target(target_to_compact(&head_target)));
            }
            Ok(())
        })?;
    }
}
