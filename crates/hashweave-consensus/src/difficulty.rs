//! Difficulty retargeting.
//!
//! Every block carries the target computed from the window of `W` blocks
//! ending at its predecessor. The adjustment is the ratio of observed to
//! ideal window time, optionally dampened, clamped to the configured
//! factor. All arithmetic is exact rational math on integers.

use crate::block::BlockHeader;
use crate::params::ChainParams;
use crate::target::{reduce_precision, target_to_compact};
use crate::{ConsensusError, ConsensusResult};
use num_bigint::BigUint;
use num_traits::One;
use std::sync::Arc;
use tracing::trace;

/// Retarget calculator for one network.
#[derive(Debug, Clone)]
pub struct DifficultyAdjustment {
    params: Arc<ChainParams>,
}

impl DifficultyAdjustment {
    pub fn new(params: Arc<ChainParams>) -> Self {
        Self { params }
    }

    /// Height of the block that opens the window ending at `head_height`.
    pub fn window_tail_height(&self, head_height: u32) -> u32 {
        head_height
            .saturating_sub(self.params.difficulty_window)
            .max(1)
    }

    /// Target the successor of `head` must be mined under. `tail` must be
    /// the main-chain ancestor of `head` at `window_tail_height`.
    pub fn next_target(&self, head: &BlockHeader, tail: &BlockHeader) -> ConsensusResult<BigUint> {
        let expected_tail = self.window_tail_height(head.height);
        if tail.height != expected_tail {
            return Err(ConsensusError::Validation(format!(
                "retarget window tail at height {}, expected {}",
                tail.height, expected_tail
            )));
        }

        let window = self.params.difficulty_window as u128;
        let block_time = self.params.block_time as u128;
        let expected = window * block_time;

        let mut actual = head.timestamp.saturating_sub(tail.timestamp) as u128;
        if (head.height as u128) <= window {
            // Blocks before genesis are assumed to have ideal spacing.
            actual += (window - head.height as u128 + 1) * block_time;
        }

        let (num, den) = self.adjustment(actual, expected);

        let max = self.params.block_target_max();
        let mut next = head.target() * BigUint::from(num) / BigUint::from(den);
        if next < BigUint::one() {
            next = BigUint::one();
        }
        if &next > max {
            next = max.clone();
        }
        let next = reduce_precision(&next);

        trace!(
            height = head.height,
            actual = %actual,
            expected = %expected,
            adjustment = %format!("{}/{}", num, den),
            "Retarget"
        );
        Ok(next)
    }

    /// Compact form of [`Self::next_target`].
    pub fn next_compact(&self, head: &BlockHeader, tail: &BlockHeader) -> ConsensusResult<u32> {
        Ok(target_to_compact(&self.next_target(head, tail)?))
    }

    /// Adjustment `actual / expected` as a fraction, dampened
    /// and clamped to `[1/f, f]`.
    fn adjustment(&self, actual: u128, expected: u128) -> (u128, u128) {
        let (mut num, mut den) = (actual, expected);
        if self.params.dampen_retarget {
            // (adj - 1) / 2 + 1 == (actual + expected) / (2 * expected)
            num = actual + expected;
            den = 2 * expected;
        }

        let factor = self.params.max_adjustment_factor.max(1) as u128;
        if num * factor < den {
            (1, factor)
        } else if num > den * factor {
            (factor, 1)
        } else {
            (num, den)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash;
    use crate::target::{compact_to_target, pow2};

    fn params(window: u32) -> Arc<ChainParams> {
        let mut params = ChainParams::mainnet();
        params.difficulty_window = window;
        Arc::new(params)
    }

    fn header(height: u32, timestamp: u64, target: &BigUint) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_hash: Hash::ZERO,
            interlink_hash: Hash::ZERO,
            body_hash: Hash::ZERO,
            accounts_hash: Hash::ZERO,
            n_bits: target_to_compact(target),
            height,
            timestamp,
            nonce: 0,
        }
    }

    #[test]
    fn test_window_tail_height() {
        let adj = DifficultyAdjustment::new(params(10));
        assert_eq!(adj.window_tail_height(1), 1);
        assert_eq!(adj.window_tail_height(10), 1);
        assert_eq!(adj.window_tail_height(11), 1);
        assert_eq!(adj.window_tail_height(12), 2);
    }

    #[test]
    fn test_ideal_spacing_keeps_target() {
        let adj = DifficultyAdjustment::new(params(10));
        let target = pow2(230);
        let tail = header(5, 1_000, &target);
        let head = header(15, 1_000 + 10 * 60, &target);
        assert_eq!(adj.next_target(&head, &tail).unwrap(), target);
    }

    #[test]
    fn test_half_spacing_lowers_target_by_dampened_factor() {
        let adj = DifficultyAdjustment::new(params(10));
        let target = pow2(230);
        let tail = header(5, 1_000, &target);
        let head = header(15, 1_000 + 10 * 30, &target);
        // (0.5 - 1) / 2 + 1 = 3/4
        assert_eq!(adj.next_target(&head, &tail).unwrap(), &target * 3u32 / 4u32);
    }

    #[test]
    fn test_adjustment_is_clamped() {
        let adj = DifficultyAdjustment::new(params(10));
        let target = pow2(230);

        let tail = header(5, 1_000, &target);
        let stalled = header(15, 1_000 + 10 * 60 * 100, &target);
        assert_eq!(adj.next_target(&stalled, &tail).unwrap(), &target * 2u32);

        let instant = header(15, 1_000, &target);
        assert_eq!(adj.next_target(&instant, &tail).unwrap(), &target / 2u32);
    }

    #[test]
    fn test_undampened_adjustment() {
        let mut p = ChainParams::mainnet();
        p.difficulty_window = 10;
        p.dampen_retarget = false;
        let adj = DifficultyAdjustment::new(Arc::new(p));
        let target = pow2(230);
        let tail = header(5, 1_000, &target);
        let head = header(15, 1_000 + 10 * 45, &target);
        assert_eq!(adj.next_target(&head, &tail).unwrap(), &target * 3u32 / 4u32);
    }

    #[test]
    fn test_next_target_capped_at_max() {
        let adj = DifficultyAdjustment::new(params(10));
        let max = ChainParams::mainnet().block_target_max().clone();
        let tail = header(5, 1_000, &max);
        let head = header(15, 1_000 + 10 * 60 * 3, &max);
        assert_eq!(adj.next_target(&head, &tail).unwrap(), max);
    }

    #[test]
    fn test_pre_genesis_window_has_ideal_spacing() {
        let adj = DifficultyAdjustment::new(params(10));
        let max = ChainParams::mainnet().block_target_max().clone();
        let genesis = header(1, 1_000, &max);

        // Four ideal intervals after genesis: the padded window is ideal.
        let head = header(5, 1_000 + 4 * 60, &max);
        assert_eq!(adj.next_target(&head, &genesis).unwrap(), max);

        // Same four blocks in half the time: only those intervals are fast.
        let head = header(5, 1_000 + 4 * 30, &max);
        let next = adj.next_target(&head, &genesis).unwrap();
        // actual = 120 + 6 * 60 = 480 of 600 -> dampened 0.9
        assert_eq!(next, reduce_precision(&(&max * 9u32 / 10u32)));
    }

    #[test]
    fn test_wrong_tail_rejected() {
        let adj = DifficultyAdjustment::new(params(10));
        let target = pow2(230);
        let tail = header(4, 1_000, &target);
        let head = header(15, 2_000, &target);
        assert!(adj.next_target(&head, &tail).is_err());
    }

    #[test]
    fn test_result_has_compact_precision() {
        let adj = DifficultyAdjustment::new(params(10));
        let target = compact_to_target(0x1e12_3456);
        let tail = header(5, 1_000, &target);
        let head = header(15, 1_000 + 10 * 50, &target);
        let next = adj.next_target(&head, &tail).unwrap();
        assert_eq!(compact_to_target(target_to_compact(&next)), next);
        assert!(next < target);
    }
}
