//! Superchain bookkeeping and quality predicates.
//!
//! A block of hash depth `d` belongs to every superchain of level `0..=d`.
//! The prover only trusts a superchain level once it is long enough and
//! "good": not suspiciously sparse relative to the chain underneath it.

use bytes::{Buf, BufMut};

/// Per-level count of superblocks from genesis up to and including a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuperBlockCounts(Vec<u32>);

impl SuperBlockCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one block of the given hash depth at every level up to it.
    pub fn add(&mut self, depth: u32) {
        let depth = depth as usize;
        if self.0.len() <= depth {
            self.0.resize(depth + 1, 0);
        }
        for count in &mut self.0[..=depth] {
            *count += 1;
        }
    }

    pub fn copy_and_add(&self, depth: u32) -> Self {
        let mut copy = self.clone();
        copy.add(depth);
        copy
    }

    pub fn get(&self, depth: u32) -> u32 {
        self.0.get(depth as usize).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Deepest level holding at least `m` blocks, zero if none does.
    pub fn candidate_depth(&self, m: u32) -> u32 {
        self.0
            .iter()
            .rposition(|count| *count >= m)
            .map_or(0, |depth| depth as u32)
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.0.len() as u8);
        for count in &self.0 {
            buf.put_u32(*count);
        }
    }

    pub fn decode<B: Buf>(buf: &mut B) -> Option<Self> {
        if buf.remaining() < 1 {
            return None;
        }
        let len = buf.get_u8() as usize;
        if buf.remaining() < len * 4 {
            return None;
        }
        Some(Self((0..len).map(|_| buf.get_u32()).collect()))
    }
}

/// Superchain member as seen by the quality predicates.
pub trait SuperChainEntry {
    fn height(&self) -> u32;
    fn super_block_counts(&self) -> &SuperBlockCounts;
}

/// `|C'| > (1 - δ) · 2^-μ · |C|`.
pub fn is_locally_good(super_length: u64, underlying_length: u64, depth: u32, delta: f64) -> bool {
    super_length as f64 > (1.0 - delta) * 2f64.powi(-(depth as i32)) * underlying_length as f64
}

/// Every suffix of at least `m` blocks is locally good against the span of
/// heights it covers.
pub fn has_super_quality<E: SuperChainEntry>(chain: &[E], depth: u32, m: u32, delta: f64) -> bool {
    let m = m.max(1) as usize;
    if chain.len() < m {
        return false;
    }
    let Some(last) = chain.last() else {
        return false;
    };
    for i in m..=chain.len() {
        let underlying = (last.height() - chain[chain.len() - i].height()) as u64 + 1;
        if !is_locally_good(i as u64, underlying, depth, delta) {
            return false;
        }
    }
    true
}

/// Moderate multi-level check: across every window of `k1` superchain
/// blocks, each level between 1 and `depth` is locally good against every
/// lower level.
pub fn has_multi_level_quality<E: SuperChainEntry>(
    chain: &[E],
    depth: u32,
    k1: u32,
    delta: f64,
) -> bool {
    if depth == 0 {
        return true;
    }
    let k1 = k1 as usize;
    if chain.len() <= k1 {
        return true;
    }

    for i in 0..chain.len() - k1 {
        let tail = chain[i].super_block_counts();
        let head = chain[i + k1].super_block_counts();

        for mu in (1..=depth).rev() {
            let upper = head.get(mu).saturating_sub(tail.get(mu)) as u64;
            for j in (0..mu).rev() {
                let lower = head.get(j).saturating_sub(tail.get(j)) as u64;
                if !is_locally_good(upper, lower, mu - j, delta) {
                    tracing::debug!(
                        depth,
                        window = i,
                        mu,
                        level = j,
                        "Chain badness detected"
                    );
                    return false;
                }
            }
        }
    }
    true
}

pub fn is_good_super_chain<E: SuperChainEntry>(chain: &[E], depth: u32, m: u32, delta: f64) -> bool {
    has_super_quality(chain, depth, m, delta) && has_multi_level_quality(chain, depth, m, delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Entry {
        height: u32,
        counts: SuperBlockCounts,
    }

    impl SuperChainEntry for Entry {
        fn height(&self) -> u32 {
            self.height
        }
        fn super_block_counts(&self) -> &SuperBlockCounts {
            &self.counts
        }
    }

    /// A chain where every `2^level`-th block reaches `level`, up to `max`.
    fn regular_chain(len: u32, max: u32) -> Vec<Entry> {
        let mut counts = SuperBlockCounts::new();
        (1..=len)
            .map(|height| {
                let depth = height.trailing_zeros().min(max);
                counts.add(depth);
                Entry {
                    height,
                    counts: counts.clone(),
                }
            })
            .collect()
    }

    #[test]
    fn test_super_block_counts() {
        let mut counts = SuperBlockCounts::new();
        counts.add(2);
        counts.add(0);
        let counts = counts.copy_and_add(1);
        assert_eq!(counts.get(0), 3);
        assert_eq!(counts.get(1), 2);
        assert_eq!(counts.get(2), 1);
        assert_eq!(counts.get(9), 0);
        assert_eq!(counts.candidate_depth(2), 1);
        assert_eq!(counts.candidate_depth(1), 2);
        assert_eq!(counts.candidate_depth(4), 0);
    }

    #[test]
    fn test_counts_encoding() {
        let counts = SuperBlockCounts::new().copy_and_add(3).copy_and_add(1);
        let mut buf = Vec::new();
        counts.encode(&mut buf);
        assert_eq!(SuperBlockCounts::decode(&mut buf.as_slice()), Some(counts));
        assert_eq!(SuperBlockCounts::decode(&mut [3u8, 0].as_slice()), None);
    }

    #[test]
    fn test_locally_good() {
        // 10 of 40 blocks at level 2 is exactly the expected density.
        assert!(is_locally_good(10, 40, 2, 0.1));
        assert!(!is_locally_good(5, 40, 2, 0.1));
        assert!(is_locally_good(1, 1, 0, 0.5));
    }

    #[test]
    fn test_super_quality_of_regular_chain() {
        let chain = regular_chain(64, 6);
        let level1: Vec<&Entry> = chain.iter().filter(|e| e.height % 2 == 0).collect();
        let level1: Vec<Entry> = level1
            .into_iter()
            .map(|e| Entry {
                height: e.height,
                counts: e.counts.clone(),
            })
            .collect();
        assert!(has_super_quality(&level1, 1, 4, 0.2));
        assert!(!has_super_quality(&level1[..3], 1, 4, 0.2));
    }

    #[test]
    fn test_sparse_superchain_is_not_good() {
        // Two level-3 blocks spread over 64 heights.
        let chain: Vec<Entry> = [1u32, 64]
            .iter()
            .map(|h| Entry {
                height: *h,
                counts: SuperBlockCounts::new(),
            })
            .collect();
        assert!(!has_super_quality(&chain, 3, 2, 0.1));
    }

    #[test]
    fn test_multi_level_quality() {
        let chain = regular_chain(128, 7);
        assert!(has_multi_level_quality(&chain, 3, 16, 0.25));
        assert!(has_multi_level_quality(&chain, 0, 16, 0.25));

        // Same heights but no block ever reached level 2.
        let mut counts = SuperBlockCounts::new();
        let flat: Vec<Entry> = (1..=128u32)
            .map(|height| {
                counts.add(height.trailing_zeros().min(1));
                Entry {
                    height,
                    counts: counts.clone(),
                }
            })
            .collect();
        assert!(!has_multi_level_quality(&flat, 2, 16, 0.25));
    }
}
