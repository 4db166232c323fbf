//! Reverse interlink adjacency: for every stored block, the stored blocks
//! that reference it through their parent link or interlink.

use hashweave_consensus::{Block, Hash};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Default)]
pub struct InterlinkIndex {
    referrers: HashMap<Hash, HashSet<Hash>>,
    references: HashMap<Hash, Vec<Hash>>,
}

impl InterlinkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the references `block` holds. The parent link is included so
    /// that every descendant is reachable even when its interlink skips a
    /// level.
    pub fn add(&mut self, block: &Block) {
        let hash = block.hash();
        let mut targets: Vec<Hash> = Vec::with_capacity(block.interlink.len() + 1);
        for target in std::iter::once(block.prev_hash()).chain(block.interlink.hashes()) {
            if !target.is_zero() && !targets.contains(target) {
                targets.push(*target);
            }
        }
        for target in &targets {
            self.referrers.entry(*target).or_default().insert(hash);
        }
        self.references.insert(hash, targets);
    }

    /// Drop `hash` and the edges it owns.
    pub fn remove(&mut self, hash: &Hash) {
        if let Some(targets) = self.references.remove(hash) {
            for target in targets {
                if let Some(set) = self.referrers.get_mut(&target) {
                    set.remove(hash);
                    if set.is_empty() {
                        self.referrers.remove(&target);
                    }
                }
            }
        }
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.references.contains_key(hash)
    }

    pub fn referrers(&self, hash: &Hash) -> impl Iterator<Item = &Hash> {
        self.referrers.get(hash).into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// `root` followed by every block that transitively references it, in
    /// breadth-first order.
    pub fn descendants(&self, root: &Hash) -> Vec<Hash> {
        let mut seen = HashSet::from([*root]);
        let mut queue = VecDeque::from([*root]);
        let mut out = Vec::new();
        while let Some(hash) = queue.pop_front() {
            out.push(hash);
            for referrer in self.referrers(&hash) {
                if seen.insert(*referrer) {
                    queue.push_back(*referrer);
                }
            }
        }
        out
    }
}
