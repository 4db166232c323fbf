//! Chain notifications.

use hashweave_consensus::Hash;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Emitted only after the corresponding store commit succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A block became the main chain head. Fired once per adopted block
    /// during a rebranch, with `rebranching` set.
    HeadChanged {
        hash: Hash,
        height: u32,
        rebranching: bool,
    },
    Extended { hash: Hash, height: u32 },
    Rebranched {
        reverted: Vec<Hash>,
        adopted: Vec<Hash>,
        head: Hash,
    },
    /// Any block stored, on the main chain or not.
    BlockAdded(Hash),
    /// The mutation queue has no pending work.
    Ready,
}

#[derive(Debug, Clone)]
pub struct ChainEvents {
    tx: broadcast::Sender<ChainEvent>,
}

impl ChainEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.tx.subscribe()
    }

    /// No subscribers is fine.
    pub fn emit(&self, event: ChainEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ChainEvents {
    fn default() -> Self {
        Self::new()
    }
}
