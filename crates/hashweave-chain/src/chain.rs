//! Chain extension engine.
//!
//! Every pushed block ends up in exactly one of the [`PushOutcome`] states.
//! Mutations run one at a time through the [`MutationQueue`]; each one
//! either commits chain data, head pointer and accounts changes in a single
//! store write or leaves the store untouched.
//!
//! Chain selection: the tip with the greatest total difficulty is the head.
//! Between tips of equal total difficulty the numerically lower block hash
//! (big-endian) wins.

use crate::accounts::{is_rejection, AccountsState, AccountsTransaction};
use crate::events::{ChainEvent, ChainEvents};
use crate::interlink_index::InterlinkIndex;
use crate::prover::ChainProver;
use crate::queue::MutationQueue;
use crate::store::ChainDataStore;
use crate::{AccountsError, ChainData, ChainError, ChainResult};
use hashweave_consensus::target::target_to_compact;
use hashweave_consensus::{
    Block, BlockChain, BlockValidator, ChainParams, ChainProof, DifficultyAdjustment, Hash,
};
use num_bigint::BigUint;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

/// Most hashes returned by [`Blockchain::get_block_locators`].
pub const MAX_LOCATORS: usize = 64;

/// Result of [`Blockchain::push_block`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Already stored; nothing changed.
    Known,
    /// Appended to the main chain.
    Extended,
    /// Became head by replacing part of the main chain.
    Rebranched,
    /// Stored off the main chain.
    Forked,
    /// Permanently rejected, never stored.
    Invalid(String),
    /// Predecessor unknown. Resubmit after the predecessor is accepted.
    Orphan,
}

/// Retention of fork blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruningConfig {
    /// Fork blocks more than this many blocks below the head are dropped.
    /// `None` keeps everything.
    pub blocks_to_keep: Option<u32>,
}

impl PruningConfig {
    pub fn keep(blocks: u32) -> Self {
        Self {
            blocks_to_keep: Some(blocks),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.blocks_to_keep.is_some()
    }
}

/// Number of pushed blocks per outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCounters {
    pub known: u64,
    pub invalid: u64,
    pub orphan: u64,
    pub extended: u64,
    pub rebranched: u64,
    pub forked: u64,
}

/// Handle to one chain instance. Cheap to clone.
#[derive(Clone)]
pub struct Blockchain {
    inner: Arc<ChainInner>,
    queue: Arc<MutationQueue>,
}

struct ChainInner {
    params: Arc<ChainParams>,
    validator: BlockValidator,
    retarget: DifficultyAdjustment,
    store: Arc<dyn ChainDataStore>,
    accounts: Arc<dyn AccountsState>,
    prover: ChainProver,
    genesis: ChainData,
    head: RwLock<ChainData>,
    index: Mutex<InterlinkIndex>,
    /// Off-main-chain blocks by height.
    forks: Mutex<BTreeMap<u32, HashSet<Hash>>>,
    counters: Mutex<BlockCounters>,
    proof_cache: Mutex<Option<(Hash, ChainProof)>>,
    events: ChainEvents,
    pruning: PruningConfig,
}

impl Blockchain {
    /// Open the chain stored in `store`, initializing it with `genesis` if
    /// the store is empty. Must be called inside a tokio runtime.
    ///
    /// `accounts` writes are committed through `store`, so both must be
    /// backed by the same storage.
    pub async fn open(
        params: Arc<ChainParams>,
        genesis: Block,
        store: Arc<dyn ChainDataStore>,
        accounts: Arc<dyn AccountsState>,
    ) -> ChainResult<Self> {
        Self::open_with_pruning(params, genesis, store, accounts, PruningConfig::default()).await
    }

    pub async fn open_with_pruning(
        params: Arc<ChainParams>,
        genesis: Block,
        store: Arc<dyn ChainDataStore>,
        accounts: Arc<dyn AccountsState>,
        pruning: PruningConfig,
    ) -> ChainResult<Self> {
        let genesis_hash = genesis.hash();
        if genesis.height() != 1 {
            return Err(ChainError::Genesis(format!(
                "genesis at height {}",
                genesis.height()
            )));
        }
        let validator = BlockValidator::new(params.clone(), genesis_hash);
        validator
            .verify(&genesis, genesis.timestamp())
            .map_err(|e| ChainError::Genesis(e.to_string()))?;
        let genesis_data = ChainData::initial(genesis, &params);

        let head = match store.get_head().await? {
            Some(head_hash) => load_head(store.as_ref(), accounts.as_ref(), &genesis_hash, head_hash).await?,
            None => {
                init_genesis(store.as_ref(), accounts.as_ref(), &genesis_data).await?;
                genesis_data.clone()
            }
        };

        let mut index = InterlinkIndex::new();
        let mut forks: BTreeMap<u32, HashSet<Hash>> = BTreeMap::new();
        for data in store.all_chain_data().await? {
            index.add(&data.block);
            if !data.on_main_chain {
                forks.entry(data.height()).or_default().insert(data.hash());
            }
        }
        info!(
            height = head.height(),
            head = %head.hash(),
            stored = index.len(),
            forks = forks.values().map(HashSet::len).sum::<usize>(),
            "Chain opened"
        );

        let events = ChainEvents::new();
        let ready_events = events.clone();
        let queue = MutationQueue::new(Box::new(move || ready_events.emit(ChainEvent::Ready)));

        let inner = ChainInner {
            retarget: DifficultyAdjustment::new(params.clone()),
            prover: ChainProver::new(store.clone(), params.clone(), genesis_data.clone()),
            params,
            validator,
            store,
            accounts,
            genesis: genesis_data,
            head: RwLock::new(head),
            index: Mutex::new(index),
            forks: Mutex::new(forks),
            counters: Mutex::new(BlockCounters::default()),
            proof_cache: Mutex::new(None),
            events,
            pruning,
        };

        Ok(Self {
            inner: Arc::new(inner),
            queue: Arc::new(queue),
        })
    }

    /// Validate `block` and add it to the chain. Calls are applied one at a
    /// time in the order they were made.
    pub async fn push_block(&self, block: Block) -> ChainResult<PushOutcome> {
        let inner = self.inner.clone();
        self.queue.push(async move { inner.push_block(block).await }).await?
    }

    /// Proof for the current head, cached until the head changes.
    pub async fn get_chain_proof(&self) -> ChainResult<ChainProof> {
        let inner = self.inner.clone();
        self.queue.push(async move { inner.chain_proof().await }).await?
    }

    /// Interlink path from `known` down to `to_prove`.
    pub async fn get_block_proof(
        &self,
        to_prove: Block,
        known: Block,
    ) -> ChainResult<Option<BlockChain>> {
        let inner = self.inner.clone();
        self.queue
            .push(async move { inner.prover.block_proof(&to_prove, &known).await })
            .await?
    }

    /// Stored block, fork blocks only if `include_forks`.
    pub async fn get_block(&self, hash: &Hash, include_forks: bool) -> ChainResult<Option<Block>> {
        Ok(self
            .inner
            .store
            .get_chain_data(hash)
            .await?
            .filter(|data| data.on_main_chain || include_forks)
            .map(|data| data.block))
    }

    /// Main chain block at `height`.
    pub async fn get_block_at(&self, height: u32) -> ChainResult<Option<Block>> {
        self.inner.store.get_block_at(height).await
    }

    pub async fn get_chain_data(&self, hash: &Hash) -> ChainResult<Option<ChainData>> {
        self.inner.store.get_chain_data(hash).await
    }

    /// Up to `count` main chain blocks starting at `start_height`, towards
    /// the head if `forward`, towards genesis otherwise.
    pub async fn get_blocks(
        &self,
        start_height: u32,
        count: usize,
        forward: bool,
    ) -> ChainResult<Vec<Block>> {
        let store = &self.inner.store;
        let mut blocks = Vec::with_capacity(count.min(512));
        let mut current = store.get_chain_data_at(start_height).await?;
        while let Some(data) = current {
            if blocks.len() >= count || !data.on_main_chain {
                break;
            }
            let next = if forward {
                data.main_chain_successor
            } else if data.height() > 1 {
                Some(*data.block.prev_hash())
            } else {
                None
            };
            blocks.push(data.block);
            current = match next {
                Some(hash) => store.get_chain_data(&hash).await?,
                None => None,
            };
        }
        Ok(blocks)
    }

    /// Head, the nine blocks below it, then exponentially sparser main
    /// chain hashes, ending with genesis.
    pub async fn get_block_locators(&self) -> ChainResult<Vec<Hash>> {
        let head = self.head();
        let genesis_hash = self.genesis_hash();
        let height = head.height() as i64;

        let mut locators = vec![head.hash()];
        let mut block = Some(head.block);
        for _ in 1..height.min(10) {
            let Some(current) = block else {
                break;
            };
            locators.push(*current.prev_hash());
            block = self.get_block(current.prev_hash(), false).await?;
        }

        let mut step = 2i64;
        let mut i = height - 10 - step;
        while i > 0 {
            if let Some(block) = self.get_block_at(i as u32).await? {
                locators.push(block.hash());
            }
            step *= 2;
            i -= step;
            if locators.len() >= MAX_LOCATORS {
                break;
            }
        }

        if locators.last() != Some(&genesis_hash) {
            if locators.len() >= MAX_LOCATORS {
                locators.pop();
            }
            locators.push(genesis_hash);
        }
        Ok(locators)
    }

    /// Target for the successor of `block`, or of the head if `None`.
    pub async fn get_next_target(&self, block: Option<&Block>) -> ChainResult<BigUint> {
        let data = match block {
            Some(block) => {
                let hash = block.hash();
                self.inner
                    .store
                    .get_chain_data(&hash)
                    .await?
                    .ok_or(ChainError::MissingChainData(hash))?
            }
            None => self.head(),
        };
        self.inner.next_target(&data).await
    }

    pub fn head(&self) -> ChainData {
        self.inner.head.read().clone()
    }

    pub fn head_hash(&self) -> Hash {
        self.inner.head.read().hash()
    }

    pub fn height(&self) -> u32 {
        self.inner.head.read().height()
    }

    pub fn total_difficulty(&self) -> BigUint {
        self.inner.head.read().total_difficulty.clone()
    }

    pub fn total_work(&self) -> BigUint {
        self.inner.head.read().total_work.clone()
    }

    pub fn counters(&self) -> BlockCounters {
        *self.inner.counters.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.inner.events.subscribe()
    }

    pub fn params(&self) -> &Arc<ChainParams> {
        &self.inner.params
    }

    pub fn validator(&self) -> &BlockValidator {
        &self.inner.validator
    }

    pub fn genesis_hash(&self) -> Hash {
        self.inner.genesis.hash()
    }

    /// No mutation queued or running.
    pub fn is_idle(&self) -> bool {
        self.queue.is_idle()
    }

    /// Stored fork blocks.
    pub fn fork_count(&self) -> usize {
        self.inner.forks.lock().values().map(HashSet::len).sum()
    }

    pub(crate) fn accounts(&self) -> &Arc<dyn AccountsState> {
        &self.inner.accounts
    }
}

impl std::fmt::Debug for Blockchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head = self.inner.head.read();
        f.debug_struct("Blockchain")
            .field("height", &head.height())
            .field("head", &head.hash())
            .field("total_difficulty", &head.total_difficulty)
            .finish()
    }
}

async fn load_head(
    store: &dyn ChainDataStore,
    accounts: &dyn AccountsState,
    genesis_hash: &Hash,
    head_hash: Hash,
) -> ChainResult<ChainData> {
    if store.get_hash_at(1).await?.as_ref() != Some(genesis_hash) {
        return Err(ChainError::Corrupted(format!(
            "genesis {} is not on the stored main chain",
            genesis_hash
        )));
    }
    let head = store
        .get_chain_data(&head_hash)
        .await?
        .ok_or_else(|| ChainError::Corrupted(format!("head {} not stored", head_hash)))?;
    if !head.on_main_chain {
        return Err(ChainError::Corrupted(format!(
            "head {} not on the main chain",
            head_hash
        )));
    }
    let accounts_hash = accounts.hash().await?;
    if accounts_hash != head.block.header.accounts_hash {
        return Err(ChainError::Corrupted(format!(
            "accounts hash {} does not match head accounts hash {}",
            accounts_hash, head.block.header.accounts_hash
        )));
    }
    Ok(head)
}

async fn init_genesis(
    store: &dyn ChainDataStore,
    accounts: &dyn AccountsState,
    genesis: &ChainData,
) -> ChainResult<()> {
    let hash = genesis.hash();
    let mut accounts_tx = accounts.transaction().await?;
    accounts_tx
        .commit_block(&genesis.block)
        .await
        .map_err(|e| ChainError::Genesis(e.to_string()))?;
    let accounts_hash = accounts_tx.hash().await?;
    if accounts_hash != genesis.block.header.accounts_hash {
        return Err(ChainError::Genesis(format!(
            "accounts hash {} after genesis, header commits to {}",
            accounts_hash, genesis.block.header.accounts_hash
        )));
    }

    let mut tx = store.transaction();
    tx.put_chain_data(genesis.clone());
    tx.set_main_chain(1, hash);
    tx.set_head(hash);
    tx.merge_accounts(accounts_tx.into_batch());
    store.commit(tx).await?;
    info!(%hash, "Initialized chain with genesis block");
    Ok(())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl ChainInner {
    #[instrument(skip(self, block), fields(height = block.height(), hash = %block.hash()))]
    async fn push_block(&self, block: Block) -> ChainResult<PushOutcome> {
        let hash = block.hash();
        if self.store.get_chain_data(&hash).await?.is_some() {
            debug!("Ignoring known block");
            self.counters.lock().known += 1;
            return Ok(PushOutcome::Known);
        }

        if !block.is_full() {
            return Ok(self.reject(&hash, "block has no body".to_string()));
        }
        if let Err(e) = self.validator.verify(&block, now_secs()) {
            return Ok(self.reject(&hash, e.to_string()));
        }

        let Some(prev) = self.store.get_chain_data(block.prev_hash()).await? else {
            warn!(prev = %block.prev_hash(), "Orphan block");
            self.counters.lock().orphan += 1;
            return Ok(PushOutcome::Orphan);
        };

        if let Err(e) = self.validator.is_immediate_successor_of(&block, &prev.block) {
            return Ok(self.reject(&hash, e.to_string()));
        }
        if let Err(reason) = self.verify_interlink_references(&block).await? {
            return Ok(self.reject(&hash, reason));
        }

        let next_target = self.next_target(&prev).await?;
        let expected = target_to_compact(&next_target);
        if block.n_bits() != expected {
            return Ok(self.reject(
                &hash,
                format!(
                    "difficulty mismatch: n_bits {:#010x}, expected {:#010x}",
                    block.n_bits(),
                    expected
                ),
            ));
        }

        let data = prev.next(block, &self.params);
        let (head_hash, head_difficulty) = {
            let head = self.head.read();
            (head.hash(), head.total_difficulty.clone())
        };

        if prev.hash() == head_hash {
            return self.extend(prev, data).await;
        }
        let harder = data.total_difficulty > head_difficulty
            || (data.total_difficulty == head_difficulty && hash < head_hash);
        if harder {
            return self.rebranch(data).await;
        }
        self.fork(data).await
    }

    /// Every interlink entry already stored must admit `block` as an
    /// interlink successor.
    async fn verify_interlink_references(&self, block: &Block) -> ChainResult<Result<(), String>> {
        let mut checked = HashSet::new();
        for reference in block.interlink.hashes() {
            if !checked.insert(*reference) {
                continue;
            }
            let Some(pred) = self.store.get_chain_data(reference).await? else {
                continue;
            };
            if let Err(e) = self.validator.is_interlink_successor_of(block, &pred.block) {
                return Ok(Err(format!("interlink reference {}: {}", reference, e)));
            }
        }
        Ok(Ok(()))
    }

    fn reject(&self, hash: &Hash, reason: String) -> PushOutcome {
        warn!(%hash, %reason, "Rejecting block");
        self.counters.lock().invalid += 1;
        PushOutcome::Invalid(reason)
    }

    /// Commit `block` on `tx` and check the accounts hash it declares.
    /// The inner error is a rejection reason.
    async fn apply_block(
        &self,
        tx: &mut dyn AccountsTransaction,
        block: &Block,
    ) -> ChainResult<Result<(), String>> {
        match tx.commit_block(block).await {
            Ok(()) => {}
            Err(e) if is_rejection(&e) => return Ok(Err(e.to_string())),
            Err(e) => return Err(e.into()),
        }
        let accounts_hash = tx.hash().await?;
        if accounts_hash != block.header.accounts_hash {
            return Ok(Err(format!(
                "accounts hash mismatch: header {}, computed {}",
                block.header.accounts_hash, accounts_hash
            )));
        }
        Ok(Ok(()))
    }

    async fn extend(&self, mut prev: ChainData, mut data: ChainData) -> ChainResult<PushOutcome> {
        let hash = data.hash();
        let mut accounts_tx = self.accounts.transaction().await?;
        if let Err(reason) = self.apply_block(accounts_tx.as_mut(), &data.block).await? {
            return Ok(self.reject(&hash, reason));
        }

        data.on_main_chain = true;
        prev.main_chain_successor = Some(hash);

        let mut tx = self.store.transaction();
        tx.put_chain_data(prev);
        tx.put_chain_data(data.clone());
        tx.set_main_chain(data.height(), hash);
        tx.set_head(hash);
        tx.merge_accounts(accounts_tx.into_batch());
        self.store.commit(tx).await?;

        let height = data.height();
        self.index.lock().add(&data.block);
        *self.head.write() = data;
        self.counters.lock().extended += 1;

        debug!(height, %hash, "Extended main chain");
        self.events.emit(ChainEvent::BlockAdded(hash));
        self.events.emit(ChainEvent::HeadChanged {
            hash,
            height,
            rebranching: false,
        });
        self.events.emit(ChainEvent::Extended { hash, height });

        self.prune().await?;
        Ok(PushOutcome::Extended)
    }

    async fn fork(&self, data: ChainData) -> ChainResult<PushOutcome> {
        let hash = data.hash();
        let height = data.height();
        let mut tx = self.store.transaction();
        tx.put_chain_data(data.clone());
        self.store.commit(tx).await?;

        self.index.lock().add(&data.block);
        self.forks.lock().entry(height).or_default().insert(hash);
        self.counters.lock().forked += 1;

        debug!(
            height,
            %hash,
            total_difficulty = %data.total_difficulty,
            "Stored fork block"
        );
        self.events.emit(ChainEvent::BlockAdded(hash));
        Ok(PushOutcome::Forked)
    }

    async fn rebranch(&self, data: ChainData) -> ChainResult<PushOutcome> {
        let hash = data.hash();

        // Fork blocks from the new block back to the main chain, newest first.
        let mut fork = vec![data];
        let mut fork_point = loop {
            let prev_hash = *fork[fork.len() - 1].block.prev_hash();
            let prev = self.store.get_chain_data(&prev_hash).await?.ok_or_else(|| {
                ChainError::Corrupted(format!("fork predecessor {} missing", prev_hash))
            })?;
            if prev.on_main_chain {
                break prev;
            }
            fork.push(prev);
        };
        fork.reverse();
        debug!(
            fork_point = fork_point.height(),
            fork_length = fork.len(),
            "Found fork point"
        );

        // Walk the accounts state back to the fork point.
        let mut accounts_tx = self.accounts.transaction().await?;
        let mut reverted: Vec<ChainData> = Vec::new();
        let mut current = self.head.read().clone();
        while current.hash() != fork_point.hash() {
            match accounts_tx.revert_block(&current.block).await {
                Ok(()) => {}
                Err(e @ AccountsError::Storage(_)) => return Err(e.into()),
                Err(e) => {
                    return Err(ChainError::Corrupted(format!(
                        "cannot revert main chain block {}: {}",
                        current.hash(),
                        e
                    )));
                }
            }
            let prev_hash = *current.block.prev_hash();
            let prev = self.store.get_chain_data(&prev_hash).await?.ok_or_else(|| {
                ChainError::Corrupted(format!("main chain predecessor {} missing", prev_hash))
            })?;
            if accounts_tx.hash().await? != prev.block.header.accounts_hash {
                return Err(ChainError::Corrupted(format!(
                    "accounts state after reverting to {} does not match its header",
                    prev_hash
                )));
            }
            reverted.push(current);
            current = prev;
        }

        for (i, block_data) in fork.iter().enumerate() {
            if let Err(reason) = self.apply_block(accounts_tx.as_mut(), &block_data.block).await? {
                drop(accounts_tx);
                let failed = block_data.hash();
                // Every fork block but the last is already stored.
                if i + 1 < fork.len() {
                    let removed = self.remove_fork_subtrees(&[failed]).await?;
                    warn!(%failed, removed, "Removed invalid fork subtree");
                }
                return Ok(self.reject(
                    &hash,
                    format!("fork block {} rejected: {}", failed, reason),
                ));
            }
        }

        let mut tx = self.store.transaction();
        let old_height = self.head.read().height();
        for mut data in reverted.iter().cloned() {
            data.on_main_chain = false;
            data.main_chain_successor = None;
            tx.put_chain_data(data);
        }
        fork_point.main_chain_successor = Some(fork[0].hash());
        tx.put_chain_data(fork_point);

        let successors: Vec<Option<Hash>> = fork
            .iter()
            .skip(1)
            .map(|data| Some(data.hash()))
            .chain(std::iter::once(None))
            .collect();
        for (data, successor) in fork.iter_mut().zip(successors) {
            data.on_main_chain = true;
            data.main_chain_successor = successor;
            tx.set_main_chain(data.height(), data.hash());
            tx.put_chain_data(data.clone());
        }
        let new_head = fork[fork.len() - 1].clone();
        for height in (new_head.height() + 1)..=old_height {
            tx.remove_main_chain(height);
        }
        tx.set_head(hash);
        tx.merge_accounts(accounts_tx.into_batch());
        self.store.commit(tx).await?;

        {
            let mut forks = self.forks.lock();
            for data in &fork {
                forget_fork(&mut forks, data.height(), &data.hash());
            }
            for data in &reverted {
                forks.entry(data.height()).or_default().insert(data.hash());
            }
        }
        self.index.lock().add(&new_head.block);
        let height = new_head.height();
        *self.head.write() = new_head;
        self.counters.lock().rebranched += 1;

        let reverted: Vec<Hash> = reverted.iter().map(ChainData::hash).collect();
        let adopted: Vec<Hash> = fork.iter().map(ChainData::hash).collect();
        info!(
            height,
            %hash,
            reverted = reverted.len(),
            adopted = adopted.len(),
            "Rebranched"
        );
        self.events.emit(ChainEvent::BlockAdded(hash));
        for data in &fork {
            self.events.emit(ChainEvent::HeadChanged {
                hash: data.hash(),
                height: data.height(),
                rebranching: true,
            });
        }
        self.events.emit(ChainEvent::Rebranched {
            reverted,
            adopted,
            head: hash,
        });

        self.prune().await?;
        Ok(PushOutcome::Rebranched)
    }

    /// Remove the stored fork blocks `roots` and every stored fork block
    /// that builds on them.
    async fn remove_fork_subtrees(&self, roots: &[Hash]) -> ChainResult<usize> {
        let candidates: Vec<Hash> = {
            let index = self.index.lock();
            let mut seen = HashSet::new();
            roots
                .iter()
                .flat_map(|root| index.descendants(root))
                .filter(|hash| seen.insert(*hash))
                .collect()
        };
        let mut tx = self.store.transaction();
        let mut removed = Vec::new();
        for hash in candidates {
            if let Some(data) = self.store.get_chain_data(&hash).await? {
                if !data.on_main_chain {
                    tx.remove_chain_data(hash);
                    removed.push((data.height(), hash));
                }
            }
        }
        if removed.is_empty() {
            return Ok(0);
        }
        self.store.commit(tx).await?;

        let mut index = self.index.lock();
        let mut forks = self.forks.lock();
        for (height, hash) in &removed {
            index.remove(hash);
            forget_fork(&mut forks, *height, hash);
        }
        Ok(removed.len())
    }

    /// Drop fork subtrees lying entirely more than `blocks_to_keep` below
    /// the head. A subtree with any block inside the window is kept whole,
    /// so every stored block keeps its predecessor.
    async fn prune(&self) -> ChainResult<()> {
        let Some(keep) = self.pruning.blocks_to_keep else {
            return Ok(());
        };
        let threshold = self.head.read().height().saturating_sub(keep);
        let stale = self.stale_forks(threshold);
        if stale.is_empty() {
            return Ok(());
        }
        let removed = self.remove_fork_subtrees(&stale).await?;
        debug!(removed, threshold, "Pruned fork blocks");
        Ok(())
    }

    /// Fork blocks below `threshold` whose fork descendants are all below
    /// it as well.
    fn stale_forks(&self, threshold: u32) -> Vec<Hash> {
        let index = self.index.lock();
        let forks = self.forks.lock();
        let heights: HashMap<Hash, u32> = forks
            .iter()
            .flat_map(|(height, hashes)| hashes.iter().map(move |hash| (*hash, *height)))
            .collect();
        forks
            .range(..threshold)
            .flat_map(|(_, hashes)| hashes.iter())
            .filter(|hash| {
                index
                    .descendants(hash)
                    .iter()
                    .all(|d| heights.get(d).map_or(true, |height| *height < threshold))
            })
            .copied()
            .collect()
    }

    async fn next_target(&self, data: &ChainData) -> ChainResult<BigUint> {
        let tail_height = self.retarget.window_tail_height(data.height());
        let tail = if data.on_main_chain {
            self.main_block_at(tail_height).await?
        } else {
            let mut current = data.to_light();
            let mut steps = 0;
            while steps < self.params.difficulty_window && !current.on_main_chain {
                let prev_hash = *current.block.prev_hash();
                current = self
                    .store
                    .get_chain_data(&prev_hash)
                    .await?
                    .ok_or(ChainError::MissingChainData(prev_hash))?
                    .to_light();
                steps += 1;
            }
            if current.on_main_chain && current.height() > tail_height {
                self.main_block_at(tail_height).await?
            } else {
                current.block
            }
        };
        Ok(self.retarget.next_target(&data.block.header, &tail.header)?)
    }

    async fn main_block_at(&self, height: u32) -> ChainResult<Block> {
        self.store
            .get_block_at(height)
            .await?
            .ok_or_else(|| ChainError::Corrupted(format!("no main chain block at height {}", height)))
    }

    async fn chain_proof(&self) -> ChainResult<ChainProof> {
        let head = self.head.read().clone();
        let head_hash = head.hash();
        if let Some((hash, proof)) = self.proof_cache.lock().as_ref() {
            if *hash == head_hash {
                return Ok(proof.clone());
            }
        }
        let proof = self.prover.prove(&head).await?;
        *self.proof_cache.lock() = Some((head_hash, proof.clone()));
        Ok(proof)
    }
}

fn forget_fork(forks: &mut BTreeMap<u32, HashSet<Hash>>, height: u32, hash: &Hash) {
    if let Some(set) = forks.get_mut(&height) {
        set.remove(hash);
        if set.is_empty() {
            forks.remove(&height);
        }
    }
}
