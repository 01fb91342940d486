/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to open, share, and persist the chain state of a node.
//!
//! The chain state is the [block index](crate::block_index::graph::BlockIndexGraph), the
//! [active chain](crate::block_index::chain::ActiveChain), and the shared root
//! [coins cache](crate::coins_view::cache::CoinsViewCache) over the [persisted coin
//! set](crate::coins_view::db::CoinsViewDB). All three live behind one reader/writer lock: they are only
//! ever changed together, by one writer at a time, while any number of readers may look at them.
//!
//! ## Private caches
//!
//! `CoinsView` is implemented for `&ChainState`, so a validation thread can open its own cache over the
//! shared state with [`new_cache`](ChainState::new_cache), read through it (each read takes the read
//! lock), and then either drop it or [flush](crate::coins_view::cache::CoinsViewCache::flush) it (the
//! flush takes the write lock). Moving the tip together with the flush is done by
//! [`update_tip`](ChainState::update_tip).
//!
//! ## Published height
//!
//! The height of the active chain is also published through an atomic, so that it can be read without
//! taking the lock at all. A thread that observes a height with [`height`](ChainState::height) also
//! observes every change made before that height was published.
//!
//! ## Opening a chain state
//!
//! ```ignore
//! let chain_state =
//!     ChainStateSpec::builder()
//!     .kv_store(kv_store)
//!     .configuration(configuration)
//!     .on_update_tip(|event| println!("new tip at {}", event.height))
//!     .build()
//!     .open()?;
//! ```

use std::{
    fmt::{self, Display},
    sync::{
        atomic::{AtomicI32, Ordering},
        Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
    time::SystemTime,
};

use typed_builder::TypedBuilder;

use crate::{
    block_index::{
        chain::ActiveChain,
        disk::{self, BlockIndexLoadError, BlockIndexWriteError},
        entry::{BlockIndexId, BlockValidity},
        graph::{BlockIndexError, BlockIndexGraph, ReceivedBlock},
    },
    coins_view::{
        cache::CoinsViewCache,
        db::{CoinsStats, CoinsViewDB},
        entries::CachedPool,
        CoinsBatch, CoinsView, CoinsViewError,
    },
    config::Configuration,
    event_handlers::{EventHandlers, HandlerPtr},
    events::*,
    store::pluggables::KVStore,
    types::{
        coins::Coins,
        data_types::{BlockHeight, CryptoHash, ShieldedType},
        header::BlockHeader,
        merkle::IncrementalMerkleTree,
    },
};

/// Stores everything needed to open a [`ChainState`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ChainStateSpec]. On the builder call the following methods to construct a valid [ChainStateSpec].

    Required:
    - `.kv_store(...)`
    - `.configuration(...)`

    Optional:
    - `.on_flush_coins(...)`
    - `.on_update_tip(...)`
    - `.on_batch_write(...)`
    - `.on_load_block_index(...)`
    - `.on_invalidate_block(...)`
"))]
pub struct ChainStateSpec<K: KVStore> {
    #[builder(setter(doc = "Set the implementation of the Key-Value store the chain state is persisted in. The argument must implement the [KVStore](crate::store::pluggables::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the [configuration](Configuration) of the chain state. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&FlushCoinsEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FlushCoinsEvent>),
    doc = "Register a handler closure to be invoked after a private cache is flushed into the shared root cache. Optional."))]
    on_flush_coins: Option<HandlerPtr<FlushCoinsEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateTipEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateTipEvent>),
    doc = "Register a handler closure to be invoked after the active chain moves to a new tip. Optional."))]
    on_update_tip: Option<HandlerPtr<UpdateTipEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BatchWriteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BatchWriteEvent>),
    doc = "Register a handler closure to be invoked after the chain state is written to the Key-Value store. Optional."))]
    on_batch_write: Option<HandlerPtr<BatchWriteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&LoadBlockIndexEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<LoadBlockIndexEvent>),
    doc = "Register a handler closure to be invoked after the block index is loaded from the Key-Value store. Optional."))]
    on_load_block_index: Option<HandlerPtr<LoadBlockIndexEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&InvalidateBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InvalidateBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is marked as failed. Optional."))]
    on_invalidate_block: Option<HandlerPtr<InvalidateBlockEvent>>,
}

impl<K: KVStore> ChainStateSpec<K> {
    /// Load the block index from the Key-Value store and position the active chain at the persisted
    /// best block.
    pub fn open(self) -> Result<ChainState<K>, ChainStateError> {
        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_flush_coins,
            self.on_update_tip,
            self.on_batch_write,
            self.on_load_block_index,
            self.on_invalidate_block,
        );

        let graph = disk::load_block_index(&self.kv_store)?;
        let coins = CoinsViewCache::new(CoinsViewDB::new(self.kv_store));

        let best_block = coins.get_best_block()?;
        let tip = if best_block.is_zero() {
            None
        } else {
            let tip = graph
                .lookup(&best_block)
                .ok_or(BlockIndexError::UnknownBlock { block: best_block })?;
            Some(tip)
        };
        let mut chain = ActiveChain::new();
        chain.set_tip(&graph, tip);

        let load_block_index_event = LoadBlockIndexEvent {
            timestamp: SystemTime::now(),
            entries: graph.len(),
            tip: tip.map(|tip| graph[tip].hash()),
            height: chain.height(),
        };

        let chain_state = ChainState {
            height: AtomicI32::new(chain.height().int()),
            inner: RwLock::new(ChainStateInner {
                graph,
                chain,
                coins,
            }),
            configuration: self.configuration,
            event_handlers: Mutex::new(event_handlers),
        };
        chain_state.fire(Event::LoadBlockIndex(load_block_index_event));
        Ok(chain_state)
    }
}

struct ChainStateInner<K: KVStore> {
    graph: BlockIndexGraph,
    chain: ActiveChain,
    coins: CoinsViewCache<CoinsViewDB<K>>,
}

/// The block index, the active chain, and the shared root coins cache of a node, behind one lock.
///
/// `ChainState` is `Sync` whenever `K` is, so it can be shared between threads by reference or in an
/// `Arc`.
pub struct ChainState<K: KVStore> {
    inner: RwLock<ChainStateInner<K>>,
    height: AtomicI32,
    configuration: Configuration,
    event_handlers: Mutex<EventHandlers>,
}

impl<K: KVStore> ChainState<K> {
    fn read_inner(&self) -> RwLockReadGuard<'_, ChainStateInner<K>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, ChainStateInner<K>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // Called with the lock released, so that handlers may read the chain state.
    fn fire(&self, event: Event) {
        let event_handlers = self
            .event_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !event_handlers.is_empty() {
            event_handlers.fire_handlers(event);
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    /* ↓↓↓ Block index and active chain ↓↓↓ */

    /// Height of the active chain's tip, without taking the lock. [`BlockHeight::UNKNOWN`] if the
    /// active chain is empty.
    pub fn height(&self) -> BlockHeight {
        BlockHeight::new(self.height.load(Ordering::Acquire))
    }

    /// Hash of the active chain's tip.
    pub fn tip(&self) -> Option<CryptoHash> {
        let inner = self.read_inner();
        inner.chain.tip().map(|tip| inner.graph[tip].hash())
    }

    /// Run `f` with shared access to the block index and the active chain.
    pub fn block_index<R>(&self, f: impl FnOnce(&BlockIndexGraph, &ActiveChain) -> R) -> R {
        let inner = self.read_inner();
        f(&inner.graph, &inner.chain)
    }

    /// A locator for the active chain's tip.
    pub fn locator(&self) -> Vec<CryptoHash> {
        let inner = self.read_inner();
        inner.chain.locator(&inner.graph, None)
    }

    pub fn add_header(&self, header: BlockHeader) -> Result<BlockIndexId, BlockIndexError> {
        self.write_inner().graph.add_header(header)
    }

    pub fn received_transactions(
        &self,
        block: &CryptoHash,
        received: ReceivedBlock,
    ) -> Result<(), BlockIndexError> {
        let mut inner = self.write_inner();
        let id = lookup(&inner.graph, block)?;
        inner.graph.received_transactions(id, received)
    }

    pub fn raise_validity(
        &self,
        block: &CryptoHash,
        level: BlockValidity,
    ) -> Result<bool, BlockIndexError> {
        let mut inner = self.write_inner();
        let id = lookup(&inner.graph, block)?;
        inner.graph.raise_validity(id, level)
    }

    /// Mark `block` as failed, and its known descendants as descending from a failed block.
    ///
    /// The active chain is left where it is. Disconnecting the invalidated blocks, and undoing their
    /// effect on the coin set, is up to the caller.
    pub fn invalidate_block(&self, block: &CryptoHash) -> Result<usize, BlockIndexError> {
        let descendants = {
            let mut inner = self.write_inner();
            let id = lookup(&inner.graph, block)?;
            inner.graph.mark_failed(id).len()
        };
        self.fire(Event::InvalidateBlock(InvalidateBlockEvent {
            timestamp: SystemTime::now(),
            block: *block,
            descendants,
        }));
        Ok(descendants)
    }

    /* ↓↓↓ Coins ↓↓↓ */

    /// Open a private cache over the shared root cache.
    pub fn new_cache(&self) -> CoinsViewCache<&ChainState<K>> {
        CoinsViewCache::new(self)
    }

    /// Flush `child` into the shared root cache and make `tip` the tip of the active chain, as one
    /// step: no reader can see the coins of the new tip with the old active chain, or vice versa.
    ///
    /// `tip` is `None` to empty the active chain. If `tip` is not a linked entry of the block index,
    /// nothing changes and `child` keeps its pending changes.
    pub fn update_tip(
        &self,
        child: &mut CoinsViewCache<&ChainState<K>>,
        tip: Option<&CryptoHash>,
    ) -> Result<(), ChainStateError> {
        // Entries are never removed, so the id stays valid after the read lock is released.
        let tip_id = match tip {
            Some(tip) => {
                let inner = self.read_inner();
                let id = lookup(&inner.graph, tip)?;
                if !inner.graph[id].is_linked() {
                    return Err(BlockIndexError::InconsistentIndex {
                        block: *tip,
                        reason: "entry is not linked",
                    }
                    .into());
                }
                Some(id)
            }
            None => None,
        };

        let mut flush_coins_event = None;
        let mut height = BlockHeight::UNKNOWN;
        child.flush_with(|chain_state, batch| {
            let counts = (batch.dirty_coins(), batch.dirty_anchors(), batch.dirty_nullifiers());
            let mut inner = chain_state.write_inner();
            batch.forget_freshness();
            inner.coins.batch_write(batch)?;
            inner
                .coins
                .set_best_block(tip.copied().unwrap_or_else(CryptoHash::zero));

            let ChainStateInner { graph, chain, .. } = &mut *inner;
            chain.set_tip(graph, tip_id);
            height = chain.height();
            chain_state.height.store(height.int(), Ordering::Release);

            flush_coins_event = Some(FlushCoinsEvent {
                timestamp: SystemTime::now(),
                coins: counts.0,
                anchors: counts.1,
                nullifiers: counts.2,
            });
            Ok(())
        })?;

        if let Some(flush_coins_event) = flush_coins_event {
            self.fire(Event::FlushCoins(flush_coins_event));
        }
        self.fire(Event::UpdateTip(UpdateTipEvent {
            timestamp: SystemTime::now(),
            tip: tip.copied(),
            height,
        }));

        if self.configuration.check_block_index {
            let inner = self.read_inner();
            inner.graph.check(&inner.chain)?;
        }
        Ok(())
    }

    /// Write the changed block index entries and then the shared root cache to the Key-Value store.
    ///
    /// The block index goes first, so the persisted best block is always an indexed block. If either
    /// write fails, what was not written stays pending in memory.
    pub fn flush_to_disk(&self) -> Result<(), ChainStateError> {
        let batch_write_event = {
            let mut inner = self.write_inner();
            let ChainStateInner { graph, coins, .. } = &mut *inner;

            let block_index_entries =
                disk::write_block_index(graph, coins.base_mut().kv_store_mut())?;

            let mut counts = (0, 0, 0);
            coins.flush_with(|db, batch| {
                counts = (batch.dirty_coins(), batch.dirty_anchors(), batch.dirty_nullifiers());
                db.batch_write(batch)
            })?;

            BatchWriteEvent {
                timestamp: SystemTime::now(),
                best_block: coins.get_best_block()?,
                coins: counts.0,
                anchors: counts.1,
                nullifiers: counts.2,
                block_index_entries,
            }
        };
        self.fire(Event::BatchWrite(batch_write_event));
        Ok(())
    }

    /// Estimated heap memory held by the shared root cache.
    pub fn coins_cache_usage(&self) -> usize {
        self.read_inner().coins.dynamic_usage()
    }

    /// Whether the shared root cache has outgrown
    /// [`max_coins_cache_usage`](Configuration::max_coins_cache_usage).
    pub fn coins_cache_over_limit(&self) -> bool {
        self.coins_cache_usage() > self.configuration.max_coins_cache_usage
    }

    /// Statistics of the coin set as last written to the Key-Value store.
    pub fn persisted_stats(&self) -> Result<CoinsStats, CoinsViewError> {
        self.read_inner().coins.base().stats()
    }

    /// Check the memory accounting of the shared root cache and the consistency of the block index.
    pub fn self_check(&self) -> Result<(), ChainStateError> {
        let inner = self.read_inner();
        inner.coins.self_check()?;
        inner.graph.check(&inner.chain)?;
        Ok(())
    }
}

fn lookup(graph: &BlockIndexGraph, block: &CryptoHash) -> Result<BlockIndexId, BlockIndexError> {
    graph
        .lookup(block)
        .ok_or(BlockIndexError::UnknownBlock { block: *block })
}

impl<K: KVStore> CoinsView for &ChainState<K> {
    fn get_coins(&self, txid: &CryptoHash) -> Result<Option<Coins>, CoinsViewError> {
        self.read_inner().coins.get_coins(txid)
    }

    fn have_coins(&self, txid: &CryptoHash) -> Result<bool, CoinsViewError> {
        self.read_inner().coins.have_coins(txid)
    }

    fn get_anchor_at<P: CachedPool>(
        &self,
        root: &CryptoHash,
    ) -> Result<Option<IncrementalMerkleTree<P>>, CoinsViewError> {
        self.read_inner().coins.get_anchor_at(root)
    }

    fn get_nullifier(
        &self,
        nullifier: &CryptoHash,
        pool: ShieldedType,
    ) -> Result<bool, CoinsViewError> {
        self.read_inner().coins.get_nullifier(nullifier, pool)
    }

    fn get_best_anchor(&self, pool: ShieldedType) -> Result<CryptoHash, CoinsViewError> {
        self.read_inner().coins.get_best_anchor(pool)
    }

    fn get_best_block(&self) -> Result<CryptoHash, CoinsViewError> {
        self.read_inner().coins.get_best_block()
    }

    /// Merge a private cache's changes into the shared root cache.
    ///
    /// Other private caches may have been flushed in since `batch` was taken, so what `batch` believed
    /// about its parent when its entries were cached no longer holds. Its FRESH flags are dropped and
    /// every dirty entry is written.
    fn batch_write(&mut self, batch: &mut CoinsBatch) -> Result<(), CoinsViewError> {
        let counts = (batch.dirty_coins(), batch.dirty_anchors(), batch.dirty_nullifiers());
        {
            let mut inner = self.write_inner();
            batch.forget_freshness();
            inner.coins.batch_write(batch)?;
        }
        self.fire(Event::FlushCoins(FlushCoinsEvent {
            timestamp: SystemTime::now(),
            coins: counts.0,
            anchors: counts.1,
            nullifiers: counts.2,
        }));
        Ok(())
    }
}

#[derive(Debug)]
pub enum ChainStateError {
    CoinsViewError(CoinsViewError),
    BlockIndexError(BlockIndexError),
    BlockIndexLoadError(BlockIndexLoadError),
    BlockIndexWriteError(BlockIndexWriteError),
}

impl From<CoinsViewError> for ChainStateError {
    fn from(value: CoinsViewError) -> Self {
        ChainStateError::CoinsViewError(value)
    }
}

impl From<BlockIndexError> for ChainStateError {
    fn from(value: BlockIndexError) -> Self {
        ChainStateError::BlockIndexError(value)
    }
}

impl From<BlockIndexLoadError> for ChainStateError {
    fn from(value: BlockIndexLoadError) -> Self {
        ChainStateError::BlockIndexLoadError(value)
    }
}

impl From<BlockIndexWriteError> for ChainStateError {
    fn from(value: BlockIndexWriteError) -> Self {
        ChainStateError::BlockIndexWriteError(value)
    }
}

impl Display for ChainStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStateError::CoinsViewError(err) => Display::fmt(err, f),
            ChainStateError::BlockIndexError(err) => Display::fmt(err, f),
            ChainStateError::BlockIndexLoadError(err) => Display::fmt(err, f),
            ChainStateError::BlockIndexWriteError(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for ChainStateError {}
