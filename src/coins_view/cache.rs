/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The layered, copy-on-write cache over a [`CoinsView`].
//!
//! ## Coins
//!
//! Coins are read through from the base on first access and kept in the cache. All changes go through a
//! [`CoinsModifier`]. A record whose outputs are all spent is *pruned*: it stays in the cache as a
//! pending removal until the cache is flushed, unless the base never had it (FRESH), in which case it
//! disappears right away.
//!
//! ## Anchors
//!
//! Each shielded pool has a best anchor, the root of its commitment tree at the best block. Connecting a
//! block [pushes](CoinsViewCache::push_anchor) the tree after the block, disconnecting it
//! [pops](CoinsViewCache::pop_anchor) back to the root before the block. Popping does not delete the
//! tree; it marks the cached entry as not entered, and that removal is carried through every cache level
//! on flush like any other change.
//!
//! ## Nullifiers
//!
//! Revealed nullifiers are entered, unrevealed ones are not. A nullifier set back to unrevealed becomes
//! a pending removal, exactly like a pruned coin.

use std::{collections::hash_map::Entry, mem};

use crate::types::{
    coins::{Coins, OutPoint, TxOut},
    data_types::{Amount, CryptoHash, ShieldedType},
    merkle::{IncrementalMerkleTree, Sapling, ShieldedPool, Sprout},
};

use super::{
    entries::{
        AnchorCacheEntry, CacheFlags, CachedPool, CoinsCacheEntry, CoinsMap, NullifierCacheEntry,
        PoolCache, ShieldedCaches,
    },
    memusage,
    modifier::CoinsModifier,
    CoinsBatch, CoinsView, CoinsViewError,
};

/// Nullifiers revealed and anchors referenced by one transaction's shielded spends.
#[derive(Clone, Debug, Default)]
pub struct ShieldedSpends {
    pub sprout_nullifiers: Vec<CryptoHash>,
    pub sprout_anchors: Vec<CryptoHash>,
    pub sapling_nullifiers: Vec<CryptoHash>,
    pub sapling_anchors: Vec<CryptoHash>,
}

pub struct CoinsViewCache<B: CoinsView> {
    base: B,
    coins: CoinsMap,
    /// `None` unless changed in this cache; reads then fall through to the base.
    best_block: Option<CryptoHash>,
    shielded: ShieldedCaches,
    /// Heap usage of every `Coins` in `coins`, kept up to date on every mutation.
    cached_coins_usage: usize,
}

impl<B: CoinsView> CoinsViewCache<B> {
    pub fn new(base: B) -> Self {
        Self {
            base,
            coins: CoinsMap::new(),
            best_block: None,
            shielded: ShieldedCaches::default(),
            cached_coins_usage: 0,
        }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub(crate) fn base_mut(&mut self) -> &mut B {
        &mut self.base
    }

    /// Discard everything pending in this cache and return the base.
    pub fn into_base(self) -> B {
        self.base
    }

    /* ↓↓↓ Coins ↓↓↓ */

    fn fetch_coins(
        &mut self,
        txid: &CryptoHash,
    ) -> Result<Option<&mut CoinsCacheEntry>, CoinsViewError> {
        if !self.coins.contains_key(txid) {
            let Some(coins) = self.base.get_coins(txid)? else {
                return Ok(None);
            };
            // The base only has a pending removal, so as far as this cache goes it is new.
            let flags = if coins.is_pruned() {
                CacheFlags::FRESH
            } else {
                CacheFlags::NONE
            };
            self.cached_coins_usage += coins.dynamic_memory_usage();
            self.coins.insert(*txid, CoinsCacheEntry { coins, flags });
        }
        Ok(self.coins.get_mut(txid))
    }

    /// The coins of `txid`, reading them through into this cache. Does not mark anything dirty.
    pub fn access_coins(&mut self, txid: &CryptoHash) -> Result<Option<&Coins>, CoinsViewError> {
        Ok(self.fetch_coins(txid)?.map(|entry| &entry.coins))
    }

    /// Get a handle through which the coins of `txid` can be changed. If no view has them, the handle
    /// starts from an empty, pruned record that is FRESH in this cache.
    pub fn modify_coins(&mut self, txid: &CryptoHash) -> Result<CoinsModifier<'_>, CoinsViewError> {
        if !self.coins.contains_key(txid) {
            let (coins, flags) = match self.base.get_coins(txid)? {
                None => (Coins::default(), CacheFlags::FRESH),
                Some(coins) if coins.is_pruned() => (coins, CacheFlags::FRESH),
                Some(coins) => (coins, CacheFlags::NONE),
            };
            self.cached_coins_usage += coins.dynamic_memory_usage();
            self.coins.insert(*txid, CoinsCacheEntry { coins, flags });
        }
        if let Some(entry) = self.coins.get_mut(txid) {
            // Assume every handle changes the record.
            entry.flags |= CacheFlags::DIRTY;
        }
        Ok(CoinsModifier::new(
            &mut self.coins,
            &mut self.cached_coins_usage,
            *txid,
        ))
    }

    /// Whether this cache itself holds unspent coins for `txid`, without asking the base.
    pub fn have_coins_in_cache(&self, txid: &CryptoHash) -> bool {
        self.coins
            .get(txid)
            .map_or(false, |entry| !entry.coins.is_pruned())
    }

    /// Drop the cached coins of `txid` if this cache has not changed them.
    pub fn uncache(&mut self, txid: &CryptoHash) {
        if let Entry::Occupied(occupied) = self.coins.entry(*txid) {
            if !occupied.get().flags.contains(CacheFlags::DIRTY) {
                self.cached_coins_usage -= occupied.get().coins.dynamic_memory_usage();
                occupied.remove();
            }
        }
    }

    pub fn access_output(&mut self, outpoint: &OutPoint) -> Result<Option<&TxOut>, CoinsViewError> {
        Ok(self
            .access_coins(&outpoint.txid)?
            .and_then(|coins| coins.output(outpoint.index)))
    }

    /// Whether every one of `inputs` is available to be spent.
    pub fn have_inputs(&mut self, inputs: &[OutPoint]) -> Result<bool, CoinsViewError> {
        for input in inputs {
            if self.access_output(input)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Total value of `inputs`, or `None` if any of them is not available.
    pub fn value_in(&mut self, inputs: &[OutPoint]) -> Result<Option<Amount>, CoinsViewError> {
        let mut total: Amount = 0;
        for input in inputs {
            match self.access_output(input)? {
                Some(output) => total += output.value,
                None => return Ok(None),
            }
        }
        Ok(Some(total))
    }

    /// Number of coin records held by this cache.
    pub fn cache_size(&self) -> usize {
        self.coins.len()
    }

    /* ↓↓↓ Best Block ↓↓↓ */

    pub fn set_best_block(&mut self, block: CryptoHash) {
        self.best_block = Some(block);
    }

    /* ↓↓↓ Anchors ↓↓↓ */

    /// Make `root` the best anchor of `P` without touching the anchor set.
    pub fn set_best_anchor<P: CachedPool>(&mut self, root: CryptoHash) {
        P::pool_cache_mut(&mut self.shielded).best_anchor = Some(root);
    }

    /// Enter `tree` into the anchor set under its root, and make that root the best anchor.
    ///
    /// A block that does not change the tree pushes the current best tree again. That is a no-op.
    pub fn push_anchor<P: CachedPool>(
        &mut self,
        tree: IncrementalMerkleTree<P>,
    ) -> Result<(), CoinsViewError> {
        let current_root = self.get_best_anchor(P::TYPE)?;
        let new_root = tree.root();
        if current_root == new_root {
            return Ok(());
        }

        let absent_in_base = if P::pool_cache(&self.shielded).anchors.contains_key(&new_root) {
            false
        } else {
            self.base.get_anchor_at::<P>(&new_root)?.is_none()
        };

        let pool = P::pool_cache_mut(&mut self.shielded);
        match pool.anchors.entry(new_root) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.entered = true;
                entry.tree = tree;
                entry.flags |= CacheFlags::DIRTY;
            }
            Entry::Vacant(vacant) => {
                let mut flags = CacheFlags::DIRTY;
                if absent_in_base {
                    flags |= CacheFlags::FRESH;
                }
                vacant.insert(AnchorCacheEntry {
                    entered: true,
                    tree,
                    flags,
                });
            }
        }
        pool.best_anchor = Some(new_root);
        Ok(())
    }

    /// Remove the current best anchor of `P` from the anchor set, and make `new_root` the best anchor.
    ///
    /// Fails with [`AnchorExpectedButNotFound`](CoinsViewError::AnchorExpectedButNotFound) if the current
    /// best anchor cannot be resolved, since then this view is corrupt.
    pub fn pop_anchor<P: CachedPool>(&mut self, new_root: CryptoHash) -> Result<(), CoinsViewError> {
        let current_root = self.get_best_anchor(P::TYPE)?;
        if current_root == new_root {
            return Ok(());
        }

        // The empty tree is implicitly in every anchor set and is never removed.
        if current_root != P::empty_root() {
            self.fetch_anchor::<P>(&current_root)?;
            let entry = P::pool_cache_mut(&mut self.shielded)
                .anchors
                .get_mut(&current_root)
                .ok_or(CoinsViewError::AnchorExpectedButNotFound {
                    pool: P::TYPE,
                    root: current_root,
                })?;
            entry.entered = false;
            entry.flags |= CacheFlags::DIRTY;
        }

        P::pool_cache_mut(&mut self.shielded).best_anchor = Some(new_root);
        Ok(())
    }

    /// Bring the entered tree at `root` into this cache.
    fn fetch_anchor<P: CachedPool>(&mut self, root: &CryptoHash) -> Result<(), CoinsViewError> {
        let not_found = CoinsViewError::AnchorExpectedButNotFound {
            pool: P::TYPE,
            root: *root,
        };
        match P::pool_cache(&self.shielded).anchors.get(root) {
            Some(entry) if entry.entered => Ok(()),
            Some(_) => Err(not_found),
            None => {
                let tree = self.base.get_anchor_at::<P>(root)?.ok_or(not_found)?;
                P::pool_cache_mut(&mut self.shielded).anchors.insert(
                    *root,
                    AnchorCacheEntry {
                        entered: true,
                        tree,
                        flags: CacheFlags::NONE,
                    },
                );
                Ok(())
            }
        }
    }

    /* ↓↓↓ Nullifiers ↓↓↓ */

    /// Mark `nullifier` as revealed (`present`) or unrevealed in `pool`.
    pub fn set_nullifier(
        &mut self,
        nullifier: &CryptoHash,
        pool: ShieldedType,
        present: bool,
    ) -> Result<(), CoinsViewError> {
        if !self.shielded.nullifiers(pool).contains_key(nullifier) {
            let in_base = self.base.get_nullifier(nullifier, pool)?;
            let flags = if in_base {
                CacheFlags::NONE
            } else {
                CacheFlags::FRESH
            };
            self.shielded.nullifiers_mut(pool).insert(
                *nullifier,
                NullifierCacheEntry {
                    entered: in_base,
                    flags,
                },
            );
        }
        if let Some(entry) = self.shielded.nullifiers_mut(pool).get_mut(nullifier) {
            entry.entered = present;
            entry.flags |= CacheFlags::DIRTY;
        }
        Ok(())
    }

    /// Whether every nullifier in `spends` is still unrevealed, and every anchor in it is known.
    pub fn check_shielded_requirements(&self, spends: &ShieldedSpends) -> Result<bool, CoinsViewError> {
        for nullifier in &spends.sprout_nullifiers {
            if self.get_nullifier(nullifier, ShieldedType::Sprout)? {
                return Ok(false);
            }
        }
        for nullifier in &spends.sapling_nullifiers {
            if self.get_nullifier(nullifier, ShieldedType::Sapling)? {
                return Ok(false);
            }
        }
        for anchor in &spends.sprout_anchors {
            if self.get_anchor_at::<Sprout>(anchor)?.is_none() {
                return Ok(false);
            }
        }
        for anchor in &spends.sapling_anchors {
            if self.get_anchor_at::<Sapling>(anchor)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /* ↓↓↓ Flushing ↓↓↓ */

    /// Write every pending change into the base as one batch, leaving this cache empty.
    ///
    /// If the base rejects the batch, nothing changes: every pending change is still here.
    pub fn flush(&mut self) -> Result<(), CoinsViewError> {
        self.flush_with(|base, batch| base.batch_write(batch))
    }

    /// Like [`flush`](Self::flush), with `write` deciding how the batch reaches the base.
    pub(crate) fn flush_with<F>(&mut self, write: F) -> Result<(), CoinsViewError>
    where
        F: FnOnce(&mut B, &mut CoinsBatch) -> Result<(), CoinsViewError>,
    {
        let mut batch = CoinsBatch {
            coins: mem::take(&mut self.coins),
            best_block: self.best_block.take(),
            shielded: mem::take(&mut self.shielded),
        };
        match write(&mut self.base, &mut batch) {
            Ok(()) => {
                self.cached_coins_usage = 0;
                Ok(())
            }
            Err(err) => {
                self.coins = batch.coins;
                self.best_block = batch.best_block;
                self.shielded = batch.shielded;
                Err(err)
            }
        }
    }

    /* ↓↓↓ Memory accounting ↓↓↓ */

    /// Estimated heap memory held by this cache.
    pub fn dynamic_usage(&self) -> usize {
        memusage::hash_map_usage(&self.coins)
            + pool_usage(&self.shielded.sprout)
            + pool_usage(&self.shielded.sapling)
            + self.cached_coins_usage
    }

    /// Recompute the heap usage of every cached coin record and compare it with the tracked total.
    pub fn self_check(&self) -> Result<(), CoinsViewError> {
        let recomputed: usize = self
            .coins
            .values()
            .map(|entry| entry.coins.dynamic_memory_usage())
            .sum();
        if recomputed != self.cached_coins_usage {
            return Err(CoinsViewError::MemoryUsageMismatch {
                tracked: self.cached_coins_usage,
                recomputed,
            });
        }
        Ok(())
    }
}

fn pool_usage<P: ShieldedPool>(pool: &PoolCache<P>) -> usize {
    let trees: usize = pool
        .anchors
        .values()
        .map(|entry| entry.tree.dynamic_memory_usage())
        .sum();
    memusage::hash_map_usage(&pool.anchors) + memusage::hash_map_usage(&pool.nullifiers) + trees
}

impl<B: CoinsView> CoinsView for CoinsViewCache<B> {
    fn get_coins(&self, txid: &CryptoHash) -> Result<Option<Coins>, CoinsViewError> {
        match self.coins.get(txid) {
            Some(entry) => Ok(Some(entry.coins.clone())),
            None => self.base.get_coins(txid),
        }
    }

    fn have_coins(&self, txid: &CryptoHash) -> Result<bool, CoinsViewError> {
        match self.coins.get(txid) {
            Some(entry) => Ok(!entry.coins.is_pruned()),
            None => self.base.have_coins(txid),
        }
    }

    fn get_anchor_at<P: CachedPool>(
        &self,
        root: &CryptoHash,
    ) -> Result<Option<IncrementalMerkleTree<P>>, CoinsViewError> {
        if *root == P::empty_root() {
            return Ok(Some(IncrementalMerkleTree::new()));
        }
        match P::pool_cache(&self.shielded).anchors.get(root) {
            Some(entry) if entry.entered => Ok(Some(entry.tree.clone())),
            Some(_) => Ok(None),
            None => self.base.get_anchor_at(root),
        }
    }

    fn get_nullifier(
        &self,
        nullifier: &CryptoHash,
        pool: ShieldedType,
    ) -> Result<bool, CoinsViewError> {
        match self.shielded.nullifiers(pool).get(nullifier) {
            Some(entry) => Ok(entry.entered),
            None => self.base.get_nullifier(nullifier, pool),
        }
    }

    fn get_best_anchor(&self, pool: ShieldedType) -> Result<CryptoHash, CoinsViewError> {
        match self.shielded.best_anchor(pool) {
            Some(root) => Ok(root),
            None => self.base.get_best_anchor(pool),
        }
    }

    fn get_best_block(&self) -> Result<CryptoHash, CoinsViewError> {
        match self.best_block {
            Some(block) => Ok(block),
            None => self.base.get_best_block(),
        }
    }

    fn batch_write(&mut self, batch: &mut CoinsBatch) -> Result<(), CoinsViewError> {
        for (txid, child) in batch.coins.drain() {
            if !child.flags.contains(CacheFlags::DIRTY) {
                continue;
            }
            let child_fresh = child.flags.contains(CacheFlags::FRESH);
            match self.coins.entry(txid) {
                Entry::Vacant(vacant) => {
                    // Created and fully spent below without this cache ever seeing it.
                    if child_fresh && child.coins.is_pruned() {
                        continue;
                    }
                    let mut flags = CacheFlags::DIRTY;
                    if child_fresh {
                        flags |= CacheFlags::FRESH;
                    }
                    self.cached_coins_usage += child.coins.dynamic_memory_usage();
                    vacant.insert(CoinsCacheEntry {
                        coins: child.coins,
                        flags,
                    });
                }
                Entry::Occupied(mut occupied) => {
                    self.cached_coins_usage -= occupied.get().coins.dynamic_memory_usage();
                    if occupied.get().flags.contains(CacheFlags::FRESH) && child.coins.is_pruned() {
                        // Our base never had it either.
                        occupied.remove();
                    } else {
                        let entry = occupied.get_mut();
                        entry.coins = child.coins;
                        entry.flags |= CacheFlags::DIRTY;
                        self.cached_coins_usage += entry.coins.dynamic_memory_usage();
                    }
                }
            }
        }

        self.shielded.sprout.absorb(&mut batch.shielded.sprout);
        self.shielded.sapling.absorb(&mut batch.shielded.sapling);

        if let Some(block) = batch.best_block.take() {
            self.best_block = Some(block);
        }
        Ok(())
    }
}
