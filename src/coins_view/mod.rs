/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Views of the coin set and the shielded-pool ledgers, and the layered caches over them.
//!
//! # Views
//!
//! Anything that can answer the [`CoinsView`] read methods is a view: the persisted root
//! ([`CoinsViewDB`](db::CoinsViewDB)), a [`CoinsViewCache`](cache::CoinsViewCache) over some other view,
//! or the shared root cache of a [`ChainState`](crate::chain_state::ChainState).
//!
//! # Layered caches
//!
//! Validation opens a cache over whatever view is current, mutates coins, anchors, and nullifiers in
//! it, and then either drops it (abort) or [flushes](cache::CoinsViewCache::flush) it into its base
//! (commit). Caches nest: a cache over a cache over the root is how speculative validation of a single
//! transaction inside the validation of a block is done.
//!
//! Flushing hands a [`CoinsBatch`] to the base's [`batch_write`](CoinsView::batch_write). The batch is
//! applied completely or not at all.

use std::fmt::{self, Display};

use crate::{
    store::pluggables::{KVGetError, KVSetError, KVWriteError},
    types::{
        coins::Coins,
        data_types::{CryptoHash, ShieldedType},
        merkle::IncrementalMerkleTree,
    },
};

use entries::{CacheFlags, CachedPool, CoinsMap, ShieldedCaches};

pub mod cache;

pub mod db;

pub mod entries;

pub mod memusage;

pub mod modifier;

/// Read access to a coin set and its shielded-pool ledgers, plus the ability to absorb a batch of
/// changes.
///
/// Reads have no side effects on the view. "Not found" is a normal result, never an error.
pub trait CoinsView {
    /// The coins of `txid`. May be a pruned record if a cache holds a pending removal.
    fn get_coins(&self, txid: &CryptoHash) -> Result<Option<Coins>, CoinsViewError>;

    /// Whether `txid` has any unspent output. Agrees with [`get_coins`](Self::get_coins).
    fn have_coins(&self, txid: &CryptoHash) -> Result<bool, CoinsViewError> {
        Ok(self
            .get_coins(txid)?
            .map_or(false, |coins| !coins.is_pruned()))
    }

    /// The commitment tree whose root is `root`. The empty tree is always found.
    fn get_anchor_at<P: CachedPool>(
        &self,
        root: &CryptoHash,
    ) -> Result<Option<IncrementalMerkleTree<P>>, CoinsViewError>;

    /// Whether `nullifier` has been revealed in `pool`.
    fn get_nullifier(&self, nullifier: &CryptoHash, pool: ShieldedType)
        -> Result<bool, CoinsViewError>;

    /// Root of the commitment tree of `pool` at the best block. The empty root if nothing was set.
    fn get_best_anchor(&self, pool: ShieldedType) -> Result<CryptoHash, CoinsViewError>;

    /// Hash of the block this view corresponds to. All zeroes if nothing was set.
    fn get_best_block(&self) -> Result<CryptoHash, CoinsViewError>;

    /// Apply `batch` atomically.
    ///
    /// On `Ok`, the batch may have been drained. On `Err`, the view is unchanged and so is `batch`.
    fn batch_write(&mut self, batch: &mut CoinsBatch) -> Result<(), CoinsViewError>;
}

impl<T: CoinsView> CoinsView for &mut T {
    fn get_coins(&self, txid: &CryptoHash) -> Result<Option<Coins>, CoinsViewError> {
        (**self).get_coins(txid)
    }

    fn have_coins(&self, txid: &CryptoHash) -> Result<bool, CoinsViewError> {
        (**self).have_coins(txid)
    }

    fn get_anchor_at<P: CachedPool>(
        &self,
        root: &CryptoHash,
    ) -> Result<Option<IncrementalMerkleTree<P>>, CoinsViewError> {
        (**self).get_anchor_at(root)
    }

    fn get_nullifier(
        &self,
        nullifier: &CryptoHash,
        pool: ShieldedType,
    ) -> Result<bool, CoinsViewError> {
        (**self).get_nullifier(nullifier, pool)
    }

    fn get_best_anchor(&self, pool: ShieldedType) -> Result<CryptoHash, CoinsViewError> {
        (**self).get_best_anchor(pool)
    }

    fn get_best_block(&self) -> Result<CryptoHash, CoinsViewError> {
        (**self).get_best_block()
    }

    fn batch_write(&mut self, batch: &mut CoinsBatch) -> Result<(), CoinsViewError> {
        (**self).batch_write(batch)
    }
}

/// Everything a cache hands to its base when it is flushed.
#[derive(Clone, Debug, Default)]
pub struct CoinsBatch {
    pub coins: CoinsMap,
    /// `None` unless the best block was changed in the flushed cache.
    pub best_block: Option<CryptoHash>,
    pub shielded: ShieldedCaches,
}

impl CoinsBatch {
    pub fn is_empty(&self) -> bool {
        self.coins.is_empty() && self.best_block.is_none() && self.shielded.is_empty()
    }

    pub fn dirty_coins(&self) -> usize {
        self.coins
            .values()
            .filter(|entry| entry.flags.contains(CacheFlags::DIRTY))
            .count()
    }

    pub fn dirty_anchors(&self) -> usize {
        let sprout = &self.shielded.sprout.anchors;
        let sapling = &self.shielded.sapling.anchors;
        sprout
            .values()
            .filter(|entry| entry.flags.contains(CacheFlags::DIRTY))
            .count()
            + sapling
                .values()
                .filter(|entry| entry.flags.contains(CacheFlags::DIRTY))
                .count()
    }

    pub fn dirty_nullifiers(&self) -> usize {
        [ShieldedType::Sprout, ShieldedType::Sapling]
            .into_iter()
            .flat_map(|pool| self.shielded.nullifiers(pool).values())
            .filter(|entry| entry.flags.contains(CacheFlags::DIRTY))
            .count()
    }

    /// Drop every FRESH flag.
    ///
    /// FRESH records what the parent looked like when the entry was first cached. When other writers
    /// may have flushed into the parent since, that is stale, and every entry must be written out.
    pub(crate) fn forget_freshness(&mut self) {
        for entry in self.coins.values_mut() {
            entry.flags.remove(CacheFlags::FRESH);
        }
        for entry in self.shielded.sprout.anchors.values_mut() {
            entry.flags.remove(CacheFlags::FRESH);
        }
        for entry in self.shielded.sapling.anchors.values_mut() {
            entry.flags.remove(CacheFlags::FRESH);
        }
        for pool in [ShieldedType::Sprout, ShieldedType::Sapling] {
            for entry in self.shielded.nullifiers_mut(pool).values_mut() {
                entry.flags.remove(CacheFlags::FRESH);
            }
        }
    }
}

#[derive(Debug)]
pub enum CoinsViewError {
    KVGetError(KVGetError),
    KVSetError(KVSetError),
    KVWriteError(KVWriteError),
    /// The best anchor of a pool could not be resolved to a tree. The view is corrupt.
    AnchorExpectedButNotFound {
        pool: ShieldedType,
        root: CryptoHash,
    },
    /// Returned by [`self_check`](cache::CoinsViewCache::self_check).
    MemoryUsageMismatch { tracked: usize, recomputed: usize },
}

impl From<KVGetError> for CoinsViewError {
    fn from(value: KVGetError) -> Self {
        CoinsViewError::KVGetError(value)
    }
}

impl From<KVSetError> for CoinsViewError {
    fn from(value: KVSetError) -> Self {
        CoinsViewError::KVSetError(value)
    }
}

impl From<KVWriteError> for CoinsViewError {
    fn from(value: KVWriteError) -> Self {
        CoinsViewError::KVWriteError(value)
    }
}

impl Display for CoinsViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinsViewError::KVGetError(err) => Display::fmt(err, f),
            CoinsViewError::KVSetError(err) => Display::fmt(err, f),
            CoinsViewError::KVWriteError(err) => Display::fmt(err, f),
            CoinsViewError::AnchorExpectedButNotFound { pool, root } => {
                write!(f, "{} anchor {} expected but not found", pool, root)
            }
            CoinsViewError::MemoryUsageMismatch {
                tracked,
                recomputed,
            } => write!(
                f,
                "tracked coins memory usage {} differs from recomputed {}",
                tracked, recomputed
            ),
        }
    }
}

impl std::error::Error for CoinsViewError {}
