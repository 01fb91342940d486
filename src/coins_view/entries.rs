/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cache entries, their flags, and the rule for merging a child's entries into a parent's.
//!
//! ## Flags
//!
//! - `DIRTY`: the entry may differ from the parent's version and must be written on flush.
//! - `FRESH`: the parent had no (or only a pruned / not-entered) version of the entry when it was first
//!   cached here. A fresh entry that ends up pruned or not-entered can be dropped on flush instead of
//!   being written as a tombstone, since there is nothing in the parent to erase.

use std::{
    collections::{hash_map::Entry, HashMap},
    ops::{BitOr, BitOrAssign},
};

use crate::types::{
    coins::Coins,
    data_types::{CryptoHash, ShieldedType},
    merkle::{IncrementalMerkleTree, Sapling, ShieldedPool, Sprout},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheFlags(u8);

impl CacheFlags {
    pub const NONE: CacheFlags = CacheFlags(0);
    pub const DIRTY: CacheFlags = CacheFlags(1 << 0);
    pub const FRESH: CacheFlags = CacheFlags(1 << 1);

    pub fn contains(&self, other: CacheFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: CacheFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: CacheFlags) {
        self.0 &= !other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CacheFlags {
    type Output = CacheFlags;

    fn bitor(self, rhs: CacheFlags) -> CacheFlags {
        CacheFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CacheFlags {
    fn bitor_assign(&mut self, rhs: CacheFlags) {
        self.0 |= rhs.0;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoinsCacheEntry {
    pub coins: Coins,
    pub flags: CacheFlags,
}

/// A commitment tree snapshot cached under its root. `entered == false` is a pending removal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnchorCacheEntry<P: ShieldedPool> {
    pub entered: bool,
    pub tree: IncrementalMerkleTree<P>,
    pub flags: CacheFlags,
}

/// A cached nullifier. `entered == false` means unrevealed, and is never stored by the root.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NullifierCacheEntry {
    pub entered: bool,
    pub flags: CacheFlags,
}

pub type CoinsMap = HashMap<CryptoHash, CoinsCacheEntry>;
pub type AnchorsMap<P> = HashMap<CryptoHash, AnchorCacheEntry<P>>;
pub type NullifiersMap = HashMap<CryptoHash, NullifierCacheEntry>;

/// Pending anchors, nullifiers, and best anchor of one shielded pool.
#[derive(Clone, Debug)]
pub struct PoolCache<P: ShieldedPool> {
    pub anchors: AnchorsMap<P>,
    pub nullifiers: NullifiersMap,
    /// `None` unless the best anchor was changed in this cache.
    pub best_anchor: Option<CryptoHash>,
}

impl<P: ShieldedPool> Default for PoolCache<P> {
    fn default() -> Self {
        Self {
            anchors: HashMap::new(),
            nullifiers: HashMap::new(),
            best_anchor: None,
        }
    }
}

impl<P: ShieldedPool> PoolCache<P> {
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty() && self.nullifiers.is_empty() && self.best_anchor.is_none()
    }

    /// Merge `child` into this cache, leaving `child` empty.
    pub(crate) fn absorb(&mut self, child: &mut PoolCache<P>) {
        batch_write_shielded(&mut self.anchors, &mut child.anchors);
        batch_write_shielded(&mut self.nullifiers, &mut child.nullifiers);
        if let Some(best_anchor) = child.best_anchor.take() {
            self.best_anchor = Some(best_anchor);
        }
    }
}

/// The per-pool caches of both shielded pools.
#[derive(Clone, Debug, Default)]
pub struct ShieldedCaches {
    pub sprout: PoolCache<Sprout>,
    pub sapling: PoolCache<Sapling>,
}

impl ShieldedCaches {
    pub fn nullifiers(&self, pool: ShieldedType) -> &NullifiersMap {
        match pool {
            ShieldedType::Sprout => &self.sprout.nullifiers,
            ShieldedType::Sapling => &self.sapling.nullifiers,
        }
    }

    pub fn nullifiers_mut(&mut self, pool: ShieldedType) -> &mut NullifiersMap {
        match pool {
            ShieldedType::Sprout => &mut self.sprout.nullifiers,
            ShieldedType::Sapling => &mut self.sapling.nullifiers,
        }
    }

    pub fn best_anchor(&self, pool: ShieldedType) -> Option<CryptoHash> {
        match pool {
            ShieldedType::Sprout => self.sprout.best_anchor,
            ShieldedType::Sapling => self.sapling.best_anchor,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sprout.is_empty() && self.sapling.is_empty()
    }
}

/// A [`ShieldedPool`] whose caches can be picked out of [`ShieldedCaches`] at compile time.
pub trait CachedPool: ShieldedPool {
    fn pool_cache(caches: &ShieldedCaches) -> &PoolCache<Self>;
    fn pool_cache_mut(caches: &mut ShieldedCaches) -> &mut PoolCache<Self>;
}

impl CachedPool for Sprout {
    fn pool_cache(caches: &ShieldedCaches) -> &PoolCache<Self> {
        &caches.sprout
    }

    fn pool_cache_mut(caches: &mut ShieldedCaches) -> &mut PoolCache<Self> {
        &mut caches.sprout
    }
}

impl CachedPool for Sapling {
    fn pool_cache(caches: &ShieldedCaches) -> &PoolCache<Self> {
        &caches.sapling
    }

    fn pool_cache_mut(caches: &mut ShieldedCaches) -> &mut PoolCache<Self> {
        &mut caches.sapling
    }
}

/// What the flush rule needs to know about an anchor or nullifier entry.
pub(crate) trait ShieldedCacheEntry {
    fn flags(&self) -> CacheFlags;
    fn flags_mut(&mut self) -> &mut CacheFlags;
    fn entered(&self) -> bool;

    /// Take over the value (not the flags) of `child`.
    fn assign(&mut self, child: Self);
}

impl<P: ShieldedPool> ShieldedCacheEntry for AnchorCacheEntry<P> {
    fn flags(&self) -> CacheFlags {
        self.flags
    }

    fn flags_mut(&mut self) -> &mut CacheFlags {
        &mut self.flags
    }

    fn entered(&self) -> bool {
        self.entered
    }

    fn assign(&mut self, child: Self) {
        self.entered = child.entered;
        self.tree = child.tree;
    }
}

impl ShieldedCacheEntry for NullifierCacheEntry {
    fn flags(&self) -> CacheFlags {
        self.flags
    }

    fn flags_mut(&mut self) -> &mut CacheFlags {
        &mut self.flags
    }

    fn entered(&self) -> bool {
        self.entered
    }

    fn assign(&mut self, child: Self) {
        self.entered = child.entered;
    }
}

/// Merge the dirty entries of `child` into `parent`, draining `child`.
///
/// Shared by the anchor and nullifier maps of both pools; mirrors the rule for coins with "not
/// entered" in place of "pruned".
pub(crate) fn batch_write_shielded<E: ShieldedCacheEntry>(
    parent: &mut HashMap<CryptoHash, E>,
    child: &mut HashMap<CryptoHash, E>,
) {
    for (key, mut child_entry) in child.drain() {
        if !child_entry.flags().contains(CacheFlags::DIRTY) {
            continue;
        }
        match parent.entry(key) {
            Entry::Vacant(vacant) => {
                let fresh = child_entry.flags().contains(CacheFlags::FRESH);
                // Added and removed again without the parent ever having it.
                if fresh && !child_entry.entered() {
                    continue;
                }
                let mut flags = CacheFlags::DIRTY;
                if fresh {
                    flags |= CacheFlags::FRESH;
                }
                *child_entry.flags_mut() = flags;
                vacant.insert(child_entry);
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().flags().contains(CacheFlags::FRESH) && !child_entry.entered() {
                    occupied.remove();
                } else {
                    let parent_entry = occupied.get_mut();
                    parent_entry.assign(child_entry);
                    parent_entry.flags_mut().insert(CacheFlags::DIRTY);
                }
            }
        }
    }
}
