/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Exclusive mutation handle over one cached coin record.

use std::{
    mem,
    ops::{Deref, DerefMut},
};

use crate::types::{coins::Coins, data_types::CryptoHash};

use super::entries::{CacheFlags, CoinsMap};

/// Returned by [`CoinsViewCache::modify_coins`](super::cache::CoinsViewCache::modify_coins).
///
/// Dereferences to the [`Coins`] of one transaction. The entry was marked DIRTY when the handle was
/// created. When the handle is dropped, the record is cleaned up and the cache's memory accounting is
/// updated. A FRESH record that ends up pruned is removed from the cache altogether.
///
/// The handle mutably borrows the cache, so no other access to the cache can happen while it lives.
pub struct CoinsModifier<'a> {
    map: &'a mut CoinsMap,
    cached_coins_usage: &'a mut usize,
    txid: CryptoHash,
    coins: Coins,
    usage_before: usize,
}

impl<'a> CoinsModifier<'a> {
    /// `map` must hold an entry for `txid`, whose usage is included in `cached_coins_usage`.
    pub(crate) fn new(
        map: &'a mut CoinsMap,
        cached_coins_usage: &'a mut usize,
        txid: CryptoHash,
    ) -> CoinsModifier<'a> {
        let coins = map
            .get_mut(&txid)
            .map(|entry| mem::take(&mut entry.coins))
            .unwrap_or_default();
        let usage_before = coins.dynamic_memory_usage();
        CoinsModifier {
            map,
            cached_coins_usage,
            txid,
            coins,
            usage_before,
        }
    }

    pub fn txid(&self) -> CryptoHash {
        self.txid
    }
}

impl Deref for CoinsModifier<'_> {
    type Target = Coins;

    fn deref(&self) -> &Coins {
        &self.coins
    }
}

impl DerefMut for CoinsModifier<'_> {
    fn deref_mut(&mut self) -> &mut Coins {
        &mut self.coins
    }
}

impl Drop for CoinsModifier<'_> {
    fn drop(&mut self) {
        self.coins.cleanup();
        *self.cached_coins_usage -= self.usage_before;

        let fresh = self
            .map
            .get(&self.txid)
            .map_or(false, |entry| entry.flags.contains(CacheFlags::FRESH));
        if fresh && self.coins.is_pruned() {
            self.map.remove(&self.txid);
        } else {
            *self.cached_coins_usage += self.coins.dynamic_memory_usage();
            let entry = self.map.entry(self.txid).or_default();
            entry.coins = mem::take(&mut self.coins);
        }
    }
}
