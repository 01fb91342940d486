/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The root view, backed by the user-provided [key-value store](crate::store).

use std::collections::BTreeMap;

use crate::{
    store::{
        pluggables::{self, KVGet, KVStore, StateWriteBatch},
        variables,
    },
    types::{
        coins::Coins,
        data_types::{sha256d, Amount, CryptoHash, ShieldedType},
        merkle::{IncrementalMerkleTree, Sapling, ShieldedPool, Sprout},
    },
};

use super::{
    entries::{CacheFlags, CachedPool, PoolCache},
    CoinsBatch, CoinsView, CoinsViewError,
};

/// Summary of the coin set stored in a [`CoinsViewDB`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoinsStats {
    pub best_block: CryptoHash,
    /// Number of transactions with at least one unspent output.
    pub transactions: u64,
    pub transaction_outputs: u64,
    pub total_amount: Amount,
    /// Size of the serialized coin set.
    pub serialized_size: u64,
    /// Digest of the serialized coin set, in txid order. Equal coin sets have equal digests.
    pub serialized_hash: CryptoHash,
}

/// The persisted root of every cache stack. Only stores what is actually there: fully spent coins,
/// popped anchors, and unrevealed nullifiers are absent.
pub struct CoinsViewDB<K: KVStore> {
    kv_store: K,
}

impl<K: KVStore> CoinsViewDB<K> {
    pub fn new(kv_store: K) -> Self {
        Self { kv_store }
    }

    pub fn kv_store(&self) -> &K {
        &self.kv_store
    }

    pub(crate) fn kv_store_mut(&mut self) -> &mut K {
        &mut self.kv_store
    }

    /// Walk the whole coin set.
    pub fn stats(&self) -> Result<CoinsStats, CoinsViewError> {
        let best_block = self.get_best_block()?;

        // Sorted, so that the digest does not depend on the key-value store's iteration order.
        let mut sorted = BTreeMap::new();
        for (key, value) in self.kv_store.scan_prefix(&variables::COINS) {
            if let Some(txid) = pluggables::hash_from_key(&key) {
                sorted.insert(txid, value);
            }
        }

        let mut serialized = Vec::from(best_block.bytes());
        let mut stats = CoinsStats {
            best_block,
            transactions: 0,
            transaction_outputs: 0,
            total_amount: 0,
            serialized_size: 0,
            serialized_hash: CryptoHash::zero(),
        };
        for (txid, value) in sorted {
            let coins: Coins = pluggables::deserialize_value(
                &value,
                pluggables::Key::Coins { txid },
            )?;
            stats.transactions += 1;
            stats.transaction_outputs += coins.unspent_count() as u64;
            stats.total_amount += coins.unspent_value();
            serialized.extend_from_slice(&txid.bytes());
            serialized.extend_from_slice(&value);
        }
        stats.serialized_size = serialized.len() as u64;
        stats.serialized_hash = sha256d(&serialized);
        Ok(stats)
    }
}

fn write_pool<W, P>(wb: &mut StateWriteBatch<W>, pool: &PoolCache<P>) -> Result<(), CoinsViewError>
where
    W: pluggables::WriteBatch,
    P: ShieldedPool,
{
    for (root, entry) in &pool.anchors {
        if !entry.flags.contains(CacheFlags::DIRTY) {
            continue;
        }
        if entry.entered {
            wb.set_anchor(root, &entry.tree)?;
        } else {
            wb.delete_anchor(P::TYPE, root);
        }
    }
    for (nullifier, entry) in &pool.nullifiers {
        if !entry.flags.contains(CacheFlags::DIRTY) {
            continue;
        }
        if entry.entered {
            wb.set_nullifier(P::TYPE, nullifier)?;
        } else {
            wb.delete_nullifier(P::TYPE, nullifier);
        }
    }
    if let Some(best_anchor) = &pool.best_anchor {
        wb.set_best_anchor(P::TYPE, best_anchor)?;
    }
    Ok(())
}

impl<K: KVStore> CoinsView for CoinsViewDB<K> {
    fn get_coins(&self, txid: &CryptoHash) -> Result<Option<Coins>, CoinsViewError> {
        Ok(self.kv_store.coins(txid)?)
    }

    fn have_coins(&self, txid: &CryptoHash) -> Result<bool, CoinsViewError> {
        Ok(self.kv_store.has_coins(txid))
    }

    fn get_anchor_at<P: CachedPool>(
        &self,
        root: &CryptoHash,
    ) -> Result<Option<IncrementalMerkleTree<P>>, CoinsViewError> {
        if *root == P::empty_root() {
            return Ok(Some(IncrementalMerkleTree::new()));
        }
        Ok(self.kv_store.anchor::<P>(root)?)
    }

    fn get_nullifier(
        &self,
        nullifier: &CryptoHash,
        pool: ShieldedType,
    ) -> Result<bool, CoinsViewError> {
        Ok(self.kv_store.nullifier(pool, nullifier)?)
    }

    fn get_best_anchor(&self, pool: ShieldedType) -> Result<CryptoHash, CoinsViewError> {
        let stored = self.kv_store.best_anchor(pool)?;
        Ok(stored.unwrap_or_else(|| match pool {
            ShieldedType::Sprout => Sprout::empty_root(),
            ShieldedType::Sapling => Sapling::empty_root(),
        }))
    }

    fn get_best_block(&self) -> Result<CryptoHash, CoinsViewError> {
        Ok(self.kv_store.best_block()?.unwrap_or_default())
    }

    /// Translate the dirty entries of `batch` into one write batch: pruned coins, not-entered anchors,
    /// and not-entered nullifiers become deletes, everything else becomes a put.
    fn batch_write(&mut self, batch: &mut CoinsBatch) -> Result<(), CoinsViewError> {
        let mut wb = StateWriteBatch::<K::WriteBatch>::new();

        for (txid, entry) in &batch.coins {
            if !entry.flags.contains(CacheFlags::DIRTY) {
                continue;
            }
            if entry.coins.is_pruned() {
                wb.delete_coins(txid);
            } else {
                wb.set_coins(txid, &entry.coins)?;
            }
        }

        write_pool(&mut wb, &batch.shielded.sprout)?;
        write_pool(&mut wb, &batch.shielded.sapling)?;

        if let Some(best_block) = &batch.best_block {
            wb.set_best_block(best_block)?;
        }

        self.kv_store.write(wb.into_inner())?;
        Ok(())
    }
}
