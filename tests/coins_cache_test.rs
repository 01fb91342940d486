/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests for the layered coins cache: reading through, modifying, flushing through stacks of caches,
//! and the memory accounting.

use chainstate_rs::{
    coins_view::{cache::CoinsViewCache, db::CoinsViewDB, CoinsView, CoinsViewError},
    store::pluggables::KVGet,
    types::{
        coins::{OutPoint, TxOut},
        data_types::{CryptoHash, ShieldedType},
        merkle::{ShieldedPool, Sprout},
    },
};
use log::LevelFilter;

mod common;

use crate::common::{
    chains::{block_hash, coins, nullifier, tree, txid},
    logging::setup_logger,
    mem_db::MemDB,
};

/// Write `txid(3)` with a single output straight into `db`.
fn seed(db: &mut CoinsViewDB<MemDB>) {
    let mut cache = CoinsViewCache::new(db);
    *cache.modify_coins(&txid(3)).unwrap() = coins(&[7]);
    cache.flush().unwrap();
}

/// The same changes, applied at the bottom of every stack in `flush_through_nested_caches_test`.
fn apply_changes<B: CoinsView>(cache: &mut CoinsViewCache<B>) {
    // Created, and partially spent.
    {
        let mut modifier = cache.modify_coins(&txid(1)).unwrap();
        *modifier = coins(&[10, 20, 30]);
        modifier.spend(1).unwrap();
    }
    // Created and fully spent without the parent ever seeing it.
    {
        let mut modifier = cache.modify_coins(&txid(2)).unwrap();
        *modifier = coins(&[5]);
        modifier.spend(0).unwrap();
    }
    // Seeded in the root store, fully spent here.
    {
        let mut modifier = cache.modify_coins(&txid(3)).unwrap();
        modifier.spend(0).unwrap();
    }
    cache.push_anchor(tree::<Sprout>(1, 3)).unwrap();
    cache
        .set_nullifier(&nullifier(1), ShieldedType::Sapling, true)
        .unwrap();
    cache.set_best_block(block_hash(42));
}

fn check_root(db: &CoinsViewDB<MemDB>) {
    let created = db.get_coins(&txid(1)).unwrap().unwrap();
    assert_eq!(created.unspent_count(), 2);
    assert_eq!(created.unspent_value(), 40);
    assert!(!created.is_available(1));
    assert!(db.get_coins(&txid(2)).unwrap().is_none());
    assert!(db.get_coins(&txid(3)).unwrap().is_none());
    assert!(!db.have_coins(&txid(3)).unwrap());
    assert_eq!(db.get_best_block().unwrap(), block_hash(42));
    assert_eq!(
        db.get_best_anchor(ShieldedType::Sprout).unwrap(),
        tree::<Sprout>(1, 3).root()
    );
    assert!(db
        .get_nullifier(&nullifier(1), ShieldedType::Sapling)
        .unwrap());
}

#[test]
fn flush_through_nested_caches_test() {
    setup_logger(LevelFilter::Debug);

    let mut dumps = Vec::new();

    // Depth 1.
    {
        let mut db = CoinsViewDB::new(MemDB::new());
        seed(&mut db);
        let mut cache1 = CoinsViewCache::new(&mut db);
        apply_changes(&mut cache1);
        cache1.flush().unwrap();
        check_root(&db);
        dumps.push(db.kv_store().dump());
    }

    // Depth 2.
    {
        let mut db = CoinsViewDB::new(MemDB::new());
        seed(&mut db);
        let mut cache1 = CoinsViewCache::new(&mut db);
        {
            let mut cache2 = CoinsViewCache::new(&mut cache1);
            apply_changes(&mut cache2);
            cache2.flush().unwrap();
            assert_eq!(cache2.cache_size(), 0);
        }
        cache1.flush().unwrap();
        check_root(&db);
        dumps.push(db.kv_store().dump());
    }

    // Depth 3.
    {
        let mut db = CoinsViewDB::new(MemDB::new());
        seed(&mut db);
        let mut cache1 = CoinsViewCache::new(&mut db);
        {
            let mut cache2 = CoinsViewCache::new(&mut cache1);
            {
                let mut cache3 = CoinsViewCache::new(&mut cache2);
                apply_changes(&mut cache3);
                cache3.flush().unwrap();
            }
            cache2.flush().unwrap();
        }
        cache1.flush().unwrap();
        check_root(&db);
        dumps.push(db.kv_store().dump());
    }

    // Depth 4.
    {
        let mut db = CoinsViewDB::new(MemDB::new());
        seed(&mut db);
        let mut cache1 = CoinsViewCache::new(&mut db);
        {
            let mut cache2 = CoinsViewCache::new(&mut cache1);
            {
                let mut cache3 = CoinsViewCache::new(&mut cache2);
                {
                    let mut cache4 = CoinsViewCache::new(&mut cache3);
                    apply_changes(&mut cache4);
                    cache4.flush().unwrap();
                }
                cache3.flush().unwrap();
            }
            cache2.flush().unwrap();
        }
        cache1.flush().unwrap();
        check_root(&db);
        dumps.push(db.kv_store().dump());
    }

    // Every depth ends in the same root store.
    for dump in &dumps[1..] {
        assert_eq!(dump, &dumps[0]);
    }
}

#[test]
fn flush_without_changes_leaves_parent_untouched_test() {
    setup_logger(LevelFilter::Debug);

    let kv_store = MemDB::new();
    let mut db = CoinsViewDB::new(kv_store.clone());
    seed(&mut db);
    let before = kv_store.dump();

    let mut cache = CoinsViewCache::new(&mut db);
    assert!(cache.access_coins(&txid(3)).unwrap().is_some());
    assert!(cache.access_coins(&txid(99)).unwrap().is_none());
    assert!(!cache
        .get_nullifier(&nullifier(1), ShieldedType::Sprout)
        .unwrap());
    assert!(cache
        .get_anchor_at::<Sprout>(&Sprout::empty_root())
        .unwrap()
        .is_some());
    assert_eq!(cache.cache_size(), 1);
    cache.flush().unwrap();
    assert_eq!(cache.cache_size(), 0);

    assert_eq!(kv_store.dump(), before);
}

#[test]
fn fresh_pruned_coins_are_dropped_test() {
    setup_logger(LevelFilter::Debug);

    let kv_store = MemDB::new();
    let mut db = CoinsViewDB::new(kv_store.clone());
    {
        let mut cache = CoinsViewCache::new(&mut db);
        {
            let mut modifier = cache.modify_coins(&txid(1)).unwrap();
            *modifier = coins(&[5, 6]);
            modifier.spend(0).unwrap();
            modifier.spend(1).unwrap();
        }
        // Never seen by the parent, so nothing is left to flush.
        assert_eq!(cache.cache_size(), 0);
        assert!(!cache.have_coins(&txid(1)).unwrap());
        cache.flush().unwrap();
    }
    assert_eq!(kv_store.len(), 0);
    assert!(db.get_coins(&txid(1)).unwrap().is_none());

    // The same, one level further up: created below, flushed, then spent in a sibling cache.
    {
        let mut cache1 = CoinsViewCache::new(&mut db);
        {
            let mut cache2 = CoinsViewCache::new(&mut cache1);
            *cache2.modify_coins(&txid(2)).unwrap() = coins(&[8]);
            cache2.flush().unwrap();
        }
        assert!(cache1.have_coins_in_cache(&txid(2)));
        {
            let mut cache2 = CoinsViewCache::new(&mut cache1);
            cache2.modify_coins(&txid(2)).unwrap().spend(0).unwrap();
            cache2.flush().unwrap();
        }
        assert_eq!(cache1.cache_size(), 0);
        cache1.flush().unwrap();
    }
    assert_eq!(kv_store.len(), 0);
}

#[test]
fn stale_pruned_coins_are_erased_test() {
    setup_logger(LevelFilter::Debug);

    let kv_store = MemDB::new();
    let mut db = CoinsViewDB::new(kv_store.clone());
    seed(&mut db);
    assert!(db.have_coins(&txid(3)).unwrap());

    let mut cache1 = CoinsViewCache::new(&mut db);
    {
        let mut cache2 = CoinsViewCache::new(&mut cache1);
        cache2.modify_coins(&txid(3)).unwrap().spend(0).unwrap();
        // A pending removal: still a record, but nothing unspent.
        assert_eq!(cache2.cache_size(), 1);
        assert!(cache2.get_coins(&txid(3)).unwrap().unwrap().is_pruned());
        assert!(!cache2.have_coins(&txid(3)).unwrap());
        cache2.flush().unwrap();
    }
    assert!(!cache1.have_coins(&txid(3)).unwrap());
    assert!(cache1.base().have_coins(&txid(3)).unwrap());
    cache1.flush().unwrap();

    assert!(!db.have_coins(&txid(3)).unwrap());
    assert!(db.kv_store().coins(&txid(3)).unwrap().is_none());
}

#[test]
fn failed_flush_keeps_changes_test() {
    setup_logger(LevelFilter::Debug);

    let kv_store = MemDB::new();
    let mut db = CoinsViewDB::new(kv_store.clone());

    let mut cache = CoinsViewCache::new(&mut db);
    *cache.modify_coins(&txid(1)).unwrap() = coins(&[10]);
    cache.set_best_block(block_hash(1));
    cache
        .set_nullifier(&nullifier(1), ShieldedType::Sprout, true)
        .unwrap();
    let usage = cache.dynamic_usage();

    // 1. The store refuses the write: nothing changes anywhere.
    kv_store.set_fail_writes(true);
    assert!(matches!(
        cache.flush(),
        Err(CoinsViewError::KVWriteError(_))
    ));
    assert_eq!(kv_store.len(), 0);
    assert_eq!(cache.cache_size(), 1);
    assert!(cache.have_coins(&txid(1)).unwrap());
    assert_eq!(cache.get_best_block().unwrap(), block_hash(1));
    assert!(cache
        .get_nullifier(&nullifier(1), ShieldedType::Sprout)
        .unwrap());
    assert_eq!(cache.dynamic_usage(), usage);
    cache.self_check().unwrap();

    // 2. The same flush goes through once the store accepts writes again.
    kv_store.set_fail_writes(false);
    cache.flush().unwrap();
    cache.self_check().unwrap();
    drop(cache);
    assert!(db.have_coins(&txid(1)).unwrap());
    assert_eq!(db.get_best_block().unwrap(), block_hash(1));
    assert!(db
        .get_nullifier(&nullifier(1), ShieldedType::Sprout)
        .unwrap());
}

#[test]
fn memory_accounting_test() {
    setup_logger(LevelFilter::Debug);

    let mut db = CoinsViewDB::new(MemDB::new());
    seed(&mut db);

    let mut cache = CoinsViewCache::new(&mut db);
    let empty_usage = cache.dynamic_usage();

    // 1. Growing records.
    for n in 10..20 {
        let mut modifier = cache.modify_coins(&txid(n)).unwrap();
        for _ in 0..n {
            modifier.push_output(TxOut::new(1, vec![0xab; 64]));
        }
    }
    cache.self_check().unwrap();
    let grown_usage = cache.dynamic_usage();
    assert!(grown_usage > empty_usage);

    // 2. Shrinking records: spent outputs at the end are trimmed away.
    for n in 10..20 {
        let mut modifier = cache.modify_coins(&txid(n)).unwrap();
        for index in 1..n as u32 {
            modifier.spend(index).unwrap();
        }
    }
    cache.self_check().unwrap();

    // 3. Read-through entries can be dropped again, modified ones cannot.
    assert!(cache.access_coins(&txid(3)).unwrap().is_some());
    assert_eq!(cache.cache_size(), 11);
    cache.uncache(&txid(3));
    cache.uncache(&txid(10));
    assert_eq!(cache.cache_size(), 10);
    cache.self_check().unwrap();

    // 4. Nothing is left to account for after a flush.
    cache.flush().unwrap();
    cache.self_check().unwrap();
    assert_eq!(cache.cache_size(), 0);
}

#[test]
fn uncache_read_through_removal_test() {
    setup_logger(LevelFilter::Debug);

    let mut db = CoinsViewDB::new(MemDB::new());
    seed(&mut db);

    let mut cache1 = CoinsViewCache::new(&mut db);
    cache1.modify_coins(&txid(3)).unwrap().spend(0).unwrap();
    assert_eq!(cache1.cache_size(), 1);

    let mut cache2 = CoinsViewCache::new(&mut cache1);
    // The parent only holds a pending removal, which this cache reads through as new.
    assert_eq!(
        cache2
            .access_coins(&txid(3))
            .unwrap()
            .map(|coins| coins.is_pruned()),
        Some(true)
    );
    assert_eq!(cache2.cache_size(), 1);
    cache2.uncache(&txid(3));
    assert_eq!(cache2.cache_size(), 0);
    cache2.self_check().unwrap();

    // Coins created in this cache stay.
    *cache2.modify_coins(&txid(1)).unwrap() = coins(&[4]);
    cache2.uncache(&txid(1));
    assert!(cache2.have_coins_in_cache(&txid(1)));
}

#[test]
fn input_helpers_test() {
    setup_logger(LevelFilter::Debug);

    let mut db = CoinsViewDB::new(MemDB::new());
    seed(&mut db);

    let mut cache = CoinsViewCache::new(&mut db);
    {
        let mut modifier = cache.modify_coins(&txid(1)).unwrap();
        *modifier = coins(&[10, 20, 30]);
        modifier.spend(2).unwrap();
    }

    let available = [OutPoint::new(txid(1), 0), OutPoint::new(txid(3), 0)];
    let spent = [OutPoint::new(txid(1), 0), OutPoint::new(txid(1), 2)];
    let unknown = [OutPoint::new(txid(9), 0)];

    assert_eq!(
        cache.access_output(&OutPoint::new(txid(1), 1)).unwrap(),
        Some(&TxOut::new(20, vec![0x76, 0xa9]))
    );
    assert!(cache.access_output(&OutPoint::new(txid(1), 7)).unwrap().is_none());
    assert!(cache.have_inputs(&available).unwrap());
    assert!(!cache.have_inputs(&spent).unwrap());
    assert!(!cache.have_inputs(&unknown).unwrap());
    assert_eq!(cache.value_in(&available).unwrap(), Some(17));
    assert_eq!(cache.value_in(&spent).unwrap(), None);

    // Reading `txid(3)` through brought it into the cache, without making it cached-and-changed.
    assert!(cache.have_coins_in_cache(&txid(3)));
    assert!(!cache.have_coins_in_cache(&txid(9)));
}

#[test]
fn best_block_falls_through_test() {
    setup_logger(LevelFilter::Debug);

    let mut db = CoinsViewDB::new(MemDB::new());
    assert_eq!(db.get_best_block().unwrap(), CryptoHash::zero());

    let mut cache1 = CoinsViewCache::new(&mut db);
    {
        let mut cache2 = CoinsViewCache::new(&mut cache1);
        assert_eq!(cache2.get_best_block().unwrap(), CryptoHash::zero());
        cache2.set_best_block(block_hash(7));
        assert_eq!(cache2.get_best_block().unwrap(), block_hash(7));
        assert_eq!(cache2.base().get_best_block().unwrap(), CryptoHash::zero());
        cache2.flush().unwrap();
        // Read through from the parent after the flush.
        assert_eq!(cache2.get_best_block().unwrap(), block_hash(7));
    }
    cache1.flush().unwrap();
    assert_eq!(db.get_best_block().unwrap(), block_hash(7));
}
