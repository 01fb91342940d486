/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests for the shared chain state: private caches on several threads, moving the tip, the published
//! height, events, and writing to the key-value store.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
};

use chainstate_rs::{
    block_index::{
        entry::{BlockValidity, DiskPosition},
        graph::{BlockIndexError, ReceivedBlock},
    },
    chain_state::{ChainState, ChainStateError, ChainStateSpec},
    coins_view::{CoinsView, CoinsViewError},
    config::Configuration,
    types::data_types::{BlockHeight, CryptoHash, ShieldedType},
};
use log::LevelFilter;

mod common;

use crate::common::{
    chains::{block_hash, coins, header, nullifier, txid},
    logging::setup_logger,
    mem_db::MemDB,
};

fn open(kv_store: MemDB, configuration: Configuration) -> ChainState<MemDB> {
    ChainStateSpec::builder()
        .kv_store(kv_store)
        .configuration(configuration)
        .build()
        .open()
        .unwrap()
}

/// Add a chain of `len` headers on top of `prev` and return their hashes.
fn add_headers(chain_state: &ChainState<MemDB>, prev: CryptoHash, len: u64, salt: u64) -> Vec<CryptoHash> {
    let mut prev = prev;
    let mut hashes = Vec::new();
    for i in 0..len {
        let block = header(prev, salt * 1000 + i);
        prev = block.hash();
        chain_state.add_header(block).unwrap();
        hashes.push(prev);
    }
    hashes
}

#[test]
fn private_caches_on_many_threads_test() {
    setup_logger(LevelFilter::Debug);

    let flushes = Arc::new(AtomicUsize::new(0));
    let flushed_coins = Arc::new(AtomicUsize::new(0));
    let chain_state = {
        let flushes = flushes.clone();
        let flushed_coins = flushed_coins.clone();
        ChainStateSpec::builder()
            .kv_store(MemDB::new())
            .configuration(Configuration::builder().log_events(true).build())
            .on_flush_coins(move |event| {
                flushes.fetch_add(1, Ordering::SeqCst);
                flushed_coins.fetch_add(event.coins, Ordering::SeqCst);
            })
            .build()
            .open()
            .unwrap()
    };

    thread::scope(|scope| {
        for n in 0..4u64 {
            let chain_state = &chain_state;
            scope.spawn(move || {
                // 1. An aborted cache leaves nothing behind.
                {
                    let mut cache = chain_state.new_cache();
                    *cache.modify_coins(&txid(100 + n)).unwrap() = coins(&[1]);
                }

                // 2. A committed one is visible to everybody.
                let mut cache = chain_state.new_cache();
                for i in 0..5 {
                    *cache.modify_coins(&txid(n * 10 + i)).unwrap() = coins(&[n as i64, i as i64]);
                }
                cache
                    .set_nullifier(&nullifier(n), ShieldedType::Sapling, true)
                    .unwrap();
                cache.flush().unwrap();
            });
        }
    });

    assert_eq!(flushes.load(Ordering::SeqCst), 4);
    assert_eq!(flushed_coins.load(Ordering::SeqCst), 20);

    let shared = &chain_state;
    for n in 0..4u64 {
        assert!(!shared.have_coins(&txid(100 + n)).unwrap());
        for i in 0..5 {
            assert!(shared.have_coins(&txid(n * 10 + i)).unwrap());
        }
        assert!(shared
            .get_nullifier(&nullifier(n), ShieldedType::Sapling)
            .unwrap());
    }
    chain_state.self_check().unwrap();
}

#[test]
fn update_tip_test() {
    setup_logger(LevelFilter::Debug);

    let tips = Arc::new(Mutex::new(Vec::new()));
    let chain_state = {
        let tips = tips.clone();
        ChainStateSpec::builder()
            .kv_store(MemDB::new())
            .configuration(
                Configuration::builder()
                    .log_events(true)
                    .check_block_index(true)
                    .build(),
            )
            .on_update_tip(move |event| {
                tips.lock().unwrap().push((event.tip, event.height));
            })
            .build()
            .open()
            .unwrap()
    };
    let hashes = add_headers(&chain_state, CryptoHash::zero(), 3, 0);

    // 1. Move the tip together with the coins of the new tip.
    let mut cache = chain_state.new_cache();
    *cache.modify_coins(&txid(1)).unwrap() = coins(&[5]);
    chain_state.update_tip(&mut cache, Some(&hashes[2])).unwrap();
    assert_eq!(cache.cache_size(), 0);
    assert_eq!(chain_state.height(), BlockHeight::new(2));
    assert_eq!(chain_state.tip(), Some(hashes[2]));
    assert_eq!((&chain_state).get_best_block().unwrap(), hashes[2]);
    assert!((&chain_state).have_coins(&txid(1)).unwrap());
    assert_eq!(chain_state.locator().len(), 3);

    // 2. An unknown tip changes nothing, and the cache keeps its changes.
    *cache.modify_coins(&txid(2)).unwrap() = coins(&[6]);
    match chain_state.update_tip(&mut cache, Some(&block_hash(77))) {
        Err(ChainStateError::BlockIndexError(BlockIndexError::UnknownBlock { block })) => {
            assert_eq!(block, block_hash(77))
        }
        other => panic!("expected an unknown block, got {:?}", other),
    }
    assert_eq!(cache.cache_size(), 1);
    assert_eq!(chain_state.height(), BlockHeight::new(2));

    // 3. So does a tip whose parent header is missing.
    let orphan = header(block_hash(78), 0);
    let orphan_hash = orphan.hash();
    chain_state.add_header(orphan).unwrap();
    assert!(matches!(
        chain_state.update_tip(&mut cache, Some(&orphan_hash)),
        Err(ChainStateError::BlockIndexError(
            BlockIndexError::InconsistentIndex { .. }
        ))
    ));
    assert_eq!(cache.cache_size(), 1);

    // 4. Back to a lower tip, then to an empty chain.
    chain_state.update_tip(&mut cache, Some(&hashes[0])).unwrap();
    assert_eq!(chain_state.height(), BlockHeight::new(0));
    assert!((&chain_state).have_coins(&txid(2)).unwrap());
    chain_state.update_tip(&mut cache, None).unwrap();
    assert_eq!(chain_state.height(), BlockHeight::UNKNOWN);
    assert_eq!(chain_state.tip(), None);
    assert_eq!((&chain_state).get_best_block().unwrap(), CryptoHash::zero());

    assert_eq!(
        *tips.lock().unwrap(),
        vec![
            (Some(hashes[2]), BlockHeight::new(2)),
            (Some(hashes[0]), BlockHeight::new(0)),
            (None, BlockHeight::UNKNOWN),
        ]
    );
}

#[test]
fn published_height_test() {
    setup_logger(LevelFilter::Info);

    let chain_state = open(MemDB::new(), Configuration::builder().log_events(false).build());
    let hashes = add_headers(&chain_state, CryptoHash::zero(), 20, 0);

    thread::scope(|scope| {
        let chain_state = &chain_state;
        let hashes = &hashes;

        scope.spawn(move || {
            for (height, hash) in hashes.iter().enumerate() {
                let mut cache = chain_state.new_cache();
                *cache.modify_coins(&txid(height as u64)).unwrap() = coins(&[1]);
                chain_state.update_tip(&mut cache, Some(hash)).unwrap();
            }
        });

        for _ in 0..2 {
            scope.spawn(move || loop {
                let height = chain_state.height();
                if !height.is_known() {
                    thread::yield_now();
                    continue;
                }
                // Everything done up to a published height is visible.
                let chain_height = chain_state.block_index(|_, chain| chain.height());
                assert!(chain_height >= height);
                assert!(chain_state
                    .new_cache()
                    .have_coins(&txid(height.int() as u64))
                    .unwrap());
                if height == BlockHeight::new(19) {
                    break;
                }
            });
        }
    });

    assert_eq!(chain_state.height(), BlockHeight::new(19));
    chain_state.self_check().unwrap();
}

#[test]
fn block_index_operations_test() {
    setup_logger(LevelFilter::Debug);

    let invalidated = Arc::new(Mutex::new(Vec::new()));
    let chain_state = {
        let invalidated = invalidated.clone();
        ChainStateSpec::builder()
            .kv_store(MemDB::new())
            .configuration(Configuration::builder().log_events(true).build())
            .on_invalidate_block(move |event| {
                invalidated
                    .lock()
                    .unwrap()
                    .push((event.block, event.descendants));
            })
            .build()
            .open()
            .unwrap()
    };
    let main = add_headers(&chain_state, CryptoHash::zero(), 6, 0);
    let side = add_headers(&chain_state, main[2], 2, 1);

    // 1. Transactions and validity.
    for (i, hash) in main[..2].iter().enumerate() {
        chain_state
            .received_transactions(
                hash,
                ReceivedBlock {
                    tx_count: 2,
                    sprout_value: None,
                    sapling_value: Some(0),
                    position: DiskPosition {
                        file: 0,
                        pos: i as u32,
                    },
                },
            )
            .unwrap();
    }
    assert!(chain_state
        .raise_validity(&main[0], BlockValidity::Chain)
        .unwrap());
    assert!(matches!(
        chain_state.raise_validity(&main[3], BlockValidity::Chain),
        Err(BlockIndexError::ParentNotValid { .. })
    ));
    chain_state.block_index(|graph, _| {
        let entry = &graph[graph.lookup(&main[1]).unwrap()];
        assert_eq!(entry.chain_tx(), Some(4));
        assert_eq!(entry.sprout_chain_value(), None);
    });

    // 2. Invalidating a block does not move the active chain.
    let mut cache = chain_state.new_cache();
    chain_state.update_tip(&mut cache, Some(&main[5])).unwrap();
    assert_eq!(chain_state.invalidate_block(&main[3]).unwrap(), 2);
    assert_eq!(chain_state.tip(), Some(main[5]));
    chain_state.block_index(|graph, _| {
        assert!(graph[graph.lookup(&main[3]).unwrap()].status().is_failed());
        assert!(graph[graph.lookup(&main[5]).unwrap()].status().is_failed());
        assert!(!graph[graph.lookup(&side[1]).unwrap()].status().is_failed());
        // The best header moves to the longest branch that is not failed.
        assert_eq!(graph.best_header(), graph.lookup(&side[1]));
    });
    assert_eq!(*invalidated.lock().unwrap(), vec![(main[3], 2)]);

    assert!(matches!(
        chain_state.invalidate_block(&block_hash(5)),
        Err(BlockIndexError::UnknownBlock { .. })
    ));
}

#[test]
fn coins_cache_limit_test() {
    setup_logger(LevelFilter::Debug);

    let tight = open(
        MemDB::new(),
        Configuration::builder()
            .log_events(false)
            .max_coins_cache_usage(1)
            .build(),
    );
    let roomy = open(MemDB::new(), Configuration::builder().log_events(false).build());

    for chain_state in [&tight, &roomy] {
        let mut cache = chain_state.new_cache();
        for n in 0..50 {
            *cache.modify_coins(&txid(n)).unwrap() = coins(&[1, 2, 3]);
        }
        cache.flush().unwrap();
        assert!(chain_state.coins_cache_usage() > 1);
    }
    assert!(tight.coins_cache_over_limit());
    assert!(!roomy.coins_cache_over_limit());

    // Writing to the store empties the shared root cache.
    tight.flush_to_disk().unwrap();
    assert!(tight.coins_cache_usage() < 50);
    assert_eq!(tight.persisted_stats().unwrap().transactions, 50);
}

#[test]
fn flush_to_disk_test() {
    setup_logger(LevelFilter::Debug);

    let kv_store = MemDB::new();
    let batch_writes = Arc::new(Mutex::new(Vec::new()));
    let chain_state = {
        let batch_writes = batch_writes.clone();
        ChainStateSpec::builder()
            .kv_store(kv_store.clone())
            .configuration(Configuration::builder().log_events(true).build())
            .on_batch_write(move |event| {
                batch_writes
                    .lock()
                    .unwrap()
                    .push((event.best_block, event.coins, event.block_index_entries));
            })
            .build()
            .open()
            .unwrap()
    };
    let hashes = add_headers(&chain_state, CryptoHash::zero(), 4, 0);

    let mut cache = chain_state.new_cache();
    *cache.modify_coins(&txid(1)).unwrap() = coins(&[10]);
    *cache.modify_coins(&txid(2)).unwrap() = coins(&[20]);
    chain_state.update_tip(&mut cache, Some(&hashes[3])).unwrap();

    // 1. The store refuses the block index: nothing is written, everything stays pending.
    kv_store.set_fail_writes(true);
    assert!(matches!(
        chain_state.flush_to_disk(),
        Err(ChainStateError::BlockIndexWriteError(_))
    ));
    assert_eq!(kv_store.len(), 0);
    assert!((&chain_state).have_coins(&txid(1)).unwrap());

    // 2. Accepted.
    kv_store.set_fail_writes(false);
    chain_state.flush_to_disk().unwrap();
    let stats = chain_state.persisted_stats().unwrap();
    assert_eq!(stats.best_block, hashes[3]);
    assert_eq!(stats.transactions, 2);

    // 3. With the block index already written, a refused write leaves the coins pending.
    cache.modify_coins(&txid(1)).unwrap().spend(0).unwrap();
    chain_state.update_tip(&mut cache, Some(&hashes[3])).unwrap();
    kv_store.set_fail_writes(true);
    assert!(matches!(
        chain_state.flush_to_disk(),
        Err(ChainStateError::CoinsViewError(CoinsViewError::KVWriteError(_)))
    ));
    assert!(!(&chain_state).have_coins(&txid(1)).unwrap());
    assert_eq!(chain_state.persisted_stats().unwrap().transactions, 2);
    kv_store.set_fail_writes(false);
    chain_state.flush_to_disk().unwrap();
    assert_eq!(chain_state.persisted_stats().unwrap().transactions, 1);

    assert_eq!(
        *batch_writes.lock().unwrap(),
        vec![(hashes[3], 2, 4), (hashes[3], 1, 0)]
    );
    chain_state.self_check().unwrap();
}
