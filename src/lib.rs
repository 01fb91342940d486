/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A consensus state store for a UTXO blockchain with shielded pools.
//!
//! The store keeps track of two things:
//! 1. Which blocks exist and how they hang together: the [block index](block_index), with every known
//!    block's height, cumulative work, and validation status, and the active chain from genesis to the
//!    current tip.
//! 2. What the state of the ledger is at the tip: the unspent transaction outputs ("coins"), and for each
//!    shielded pool the set of commitment tree roots ("anchors") and revealed nullifiers. These live in
//!    layered, copy-on-write [caches](coins_view) over a persisted root.
//!
//! Persistence is pluggable: the library user provides a [key-value store](store::pluggables::KVStore).
//! The [chain state](chain_state::ChainState) ties everything together behind one reader/writer lock.

pub mod block_index;

pub mod chain_state;

pub mod coins_view;

pub mod config;

pub(crate) mod event_handlers;

pub mod events;

pub mod logging;

pub mod store;

pub mod types;
