/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable persistence for the coin set, the shielded-pool ledgers, and the block index.
//!
//! # Pluggable persistence
//!
//! - The root of every cache stack, and the block index, are kept in persistent storage, most probably
//!   in the host's filesystem.
//! - Library users get to choose how exactly this is done.
//! - This crate merely requires that whatever the user provides as a persistence mechanism implements
//!   the abstract functionality of a key-value store with atomic, batched writes.
//! - This abstract functionality is made concrete by the traits defined in the [`pluggables`] module.
//!
//! # Where things are stored
//!
//! The documentation for the [`variables`] submodule lists everything stored in the key-value store,
//! and the key each variable is stored under. [`StateWriteBatch`](pluggables::StateWriteBatch) and the
//! typed getters on [`KVGet`](pluggables::KVGet) are the only code that needs to know these keys.

pub mod pluggables;

pub mod variables;
