/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events emitted by a [`ChainState`](crate::chain_state::ChainState).
//!
//! An event for a given action indicates that the action has been completed. Events are delivered
//! synchronously, after the chain state's lock has been released, to the handlers registered in the
//! [`ChainStateSpec`](crate::chain_state::ChainStateSpec), and to the [loggers](crate::logging) if
//! [`log_events`](crate::config::Configuration::log_events) is set.
//!
//! Handlers run on the thread that caused the event. They may read the chain state, but must not call
//! methods that themselves emit events.

use std::time::SystemTime;

use crate::types::data_types::{BlockHeight, CryptoHash};

pub enum Event {
    // Events that change the shared root cache.
    FlushCoins(FlushCoinsEvent),
    UpdateTip(UpdateTipEvent),
    // Events that change persistent state.
    BatchWrite(BatchWriteEvent),
    LoadBlockIndex(LoadBlockIndexEvent),
    InvalidateBlock(InvalidateBlockEvent),
}

/// A child cache was flushed into the shared root cache.
pub struct FlushCoinsEvent {
    pub timestamp: SystemTime,
    pub coins: usize,
    pub anchors: usize,
    pub nullifiers: usize,
}

/// The active chain was moved to a new tip.
pub struct UpdateTipEvent {
    pub timestamp: SystemTime,
    pub tip: Option<CryptoHash>,
    pub height: BlockHeight,
}

/// The shared root cache and the changed block index entries were written to the key-value store.
pub struct BatchWriteEvent {
    pub timestamp: SystemTime,
    pub best_block: CryptoHash,
    pub coins: usize,
    pub anchors: usize,
    pub nullifiers: usize,
    pub block_index_entries: usize,
}

pub struct LoadBlockIndexEvent {
    pub timestamp: SystemTime,
    pub entries: usize,
    pub tip: Option<CryptoHash>,
    pub height: BlockHeight,
}

pub struct InvalidateBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    /// Number of known descendants marked as descending from a failed block.
    pub descendants: usize,
}
