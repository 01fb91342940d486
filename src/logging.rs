/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the chain state's
//! [config](crate::config::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how an [UpdateTip](crate::events::UpdateTipEvent) is printed:
//!
//! ```text
//! UpdateTip, 1701329264, fNGCJyk, 1045
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the new tip's hash, or
//!   `-` if the active chain was emptied.
//! - The fourth value is the height of the new tip.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;

use crate::{events::*, types::data_types::CryptoHash};

// Names of each event in PascalCase for printing:
pub const FLUSH_COINS: &str = "FlushCoins";
pub const UPDATE_TIP: &str = "UpdateTip";
pub const BATCH_WRITE: &str = "BatchWrite";
pub const LOAD_BLOCK_INDEX: &str = "LoadBlockIndex";
pub const INVALIDATE_BLOCK: &str = "InvalidateBlock";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for FlushCoinsEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |flush_coins_event: &FlushCoinsEvent| {
            log::debug!(
                "{}, {}, {}, {}, {}",
                FLUSH_COINS,
                secs_since_unix_epoch(flush_coins_event.timestamp),
                flush_coins_event.coins,
                flush_coins_event.anchors,
                flush_coins_event.nullifiers
            )
        };
        Box::new(logger)
    }
}

impl Logger for UpdateTipEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |update_tip_event: &UpdateTipEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_TIP,
                secs_since_unix_epoch(update_tip_event.timestamp),
                optional_hash(&update_tip_event.tip),
                update_tip_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for BatchWriteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |batch_write_event: &BatchWriteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                BATCH_WRITE,
                secs_since_unix_epoch(batch_write_event.timestamp),
                first_seven_base64_chars(&batch_write_event.best_block.bytes()),
                batch_write_event.coins,
                batch_write_event.anchors,
                batch_write_event.nullifiers,
                batch_write_event.block_index_entries
            )
        };
        Box::new(logger)
    }
}

impl Logger for LoadBlockIndexEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |load_block_index_event: &LoadBlockIndexEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                LOAD_BLOCK_INDEX,
                secs_since_unix_epoch(load_block_index_event.timestamp),
                load_block_index_event.entries,
                optional_hash(&load_block_index_event.tip),
                load_block_index_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for InvalidateBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |invalidate_block_event: &InvalidateBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                INVALIDATE_BLOCK,
                secs_since_unix_epoch(invalidate_block_event.timestamp),
                first_seven_base64_chars(&invalidate_block_event.block.bytes()),
                invalidate_block_event.descendants
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn optional_hash(hash: &Option<CryptoHash>) -> String {
    match hash {
        Some(hash) => first_seven_base64_chars(&hash.bytes()),
        None => String::from("-"),
    }
}

// Clocks set before the Unix Epoch print as 0.
fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs())
}
