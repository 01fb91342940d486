/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Operator-supplied parameters of a [`ChainState`](crate::chain_state::ChainState).
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .log_events(true)
//!     .max_coins_cache_usage(100 * 1024 * 1024)
//!     .build();
//! ```

use typed_builder::TypedBuilder;

/// Default for [`Configuration::max_coins_cache_usage`]: 450 MiB.
pub const DEFAULT_MAX_COINS_CACHE_USAGE: usize = 450 * 1024 * 1024;

/// Stores the user-defined parameters of a chain state, that is:
/// 1. The "Log Events" flag, if set to "true" then logs should be printed.
/// 2. The memory budget of the shared root coins cache.
/// 3. Whether the whole block index should be checked for consistency after every tip update.
///
/// ## Max coins cache usage
///
/// [`ChainState::coins_cache_over_limit`](crate::chain_state::ChainState::coins_cache_over_limit)
/// compares the estimated heap usage of the shared root cache against this number. Deciding when to
/// call [`flush_to_disk`](crate::chain_state::ChainState::flush_to_disk) is left to the caller.
///
/// ## Check block index
///
/// The check walks every entry, so it is meant for tests and debugging.
#[derive(Clone, Debug, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.log_events(...)`

    Optional:
    - `.max_coins_cache_usage(...)`
    - `.check_block_index(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
    #[builder(
        default = DEFAULT_MAX_COINS_CACHE_USAGE,
        setter(doc = "Set the memory budget, in bytes, of the shared root coins cache. Optional.")
    )]
    pub max_coins_cache_usage: usize,
    #[builder(
        default = false,
        setter(doc = "Check the consistency of the whole block index after every tip update? Optional.")
    )]
    pub check_block_index: bool,
}
