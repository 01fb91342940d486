/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Estimates of heap memory held by cache maps.
//!
//! These are estimates: allocator bookkeeping and the exact table layout are approximated. They are
//! deterministic, so a cache's incrementally tracked usage can be checked against a recomputation.

use std::{collections::HashMap, mem::size_of};

/// Bytes actually taken from the allocator for a request of `alloc` bytes, assuming 16-byte granularity
/// plus one word of header.
pub fn malloc_usage(alloc: usize) -> usize {
    if alloc == 0 {
        0
    } else {
        ((alloc + size_of::<usize>() + 15) >> 4) << 4
    }
}

/// Heap footprint of the table of `map`, excluding anything its keys or values point to.
pub fn hash_map_usage<K, V, S>(map: &HashMap<K, V, S>) -> usize {
    // One control byte per slot on top of the slot itself.
    malloc_usage(map.capacity() * (size_of::<(K, V)>() + 1))
}
