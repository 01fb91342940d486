/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The block index: metadata for every known block header, linked into a tree rooted at genesis.
//!
//! # The Block Index Graph
//!
//! A [`BlockIndexGraph`](graph::BlockIndexGraph) owns one [`BlockIndexEntry`](entry::BlockIndexEntry)
//! per known header for the lifetime of the process. Entries are addressed by
//! [`BlockIndexId`](entry::BlockIndexId), and link to their parent and to one further ancestor (the
//! "skip" link) by id.
//!
//! Most of the tree is a single line. Near the tip, competing branches fork off, and headers of blocks
//! whose parents have not arrived yet wait unlinked until they do.
//!
//! # The Active Chain
//!
//! One branch of the tree, usually the one with the most work, is the
//! [`ActiveChain`](chain::ActiveChain). It is the branch the coin set corresponds to. Moving the tip of
//! the active chain and flushing the matching coin cache must happen together, which is what
//! [`ChainState`](crate::chain_state::ChainState) is for.
//!
//! # Persistence
//!
//! The [`disk`] submodule writes changed entries into, and rebuilds the whole graph from, the
//! [key-value store](crate::store).

pub mod chain;

pub mod disk;

pub mod entry;

pub mod graph;
