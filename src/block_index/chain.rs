/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The active chain: the branch of the block index from genesis to the current tip, indexed by height.

use crate::types::data_types::{BlockHeight, CryptoHash};

use super::{entry::BlockIndexId, graph::BlockIndexGraph};

/// Number of most recent blocks a [locator](ActiveChain::locator) lists one by one before it starts
/// doubling the step.
const LOCATOR_DENSE_PREFIX: usize = 10;

/// Height-ordered ids of the entries from genesis to the tip. Element `h` is at height `h`, and its
/// parent is element `h - 1`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveChain {
    entries: Vec<BlockIndexId>,
}

impl ActiveChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn genesis(&self) -> Option<BlockIndexId> {
        self.entries.first().copied()
    }

    pub fn tip(&self) -> Option<BlockIndexId> {
        self.entries.last().copied()
    }

    pub fn at(&self, height: BlockHeight) -> Option<BlockIndexId> {
        usize::try_from(height.int())
            .ok()
            .and_then(|height| self.entries.get(height))
            .copied()
    }

    /// Height of the tip. [`BlockHeight::UNKNOWN`] for an empty chain.
    pub fn height(&self) -> BlockHeight {
        BlockHeight::new(self.entries.len() as i32 - 1)
    }

    pub fn ids(&self) -> &[BlockIndexId] {
        &self.entries
    }

    /// Whether `id` is on this chain, as opposed to merely known to `graph`.
    pub fn contains(&self, graph: &BlockIndexGraph, id: BlockIndexId) -> bool {
        self.at(graph[id].height()) == Some(id)
    }

    /// The successor of `id` on this chain, if `id` is on this chain and is not the tip.
    pub fn next(&self, graph: &BlockIndexGraph, id: BlockIndexId) -> Option<BlockIndexId> {
        if self.contains(graph, id) {
            self.at(graph[id].height() + 1)
        } else {
            None
        }
    }

    /// Make `tip` the tip of this chain, keeping the prefix shared with the current chain. `None` empties
    /// the chain.
    pub fn set_tip(&mut self, graph: &BlockIndexGraph, tip: Option<BlockIndexId>) {
        let Some(tip) = tip else {
            self.entries = Vec::new();
            return;
        };

        // Built aside and swapped in whole, so the chain is never observed half-updated.
        let mut entries = self.entries.clone();
        entries.resize(graph[tip].height().int() as usize + 1, tip);
        let mut walk = Some(tip);
        while let Some(id) = walk {
            let slot = &mut entries[graph[id].height().int() as usize];
            if *slot == id && id != tip {
                break;
            }
            *slot = id;
            walk = graph[id].prev();
        }
        self.entries = entries;
    }

    /// Hashes describing the branch ending at `from` (the tip if `None`) compactly: the 10 most recent
    /// blocks, then exponentially sparser ones, always ending with genesis.
    pub fn locator(&self, graph: &BlockIndexGraph, from: Option<BlockIndexId>) -> Vec<CryptoHash> {
        let mut step = 1;
        let mut have = Vec::with_capacity(32);
        let mut walk = from.or_else(|| self.tip());

        while let Some(id) = walk {
            have.push(graph[id].hash());
            let height = graph[id].height().int();
            if height == 0 {
                break;
            }

            let next_height = BlockHeight::new((height - step).max(0));
            walk = if self.contains(graph, id) {
                self.at(next_height)
            } else {
                graph.ancestor(id, next_height)
            };

            if have.len() > LOCATOR_DENSE_PREFIX {
                step *= 2;
            }
        }
        have
    }

    /// The highest entry shared by this chain and the branch ending at `id`. `None` if they share
    /// nothing.
    pub fn find_fork(&self, graph: &BlockIndexGraph, id: BlockIndexId) -> Option<BlockIndexId> {
        let mut walk = id;
        if graph[walk].height() > self.height() {
            walk = graph.ancestor(walk, self.height())?;
        }
        while !self.contains(graph, walk) {
            walk = graph[walk].prev()?;
        }
        Some(walk)
    }
}
