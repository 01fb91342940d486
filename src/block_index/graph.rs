/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The arena that owns every [`BlockIndexEntry`], and the tree queries over it.
//!
//! Entries are never removed. Parent and skip links are [`BlockIndexId`]s into the arena, so detaching
//! a branch during a reorganization never leaves a dangling link behind.
//!
//! ## Skip list
//!
//! Besides its parent, every linked entry keeps a link to one further ancestor, at the height given by
//! [`skip_height`]. The skip heights are chosen so that [`ancestor`](BlockIndexGraph::ancestor) needs
//! a logarithmic number of hops in the distance to the requested height.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    fmt::{self, Display},
    ops::Index,
};

use primitive_types::U256;

use crate::types::{
    data_types::{Amount, BlockHeight, CryptoHash},
    header::BlockHeader,
};

use super::{
    chain::ActiveChain,
    entry::{BlockIndexEntry, BlockIndexId, BlockStatus, BlockValidity, DiskPosition},
};

/// Turn the lowest set bit of `n` off.
fn invert_lowest_one(n: i32) -> i32 {
    n & (n - 1)
}

/// Height of the ancestor that an entry at `height` keeps a skip link to.
///
/// Any number strictly lower than `height` would be correct. This choice makes both the links of
/// even heights and those of odd heights useful for long jumps.
pub fn skip_height(height: BlockHeight) -> BlockHeight {
    let height = height.int();
    if height < 2 {
        return BlockHeight::GENESIS;
    }
    let skip = if height & 1 == 1 {
        invert_lowest_one(invert_lowest_one(height - 1)) + 1
    } else {
        invert_lowest_one(height)
    };
    BlockHeight::new(skip)
}

/// Transactions of one block, as recorded by
/// [`received_transactions`](BlockIndexGraph::received_transactions).
#[derive(Clone, Copy, Debug)]
pub struct ReceivedBlock {
    pub tx_count: u32,
    /// Net value moved into the Sprout pool by this block, if known.
    pub sprout_value: Option<Amount>,
    /// Net value moved into the Sapling pool by this block, if known.
    pub sapling_value: Option<Amount>,
    pub position: DiskPosition,
}

#[derive(Default)]
pub struct BlockIndexGraph {
    entries: Vec<BlockIndexEntry>,
    by_hash: HashMap<CryptoHash, BlockIndexId>,

    /// Headers that arrived before their parent header, by parent hash.
    orphan_headers: HashMap<CryptoHash, Vec<BlockIndexId>>,

    /// Blocks whose transactions arrived before those of their parent, by parent.
    awaiting_parent_txs: HashMap<BlockIndexId, Vec<BlockIndexId>>,

    best_header: Option<BlockIndexId>,

    /// Entries changed since the block index was last written to the key-value store.
    dirty: BTreeSet<BlockIndexId>,
}

impl BlockIndexGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: BlockIndexId) -> Option<&BlockIndexEntry> {
        self.entries.get(id.index())
    }

    pub fn lookup(&self, hash: &CryptoHash) -> Option<BlockIndexId> {
        self.by_hash.get(hash).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = BlockIndexId> {
        (0..self.entries.len() as u32).map(BlockIndexId)
    }

    /// The linked, non-failed entry with the most chain work.
    pub fn best_header(&self) -> Option<BlockIndexId> {
        self.best_header
    }

    /// Get the entry for `hash`, creating an unlinked one (no parent, unknown height) if there is none.
    pub fn insert(&mut self, hash: CryptoHash) -> BlockIndexId {
        if let Some(&id) = self.by_hash.get(&hash) {
            return id;
        }
        let id = BlockIndexId(self.entries.len() as u32);
        self.entries.push(BlockIndexEntry::new(hash));
        self.by_hash.insert(hash, id);
        self.dirty.insert(id);
        id
    }

    /// Link the unlinked entry `id` below `parent` (or as a genesis entry if `parent` is `None`),
    /// deriving its height, chain work, and skip link. Headers that were waiting for `id` are linked
    /// below it too.
    pub fn connect(
        &mut self,
        id: BlockIndexId,
        parent: Option<BlockIndexId>,
        work: U256,
    ) -> Result<(), BlockIndexError> {
        self.link(id, parent, work)?;
        self.link_orphans(id)
    }

    fn link(
        &mut self,
        id: BlockIndexId,
        parent: Option<BlockIndexId>,
        work: U256,
    ) -> Result<(), BlockIndexError> {
        let hash = self.entries[id.index()].hash;
        if self.entries[id.index()].is_linked() {
            return Err(BlockIndexError::InconsistentIndex {
                block: hash,
                reason: "entry is already linked",
            });
        }

        let (height, chain_work, parent_failed) = match parent {
            None => (BlockHeight::GENESIS, work, false),
            Some(parent) => {
                let parent = &self.entries[parent.index()];
                if !parent.is_linked() {
                    return Err(BlockIndexError::InconsistentIndex {
                        block: hash,
                        reason: "parent is not linked",
                    });
                }
                (
                    parent.height + 1,
                    parent.chain_work.saturating_add(work),
                    parent.status.is_failed(),
                )
            }
        };

        let entry = &mut self.entries[id.index()];
        entry.prev = parent;
        entry.height = height;
        entry.chain_work = chain_work;
        if parent_failed {
            entry.status.insert(BlockStatus::FAILED_CHILD);
        }

        self.build_skip(id);
        self.update_best_header(id);
        self.dirty.insert(id);
        Ok(())
    }

    /// Record a block header. The entry is linked right away if its parent is linked, otherwise as
    /// soon as the parent is. Adding a known header again is a no-op.
    pub fn add_header(&mut self, header: BlockHeader) -> Result<BlockIndexId, BlockIndexError> {
        let id = self.insert(header.hash());
        let entry = &mut self.entries[id.index()];
        if entry.header.is_some() {
            return Ok(id);
        }
        entry.header = Some(header);
        entry.status.raise_validity(BlockValidity::Header);
        self.dirty.insert(id);

        self.attach(id)?;
        Ok(id)
    }

    /// Link the unlinked entry `id` below the parent its header names, or queue it until that parent
    /// is linked. Entries that are already linked, or have no header, are left as they are.
    pub(crate) fn attach(&mut self, id: BlockIndexId) -> Result<(), BlockIndexError> {
        let entry = &self.entries[id.index()];
        let Some(prev_hash) = entry.header.as_ref().map(|header| header.prev_block) else {
            return Ok(());
        };
        if entry.is_linked() {
            return Ok(());
        }

        if prev_hash.is_zero() {
            self.link_header(id, None)?;
            return self.link_orphans(id);
        }
        let parent = self
            .by_hash
            .get(&prev_hash)
            .copied()
            .filter(|parent| self.entries[parent.index()].is_linked());
        match parent {
            Some(parent) => {
                self.link_header(id, Some(parent))?;
                self.link_orphans(id)
            }
            None => {
                let waiting = self.orphan_headers.entry(prev_hash).or_default();
                if !waiting.contains(&id) {
                    waiting.push(id);
                }
                Ok(())
            }
        }
    }

    /// Link every queued header below `id`, and in turn every header queued below those.
    fn link_orphans(&mut self, id: BlockIndexId) -> Result<(), BlockIndexError> {
        let mut queue = VecDeque::from([id]);
        while let Some(linked) = queue.pop_front() {
            let hash = self.entries[linked.index()].hash;
            for child in self.orphan_headers.remove(&hash).unwrap_or_default() {
                // Linked directly through `connect` while it waited.
                if self.entries[child.index()].is_linked() {
                    continue;
                }
                self.link_header(child, Some(linked))?;
                queue.push_back(child);
            }
        }
        Ok(())
    }

    /// Link `id` by its header's work. It is tree-valid if its parent is, or if it has none.
    fn link_header(
        &mut self,
        id: BlockIndexId,
        parent: Option<BlockIndexId>,
    ) -> Result<(), BlockIndexError> {
        let work = self.entries[id.index()]
            .header
            .as_ref()
            .map(BlockHeader::work)
            .unwrap_or_else(U256::zero);
        self.link(id, parent, work)?;
        let tree_valid = parent.map_or(true, |parent| {
            self.entries[parent.index()].is_valid(BlockValidity::Tree)
        });
        if tree_valid {
            self.entries[id.index()]
                .status
                .raise_validity(BlockValidity::Tree);
        }
        Ok(())
    }

    /// Compute and store the skip link of `id` from its already-linked ancestors.
    pub fn build_skip(&mut self, id: BlockIndexId) {
        let entry = &self.entries[id.index()];
        let skip = entry
            .prev
            .and_then(|prev| self.ancestor(prev, skip_height(entry.height)));
        self.entries[id.index()].skip = skip;
    }

    /// The ancestor of `id` (or `id` itself) at `height`, or `None` if `height` is negative or above
    /// the height of `id`.
    pub fn ancestor(&self, id: BlockIndexId, height: BlockHeight) -> Option<BlockIndexId> {
        let target = height.int();
        let mut walk = id;
        let mut height_walk = self.entries[id.index()].height.int();
        if target < 0 || target > height_walk {
            return None;
        }

        while height_walk > target {
            let entry = &self.entries[walk.index()];
            let height_skip = skip_height(BlockHeight::new(height_walk)).int();
            let height_skip_prev = skip_height(BlockHeight::new(height_walk - 1)).int();
            match entry.skip {
                // Only follow the skip link if the parent's skip link would not be a better jump.
                Some(skip)
                    if height_skip == target
                        || (height_skip > target
                            && !(height_skip_prev < height_skip - 2
                                && height_skip_prev >= target)) =>
                {
                    walk = skip;
                    height_walk = height_skip;
                }
                _ => {
                    walk = entry.prev?;
                    height_walk -= 1;
                }
            }
        }
        Some(walk)
    }

    /// The highest entry that is an ancestor of both `a` and `b` (each entry being its own ancestor).
    /// `None` if they are not in the same tree.
    pub fn find_last_common_ancestor(
        &self,
        a: BlockIndexId,
        b: BlockIndexId,
    ) -> Option<BlockIndexId> {
        let height_a = self.entries[a.index()].height;
        let height_b = self.entries[b.index()].height;
        let (mut a, mut b) = if height_a > height_b {
            (self.ancestor(a, height_b)?, b)
        } else {
            (a, self.ancestor(b, height_a)?)
        };

        while a != b {
            let entry_a = &self.entries[a.index()];
            let entry_b = &self.entries[b.index()];
            match (entry_a.skip, entry_b.skip) {
                (Some(skip_a), Some(skip_b)) if skip_a != skip_b => {
                    a = skip_a;
                    b = skip_b;
                }
                _ => {
                    a = entry_a.prev?;
                    b = entry_b.prev?;
                }
            }
        }
        Some(a)
    }

    /// Raise `id` to `level`, provided its parent has been validated far enough for that level to make
    /// sense. Returns whether the status changed; failed entries never change.
    pub fn raise_validity(
        &mut self,
        id: BlockIndexId,
        level: BlockValidity,
    ) -> Result<bool, BlockIndexError> {
        let entry = &self.entries[id.index()];
        let required = match level {
            BlockValidity::Unknown | BlockValidity::Header => None,
            BlockValidity::Tree | BlockValidity::Transactions => Some(BlockValidity::Tree),
            BlockValidity::Chain | BlockValidity::Scripts => Some(level),
        };

        if let Some(required) = required {
            match entry.prev {
                Some(parent) => {
                    let parent = &self.entries[parent.index()];
                    if !parent.is_valid(required) {
                        return Err(BlockIndexError::ParentNotValid {
                            block: entry.hash,
                            parent: parent.hash,
                            required,
                        });
                    }
                }
                None if !entry.is_linked() => {
                    return Err(BlockIndexError::InconsistentIndex {
                        block: entry.hash,
                        reason: "entry is not linked",
                    })
                }
                None => (),
            }
        }

        let changed = self.entries[id.index()].status.raise_validity(level);
        if changed {
            self.dirty.insert(id);
        }
        Ok(changed)
    }

    /// Mark `id` as having failed validation, and every known descendant of it as descending from a
    /// failed block. Returns the descendants.
    pub fn mark_failed(&mut self, id: BlockIndexId) -> Vec<BlockIndexId> {
        self.entries[id.index()]
            .status
            .insert(BlockStatus::FAILED_VALID);
        self.dirty.insert(id);

        let height = self.entries[id.index()].height;
        let descendants: Vec<BlockIndexId> = self
            .ids()
            .filter(|&other| {
                other != id
                    && self.entries[other.index()].height > height
                    && self.ancestor(other, height) == Some(id)
            })
            .collect();
        for &descendant in &descendants {
            self.entries[descendant.index()]
                .status
                .insert(BlockStatus::FAILED_CHILD);
            self.dirty.insert(descendant);
        }

        if self
            .best_header
            .map_or(false, |best| self.entries[best.index()].status.is_failed())
        {
            self.best_header = None;
            for candidate in self.ids().collect::<Vec<_>>() {
                self.update_best_header(candidate);
            }
        }
        descendants
    }

    /// Record that the transactions of `id` have been received and stored at `received.position`.
    ///
    /// Cumulative transaction counts and shielded-pool values can only be computed once every ancestor
    /// has its transactions too. Descendants that were waiting on `id` are completed here.
    pub fn received_transactions(
        &mut self,
        id: BlockIndexId,
        received: ReceivedBlock,
    ) -> Result<(), BlockIndexError> {
        self.raise_validity(id, BlockValidity::Transactions)?;

        let entry = &mut self.entries[id.index()];
        entry.tx_count = received.tx_count;
        entry.chain_tx = None;
        entry.sprout_value = received.sprout_value;
        entry.sprout_chain_value = None;
        entry.sapling_value = received.sapling_value;
        entry.sapling_chain_value = None;
        entry.block_pos = Some(received.position);
        entry.status.insert(BlockStatus::HAVE_DATA);
        self.dirty.insert(id);

        self.restore_chain_values(id);
        Ok(())
    }

    /// Record that the undo data of `id` has been stored at `position`.
    pub fn set_undo_position(&mut self, id: BlockIndexId, position: DiskPosition) {
        let entry = &mut self.entries[id.index()];
        entry.undo_pos = Some(position);
        entry.status.insert(BlockStatus::HAVE_UNDO);
        self.dirty.insert(id);
    }

    /// Record the consensus branch `id` was validated under. The entry is marked as activating a
    /// network upgrade if its parent's branch is known and differs.
    pub fn set_branch_id(&mut self, id: BlockIndexId, branch_id: u32) {
        let parent_branch = self.entries[id.index()]
            .prev
            .and_then(|parent| self.entries[parent.index()].branch_id);
        let entry = &mut self.entries[id.index()];
        entry.branch_id = Some(branch_id);
        if parent_branch.map_or(false, |parent_branch| parent_branch != branch_id) {
            entry.status.insert(BlockStatus::ACTIVATES_UPGRADE);
        }
        self.dirty.insert(id);
    }

    pub fn set_final_sprout_root(&mut self, id: BlockIndexId, root: CryptoHash) {
        self.entries[id.index()].final_sprout_root = Some(root);
        self.dirty.insert(id);
    }

    /// Compute the cumulative values of `id` if its parent's are known, cascading into waiting
    /// descendants. Otherwise queue `id` behind its parent.
    pub(crate) fn restore_chain_values(&mut self, id: BlockIndexId) {
        let prev = self.entries[id.index()].prev;
        let parent_ready = match prev {
            None => true,
            Some(parent) => self.entries[parent.index()].chain_tx.is_some(),
        };

        if parent_ready {
            let mut queue = VecDeque::from([id]);
            while let Some(next) = queue.pop_front() {
                self.accumulate_chain_values(next);
                if let Some(children) = self.awaiting_parent_txs.remove(&next) {
                    queue.extend(children);
                }
            }
        } else if let Some(parent) = prev {
            if self.entries[parent.index()].is_valid(BlockValidity::Tree) {
                self.awaiting_parent_txs.entry(parent).or_default().push(id);
            }
        }
    }

    fn accumulate_chain_values(&mut self, id: BlockIndexId) {
        let (parent_tx, parent_sprout, parent_sapling) = match self.entries[id.index()].prev {
            None => (Some(0), Some(0), Some(0)),
            Some(parent) => {
                let parent = &self.entries[parent.index()];
                (
                    parent.chain_tx,
                    parent.sprout_chain_value,
                    parent.sapling_chain_value,
                )
            }
        };

        let entry = &mut self.entries[id.index()];
        let tx_count = u64::from(entry.tx_count);
        entry.chain_tx = parent_tx.map(|chain_tx| chain_tx + tx_count);
        entry.sprout_chain_value = parent_sprout
            .zip(entry.sprout_value)
            .and_then(|(chain, value)| chain.checked_add(value));
        entry.sapling_chain_value = parent_sapling
            .zip(entry.sapling_value)
            .and_then(|(chain, value)| chain.checked_add(value));
        self.dirty.insert(id);
    }

    fn update_best_header(&mut self, id: BlockIndexId) {
        let entry = &self.entries[id.index()];
        if !entry.is_linked() || entry.status.is_failed() {
            return;
        }
        let better = match self.best_header {
            None => true,
            Some(best) => entry.chain_work > self.entries[best.index()].chain_work,
        };
        if better {
            self.best_header = Some(id);
        }
    }

    /// Verify the structural invariants of every entry, and that `chain` is a contiguous branch of this
    /// graph.
    pub fn check(&self, chain: &ActiveChain) -> Result<(), BlockIndexError> {
        let inconsistent = |entry: &BlockIndexEntry, reason: &'static str| {
            Err(BlockIndexError::InconsistentIndex {
                block: entry.hash,
                reason,
            })
        };

        for (id, entry) in self.ids().zip(&self.entries) {
            if self.by_hash.get(&entry.hash) != Some(&id) {
                return inconsistent(entry, "hash lookup does not lead to the entry");
            }
            if !entry.is_linked() {
                if entry.prev.is_some() || entry.skip.is_some() {
                    return inconsistent(entry, "unlinked entry has links");
                }
                continue;
            }

            let Some(prev) = entry.prev else {
                if entry.height != BlockHeight::GENESIS {
                    return inconsistent(entry, "entry without a parent is not at height 0");
                }
                continue;
            };
            let parent = &self.entries[prev.index()];

            if entry.height != parent.height + 1 {
                return inconsistent(entry, "height is not the parent's height plus one");
            }
            if entry.chain_work < parent.chain_work {
                return inconsistent(entry, "chain work is below the parent's");
            }
            if let Some(header) = &entry.header {
                if header.prev_block != parent.hash {
                    return inconsistent(entry, "header does not name the parent");
                }
                if entry.chain_work != parent.chain_work.saturating_add(header.work()) {
                    return inconsistent(entry, "chain work is not the parent's plus the header's");
                }
            }
            if entry.skip != self.ancestor(prev, skip_height(entry.height)) {
                return inconsistent(entry, "skip link does not lead to the skip height");
            }
            if entry.status.validity() >= BlockValidity::Tree as u32
                && parent.status.validity() < BlockValidity::Tree as u32
            {
                return inconsistent(entry, "tree-valid entry has a parent that is not");
            }
            if parent.status.is_failed() && !entry.status.is_failed() {
                return inconsistent(entry, "descendant of a failed entry is not marked failed");
            }
            if entry.chain_tx.is_some() && parent.chain_tx.is_none() {
                return inconsistent(entry, "cumulative transactions known before the parent's");
            }
        }

        for (height, &id) in chain.ids().iter().enumerate() {
            let entry = &self.entries[id.index()];
            if entry.height.int() as usize != height {
                return inconsistent(entry, "active chain entry is at the wrong height");
            }
            let expected_prev = height.checked_sub(1).map(|below| chain.ids()[below]);
            if entry.prev != expected_prev {
                return inconsistent(entry, "active chain is not contiguous");
            }
        }

        Ok(())
    }

    pub(crate) fn entry_mut(&mut self, id: BlockIndexId) -> &mut BlockIndexEntry {
        self.dirty.insert(id);
        &mut self.entries[id.index()]
    }

    pub(crate) fn dirty_ids(&self) -> Vec<BlockIndexId> {
        self.dirty.iter().copied().collect()
    }

    pub(crate) fn clear_dirty(&mut self, ids: &[BlockIndexId]) {
        for id in ids {
            self.dirty.remove(id);
        }
    }
}

impl Index<BlockIndexId> for BlockIndexGraph {
    type Output = BlockIndexEntry;

    fn index(&self, id: BlockIndexId) -> &BlockIndexEntry {
        &self.entries[id.index()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockIndexError {
    ParentNotValid {
        block: CryptoHash,
        parent: CryptoHash,
        required: BlockValidity,
    },
    UnknownBlock {
        block: CryptoHash,
    },
    InconsistentIndex {
        block: CryptoHash,
        reason: &'static str,
    },
}

impl Display for BlockIndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockIndexError::ParentNotValid {
                block,
                parent,
                required,
            } => write!(
                f,
                "parent {} of block {} is not valid up to {:?}",
                parent, block, required
            ),
            BlockIndexError::UnknownBlock { block } => write!(f, "unknown block {}", block),
            BlockIndexError::InconsistentIndex { block, reason } => {
                write!(f, "block index inconsistent at {}: {}", block, reason)
            }
        }
    }
}

impl std::error::Error for BlockIndexError {}
