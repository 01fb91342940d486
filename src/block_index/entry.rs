/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The metadata record kept for every known block header.

use borsh::{BorshDeserialize, BorshSerialize};
use primitive_types::U256;

use crate::types::{
    data_types::{Amount, BlockHeight, CryptoHash},
    header::BlockHeader,
};

/// Position of an entry in the [`BlockIndexGraph`](super::graph::BlockIndexGraph) arena.
///
/// Ids are only meaningful for the graph that handed them out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIndexId(pub(crate) u32);

impl BlockIndexId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Rungs of the validity ladder. A block is only ever raised to a higher rung.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BlockValidity {
    Unknown = 0,
    /// Parsed, version ok, hash satisfies claimed PoW, timestamp not in the future.
    Header = 1,
    /// All parent headers found, difficulty matches, timestamp sane. Implies all parents are also at
    /// least `Tree`.
    Tree = 2,
    /// Only the first transaction is coinbase, no duplicate txids, size limits respected. Implies all
    /// parents are at least `Tree`, but not necessarily `Transactions`.
    Transactions = 3,
    /// Outputs do not overspend inputs, no double spends, coinbase output ok. Implies all parents are
    /// also at least `Chain`.
    Chain = 4,
    /// Scripts and signatures ok. Implies all parents are also at least `Scripts`.
    Scripts = 5,
}

/// Validity rung plus data-availability and failure flags of one block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockStatus(u32);

impl BlockStatus {
    pub const VALID_MASK: u32 = 7;
    /// Full block available on disk.
    pub const HAVE_DATA: u32 = 8;
    /// Undo data available on disk.
    pub const HAVE_UNDO: u32 = 16;
    /// The block itself failed validation.
    pub const FAILED_VALID: u32 = 32;
    /// The block descends from a block that failed validation.
    pub const FAILED_CHILD: u32 = 64;
    pub const FAILED_MASK: u32 = Self::FAILED_VALID | Self::FAILED_CHILD;
    /// The block activates a network upgrade.
    pub const ACTIVATES_UPGRADE: u32 = 128;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn has(&self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn insert(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub fn is_failed(&self) -> bool {
        self.0 & Self::FAILED_MASK != 0
    }

    /// The rung reached, regardless of failure flags.
    pub fn validity(&self) -> u32 {
        self.0 & Self::VALID_MASK
    }

    /// Whether the block reached `level` and has not failed.
    pub fn is_valid(&self, level: BlockValidity) -> bool {
        !self.is_failed() && self.validity() >= level as u32
    }

    /// Raise the rung to `level`. Returns whether anything changed. Failed blocks are never raised.
    pub fn raise_validity(&mut self, level: BlockValidity) -> bool {
        if self.is_failed() || self.validity() >= level as u32 {
            return false;
        }
        self.0 = (self.0 & !Self::VALID_MASK) | level as u32;
        true
    }
}

/// Where a block (or its undo data) lives in the block files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DiskPosition {
    pub file: u32,
    pub pos: u32,
}

/// Metadata for one known block header.
///
/// Links to other entries are [`BlockIndexId`]s into the owning graph. Only the graph mutates entries,
/// so that height, chain work, and skip pointer always agree with the parent.
#[derive(Clone, Debug)]
pub struct BlockIndexEntry {
    pub(crate) hash: CryptoHash,
    pub(crate) prev: Option<BlockIndexId>,
    pub(crate) skip: Option<BlockIndexId>,
    pub(crate) height: BlockHeight,
    pub(crate) chain_work: U256,
    pub(crate) status: BlockStatus,

    pub(crate) tx_count: u32,
    /// `None` until this block and all its ancestors have had their transactions received.
    pub(crate) chain_tx: Option<u64>,
    pub(crate) branch_id: Option<u32>,

    pub(crate) sprout_value: Option<Amount>,
    pub(crate) sprout_chain_value: Option<Amount>,
    pub(crate) sapling_value: Option<Amount>,
    pub(crate) sapling_chain_value: Option<Amount>,

    pub(crate) block_pos: Option<DiskPosition>,
    pub(crate) undo_pos: Option<DiskPosition>,

    pub(crate) header: Option<BlockHeader>,
    pub(crate) final_sprout_root: Option<CryptoHash>,
}

impl BlockIndexEntry {
    pub(crate) fn new(hash: CryptoHash) -> Self {
        Self {
            hash,
            prev: None,
            skip: None,
            height: BlockHeight::UNKNOWN,
            chain_work: U256::zero(),
            status: BlockStatus::default(),
            tx_count: 0,
            chain_tx: None,
            branch_id: None,
            sprout_value: None,
            sprout_chain_value: None,
            sapling_value: None,
            sapling_chain_value: None,
            block_pos: None,
            undo_pos: None,
            header: None,
            final_sprout_root: None,
        }
    }

    pub fn hash(&self) -> CryptoHash {
        self.hash
    }

    pub fn prev(&self) -> Option<BlockIndexId> {
        self.prev
    }

    pub fn skip(&self) -> Option<BlockIndexId> {
        self.skip
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    /// Total work of the chain from genesis up to and including this block.
    pub fn chain_work(&self) -> U256 {
        self.chain_work
    }

    pub fn status(&self) -> BlockStatus {
        self.status
    }

    pub fn is_valid(&self, level: BlockValidity) -> bool {
        self.status.is_valid(level)
    }

    pub fn tx_count(&self) -> u32 {
        self.tx_count
    }

    pub fn chain_tx(&self) -> Option<u64> {
        self.chain_tx
    }

    pub fn branch_id(&self) -> Option<u32> {
        self.branch_id
    }

    pub fn sprout_value(&self) -> Option<Amount> {
        self.sprout_value
    }

    pub fn sprout_chain_value(&self) -> Option<Amount> {
        self.sprout_chain_value
    }

    pub fn sapling_value(&self) -> Option<Amount> {
        self.sapling_value
    }

    pub fn sapling_chain_value(&self) -> Option<Amount> {
        self.sapling_chain_value
    }

    pub fn block_pos(&self) -> Option<DiskPosition> {
        self.block_pos
    }

    pub fn undo_pos(&self) -> Option<DiskPosition> {
        self.undo_pos
    }

    pub fn header(&self) -> Option<&BlockHeader> {
        self.header.as_ref()
    }

    pub fn final_sprout_root(&self) -> Option<CryptoHash> {
        self.final_sprout_root
    }

    /// Whether this entry has been linked into the tree (genesis, or a known parent).
    pub fn is_linked(&self) -> bool {
        self.height.is_known()
    }
}
