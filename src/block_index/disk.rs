/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistence of the block index.
//!
//! Every entry that has a header is stored as a [`DiskBlockIndex`] keyed by its block hash. Derived
//! fields (parent and skip links, chain work, cumulative transaction counts and pool values) are not
//! stored. [`load_block_index`] recomputes them, relinking entries by the parent hash in their header.

use std::fmt::{self, Display};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    store::{
        pluggables::{
            self, KVGet, KVGetError, KVSetError, KVStore, KVWriteError, Key, StateWriteBatch,
        },
        variables,
    },
    types::{
        data_types::{Amount, BlockHeight, CryptoHash},
        header::BlockHeader,
    },
};

use super::{
    entry::{BlockIndexEntry, BlockIndexId, BlockStatus, DiskPosition},
    graph::{BlockIndexError, BlockIndexGraph},
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DiskBlockIndex {
    pub header: BlockHeader,
    pub height: BlockHeight,
    pub status: BlockStatus,
    pub tx_count: u32,
    pub branch_id: Option<u32>,
    pub sprout_value: Option<Amount>,
    pub sapling_value: Option<Amount>,
    pub block_pos: Option<DiskPosition>,
    pub undo_pos: Option<DiskPosition>,
    pub final_sprout_root: Option<CryptoHash>,
}

impl DiskBlockIndex {
    /// The hash of the stored header, which is also the key this record is stored under.
    pub fn hash(&self) -> CryptoHash {
        self.header.hash()
    }

    /// `None` for entries whose header is not known, which are not persisted.
    pub fn from_entry(entry: &BlockIndexEntry) -> Option<DiskBlockIndex> {
        Some(DiskBlockIndex {
            header: entry.header()?.clone(),
            height: entry.height(),
            status: entry.status(),
            tx_count: entry.tx_count(),
            branch_id: entry.branch_id(),
            sprout_value: entry.sprout_value(),
            sapling_value: entry.sapling_value(),
            block_pos: entry.block_pos(),
            undo_pos: entry.undo_pos(),
            final_sprout_root: entry.final_sprout_root(),
        })
    }
}

/// Write every entry changed since the last successful call into `kv_store`, in one write batch.
///
/// Returns the number of records written. If the write fails, the changed entries stay marked and are
/// written by the next call.
pub fn write_block_index<K: KVStore>(
    graph: &mut BlockIndexGraph,
    kv_store: &mut K,
) -> Result<usize, BlockIndexWriteError> {
    let dirty = graph.dirty_ids();
    if dirty.is_empty() {
        return Ok(0);
    }
    let mut wb = StateWriteBatch::<K::WriteBatch>::new();
    let mut written = 0;
    for &id in &dirty {
        if let Some(record) = DiskBlockIndex::from_entry(&graph[id]) {
            wb.set_disk_block_index(&record)?;
            written += 1;
        }
    }
    kv_store.write(wb.into_inner())?;
    graph.clear_dirty(&dirty);
    Ok(written)
}

/// Rebuild the block index from the records in `kv_store`.
///
/// Every record's header is re-hashed and compared with the key it is stored under. A mismatch means
/// the store is corrupt and fails the whole load. So does a record stored as linked whose parent is
/// missing. Records stored before their parent header was known are queued and linked as soon as that
/// parent is.
pub fn load_block_index<K: KVGet>(kv_store: &K) -> Result<BlockIndexGraph, BlockIndexLoadError> {
    let mut records = Vec::new();
    for (key, value) in kv_store.scan_prefix(&variables::BLOCK_INDEX) {
        let key_hash =
            pluggables::hash_from_key(&key).ok_or(BlockIndexLoadError::MalformedKey { key })?;
        let record: DiskBlockIndex =
            pluggables::deserialize_value(&value, Key::BlockIndex { block: key_hash })?;
        let computed = record.hash();
        if computed != key_hash {
            return Err(BlockIndexLoadError::HashMismatch {
                key: key_hash,
                computed,
            });
        }
        records.push(record);
    }

    // Parents before children. Unlinked records sort first.
    records.sort_by_key(|record| record.height);

    let mut graph = BlockIndexGraph::new();
    let mut stored_unlinked = Vec::new();
    for record in records {
        let hash = record.hash();
        let prev_hash = record.header.prev_block;
        let height = record.height;

        if !height.is_known() {
            let id = restore_entry(&mut graph, record);
            graph.attach(id)?;
            stored_unlinked.push(id);
            continue;
        }

        let parent = if prev_hash.is_zero() {
            None
        } else {
            Some(
                graph
                    .lookup(&prev_hash)
                    .filter(|&parent| graph[parent].is_linked())
                    .ok_or(BlockIndexLoadError::MissingParent {
                        block: hash,
                        parent: prev_hash,
                    })?,
            )
        };

        let work = record.header.work();
        let id = restore_entry(&mut graph, record);
        graph.connect(id, parent, work)?;
        if graph[id].height() != height {
            return Err(BlockIndexLoadError::BlockIndexError(
                BlockIndexError::InconsistentIndex {
                    block: hash,
                    reason: "stored height disagrees with the parent's",
                },
            ));
        }
        if graph[id].status().has(BlockStatus::HAVE_DATA) {
            graph.restore_chain_values(id);
        }
    }

    // Everything in the graph now matches the store, except entries linked during the load.
    let loaded: Vec<_> = graph
        .dirty_ids()
        .into_iter()
        .filter(|id| !(stored_unlinked.contains(id) && graph[*id].is_linked()))
        .collect();
    graph.clear_dirty(&loaded);
    Ok(graph)
}

fn restore_entry(graph: &mut BlockIndexGraph, record: DiskBlockIndex) -> BlockIndexId {
    let id = graph.insert(record.hash());
    let entry = graph.entry_mut(id);
    entry.status = record.status;
    entry.tx_count = record.tx_count;
    entry.branch_id = record.branch_id;
    entry.sprout_value = record.sprout_value;
    entry.sapling_value = record.sapling_value;
    entry.block_pos = record.block_pos;
    entry.undo_pos = record.undo_pos;
    entry.final_sprout_root = record.final_sprout_root;
    entry.header = Some(record.header);
    id
}

#[derive(Debug)]
pub enum BlockIndexWriteError {
    KVSetError(KVSetError),
    KVWriteError(KVWriteError),
}

impl From<KVSetError> for BlockIndexWriteError {
    fn from(value: KVSetError) -> Self {
        BlockIndexWriteError::KVSetError(value)
    }
}

impl From<KVWriteError> for BlockIndexWriteError {
    fn from(value: KVWriteError) -> Self {
        BlockIndexWriteError::KVWriteError(value)
    }
}

impl Display for BlockIndexWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockIndexWriteError::KVSetError(err) => Display::fmt(err, f),
            BlockIndexWriteError::KVWriteError(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for BlockIndexWriteError {}

/// Error when loading the block index. Every variant means the stored index cannot be trusted.
#[derive(Debug)]
pub enum BlockIndexLoadError {
    /// The header stored under `key` hashes to `computed`.
    HashMismatch { key: CryptoHash, computed: CryptoHash },
    MalformedKey { key: Vec<u8> },
    MissingParent { block: CryptoHash, parent: CryptoHash },
    KVGetError(KVGetError),
    BlockIndexError(BlockIndexError),
}

impl From<KVGetError> for BlockIndexLoadError {
    fn from(value: KVGetError) -> Self {
        BlockIndexLoadError::KVGetError(value)
    }
}

impl From<BlockIndexError> for BlockIndexLoadError {
    fn from(value: BlockIndexError) -> Self {
        BlockIndexLoadError::BlockIndexError(value)
    }
}

impl Display for BlockIndexLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockIndexLoadError::HashMismatch { key, computed } => write!(
                f,
                "block index record stored under {} has a header hashing to {}",
                key, computed
            ),
            BlockIndexLoadError::MalformedKey { key } => {
                write!(f, "malformed block index key of {} bytes", key.len())
            }
            BlockIndexLoadError::MissingParent { block, parent } => {
                write!(f, "parent {} of block {} is not in the block index", parent, block)
            }
            BlockIndexLoadError::KVGetError(err) => Display::fmt(err, f),
            BlockIndexLoadError::BlockIndexError(err) => Display::fmt(err, f),
        }
    }
}

impl std::error::Error for BlockIndexLoadError {}
