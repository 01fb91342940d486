//! Builders for headers, block index graphs, coins, and commitment trees used across the tests.

use chainstate_rs::{
    block_index::{entry::BlockIndexId, graph::BlockIndexGraph},
    types::{
        coins::{Coins, TxOut},
        data_types::{sha256d, BlockHeight, CryptoHash},
        header::BlockHeader,
        merkle::{IncrementalMerkleTree, ShieldedPool},
    },
};
use primitive_types::U256;

/// Compact target of 0x7fffff << 232, worth 2 units of work per header.
pub(crate) const EASY_BITS: u32 = 0x207f_ffff;

/// A header on top of `prev_block`. Headers with the same parent but different `salt` differ.
pub(crate) fn header(prev_block: CryptoHash, salt: u64) -> BlockHeader {
    BlockHeader {
        version: 4,
        prev_block,
        merkle_root: sha256d(&salt.to_le_bytes()),
        final_sapling_root: CryptoHash::zero(),
        time: 1_700_000_000,
        bits: EASY_BITS,
        nonce: CryptoHash::zero(),
        solution: Vec::new(),
    }
}

/// Add `len` headers on top of `parent` (or starting a new chain at genesis), and return their ids in
/// height order.
pub(crate) fn extend(
    graph: &mut BlockIndexGraph,
    parent: Option<BlockIndexId>,
    len: usize,
    salt: u64,
) -> Vec<BlockIndexId> {
    let mut prev_hash = parent.map_or(CryptoHash::zero(), |parent| graph[parent].hash());
    let mut ids = Vec::with_capacity(len);
    for i in 0..len {
        let id = graph
            .add_header(header(prev_hash, salt.wrapping_mul(1_000_003) + i as u64))
            .unwrap();
        prev_hash = graph[id].hash();
        ids.push(id);
    }
    ids
}

/// Hash used for entries created without a header.
pub(crate) fn block_hash(n: u64) -> CryptoHash {
    sha256d(&n.to_be_bytes())
}

/// Connect a header-less entry for hash number `n` below `parent`, with explicit work.
pub(crate) fn connect_with_work(
    graph: &mut BlockIndexGraph,
    parent: Option<BlockIndexId>,
    n: u64,
    work: u64,
) -> BlockIndexId {
    let id = graph.insert(block_hash(n));
    graph.connect(id, parent, U256::from(work)).unwrap();
    id
}

/// Walk parent links one at a time.
pub(crate) fn naive_ancestor(
    graph: &BlockIndexGraph,
    id: BlockIndexId,
    height: BlockHeight,
) -> Option<BlockIndexId> {
    let mut walk = Some(id);
    while let Some(current) = walk {
        if graph[current].height() == height {
            return Some(current);
        }
        if graph[current].height() < height {
            return None;
        }
        walk = graph[current].prev();
    }
    None
}

pub(crate) fn txid(n: u64) -> CryptoHash {
    sha256d(&[b"tx".as_slice(), n.to_le_bytes().as_slice()].concat())
}

pub(crate) fn nullifier(n: u64) -> CryptoHash {
    sha256d(&[b"nf".as_slice(), n.to_le_bytes().as_slice()].concat())
}

/// Coins of a transaction with one output per entry of `values`.
pub(crate) fn coins(values: &[i64]) -> Coins {
    Coins::new(
        values
            .iter()
            .map(|&value| TxOut::new(value, vec![0x76, 0xa9]))
            .collect(),
        false,
        BlockHeight::new(1),
        4,
    )
}

/// A tree holding `count` commitments derived from `salt`.
pub(crate) fn tree<P: ShieldedPool>(salt: u64, count: u64) -> IncrementalMerkleTree<P> {
    let mut tree = IncrementalMerkleTree::new();
    for i in 0..count {
        tree.append(sha256d(&[salt.to_le_bytes(), i.to_le_bytes()].concat()))
            .unwrap();
    }
    tree
}
