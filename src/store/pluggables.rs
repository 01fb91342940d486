/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable persistence of the coin set, the shielded-pool ledgers, and the block index.

use std::fmt::{self, Display};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    block_index::disk::DiskBlockIndex,
    types::{
        coins::Coins,
        data_types::{CryptoHash, ShieldedType},
        merkle::{IncrementalMerkleTree, MerkleTreeBytes, ShieldedPool, TreeDepthError},
    },
};

use super::variables;

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    /// Atomically apply every operation in `wb`, or none of them.
    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), KVWriteError>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Every key-value pair whose key starts with `prefix`, in any order.
    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    /* ↓↓↓ Coins ↓↓↓ */

    fn coins(&self, txid: &CryptoHash) -> Result<Option<Coins>, KVGetError> {
        self.get(&variables::coins_key(txid))
            .map(|bytes| deserialize_value(&bytes, Key::Coins { txid: *txid }))
            .transpose()
    }

    fn has_coins(&self, txid: &CryptoHash) -> bool {
        self.get(&variables::coins_key(txid)).is_some()
    }

    /* ↓↓↓ Anchors ↓↓↓ */

    fn anchor<P: ShieldedPool>(
        &self,
        root: &CryptoHash,
    ) -> Result<Option<IncrementalMerkleTree<P>>, KVGetError>
    where
        Self: Sized,
    {
        let key = Key::Anchor {
            pool: P::TYPE,
            root: *root,
        };
        match self.get(&variables::anchor_key(P::TYPE, root)) {
            None => Ok(None),
            Some(bytes) => {
                let stored: MerkleTreeBytes = deserialize_value(&bytes, key.clone())?;
                let tree = IncrementalMerkleTree::<P>::try_from(stored).map_err(|source| {
                    KVGetError::MalformedTree {
                        key: key.clone(),
                        source,
                    }
                })?;
                // A stored tree must hash to the root it is stored under.
                if tree.root() != *root {
                    return Err(KVGetError::AnchorRootMismatch {
                        key,
                        computed: tree.root(),
                    });
                }
                Ok(Some(tree))
            }
        }
    }

    /* ↓↓↓ Nullifiers ↓↓↓ */

    fn nullifier(&self, pool: ShieldedType, nullifier: &CryptoHash) -> Result<bool, KVGetError> {
        match self.get(&variables::nullifier_key(pool, nullifier)) {
            None => Ok(false),
            Some(bytes) => deserialize_value(
                &bytes,
                Key::Nullifier {
                    pool,
                    nullifier: *nullifier,
                },
            ),
        }
    }

    /* ↓↓↓ Best Block and Best Anchors ↓↓↓ */

    fn best_block(&self) -> Result<Option<CryptoHash>, KVGetError> {
        self.get(&variables::BEST_BLOCK)
            .map(|bytes| deserialize_value(&bytes, Key::BestBlock))
            .transpose()
    }

    fn best_anchor(&self, pool: ShieldedType) -> Result<Option<CryptoHash>, KVGetError> {
        self.get(&variables::best_anchor_key(pool))
            .map(|bytes| deserialize_value(&bytes, Key::BestAnchor { pool }))
            .transpose()
    }

    /* ↓↓↓ Block Index ↓↓↓ */

    fn disk_block_index(&self, block: &CryptoHash) -> Result<Option<DiskBlockIndex>, KVGetError> {
        self.get(&variables::block_index_key(block))
            .map(|bytes| deserialize_value(&bytes, Key::BlockIndex { block: *block }))
            .transpose()
    }
}

pub(crate) fn deserialize_value<T: BorshDeserialize>(bytes: &[u8], key: Key) -> Result<T, KVGetError> {
    T::deserialize(&mut &*bytes).map_err(|err| KVGetError::DeserializeValueError { key, source: err })
}

fn serialize_value<T: BorshSerialize>(value: &T, key: Key) -> Result<Vec<u8>, KVSetError> {
    value
        .try_to_vec()
        .map_err(|err| KVSetError::SerializeValueError { key, source: err })
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// Typed wrapper around a [`WriteBatch`] that puts each variable at the right key.
pub struct StateWriteBatch<W: WriteBatch>(pub(crate) W);

impl<W: WriteBatch> StateWriteBatch<W> {
    pub fn new() -> StateWriteBatch<W> {
        StateWriteBatch(W::new())
    }

    pub fn into_inner(self) -> W {
        self.0
    }

    /* ↓↓↓ Coins ↓↓↓ */

    pub fn set_coins(&mut self, txid: &CryptoHash, coins: &Coins) -> Result<(), KVSetError> {
        let bytes = serialize_value(coins, Key::Coins { txid: *txid })?;
        self.0.set(&variables::coins_key(txid), &bytes);
        Ok(())
    }

    pub fn delete_coins(&mut self, txid: &CryptoHash) {
        self.0.delete(&variables::coins_key(txid));
    }

    /* ↓↓↓ Anchors ↓↓↓ */

    pub fn set_anchor<P: ShieldedPool>(
        &mut self,
        root: &CryptoHash,
        tree: &IncrementalMerkleTree<P>,
    ) -> Result<(), KVSetError> {
        let bytes = serialize_value(
            &MerkleTreeBytes::from(tree),
            Key::Anchor {
                pool: P::TYPE,
                root: *root,
            },
        )?;
        self.0.set(&variables::anchor_key(P::TYPE, root), &bytes);
        Ok(())
    }

    pub fn delete_anchor(&mut self, pool: ShieldedType, root: &CryptoHash) {
        self.0.delete(&variables::anchor_key(pool, root));
    }

    /* ↓↓↓ Nullifiers ↓↓↓ */

    /// Record `nullifier` as revealed. Unrevealed nullifiers are represented by absence, see
    /// [`delete_nullifier`](Self::delete_nullifier).
    pub fn set_nullifier(
        &mut self,
        pool: ShieldedType,
        nullifier: &CryptoHash,
    ) -> Result<(), KVSetError> {
        let bytes = serialize_value(
            &true,
            Key::Nullifier {
                pool,
                nullifier: *nullifier,
            },
        )?;
        self.0.set(&variables::nullifier_key(pool, nullifier), &bytes);
        Ok(())
    }

    pub fn delete_nullifier(&mut self, pool: ShieldedType, nullifier: &CryptoHash) {
        self.0.delete(&variables::nullifier_key(pool, nullifier));
    }

    /* ↓↓↓ Best Block and Best Anchors ↓↓↓ */

    pub fn set_best_block(&mut self, block: &CryptoHash) -> Result<(), KVSetError> {
        let bytes = serialize_value(block, Key::BestBlock)?;
        self.0.set(&variables::BEST_BLOCK, &bytes);
        Ok(())
    }

    pub fn set_best_anchor(
        &mut self,
        pool: ShieldedType,
        root: &CryptoHash,
    ) -> Result<(), KVSetError> {
        let bytes = serialize_value(root, Key::BestAnchor { pool })?;
        self.0.set(&variables::best_anchor_key(pool), &bytes);
        Ok(())
    }

    /* ↓↓↓ Block Index ↓↓↓ */

    pub fn set_disk_block_index(&mut self, record: &DiskBlockIndex) -> Result<(), KVSetError> {
        let block = record.hash();
        let bytes = serialize_value(record, Key::BlockIndex { block })?;
        self.0.set(&variables::block_index_key(&block), &bytes);
        Ok(())
    }
}

/// Error when trying to read a value corresponding to a given key from the [key value store][KVStore].
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. A stored commitment tree is deeper than its pool's tree,
/// 3. A stored commitment tree does not hash to the root it is stored under.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    MalformedTree { key: Key, source: TreeDepthError },
    AnchorRootMismatch { key: Key, computed: CryptoHash },
}

impl Display for KVGetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KVGetError::DeserializeValueError { key, source } => {
                write!(f, "failed to deserialize {}: {}", key, source)
            }
            KVGetError::MalformedTree { key, source } => write!(f, "{}: {}", key, source),
            KVGetError::AnchorRootMismatch { key, computed } => {
                write!(f, "{} holds a tree with root {}", key, computed)
            }
        }
    }
}

impl std::error::Error for KVGetError {}

/// Error when writing a key-value pair to a [write batch][StateWriteBatch]. The error may arise when
/// the value cannot be serialized, and hence cannot be written to the write batch.
#[derive(Debug)]
pub enum KVSetError {
    SerializeValueError { key: Key, source: std::io::Error },
}

impl Display for KVSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KVSetError::SerializeValueError { key, source } => {
                write!(f, "failed to serialize {}: {}", key, source)
            }
        }
    }
}

impl std::error::Error for KVSetError {}

/// The key-value store refused to apply a write batch. Nothing in the batch was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KVWriteError {
    pub reason: String,
}

impl KVWriteError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Display for KVWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "write batch rejected: {}", self.reason)
    }
}

impl std::error::Error for KVWriteError {}

#[derive(Debug, Clone)]
pub enum Key {
    Coins { txid: CryptoHash },
    Anchor { pool: ShieldedType, root: CryptoHash },
    Nullifier { pool: ShieldedType, nullifier: CryptoHash },
    BestBlock,
    BestAnchor { pool: ShieldedType },
    BlockIndex { block: CryptoHash },
}

impl Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Coins { txid } => write!(f, "Coins for transaction {}", txid),
            Key::Anchor { pool, root } => write!(f, "{} Anchor {}", pool, root),
            Key::Nullifier { pool, nullifier } => write!(f, "{} Nullifier {}", pool, nullifier),
            Key::BestBlock => write!(f, "Best Block"),
            Key::BestAnchor { pool } => write!(f, "Best {} Anchor", pool),
            Key::BlockIndex { block } => write!(f, "Block Index for block {}", block),
        }
    }
}

/// Prefix scans return full keys; strip the one-byte variable prefix to recover the hash.
pub(crate) fn hash_from_key(key: &[u8]) -> Option<CryptoHash> {
    let bytes: [u8; 32] = key.get(1..)?.try_into().ok()?;
    Some(CryptoHash::new(bytes))
}
