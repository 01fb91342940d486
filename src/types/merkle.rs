/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Incremental (append-only) note commitment trees, and the [`ShieldedPool`] trait that parameterizes
//! everything in this crate that differs between the Sprout and Sapling pools.
//!
//! A commitment tree is stored as its right frontier only: the two lowest leaves (`left`, `right`)
//! and one optional node per level above them (`parents`). This is enough to append new commitments
//! and to compute the root, which is what the anchor set is keyed by.
//!
//! Both pools hash nodes with SHA256 here. The Sapling combiner is domain-separated by a
//! personalization prefix and the node depth so that the two pools never share roots.

use std::{fmt, marker::PhantomData, mem::size_of, sync::OnceLock};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

use super::data_types::{CryptoHash, ShieldedType};

/// Compile-time description of one shielded pool.
pub trait ShieldedPool: Sized + Send + Sync + 'static {
    const TYPE: ShieldedType;

    /// Depth of the pool's commitment tree.
    const DEPTH: usize;

    /// Value of a leaf slot that does not hold a commitment yet.
    const UNCOMMITTED: CryptoHash;

    /// Hash two sibling nodes at `depth` (0 = leaves) into their parent.
    fn combine(left: &CryptoHash, right: &CryptoHash, depth: usize) -> CryptoHash;

    /// Roots of empty subtrees, indexed by subtree height, from `0` (a single uncommitted leaf) up to
    /// and including [`DEPTH`](Self::DEPTH).
    fn empty_roots() -> &'static [CryptoHash];

    /// Root of the empty tree. This anchor is always resolvable, whether or not it was ever pushed.
    fn empty_root() -> CryptoHash {
        Self::empty_roots()[Self::DEPTH]
    }
}

fn compute_empty_roots<P: ShieldedPool>() -> Vec<CryptoHash> {
    let mut roots = Vec::with_capacity(P::DEPTH + 1);
    roots.push(P::UNCOMMITTED);
    for depth in 0..P::DEPTH {
        let below = roots[depth];
        roots.push(P::combine(&below, &below, depth));
    }
    roots
}

/// Marker type for the Sprout pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sprout;

impl ShieldedPool for Sprout {
    const TYPE: ShieldedType = ShieldedType::Sprout;
    const DEPTH: usize = 29;
    const UNCOMMITTED: CryptoHash = CryptoHash::zero();

    fn combine(left: &CryptoHash, right: &CryptoHash, _depth: usize) -> CryptoHash {
        let mut hasher = Sha256::new();
        hasher.update(left.bytes());
        hasher.update(right.bytes());
        CryptoHash::new(hasher.finalize().into())
    }

    fn empty_roots() -> &'static [CryptoHash] {
        static ROOTS: OnceLock<Vec<CryptoHash>> = OnceLock::new();
        ROOTS.get_or_init(compute_empty_roots::<Self>)
    }
}

/// Marker type for the Sapling pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sapling;

const SAPLING_PERSONALIZATION: &[u8] = b"SaplingMerkleNode";

impl ShieldedPool for Sapling {
    const TYPE: ShieldedType = ShieldedType::Sapling;
    const DEPTH: usize = 32;
    const UNCOMMITTED: CryptoHash = {
        let mut bytes = [0u8; 32];
        bytes[0] = 1;
        CryptoHash::new(bytes)
    };

    fn combine(left: &CryptoHash, right: &CryptoHash, depth: usize) -> CryptoHash {
        let mut hasher = Sha256::new();
        hasher.update(SAPLING_PERSONALIZATION);
        hasher.update((depth as u8).to_le_bytes());
        hasher.update(left.bytes());
        hasher.update(right.bytes());
        CryptoHash::new(hasher.finalize().into())
    }

    fn empty_roots() -> &'static [CryptoHash] {
        static ROOTS: OnceLock<Vec<CryptoHash>> = OnceLock::new();
        ROOTS.get_or_init(compute_empty_roots::<Self>)
    }
}

/// Error returned when appending to a tree whose every leaf is already committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeFullError;

impl fmt::Display for TreeFullError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "commitment tree is full")
    }
}

impl std::error::Error for TreeFullError {}

/// Append-only note commitment tree for pool `P`.
pub struct IncrementalMerkleTree<P: ShieldedPool> {
    left: Option<CryptoHash>,
    right: Option<CryptoHash>,
    parents: Vec<Option<CryptoHash>>,
    _pool: PhantomData<P>,
}

impl<P: ShieldedPool> IncrementalMerkleTree<P> {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            left: None,
            right: None,
            parents: Vec::new(),
            _pool: PhantomData,
        }
    }

    pub fn empty_root() -> CryptoHash {
        P::empty_root()
    }

    /// Number of commitments appended so far.
    pub fn size(&self) -> u64 {
        let mut size = match (self.left, self.right) {
            (None, _) => 0,
            (Some(_), None) => 1,
            (Some(_), Some(_)) => 2,
        };
        for (level, parent) in self.parents.iter().enumerate() {
            if parent.is_some() {
                size += 1u64 << (level + 1);
            }
        }
        size
    }

    /// Whether every leaf of the tree holds a commitment.
    pub fn is_complete(&self) -> bool {
        self.left.is_some()
            && self.right.is_some()
            && self.parents.len() == P::DEPTH - 1
            && self.parents.iter().all(Option::is_some)
    }

    /// Append `commitment` as the next leaf.
    pub fn append(&mut self, commitment: CryptoHash) -> Result<(), TreeFullError> {
        if self.is_complete() {
            return Err(TreeFullError);
        }

        let (left, right) = match (self.left, self.right) {
            (None, _) => {
                self.left = Some(commitment);
                return Ok(());
            }
            (Some(_), None) => {
                self.right = Some(commitment);
                return Ok(());
            }
            (Some(left), Some(right)) => (left, right),
        };

        // Both leaves are full: fold them into the parents and start a new leaf pair.
        let mut combined = P::combine(&left, &right, 0);
        self.left = Some(commitment);
        self.right = None;

        for level in 0..P::DEPTH {
            if level == self.parents.len() {
                self.parents.push(Some(combined));
                break;
            }
            match self.parents[level].take() {
                Some(parent) => combined = P::combine(&parent, &combined, level + 1),
                None => {
                    self.parents[level] = Some(combined);
                    break;
                }
            }
        }

        Ok(())
    }

    /// The root of the tree, treating every unfilled leaf as uncommitted.
    pub fn root(&self) -> CryptoHash {
        let empty = P::empty_roots();
        let left = self.left.unwrap_or(empty[0]);
        let right = self.right.unwrap_or(empty[0]);
        let mut root = P::combine(&left, &right, 0);

        let mut depth = 1;
        for parent in &self.parents {
            root = match parent {
                Some(parent) => P::combine(parent, &root, depth),
                None => P::combine(&root, &empty[depth], depth),
            };
            depth += 1;
        }
        while depth < P::DEPTH {
            root = P::combine(&root, &empty[depth], depth);
            depth += 1;
        }
        root
    }

    /// Estimated heap footprint of this tree, excluding the tree itself.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.parents.capacity() * size_of::<Option<CryptoHash>>()
    }
}

impl<P: ShieldedPool> Default for IncrementalMerkleTree<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ShieldedPool> Clone for IncrementalMerkleTree<P> {
    fn clone(&self) -> Self {
        Self {
            left: self.left,
            right: self.right,
            parents: self.parents.clone(),
            _pool: PhantomData,
        }
    }
}

impl<P: ShieldedPool> PartialEq for IncrementalMerkleTree<P> {
    fn eq(&self, other: &Self) -> bool {
        self.left == other.left && self.right == other.right && self.parents == other.parents
    }
}

impl<P: ShieldedPool> Eq for IncrementalMerkleTree<P> {}

impl<P: ShieldedPool> fmt::Debug for IncrementalMerkleTree<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalMerkleTree")
            .field("pool", &P::TYPE)
            .field("size", &self.size())
            .field("root", &self.root())
            .finish()
    }
}

/// Intermediate, pool-agnostic representation of an [`IncrementalMerkleTree`] used for persistence.
#[derive(Clone, BorshSerialize, BorshDeserialize)]
pub struct MerkleTreeBytes {
    pub left: Option<CryptoHash>,
    pub right: Option<CryptoHash>,
    pub parents: Vec<Option<CryptoHash>>,
}

impl<P: ShieldedPool> From<&IncrementalMerkleTree<P>> for MerkleTreeBytes {
    fn from(tree: &IncrementalMerkleTree<P>) -> Self {
        Self {
            left: tree.left,
            right: tree.right,
            parents: tree.parents.clone(),
        }
    }
}

impl<P: ShieldedPool> TryFrom<MerkleTreeBytes> for IncrementalMerkleTree<P> {
    type Error = TreeDepthError;

    fn try_from(bytes: MerkleTreeBytes) -> Result<Self, TreeDepthError> {
        // The two leaves take the lowest level.
        if bytes.parents.len() > P::DEPTH - 1 {
            return Err(TreeDepthError {
                pool: P::TYPE,
                levels: bytes.parents.len() + 1,
            });
        }
        Ok(Self {
            left: bytes.left,
            right: bytes.right,
            parents: bytes.parents,
            _pool: PhantomData,
        })
    }
}

/// A stored tree has more levels than the commitment tree of its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeDepthError {
    pub pool: ShieldedType,
    pub levels: usize,
}

impl fmt::Display for TreeDepthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} commitment tree with {} levels is deeper than the pool allows",
            self.pool, self.levels
        )
    }
}

impl std::error::Error for TreeDepthError {}

/// Shorthand for the Sprout commitment tree.
pub type SproutMerkleTree = IncrementalMerkleTree<Sprout>;

/// Shorthand for the Sapling commitment tree.
pub type SaplingMerkleTree = IncrementalMerkleTree<Sapling>;
