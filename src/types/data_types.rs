/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, Sub},
};

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

/// Amount of currency in the smallest unit. Signed, because shielded-pool deltas can be negative.
pub type Amount = i64;

/// 32-byte cryptographic hash.
///
/// The same type identifies blocks, transactions, commitment tree roots ("anchors"), and nullifiers.
/// Block hashes and transaction ids are always double-SHA256 digests (see [`sha256d`]).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zeroes hash.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl From<[u8; 32]> for CryptoHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for CryptoHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Hashes are displayed byte-reversed in hex, the way block explorers print them.
impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Double SHA256 of `bytes`.
pub fn sha256d(bytes: &[u8]) -> CryptoHash {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    CryptoHash::new(second.into())
}

/// Height of a block in the block index.
///
/// Starts at 0 for the genesis block and increases by 1 for every parent link. Entries whose position
/// in the tree is not known yet carry [`BlockHeight::UNKNOWN`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockHeight(i32);

impl BlockHeight {
    /// Height of an entry that has not been linked to its parent yet.
    pub const UNKNOWN: BlockHeight = BlockHeight(-1);

    pub const GENESIS: BlockHeight = BlockHeight(0);

    /// Create a new `BlockHeight` with an `int` inner value.
    pub const fn new(int: i32) -> Self {
        Self(int)
    }

    /// Get the inner `i32` value of this `BlockHeight`.
    pub const fn int(&self) -> i32 {
        self.0
    }

    pub const fn is_known(&self) -> bool {
        self.0 >= 0
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<i32> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: i32) -> Self::Output {
        BlockHeight(self.0 + rhs)
    }
}

impl Sub<i32> for BlockHeight {
    type Output = BlockHeight;
    fn sub(self, rhs: i32) -> Self::Output {
        BlockHeight(self.0 - rhs)
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = i32;
    fn sub(self, rhs: BlockHeight) -> Self::Output {
        self.0 - rhs.0
    }
}

/// The two shielded value pools. Each has its own commitment tree, anchor set, and nullifier set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub enum ShieldedType {
    Sprout,
    Sapling,
}

impl Display for ShieldedType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ShieldedType::Sprout => write!(f, "Sprout"),
            ShieldedType::Sapling => write!(f, "Sapling"),
        }
    }
}
