/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the block header type and the proof-of-work arithmetic derived from it.

use borsh::{BorshDeserialize, BorshSerialize};
use primitive_types::U256;

use super::data_types::{sha256d, CryptoHash};

/// A block header. The block hash is the double-SHA256 of its Borsh serialization.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: CryptoHash,
    pub merkle_root: CryptoHash,
    pub final_sapling_root: CryptoHash,
    pub time: u32,
    /// Difficulty target in compact form.
    pub bits: u32,
    pub nonce: CryptoHash,
    pub solution: Vec<u8>,
}

impl BlockHeader {
    pub fn hash(&self) -> CryptoHash {
        // Serializing plain integers, hashes, and a byte vector into memory cannot fail.
        let bytes = self.try_to_vec().unwrap_or_default();
        sha256d(&bytes)
    }

    /// The expected number of hashes needed to find a header meeting this header's target.
    pub fn work(&self) -> U256 {
        block_proof(self.bits)
    }
}

/// Decode a compact difficulty target. Returns `None` for negative or overflowing encodings.
pub fn target_from_compact(bits: u32) -> Option<U256> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;
    let negative = word != 0 && (bits & 0x0080_0000) != 0;
    let overflow = word != 0
        && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));
    if negative || overflow {
        return None;
    }

    let target = if size <= 3 {
        word >>= 8 * (3 - size);
        U256::from(word)
    } else {
        U256::from(word) << (8 * (size - 3) as usize)
    };
    Some(target)
}

/// Work represented by a header with compact target `bits`: `2^256 / (target + 1)`.
///
/// Invalid or zero targets contribute no work.
pub fn block_proof(bits: u32) -> U256 {
    match target_from_compact(bits) {
        Some(target) if !target.is_zero() => {
            // 2^256 does not fit in a U256, but 2^256 / (target + 1) == (!target / (target + 1)) + 1.
            (!target / (target + U256::one())) + U256::one()
        }
        _ => U256::zero(),
    }
}
