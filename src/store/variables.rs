/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each persisted variable is stored in the user-provided key-value
//! store.
//!
//! # List of State Variables
//!
//! |Variable|Type|Description|
//! |---|---|---|
//! |Coins|[`CryptoHash`] -> [`Coins`](crate::types::coins::Coins)|Unspent outputs by transaction id. Fully spent transactions are absent.|
//! |Sprout Anchors|[`CryptoHash`] -> [`MerkleTreeBytes`](crate::types::merkle::MerkleTreeBytes)|Sprout commitment tree snapshots by root. The empty root is never stored.|
//! |Sapling Anchors|[`CryptoHash`] -> [`MerkleTreeBytes`](crate::types::merkle::MerkleTreeBytes)|Sapling commitment tree snapshots by root.|
//! |Sprout Nullifiers|[`CryptoHash`] -> `bool`|Revealed Sprout nullifiers. Only `true` is ever stored.|
//! |Sapling Nullifiers|[`CryptoHash`] -> `bool`|Revealed Sapling nullifiers. Only `true` is ever stored.|
//! |Best Block|[`CryptoHash`]|Hash of the block the coin set corresponds to.|
//! |Best Sprout Anchor|[`CryptoHash`]|Root of the Sprout tree at the best block.|
//! |Best Sapling Anchor|[`CryptoHash`]|Root of the Sapling tree at the best block.|
//! |Block Index|[`CryptoHash`] -> [`DiskBlockIndex`](crate::block_index::disk::DiskBlockIndex)|Every known block header with its index metadata.|
//!
//! # Persistence of state variables
//!
//! Every value is stored Borsh-serialized. Single values live at their one-byte constant key.
//! Mappings of the form "`A` -> `B`" live at the concatenation of the variable's one-byte prefix and
//! the bytes of the `A` value.

use crate::types::data_types::{CryptoHash, ShieldedType};

pub const COINS: [u8; 1] = [b'c'];
pub const SPROUT_ANCHORS: [u8; 1] = [b'A'];
pub const SAPLING_ANCHORS: [u8; 1] = [b'Z'];
pub const SPROUT_NULLIFIERS: [u8; 1] = [b's'];
pub const SAPLING_NULLIFIERS: [u8; 1] = [b'S'];
pub const BEST_BLOCK: [u8; 1] = [b'B'];
pub const BEST_SPROUT_ANCHOR: [u8; 1] = [b'a'];
pub const BEST_SAPLING_ANCHOR: [u8; 1] = [b'z'];
pub const BLOCK_INDEX: [u8; 1] = [b'b'];

/// Takes references to two byteslices and returns a vector containing the bytes of the first one, and
/// then the bytes of the second one.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

pub fn anchors_prefix(pool: ShieldedType) -> [u8; 1] {
    match pool {
        ShieldedType::Sprout => SPROUT_ANCHORS,
        ShieldedType::Sapling => SAPLING_ANCHORS,
    }
}

pub fn nullifiers_prefix(pool: ShieldedType) -> [u8; 1] {
    match pool {
        ShieldedType::Sprout => SPROUT_NULLIFIERS,
        ShieldedType::Sapling => SAPLING_NULLIFIERS,
    }
}

pub fn best_anchor_key(pool: ShieldedType) -> [u8; 1] {
    match pool {
        ShieldedType::Sprout => BEST_SPROUT_ANCHOR,
        ShieldedType::Sapling => BEST_SAPLING_ANCHOR,
    }
}

pub(crate) fn coins_key(txid: &CryptoHash) -> Vec<u8> {
    concat(&COINS, &txid.bytes())
}

pub(crate) fn anchor_key(pool: ShieldedType, root: &CryptoHash) -> Vec<u8> {
    concat(&anchors_prefix(pool), &root.bytes())
}

pub(crate) fn nullifier_key(pool: ShieldedType, nullifier: &CryptoHash) -> Vec<u8> {
    concat(&nullifiers_prefix(pool), &nullifier.bytes())
}

pub(crate) fn block_index_key(block: &CryptoHash) -> Vec<u8> {
    concat(&BLOCK_INDEX, &block.bytes())
}
