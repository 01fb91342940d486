/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transparent outputs and the per-transaction coin record.

use std::mem::size_of;

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{Amount, BlockHeight, CryptoHash};

/// A reference to one output of one transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct OutPoint {
    pub txid: CryptoHash,
    pub index: u32,
}

impl OutPoint {
    pub const fn new(txid: CryptoHash, index: u32) -> Self {
        Self { txid, index }
    }
}

/// A transparent transaction output.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }

    fn dynamic_memory_usage(&self) -> usize {
        self.script_pubkey.capacity()
    }
}

/// The not-yet-spent outputs created by one transaction, plus the metadata needed to validate spends
/// of them.
///
/// # Pruned vs. absent
///
/// A `Coins` whose outputs have all been spent is *pruned*. A pruned record is still a record: a
/// cache that holds one knows the transaction existed and must make sure its parent forgets it on
/// flush. Only the root store represents "fully spent" by absence.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Coins {
    /// Outputs by index. `None` marks a spent output.
    pub outputs: Vec<Option<TxOut>>,
    pub is_coinbase: bool,
    pub height: BlockHeight,
    pub version: i32,
}

impl Coins {
    pub fn new(outputs: Vec<TxOut>, is_coinbase: bool, height: BlockHeight, version: i32) -> Self {
        let mut coins = Self {
            outputs: outputs.into_iter().map(Some).collect(),
            is_coinbase,
            height,
            version,
        };
        coins.cleanup();
        coins
    }

    /// Reset to the empty, pruned record.
    pub fn clear(&mut self) {
        *self = Coins::default();
    }

    /// Drop trailing spent outputs, releasing the vector entirely once nothing is left.
    pub fn cleanup(&mut self) {
        while let Some(None) = self.outputs.last() {
            self.outputs.pop();
        }
        if self.outputs.is_empty() {
            self.outputs = Vec::new();
        }
    }

    /// Whether every output of this transaction has been spent.
    pub fn is_pruned(&self) -> bool {
        self.outputs.iter().all(Option::is_none)
    }

    pub fn is_available(&self, index: u32) -> bool {
        self.output(index).is_some()
    }

    pub fn output(&self, index: u32) -> Option<&TxOut> {
        self.outputs.get(index as usize).and_then(Option::as_ref)
    }

    /// Mark output `index` as spent, returning it if it was available.
    pub fn spend(&mut self, index: u32) -> Option<TxOut> {
        let spent = self.outputs.get_mut(index as usize)?.take();
        self.cleanup();
        spent
    }

    /// Append a new unspent output at the next free index.
    pub fn push_output(&mut self, output: TxOut) -> u32 {
        self.outputs.push(Some(output));
        (self.outputs.len() - 1) as u32
    }

    pub fn unspent_count(&self) -> usize {
        self.outputs.iter().filter(|output| output.is_some()).count()
    }

    pub fn unspent_value(&self) -> Amount {
        self.outputs.iter().flatten().map(|output| output.value).sum()
    }

    /// Estimated heap footprint of this record, excluding the record itself.
    pub fn dynamic_memory_usage(&self) -> usize {
        let slots = self.outputs.capacity() * size_of::<Option<TxOut>>();
        let scripts: usize = self
            .outputs
            .iter()
            .flatten()
            .map(TxOut::dynamic_memory_usage)
            .sum();
        slots + scripts
    }
}
