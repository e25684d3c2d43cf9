//! Core data types flowing through the ingestion pipeline.

use crate::ConfigError;
use alloy_primitives::{Address, B256, Bytes, U256};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Opaque identifier of a transaction.
pub type TxHash = B256;

/// Identifies a block to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("#{number}")]
pub struct BlockRef {
    /// The block height.
    pub number: u64,
}

impl From<u64> for BlockRef {
    fn from(number: u64) -> Self {
        Self { number }
    }
}

/// The transaction hashes of one successfully fetched block, in block order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockTxHashes {
    /// The block height the hashes were read from.
    pub block_number: u64,
    /// The hashes of every transaction in the block.
    pub hashes: Vec<TxHash>,
}

impl BlockTxHashes {
    /// Creates a new [`BlockTxHashes`].
    pub const fn new(block_number: u64, hashes: Vec<TxHash>) -> Self {
        Self { block_number, hashes }
    }

    /// Returns the number of transactions in the block.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Returns `true` if the block carries no transactions.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

/// A fully fetched transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    /// The transaction hash.
    pub hash: TxHash,
    /// Value transferred, in the smallest unit of the native token.
    pub value: U256,
    /// Call data.
    pub data: Bytes,
    /// Sender.
    pub from: Address,
    /// Recipient, `None` for contract creations.
    pub to: Option<Address>,
    /// Sender nonce.
    pub nonce: u64,
}

/// The persisted projection of a [`TxRecord`] that transferred value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredRecord {
    /// The transaction hash.
    pub hash: TxHash,
    /// Call data.
    pub data: Bytes,
    /// Sender.
    pub from: Address,
    /// Recipient, `None` for contract creations.
    pub to: Option<Address>,
    /// Sender nonce.
    pub nonce: u64,
}

/// A half open `[start, end)` range of block heights.
///
/// Immutable once constructed; `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[display("[{start}, {end})")]
pub struct PendingRange {
    start: u64,
    end: u64,
}

impl PendingRange {
    /// Creates a new range, rejecting `start > end`.
    pub const fn new(start: u64, end: u64) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// The first block of the range.
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// One past the last block of the range.
    pub const fn end(&self) -> u64 {
        self.end
    }

    /// Number of blocks in the range.
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` if the range holds no blocks.
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Returns `true` if `number` lies inside the range.
    pub const fn contains(&self, number: u64) -> bool {
        number >= self.start && number < self.end
    }

    /// Iterates every block of the range in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = BlockRef> + use<> {
        Range::from(*self).map(BlockRef::from)
    }
}

impl From<PendingRange> for Range<u64> {
    fn from(range: PendingRange) -> Self {
        range.start..range.end
    }
}
