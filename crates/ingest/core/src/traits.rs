//! Traits at the edges of the pipeline: the node it reads from and the sink it writes to.

use crate::{BlockTxHashes, FilteredRecord, RpcError, SinkError, TxHash, TxRecord};
use async_trait::async_trait;
use std::fmt::Debug;

/// Read access to a chain node.
///
/// Both calls are fallible and may be slow; the pipeline bounds how many are outstanding and
/// retries transient failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainProvider: Debug + Send + Sync {
    /// Fetches the transaction hashes of the block at `number`.
    async fn fetch_block(&self, number: u64) -> Result<BlockTxHashes, RpcError>;

    /// Fetches the full details of the transaction `hash`.
    async fn fetch_transaction(&self, hash: TxHash) -> Result<TxRecord, RpcError>;
}

/// Append-only destination for [`FilteredRecord`]s.
///
/// Records arrive in no particular order. `append` must not block indefinitely; the pipeline
/// does not retry failed appends.
#[async_trait]
pub trait ResultSink: Debug + Send + Sync {
    /// Appends one record.
    async fn append(&self, record: FilteredRecord) -> Result<(), SinkError>;
}
