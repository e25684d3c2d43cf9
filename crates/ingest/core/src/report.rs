//! Failure records and the final run report.

use crate::{PendingRange, TxHash};
use derive_more::Display;
use serde::Serialize;
use std::time::Duration;

/// A block whose fetch failed permanently or ran out of attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockFailure {
    /// The block number.
    pub block_number: u64,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Human readable cause.
    pub reason: String,
}

/// The stage at which a transaction was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Fetching the transaction from the node failed.
    #[display("fetch")]
    Fetch,
    /// The sink refused the filtered record.
    #[display("sink")]
    Sink,
}

/// A transaction that could not be fetched or persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxFailure {
    /// The block the transaction was discovered in.
    pub block_number: u64,
    /// The transaction hash.
    pub hash: TxHash,
    /// Where it failed.
    pub stage: FailureStage,
    /// Fetch attempts made. For sink failures, the attempts the successful fetch took.
    pub attempts: u32,
    /// Human readable cause.
    pub reason: String,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every block in the range was drained or failed.
    #[display("complete")]
    Complete,
    /// The run was cancelled before completing.
    #[display("cancelled")]
    Cancelled,
}

/// Summary of one ingestion run.
///
/// The failure lists name exactly which blocks and transactions were lost, so a caller can
/// re-run a narrowed range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// The range that was requested.
    pub range: PendingRange,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Blocks whose every transaction was accounted for.
    pub blocks_drained: u64,
    /// Blocks whose fetch failed.
    pub blocks_failed: u64,
    /// Blocks that were neither drained nor failed; nonzero only for cancelled runs.
    pub blocks_unfinished: u64,
    /// Transactions that passed the filter and were appended to the sink.
    pub txs_included: u64,
    /// Transactions that were fetched but filtered out.
    pub txs_excluded: u64,
    /// Transactions whose fetch failed.
    pub txs_failed: u64,
    /// Filtered records the sink refused.
    pub sink_failures: u64,
    /// Every failed block, in failure order.
    pub failed_blocks: Vec<BlockFailure>,
    /// Every failed transaction, in failure order.
    pub failed_transactions: Vec<TxFailure>,
    /// Wall clock duration of the run.
    pub elapsed: Duration,
}

impl RunReport {
    /// Returns `true` if the run reached completion.
    pub fn is_complete(&self) -> bool {
        self.outcome == RunOutcome::Complete
    }

    /// Returns `true` if nothing was lost.
    pub fn is_lossless(&self) -> bool {
        self.is_complete() && self.failed_blocks.is_empty() && self.failed_transactions.is_empty()
    }

    /// The failed block numbers in ascending order.
    pub fn failed_block_numbers(&self) -> Vec<u64> {
        let mut numbers: Vec<u64> = self.failed_blocks.iter().map(|f| f.block_number).collect();
        numbers.sort_unstable();
        numbers
    }

    /// The hashes of every failed transaction.
    pub fn failed_tx_hashes(&self) -> Vec<TxHash> {
        self.failed_transactions.iter().map(|f| f.hash).collect()
    }
}
