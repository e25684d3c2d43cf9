//! Observability events emitted while a run progresses.

use crate::{BlockFailure, ProgressSnapshot, RunOutcome, TxFailure, TxHash};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};
use txsweep_macros::{dec, inc, record, set};

/// Which stage a retry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// A block fetch.
    Block,
    /// A transaction fetch.
    Transaction,
}

impl FetchKind {
    /// The metric label of this kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Transaction => "transaction",
        }
    }
}

/// An event observed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    /// A block was admitted and its fetch started.
    BlockFetchStarted {
        /// The block number.
        block_number: u64,
    },
    /// A block's hash list was fetched.
    BlockFetchSucceeded {
        /// The block number.
        block_number: u64,
        /// Number of transactions in the block.
        tx_count: usize,
        /// Attempts the fetch took.
        attempts: u32,
        /// Time from admission to success, backoff included.
        elapsed: Duration,
    },
    /// A block fetch failed for good.
    BlockFetchFailed(BlockFailure),
    /// A transaction fetch started.
    TxFetchStarted {
        /// The owning block.
        block_number: u64,
        /// The transaction hash.
        hash: TxHash,
    },
    /// A transaction was fetched and run through the filter.
    TxFetchSucceeded {
        /// The owning block.
        block_number: u64,
        /// The transaction hash.
        hash: TxHash,
        /// Whether the filter kept it.
        included: bool,
    },
    /// A transaction fetch failed for good.
    TxFetchFailed(TxFailure),
    /// The sink refused a filtered record.
    SinkFailed(TxFailure),
    /// An RPC call failed transiently and will be retried.
    Retrying {
        /// The stage being retried.
        kind: FetchKind,
        /// The owning block.
        block_number: u64,
        /// The transaction hash for transaction fetches.
        hash: Option<TxHash>,
        /// The error that triggered the retry.
        reason: String,
        /// The backoff before the next attempt.
        delay: Duration,
    },
    /// Every transaction of a block was accounted for.
    BlockDrained {
        /// The block number.
        block_number: u64,
    },
    /// Periodic progress snapshot.
    Progress(ProgressSnapshot),
    /// The run ended.
    RunComplete {
        /// How it ended.
        outcome: RunOutcome,
        /// Final progress.
        snapshot: ProgressSnapshot,
    },
}

/// Fans [`IngestEvent`]s out to logs, metrics and any subscribers.
///
/// Subscribers read from a bounded broadcast channel. A subscriber that falls behind loses the
/// oldest events; the pipeline never waits on observers.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<IngestEvent>,
}

impl EventEmitter {
    /// Default capacity of the broadcast channel.
    pub const DEFAULT_CAPACITY: usize = 4096;

    /// Creates an emitter whose subscribers buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Logs, records and broadcasts `event`.
    pub fn emit(&self, event: IngestEvent) {
        observe(&event);
        // An error only means nobody is subscribed.
        let _ = self.tx.send(event);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

fn observe(event: &IngestEvent) {
    match event {
        IngestEvent::BlockFetchStarted { block_number } => {
            trace!(target: "block_scheduler", block_number, "Block fetch started");
            inc!(gauge, crate::Metrics::BLOCKS_IN_FLIGHT);
        }
        IngestEvent::BlockFetchSucceeded { block_number, tx_count, attempts, elapsed } => {
            debug!(
                target: "block_scheduler",
                block_number,
                tx_count,
                attempts,
                ?elapsed,
                "Block fetched"
            );
            dec!(gauge, crate::Metrics::BLOCKS_IN_FLIGHT);
            inc!(counter, crate::Metrics::BLOCK_FETCH_SUCCESS);
            record!(histogram, crate::Metrics::BLOCK_FETCH_DURATION, *elapsed);
        }
        IngestEvent::BlockFetchFailed(failure) => {
            warn!(
                target: "block_scheduler",
                block_number = failure.block_number,
                attempts = failure.attempts,
                reason = %failure.reason,
                "Block fetch failed"
            );
            dec!(gauge, crate::Metrics::BLOCKS_IN_FLIGHT);
            inc!(counter, crate::Metrics::BLOCK_FETCH_FAILED);
        }
        IngestEvent::TxFetchStarted { block_number, hash } => {
            trace!(target: "tx_scheduler", block_number, %hash, "Transaction fetch started");
            inc!(gauge, crate::Metrics::TX_IN_FLIGHT);
        }
        IngestEvent::TxFetchSucceeded { block_number, hash, included } => {
            trace!(target: "tx_scheduler", block_number, %hash, included, "Transaction fetched");
            dec!(gauge, crate::Metrics::TX_IN_FLIGHT);
            inc!(counter, crate::Metrics::TX_FETCH_SUCCESS);
            if *included {
                inc!(counter, crate::Metrics::TX_INCLUDED);
            }
        }
        IngestEvent::TxFetchFailed(failure) => {
            warn!(
                target: "tx_scheduler",
                block_number = failure.block_number,
                hash = %failure.hash,
                attempts = failure.attempts,
                reason = %failure.reason,
                "Transaction fetch failed"
            );
            dec!(gauge, crate::Metrics::TX_IN_FLIGHT);
            inc!(counter, crate::Metrics::TX_FETCH_FAILED);
        }
        IngestEvent::SinkFailed(failure) => {
            warn!(
                target: "sink",
                block_number = failure.block_number,
                hash = %failure.hash,
                reason = %failure.reason,
                "Sink refused record"
            );
            inc!(counter, crate::Metrics::SINK_FAILURES);
        }
        IngestEvent::Retrying { kind, block_number, hash, reason, delay } => {
            debug!(
                target: "retry",
                kind = kind.as_str(),
                block_number,
                hash = ?hash,
                %reason,
                ?delay,
                "Retrying RPC call"
            );
            inc!(counter, crate::Metrics::RPC_RETRIES, "kind" => kind.as_str());
        }
        IngestEvent::BlockDrained { block_number } => {
            debug!(target: "tracker", block_number, "Block drained");
            inc!(counter, crate::Metrics::BLOCKS_DRAINED);
        }
        IngestEvent::Progress(snapshot) => {
            info!(
                target: "pipeline",
                pending = snapshot.pending,
                fetching = snapshot.fetching,
                draining = snapshot.draining,
                drained = snapshot.drained,
                failed = snapshot.failed,
                txs_outstanding = snapshot.txs_outstanding,
                txs_included = snapshot.txs_included,
                txs_failed = snapshot.txs_failed,
                "Progress"
            );
            set!(gauge, crate::Metrics::BLOCKS_PENDING, snapshot.pending as f64);
            set!(gauge, crate::Metrics::BLOCKS_DRAINING, snapshot.draining as f64);
        }
        IngestEvent::RunComplete { outcome, snapshot } => {
            info!(
                target: "pipeline",
                %outcome,
                drained = snapshot.drained,
                failed = snapshot.failed,
                txs_included = snapshot.txs_included,
                txs_excluded = snapshot.txs_excluded,
                txs_failed = snapshot.txs_failed,
                sink_failures = snapshot.sink_failures,
                "Run finished"
            );
            set!(gauge, crate::Metrics::BLOCKS_PENDING, snapshot.pending as f64);
            set!(gauge, crate::Metrics::BLOCKS_DRAINING, snapshot.draining as f64);
        }
    }
}
