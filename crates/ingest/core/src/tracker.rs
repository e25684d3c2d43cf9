//! The [`CompletionTracker`] is the single source of truth for whether a run is done.
//!
//! Every block of the range moves through
//!
//! ```text
//! Pending ─▶ Fetching ─▶ Draining(expected, completed) ─▶ Drained
//!                 │
//!                 └────▶ Failed
//! ```
//!
//! and the run is complete once no block is `Pending`, `Fetching` or `Draining`. Issuing every
//! submission is not enough: the tracker waits for every transaction completion.
//!
//! All state lives behind one mutex, so a completion increment and the `Draining -> Drained`
//! transition it may trigger happen atomically and a block can never be finalized twice.

use crate::{
    BlockFailure, FailureStage, PendingRange, RunOutcome, RunReport, TrackerError, TxFailure,
};
use derive_more::Display;
use serde::Serialize;
use std::{
    collections::{HashMap, HashSet},
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::watch;
use tracing::debug;

/// The lifecycle state of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum BlockState {
    /// Not yet admitted for fetching.
    #[display("pending")]
    Pending,
    /// The block fetch is in flight.
    #[display("fetching")]
    Fetching,
    /// The hash list is known and transactions are in flight.
    #[display("draining({completed}/{expected})")]
    Draining {
        /// Number of transactions in the block.
        expected: usize,
        /// Transactions accounted for so far.
        completed: usize,
    },
    /// Every transaction of the block was accounted for.
    #[display("drained")]
    Drained,
    /// The block fetch failed permanently.
    #[display("failed")]
    Failed,
}

impl BlockState {
    const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Draining { .. } => "draining",
            Self::Drained => "drained",
            Self::Failed => "failed",
        }
    }
}

/// Per block transaction accounting, alive from the moment the hash list is known until the
/// block is drained.
///
/// `0 <= completed <= expected` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCounter {
    /// The block number.
    pub block_number: u64,
    /// Number of transactions in the block.
    pub expected: usize,
    /// Transactions accounted for so far, including failures.
    pub completed: usize,
}

impl BlockCounter {
    /// Transactions still in flight.
    pub const fn outstanding(&self) -> usize {
        self.expected - self.completed
    }

    /// Returns `true` once every transaction is accounted for.
    pub const fn is_drained(&self) -> bool {
        self.completed == self.expected
    }
}

/// How one transaction task ended. Every variant counts toward its block's `completed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    /// The transaction passed the filter and was appended to the sink.
    Included,
    /// The transaction was fetched and filtered out.
    Excluded,
    /// The transaction could not be fetched or persisted.
    Failed(TxFailure),
}

/// A point in time view of run progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Blocks in the range.
    pub total_blocks: u64,
    /// Blocks not yet admitted.
    pub pending: u64,
    /// Blocks with a fetch in flight.
    pub fetching: u64,
    /// Blocks with transactions in flight.
    pub draining: u64,
    /// Blocks fully drained.
    pub drained: u64,
    /// Blocks whose fetch failed.
    pub failed: u64,
    /// Block counters created, one per successfully fetched block.
    pub blocks_registered: u64,
    /// Transaction hashes discovered in fetched blocks.
    pub txs_discovered: u64,
    /// Discovered transactions not yet accounted for.
    pub txs_outstanding: u64,
    /// Transactions appended to the sink.
    pub txs_included: u64,
    /// Transactions filtered out.
    pub txs_excluded: u64,
    /// Transactions whose fetch failed.
    pub txs_failed: u64,
    /// Records the sink refused.
    pub sink_failures: u64,
}

impl ProgressSnapshot {
    /// Returns `true` when every block is drained or failed.
    pub const fn is_complete(&self) -> bool {
        self.pending == 0 && self.fetching == 0 && self.draining == 0
    }
}

/// Mutable state of one run.
#[derive(Debug)]
struct RunState {
    range: PendingRange,
    /// Next block to admit. Blocks are admitted in ascending order, so everything at or above
    /// the cursor is `Pending`.
    cursor: u64,
    /// Blocks in `Fetching`; only their presence matters.
    fetching: HashSet<u64>,
    /// Block counters of blocks in `Draining`.
    counters: HashMap<u64, BlockCounter>,
    failed_set: HashSet<u64>,
    progress: ProgressSnapshot,
    failed_blocks: Vec<BlockFailure>,
    failed_transactions: Vec<TxFailure>,
}

impl RunState {
    fn state_of(&self, number: u64) -> BlockState {
        if number >= self.cursor {
            BlockState::Pending
        } else if self.fetching.contains(&number) {
            BlockState::Fetching
        } else if let Some(counter) = self.counters.get(&number) {
            BlockState::Draining { expected: counter.expected, completed: counter.completed }
        } else if self.failed_set.contains(&number) {
            BlockState::Failed
        } else {
            BlockState::Drained
        }
    }

    fn check_range(&self, number: u64) -> Result<(), TrackerError> {
        if self.range.contains(number) { Ok(()) } else { Err(TrackerError::OutOfRange(number)) }
    }

    fn refresh_counts(&mut self) {
        self.progress.pending = self.range.end() - self.cursor;
        self.progress.fetching = self.fetching.len() as u64;
        self.progress.draining = self.counters.len() as u64;
    }
}

/// Tracks every block of one run from admission to drained or failed.
#[derive(Debug)]
pub struct CompletionTracker {
    state: Mutex<RunState>,
    complete: watch::Sender<bool>,
}

impl CompletionTracker {
    /// Creates a tracker with every block of `range` pending. An empty range is complete
    /// immediately.
    pub fn new(range: PendingRange) -> Self {
        let progress = ProgressSnapshot {
            total_blocks: range.len(),
            pending: range.len(),
            ..Default::default()
        };
        let state = RunState {
            range,
            cursor: range.start(),
            fetching: HashSet::new(),
            counters: HashMap::new(),
            failed_set: HashSet::new(),
            progress,
            failed_blocks: Vec::new(),
            failed_transactions: Vec::new(),
        };
        let (complete, _) = watch::channel(range.is_empty());
        Self { state: Mutex::new(state), complete }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        // Critical sections never panic midway, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish_transition(&self, state: &mut RunState) {
        state.refresh_counts();
        if state.progress.is_complete() && !*self.complete.borrow() {
            debug!(target: "tracker", range = %state.range, "All blocks drained or failed");
            self.complete.send_replace(true);
        }
    }

    /// The tracked range.
    pub fn range(&self) -> PendingRange {
        self.lock().range
    }

    /// `Pending -> Fetching`. Blocks must be admitted in ascending order, each exactly once.
    pub fn block_fetch_started(&self, number: u64) -> Result<(), TrackerError> {
        let mut state = self.lock();
        state.check_range(number)?;
        if number != state.cursor {
            return Err(TrackerError::InvalidTransition {
                block: number,
                from: state.state_of(number).label(),
                to: "fetching",
            });
        }
        state.cursor += 1;
        state.fetching.insert(number);
        self.finish_transition(&mut state);
        Ok(())
    }

    /// `Fetching -> Draining`, creating the block's [`BlockCounter`] with `expected`
    /// transactions. A block without transactions moves straight to `Drained`.
    ///
    /// Returns the state the block ended up in.
    pub fn block_fetched(&self, number: u64, expected: usize) -> Result<BlockState, TrackerError> {
        let mut state = self.lock();
        state.check_range(number)?;
        if !state.fetching.remove(&number) {
            return Err(TrackerError::InvalidTransition {
                block: number,
                from: state.state_of(number).label(),
                to: "draining",
            });
        }

        state.progress.blocks_registered += 1;
        state.progress.txs_discovered += expected as u64;
        state.progress.txs_outstanding += expected as u64;

        let next = if expected == 0 {
            state.progress.drained += 1;
            BlockState::Drained
        } else {
            state
                .counters
                .insert(number, BlockCounter { block_number: number, expected, completed: 0 });
            BlockState::Draining { expected, completed: 0 }
        };
        self.finish_transition(&mut state);
        Ok(next)
    }

    /// `Fetching -> Failed`. The block takes no further part in transaction accounting.
    pub fn block_failed(&self, failure: BlockFailure) -> Result<(), TrackerError> {
        let mut state = self.lock();
        let number = failure.block_number;
        state.check_range(number)?;
        if !state.fetching.remove(&number) {
            return Err(TrackerError::InvalidTransition {
                block: number,
                from: state.state_of(number).label(),
                to: "failed",
            });
        }
        state.failed_set.insert(number);
        state.failed_blocks.push(failure);
        state.progress.failed += 1;
        self.finish_transition(&mut state);
        Ok(())
    }

    /// Accounts for one transaction of a draining block. When the last one lands the block
    /// becomes `Drained`, atomically with the increment.
    ///
    /// Returns the state the block ended up in.
    pub fn tx_completed(
        &self,
        number: u64,
        outcome: TxOutcome,
    ) -> Result<BlockState, TrackerError> {
        let mut state = self.lock();
        state.check_range(number)?;
        let Some(counter) = state.counters.get_mut(&number) else {
            return Err(TrackerError::InvalidTransition {
                block: number,
                from: state.state_of(number).label(),
                to: "draining",
            });
        };
        if counter.is_drained() {
            return Err(TrackerError::Overflow { block: number, expected: counter.expected });
        }
        counter.completed += 1;
        let counter = *counter;

        state.progress.txs_outstanding -= 1;
        match outcome {
            TxOutcome::Included => state.progress.txs_included += 1,
            TxOutcome::Excluded => state.progress.txs_excluded += 1,
            TxOutcome::Failed(failure) => {
                match failure.stage {
                    FailureStage::Fetch => state.progress.txs_failed += 1,
                    FailureStage::Sink => state.progress.sink_failures += 1,
                }
                state.failed_transactions.push(failure);
            }
        }

        let next = if counter.is_drained() {
            state.counters.remove(&number);
            state.progress.drained += 1;
            BlockState::Drained
        } else {
            BlockState::Draining { expected: counter.expected, completed: counter.completed }
        };
        self.finish_transition(&mut state);
        Ok(next)
    }

    /// The state of `number`, or `None` if it lies outside the range.
    pub fn block_state(&self, number: u64) -> Option<BlockState> {
        let state = self.lock();
        state.range.contains(number).then(|| state.state_of(number))
    }

    /// The counter of a draining block.
    pub fn counter(&self, number: u64) -> Option<BlockCounter> {
        self.lock().counters.get(&number).copied()
    }

    /// A non-blocking view of the current progress.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.lock().progress
    }

    /// Returns `true` once every block is drained or failed.
    pub fn is_complete(&self) -> bool {
        *self.complete.borrow()
    }

    /// Resolves once every block is drained or failed.
    pub async fn wait_complete(&self) {
        let mut rx = self.complete.subscribe();
        // The sender lives as long as `self`, so this only returns once the flag is set.
        let _ = rx.wait_for(|complete| *complete).await;
    }

    /// Builds the run report from the current state.
    pub fn report(&self, outcome: RunOutcome, elapsed: Duration) -> RunReport {
        let state = self.lock();
        let progress = state.progress;
        RunReport {
            range: state.range,
            outcome,
            blocks_drained: progress.drained,
            blocks_failed: progress.failed,
            blocks_unfinished: progress.total_blocks - progress.drained - progress.failed,
            txs_included: progress.txs_included,
            txs_excluded: progress.txs_excluded,
            txs_failed: progress.txs_failed,
            sink_failures: progress.sink_failures,
            failed_blocks: state.failed_blocks.clone(),
            failed_transactions: state.failed_transactions.clone(),
            elapsed,
        }
    }
}
