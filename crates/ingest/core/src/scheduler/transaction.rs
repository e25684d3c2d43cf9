//! Transaction fetching, filtering and persistence.

use crate::{
    BlockState, ChainProvider, CompletionTracker, EventEmitter, FailureStage, FetchKind,
    IngestEvent, ResultSink, RetryPolicy, TxFailure, TxFilter, TxOutcome, TxWork,
    scheduler::{Admission, Slots},
};
use std::{collections::HashMap, sync::Arc};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Drains the transaction queue with at most `concurrency` fetches outstanding.
///
/// Each hash is fetched with retry, run through the filter, appended to the sink if kept, and
/// then reported to the [`CompletionTracker`] exactly once. A fetch slot is only held for the
/// length of one attempt.
#[derive(Debug)]
pub struct TransactionScheduler<P, S> {
    slots: Slots,
    queue: async_channel::Receiver<TxWork>,
    processor: TxProcessor<P, S>,
}

#[derive(Debug)]
struct TxProcessor<P, S> {
    provider: Arc<P>,
    sink: Arc<S>,
    filter: Arc<dyn TxFilter>,
    tracker: Arc<CompletionTracker>,
    events: EventEmitter,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<P, S> Clone for TxProcessor<P, S> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            sink: self.sink.clone(),
            filter: self.filter.clone(),
            tracker: self.tracker.clone(),
            events: self.events.clone(),
            retry: self.retry,
            cancel: self.cancel.clone(),
        }
    }
}

impl<P, S> TransactionScheduler<P, S>
where
    P: ChainProvider + 'static,
    S: ResultSink + 'static,
{
    /// Creates a new [`TransactionScheduler`] reading from `queue`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        concurrency: usize,
        provider: Arc<P>,
        sink: Arc<S>,
        filter: Arc<dyn TxFilter>,
        tracker: Arc<CompletionTracker>,
        events: EventEmitter,
        retry: RetryPolicy,
        queue: async_channel::Receiver<TxWork>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            slots: Slots::new(concurrency),
            queue,
            processor: TxProcessor { provider, sink, filter, tracker, events, retry, cancel },
        }
    }

    /// Dispatches queued hashes until the queue is closed and empty or the run is cancelled,
    /// then waits for the dispatched fetches to finish.
    pub async fn run(self) {
        let Self { slots, queue, processor } = self;
        info!(target: "tx_scheduler", slots = slots.available_calls(), "Started transaction scheduler");

        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<Id, TxWork> = HashMap::new();

        loop {
            // Admit before taking a hash, so nothing is held outside the queue while saturated.
            let admission = tokio::select! {
                biased;
                _ = processor.cancel.cancelled() => break,
                admission = slots.admit() => match admission {
                    Some(admission) => admission,
                    None => break,
                },
            };
            let work = tokio::select! {
                biased;
                _ = processor.cancel.cancelled() => break,
                work = queue.recv() => match work {
                    Ok(work) => work,
                    // Closed and empty.
                    Err(_) => break,
                },
            };

            let job = processor.clone();
            let id = tasks.spawn(job.process(work, admission)).id();
            in_flight.insert(id, work);

            while let Some(result) = tasks.try_join_next_with_id() {
                reap(&processor, result, &mut in_flight);
            }
        }

        if processor.cancel.is_cancelled() {
            info!(target: "tx_scheduler", in_flight = in_flight.len(), queued = queue.len(), "Cancelled, no longer dispatching transactions");
        }
        // Unblocks block fetches still waiting to enqueue.
        queue.close();

        while let Some(result) = tasks.join_next_with_id().await {
            reap(&processor, result, &mut in_flight);
        }
        debug!(target: "tx_scheduler", "Transaction scheduler stopped");
    }
}

impl<P, S> TxProcessor<P, S>
where
    P: ChainProvider + 'static,
    S: ResultSink + 'static,
{
    async fn process(self, work: TxWork, mut admission: Admission) {
        let TxWork { block_number, hash } = work;
        self.events.emit(IngestEvent::TxFetchStarted { block_number, hash });

        let mut attempts = 0u32;
        let fetched = self
            .retry
            .run(
                || {
                    attempts += 1;
                    admission.attempt(self.provider.fetch_transaction(hash))
                },
                |err, delay| {
                    self.events.emit(IngestEvent::Retrying {
                        kind: FetchKind::Transaction,
                        block_number,
                        hash: Some(hash),
                        reason: err.to_string(),
                        delay,
                    })
                },
            )
            .await;

        // The sink append does not take a fetch slot.
        let fetched = fetched.map(|(tx, _slot)| tx);
        let outcome = match fetched {
            Err(failure) => {
                let failure = TxFailure {
                    block_number,
                    hash,
                    stage: FailureStage::Fetch,
                    attempts: failure.attempts,
                    reason: failure.to_string(),
                };
                self.events.emit(IngestEvent::TxFetchFailed(failure.clone()));
                TxOutcome::Failed(failure)
            }
            Ok(tx) => match self.filter.filter(&tx) {
                None => {
                    self.events.emit(IngestEvent::TxFetchSucceeded {
                        block_number,
                        hash,
                        included: false,
                    });
                    TxOutcome::Excluded
                }
                Some(record) => {
                    self.events.emit(IngestEvent::TxFetchSucceeded {
                        block_number,
                        hash,
                        included: true,
                    });
                    match self.sink.append(record).await {
                        Ok(()) => TxOutcome::Included,
                        Err(err) => {
                            let failure = TxFailure {
                                block_number,
                                hash,
                                stage: FailureStage::Sink,
                                attempts,
                                reason: err.to_string(),
                            };
                            self.events.emit(IngestEvent::SinkFailed(failure.clone()));
                            TxOutcome::Failed(failure)
                        }
                    }
                }
            },
        };

        self.complete(block_number, outcome);
    }

    fn complete(&self, block_number: u64, outcome: TxOutcome) {
        match self.tracker.tx_completed(block_number, outcome) {
            Ok(BlockState::Drained) => {
                self.events.emit(IngestEvent::BlockDrained { block_number });
            }
            Ok(_) => {}
            Err(err) => {
                error!(target: "tx_scheduler", block_number, %err, "Could not account for transaction");
            }
        }
    }
}

/// Accounts for a transaction whose task died before reporting.
fn reap<P, S>(
    processor: &TxProcessor<P, S>,
    result: Result<(Id, ()), JoinError>,
    in_flight: &mut HashMap<Id, TxWork>,
) where
    P: ChainProvider + 'static,
    S: ResultSink + 'static,
{
    match result {
        Ok((id, ())) => {
            in_flight.remove(&id);
        }
        Err(err) => {
            let Some(work) = in_flight.remove(&err.id()) else { return };
            if !err.is_panic() {
                return;
            }
            error!(target: "tx_scheduler", block_number = work.block_number, hash = %work.hash, %err, "Transaction task panicked");
            let failure = TxFailure {
                block_number: work.block_number,
                hash: work.hash,
                stage: FailureStage::Fetch,
                attempts: 0,
                reason: format!("fetch task panicked: {err}"),
            };
            processor.events.emit(IngestEvent::TxFetchFailed(failure.clone()));
            processor.complete(work.block_number, TxOutcome::Failed(failure));
        }
    }
}
