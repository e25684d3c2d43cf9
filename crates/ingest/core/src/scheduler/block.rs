//! Block admission and fetching.

use crate::{
    BlockFailure, BlockState, ChainProvider, CompletionTracker, EventEmitter, FetchKind,
    IngestEvent, PendingRange, RetryPolicy, TxWork,
    scheduler::{Admission, Slots},
};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    task::{Id, JoinError, JoinSet},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Admits the blocks of a range in ascending order, keeping at most `concurrency` block
/// fetches outstanding.
///
/// A block is admitted once a fetch slot is free. The slot is given up while the block waits
/// out a backoff. After a successful fetch the block keeps its slot until every one of its
/// hashes is in the transaction queue, so a full queue stalls admission instead of buffering
/// without bound.
#[derive(Debug)]
pub struct BlockScheduler<P> {
    range: PendingRange,
    slots: Slots,
    fetcher: BlockFetcher<P>,
}

#[derive(Debug)]
struct BlockFetcher<P> {
    provider: Arc<P>,
    tracker: Arc<CompletionTracker>,
    events: EventEmitter,
    retry: RetryPolicy,
    queue: async_channel::Sender<TxWork>,
    cancel: CancellationToken,
}

impl<P> Clone for BlockFetcher<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            tracker: self.tracker.clone(),
            events: self.events.clone(),
            retry: self.retry,
            queue: self.queue.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<P> BlockScheduler<P>
where
    P: ChainProvider + 'static,
{
    /// Creates a new [`BlockScheduler`] feeding `queue`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        range: PendingRange,
        concurrency: usize,
        provider: Arc<P>,
        tracker: Arc<CompletionTracker>,
        events: EventEmitter,
        retry: RetryPolicy,
        queue: async_channel::Sender<TxWork>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            range,
            slots: Slots::new(concurrency),
            fetcher: BlockFetcher { provider, tracker, events, retry, queue, cancel },
        }
    }

    /// Admits blocks until the range is exhausted or the run is cancelled, then waits for the
    /// admitted fetches to finish.
    ///
    /// The transaction queue closes once this returns and every admitted block has finished
    /// enqueueing.
    pub async fn run(self) {
        let Self { range, slots, fetcher } = self;
        info!(target: "block_scheduler", %range, slots = slots.available_calls(), "Started block scheduler");

        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<Id, u64> = HashMap::new();

        for block in range.iter() {
            let admission = tokio::select! {
                biased;
                _ = fetcher.cancel.cancelled() => {
                    info!(target: "block_scheduler", next = block.number, "Cancelled, no longer admitting blocks");
                    break;
                }
                admission = slots.admit_ready() => match admission {
                    Some(admission) => admission,
                    None => break,
                },
            };

            if let Err(err) = fetcher.tracker.block_fetch_started(block.number) {
                error!(target: "block_scheduler", %block, %err, "Could not admit block");
                break;
            }
            fetcher.events.emit(IngestEvent::BlockFetchStarted { block_number: block.number });

            let job = fetcher.clone();
            let id = tasks.spawn(job.fetch(block.number, admission)).id();
            in_flight.insert(id, block.number);

            while let Some(result) = tasks.try_join_next_with_id() {
                reap(&fetcher.tracker, &fetcher.events, result, &mut in_flight);
            }
        }

        // Only the spawned fetches may keep the queue open from here on.
        let BlockFetcher { tracker, events, queue, .. } = fetcher;
        drop(queue);
        while let Some(result) = tasks.join_next_with_id().await {
            reap(&tracker, &events, result, &mut in_flight);
        }
        debug!(target: "block_scheduler", "Block scheduler stopped");
    }
}

impl<P> BlockFetcher<P>
where
    P: ChainProvider + 'static,
{
    async fn fetch(self, number: u64, mut admission: Admission) {
        let started = Instant::now();
        let mut attempts = 0u32;

        let fetched = self
            .retry
            .run(
                || {
                    attempts += 1;
                    admission.attempt(self.provider.fetch_block(number))
                },
                |err, delay| {
                    self.events.emit(IngestEvent::Retrying {
                        kind: FetchKind::Block,
                        block_number: number,
                        hash: None,
                        reason: err.to_string(),
                        delay,
                    })
                },
            )
            .await;

        // The slot stays with the block until its hashes are queued.
        let (block, _slot) = match fetched {
            Ok(fetched) => fetched,
            Err(failure) => {
                let failure = BlockFailure {
                    block_number: number,
                    attempts: failure.attempts,
                    reason: failure.to_string(),
                };
                if let Err(err) = self.tracker.block_failed(failure.clone()) {
                    error!(target: "block_scheduler", block_number = number, %err, "Could not record failed block");
                }
                self.events.emit(IngestEvent::BlockFetchFailed(failure));
                return;
            }
        };

        self.events.emit(IngestEvent::BlockFetchSucceeded {
            block_number: number,
            tx_count: block.len(),
            attempts,
            elapsed: started.elapsed(),
        });

        // The counter must exist before the first hash can be picked up.
        match self.tracker.block_fetched(number, block.len()) {
            Ok(BlockState::Drained) => {
                self.events.emit(IngestEvent::BlockDrained { block_number: number });
                return;
            }
            Ok(_) => {}
            Err(err) => {
                error!(target: "block_scheduler", block_number = number, %err, "Could not register block");
                return;
            }
        }

        for hash in block.hashes {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(target: "block_scheduler", block_number = number, "Cancelled while enqueueing transactions");
                    return;
                }
                sent = self.queue.send(TxWork { block_number: number, hash }) => {
                    if sent.is_err() {
                        warn!(target: "block_scheduler", block_number = number, "Transaction queue closed");
                        return;
                    }
                }
            }
        }
    }
}

/// Records a block whose fetch task died without reporting as failed.
fn reap(
    tracker: &CompletionTracker,
    events: &EventEmitter,
    result: Result<(Id, ()), JoinError>,
    in_flight: &mut HashMap<Id, u64>,
) {
    match result {
        Ok((id, ())) => {
            in_flight.remove(&id);
        }
        Err(err) => {
            let Some(number) = in_flight.remove(&err.id()) else { return };
            if !err.is_panic() {
                return;
            }
            error!(target: "block_scheduler", block_number = number, %err, "Block fetch task panicked");
            if tracker.block_state(number) == Some(BlockState::Fetching) {
                let failure = BlockFailure {
                    block_number: number,
                    attempts: 0,
                    reason: format!("fetch task panicked: {err}"),
                };
                if tracker.block_failed(failure.clone()).is_ok() {
                    events.emit(IngestEvent::BlockFetchFailed(failure));
                }
            }
        }
    }
}
