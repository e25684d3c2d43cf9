//! Wires the schedulers, tracker and sink into one run.

use crate::{
    BlockScheduler, ChainProvider, CompletionTracker, ConfigError, EventEmitter, IngestConfig,
    IngestEvent, ResultSink, RunOutcome, RunReport, TransactionScheduler, TxFilter,
    ValueTransferFilter,
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::broadcast,
    task::JoinSet,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One ingestion run over a [`crate::PendingRange`].
///
/// [`IngestPipeline::run`] resolves once every block in the range is drained or has failed, or
/// once the run is cancelled through [`IngestPipeline::cancellation_token`]. On cancellation no
/// further blocks are admitted and in-flight work gets [`IngestConfig::shutdown_grace`] to
/// finish before it is abandoned.
#[derive(Debug)]
pub struct IngestPipeline<P, S> {
    config: IngestConfig,
    provider: Arc<P>,
    sink: Arc<S>,
    filter: Arc<dyn TxFilter>,
    tracker: Arc<CompletionTracker>,
    events: EventEmitter,
    cancel: CancellationToken,
}

impl<P, S> IngestPipeline<P, S>
where
    P: ChainProvider + 'static,
    S: ResultSink + 'static,
{
    /// Creates a pipeline using the [`ValueTransferFilter`], rejecting invalid configurations.
    pub fn new(config: IngestConfig, provider: Arc<P>, sink: Arc<S>) -> Result<Self, ConfigError> {
        config.validate()?;
        let tracker = Arc::new(CompletionTracker::new(config.range));
        Ok(Self {
            config,
            provider,
            sink,
            filter: Arc::new(ValueTransferFilter),
            tracker,
            events: EventEmitter::default(),
            cancel: CancellationToken::new(),
        })
    }

    /// Replaces the transaction filter.
    pub fn with_filter(mut self, filter: Arc<dyn TxFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// Runs under `cancel` instead of a private token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Subscribes to the run's [`IngestEvent`]s. Subscribe before calling [`Self::run`] to see
    /// every event.
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.events.subscribe()
    }

    /// The tracker of this run, for progress queries while it runs.
    pub fn tracker(&self) -> Arc<CompletionTracker> {
        self.tracker.clone()
    }

    /// The token that cancels this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs to completion or cancellation and returns the report.
    pub async fn run(self) -> RunReport {
        let started = Instant::now();
        let Self { config, provider, sink, filter, tracker, events, cancel } = self;
        info!(
            target: "pipeline",
            range = %config.range,
            block_concurrency = config.block_concurrency,
            tx_concurrency = config.tx_concurrency,
            tx_queue_capacity = config.tx_queue_capacity,
            "Starting ingestion"
        );

        let (queue_tx, queue_rx) = async_channel::bounded(config.tx_queue_capacity);
        let blocks = BlockScheduler::new(
            config.range,
            config.block_concurrency,
            provider.clone(),
            tracker.clone(),
            events.clone(),
            config.retry,
            queue_tx,
            cancel.clone(),
        );
        let transactions = TransactionScheduler::new(
            config.tx_concurrency,
            provider,
            sink,
            filter,
            tracker.clone(),
            events.clone(),
            config.retry,
            queue_rx,
            cancel.clone(),
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(blocks.run());
        tasks.spawn(transactions.run());
        tasks.spawn(report_progress(
            tracker.clone(),
            events.clone(),
            config.progress_interval,
            cancel.clone(),
        ));

        let outcome = tokio::select! {
            biased;
            _ = tracker.wait_complete() => RunOutcome::Complete,
            _ = cancel.cancelled() => RunOutcome::Cancelled,
        };

        if outcome == RunOutcome::Cancelled {
            info!(target: "pipeline", grace = ?config.shutdown_grace, "Cancelled, waiting for in-flight work");
        }
        let drain = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(config.shutdown_grace, drain).await.is_err() {
            warn!(target: "pipeline", "Grace period elapsed, abandoning in-flight work");
            tasks.shutdown().await;
        }

        events.emit(IngestEvent::RunComplete { outcome, snapshot: tracker.snapshot() });
        tracker.report(outcome, started.elapsed())
    }
}

async fn report_progress(
    tracker: Arc<CompletionTracker>,
    events: EventEmitter,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tracker.wait_complete() => break,
            _ = ticker.tick() => events.emit(IngestEvent::Progress(tracker.snapshot())),
        }
    }
}
