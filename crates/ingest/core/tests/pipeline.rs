//! End to end runs of the ingestion pipeline against a scripted chain.

use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use txsweep_core::{
    BlockState, ChannelSink, ConfigError, FilteredRecord, IngestConfig, IngestEvent,
    IngestPipeline, JsonLinesWriter, MemorySink, PendingRange, RetryPolicy, RpcError, RunOutcome,
    test_utils::{RejectingSink, ScriptedProvider, tx_hash, tx_record},
};

fn retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(1),
        jitter: false,
    }
}

fn config(start: u64, end: u64) -> IngestConfig {
    IngestConfig::new(PendingRange::new(start, end).unwrap())
        .with_block_concurrency(2)
        .with_tx_concurrency(4)
        .with_tx_queue_capacity(8)
        .with_retry(retry(3))
}

#[tokio::test(start_paused = true)]
async fn test_mixed_range_reports_every_block() {
    let provider = ScriptedProvider::new()
        .with_block(100, vec![tx_record(1, 5), tx_record(2, 0)])
        .fail_block_always(102, RpcError::Timeout);
    let provider = Arc::new(provider);
    let sink = Arc::new(MemorySink::new());

    let pipeline = IngestPipeline::new(config(100, 103), provider.clone(), sink.clone()).unwrap();
    let tracker = pipeline.tracker();
    let report = pipeline.run().await;

    assert_eq!(report.outcome, RunOutcome::Complete);
    assert_eq!(report.blocks_drained, 2);
    assert_eq!(report.blocks_failed, 1);
    assert_eq!(report.blocks_unfinished, 0);
    assert_eq!(report.txs_included, 1);
    assert_eq!(report.txs_excluded, 1);
    assert_eq!(report.failed_block_numbers(), vec![102]);
    assert_eq!(report.failed_blocks[0].attempts, 3);

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hash, tx_hash(1));
    assert_eq!(records[0].nonce, 1);

    assert_eq!(tracker.block_state(100), Some(BlockState::Drained));
    assert_eq!(tracker.block_state(101), Some(BlockState::Drained));
    assert_eq!(tracker.block_state(102), Some(BlockState::Failed));
    assert_eq!(provider.block_calls(102), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limits_hold() {
    let mut provider = ScriptedProvider::new().with_delay(Duration::from_millis(50));
    for block in 0..20u64 {
        let txs = (0..6).map(|i| tx_record(block * 100 + i, i)).collect();
        provider = provider.with_block(block, txs);
    }
    let provider = Arc::new(provider);
    let sink = Arc::new(MemorySink::new());

    let config = config(0, 20).with_block_concurrency(3).with_tx_concurrency(5);
    let pipeline = IngestPipeline::new(config, provider.clone(), sink.clone()).unwrap();
    let tracker = pipeline.tracker();
    let report = pipeline.run().await;

    assert!(report.is_lossless());
    assert_eq!(report.blocks_drained, 20);
    assert_eq!(tracker.snapshot().blocks_registered, 20);
    assert_eq!(tracker.snapshot().txs_outstanding, 0);
    assert_eq!(report.txs_included + report.txs_excluded, 120);
    // Value 0 is excluded, so five of every six transactions are kept.
    assert_eq!(sink.len(), 100);
    assert!(provider.max_blocks_in_flight() <= 3);
    assert!(provider.max_txs_in_flight() <= 5);
    assert!(provider.max_txs_in_flight() > 1);
}

#[tokio::test(start_paused = true)]
async fn test_full_queue_pauses_block_admission() {
    let mut provider = ScriptedProvider::new().with_delay(Duration::from_millis(50));
    for block in 0..30u64 {
        let txs = (0..3).map(|i| tx_record(block * 10 + i, 1)).collect();
        provider = provider.with_block(block, txs);
    }
    let provider = Arc::new(provider);
    let sink = Arc::new(MemorySink::new());

    let config =
        config(0, 30).with_block_concurrency(2).with_tx_concurrency(1).with_tx_queue_capacity(1);
    let pipeline = IngestPipeline::new(config, provider.clone(), sink.clone()).unwrap();
    let tracker = pipeline.tracker();
    let run = tokio::spawn(pipeline.run());

    // Blocks fetching or enqueueing hold one of the 2 block slots, and every other unfinished
    // block has a hash in the queue or in one of the 4 admitted transaction tasks.
    let bound = 2 + 1 + 4;
    let mut pending_after_one_second = None;
    for tick in 1..=100u32 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = tracker.snapshot();
        assert!(
            snapshot.fetching + snapshot.draining <= bound,
            "{} blocks in flight at tick {tick}",
            snapshot.fetching + snapshot.draining
        );
        if tick == 10 {
            pending_after_one_second = Some(snapshot.pending);
        }
        if tracker.is_complete() {
            break;
        }
    }

    // Unthrottled, two block slots would admit all 30 blocks in well under a second.
    assert!(pending_after_one_second.unwrap() >= 10);

    let report = run.await.unwrap();
    assert!(report.is_lossless());
    assert_eq!(report.blocks_drained, 30);
    assert_eq!(sink.len(), 90);
    assert_eq!(provider.max_txs_in_flight(), 1);
    assert!(provider.max_blocks_in_flight() <= 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_transaction_is_retried() {
    let provider = ScriptedProvider::new()
        .with_block(1, vec![tx_record(10, 1)])
        .fail_tx(tx_hash(10), 2, RpcError::RateLimited { retry_after: None });
    let provider = Arc::new(provider);
    let sink = Arc::new(MemorySink::new());

    let pipeline = IngestPipeline::new(config(1, 2), provider.clone(), sink.clone()).unwrap();
    let mut events = pipeline.subscribe();
    let report = pipeline.run().await;

    assert!(report.is_lossless());
    assert_eq!(provider.tx_calls(tx_hash(10)), 3);
    assert_eq!(sink.len(), 1);

    let mut retries = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, IngestEvent::Retrying { hash: Some(_), .. }) {
            retries += 1;
        }
    }
    assert_eq!(retries, 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_transaction_still_drains_block() {
    let provider = ScriptedProvider::new()
        .with_block(5, vec![tx_record(1, 1), tx_record(2, 1)])
        .fail_tx_always(tx_hash(2), RpcError::Timeout);
    let sink = Arc::new(MemorySink::new());

    let pipeline = IngestPipeline::new(config(5, 6), Arc::new(provider), sink.clone()).unwrap();
    let tracker = pipeline.tracker();
    let report = pipeline.run().await;

    assert!(report.is_complete());
    assert!(!report.is_lossless());
    assert_eq!(report.txs_failed, 1);
    assert_eq!(report.failed_tx_hashes(), vec![tx_hash(2)]);
    assert_eq!(report.failed_transactions[0].attempts, 3);
    assert_eq!(tracker.block_state(5), Some(BlockState::Drained));
    assert_eq!(sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_transaction_fails_without_retry() {
    let provider = ScriptedProvider::new().with_block_hashes(3, vec![tx_hash(77)]);
    let provider = Arc::new(provider);
    let sink = Arc::new(MemorySink::new());

    let report = IngestPipeline::new(config(3, 4), provider.clone(), sink).unwrap().run().await;

    assert_eq!(report.txs_failed, 1);
    assert_eq!(report.blocks_drained, 1);
    assert_eq!(provider.tx_calls(tx_hash(77)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_is_reported() {
    let provider = ScriptedProvider::new().with_block(8, vec![tx_record(1, 1), tx_record(2, 1)]);
    let sink = Arc::new(RejectingSink::new([tx_hash(2)]));

    let pipeline = IngestPipeline::new(config(8, 9), Arc::new(provider), sink.clone()).unwrap();
    let report = pipeline.run().await;

    assert!(report.is_complete());
    assert_eq!(report.txs_included, 1);
    assert_eq!(report.sink_failures, 1);
    assert_eq!(report.txs_failed, 0);
    assert_eq!(report.failed_tx_hashes(), vec![tx_hash(2)]);
    assert_eq!(sink.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_range_completes_immediately() {
    let provider = Arc::new(ScriptedProvider::new());
    let report = IngestPipeline::new(config(50, 50), provider.clone(), Arc::new(MemorySink::new()))
        .unwrap()
        .run()
        .await;

    assert!(report.is_lossless());
    assert_eq!(report.blocks_drained, 0);
    assert_eq!(provider.block_calls(50), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_admission() {
    let mut provider = ScriptedProvider::new().with_delay(Duration::from_secs(1));
    for block in 0..1000u64 {
        provider = provider.with_block(block, vec![tx_record(block, 1)]);
    }
    let provider = Arc::new(provider);
    let cancel = CancellationToken::new();

    let config = config(0, 1000).with_shutdown_grace(Duration::from_secs(5));
    let pipeline = IngestPipeline::new(config, provider.clone(), Arc::new(MemorySink::new()))
        .unwrap()
        .with_cancellation(cancel.clone());
    let tracker = pipeline.tracker();

    let run = tokio::spawn(pipeline.run());
    tokio::time::sleep(Duration::from_millis(5500)).await;
    cancel.cancel();
    let report = run.await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert!(report.blocks_unfinished > 0);
    assert!(report.blocks_drained < 1000);
    assert_eq!(
        report.blocks_drained + report.blocks_failed + report.blocks_unfinished,
        1000
    );
    assert!(tracker.block_state(999) == Some(BlockState::Pending));
    assert_eq!(provider.block_calls(999), 0);
}

#[tokio::test(start_paused = true)]
async fn test_progress_and_completion_events() {
    let mut provider = ScriptedProvider::new().with_delay(Duration::from_millis(400));
    for block in 0..10u64 {
        provider = provider.with_block(block, vec![tx_record(block, 1)]);
    }
    let config = config(0, 10).with_progress_interval(Duration::from_millis(500));
    let pipeline =
        IngestPipeline::new(config, Arc::new(provider), Arc::new(MemorySink::new())).unwrap();
    let mut events = pipeline.subscribe();
    pipeline.run().await;

    let mut progress = 0;
    let mut drained = 0;
    let mut complete = None;
    while let Ok(event) = events.try_recv() {
        match event {
            IngestEvent::Progress(_) => progress += 1,
            IngestEvent::BlockDrained { .. } => drained += 1,
            IngestEvent::RunComplete { outcome, snapshot } => complete = Some((outcome, snapshot)),
            _ => {}
        }
    }
    assert!(progress > 0);
    assert_eq!(drained, 10);
    let (outcome, snapshot) = complete.unwrap();
    assert_eq!(outcome, RunOutcome::Complete);
    assert!(snapshot.is_complete());
    assert_eq!(snapshot.txs_included, 10);
}

#[test]
fn test_invalid_config_is_rejected() {
    let provider = Arc::new(ScriptedProvider::new());
    let sink = Arc::new(MemorySink::new());

    let no_blocks = config(0, 10).with_block_concurrency(0);
    let err = IngestPipeline::new(no_blocks, provider.clone(), sink.clone()).unwrap_err();
    assert_eq!(err, ConfigError::Zero("block concurrency"));

    let no_txs = config(0, 10).with_tx_concurrency(0);
    let err = IngestPipeline::new(no_txs, provider, sink).unwrap_err();
    assert_eq!(err, ConfigError::Zero("transaction concurrency"));

    assert_eq!(PendingRange::new(10, 5), Err(ConfigError::InvalidRange { start: 10, end: 5 }));
}

#[tokio::test]
async fn test_json_lines_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("transactions.jsonl");

    let provider = ScriptedProvider::new()
        .with_block(1, vec![tx_record(1, 1), tx_record(2, 0)])
        .with_block(2, vec![tx_record(3, 9)]);
    let writer = JsonLinesWriter::create(&path).unwrap();
    let (sink, handle) = ChannelSink::spawn(writer, 16, Duration::from_secs(5));

    let report =
        IngestPipeline::new(config(1, 3), Arc::new(provider), Arc::new(sink)).unwrap().run().await;
    assert!(report.is_lossless());
    assert_eq!(handle.finish().await.unwrap(), 2);

    let text = std::fs::read_to_string(&path).unwrap();
    let mut hashes: Vec<_> = text
        .lines()
        .map(|line| serde_json::from_str::<FilteredRecord>(line).unwrap().hash)
        .collect();
    hashes.sort();
    let mut expected = vec![tx_hash(1), tx_hash(3)];
    expected.sort();
    assert_eq!(hashes, expected);
}
