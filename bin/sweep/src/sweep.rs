//! Runs one sweep: provider, pipeline and output wired together.

use anyhow::Context;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{info, warn};
use txsweep_core::{ChannelSink, IngestConfig, IngestPipeline, JsonLinesWriter, RunReport};
use txsweep_providers_alloy::AlloyChainProvider;
use url::Url;

/// Records buffered between the pipeline and the output writer.
const SINK_CAPACITY: usize = 1024;

/// How long an append may wait on the output writer.
const SINK_APPEND_TIMEOUT: Duration = Duration::from_secs(30);

/// A configured sweep.
#[derive(Debug)]
pub(crate) struct Sweep {
    pub(crate) config: IngestConfig,
    pub(crate) rpc_url: Url,
    pub(crate) request_timeout: Duration,
    pub(crate) output: PathBuf,
    pub(crate) report: Option<PathBuf>,
}

impl Sweep {
    /// Runs until the range is done or Ctrl-C is pressed.
    pub(crate) async fn run(self) -> anyhow::Result<()> {
        let range = self.config.range;
        let writer = JsonLinesWriter::create(&self.output)
            .with_context(|| format!("opening {}", self.output.display()))?;
        let (sink, writer_handle) = ChannelSink::spawn(writer, SINK_CAPACITY, SINK_APPEND_TIMEOUT);

        let provider =
            Arc::new(AlloyChainProvider::new_http(self.rpc_url.clone(), self.request_timeout));
        let pipeline = IngestPipeline::new(self.config, provider, Arc::new(sink))?;

        let cancel = pipeline.cancellation_token();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(target: "sweep", "Received Ctrl-C, shutting down");
                cancel.cancel();
            }
        });

        info!(
            target: "sweep",
            rpc_url = %self.rpc_url,
            %range,
            output = %self.output.display(),
            "Sweeping blocks"
        );
        let report = pipeline.run().await;
        ctrl_c.abort();

        let written = writer_handle.finish().await.context("flushing output")?;
        log_summary(&report, written);

        if let Some(path) = &self.report {
            write_report(path, &report)?;
            info!(target: "sweep", path = %path.display(), "Wrote run report");
        }
        Ok(())
    }
}

fn log_summary(report: &RunReport, written: u64) {
    info!(
        target: "sweep",
        outcome = %report.outcome,
        blocks_drained = report.blocks_drained,
        blocks_failed = report.blocks_failed,
        blocks_unfinished = report.blocks_unfinished,
        txs_included = report.txs_included,
        txs_excluded = report.txs_excluded,
        txs_failed = report.txs_failed,
        sink_failures = report.sink_failures,
        written,
        elapsed = ?report.elapsed,
        "Sweep finished"
    );
    if !report.failed_blocks.is_empty() {
        warn!(target: "sweep", blocks = ?report.failed_block_numbers(), "Blocks failed");
    }
    if !report.failed_transactions.is_empty() {
        warn!(target: "sweep", hashes = ?report.failed_tx_hashes(), "Transactions failed");
    }
}

/// Writes `report` as pretty JSON, creating parent directories.
fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use txsweep_core::{BlockFailure, PendingRange, RunOutcome};

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");
        let report = RunReport {
            range: PendingRange::new(1, 4).unwrap(),
            outcome: RunOutcome::Cancelled,
            blocks_drained: 1,
            blocks_failed: 1,
            blocks_unfinished: 1,
            txs_included: 3,
            txs_excluded: 0,
            txs_failed: 0,
            sink_failures: 0,
            failed_blocks: vec![BlockFailure {
                block_number: 2,
                attempts: 5,
                reason: "not found (permanent)".into(),
            }],
            failed_transactions: vec![],
            elapsed: Duration::from_secs(2),
        };

        write_report(&path, &report).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["outcome"], "cancelled");
        assert_eq!(json["blocks_unfinished"], 1);
        assert_eq!(json["failed_blocks"][0]["block_number"], 2);
    }
}
