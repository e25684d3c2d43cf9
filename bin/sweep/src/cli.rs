//! Contains the sweep CLI.

use crate::sweep::Sweep;
use clap::{ArgAction, Parser};
use std::{path::PathBuf, time::Duration};
use txsweep_cli::{MetricsArgs, cli_styles, init_tracing_subscriber};
use txsweep_core::{IngestConfig, PendingRange, RetryPolicy};
use url::Url;

/// The sweep CLI.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, styles = cli_styles(), long_about = None)]
pub(crate) struct Cli {
    /// Verbosity level (0-2)
    #[arg(long, short, action = ArgAction::Count, global = true)]
    pub v: u8,
    /// JSON-RPC endpoint of the node to read from.
    #[arg(long, env = "TXSWEEP_RPC_URL", default_value = "https://eth.llamarpc.com")]
    pub rpc_url: Url,
    /// First block of the range.
    #[arg(long, env = "TXSWEEP_START", default_value_t = 12_000_000)]
    pub start: u64,
    /// One past the last block of the range.
    #[arg(long, env = "TXSWEEP_END", default_value_t = 14_000_000)]
    pub end: u64,
    /// Maximum block fetches in flight.
    #[arg(
        long,
        visible_alias = "routines",
        env = "TXSWEEP_BLOCK_CONCURRENCY",
        default_value_t = IngestConfig::DEFAULT_BLOCK_CONCURRENCY
    )]
    pub block_concurrency: usize,
    /// Maximum transaction fetches in flight.
    #[arg(long, env = "TXSWEEP_TX_CONCURRENCY", default_value_t = IngestConfig::DEFAULT_TX_CONCURRENCY)]
    pub tx_concurrency: usize,
    /// Transaction hashes buffered between the two stages.
    #[arg(long, env = "TXSWEEP_QUEUE_CAPACITY", default_value_t = IngestConfig::DEFAULT_TX_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
    /// Attempts per block or transaction, the first one included.
    #[arg(long, env = "TXSWEEP_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[arg(long, env = "TXSWEEP_BACKOFF_BASE_MS", default_value_t = 500)]
    pub backoff_base_ms: u64,
    /// Upper bound on any retry delay, in milliseconds.
    #[arg(long, env = "TXSWEEP_BACKOFF_MAX_MS", default_value_t = 30_000)]
    pub backoff_max_ms: u64,
    /// Timeout of a single RPC request, in seconds.
    #[arg(long, env = "TXSWEEP_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,
    /// How long in-flight work may finish after Ctrl-C, in seconds.
    #[arg(long, env = "TXSWEEP_SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,
    /// How often progress is logged, in seconds.
    #[arg(long, env = "TXSWEEP_PROGRESS_INTERVAL_SECS", default_value_t = 10)]
    pub progress_interval_secs: u64,
    /// JSON lines file the matching transactions are appended to.
    #[arg(long, env = "TXSWEEP_OUTPUT", default_value = "./output/transactions.jsonl")]
    pub output: PathBuf,
    /// Optional path the JSON run report is written to.
    #[arg(long, env = "TXSWEEP_REPORT")]
    pub report: Option<PathBuf>,
    /// Prometheus CLI arguments.
    #[command(flatten)]
    pub metrics: MetricsArgs,
}

impl Cli {
    /// Builds the ingestion config from the flags.
    pub(crate) fn ingest_config(&self) -> anyhow::Result<IngestConfig> {
        let range = PendingRange::new(self.start, self.end)?;
        let retry = RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            jitter: true,
        };
        let config = IngestConfig::new(range)
            .with_block_concurrency(self.block_concurrency)
            .with_tx_concurrency(self.tx_concurrency)
            .with_tx_queue_capacity(self.queue_capacity)
            .with_retry(retry)
            .with_shutdown_grace(Duration::from_secs(self.shutdown_grace_secs))
            .with_progress_interval(Duration::from_secs(self.progress_interval_secs));
        config.validate()?;
        Ok(config)
    }

    /// Runs the sweep.
    pub(crate) async fn run(self) -> anyhow::Result<()> {
        init_tracing_subscriber(self.v, None)?;
        self.metrics.init_metrics()?;
        txsweep_core::Metrics::init();

        let config = self.ingest_config()?;
        Sweep {
            config,
            rpc_url: self.rpc_url,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            output: self.output,
            report: self.report,
        }
        .run()
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use txsweep_core::ConfigError;

    #[test]
    fn test_defaults_match_the_original_tool() {
        let cli = Cli::try_parse_from(["txsweep"]).unwrap();
        assert_eq!(cli.rpc_url.as_str(), "https://eth.llamarpc.com/");
        assert_eq!((cli.start, cli.end), (12_000_000, 14_000_000));
        assert_eq!(cli.block_concurrency, 5);
        assert_eq!(cli.output, PathBuf::from("./output/transactions.jsonl"));
        assert!(cli.report.is_none());
        assert!(!cli.metrics.enabled);
    }

    #[test]
    fn test_routines_alias() {
        let cli = Cli::try_parse_from(["txsweep", "--routines", "12"]).unwrap();
        assert_eq!(cli.block_concurrency, 12);
    }

    #[test]
    fn test_ingest_config() {
        let cli = Cli::try_parse_from([
            "txsweep",
            "--start",
            "100",
            "--end",
            "103",
            "--tx-concurrency",
            "8",
            "--max-attempts",
            "3",
            "--backoff-base-ms",
            "50",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.v, 2);

        let config = cli.ingest_config().unwrap();
        assert_eq!(config.range, PendingRange::new(100, 103).unwrap());
        assert_eq!(config.tx_concurrency, 8);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(50));
    }

    #[rstest]
    #[case(&["txsweep", "--start", "10", "--end", "5"], ConfigError::InvalidRange { start: 10, end: 5 })]
    #[case(&["txsweep", "--block-concurrency", "0"], ConfigError::Zero("block concurrency"))]
    #[case(&["txsweep", "--queue-capacity", "0"], ConfigError::Zero("transaction queue capacity"))]
    #[case(&["txsweep", "--max-attempts", "0"], ConfigError::Zero("max retry attempts"))]
    fn test_invalid_flags_are_rejected(#[case] args: &[&str], #[case] expected: ConfigError) {
        let cli = Cli::try_parse_from(args).unwrap();
        let err = cli.ingest_config().unwrap_err();
        assert_eq!(err.downcast_ref::<ConfigError>(), Some(&expected));
    }
}
