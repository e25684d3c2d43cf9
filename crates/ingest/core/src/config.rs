//! Configuration for an ingestion run.

use crate::{ConfigError, PendingRange, RetryPolicy};
use std::time::Duration;

/// Everything an [`crate::IngestPipeline`] needs to know before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// The blocks to ingest.
    pub range: PendingRange,
    /// Maximum block fetches outstanding at once.
    pub block_concurrency: usize,
    /// Maximum transaction fetches outstanding at once.
    pub tx_concurrency: usize,
    /// Capacity of the queue between the block and transaction schedulers. When it is full,
    /// block admission pauses.
    pub tx_queue_capacity: usize,
    /// Retry policy for both block and transaction fetches.
    pub retry: RetryPolicy,
    /// How long in-flight work may keep running after cancellation before it is abandoned.
    pub shutdown_grace: Duration,
    /// How often a progress snapshot is emitted.
    pub progress_interval: Duration,
}

impl IngestConfig {
    /// Default block fetch concurrency.
    pub const DEFAULT_BLOCK_CONCURRENCY: usize = 5;
    /// Default transaction fetch concurrency.
    pub const DEFAULT_TX_CONCURRENCY: usize = 50;
    /// Default transaction queue capacity.
    pub const DEFAULT_TX_QUEUE_CAPACITY: usize = 1024;

    /// Creates a configuration for `range` with default limits.
    pub fn new(range: PendingRange) -> Self {
        Self {
            range,
            block_concurrency: Self::DEFAULT_BLOCK_CONCURRENCY,
            tx_concurrency: Self::DEFAULT_TX_CONCURRENCY,
            tx_queue_capacity: Self::DEFAULT_TX_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
            shutdown_grace: Duration::from_secs(10),
            progress_interval: Duration::from_secs(10),
        }
    }

    /// Sets the block fetch concurrency.
    pub const fn with_block_concurrency(mut self, limit: usize) -> Self {
        self.block_concurrency = limit;
        self
    }

    /// Sets the transaction fetch concurrency.
    pub const fn with_tx_concurrency(mut self, limit: usize) -> Self {
        self.tx_concurrency = limit;
        self
    }

    /// Sets the transaction queue capacity.
    pub const fn with_tx_queue_capacity(mut self, capacity: usize) -> Self {
        self.tx_queue_capacity = capacity;
        self
    }

    /// Sets the retry policy.
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the cancellation grace period.
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the progress snapshot interval.
    pub const fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Rejects configurations that cannot run. The range invariant is enforced by
    /// [`PendingRange::new`].
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.block_concurrency == 0 {
            return Err(ConfigError::Zero("block concurrency"));
        }
        if self.tx_concurrency == 0 {
            return Err(ConfigError::Zero("transaction concurrency"));
        }
        if self.tx_queue_capacity == 0 {
            return Err(ConfigError::Zero("transaction queue capacity"));
        }
        if self.progress_interval.is_zero() {
            return Err(ConfigError::Zero("progress interval"));
        }
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config() -> IngestConfig {
        IngestConfig::new(PendingRange::new(0, 10).unwrap())
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[rstest]
    #[case(config().with_block_concurrency(0), "block concurrency")]
    #[case(config().with_tx_concurrency(0), "transaction concurrency")]
    #[case(config().with_tx_queue_capacity(0), "transaction queue capacity")]
    #[case(config().with_progress_interval(Duration::ZERO), "progress interval")]
    #[case(
        config().with_retry(RetryPolicy { max_attempts: 0, ..Default::default() }),
        "max retry attempts"
    )]
    fn test_zero_limits_are_rejected(#[case] config: IngestConfig, #[case] what: &'static str) {
        assert_eq!(config.validate(), Err(ConfigError::Zero(what)));
    }
}
