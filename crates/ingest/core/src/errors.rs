//! Error types for the ingestion pipeline.

use std::time::Duration;
use thiserror::Error;

/// An error returned by a [`crate::ChainProvider`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,
    /// The node refused the request because of rate limiting.
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {d:?})")).unwrap_or_default())]
    RateLimited {
        /// How long the node asked the caller to wait, if it said.
        retry_after: Option<Duration>,
    },
    /// The requested block or transaction does not exist.
    #[error("not found")]
    NotFound,
    /// The connection to the node failed.
    #[error("connection error: {0}")]
    Connection(String),
    /// The node answered with data that could not be interpreted.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Any other node error.
    #[error("{0}")]
    Other(String),
}

impl RpcError {
    /// Returns `true` for errors that may succeed when retried: timeouts, rate limits and
    /// connection errors.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited { .. } | Self::Connection(_))
    }

    /// The wait requested by the node, if this is a rate limit error carrying one.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// An error returned by a [`crate::ResultSink`].
#[derive(Error, Debug)]
pub enum SinkError {
    /// The sink is closed and accepts no more records.
    #[error("sink closed")]
    Closed,
    /// The sink did not accept the record in time.
    #[error("sink append timed out after {0:?}")]
    Timeout(Duration),
    /// Writing the record failed.
    #[error("sink io error: {0}")]
    Io(#[from] std::io::Error),
    /// Encoding the record failed.
    #[error("sink encoding error: {0}")]
    Encode(#[from] serde_json::Error),
    /// The sink rejected the record.
    #[error("sink rejected record: {0}")]
    Rejected(String),
}

/// A configuration error detected before the run starts.
///
/// These are the only run-fatal errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The range start lies after its end.
    #[error("invalid block range: start {start} is greater than end {end}")]
    InvalidRange {
        /// The requested start block.
        start: u64,
        /// The requested end block.
        end: u64,
    },
    /// A concurrency limit or capacity was zero.
    #[error("{0} must be at least 1")]
    Zero(&'static str),
    /// The backoff base delay exceeds the cap.
    #[error("backoff base delay {base:?} exceeds the maximum delay {max:?}")]
    InvalidBackoff {
        /// The base delay.
        base: Duration,
        /// The maximum delay.
        max: Duration,
    },
}

/// A rejected state transition in the [`crate::CompletionTracker`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// The block lies outside the tracked range.
    #[error("block {0} is outside the tracked range")]
    OutOfRange(u64),
    /// The block is not in a state that allows the transition.
    #[error("block {block} cannot move to {to} from {from}")]
    InvalidTransition {
        /// The block number.
        block: u64,
        /// The state the block was in.
        from: &'static str,
        /// The state that was requested.
        to: &'static str,
    },
    /// More transaction completions were reported than the block has transactions.
    #[error("block {block} already completed all {expected} transactions")]
    Overflow {
        /// The block number.
        block: u64,
        /// The number of transactions in the block.
        expected: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(RpcError::Timeout, true)]
    #[case(RpcError::RateLimited { retry_after: None }, true)]
    #[case(RpcError::Connection("reset".into()), true)]
    #[case(RpcError::NotFound, false)]
    #[case(RpcError::Malformed("bad hex".into()), false)]
    #[case(RpcError::Other("execution reverted".into()), false)]
    fn test_rpc_error_is_transient(#[case] err: RpcError, #[case] transient: bool) {
        assert_eq!(err.is_transient(), transient);
    }

    #[test]
    fn test_rate_limited_display() {
        let err = RpcError::RateLimited { retry_after: Some(Duration::from_secs(2)) };
        assert_eq!(err.to_string(), "rate limited (retry after 2s)");
        assert_eq!(RpcError::RateLimited { retry_after: None }.to_string(), "rate limited");
    }
}
