//! Bounded exponential backoff for RPC calls.

use crate::{ConfigError, RpcError};
use backon::{ExponentialBuilder, Retryable};
use std::{future::Future, time::Duration};

/// Retry policy applied to every block and transaction fetch.
///
/// The `n`th retry waits `base_delay * 2^n`, capped at `max_delay`, optionally jittered. Only
/// transient errors are retried, and a rate limit hint from the node raises the next delay to
/// the requested wait (still capped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per item, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Adds random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// The final error of a retried call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure {
    /// How many attempts were made.
    pub attempts: u32,
    /// The error of the last attempt.
    pub error: RpcError,
}

impl RetryFailure {
    /// Returns `true` if the call kept failing transiently until attempts ran out, as opposed
    /// to failing permanently.
    pub const fn is_exhausted(&self) -> bool {
        self.error.is_transient()
    }
}

impl std::fmt::Display for RetryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_exhausted() {
            write!(f, "{} (gave up after {} attempts)", self.error, self.attempts)
        } else {
            write!(f, "{} (permanent)", self.error)
        }
    }
}

impl RetryPolicy {
    /// Checks the policy for values that cannot work.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Zero("max retry attempts"));
        }
        if self.base_delay.as_nanos() > self.max_delay.as_nanos() {
            return Err(ConfigError::InvalidBackoff { base: self.base_delay, max: self.max_delay });
        }
        Ok(())
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize);
        if self.jitter { builder.with_jitter() } else { builder }
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `on_retry` is called before every backoff sleep with the error that triggered it and the
    /// delay about to be slept.
    pub async fn run<T, F, Fut, N>(&self, mut op: F, mut on_retry: N) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
        N: FnMut(&RpcError, Duration),
    {
        let max_delay = self.max_delay;
        let mut attempts = 0u32;

        let result = (|| {
            attempts += 1;
            op()
        })
        .retry(self.backoff())
        .when(RpcError::is_transient)
        .adjust(move |err, delay| {
            delay.map(|delay| {
                err.retry_after().map_or(delay, |hint| hint.max(delay).min(max_delay))
            })
        })
        .notify(|err, delay| on_retry(err, delay))
        .await;

        result.map_err(|error| RetryFailure { attempts, error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChainProvider, MockChainProvider, TxRecord};
    use alloy_primitives::{Address, B256, Bytes, U256};
    use mockall::Sequence;
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(10),
            jitter: false,
        }
    }

    fn record(hash: B256) -> TxRecord {
        TxRecord {
            hash,
            value: U256::from(1),
            data: Bytes::new(),
            from: Address::ZERO,
            to: None,
            nonce: 0,
        }
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert_eq!(policy(0).validate(), Err(ConfigError::Zero("max retry attempts")));

        let inverted = RetryPolicy { base_delay: Duration::from_secs(60), ..policy(3) };
        assert!(matches!(inverted.validate(), Err(ConfigError::InvalidBackoff { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_succeeds() {
        let mut provider = MockChainProvider::new();
        let mut seq = Sequence::new();
        provider
            .expect_fetch_transaction()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(RpcError::RateLimited { retry_after: None }));
        provider
            .expect_fetch_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|hash| Ok(record(hash)));

        let mut retries = 0;
        let hash = B256::repeat_byte(1);
        let tx = policy(3)
            .run(|| provider.fetch_transaction(hash), |_, _| retries += 1)
            .await
            .unwrap();

        assert_eq!(tx.hash, hash);
        assert_eq!(retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_exhaust_attempts() {
        let mut provider = MockChainProvider::new();
        provider.expect_fetch_block().times(3).returning(|_| Err(RpcError::Timeout));

        let failure =
            policy(3).run(|| provider.fetch_block(102), |_, _| {}).await.unwrap_err();

        assert_eq!(failure, RetryFailure { attempts: 3, error: RpcError::Timeout });
        assert!(failure.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let mut provider = MockChainProvider::new();
        provider.expect_fetch_block().times(1).returning(|_| Err(RpcError::NotFound));

        let failure =
            policy(5).run(|| provider.fetch_block(7), |_, _| {}).await.unwrap_err();

        assert_eq!(failure.attempts, 1);
        assert!(!failure.is_exhausted());
        assert_eq!(failure.to_string(), "not found (permanent)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy_never_retries() {
        let mut provider = MockChainProvider::new();
        provider
            .expect_fetch_block()
            .times(1)
            .returning(|_| Err(RpcError::Connection("reset".into())));

        let failure =
            policy(1).run(|| provider.fetch_block(1), |_, _| {}).await.unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert!(failure.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_stretches_delay() {
        let mut provider = MockChainProvider::new();
        let mut seq = Sequence::new();
        provider
            .expect_fetch_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(RpcError::RateLimited { retry_after: Some(Duration::from_secs(5)) })
            });
        provider
            .expect_fetch_transaction()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|hash| Ok(record(hash)));

        let mut delays = Vec::new();
        let start = Instant::now();
        policy(3)
            .run(|| provider.fetch_transaction(B256::ZERO), |_, delay| delays.push(delay))
            .await
            .unwrap();

        assert_eq!(delays, vec![Duration::from_secs(5)]);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_capped() {
        let mut provider = MockChainProvider::new();
        provider
            .expect_fetch_block()
            .times(2)
            .returning(|_| {
                Err(RpcError::RateLimited { retry_after: Some(Duration::from_secs(600)) })
            });

        let mut delays = Vec::new();
        let failure = policy(2)
            .run(|| provider.fetch_block(1), |_, delay| delays.push(delay))
            .await
            .unwrap_err();

        assert_eq!(failure.attempts, 2);
        assert_eq!(delays, vec![Duration::from_secs(10)]);
    }
}
