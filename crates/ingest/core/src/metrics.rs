//! Metrics for the ingestion pipeline.

/// Container for the metric names recorded by the pipeline.
///
/// Recording only happens with the `metrics` feature enabled; call [`Metrics::init`] once at
/// startup so every series is described and exported from zero.
#[derive(Debug, Clone, Copy)]
pub struct Metrics;

impl Metrics {
    /// Counter of successful block fetches.
    pub const BLOCK_FETCH_SUCCESS: &'static str = "txsweep_block_fetch_success_total";
    /// Counter of block fetches that failed permanently.
    pub const BLOCK_FETCH_FAILED: &'static str = "txsweep_block_fetch_failed_total";
    /// Counter of blocks whose transactions were all accounted for.
    pub const BLOCKS_DRAINED: &'static str = "txsweep_blocks_drained_total";
    /// Gauge of block fetches in flight.
    pub const BLOCKS_IN_FLIGHT: &'static str = "txsweep_blocks_in_flight";
    /// Gauge of blocks not yet admitted.
    pub const BLOCKS_PENDING: &'static str = "txsweep_blocks_pending";
    /// Gauge of blocks with transactions in flight.
    pub const BLOCKS_DRAINING: &'static str = "txsweep_blocks_draining";
    /// Histogram of block fetch latency, retries included.
    pub const BLOCK_FETCH_DURATION: &'static str = "txsweep_block_fetch_duration_seconds";
    /// Counter of successful transaction fetches.
    pub const TX_FETCH_SUCCESS: &'static str = "txsweep_tx_fetch_success_total";
    /// Counter of transaction fetches that failed permanently.
    pub const TX_FETCH_FAILED: &'static str = "txsweep_tx_fetch_failed_total";
    /// Counter of transactions that passed the filter.
    pub const TX_INCLUDED: &'static str = "txsweep_tx_included_total";
    /// Gauge of transaction fetches in flight.
    pub const TX_IN_FLIGHT: &'static str = "txsweep_tx_in_flight";
    /// Counter of records the sink refused.
    pub const SINK_FAILURES: &'static str = "txsweep_sink_failures_total";
    /// Counter of RPC retries, labeled by `kind`.
    pub const RPC_RETRIES: &'static str = "txsweep_rpc_retries_total";

    /// Describes and zeroes every metric.
    pub fn init() {
        #[cfg(feature = "metrics")]
        {
            Self::describe();
            Self::zero();
        }
    }

    #[cfg(feature = "metrics")]
    fn describe() {
        use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

        describe_counter!(Self::BLOCK_FETCH_SUCCESS, Unit::Count, "Successful block fetches");
        describe_counter!(
            Self::BLOCK_FETCH_FAILED,
            Unit::Count,
            "Block fetches that failed permanently or ran out of attempts"
        );
        describe_counter!(
            Self::BLOCKS_DRAINED,
            Unit::Count,
            "Blocks whose transactions were all accounted for"
        );
        describe_gauge!(Self::BLOCKS_IN_FLIGHT, Unit::Count, "Block fetches in flight");
        describe_gauge!(Self::BLOCKS_PENDING, Unit::Count, "Blocks not yet admitted");
        describe_gauge!(Self::BLOCKS_DRAINING, Unit::Count, "Blocks with transactions in flight");
        describe_histogram!(
            Self::BLOCK_FETCH_DURATION,
            Unit::Seconds,
            "Block fetch latency including retries"
        );
        describe_counter!(Self::TX_FETCH_SUCCESS, Unit::Count, "Successful transaction fetches");
        describe_counter!(
            Self::TX_FETCH_FAILED,
            Unit::Count,
            "Transaction fetches that failed permanently or ran out of attempts"
        );
        describe_counter!(Self::TX_INCLUDED, Unit::Count, "Transactions that passed the filter");
        describe_gauge!(Self::TX_IN_FLIGHT, Unit::Count, "Transaction fetches in flight");
        describe_counter!(Self::SINK_FAILURES, Unit::Count, "Records the sink refused");
        describe_counter!(Self::RPC_RETRIES, Unit::Count, "RPC calls retried after an error");
    }

    #[cfg(feature = "metrics")]
    fn zero() {
        metrics::counter!(Self::BLOCK_FETCH_SUCCESS).absolute(0);
        metrics::counter!(Self::BLOCK_FETCH_FAILED).absolute(0);
        metrics::counter!(Self::BLOCKS_DRAINED).absolute(0);
        metrics::gauge!(Self::BLOCKS_IN_FLIGHT).set(0.0);
        metrics::gauge!(Self::BLOCKS_PENDING).set(0.0);
        metrics::gauge!(Self::BLOCKS_DRAINING).set(0.0);
        metrics::counter!(Self::TX_FETCH_SUCCESS).absolute(0);
        metrics::counter!(Self::TX_FETCH_FAILED).absolute(0);
        metrics::counter!(Self::TX_INCLUDED).absolute(0);
        metrics::gauge!(Self::TX_IN_FLIGHT).set(0.0);
        metrics::counter!(Self::SINK_FAILURES).absolute(0);
        metrics::counter!(Self::RPC_RETRIES, "kind" => "block").absolute(0);
        metrics::counter!(Self::RPC_RETRIES, "kind" => "transaction").absolute(0);
    }
}
