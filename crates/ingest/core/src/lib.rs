#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/txsweep/txsweep/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod types;
pub use types::{BlockRef, BlockTxHashes, FilteredRecord, PendingRange, TxHash, TxRecord};

mod errors;
pub use errors::{ConfigError, RpcError, SinkError, TrackerError};

mod filter;
pub use filter::{TxFilter, ValueTransferFilter};

mod traits;
#[cfg(test)]
pub use traits::MockChainProvider;
pub use traits::{ChainProvider, ResultSink};

mod retry;
pub use retry::{RetryFailure, RetryPolicy};

mod report;
pub use report::{BlockFailure, FailureStage, RunOutcome, RunReport, TxFailure};

mod tracker;
pub use tracker::{BlockCounter, BlockState, CompletionTracker, ProgressSnapshot, TxOutcome};

mod config;
pub use config::IngestConfig;

mod metrics;
pub use metrics::Metrics;

mod events;
pub use events::{EventEmitter, FetchKind, IngestEvent};

mod sink;
pub use sink::{ChannelSink, JsonLinesWriter, MemorySink, RecordWriter, SinkWriterHandle};

mod scheduler;
pub use scheduler::{BlockScheduler, TransactionScheduler, TxWork};

mod pipeline;
pub use pipeline::IngestPipeline;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
