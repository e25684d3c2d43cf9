//! The two bounded fetch stages.

use crate::{RpcError, TxHash};
use std::{future::Future, sync::Arc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

mod block;
pub use block::BlockScheduler;

mod transaction;
pub use transaction::TransactionScheduler;

/// A transaction hash queued for fetching, tagged with its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxWork {
    /// The block the hash was discovered in.
    pub block_number: u64,
    /// The transaction hash.
    pub hash: TxHash,
}

/// Items a stage may hold per call slot, counting those waiting out a backoff.
const WINDOW_PER_CALL: usize = 4;

/// Concurrency slots of one fetch stage.
///
/// A call slot is held for exactly one attempt against the node and released before any
/// backoff sleep. The admission window bounds how many items the stage holds at once, so a
/// node that keeps rate limiting cannot make admission run ahead of completion.
#[derive(Debug, Clone)]
pub(crate) struct Slots {
    calls: Arc<Semaphore>,
    window: Arc<Semaphore>,
}

impl Slots {
    pub(crate) fn new(concurrency: usize) -> Self {
        Self {
            calls: Arc::new(Semaphore::new(concurrency)),
            window: Arc::new(Semaphore::new(concurrency.saturating_mul(WINDOW_PER_CALL))),
        }
    }

    pub(crate) fn available_calls(&self) -> usize {
        self.calls.available_permits()
    }

    /// Waits for room in the admission window.
    pub(crate) async fn admit(&self) -> Option<Admission> {
        let window = self.window.clone().acquire_owned().await.ok()?;
        Some(Admission { _window: window, first_call: None, calls: self.calls.clone() })
    }

    /// Waits for room in the admission window and then for a free call slot, which the first
    /// attempt uses.
    pub(crate) async fn admit_ready(&self) -> Option<Admission> {
        let mut admission = self.admit().await?;
        admission.first_call = Some(self.calls.clone().acquire_owned().await.ok()?);
        Some(admission)
    }
}

/// An item admitted to a stage. Dropping it leaves the window.
#[derive(Debug)]
pub(crate) struct Admission {
    _window: OwnedSemaphorePermit,
    first_call: Option<OwnedSemaphorePermit>,
    calls: Arc<Semaphore>,
}

impl Admission {
    /// Runs one attempt of `call` inside a call slot.
    ///
    /// On success the slot is handed back with the value so the caller can keep it. On failure
    /// it is released with the error, before the retry policy sleeps.
    pub(crate) fn attempt<Fut, T>(
        &mut self,
        call: Fut,
    ) -> impl Future<Output = Result<(T, OwnedSemaphorePermit), RpcError>> + use<Fut, T>
    where
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let held = self.first_call.take();
        let calls = self.calls.clone();
        async move {
            let slot = match held {
                Some(slot) => slot,
                None => calls
                    .acquire_owned()
                    .await
                    .map_err(|_| RpcError::Other("fetch slots closed".to_string()))?,
            };
            call.await.map(|value| (value, slot))
        }
    }
}
