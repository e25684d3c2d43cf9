//! A channel-fed sink with a single writer.

use crate::{FilteredRecord, ResultSink, SinkError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error};

/// Synchronous, append-only record writer driven by a [`ChannelSink`].
pub trait RecordWriter: Send + 'static {
    /// Writes one record.
    fn write(&mut self, record: &FilteredRecord) -> Result<(), SinkError>;

    /// Flushes buffered records.
    fn flush(&mut self) -> Result<(), SinkError>;
}

#[derive(Debug)]
struct WriteRequest {
    record: FilteredRecord,
    /// Signalled when the writer takes the record. Closed once the appender has timed out.
    claim: oneshot::Sender<()>,
    ack: oneshot::Sender<Result<(), SinkError>>,
}

/// A [`ResultSink`] that hands records to one dedicated writer thread over a bounded channel.
///
/// Concurrent appends are serialized by the channel, so the writer never sees concurrent
/// writes. Each append waits for the writer's acknowledgement, so a write error is reported
/// against the record that caused it.
///
/// `append_timeout` bounds how long an append waits for the writer to take its record. A
/// record that timed out is never written, so a [`SinkError::Timeout`] always means the record
/// is absent from the output. Once taken, the append waits for the write to finish.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<WriteRequest>,
    append_timeout: Duration,
}

/// Handle to the writer behind a [`ChannelSink`].
#[derive(Debug)]
pub struct SinkWriterHandle {
    handle: JoinHandle<Result<u64, SinkError>>,
}

impl SinkWriterHandle {
    /// Waits for the writer to drain and flush, returning the number of records written.
    ///
    /// The writer stops once every [`ChannelSink`] clone has been dropped.
    pub async fn finish(self) -> Result<u64, SinkError> {
        self.handle.await.map_err(|err| SinkError::Io(std::io::Error::other(err)))?
    }
}

impl ChannelSink {
    /// Spawns `writer` on the blocking pool and returns the sink feeding it.
    pub fn spawn<W: RecordWriter>(
        mut writer: W,
        capacity: usize,
        append_timeout: Duration,
    ) -> (Self, SinkWriterHandle) {
        let (tx, mut rx) = mpsc::channel::<WriteRequest>(capacity.max(1));

        let handle = tokio::task::spawn_blocking(move || {
            let mut written = 0u64;
            while let Some(WriteRequest { record, claim, ack }) = rx.blocking_recv() {
                if claim.send(()).is_err() {
                    debug!(target: "sink", hash = %record.hash, "Skipping record abandoned by its appender");
                    continue;
                }
                let result = writer.write(&record);
                match &result {
                    Ok(()) => written += 1,
                    Err(err) => error!(target: "sink", hash = %record.hash, %err, "Write failed"),
                }
                // The appender may have been dropped mid-write.
                let _ = ack.send(result);
            }
            writer.flush()?;
            debug!(target: "sink", written, "Writer drained");
            Ok(written)
        });

        (Self { tx, append_timeout }, SinkWriterHandle { handle })
    }
}

#[async_trait]
impl ResultSink for ChannelSink {
    async fn append(&self, record: FilteredRecord) -> Result<(), SinkError> {
        let (claim, mut claim_rx) = oneshot::channel();
        let (ack, ack_rx) = oneshot::channel();
        let request = WriteRequest { record, claim, ack };

        let claimed = tokio::time::timeout(self.append_timeout, async {
            self.tx.send(request).await.map_err(|_| SinkError::Closed)?;
            (&mut claim_rx).await.map_err(|_| SinkError::Closed)
        })
        .await;

        match claimed {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                // The writer may have taken the record just as the timeout fired.
                claim_rx.close();
                if claim_rx.try_recv().is_err() {
                    return Err(SinkError::Timeout(self.append_timeout));
                }
            }
        }
        ack_rx.await.map_err(|_| SinkError::Closed)?
    }
}
