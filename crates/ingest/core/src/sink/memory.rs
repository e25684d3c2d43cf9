use crate::{FilteredRecord, ResultSink, SinkError};
use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

/// Keeps every appended record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<FilteredRecord>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every record appended so far, in arrival order.
    pub fn records(&self) -> Vec<FilteredRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of records appended so far.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing was appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn append(&self, record: FilteredRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).push(record);
        Ok(())
    }
}
