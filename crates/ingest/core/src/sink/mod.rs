//! [`crate::ResultSink`] implementations.

mod memory;
pub use memory::MemorySink;

mod channel;
pub use channel::{ChannelSink, RecordWriter, SinkWriterHandle};

mod json;
pub use json::JsonLinesWriter;
