//! JSON lines output.

use crate::{FilteredRecord, RecordWriter, SinkError};
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesWriter<W: Write> {
    inner: BufWriter<W>,
}

impl<W: Write> JsonLinesWriter<W> {
    /// Wraps `inner` in a buffered JSON lines writer.
    pub fn new(inner: W) -> Self {
        Self { inner: BufWriter::new(inner) }
    }

    /// Flushes and returns the underlying writer.
    pub fn into_inner(self) -> Result<W, SinkError> {
        self.inner.into_inner().map_err(|err| SinkError::Io(err.into_error()))
    }
}

impl JsonLinesWriter<File> {
    /// Opens `path` for appending, creating it and its parent directories if needed.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send + 'static> RecordWriter for JsonLinesWriter<W> {
    fn write(&mut self, record: &FilteredRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.inner, record)?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, Bytes};

    fn record(byte: u8, to: Option<Address>) -> FilteredRecord {
        FilteredRecord {
            hash: B256::repeat_byte(byte),
            data: Bytes::from(vec![byte; 4]),
            from: Address::repeat_byte(byte),
            to,
            nonce: byte as u64,
        }
    }

    #[test]
    fn test_writes_one_object_per_line() {
        let mut writer = JsonLinesWriter::new(Vec::new());
        let first = record(1, Some(Address::repeat_byte(9)));
        let second = record(2, None);
        writer.write(&first).unwrap();
        writer.write(&second).unwrap();

        let bytes = writer.into_inner().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let decoded: FilteredRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(decoded, first);
        let decoded: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert!(decoded["to"].is_null());
        assert_eq!(decoded["data"], "0x02020202");
    }

    #[test]
    fn test_create_appends_and_makes_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output").join("transactions.jsonl");

        let mut writer = JsonLinesWriter::create(&path).unwrap();
        writer.write(&record(1, None)).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut writer = JsonLinesWriter::create(&path).unwrap();
        writer.write(&record(2, None)).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
