//! Record sinks
//!
//! `JsonLinesSink` writes one JSON object per record; `MemorySink` keeps
//! everything in memory, grouped by source.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::{FieldMap, Record, Sink, SinkError, SourceRef};

/// One output line
#[derive(Serialize)]
struct JsonLine<'a> {
    source: &'a SourceRef,
    rule: &'a str,
    fields: &'a FieldMap,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Writes `{"source", "rule", "fields"}` lines to a file or stdout
///
/// All records of one document are written under a single lock, so they stay
/// contiguous in the output even with many workers.
pub struct JsonLinesSink {
    name: String,
    writer: Mutex<BoxedWriter>,
}

impl JsonLinesSink {
    /// Create (or truncate) `path`
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create output directory {parent:?}"))?;
        }
        let file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create output file {path:?}"))?;
        info!("📝 Writing records to {:?}", path);
        Ok(Self::from_writer(path.display().to_string(), BufWriter::new(file)))
    }

    pub fn stdout() -> Self {
        Self::from_writer("stdout", BufWriter::new(tokio::io::stdout()))
    }

    pub fn from_writer(
        name: impl Into<String>,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(Box::new(writer)),
        }
    }

    fn encode(source: &SourceRef, records: &[Record]) -> Result<Vec<u8>, serde_json::Error> {
        let mut buffer = Vec::new();
        for record in records {
            let line = JsonLine {
                source,
                rule: &record.rule,
                fields: &record.fields,
            };
            serde_json::to_writer(&mut buffer, &line)?;
            buffer.push(b'\n');
        }
        Ok(buffer)
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    async fn emit(&self, source: &SourceRef, records: Vec<Record>) -> Result<(), SinkError> {
        let buffer = Self::encode(source, &records).map_err(|e| SinkError::new(&self.name, e))?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&buffer)
            .await
            .map_err(|e| SinkError::new(&self.name, e))?;
        debug!("Wrote {} records for {}", records.len(), source);
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.writer
            .lock()
            .await
            .flush()
            .await
            .map_err(|e| SinkError::new(&self.name, e))
    }
}

/// Keeps emitted records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<BTreeMap<SourceRef, Vec<Record>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records emitted for one source, in emit order
    pub async fn records_for(&self, source: &SourceRef) -> Vec<Record> {
        self.batches
            .lock()
            .await
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Every record, grouped by source in source order
    pub async fn all_records(&self) -> Vec<Record> {
        self.batches
            .lock()
            .await
            .values()
            .flat_map(|records| records.iter().cloned())
            .collect()
    }

    /// Sources that received at least one record
    pub async fn sources(&self) -> Vec<SourceRef> {
        self.batches.lock().await.keys().cloned().collect()
    }

    pub async fn record_count(&self) -> usize {
        self.batches.lock().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn emit(&self, source: &SourceRef, records: Vec<Record>) -> Result<(), SinkError> {
        self.batches
            .lock()
            .await
            .entry(source.clone())
            .or_default()
            .extend(records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FieldValue;

    fn record(rule: &str, title: &str) -> Record {
        let mut fields = FieldMap::new();
        fields.insert("title".into(), FieldValue::Text(title.into()));
        fields.insert("tags".into(), FieldValue::List(vec!["a".into(), "b".into()]));
        fields.insert("price".into(), FieldValue::Null);
        Record::new(rule, fields)
    }

    #[tokio::test]
    async fn json_lines_are_written_one_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("records.jsonl");
        let sink = JsonLinesSink::create(&path).await.unwrap();

        let source = SourceRef::new("https://example.com/p/1");
        sink.emit(&source, vec![record("product", "One"), record("product", "Two")])
            .await
            .unwrap();
        sink.flush().await.unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["source"], "https://example.com/p/1");
        assert_eq!(lines[0]["rule"], "product");
        assert_eq!(lines[0]["fields"]["title"], "One");
        assert_eq!(lines[1]["fields"]["tags"], serde_json::json!(["a", "b"]));
        assert!(lines[1]["fields"]["price"].is_null());
    }

    #[tokio::test]
    async fn memory_sink_groups_by_source() {
        let sink = MemorySink::new();
        let a = SourceRef::new("a");
        let b = SourceRef::new("b");
        sink.emit(&b, vec![record("r", "b1")]).await.unwrap();
        sink.emit(&a, vec![record("r", "a1"), record("r", "a2")])
            .await
            .unwrap();

        assert_eq!(sink.record_count().await, 3);
        assert_eq!(sink.records_for(&a).await.len(), 2);
        assert!(sink.records_for(&SourceRef::new("c")).await.is_empty());
        assert_eq!(sink.sources().await, vec![a, b]);
        assert_eq!(sink.all_records().await[0].text("title"), Some("a1"));
    }
}
