//! Result buffering, batching and persistence of fetched records.

use anyhow::Result;
use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::{EntityKey, ExtractionMode, ResultRecord, WorkItem};
use crate::storage::{timestamp_name, Storage};

/// Records delivered by fetch tasks, shared between the tasks and the accumulator
#[derive(Debug, Clone, Default)]
pub struct ResultBuffer {
    records: Arc<Mutex<Vec<ResultRecord>>>,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, record: ResultRecord) {
        self.records.lock().await.push(record);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn take_all(&self) -> Vec<ResultRecord> {
        std::mem::take(&mut *self.records.lock().await)
    }

    /// Put records back at the front, ahead of anything delivered since they were taken
    pub async fn restore(&self, batch: Vec<ResultRecord>) {
        let mut records = self.records.lock().await;
        let newer = std::mem::replace(&mut *records, batch);
        records.extend(newer);
    }
}

/// Cuts the shared buffer into flush-sized batches
#[derive(Debug, Clone)]
pub struct BatchAccumulator {
    buffer: ResultBuffer,
    threshold: usize,
}

impl BatchAccumulator {
    pub fn new(threshold: usize) -> Self {
        Self {
            buffer: ResultBuffer::new(),
            threshold: threshold.max(1),
        }
    }

    /// Handle given to fetch tasks
    pub fn buffer(&self) -> ResultBuffer {
        self.buffer.clone()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub async fn accept(&self, record: ResultRecord) {
        self.buffer.push(record).await;
    }

    pub async fn ready(&self) -> bool {
        self.buffer.len().await >= self.threshold
    }

    /// Exactly `threshold` records, or `None` if fewer are buffered
    pub async fn take_batch(&self) -> Option<Vec<ResultRecord>> {
        let mut records = self.buffer.records.lock().await;
        if records.len() < self.threshold {
            return None;
        }
        Some(records.drain(..self.threshold).collect())
    }

    pub async fn take_all(&self) -> Vec<ResultRecord> {
        self.buffer.take_all().await
    }

    pub async fn restore(&self, batch: Vec<ResultRecord>) {
        self.buffer.restore(batch).await;
    }

    pub async fn pending(&self) -> usize {
        self.buffer.len().await
    }
}

impl ResultRecord {
    /// Rows this record contributes to its mode's artifact.
    ///
    /// Entity placeholders still yield a key-only row so the key reads as completed;
    /// calendar placeholders yield nothing.
    pub fn into_rows(self, processing_date: NaiveDate) -> Vec<Value> {
        match self.item {
            WorkItem::CalendarWindow(_) => match self.payload {
                Some(Value::Array(rows)) => rows,
                _ => Vec::new(),
            },
            WorkItem::EntityProfile(symbol) => {
                let first = match self.payload {
                    Some(Value::Array(rows)) => rows.into_iter().next(),
                    _ => None,
                };
                vec![first.unwrap_or_else(|| json!({ "symbol": symbol }))]
            }
            WorkItem::EntityHistory { symbol, date } => match self.payload {
                Some(Value::Object(fields)) => flatten_history(&symbol, date, processing_date, fields),
                _ => vec![json!({ "symbol": symbol, "date": date.to_string() })],
            },
        }
    }
}

/// Flatten a history payload into one row per list entry.
///
/// Each row carries the payload's scalar fields, the origin `symbol`, the earnings `date` the
/// request was anchored on, `data_process`, and the entry's columns prefixed `<field>_`.
pub fn flatten_history(
    symbol: &str,
    date: NaiveDate,
    processing_date: NaiveDate,
    fields: Map<String, Value>,
) -> Vec<Value> {
    let mut base = Map::new();
    base.insert("data_process".to_string(), json!(processing_date.to_string()));

    let mut lists = Vec::new();
    for (field, value) in fields {
        match value {
            Value::Array(entries) => lists.push((field, entries)),
            scalar => {
                base.insert(field, scalar);
            }
        }
    }
    base.insert("symbol".to_string(), json!(symbol));
    base.insert("date".to_string(), json!(date.to_string()));

    let mut rows = Vec::new();
    for (field, entries) in lists {
        for entry in entries {
            let mut row = base.clone();
            match entry {
                Value::Object(columns) => {
                    for (column, value) in columns {
                        row.insert(format!("{}_{}", field, column), value);
                    }
                }
                other => {
                    row.insert(field.clone(), other);
                }
            }
            rows.push(Value::Object(row));
        }
    }

    if rows.is_empty() {
        rows.push(Value::Object(base));
    }
    rows
}

/// Calendar artifacts are named after the next watermark, entity artifacts by timestamp
pub fn artifact_name(mode: ExtractionMode, batch: &[ResultRecord]) -> String {
    if mode == ExtractionMode::EarningCalendar {
        let latest_end = batch
            .iter()
            .filter_map(|record| match &record.item {
                WorkItem::CalendarWindow(window) => Some(window.end_date),
                _ => None,
            })
            .max();
        if let Some(end) = latest_end {
            return end.to_string();
        }
    }
    timestamp_name()
}

/// Outcome of a successful flush
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReceipt {
    pub artifact: String,
    pub records: usize,
    pub rows: usize,
    /// Entity keys now durable in the artifact, placeholders included
    pub keys: Vec<EntityKey>,
}

/// Persists batches as artifacts in the configured storage backend
pub struct BatchSink {
    store: Arc<dyn Storage>,
    processing_date: NaiveDate,
}

impl BatchSink {
    pub fn new(store: Arc<dyn Storage>, processing_date: NaiveDate) -> Self {
        Self {
            store,
            processing_date,
        }
    }

    /// Write `batch` as one artifact. Nothing is recorded as completed on failure.
    pub async fn flush(&self, mode: ExtractionMode, batch: &[ResultRecord]) -> Result<FlushReceipt> {
        let name = artifact_name(mode, batch);
        let keys: Vec<EntityKey> = batch.iter().filter_map(|r| r.item.entity_key()).collect();
        let rows: Vec<Value> = batch
            .iter()
            .cloned()
            .flat_map(|record| record.into_rows(self.processing_date))
            .collect();

        self.store.write_artifact(mode, &name, &rows).await?;

        info!(
            "💾 Flushed {} {} records ({} rows) to artifact {}",
            batch.len(),
            mode,
            rows.len(),
            name
        );

        Ok(FlushReceipt {
            artifact: name,
            records: batch.len(),
            rows: rows.len(),
            keys,
        })
    }
}
