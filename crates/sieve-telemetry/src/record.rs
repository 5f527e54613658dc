//! Bounded-width persistence records.
//!
//! Inside the engine strings are owned and unbounded; this is the storage
//! boundary where varchar columns are cut to the configured length.

use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, Int64Array, RecordBatch, StringArray, UInt32Array, UInt64Array, UInt8Array,
};
use arrow::error::ArrowError;
use serde::{Deserialize, Serialize};
use sieve_common::{Importance, LogMessage};

use crate::schema::{dead_letters_schema, log_records_schema};

/// One row of `log_records`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceRecord {
    pub message_id: u64,
    pub timestamp_seconds: i64,
    pub timestamp_micros: u32,
    pub application: String,
    pub component: String,
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub process_id: u32,
    pub thread_id: u32,
    #[serde(rename = "type")]
    pub message_type: u8,
    pub importance: u8,
    pub severity_text: String,
    pub payload: String,
}

impl PersistenceRecord {
    /// Flatten a message, cutting varchar columns to `max_string_len` bytes.
    pub fn from_message(msg: &LogMessage, importance: Importance, max_string_len: usize) -> Self {
        let origin = msg.origin();
        let ts = msg.timestamp();
        Self {
            message_id: msg.id().0,
            timestamp_seconds: ts.seconds,
            timestamp_micros: ts.micros,
            application: truncate_utf8(&origin.application, max_string_len),
            component: truncate_utf8(&origin.component, max_string_len),
            function: truncate_utf8(&origin.function, max_string_len),
            file: origin
                .location
                .as_ref()
                .map(|l| truncate_utf8(&l.file, max_string_len)),
            line: origin.location.as_ref().map(|l| l.line),
            process_id: origin.process_id,
            thread_id: origin.thread_id,
            message_type: msg.message_type().as_u8(),
            importance: importance.as_u8(),
            severity_text: msg.message_type().as_str().to_string(),
            payload: msg.payload().to_string(),
        }
    }
}

/// Longest prefix of `s` that fits in `max` bytes on a char boundary.
pub fn truncate_utf8(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s[..cut].to_string()
}

fn record_columns(records: &[PersistenceRecord]) -> Vec<ArrayRef> {
    vec![
        Arc::new(UInt64Array::from_iter_values(
            records.iter().map(|r| r.message_id),
        )),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.timestamp_seconds),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.timestamp_micros),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.application.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.component.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.function.as_str()),
        )),
        Arc::new(StringArray::from(
            records.iter().map(|r| r.file.as_deref()).collect::<Vec<_>>(),
        )),
        Arc::new(UInt32Array::from(
            records.iter().map(|r| r.line).collect::<Vec<_>>(),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.process_id),
        )),
        Arc::new(UInt32Array::from_iter_values(
            records.iter().map(|r| r.thread_id),
        )),
        Arc::new(UInt8Array::from_iter_values(
            records.iter().map(|r| r.message_type),
        )),
        Arc::new(UInt8Array::from_iter_values(
            records.iter().map(|r| r.importance),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.severity_text.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.payload.as_str()),
        )),
    ]
}

/// Build a `log_records` batch.
pub fn records_to_batch(records: &[PersistenceRecord]) -> Result<RecordBatch, ArrowError> {
    RecordBatch::try_new(Arc::new(log_records_schema()), record_columns(records))
}

/// Build a `dead_letters` batch; every row shares the failure context.
pub fn dead_letters_to_batch(
    records: &[PersistenceRecord],
    sink: &str,
    failure: &str,
    attempts: u32,
) -> Result<RecordBatch, ArrowError> {
    let mut columns = record_columns(records);
    columns.push(Arc::new(StringArray::from_iter_values(
        records.iter().map(|_| sink),
    )));
    columns.push(Arc::new(StringArray::from_iter_values(
        records.iter().map(|_| failure),
    )));
    columns.push(Arc::new(UInt32Array::from_iter_values(
        records.iter().map(|_| attempts),
    )));
    RecordBatch::try_new(Arc::new(dead_letters_schema()), columns)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, ArrowError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| ArrowError::SchemaError(format!("missing or mistyped column '{}'", name)))
}

/// Read rows back from a `log_records` (or `dead_letters`) batch.
pub fn batch_to_records(batch: &RecordBatch) -> Result<Vec<PersistenceRecord>, ArrowError> {
    let ids = column::<UInt64Array>(batch, "message_id")?;
    let secs = column::<Int64Array>(batch, "timestamp_seconds")?;
    let micros = column::<UInt32Array>(batch, "timestamp_micros")?;
    let app = column::<StringArray>(batch, "application")?;
    let comp = column::<StringArray>(batch, "component")?;
    let func = column::<StringArray>(batch, "function")?;
    let file = column::<StringArray>(batch, "file")?;
    let line = column::<UInt32Array>(batch, "line")?;
    let pid = column::<UInt32Array>(batch, "process_id")?;
    let tid = column::<UInt32Array>(batch, "thread_id")?;
    let ty = column::<UInt8Array>(batch, "type")?;
    let imp = column::<UInt8Array>(batch, "importance")?;
    let sev = column::<StringArray>(batch, "severity_text")?;
    let payload = column::<StringArray>(batch, "payload")?;

    Ok((0..batch.num_rows())
        .map(|i| PersistenceRecord {
            message_id: ids.value(i),
            timestamp_seconds: secs.value(i),
            timestamp_micros: micros.value(i),
            application: app.value(i).to_string(),
            component: comp.value(i).to_string(),
            function: func.value(i).to_string(),
            file: (!file.is_null(i)).then(|| file.value(i).to_string()),
            line: (!line.is_null(i)).then(|| line.value(i)),
            process_id: pid.value(i),
            thread_id: tid.value(i),
            message_type: ty.value(i),
            importance: imp.value(i),
            severity_text: sev.value(i).to_string(),
            payload: payload.value(i).to_string(),
        })
        .collect())
}
