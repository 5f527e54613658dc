//! Durable Parquet sink in the `log_records` layout.
//!
//! Rows go into one open file per sink until `batch_rows` is reached, then the
//! file is finalised and the next one is started. `flush` finalises the open
//! file early so everything accepted so far is readable.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use sieve_telemetry::{
    log_records_schema, prune_partitions, records_to_batch, BatchedWriter, PersistenceRecord,
    PrunedPartition, TableName, WriteError, WriterConfig,
};
use tracing::debug;

use super::{Sink, SinkError, SubmitReport};
use crate::monitor::HealthStatus;
use crate::queue::QueueEntry;

struct ParquetState {
    writer: Option<BatchedWriter>,
    file_seq: u64,
    rows_in_file: usize,
    finished: Vec<PathBuf>,
    last_error: Option<String>,
}

pub struct ParquetSink {
    name: String,
    root: PathBuf,
    instance_id: String,
    batch_rows: usize,
    max_string_len: usize,
    state: Mutex<ParquetState>,
}

impl ParquetSink {
    pub fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        instance_id: impl Into<String>,
        batch_rows: usize,
        max_string_len: usize,
    ) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            instance_id: instance_id.into(),
            batch_rows: batch_rows.max(1),
            max_string_len,
            state: Mutex::new(ParquetState {
                writer: None,
                file_seq: 0,
                rows_in_file: 0,
                finished: Vec::new(),
                last_error: None,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files finalised so far, oldest first.
    pub fn finished_files(&self) -> Vec<PathBuf> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .finished
            .clone()
    }

    /// Remove `log_records` partitions older than `retention_days`.
    pub fn prune(
        &self,
        retention_days: u32,
        now: SystemTime,
    ) -> Result<Vec<PrunedPartition>, WriteError> {
        prune_partitions(&self.root, TableName::LogRecords, retention_days, now, false)
    }

    fn open_writer(&self, seq: u64) -> BatchedWriter {
        let config = WriterConfig::new(self.root.clone(), self.instance_id.clone())
            .with_batch_size(self.batch_rows)
            .with_file_seq(seq);
        BatchedWriter::new(TableName::LogRecords, Arc::new(log_records_schema()), config)
    }

    fn map_error(&self, e: WriteError) -> SinkError {
        match e {
            WriteError::Io(io) => SinkError::transient(&self.name, io.to_string()),
            other => SinkError::fatal(&self.name, other.to_string()),
        }
    }

    fn finish(&self, state: &mut ParquetState) -> Result<(), SinkError> {
        let Some(writer) = state.writer.take() else {
            return Ok(());
        };
        state.rows_in_file = 0;
        match writer.close() {
            Ok(path) => {
                debug!(sink = %self.name, path = %path.display(), "parquet file finalised");
                state.finished.push(path);
                Ok(())
            }
            Err(WriteError::EmptyBuffer) => Ok(()),
            Err(e) => Err(self.map_error(e)),
        }
    }
}

impl Sink for ParquetSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, batch: &[QueueEntry]) -> Result<SubmitReport, SinkError> {
        if batch.is_empty() {
            return Ok(SubmitReport::all(0));
        }
        let records: Vec<PersistenceRecord> = batch
            .iter()
            .map(|e| PersistenceRecord::from_message(&e.message, e.importance, self.max_string_len))
            .collect();
        let rows = records_to_batch(&records)
            .map_err(|e| SinkError::fatal(&self.name, e.to_string()))?;

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.writer.is_none() {
            let seq = state.file_seq;
            state.file_seq += 1;
            state.writer = Some(self.open_writer(seq));
        }
        let result = match state.writer.as_mut() {
            Some(writer) => writer.write(rows),
            None => Err(WriteError::NotInitialized),
        };
        if let Err(e) = result {
            let err = self.map_error(e);
            state.last_error = Some(err.to_string());
            // The half-written file is abandoned; its temp name keeps readers away.
            state.writer = None;
            state.rows_in_file = 0;
            return Err(err);
        }
        state.last_error = None;
        state.rows_in_file += batch.len();
        if state.rows_in_file >= self.batch_rows {
            self.finish(&mut state)?;
        }
        Ok(SubmitReport::all(batch.len()))
    }

    fn flush(&self, _timeout: Duration) -> Result<bool, SinkError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.finish(&mut state).map(|_| true)
    }

    fn health(&self) -> HealthStatus {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.last_error.is_some() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        }
    }
}
