//! Dead-letter region for critical entries whose delivery retries ran out.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use sieve_telemetry::{
    batch_to_records, dead_letters_schema, dead_letters_to_batch, read_parquet_file,
    BatchedWriter, PersistenceRecord, TableName, WriteError, WriterConfig,
};

use crate::queue::QueueEntry;

/// Each stored batch becomes one `dead_letters` Parquet file.
pub struct DeadLetterStore {
    root: PathBuf,
    instance_id: String,
    max_string_len: usize,
    next_seq: AtomicU64,
    stored: AtomicU64,
    files: Mutex<Vec<PathBuf>>,
}

impl DeadLetterStore {
    pub fn new(
        root: impl Into<PathBuf>,
        instance_id: impl Into<String>,
        max_string_len: usize,
    ) -> Self {
        Self {
            root: root.into(),
            instance_id: instance_id.into(),
            max_string_len,
            next_seq: AtomicU64::new(0),
            stored: AtomicU64::new(0),
            files: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `entries` along with the failure that sent them here.
    pub fn store(
        &self,
        entries: &[QueueEntry],
        sink: &str,
        failure: &str,
        attempts: u32,
    ) -> Result<PathBuf, WriteError> {
        if entries.is_empty() {
            return Err(WriteError::EmptyBuffer);
        }
        let records: Vec<PersistenceRecord> = entries
            .iter()
            .map(|e| PersistenceRecord::from_message(&e.message, e.importance, self.max_string_len))
            .collect();
        let batch = dead_letters_to_batch(&records, sink, failure, attempts)?;

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let config = WriterConfig::new(self.root.clone(), self.instance_id.clone())
            .with_batch_size(records.len())
            .with_file_seq(seq);
        let mut writer =
            BatchedWriter::new(TableName::DeadLetters, Arc::new(dead_letters_schema()), config);
        writer.write(batch)?;
        let path = writer.close()?;

        self.stored.fetch_add(records.len() as u64, Ordering::Relaxed);
        self.files
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.clone());
        Ok(path)
    }

    /// Entries stored by this instance.
    pub fn count(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every dead-lettered record under the root, including earlier runs.
    pub fn load_all(&self) -> Result<Vec<PersistenceRecord>, WriteError> {
        let mut paths = Vec::new();
        collect_parquet(&self.root.join(TableName::DeadLetters.as_str()), &mut paths)?;
        paths.sort();
        let mut out = Vec::new();
        for path in paths {
            for batch in read_parquet_file(&path)? {
                out.extend(batch_to_records(&batch)?);
            }
        }
        Ok(out)
    }
}

fn collect_parquet(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), WriteError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_parquet(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "parquet") {
            out.push(path);
        }
    }
    Ok(())
}
