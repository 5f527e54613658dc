//! Append-only JSON lines sink.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use sieve_telemetry::PersistenceRecord;

use super::{Sink, SinkError, SubmitReport};
use crate::monitor::HealthStatus;
use crate::queue::QueueEntry;

/// Writes one `PersistenceRecord` per line.
pub struct JsonlFileSink {
    name: String,
    path: PathBuf,
    max_string_len: usize,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JsonlFileSink {
    pub fn open(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        max_string_len: usize,
    ) -> std::io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            name: name.into(),
            path,
            max_string_len,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

impl Sink for JsonlFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, batch: &[QueueEntry]) -> Result<SubmitReport, SinkError> {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_none() {
            // A previous write failed; reopen before trying again.
            let file = open_append(&self.path)
                .map_err(|e| SinkError::transient(&self.name, e.to_string()))?;
            *guard = Some(BufWriter::new(file));
        }
        let Some(writer) = guard.as_mut() else {
            return Err(SinkError::transient(&self.name, "writer unavailable"));
        };

        let mut accepted = 0;
        for entry in batch {
            let record = PersistenceRecord::from_message(
                &entry.message,
                entry.importance,
                self.max_string_len,
            );
            let line = serde_json::to_string(&record)
                .map_err(|e| SinkError::fatal(&self.name, e.to_string()))?;
            if let Err(e) = writeln!(writer, "{}", line) {
                *guard = None;
                if accepted == 0 {
                    return Err(SinkError::transient(&self.name, e.to_string()));
                }
                return Ok(SubmitReport::partial(accepted, batch.len()));
            }
            accepted += 1;
        }
        Ok(SubmitReport::all(accepted))
    }

    fn flush(&self, _timeout: Duration) -> Result<bool, SinkError> {
        let mut guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(writer) = guard.as_mut() {
            writer
                .flush()
                .and_then(|_| writer.get_ref().sync_data())
                .map_err(|e| SinkError::transient(&self.name, e.to_string()))?;
        }
        Ok(true)
    }

    fn health(&self) -> HealthStatus {
        if self
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
        {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        }
    }
}
