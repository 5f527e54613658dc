//! In-memory sink with failure injection.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::{Sink, SinkError, SubmitReport};
use crate::monitor::HealthStatus;
use crate::queue::QueueEntry;

/// A scripted outcome for one upcoming `submit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injected {
    Transient,
    Fatal,
    /// Accept at most this many entries.
    Partial(usize),
}

#[derive(Debug, Default)]
struct MemoryState {
    accepted: Vec<QueueEntry>,
    script: VecDeque<Injected>,
    submits: u64,
    flushes: u64,
    failed: bool,
}

#[derive(Debug)]
pub struct MemorySink {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Queue outcomes for the next submits, in order.
    pub fn inject(&self, outcomes: impl IntoIterator<Item = Injected>) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .script
            .extend(outcomes);
    }

    pub fn accepted(&self) -> Vec<QueueEntry> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accepted
            .clone()
    }

    pub fn accepted_ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accepted
            .iter()
            .map(|e| e.id().0)
            .collect()
    }

    pub fn submits(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).submits
    }

    pub fn flushes(&self) -> u64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).flushes
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, batch: &[QueueEntry]) -> Result<SubmitReport, SinkError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.submits += 1;
        if state.failed {
            return Err(SinkError::fatal(&self.name, "sink marked failed"));
        }
        let limit = match state.script.pop_front() {
            Some(Injected::Transient) => {
                return Err(SinkError::transient(&self.name, "injected transient failure"))
            }
            Some(Injected::Fatal) => {
                state.failed = true;
                return Err(SinkError::fatal(&self.name, "injected fatal failure"));
            }
            Some(Injected::Partial(n)) => n.min(batch.len()),
            None => batch.len(),
        };
        state.accepted.extend(batch[..limit].iter().cloned());
        Ok(SubmitReport::partial(limit, batch.len()))
    }

    fn flush(&self, _timeout: Duration) -> Result<bool, SinkError> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).flushes += 1;
        Ok(true)
    }

    fn health(&self) -> HealthStatus {
        if self.state.lock().unwrap_or_else(|e| e.into_inner()).failed {
            HealthStatus::Failed
        } else {
            HealthStatus::Ok
        }
    }
}
