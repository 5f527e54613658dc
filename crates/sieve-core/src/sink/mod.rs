//! Sinks consumed by drain workers.
//!
//! A sink takes a batch of drained entries and reports how many it accepted.
//! Accepted entries are always a prefix of the batch; the rest stay with the
//! worker, which retries them with backoff. Sinks are never called while a
//! queue lock is held.

pub mod dead_letter;
pub mod jsonl;
pub mod memory;
pub mod parquet;
pub mod registry;

pub use dead_letter::DeadLetterStore;
pub use jsonl::JsonlFileSink;
pub use memory::MemorySink;
pub use parquet::ParquetSink;
pub use registry::{SinkRegistry, SinkStatus};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitor::HealthStatus;
use crate::queue::QueueEntry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Worth retrying.
    #[error("sink {sink} transient failure: {message}")]
    Transient { sink: String, message: String },

    /// The sink is unusable until reconfigured.
    #[error("sink {sink} failed permanently: {message}")]
    Fatal { sink: String, message: String },
}

impl SinkError {
    pub fn transient(sink: impl Into<String>, message: impl Into<String>) -> Self {
        SinkError::Transient {
            sink: sink.into(),
            message: message.into(),
        }
    }

    pub fn fatal(sink: impl Into<String>, message: impl Into<String>) -> Self {
        SinkError::Fatal {
            sink: sink.into(),
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SinkError::Fatal { .. })
    }
}

impl From<SinkError> for sieve_common::Error {
    fn from(e: SinkError) -> Self {
        match e {
            SinkError::Transient { sink, message } => {
                sieve_common::Error::SinkTransient { sink, message }
            }
            SinkError::Fatal { sink, message } => sieve_common::Error::SinkFatal { sink, message },
        }
    }
}

/// Outcome of one `submit`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReport {
    pub accepted: usize,
    pub failed: usize,
}

impl SubmitReport {
    pub fn all(len: usize) -> Self {
        Self {
            accepted: len,
            failed: 0,
        }
    }

    pub fn partial(accepted: usize, len: usize) -> Self {
        let accepted = accepted.min(len);
        Self {
            accepted,
            failed: len - accepted,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    /// Accept a prefix of `batch`.
    fn submit(&self, batch: &[QueueEntry]) -> Result<SubmitReport, SinkError>;

    /// Push buffered data to durable storage. Returns false if `timeout`
    /// elapsed first.
    fn flush(&self, timeout: Duration) -> Result<bool, SinkError>;

    fn health(&self) -> HealthStatus;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sieve_common::{Context, LogMessage, MessageType, PersistenceDecision, SystemClock};
    use sieve_config::settings::QueueSettings;

    use crate::queue::SmartQueue;

    /// Entries as a queue would hand them out.
    pub(crate) fn entries(types: &[MessageType]) -> Vec<QueueEntry> {
        let queue = SmartQueue::new(
            sieve_common::QueueKey::default_for("app"),
            QueueSettings::plain(types.len().max(1), 0),
            SystemClock::shared(),
        );
        for (i, t) in types.iter().enumerate() {
            let msg = LogMessage::builder(*t, format!("payload {}", i))
                .id(i as u64 + 1)
                .application("app")
                .component("Comp")
                .function("run")
                .build();
            let decision = PersistenceDecision::persist(t.default_importance());
            queue
                .enqueue(msg, decision, &Context::new("app"))
                .expect("room in test queue");
        }
        queue.drain_batch(types.len())
    }

    #[test]
    fn partial_report() {
        assert_eq!(SubmitReport::partial(3, 5), SubmitReport { accepted: 3, failed: 2 });
        assert_eq!(SubmitReport::partial(9, 5), SubmitReport::all(5));
        assert!(SubmitReport::all(0).is_complete());
    }

    #[test]
    fn sink_errors_map_to_taxonomy() {
        let e: sieve_common::Error = SinkError::fatal("db", "gone").into();
        assert!(matches!(e, sieve_common::Error::SinkFatal { ref sink, .. } if sink == "db"));
        assert!(!e.is_recoverable());
        assert!(SinkError::fatal("x", "y").is_fatal());
        assert!(!SinkError::transient("x", "y").is_fatal());
    }
}
