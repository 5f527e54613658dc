//! Registered sinks and their health.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::{Sink, SinkError};
use crate::logging::event_names;
use crate::monitor::{HealthStatus, SinkProbe};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkStatus {
    pub name: String,
    pub health: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct Registered {
    sink: Arc<dyn Sink>,
    failed: bool,
    last_error: Option<String>,
}

/// Sinks receive batches until they report a fatal error; after that they
/// are skipped until reset. The rest keep working.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: RwLock<Vec<Registered>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any sink with the same name.
    pub fn register(&self, sink: Arc<dyn Sink>) {
        let mut sinks = self.sinks.write().unwrap_or_else(|e| e.into_inner());
        sinks.retain(|r| r.sink.name() != sink.name());
        sinks.push(Registered {
            sink,
            failed: false,
            last_error: None,
        });
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut sinks = self.sinks.write().unwrap_or_else(|e| e.into_inner());
        let before = sinks.len();
        sinks.retain(|r| r.sink.name() != name);
        sinks.len() != before
    }

    pub fn len(&self) -> usize {
        self.sinks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sinks not marked failed, in registration order.
    pub fn active(&self) -> Vec<Arc<dyn Sink>> {
        self.sinks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| !r.failed)
            .map(|r| Arc::clone(&r.sink))
            .collect()
    }

    pub fn mark_failed(&self, name: &str, err: &SinkError) {
        let mut sinks = self.sinks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(r) = sinks.iter_mut().find(|r| r.sink.name() == name) {
            if !r.failed {
                error!(
                    target: event_names::SINK_FAILED,
                    sink = name,
                    error = %err,
                    "sink marked failed"
                );
            }
            r.failed = true;
            r.last_error = Some(err.to_string());
        }
    }

    /// Remember a transient error without taking the sink out of rotation.
    pub fn note_error(&self, name: &str, err: &SinkError) {
        let mut sinks = self.sinks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(r) = sinks.iter_mut().find(|r| r.sink.name() == name) {
            r.last_error = Some(err.to_string());
        }
    }

    /// Put a failed sink back into rotation.
    pub fn reset(&self, name: &str) -> bool {
        let mut sinks = self.sinks.write().unwrap_or_else(|e| e.into_inner());
        match sinks.iter_mut().find(|r| r.sink.name() == name) {
            Some(r) => {
                r.failed = false;
                r.last_error = None;
                true
            }
            None => false,
        }
    }

    pub fn statuses(&self) -> Vec<SinkStatus> {
        self.sinks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|r| SinkStatus {
                name: r.sink.name().to_string(),
                health: if r.failed {
                    HealthStatus::Failed
                } else {
                    r.sink.health()
                },
                last_error: r.last_error.clone(),
            })
            .collect()
    }

    /// Flush every active sink. Returns the names that did not finish.
    pub fn flush_all(&self, timeout: Duration) -> Vec<String> {
        let mut unfinished = Vec::new();
        for sink in self.active() {
            match sink.flush(timeout) {
                Ok(true) => {}
                Ok(false) => unfinished.push(sink.name().to_string()),
                Err(e) => {
                    warn!(sink = sink.name(), error = %e, "sink flush failed");
                    if e.is_fatal() {
                        self.mark_failed(sink.name(), &e);
                    } else {
                        self.note_error(sink.name(), &e);
                    }
                    unfinished.push(sink.name().to_string());
                }
            }
        }
        unfinished
    }
}

impl SinkProbe for SinkRegistry {
    fn failed_sinks(&self) -> Vec<String> {
        self.statuses()
            .into_iter()
            .filter(|s| s.health == HealthStatus::Failed)
            .map(|s| s.name)
            .collect()
    }

    fn sink_count(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::memory::{Injected, MemorySink};

    #[test]
    fn failed_sink_leaves_rotation() {
        let registry = SinkRegistry::new();
        registry.register(Arc::new(MemorySink::new("a")));
        registry.register(Arc::new(MemorySink::new("b")));
        assert_eq!(registry.active().len(), 2);

        registry.mark_failed("a", &SinkError::fatal("a", "disk gone"));
        let active: Vec<String> = registry.active().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(active, vec!["b".to_string()]);
        assert_eq!(registry.failed_sinks(), vec!["a".to_string()]);
        assert_eq!(registry.sink_count(), 2);

        let status = &registry.statuses()[0];
        assert_eq!(status.health, HealthStatus::Failed);
        assert!(status.last_error.as_deref().unwrap_or("").contains("disk gone"));

        assert!(registry.reset("a"));
        assert!(registry.failed_sinks().is_empty());
    }

    #[test]
    fn sink_reported_failure_counts() {
        let registry = SinkRegistry::new();
        let sink = Arc::new(MemorySink::new("m"));
        sink.inject([Injected::Fatal]);
        let _ = sink.submit(&[]);
        registry.register(sink);
        assert_eq!(registry.failed_sinks(), vec!["m".to_string()]);
    }

    #[test]
    fn register_replaces_same_name() {
        let registry = SinkRegistry::new();
        registry.register(Arc::new(MemorySink::new("a")));
        registry.register(Arc::new(MemorySink::new("a")));
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("a"));
        assert!(registry.is_empty());
        assert!(registry.flush_all(Duration::from_millis(10)).is_empty());
    }
}
