//! Structured event vocabulary for internal diagnostics.
//!
//! Every `tracing` call in the engine uses one of these names as its target,
//! so JSONL output can be filtered on `event`.

use serde::{Deserialize, Serialize};

/// Log levels for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Engine subsystem emitting an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Init,
    Resolver,
    Queue,
    Persistence,
    Monitor,
    Sink,
    Cli,
}

impl std::fmt::Display for Subsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Subsystem::Init => "init",
            Subsystem::Resolver => "resolver",
            Subsystem::Queue => "queue",
            Subsystem::Persistence => "persistence",
            Subsystem::Monitor => "monitor",
            Subsystem::Sink => "sink",
            Subsystem::Cli => "cli",
        };
        f.write_str(s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const CONFIG_REJECTED: &str = "config.rejected";
    pub const CONFIG_SWAPPED: &str = "config.swapped";

    // Resolver
    pub const MAPPING_LOADED: &str = "resolver.mapping_loaded";
    pub const OVERRIDE_ADDED: &str = "resolver.override_added";
    pub const OVERRIDE_REMOVED: &str = "resolver.override_removed";

    // Queue
    pub const QUEUE_CREATED: &str = "queue.created";
    pub const QUEUE_REMOVED: &str = "queue.removed";
    pub const QUEUE_EVICTED: &str = "queue.evicted";
    pub const QUEUE_FULL: &str = "queue.full";
    pub const QUEUE_RESIZED: &str = "queue.resized";
    pub const QUEUE_REBALANCED: &str = "queue.rebalanced";
    pub const QUEUE_CLEANUP: &str = "queue.emergency_cleanup";
    pub const EMERGENCY_ENTERED: &str = "emergency.entered";
    pub const EMERGENCY_EXITED: &str = "emergency.exited";

    // Persistence
    pub const POLICY_FALLBACK: &str = "persistence.policy_fallback";
    pub const POLICY_UPDATED: &str = "persistence.policy_updated";

    // Monitor
    pub const COLLECTION_FAILED: &str = "monitor.collection_failed";
    pub const COLLECTION_RECOVERED: &str = "monitor.collection_recovered";
    pub const ANOMALY_DETECTED: &str = "monitor.anomaly";
    pub const HEALTH_CHANGED: &str = "monitor.health_changed";
    pub const ALERT_FIRED: &str = "alert.fired";
    pub const ALERT_DELIVERY_FAILED: &str = "alert.delivery_failed";
    pub const ALERT_ACKNOWLEDGED: &str = "alert.acknowledged";
    pub const SIGNAL_EMITTED: &str = "signal.emitted";
    pub const SIGNAL_APPLIED: &str = "signal.applied";

    // Sinks
    pub const SINK_RETRY: &str = "sink.retry";
    pub const SINK_FAILED: &str = "sink.failed";
    pub const SINK_DEAD_LETTER: &str = "sink.dead_letter";
    pub const SINK_DROPPED: &str = "sink.dropped";

    // Errors
    pub const INTERNAL_ERROR: &str = "internal_error";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_from_tracing() {
        assert_eq!(Level::from(tracing::Level::WARN), Level::Warn);
        assert_eq!(serde_json::to_string(&Level::Error).unwrap(), "\"error\"");
    }

    #[test]
    fn subsystem_display_matches_serde() {
        let json = serde_json::to_string(&Subsystem::Persistence).unwrap();
        assert_eq!(json, format!("\"{}\"", Subsystem::Persistence));
    }
}
