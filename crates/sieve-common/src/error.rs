//! Error types for Sieve.
//!
//! Errors are classified by kind rather than by origin:
//! - Stable error codes for machine parsing
//! - Category classification for grouping
//! - Recoverability hints for automation
//! - Remediation text for operators
//!
//! Only configuration and internal-invariant errors are surfaced to callers of
//! the public API; the other kinds are recovered locally and recorded in
//! statistics, but they share this taxonomy so logs and CLI output agree.
//!
//! # Agent-Facing Output
//!
//! ```json
//! {
//!   "code": 20,
//!   "category": "queue",
//!   "message": "queue billing/default is full (4096 entries)",
//!   "recoverable": true,
//!   "context": { "queue": "billing/default" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for Sieve operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid thresholds, malformed patterns, unreadable config files.
    Config,
    /// Admission failures in a smart queue.
    Queue,
    /// Sink submission failures.
    Sink,
    /// Metric collection failures.
    Monitor,
    /// Ownership or bookkeeping violations inside the engine.
    Internal,
    /// Lookups of queues, alerts, or state files that do not exist.
    Lookup,
    /// File I/O and serialization errors.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Queue => write!(f, "queue"),
            ErrorCategory::Sink => write!(f, "sink"),
            ErrorCategory::Monitor => write!(f, "monitor"),
            ErrorCategory::Internal => write!(f, "internal"),
            ErrorCategory::Lookup => write!(f, "lookup"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified error type for Sieve.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    // Queue errors (20-29)
    #[error("queue {queue} is full ({capacity} entries)")]
    QueueFull { queue: String, capacity: usize },

    // Sink errors (30-39)
    #[error("sink {sink} transient failure: {message}")]
    SinkTransient { sink: String, message: String },

    #[error("sink {sink} failed permanently: {message}")]
    SinkFatal { sink: String, message: String },

    // Monitor errors (40-49)
    #[error("metric collection failed: {0}")]
    MonitorCollection(String),

    // Internal errors (50-59)
    #[error("internal invariant violated: {context}")]
    InternalInvariant { context: String },

    // Lookup errors (60-69)
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    // I/O errors (70-79)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build an [`Error::InternalInvariant`].
    ///
    /// Debug builds treat a violated invariant as fatal; release builds hand
    /// the structured error back to the caller.
    pub fn invariant(context: impl Into<String>) -> Self {
        let context = context.into();
        debug_assert!(false, "internal invariant violated: {context}");
        Error::InternalInvariant { context }
    }

    /// Build an [`Error::NotFound`].
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Queue errors
    /// - 30-39: Sink errors
    /// - 40-49: Monitor errors
    /// - 50-59: Internal errors
    /// - 60-69: Lookup errors
    /// - 70-79: I/O errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Configuration(_) => 10,
            Error::InvalidPattern { .. } => 11,
            Error::QueueFull { .. } => 20,
            Error::SinkTransient { .. } => 30,
            Error::SinkFatal { .. } => 31,
            Error::MonitorCollection(_) => 40,
            Error::InternalInvariant { .. } => 50,
            Error::NotFound { .. } => 60,
            Error::Io(_) => 70,
            Error::Json(_) => 71,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Configuration(_) | Error::InvalidPattern { .. } => ErrorCategory::Config,
            Error::QueueFull { .. } => ErrorCategory::Queue,
            Error::SinkTransient { .. } | Error::SinkFatal { .. } => ErrorCategory::Sink,
            Error::MonitorCollection(_) => ErrorCategory::Monitor,
            Error::InternalInvariant { .. } => ErrorCategory::Internal,
            Error::NotFound { .. } => ErrorCategory::Lookup,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }

    /// Returns whether this error is potentially recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Old configuration stays in force
            Error::Configuration(_) => true,
            Error::InvalidPattern { .. } => true,

            // Space frees up as workers drain
            Error::QueueFull { .. } => true,

            Error::SinkTransient { .. } => true,
            Error::SinkFatal { .. } => false,

            // Next cycle may succeed
            Error::MonitorCollection(_) => true,

            Error::InternalInvariant { .. } => false,
            Error::NotFound { .. } => false,

            Error::Io(_) => true,
            Error::Json(_) => false,
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "Configuration Error",
            Error::InvalidPattern { .. } => "Invalid Pattern",
            Error::QueueFull { .. } => "Queue Full",
            Error::SinkTransient { .. } => "Sink Temporarily Unavailable",
            Error::SinkFatal { .. } => "Sink Failed",
            Error::MonitorCollection(_) => "Metric Collection Failed",
            Error::InternalInvariant { .. } => "Internal Invariant Violated",
            Error::NotFound { .. } => "Not Found",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Error",
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Configuration(_) => {
                "The previous configuration is still active. Fix the file and reload."
            }
            Error::InvalidPattern { .. } => {
                "Patterns support '*' and '?' wildcards and must not be empty."
            }
            Error::QueueFull { .. } => {
                "Raise queue.max_entries or queue.max_bytes, or add drain workers."
            }
            Error::SinkTransient { .. } => "Workers retry with backoff; check the sink target.",
            Error::SinkFatal { .. } => {
                "The sink is disabled. Remaining sinks keep draining; restart after repair."
            }
            Error::MonitorCollection(_) => "Check /proc availability and process permissions.",
            Error::InternalInvariant { .. } => "Report this as a bug with the logged context.",
            Error::NotFound { .. } => "Run 'sieve show-queues' or 'sieve status' to list names.",
            Error::Io(_) => "Check disk space and permissions on the data directory.",
            Error::Json(_) => "Check file syntax with 'jq .' or restore from backup.",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Additional structured context (queue name, sink name, ...).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::QueueFull { queue, capacity } => {
                context.insert("queue".to_string(), serde_json::json!(queue));
                context.insert("capacity".to_string(), serde_json::json!(capacity));
            }
            Error::SinkTransient { sink, .. } | Error::SinkFatal { sink, .. } => {
                context.insert("sink".to_string(), serde_json::json!(sink));
            }
            Error::InvalidPattern { pattern, .. } => {
                context.insert("pattern".to_string(), serde_json::json!(pattern));
            }
            Error::NotFound { kind, name } => {
                context.insert("kind".to_string(), serde_json::json!(kind));
                context.insert("name".to_string(), serde_json::json!(name));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            context,
        }
    }
}

impl StructuredError {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for human-readable stderr output.
///
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error) -> String {
    format!(
        "✗ {}\n  Reason: {}\n  Fix: {}",
        err.headline(),
        err,
        err.remediation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(Error::Configuration("x".into()).code(), 10);
        assert_eq!(
            Error::QueueFull {
                queue: "a/b".into(),
                capacity: 4
            }
            .code(),
            20
        );
        assert_eq!(Error::not_found("queue", "a/b").code(), 60);
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            Error::MonitorCollection("proc".into()).category(),
            ErrorCategory::Monitor
        );
        assert_eq!(
            Error::SinkFatal {
                sink: "file".into(),
                message: "disk gone".into()
            }
            .category(),
            ErrorCategory::Sink
        );
    }

    #[test]
    fn test_error_recoverable() {
        assert!(Error::Configuration("x".into()).is_recoverable());
        assert!(!Error::SinkFatal {
            sink: "s".into(),
            message: "m".into()
        }
        .is_recoverable());
        assert!(Error::SinkTransient {
            sink: "s".into(),
            message: "m".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_structured_error_context() {
        let err = Error::QueueFull {
            queue: "billing/default".into(),
            capacity: 4096,
        };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, 20);
        assert_eq!(structured.category, ErrorCategory::Queue);
        assert_eq!(
            structured.context.get("queue"),
            Some(&serde_json::json!("billing/default"))
        );
        let json = structured.to_json();
        assert!(json.contains(r#""category":"queue""#));
    }

    #[test]
    fn test_format_error_human() {
        let formatted = format_error_human(&Error::not_found("alert", "a-1"));
        assert!(formatted.contains("Not Found"));
        assert!(formatted.contains("alert not found: a-1"));
    }
}
