//! Structured logging for the engine's own diagnostics.
//!
//! Provides dual-mode logging:
//! - Human-readable console output for interactive use
//! - Machine-parseable JSONL for daemon workflows
//!
//! stdout is reserved for command payloads; every log line goes to stderr.
//! Event targets come from [`event_names`] so JSONL output can be filtered on
//! the `event` key.

pub mod config;
pub mod events;
pub mod layer;

pub use config::{LogConfig, LogFormat, LogLevel};
pub use events::{event_names, Level, Subsystem};
pub use layer::JsonlLayer;

use std::io::IsTerminal;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging subsystem.
///
/// Call once at startup. Later calls (for example from tests that share a
/// process) are ignored.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_env(config::ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| {
            EnvFilter::builder()
                .with_default_directive(config.level.filter().into())
                .parse_lossy("")
        });

    let result = match config.format {
        LogFormat::Human => {
            let use_ansi = std::io::stderr().is_terminal();
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_ansi(use_ansi);

            if config.timestamps {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.without_time())
                    .try_init()
            }
        }
        LogFormat::Jsonl => tracing_subscriber::registry()
            .with(filter)
            .with(JsonlLayer::stderr())
            .try_init(),
    };

    if result.is_ok() {
        tracing::debug!(
            target: event_names::RUN_STARTED,
            format = %config.format,
            level = %config.level,
            "logging initialised"
        );
    }
}

/// Initialize logging from the environment alone.
pub fn init_default_logging() {
    init_logging(&LogConfig::from_env(None, None));
}

/// Short unique id for this process, carried on the root span.
pub fn generate_instance_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("sv-{}", &uuid[..12])
}
