//! Sieve Core Library
//!
//! Classification, buffering and persistence of structured log messages:
//! - Importance resolution in the current runtime context
//! - Priority-aware bounded queues and their manager
//! - Contextual persistence policy
//! - Resource monitoring, alerts and adaptation signals
//! - Sinks, drain workers and the dead-letter store
//!
//! The binary entry point is in `main.rs`.

pub mod context;
pub mod drain;
pub mod events;
pub mod exit_codes;
pub mod facade;
pub mod logging;
pub mod manager;
pub mod monitor;
pub mod persistence;
pub mod queue;
pub mod resolver;
pub mod runtime;
pub mod signals;
pub mod sink;
pub mod system;

// Prometheus and HTTP surface (optional, behind "metrics" feature)
#[cfg(feature = "metrics")]
pub mod http;
#[cfg(feature = "metrics")]
pub mod metrics;

pub use system::{Sieve, SieveBuilder, StatusReport, Submission};
