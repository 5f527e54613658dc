//! Sieve common types, IDs, and errors.
//!
//! This crate provides the data model shared by every Sieve crate:
//! - Log messages and their origin metadata
//! - Importance levels and runtime classification context
//! - Persistence decisions and reason codes
//! - Message, queue, and rule identities
//! - Clock and process-info abstractions (with a manual clock for tests)
//! - The unified error taxonomy

pub mod clock;
pub mod context;
pub mod decision;
pub mod error;
pub mod id;
pub mod importance;
pub mod message;
pub mod output;

pub use clock::{Clock, ManualClock, OsProcessInfo, ProcessInfo, SharedClock, SystemClock};
pub use context::Context;
pub use decision::{PersistenceAction, PersistenceDecision, ReasonCode};
pub use error::{Error, ErrorCategory, Result, StructuredError};
pub use id::{MessageId, MessageIdGenerator, QueueKey, RuleId};
pub use importance::Importance;
pub use message::{
    LogMessage, MessageBuilder, MessageType, Origin, SourceLocation, Timestamp,
    DEFAULT_MAX_PAYLOAD_BYTES, TRUNCATION_MARKER,
};
pub use output::OutputFormat;
