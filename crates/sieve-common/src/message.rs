//! Log messages as submitted by producers.
//!
//! A [`LogMessage`] is immutable once built. Inside the engine every string is
//! owned and variable-length; the only bound applied here is the payload cap,
//! and fixed-width truncation of the other fields happens at the storage
//! boundary (see `sieve-telemetry`).

use crate::id::MessageId;
use crate::importance::Importance;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default cap on a single message payload.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Appended to a payload that was cut to fit the cap.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// Fixed bookkeeping overhead charged per message against byte budgets.
const ENTRY_OVERHEAD_BYTES: usize = 96;

/// Producer-assigned message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl MessageType {
    pub const ALL: [MessageType; 6] = [
        MessageType::Trace,
        MessageType::Debug,
        MessageType::Info,
        MessageType::Warn,
        MessageType::Error,
        MessageType::Critical,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Trace => "TRACE",
            MessageType::Debug => "DEBUG",
            MessageType::Info => "INFO",
            MessageType::Warn => "WARN",
            MessageType::Error => "ERROR",
            MessageType::Critical => "CRITICAL",
        }
    }

    /// Built-in type-default importance.
    pub fn default_importance(self) -> Importance {
        match self {
            MessageType::Trace | MessageType::Debug => Importance::Low,
            MessageType::Info => Importance::Medium,
            MessageType::Warn => Importance::High,
            MessageType::Error | MessageType::Critical => Importance::Critical,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(MessageType::Trace),
            "DEBUG" => Ok(MessageType::Debug),
            "INFO" => Ok(MessageType::Info),
            "WARN" | "WARNING" => Ok(MessageType::Warn),
            "ERROR" => Ok(MessageType::Error),
            "CRITICAL" | "FATAL" => Ok(MessageType::Critical),
            other => Err(format!("invalid message type '{}'", other.to_ascii_lowercase())),
        }
    }
}

/// Wall-clock timestamp with microsecond precision.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Timestamp {
    pub seconds: i64,
    pub micros: u32,
}

impl Timestamp {
    pub fn from_micros(total: i64) -> Self {
        Self {
            seconds: total.div_euclid(1_000_000),
            micros: total.rem_euclid(1_000_000) as u32,
        }
    }

    pub fn from_millis(ms: i64) -> Self {
        Self::from_micros(ms.saturating_mul(1_000))
    }

    pub fn as_micros(&self) -> i64 {
        self.seconds
            .saturating_mul(1_000_000)
            .saturating_add(self.micros as i64)
    }

    pub fn as_millis(&self) -> i64 {
        self.as_micros().div_euclid(1_000)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.micros * 1_000).single()
    }

    /// Whole milliseconds from `self` to `later`, zero if `later` is earlier.
    pub fn millis_until(&self, later: Timestamp) -> u64 {
        later.as_millis().saturating_sub(self.as_millis()).max(0) as u64
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)),
            None => write!(f, "{}.{:06}", self.seconds, self.micros),
        }
    }
}

/// Optional source location of the log call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// Where a message came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Origin {
    pub process_id: u32,
    pub thread_id: u32,
    pub application: String,
    pub component: String,
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

/// An immutable structured log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    id: MessageId,
    timestamp: Timestamp,
    origin: Origin,
    #[serde(rename = "type")]
    message_type: MessageType,
    payload: String,
    #[serde(default)]
    truncated: bool,
}

impl LogMessage {
    /// Build a message, capping the payload at `max_payload_bytes`.
    pub fn new(
        id: MessageId,
        timestamp: Timestamp,
        origin: Origin,
        message_type: MessageType,
        payload: impl Into<String>,
        max_payload_bytes: usize,
    ) -> Self {
        let (payload, truncated) = cap_payload(payload.into(), max_payload_bytes);
        Self {
            id,
            timestamp,
            origin,
            message_type,
            payload,
            truncated,
        }
    }

    pub fn builder(message_type: MessageType, payload: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(message_type, payload)
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn application(&self) -> &str {
        &self.origin.application
    }

    pub fn component(&self) -> &str {
        &self.origin.component
    }

    pub fn function(&self) -> &str {
        &self.origin.function
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// True when the payload was cut to fit the configured cap.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Bytes charged against a queue's byte budget.
    pub fn size_bytes(&self) -> usize {
        let loc = self
            .origin
            .location
            .as_ref()
            .map(|l| l.file.len())
            .unwrap_or(0);
        ENTRY_OVERHEAD_BYTES
            + self.payload.len()
            + self.origin.application.len()
            + self.origin.component.len()
            + self.origin.function.len()
            + loc
    }
}

fn cap_payload(mut payload: String, max: usize) -> (String, bool) {
    if payload.len() <= max {
        return (payload, false);
    }
    if max <= TRUNCATION_MARKER.len() {
        let mut cut = max;
        while !TRUNCATION_MARKER.is_char_boundary(cut) {
            cut -= 1;
        }
        return (TRUNCATION_MARKER[..cut].to_string(), true);
    }
    let mut cut = max - TRUNCATION_MARKER.len();
    while !payload.is_char_boundary(cut) {
        cut -= 1;
    }
    payload.truncate(cut);
    payload.push_str(TRUNCATION_MARKER);
    (payload, true)
}

/// Builder for [`LogMessage`], mainly for producers and tests.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    id: MessageId,
    timestamp: Timestamp,
    origin: Origin,
    message_type: MessageType,
    payload: String,
    max_payload_bytes: usize,
}

impl MessageBuilder {
    pub fn new(message_type: MessageType, payload: impl Into<String>) -> Self {
        Self {
            id: MessageId(0),
            timestamp: Timestamp::default(),
            origin: Origin::default(),
            message_type,
            payload: payload.into(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
        }
    }

    pub fn id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn timestamp(mut self, ts: Timestamp) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn application(mut self, application: impl Into<String>) -> Self {
        self.origin.application = application.into();
        self
    }

    pub fn component(mut self, component: impl Into<String>) -> Self {
        self.origin.component = component.into();
        self
    }

    pub fn function(mut self, function: impl Into<String>) -> Self {
        self.origin.function = function.into();
        self
    }

    pub fn process(mut self, process_id: u32, thread_id: u32) -> Self {
        self.origin.process_id = process_id;
        self.origin.thread_id = thread_id;
        self
    }

    pub fn location(mut self, file: impl Into<String>, line: u32) -> Self {
        self.origin.location = Some(SourceLocation {
            file: file.into(),
            line,
        });
        self
    }

    pub fn max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn build(self) -> LogMessage {
        LogMessage::new(
            self.id,
            self.timestamp,
            self.origin,
            self.message_type,
            self.payload,
            self.max_payload_bytes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_defaults() {
        assert_eq!(MessageType::Trace.default_importance(), Importance::Low);
        assert_eq!(MessageType::Info.default_importance(), Importance::Medium);
        assert_eq!(MessageType::Warn.default_importance(), Importance::High);
        assert_eq!(MessageType::Error.default_importance(), Importance::Critical);
    }

    #[test]
    fn payload_under_cap_is_untouched() {
        let msg = LogMessage::builder(MessageType::Info, "hello").build();
        assert_eq!(msg.payload(), "hello");
        assert!(!msg.is_truncated());
    }

    #[test]
    fn oversize_payload_gets_marker() {
        let msg = LogMessage::builder(MessageType::Info, "x".repeat(100))
            .max_payload_bytes(40)
            .build();
        assert!(msg.is_truncated());
        assert_eq!(msg.payload().len(), 40);
        assert!(msg.payload().ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let msg = LogMessage::builder(MessageType::Info, "é".repeat(50))
            .max_payload_bytes(21)
            .build();
        assert!(msg.payload().len() <= 21);
        assert!(msg.payload().ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn timestamp_conversions() {
        let ts = Timestamp::from_micros(1_700_000_000_123_456);
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.micros, 123_456);
        assert_eq!(ts.as_millis(), 1_700_000_000_123);
        assert_eq!(Timestamp::from_millis(5).millis_until(Timestamp::from_millis(2)), 0);
        assert!(ts.to_string().starts_with("2023-11-14T"));
    }

    #[test]
    fn type_parse_aliases() {
        assert_eq!("warning".parse::<MessageType>().unwrap(), MessageType::Warn);
        assert_eq!("fatal".parse::<MessageType>().unwrap(), MessageType::Critical);
    }

    #[test]
    fn size_accounts_for_strings() {
        let small = LogMessage::builder(MessageType::Info, "a").build();
        let big = LogMessage::builder(MessageType::Info, "a".repeat(1000))
            .component("Cache")
            .build();
        assert!(big.size_bytes() > small.size_bytes() + 999);
    }
}
