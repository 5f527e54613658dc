//! Runtime event emission.
//!
//! Alerts, adaptation signals, emergency transitions and health changes are
//! published as structured events through an in-process bus with any number
//! of subscribers. Each event renders as one JSON line, which is what the
//! `/events` stream and `sieve run --events` deliver.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::{mpsc, Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sieve_common::Timestamp;

pub use crate::logging::event_names;

const RECENT_EVENTS: usize = 256;

/// What an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Lifecycle,
    Alert,
    Signal,
    Emergency,
    Health,
    Queue,
    Sink,
    Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SieveEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, Value>,
}

impl SieveEvent {
    pub fn new(event: impl Into<String>, kind: EventKind) -> Self {
        Self {
            event: event.into(),
            timestamp: Utc::now(),
            kind,
            instance_id: None,
            details: HashMap::new(),
        }
    }

    /// Stamp with a clock reading instead of wall time.
    pub fn at(mut self, ts: Timestamp) -> Self {
        if let Some(dt) = ts.to_datetime() {
            self.timestamp = dt;
        }
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.insert(key.into(), v);
        }
        self
    }

    pub fn to_jsonl(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"error":"serialization_failed","event":"{}"}}"#,
                self.event
            )
        })
    }
}

pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: SieveEvent);
}

/// Broadcast bus. Subscribers that hang up are dropped on the next emit.
/// The most recent events are kept for late readers.
#[derive(Debug, Default)]
pub struct EventBus {
    senders: Mutex<Vec<mpsc::Sender<SieveEvent>>>,
    recent: Mutex<VecDeque<SieveEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<SieveEvent> {
        let (tx, rx) = mpsc::channel();
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn emit(&self, event: SieveEvent) {
        {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            if recent.len() == RECENT_EVENTS {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Up to `n` most recent events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<SieveEvent> {
        let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        let skip = recent.len().saturating_sub(n);
        recent.iter().skip(skip).cloned().collect()
    }
}

impl EventEmitter for EventBus {
    fn emit(&self, event: SieveEvent) {
        EventBus::emit(self, event);
    }
}

/// Writes each event as one JSON line.
pub struct JsonlWriter<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> EventEmitter for JsonlWriter<W> {
    fn emit(&self, event: SieveEvent) {
        let line = event.to_jsonl();
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let _ = writeln!(writer, "{}", line);
        let _ = writer.flush();
    }
}

/// Forward every event received on `rx` to `emitter` until the bus goes
/// away. Runs on its own thread.
pub fn forward(
    rx: mpsc::Receiver<SieveEvent>,
    emitter: Arc<dyn EventEmitter>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("sieve-events".to_string())
        .spawn(move || {
            for event in rx {
                emitter.emit(event);
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_renders_as_one_line() {
        let event = SieveEvent::new(event_names::ALERT_FIRED, EventKind::Alert)
            .with_instance_id("sv-0123456789ab")
            .with_detail("alert_id", "alert-1")
            .at(Timestamp::from_millis(1_700_000_000_000));
        let json = event.to_jsonl();
        assert!(!json.contains('\n'));
        assert!(json.contains(r#""event":"alert.fired""#));
        assert!(json.contains(r#""kind":"alert""#));
        assert!(json.contains("2023-11-14T22:13:20"));
    }

    #[test]
    fn bus_fans_out_and_drops_closed_subscribers() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        drop(b);
        bus.emit(SieveEvent::new(event_names::EMERGENCY_ENTERED, EventKind::Emergency));
        assert_eq!(a.recv().unwrap().event, event_names::EMERGENCY_ENTERED);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn recent_keeps_tail() {
        let bus = EventBus::new();
        for i in 0..5 {
            bus.emit(SieveEvent::new(format!("e{}", i), EventKind::Queue));
        }
        let names: Vec<String> = bus.recent(2).into_iter().map(|e| e.event).collect();
        assert_eq!(names, vec!["e3", "e4"]);
    }

    #[test]
    fn jsonl_writer_appends_lines() {
        let writer = JsonlWriter::new(Vec::new());
        writer.emit(SieveEvent::new("a", EventKind::Health));
        writer.emit(SieveEvent::new("b", EventKind::Health));
        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(out.lines().count(), 2);
    }
}
