//! Adaptation signals and their delivery.
//!
//! The monitor never holds references to the components it tunes. It sends
//! [`AdaptationSignal`]s into a channel; the [`SignalRouter`] hands each one
//! to every subscribed [`SignalSink`], and each sink decides whether the
//! signal concerns it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sieve_common::Timestamp;
use tracing::{debug, info};

use crate::logging::event_names;

const RECENT_SIGNALS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalKind {
    RaiseThreshold,
    LowerThreshold,
    ShrinkQueue,
    GrowQueue,
    ShrinkBatch,
    GrowBatch,
    EnterEmergency,
    ExitEmergency,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::RaiseThreshold => "RAISE_THRESHOLD",
            SignalKind::LowerThreshold => "LOWER_THRESHOLD",
            SignalKind::ShrinkQueue => "SHRINK_QUEUE",
            SignalKind::GrowQueue => "GROW_QUEUE",
            SignalKind::ShrinkBatch => "SHRINK_BATCH",
            SignalKind::GrowBatch => "GROW_BATCH",
            SignalKind::EnterEmergency => "ENTER_EMERGENCY",
            SignalKind::ExitEmergency => "EXIT_EMERGENCY",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which component a signal is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalTarget {
    /// Every sink that understands the kind.
    #[default]
    Any,
    Resolver,
    Persistence,
    Queues,
}

/// A recommendation from the monitor.
///
/// `magnitude` is in levels for threshold signals, in entries for queue and
/// batch signals (the new absolute size), and in seconds for
/// `ENTER_EMERGENCY`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationSignal {
    pub kind: SignalKind,
    pub magnitude: f64,
    pub rationale: String,
    #[serde(default)]
    pub target: SignalTarget,
    #[serde(default)]
    pub issued_at: Timestamp,
}

impl AdaptationSignal {
    pub fn new(kind: SignalKind, magnitude: f64, rationale: impl Into<String>) -> Self {
        Self {
            kind,
            magnitude,
            rationale: rationale.into(),
            target: SignalTarget::Any,
            issued_at: Timestamp::default(),
        }
    }

    pub fn to(mut self, target: SignalTarget) -> Self {
        self.target = target;
        self
    }

    pub fn at(mut self, ts: Timestamp) -> Self {
        self.issued_at = ts;
        self
    }

    /// True when `target` should act on this signal.
    pub fn is_for(&self, target: SignalTarget) -> bool {
        self.target == SignalTarget::Any || self.target == target
    }

    /// Magnitude as a whole number of levels, at least 1.
    pub fn levels(&self) -> i32 {
        (self.magnitude.round() as i32).max(1)
    }
}

/// Anything that can be tuned by adaptation signals.
pub trait SignalSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Apply the signal; returns true if anything changed.
    fn apply_signal(&self, signal: &AdaptationSignal) -> bool;
}

/// Cloneable send side handed to the monitor.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: Sender<AdaptationSignal>,
}

impl SignalSender {
    /// Queue a signal; false once the router is gone.
    pub fn send(&self, signal: AdaptationSignal) -> bool {
        self.tx.send(signal).is_ok()
    }
}

/// Fans signals out to subscribed sinks.
pub struct SignalRouter {
    tx: Sender<AdaptationSignal>,
    rx: Mutex<Receiver<AdaptationSignal>>,
    sinks: RwLock<Vec<Arc<dyn SignalSink>>>,
    recent: Mutex<VecDeque<AdaptationSignal>>,
    dispatched: AtomicU64,
    applied: AtomicU64,
}

impl Default for SignalRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalRouter {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            sinks: RwLock::new(Vec::new()),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_SIGNALS)),
            dispatched: AtomicU64::new(0),
            applied: AtomicU64::new(0),
        }
    }

    pub fn sender(&self) -> SignalSender {
        SignalSender {
            tx: self.tx.clone(),
        }
    }

    pub fn subscribe(&self, sink: Arc<dyn SignalSink>) {
        self.sinks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(sink);
    }

    /// Deliver one signal synchronously. Returns how many sinks changed.
    pub fn dispatch(&self, signal: &AdaptationSignal) -> usize {
        let sinks = self
            .sinks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut changed = 0;
        for sink in &sinks {
            if sink.apply_signal(signal) {
                changed += 1;
                info!(
                    target: event_names::SIGNAL_APPLIED,
                    sink = sink.name(),
                    kind = %signal.kind,
                    magnitude = signal.magnitude,
                    rationale = %signal.rationale,
                    "adaptation signal applied"
                );
            }
        }
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.applied.fetch_add(changed as u64, Ordering::Relaxed);

        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        if recent.len() == RECENT_SIGNALS {
            recent.pop_front();
        }
        recent.push_back(signal.clone());
        changed
    }

    /// Deliver everything already queued. Returns the number of signals.
    pub fn dispatch_pending(&self) -> usize {
        let pending: Vec<AdaptationSignal> = {
            let rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
            rx.try_iter().collect()
        };
        for signal in &pending {
            self.dispatch(signal);
        }
        pending.len()
    }

    /// Most recent signals, oldest first.
    pub fn recent(&self) -> Vec<AdaptationSignal> {
        self.recent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Run delivery on a dedicated thread until `shutdown` is set.
    pub fn spawn(self: &Arc<Self>, shutdown: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        let router = Arc::clone(self);
        std::thread::Builder::new()
            .name("sieve-signals".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    let next = {
                        let rx = router.rx.lock().unwrap_or_else(|e| e.into_inner());
                        rx.recv_timeout(Duration::from_millis(100))
                    };
                    match next {
                        Ok(signal) => {
                            router.dispatch(&signal);
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("signal router stopped");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        target: SignalTarget,
        seen: AtomicUsize,
    }

    impl SignalSink for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn apply_signal(&self, signal: &AdaptationSignal) -> bool {
            if !signal.is_for(self.target) {
                return false;
            }
            self.seen.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn counting(target: SignalTarget) -> Arc<Counting> {
        Arc::new(Counting {
            target,
            seen: AtomicUsize::new(0),
        })
    }

    #[test]
    fn serde_names_are_screaming() {
        let s = AdaptationSignal::new(SignalKind::RaiseThreshold, 1.0, "load");
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"RAISE_THRESHOLD\""));
        assert_eq!(SignalKind::EnterEmergency.to_string(), "ENTER_EMERGENCY");
    }

    #[test]
    fn targeted_signals_reach_only_their_sink() {
        let router = SignalRouter::new();
        let resolver = counting(SignalTarget::Resolver);
        let queues = counting(SignalTarget::Queues);
        router.subscribe(resolver.clone());
        router.subscribe(queues.clone());

        let sender = router.sender();
        assert!(sender.send(
            AdaptationSignal::new(SignalKind::LowerThreshold, 1.0, "errors")
                .to(SignalTarget::Resolver)
        ));
        assert!(sender.send(AdaptationSignal::new(SignalKind::GrowQueue, 5000.0, "calm")));

        assert_eq!(router.dispatch_pending(), 2);
        assert_eq!(resolver.seen.load(Ordering::SeqCst), 2);
        assert_eq!(queues.seen.load(Ordering::SeqCst), 1);
        assert_eq!(router.dispatched_count(), 2);
        assert_eq!(router.applied_count(), 3);
        assert_eq!(router.recent().len(), 2);
    }

    #[test]
    fn levels_round_and_floor_at_one() {
        assert_eq!(AdaptationSignal::new(SignalKind::RaiseThreshold, 0.2, "").levels(), 1);
        assert_eq!(AdaptationSignal::new(SignalKind::RaiseThreshold, 2.4, "").levels(), 2);
    }

    #[test]
    fn spawned_router_delivers_and_stops() {
        let router = Arc::new(SignalRouter::new());
        let sink = counting(SignalTarget::Any);
        router.subscribe(sink.clone());
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = router.spawn(shutdown.clone()).unwrap();

        router
            .sender()
            .send(AdaptationSignal::new(SignalKind::ExitEmergency, 0.0, "recovered"));
        for _ in 0..50 {
            if sink.seen.load(Ordering::SeqCst) == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert_eq!(sink.seen.load(Ordering::SeqCst), 1);
    }
}
