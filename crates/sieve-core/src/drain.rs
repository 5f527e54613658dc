//! Drain workers: move persistable entries from the queues to the sinks.
//!
//! A pass drains every queue through the persistence policy, releases the
//! queue locks, then submits the batch to each active sink. Rejected entries
//! are retried with exponential backoff. When retries run out, CRITICAL and
//! emergency-preserved entries go to the dead-letter store; the rest are
//! dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sieve_common::{Importance, PersistenceAction, SharedClock};
use sieve_config::settings::SinkSettings;
use tracing::{debug, error, info, warn};

use crate::context::LiveContext;
use crate::events::{EventBus, EventKind, SieveEvent};
use crate::logging::event_names;
use crate::manager::QueueManager;
use crate::monitor::PipelineCounters;
use crate::persistence::PersistenceManager;
use crate::queue::QueueEntry;
use crate::sink::{DeadLetterStore, Sink, SinkError, SinkRegistry};

/// Longest single sleep while waiting, so shutdown is noticed promptly.
const PAUSE_STEP: Duration = Duration::from_millis(50);

/// Delay before retry number `attempt` (1-based).
pub fn backoff_delay(base_ms: u64, ceiling_ms: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    let ms = base_ms.saturating_mul(1u64 << exp).min(ceiling_ms);
    Duration::from_millis(ms)
}

/// Entries that must not be lost silently.
pub fn is_dead_letter_worthy(entry: &QueueEntry) -> bool {
    entry.importance == Importance::Critical
        || entry.decision.action == PersistenceAction::EmergencyPreserve
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Entries taken out of the queues for delivery.
    pub drained: usize,
    /// Accepted entries, summed over sinks.
    pub delivered: usize,
    pub dead_lettered: usize,
    /// Entries given up on after retries.
    pub dropped: usize,
    /// DROP decisions discarded at drain time.
    pub policy_dropped: usize,
    /// QUEUE_ONLY entries left in place.
    pub retained: usize,
}

impl DrainReport {
    fn absorb(&mut self, other: DrainReport) {
        self.drained += other.drained;
        self.delivered += other.delivered;
        self.dead_lettered += other.dead_lettered;
        self.dropped += other.dropped;
        self.policy_dropped += other.policy_dropped;
        self.retained += other.retained;
    }
}

struct Undelivered {
    offset: usize,
    attempts: u32,
    error: SinkError,
}

pub struct DrainWorker {
    settings: SinkSettings,
    clock: SharedClock,
    queues: Arc<QueueManager>,
    persistence: Arc<PersistenceManager>,
    live: Arc<LiveContext>,
    sinks: Arc<SinkRegistry>,
    dead_letters: Option<Arc<DeadLetterStore>>,
    counters: Arc<PipelineCounters>,
    events: Arc<EventBus>,
}

impl DrainWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: SinkSettings,
        clock: SharedClock,
        queues: Arc<QueueManager>,
        persistence: Arc<PersistenceManager>,
        live: Arc<LiveContext>,
        sinks: Arc<SinkRegistry>,
        counters: Arc<PipelineCounters>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            settings,
            clock,
            queues,
            persistence,
            live,
            sinks,
            dead_letters: None,
            counters,
            events,
        }
    }

    pub fn with_dead_letters(mut self, store: Arc<DeadLetterStore>) -> Self {
        self.dead_letters = Some(store);
        self
    }

    pub fn settings(&self) -> &SinkSettings {
        &self.settings
    }

    /// One pass over every queue. Nothing is drained while no sink is active,
    /// so entries stay buffered until one comes back.
    pub fn run_once(&self, shutdown: &AtomicBool) -> DrainReport {
        let mut report = DrainReport::default();
        let sinks = self.sinks.active();
        if sinks.is_empty() {
            return report;
        }

        let ctx = self.live.context("");
        let batches = self.queues.drain_all_for_persistence(
            self.settings.drain_batch.max(1),
            &ctx,
            self.persistence.as_ref(),
        );
        for batch in batches {
            report.policy_dropped += batch.drain.dropped;
            report.retained += batch.drain.retained;
            let entries = batch.drain.persisted;
            if entries.is_empty() {
                continue;
            }
            report.absorb(self.hand_off(&sinks, &entries, shutdown));
            debug!(
                queue = %batch.queue,
                entries = entries.len(),
                sinks = sinks.len(),
                "batch handed to sinks"
            );
        }
        report
    }

    /// Deliver entries already taken out of a queue, e.g. by an operator
    /// drain. Entries are lost if no sink is active.
    pub fn deliver_batch(&self, entries: &[QueueEntry]) -> DrainReport {
        let sinks = self.sinks.active();
        let mut report = self.hand_off(&sinks, entries, &AtomicBool::new(false));
        if sinks.is_empty() {
            report.dropped += entries.len();
        }
        report
    }

    fn hand_off(
        &self,
        sinks: &[Arc<dyn Sink>],
        entries: &[QueueEntry],
        shutdown: &AtomicBool,
    ) -> DrainReport {
        let mut report = DrainReport {
            drained: entries.len(),
            ..DrainReport::default()
        };
        let now = self.clock.now();
        for entry in entries {
            self.counters.record_latency(entry.age_ms(now));
        }
        for sink in sinks {
            report.absorb(self.deliver(sink.as_ref(), entries, shutdown));
        }
        report
    }

    fn deliver(
        &self,
        sink: &dyn Sink,
        entries: &[QueueEntry],
        shutdown: &AtomicBool,
    ) -> DrainReport {
        let mut report = DrainReport::default();
        match self.submit_with_retry(sink, entries, shutdown, &mut report) {
            Ok(()) => report,
            Err(failure) => {
                self.give_up(sink.name(), &entries[failure.offset..], &failure, &mut report);
                report
            }
        }
    }

    fn submit_with_retry(
        &self,
        sink: &dyn Sink,
        entries: &[QueueEntry],
        shutdown: &AtomicBool,
        report: &mut DrainReport,
    ) -> Result<(), Undelivered> {
        let mut offset = 0;
        let mut attempts = 0u32;
        loop {
            let started = Instant::now();
            let outcome = sink.submit(&entries[offset..]);
            self.counters
                .record_sink_latency(started.elapsed().as_millis() as u64);
            attempts += 1;

            let error = match outcome {
                Ok(submitted) => {
                    offset += submitted.accepted.min(entries.len() - offset);
                    report.delivered += submitted.accepted;
                    if offset >= entries.len() {
                        return Ok(());
                    }
                    SinkError::transient(
                        sink.name(),
                        format!("{} of {} entries rejected", entries.len() - offset, entries.len()),
                    )
                }
                Err(e) if e.is_fatal() => {
                    self.sinks.mark_failed(sink.name(), &e);
                    self.events.emit(
                        SieveEvent::new(event_names::SINK_FAILED, EventKind::Sink)
                            .at(self.clock.now())
                            .with_detail("sink", sink.name())
                            .with_detail("error", e.to_string()),
                    );
                    return Err(Undelivered {
                        offset,
                        attempts,
                        error: e,
                    });
                }
                Err(e) => {
                    self.sinks.note_error(sink.name(), &e);
                    e
                }
            };

            if attempts >= self.settings.max_attempts.max(1) || shutdown.load(Ordering::Relaxed) {
                return Err(Undelivered {
                    offset,
                    attempts,
                    error,
                });
            }
            let delay = backoff_delay(
                self.settings.retry_base_ms,
                self.settings.retry_ceiling_ms,
                attempts,
            );
            warn!(
                target: event_names::SINK_RETRY,
                sink = sink.name(),
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                pending = entries.len() - offset,
                error = %error,
                "sink submit failed, retrying"
            );
            if !pause(delay, shutdown) {
                return Err(Undelivered {
                    offset,
                    attempts,
                    error,
                });
            }
        }
    }

    fn give_up(
        &self,
        sink: &str,
        pending: &[QueueEntry],
        failure: &Undelivered,
        report: &mut DrainReport,
    ) {
        let (keep, lose): (Vec<QueueEntry>, Vec<QueueEntry>) =
            pending.iter().cloned().partition(is_dead_letter_worthy);
        let failure_text = failure.error.to_string();

        if !keep.is_empty() {
            let stored = match &self.dead_letters {
                Some(store) => match store.store(&keep, sink, &failure_text, failure.attempts) {
                    Ok(path) => {
                        info!(
                            target: event_names::SINK_DEAD_LETTER,
                            sink = sink,
                            entries = keep.len(),
                            attempts = failure.attempts,
                            path = %path.display(),
                            "critical entries dead-lettered"
                        );
                        true
                    }
                    Err(e) => {
                        error!(
                            target: event_names::INTERNAL_ERROR,
                            sink = sink,
                            entries = keep.len(),
                            error = %e,
                            "dead-letter write failed"
                        );
                        false
                    }
                },
                None => false,
            };
            if stored {
                report.dead_lettered += keep.len();
                self.events.emit(
                    SieveEvent::new(event_names::SINK_DEAD_LETTER, EventKind::Sink)
                        .at(self.clock.now())
                        .with_detail("sink", sink)
                        .with_detail("entries", keep.len())
                        .with_detail("error", &failure_text),
                );
            } else {
                report.dropped += keep.len();
            }
        }

        if !lose.is_empty() {
            report.dropped += lose.len();
            warn!(
                target: event_names::SINK_DROPPED,
                sink = sink,
                entries = lose.len(),
                attempts = failure.attempts,
                error = %failure_text,
                "undeliverable entries dropped"
            );
        }
    }

    /// Drain until the queues have nothing persistable left, or `max_passes`.
    pub fn drain_remaining(&self, max_passes: usize) -> DrainReport {
        let never = AtomicBool::new(false);
        let mut total = DrainReport::default();
        for _ in 0..max_passes {
            let pass = self.run_once(&never);
            total.absorb(pass);
            if pass.drained == 0 {
                break;
            }
        }
        total
    }

    /// Run passes on a dedicated thread until `shutdown` is set, then flush
    /// every sink.
    pub fn spawn(self: &Arc<Self>, shutdown: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        let worker = Arc::clone(self);
        std::thread::Builder::new()
            .name("sieve-drain".to_string())
            .spawn(move || {
                let idle = Duration::from_millis(worker.settings.drain_interval_ms.max(1));
                while !shutdown.load(Ordering::Relaxed) {
                    let pass = worker.run_once(&shutdown);
                    if pass.drained == 0 {
                        pause(idle, &shutdown);
                    }
                }
                let unfinished = worker
                    .sinks
                    .flush_all(Duration::from_millis(worker.settings.flush_timeout_ms));
                if !unfinished.is_empty() {
                    warn!(sinks = ?unfinished, "sinks did not finish flushing");
                }
                debug!("drain worker stopped");
            })
    }
}

/// Sleep up to `total`; false if shutdown was requested meanwhile.
fn pause(total: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(PAUSE_STEP));
    }
}
