//! The per-process system handle.
//!
//! [`Sieve`] owns one instance of every component and wires them together:
//! resolver, persistence manager, queue manager, monitor, signal router,
//! event bus, sinks and the drain worker. Producers hold an `Arc<Sieve>`;
//! there is no hidden global state here (see [`crate::facade`] for the thin
//! convenience accessor).

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sieve_common::{
    Error, Importance, LogMessage, MessageId, MessageIdGenerator, MessageType, OsProcessInfo,
    PersistenceAction, PersistenceDecision, ProcessInfo, QueueKey, Result, SharedClock,
    SystemClock,
};
use sieve_config::{validate_config, ConfigSnapshot, ConfigSource, SieveConfig};
use tracing::{debug, info, warn};

use crate::context::LiveContext;
use crate::drain::{DrainReport, DrainWorker};
use crate::events::{EventBus, EventKind, SieveEvent};
use crate::logging::{event_names, generate_instance_id};
use crate::manager::{ManagerStats, QueueManager};
use crate::monitor::{
    Alert, ExportFormat, MetricsSource, Monitor, MonitorStatus, PipelineCounters,
    ProcMetricsSource,
};
use crate::persistence::{PersistenceManager, PersistencePolicy, PersistenceStats};
use crate::queue::EntrySummary;
use crate::resolver::ImportanceResolver;
use crate::signals::{AdaptationSignal, SignalRouter};
use crate::sink::{DeadLetterStore, ParquetSink, Sink, SinkRegistry, SinkStatus};

/// Passes `shutdown` gives the drain worker to empty the queues.
const SHUTDOWN_DRAIN_PASSES: usize = 16;

/// Where a submitted message ended up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: MessageId,
    pub importance: Importance,
    pub decision: PersistenceDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueKey>,
    /// Entries evicted to make room.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evicted: Vec<MessageId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStats {
    pub dispatched: u64,
    pub applied: u64,
}

/// Everything `sieve status` reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub instance_id: String,
    pub generated_at: DateTime<Utc>,
    pub config: ConfigSnapshot,
    pub queues: ManagerStats,
    pub persistence: PersistenceStats,
    pub policy_warnings: Vec<String>,
    pub monitor: MonitorStatus,
    pub sinks: Vec<SinkStatus>,
    pub dead_letters: u64,
    pub signals: SignalStats,
    pub recent_signals: Vec<AdaptationSignal>,
}

/// Builds a [`Sieve`] from a validated configuration.
pub struct SieveBuilder {
    config: SieveConfig,
    snapshot: Option<ConfigSnapshot>,
    clock: Option<SharedClock>,
    source: Option<Box<dyn MetricsSource>>,
    process: Option<Box<dyn ProcessInfo>>,
    sinks: Vec<Arc<dyn Sink>>,
    durable: bool,
    instance_id: Option<String>,
}

impl SieveBuilder {
    pub fn new(config: SieveConfig) -> Self {
        Self {
            config,
            snapshot: None,
            clock: None,
            source: None,
            process: None,
            sinks: Vec::new(),
            durable: false,
            instance_id: None,
        }
    }

    /// Snapshot describing where the configuration came from.
    pub fn snapshot(mut self, snapshot: ConfigSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn metrics_source(mut self, source: Box<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn process_info(mut self, process: Box<dyn ProcessInfo>) -> Self {
        self.process = Some(process);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Register the Parquet sink and dead-letter store under the storage
    /// data dir.
    pub fn durable(mut self, on: bool) -> Self {
        self.durable = on;
        self
    }

    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    pub fn build(self) -> Result<Sieve> {
        validate_config(&self.config)?;
        let config = self.config;
        let clock = self.clock.unwrap_or_else(SystemClock::shared);
        let instance_id = self.instance_id.unwrap_or_else(generate_instance_id);
        let snapshot = self.snapshot.unwrap_or_else(|| {
            ConfigSnapshot::new(&config, None, &ConfigSource::BuiltinDefault, None)
        });

        let resolver = Arc::new(ImportanceResolver::with_mapping(config.importance.clone())?);
        let persistence = Arc::new(PersistenceManager::new(PersistencePolicy::from_config(
            &config,
        )));
        let queues = Arc::new(QueueManager::new(config.queue.clone(), clock.clone()));
        let router = Arc::new(SignalRouter::new());
        router.subscribe(resolver.clone());
        router.subscribe(persistence.clone());
        router.subscribe(queues.clone());

        let events = Arc::new(EventBus::new());
        let live = Arc::new(LiveContext::new());
        let counters = Arc::new(PipelineCounters::new());

        let sinks = Arc::new(SinkRegistry::new());
        for sink in self.sinks {
            sinks.register(sink);
        }
        let mut dead_letters = None;
        if self.durable {
            let root = config.storage.resolved_data_dir();
            sinks.register(Arc::new(ParquetSink::new(
                "parquet",
                root.join("records"),
                instance_id.clone(),
                config.storage.batch_rows,
                config.storage.max_string_len,
            )));
            dead_letters = Some(Arc::new(DeadLetterStore::new(
                root.join("dead-letters"),
                instance_id.clone(),
                config.storage.max_string_len,
            )));
        }

        let source = self
            .source
            .unwrap_or_else(|| Box::new(ProcMetricsSource::new("/proc")));
        let monitor = Arc::new(
            Monitor::new(
                &config,
                clock.clone(),
                source,
                counters.clone(),
                queues.clone(),
                router.sender(),
                events.clone(),
            )
            .with_sinks(sinks.clone())
            .with_persistence(persistence.clone())
            .with_context(live.clone())
            .with_instance_id(instance_id.clone()),
        );

        let mut worker = DrainWorker::new(
            config.sinks.clone(),
            clock.clone(),
            queues.clone(),
            persistence.clone(),
            live.clone(),
            sinks.clone(),
            counters.clone(),
            events.clone(),
        );
        if let Some(store) = &dead_letters {
            worker = worker.with_dead_letters(store.clone());
        }

        info!(
            target: event_names::CONFIG_LOADED,
            instance_id = %instance_id,
            source = %snapshot.source,
            hash = %snapshot.content_hash,
            sinks = sinks.len(),
            "sieve assembled"
        );

        Ok(Sieve {
            config: ArcSwap::from_pointee(config),
            snapshot: ArcSwap::from_pointee(snapshot),
            reconfigure_lock: Mutex::new(()),
            clock,
            instance_id,
            ids: MessageIdGenerator::new(),
            process: self.process.unwrap_or_else(|| Box::new(OsProcessInfo)),
            resolver,
            persistence,
            queues,
            router,
            events,
            live,
            counters,
            sinks,
            dead_letters,
            monitor,
            drain: Arc::new(worker),
            shutdown: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
        })
    }
}

pub struct Sieve {
    config: ArcSwap<SieveConfig>,
    snapshot: ArcSwap<ConfigSnapshot>,
    reconfigure_lock: Mutex<()>,
    clock: SharedClock,
    instance_id: String,
    ids: MessageIdGenerator,
    process: Box<dyn ProcessInfo>,
    resolver: Arc<ImportanceResolver>,
    persistence: Arc<PersistenceManager>,
    queues: Arc<QueueManager>,
    router: Arc<SignalRouter>,
    events: Arc<EventBus>,
    live: Arc<LiveContext>,
    counters: Arc<PipelineCounters>,
    sinks: Arc<SinkRegistry>,
    dead_letters: Option<Arc<DeadLetterStore>>,
    monitor: Arc<Monitor>,
    drain: Arc<DrainWorker>,
    shutdown: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Sieve {
    pub fn builder(config: SieveConfig) -> SieveBuilder {
        SieveBuilder::new(config)
    }

    // -----------------------------------------------------------------------
    // Producer path
    // -----------------------------------------------------------------------

    /// Classify, decide and enqueue one message.
    pub fn log(
        &self,
        message_type: MessageType,
        application: &str,
        component: &str,
        function: &str,
        payload: &str,
    ) -> Result<Submission> {
        let message = self
            .message(message_type, application, component, function, payload)
            .build();
        self.submit(message)
    }

    /// Builder for a message stamped with this system's id, clock and
    /// process identity.
    pub fn message(
        &self,
        message_type: MessageType,
        application: &str,
        component: &str,
        function: &str,
        payload: &str,
    ) -> sieve_common::MessageBuilder {
        let max_payload = self.config.load().message.max_payload_bytes;
        LogMessage::builder(message_type, payload)
            .id(self.ids.next_id())
            .timestamp(self.clock.now())
            .application(application)
            .component(component)
            .function(function)
            .process(self.process.process_id(), self.process.thread_id())
            .max_payload_bytes(max_payload)
    }

    /// Route an already-built message through the pipeline.
    pub fn submit(&self, message: LogMessage) -> Result<Submission> {
        let ctx = self.live.context(message.application());
        let importance = self.resolver.resolve(&message, &ctx);
        let decision = self.persistence.decide(&message, importance, &ctx);
        self.counters
            .record_message(message.message_type() >= MessageType::Error);

        let id = message.id();
        let (queue, admission) = self.queues.distribute(message, decision, &ctx)?;
        Ok(Submission {
            id,
            importance,
            decision,
            queue: Some(queue),
            evicted: admission.evicted,
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the signal router, monitor and drain worker threads.
    pub fn start(&self) -> Result<()> {
        let mut threads = self.threads.lock().unwrap_or_else(|e| e.into_inner());
        if !threads.is_empty() {
            return Ok(());
        }
        self.shutdown.store(false, Ordering::SeqCst);
        threads.push(self.router.spawn(self.shutdown.clone())?);
        threads.push(self.monitor.spawn(self.shutdown.clone())?);
        threads.push(self.drain.spawn(self.shutdown.clone())?);
        info!(
            target: event_names::RUN_STARTED,
            instance_id = %self.instance_id,
            "sieve started"
        );
        self.emit(SieveEvent::new(event_names::RUN_STARTED, EventKind::Lifecycle));
        Ok(())
    }

    /// Stop background threads, drain what is left and flush the sinks.
    pub fn shutdown(&self) -> DrainReport {
        self.shutdown.store(true, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = self
            .threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!(target: event_names::INTERNAL_ERROR, "background thread panicked");
            }
        }
        self.router.dispatch_pending();
        let report = self.drain.drain_remaining(SHUTDOWN_DRAIN_PASSES);
        let flush_timeout = Duration::from_millis(self.config.load().sinks.flush_timeout_ms);
        let unfinished = self.sinks.flush_all(flush_timeout);
        info!(
            target: event_names::RUN_FINISHED,
            drained = report.drained,
            dead_lettered = report.dead_lettered,
            unflushed = unfinished.len(),
            "sieve stopped"
        );
        self.emit(
            SieveEvent::new(event_names::RUN_FINISHED, EventKind::Lifecycle)
                .with_detail("drained", report.drained),
        );
        report
    }

    pub fn is_running(&self) -> bool {
        !self
            .threads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Run every due monitor activity and deliver pending signals, inline.
    pub fn tick(&self) {
        self.monitor.run_due();
        self.router.dispatch_pending();
        self.queues.perform_maintenance();
    }

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------

    pub fn config(&self) -> Arc<SieveConfig> {
        self.config.load_full()
    }

    pub fn config_snapshot(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.load_full()
    }

    /// Swap in a new configuration. On any error the previous one stays in
    /// force untouched.
    pub fn reconfigure(&self, next: SieveConfig, snapshot: Option<ConfigSnapshot>) -> Result<()> {
        let _guard = self
            .reconfigure_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        if let Err(e) = validate_config(&next) {
            warn!(target: event_names::CONFIG_REJECTED, error = %e, "configuration rejected");
            return Err(e.into());
        }
        let current = self.persistence.policy();
        let mut policy = PersistencePolicy::from_config(&next);
        policy.offset = current.offset;
        policy.emergency = current.emergency;
        let problems = policy.problems();
        if !problems.is_empty() {
            let summary = problems.join("; ");
            warn!(target: event_names::CONFIG_REJECTED, error = %summary, "configuration rejected");
            return Err(Error::Configuration(summary));
        }
        if let Err(e) = self.resolver.reload_rules(next.importance.clone()) {
            warn!(target: event_names::CONFIG_REJECTED, error = %e, "configuration rejected");
            return Err(e);
        }
        self.persistence.configure(policy)?;
        self.queues.apply_settings(next.queue.clone());
        self.monitor.reconfigure(&next);

        let snapshot = snapshot.unwrap_or_else(|| {
            ConfigSnapshot::new(&next, None, &ConfigSource::BuiltinDefault, None)
        });
        info!(
            target: event_names::CONFIG_SWAPPED,
            hash = %snapshot.content_hash,
            "configuration swapped"
        );
        self.emit(
            SieveEvent::new(event_names::CONFIG_SWAPPED, EventKind::Config)
                .with_detail("hash", &snapshot.content_hash),
        );
        self.snapshot.store(Arc::new(snapshot));
        self.config.store(Arc::new(next));
        Ok(())
    }

    /// Replace the global persistence threshold.
    pub fn set_threshold(&self, min: Importance) -> bool {
        let changed = self.persistence.set_min_threshold(min);
        let mut next = (*self.config.load_full()).clone();
        next.min_importance_threshold = min;
        self.config.store(Arc::new(next));
        if changed {
            self.emit(
                SieveEvent::new(event_names::POLICY_UPDATED, EventKind::Config)
                    .with_detail("min_importance_threshold", min),
            );
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Take up to `count` entries from one queue and hand them to the sinks.
    pub fn drain_queue(
        &self,
        key: &QueueKey,
        count: usize,
    ) -> Result<(Vec<EntrySummary>, DrainReport)> {
        let queue = self
            .queues
            .get(key)
            .ok_or_else(|| Error::not_found("queue", key.to_string()))?;
        if self.sinks.active().is_empty() {
            return Err(Error::SinkTransient {
                sink: "*".to_string(),
                message: "no active sink".to_string(),
            });
        }
        let entries = queue.drain_batch(count);
        let now = self.clock.now();
        let summaries = entries.iter().map(|e| e.summary(now)).collect();
        let report = self.drain.deliver_batch(&entries);
        debug!(queue = %key, drained = report.drained, "operator drain");
        Ok((summaries, report))
    }

    /// Entries at the head of one queue, without removing them.
    pub fn peek_queue(&self, key: &QueueKey, n: usize) -> Result<Vec<EntrySummary>> {
        let queue = self
            .queues
            .get(key)
            .ok_or_else(|| Error::not_found("queue", key.to_string()))?;
        let now = self.clock.now();
        Ok(queue.peek_top(n).iter().map(|e| e.summary(now)).collect())
    }

    pub fn acknowledge_alert(&self, id: &str) -> Result<Alert> {
        self.monitor.acknowledge_alert(id)
    }

    /// Write history samples newer than `since` ago. Returns the row count.
    pub fn export_metrics<W: Write>(
        &self,
        since: chrono::Duration,
        format: ExportFormat,
        out: &mut W,
    ) -> Result<usize> {
        self.monitor.export(since, format, out)
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            instance_id: self.instance_id.clone(),
            generated_at: Utc::now(),
            config: (*self.snapshot.load_full()).clone(),
            queues: self.queues.stats(),
            persistence: self.persistence.stats(),
            policy_warnings: self.persistence.health_warnings(),
            monitor: self.monitor.status(),
            sinks: self.sinks.statuses(),
            dead_letters: self.dead_letters.as_ref().map_or(0, |d| d.count()),
            signals: SignalStats {
                dispatched: self.router.dispatched_count(),
                applied: self.router.applied_count(),
            },
            recent_signals: self.router.recent(),
        }
    }

    /// Remove persisted partitions older than the storage retention.
    pub fn prune_storage(&self) -> Result<usize> {
        let storage = &self.config.load().storage;
        let root = storage.resolved_data_dir().join("records");
        let sink = ParquetSink::new("prune", root, self.instance_id.clone(), 1, 1);
        let pruned = sink
            .prune(storage.retention_days, std::time::SystemTime::now())
            .map_err(|e| Error::Configuration(format!("retention pruning failed: {}", e)))?;
        Ok(pruned.len())
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn resolver(&self) -> &Arc<ImportanceResolver> {
        &self.resolver
    }

    pub fn persistence(&self) -> &Arc<PersistenceManager> {
        &self.persistence
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn router(&self) -> &Arc<SignalRouter> {
        &self.router
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn live_context(&self) -> &Arc<LiveContext> {
        &self.live
    }

    pub fn counters(&self) -> &Arc<PipelineCounters> {
        &self.counters
    }

    pub fn sinks(&self) -> &Arc<SinkRegistry> {
        &self.sinks
    }

    pub fn dead_letters(&self) -> Option<&Arc<DeadLetterStore>> {
        self.dead_letters.as_ref()
    }

    pub fn drain_worker(&self) -> &Arc<DrainWorker> {
        &self.drain
    }

    /// Root of persisted data for this configuration.
    pub fn data_dir(&self) -> PathBuf {
        self.config.load().storage.resolved_data_dir()
    }

    fn emit(&self, event: SieveEvent) {
        self.events.emit(
            event
                .at(self.clock.now())
                .with_instance_id(self.instance_id.clone()),
        );
    }
}

impl Drop for Sieve {
    fn drop(&mut self) {
        if self.is_running() {
            self.shutdown();
        }
    }
}

/// True when a decision means the message will reach a sink if drained.
pub fn is_headed_for_storage(decision: &PersistenceDecision) -> bool {
    matches!(
        decision.action,
        PersistenceAction::Persist | PersistenceAction::EmergencyPreserve
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::ScriptedSource;
    use crate::signals::{SignalKind, SignalSink, SignalTarget};
    use crate::sink::MemorySink;
    use sieve_common::{ManualClock, ReasonCode};
    use sieve_config::settings::QueueSettings;

    fn sieve_with(config: SieveConfig) -> (Sieve, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new("mem"));
        let sieve = Sieve::builder(config)
            .clock(ManualClock::shared(1_700_000_000_000))
            .metrics_source(Box::new(ScriptedSource::steady(10.0, 10.0)))
            .sink(sink.clone())
            .instance_id("test")
            .build()
            .unwrap();
        (sieve, sink)
    }

    #[test]
    fn log_then_drain_reaches_sink() {
        let (sieve, sink) = sieve_with(SieveConfig::default());
        let a = sieve
            .log(MessageType::Error, "billing", "Ledger", "post", "boom")
            .unwrap();
        assert_eq!(a.decision.action, PersistenceAction::Persist);
        assert_eq!(a.queue, Some(QueueKey::default_for("billing")));
        sieve
            .log(MessageType::Info, "billing", "Ledger", "post", "ok")
            .unwrap();

        let report = sieve.drain_worker().drain_remaining(4);
        assert_eq!(report.drained, 2);
        assert_eq!(sink.accepted().len(), 2);
        assert_eq!(sink.accepted()[0].message.payload(), "boom");
    }

    #[test]
    fn ids_are_monotonic() {
        let (sieve, _) = sieve_with(SieveConfig::default());
        let a = sieve.log(MessageType::Warn, "a", "C", "f", "1").unwrap();
        let b = sieve.log(MessageType::Warn, "b", "C", "f", "2").unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn rejected_reconfigure_keeps_old_config() {
        let (sieve, _) = sieve_with(SieveConfig::default());
        let before = sieve.config_snapshot().content_hash.clone();

        let mut bad = SieveConfig::default();
        bad.emergency.exit_threshold = 95.0;
        bad.emergency.entry_threshold = 90.0;
        assert!(sieve.reconfigure(bad, None).is_err());
        assert_eq!(sieve.config_snapshot().content_hash, before);

        let mut good = SieveConfig::default();
        good.queue = QueueSettings::plain(42, 0);
        sieve.reconfigure(good, None).unwrap();
        assert_eq!(sieve.config().queue.max_entries, 42);
        assert_eq!(sieve.queues().template().max_entries, 42);
    }

    #[test]
    fn reconfigure_keeps_adaptive_state() {
        let (sieve, _) = sieve_with(SieveConfig::default());
        let raise = AdaptationSignal::new(SignalKind::RaiseThreshold, 1.0, "load")
            .to(SignalTarget::Resolver);
        assert!(sieve.resolver().apply_signal(&raise));
        assert_eq!(sieve.resolver().baseline_shift(), -1);

        sieve.reconfigure(SieveConfig::default(), None).unwrap();
        assert_eq!(sieve.resolver().baseline_shift(), -1);
    }

    #[test]
    fn set_threshold_changes_decisions() {
        let (sieve, _) = sieve_with(SieveConfig::default());
        assert!(sieve.set_threshold(Importance::Critical));
        let s = sieve.log(MessageType::Warn, "a", "C", "f", "x").unwrap();
        assert_eq!(s.decision.action, PersistenceAction::Drop);
        assert_eq!(s.decision.reason, ReasonCode::BelowThreshold);
        assert!(!is_headed_for_storage(&s.decision));
        assert_eq!(sieve.config().min_importance_threshold, Importance::Critical);
    }

    #[test]
    fn operator_drain_reports_missing_queue() {
        let (sieve, sink) = sieve_with(SieveConfig::default());
        let err = sieve
            .drain_queue(&QueueKey::default_for("nope"), 5)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        sieve.log(MessageType::Error, "app", "C", "f", "x").unwrap();
        let (summaries, report) = sieve.drain_queue(&QueueKey::default_for("app"), 5).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(sink.accepted().len(), 1);
    }

    #[test]
    fn status_collects_every_component() {
        let (sieve, _) = sieve_with(SieveConfig::default());
        sieve.log(MessageType::Info, "app", "C", "f", "x").unwrap();
        sieve.monitor().collect_now().unwrap();
        let status = sieve.status();
        assert_eq!(status.instance_id, "test");
        assert_eq!(status.queues.total_size, 1);
        assert_eq!(status.persistence.evaluated, 1);
        assert_eq!(status.sinks.len(), 1);
        assert!(status.monitor.samples >= 1);
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"instance_id\":\"test\""));
    }
}
