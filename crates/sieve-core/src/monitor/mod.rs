//! Monitoring and adaptation loop.
//!
//! Three activities run on independent intervals:
//! - **collection**: sample resources and pipeline counters, append to the
//!   history, evaluate alerts and anomalies
//! - **health**: fold sink, collection and policy state into a
//!   [`HealthReport`]
//! - **adaptation**: turn the latest snapshot and predictions into
//!   [`AdaptationSignal`]s sent to the signal router
//!
//! Collection failures never stop the loop; see [`scheduler`] for backoff.

pub mod adaptation;
pub mod alerts;
pub mod analysis;
pub mod collector;
pub mod export;
pub mod health;
pub mod history;
pub mod scheduler;

pub use adaptation::{AdaptationEngine, AdaptationState};
pub use alerts::{Alert, AlertCounts, AlertManager, AlertTransport};
pub use analysis::{stress_level, Analyzer, Anomaly, Predictions, TrendReport};
pub use collector::{
    Collector, MetricsSource, PipelineCounters, ProcMetricsSource, ResourceSample,
    ScriptedSource, SinkProbe, SystemSnapshot,
};
pub use export::{parse_duration, ExportFormat};
pub use health::{HealthReport, HealthStatus};
pub use history::MetricsHistory;
pub use scheduler::{Activity, Schedule};

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sieve_common::{Result, SharedClock, Timestamp};
use sieve_config::settings::StressSettings;
use sieve_config::SieveConfig;
use tracing::{debug, info, warn};

use crate::context::LiveContext;
use crate::events::{EventBus, EventKind, SieveEvent};
use crate::logging::event_names;
use crate::manager::QueueManager;
use crate::persistence::PersistenceManager;
use crate::signals::{AdaptationSignal, SignalSender};

/// Longest the monitor thread sleeps before rechecking shutdown.
const MAX_SLEEP: Duration = Duration::from_millis(250);

/// Everything `status` reports about the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub latest: Option<SystemSnapshot>,
    pub samples: usize,
    pub health: Option<HealthReport>,
    pub active_alerts: Vec<Alert>,
    pub alert_counts: AlertCounts,
    pub trends: Vec<TrendReport>,
    pub predictions: Predictions,
    pub recommendations: Vec<String>,
    pub adaptation: AdaptationState,
    pub schedule: Schedule,
}

pub struct Monitor {
    stress: StressSettings,
    clock: SharedClock,
    collector: Collector,
    history: MetricsHistory,
    analyzer: Analyzer,
    alerts: AlertManager,
    adaptation: AdaptationEngine,
    schedule: Mutex<Schedule>,
    health: Mutex<Option<HealthReport>>,
    queues: Arc<QueueManager>,
    persistence: Option<Arc<PersistenceManager>>,
    sinks: Option<Arc<dyn SinkProbe>>,
    live: Option<Arc<LiveContext>>,
    signals: SignalSender,
    events: Arc<EventBus>,
    instance_id: Option<String>,
}

impl Monitor {
    pub fn new(
        config: &SieveConfig,
        clock: SharedClock,
        source: Box<dyn MetricsSource>,
        counters: Arc<PipelineCounters>,
        queues: Arc<QueueManager>,
        signals: SignalSender,
        events: Arc<EventBus>,
    ) -> Self {
        let monitor = &config.monitor;
        Self {
            stress: config.stress.clone(),
            clock,
            collector: Collector::new(source, counters, Arc::clone(&queues), config.stress.clone()),
            history: MetricsHistory::new(monitor.max_samples, monitor.retention_hours),
            analyzer: Analyzer::new(monitor.clone(), config.stress.clone()),
            alerts: AlertManager::new(&config.alerts),
            adaptation: AdaptationEngine::new(
                config.emergency.clone(),
                config.stress.error_rate,
                config.queue.clone(),
                monitor.prediction_horizon_seconds,
            ),
            schedule: Mutex::new(Schedule::from_settings(monitor)),
            health: Mutex::new(None),
            queues,
            persistence: None,
            sinks: None,
            live: None,
            signals,
            events,
            instance_id: None,
        }
    }

    pub fn with_sinks(mut self, sinks: Arc<dyn SinkProbe>) -> Self {
        self.collector = self.collector.with_sinks(Arc::clone(&sinks));
        self.sinks = Some(sinks);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<PersistenceManager>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Publish each snapshot's readings to producers.
    pub fn with_context(mut self, live: Arc<LiveContext>) -> Self {
        self.live = Some(live);
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Swap alert rules. Intervals and bands keep their startup values.
    pub fn reconfigure(&self, config: &SieveConfig) {
        self.alerts.configure(&config.alerts);
    }

    pub fn history(&self) -> &MetricsHistory {
        &self.history
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    pub fn counters(&self) -> &Arc<PipelineCounters> {
        self.collector.counters()
    }

    fn emit(&self, event: SieveEvent) {
        let event = match &self.instance_id {
            Some(id) => event.with_instance_id(id.clone()),
            None => event,
        };
        self.events.emit(event);
    }

    /// One collection cycle: snapshot, history, alerts, anomalies.
    pub fn collect_now(&self) -> Result<SystemSnapshot> {
        let now = self.clock.now();
        let snapshot = self.collector.collect(now)?;
        self.history.push(snapshot.clone());
        if let Some(live) = &self.live {
            live.update_from(&snapshot);
            live.set_emergency(self.queues.is_emergency());
        }

        for alert in self.alerts.evaluate(&snapshot, now) {
            self.emit(
                SieveEvent::new(event_names::ALERT_FIRED, EventKind::Alert)
                    .at(now)
                    .with_detail("alert_id", &alert.id)
                    .with_detail("name", &alert.name)
                    .with_detail("metric", &alert.metric)
                    .with_detail("value", alert.value)
                    .with_detail("threshold", alert.threshold)
                    .with_detail("delivered", alert.delivered),
            );
        }
        for anomaly in self.analyzer.anomalies(&self.history) {
            info!(
                target: event_names::ANOMALY_DETECTED,
                metric = %anomaly.metric,
                value = anomaly.value,
                mean = anomaly.mean,
                std_dev = anomaly.std_dev,
                "anomalous sample"
            );
            self.emit(
                SieveEvent::new(event_names::ANOMALY_DETECTED, EventKind::Health)
                    .at(now)
                    .with_detail("metric", &anomaly.metric)
                    .with_detail("value", anomaly.value)
                    .with_detail("mean", anomaly.mean),
            );
        }
        debug!(
            stress = snapshot.stress,
            queued = snapshot.queued_entries,
            "metrics collected"
        );
        Ok(snapshot)
    }

    pub fn check_health(&self) -> HealthReport {
        let now = self.clock.now();
        let latest = self.history.latest();
        let (collection_failures, collection_backed_off) = {
            let schedule = self.schedule.lock().unwrap_or_else(|e| e.into_inner());
            (
                schedule.collection.consecutive_failures,
                schedule.collection.is_backed_off(),
            )
        };
        let inputs = health::HealthInputs {
            stress: latest.as_ref().map(|s| s.stress),
            stress_warning: self.stress.load.warning,
            queue_fill_percent: latest.as_ref().map_or(0.0, |s| s.queue_fill_percent),
            queue_fill_critical: self.stress.queue_fill.critical,
            emergency: self.queues.is_emergency(),
            sink_count: self.sinks.as_ref().map_or(0, |s| s.sink_count()),
            failed_sinks: self
                .sinks
                .as_ref()
                .map(|s| s.failed_sinks())
                .unwrap_or_default(),
            collection_failures,
            collection_backed_off,
            policy_warnings: self
                .persistence
                .as_ref()
                .map(|p| p.health_warnings())
                .unwrap_or_default(),
        };
        let report = health::assess(&inputs, now);

        let previous = {
            let mut slot = self.health.lock().unwrap_or_else(|e| e.into_inner());
            slot.replace(report.clone())
        };
        let changed = previous
            .map_or(report.status != HealthStatus::Ok, |p| p.status != report.status);
        if changed {
            warn!(
                target: event_names::HEALTH_CHANGED,
                status = %report.status,
                reasons = ?report.reasons,
                "health changed"
            );
            self.emit(
                SieveEvent::new(event_names::HEALTH_CHANGED, EventKind::Health)
                    .at(now)
                    .with_detail("status", report.status)
                    .with_detail("reasons", &report.reasons),
            );
        }
        report
    }

    pub fn last_health(&self) -> Option<HealthReport> {
        self.health.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Evaluate adaptation against the latest snapshot and send the
    /// resulting signals.
    pub fn evaluate_adaptation(&self) -> Vec<AdaptationSignal> {
        let Some(snapshot) = self.history.latest() else {
            return Vec::new();
        };
        let now = self.clock.now();
        self.adaptation.sync_emergency(self.queues.is_emergency(), now);
        let predictions = self.analyzer.predictions(&self.history);
        let signals = self.adaptation.evaluate(&snapshot, &predictions, now);
        for signal in &signals {
            info!(
                target: event_names::SIGNAL_EMITTED,
                kind = %signal.kind,
                magnitude = signal.magnitude,
                rationale = %signal.rationale,
                "adaptation signal"
            );
            self.emit(
                SieveEvent::new(event_names::SIGNAL_EMITTED, EventKind::Signal)
                    .at(now)
                    .with_detail("kind", signal.kind)
                    .with_detail("target", signal.target)
                    .with_detail("magnitude", signal.magnitude)
                    .with_detail("rationale", &signal.rationale),
            );
            if !self.signals.send(signal.clone()) {
                debug!(kind = %signal.kind, "signal router gone");
            }
        }
        signals
    }

    /// Run every activity that is due. Returns the activities that ran.
    pub fn run_due(&self) -> Vec<Activity> {
        let now = self.clock.now();
        let due = self
            .schedule
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .due(now);
        for activity in &due {
            let outcome = match activity {
                Activity::Collection => self.collect_now().map(|_| ()),
                Activity::Health => {
                    self.check_health();
                    Ok(())
                }
                Activity::Adaptation => {
                    self.evaluate_adaptation();
                    Ok(())
                }
            };
            let mut schedule = self.schedule.lock().unwrap_or_else(|e| e.into_inner());
            let timer = schedule.timer_mut(*activity);
            match outcome {
                Ok(()) => {
                    timer.record_success(now);
                }
                Err(e) => timer.record_failure(now, &e.to_string()),
            }
        }
        due
    }

    pub fn next_wakeup(&self) -> Duration {
        self.schedule
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .next_wakeup(self.clock.now())
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn acknowledge_alert(&self, id: &str) -> Result<Alert> {
        self.alerts.acknowledge(id, self.clock.now())
    }

    /// Write snapshots from the last `since` to `out`.
    pub fn export<W: Write>(
        &self,
        since: chrono::Duration,
        format: ExportFormat,
        out: &mut W,
    ) -> Result<usize> {
        let now = self.clock.now().as_millis();
        let from = Timestamp::from_millis(now.saturating_sub(since.num_milliseconds()));
        let samples = self.history.since(from);
        export::write_snapshots(&samples, format, out)?;
        Ok(samples.len())
    }

    pub fn status(&self) -> MonitorStatus {
        let trends = analysis::WATCHED_METRICS
            .iter()
            .map(|m| self.analyzer.trend(&self.history, m))
            .collect();
        MonitorStatus {
            latest: self.history.latest(),
            samples: self.history.len(),
            health: self.last_health(),
            active_alerts: self.alerts.active_alerts(),
            alert_counts: self.alerts.counts(),
            trends,
            predictions: self.analyzer.predictions(&self.history),
            recommendations: self.analyzer.recommendations(&self.history),
            adaptation: self.adaptation.state(),
            schedule: self.schedule(),
        }
    }

    /// Run the activity loop on a dedicated thread until `shutdown` is set.
    pub fn spawn(self: &Arc<Self>, shutdown: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>> {
        let monitor = Arc::clone(self);
        std::thread::Builder::new()
            .name("sieve-monitor".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    monitor.run_due();
                    std::thread::sleep(monitor.next_wakeup().min(MAX_SLEEP));
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{SignalKind, SignalRouter};
    use sieve_common::ManualClock;
    use sieve_config::settings::{AlertSettings, Comparison, QueueSettings, TransportSettings};

    struct Fixture {
        clock: Arc<ManualClock>,
        router: SignalRouter,
        bus: Arc<EventBus>,
        monitor: Monitor,
    }

    fn fixture(config: SieveConfig, source: ScriptedSource) -> Fixture {
        let clock = ManualClock::shared(1_700_000_000_000);
        let shared: SharedClock = clock.clone();
        let queues = Arc::new(QueueManager::new(QueueSettings::plain(100, 0), shared.clone()));
        let router = SignalRouter::new();
        let bus = Arc::new(EventBus::new());
        let monitor = Monitor::new(
            &config,
            shared,
            Box::new(source),
            Arc::new(PipelineCounters::new()),
            queues,
            router.sender(),
            Arc::clone(&bus),
        );
        Fixture {
            clock,
            router,
            bus,
            monitor,
        }
    }

    #[test]
    fn failures_do_not_stop_the_loop() {
        let source = ScriptedSource::new()
            .then_fail("no /proc")
            .then_fail("no /proc")
            .then(ResourceSample {
                cpu_percent: 10.0,
                memory_percent: 10.0,
                network_percent: 0.0,
            });
        let f = fixture(SieveConfig::default(), source);

        assert_eq!(f.monitor.run_due().len(), 3);
        assert!(f.monitor.history().is_empty());

        f.clock.advance_millis(5_000);
        f.monitor.run_due();
        let schedule = f.monitor.schedule();
        assert!(schedule.collection.is_backed_off());
        // Backed off: 5s * 4.
        f.clock.advance_millis(5_000);
        assert!(!f.monitor.run_due().contains(&Activity::Collection));
        f.clock.advance_millis(15_000);
        assert!(f.monitor.run_due().contains(&Activity::Collection));
        assert_eq!(f.monitor.history().len(), 1);
        assert!(!f.monitor.schedule().collection.is_backed_off());
    }

    #[test]
    fn alert_events_reach_subscribers() {
        let mut config = SieveConfig::default();
        config.alerts.insert(
            "cpu".into(),
            AlertSettings {
                metric: "cpu_percent".into(),
                threshold: 50.0,
                comparison: Comparison::Ge,
                cooldown_seconds: 300,
                transport: TransportSettings::Log,
            },
        );
        let f = fixture(config, ScriptedSource::steady(75.0, 10.0));
        let rx = f.bus.subscribe();
        f.monitor.collect_now().unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, event_names::ALERT_FIRED);
        let id = f.monitor.alerts().active_alerts()[0].id.clone();
        assert!(f.monitor.acknowledge_alert(&id).is_ok());
        assert!(f.monitor.acknowledge_alert("alert-999").is_err());
    }

    #[test]
    fn high_stress_signals_emergency() {
        let mut config = SieveConfig::default();
        config.emergency.entry_threshold = 70.0;
        config.emergency.exit_threshold = 50.0;
        let f = fixture(config, ScriptedSource::steady(100.0, 100.0));
        f.monitor.counters().record_message(true);
        let snap = f.monitor.collect_now().unwrap();
        // cpu 35 + memory 25 + errors 15
        assert!((snap.stress - 75.0).abs() < 1e-6, "stress {}", snap.stress);
        let signals = f.monitor.evaluate_adaptation();
        assert!(signals.iter().any(|s| s.kind == SignalKind::EnterEmergency));
        assert!(f.router.dispatch_pending() >= 1);
    }

    #[test]
    fn health_reports_emergency_and_changes_once() {
        let f = fixture(SieveConfig::default(), ScriptedSource::steady(5.0, 5.0));
        let rx = f.bus.subscribe();
        f.monitor.collect_now().unwrap();
        assert_eq!(f.monitor.check_health().status, HealthStatus::Ok);
        assert!(rx.try_recv().is_err());

        f.monitor.queues.enter_emergency(Duration::from_secs(60));
        assert_eq!(f.monitor.check_health().status, HealthStatus::Degraded);
        assert_eq!(f.monitor.check_health().status, HealthStatus::Degraded);
        let changes: Vec<_> = rx
            .try_iter()
            .filter(|e| e.event == event_names::HEALTH_CHANGED)
            .collect();
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn export_window() {
        let f = fixture(SieveConfig::default(), ScriptedSource::steady(5.0, 5.0));
        for _ in 0..4 {
            f.monitor.collect_now().unwrap();
            f.clock.advance_millis(60_000);
        }
        let mut out = Vec::new();
        let n = f
            .monitor
            .export(chrono::Duration::minutes(2), ExportFormat::Csv, &mut out)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 3);
        assert_eq!(f.monitor.status().samples, 4);
    }
}
