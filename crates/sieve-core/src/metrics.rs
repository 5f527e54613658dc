//! Prometheus metrics for a running sieve.
//!
//! Values are refreshed from a [`StatusReport`] right before rendering, so
//! the registry never lags the components it describes.
//!
//! **Gauges (per queue):** `sieve_queue_entries`, `sieve_queue_capacity`,
//! `sieve_queue_evicted`, `sieve_queue_rejected`
//!
//! **Gauges (global):** `sieve_decisions` by action, `sieve_stress`,
//! `sieve_cpu_percent`, `sieve_memory_percent`, `sieve_active_alerts`,
//! `sieve_emergency`, `sieve_sink_up` by sink, `sieve_dead_letters`,
//! `sieve_signals` by stage, `sieve_build_info`

use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::monitor::HealthStatus;
use crate::system::StatusReport;

#[derive(Clone)]
pub struct SieveMetrics {
    pub registry: Registry,

    pub queue_entries: IntGaugeVec,
    pub queue_capacity: IntGaugeVec,
    pub queue_evicted: IntGaugeVec,
    pub queue_rejected: IntGaugeVec,

    pub decisions: IntGaugeVec,
    pub stress: Gauge,
    pub cpu_percent: Gauge,
    pub memory_percent: Gauge,
    pub active_alerts: IntGauge,
    pub emergency: IntGauge,
    pub sink_up: IntGaugeVec,
    pub dead_letters: IntGauge,
    pub signals: IntGaugeVec,
}

impl SieveMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let queue_entries = IntGaugeVec::new(
            Opts::new("sieve_queue_entries", "Entries resident in each queue"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_entries.clone()))?;

        let queue_capacity = IntGaugeVec::new(
            Opts::new("sieve_queue_capacity", "Entry capacity of each queue"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_capacity.clone()))?;

        let queue_evicted = IntGaugeVec::new(
            Opts::new("sieve_queue_evicted", "Entries evicted from each queue since start"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_evicted.clone()))?;

        let queue_rejected = IntGaugeVec::new(
            Opts::new("sieve_queue_rejected", "Admissions rejected by each queue since start"),
            &["queue"],
        )?;
        registry.register(Box::new(queue_rejected.clone()))?;

        let decisions = IntGaugeVec::new(
            Opts::new("sieve_decisions", "Persistence decisions since start by action"),
            &["action"],
        )?;
        registry.register(Box::new(decisions.clone()))?;

        let stress = Gauge::new("sieve_stress", "Composite system stress, 0-100")?;
        registry.register(Box::new(stress.clone()))?;

        let cpu_percent = Gauge::new("sieve_cpu_percent", "Host CPU utilisation")?;
        registry.register(Box::new(cpu_percent.clone()))?;

        let memory_percent = Gauge::new("sieve_memory_percent", "Host memory utilisation")?;
        registry.register(Box::new(memory_percent.clone()))?;

        let active_alerts = IntGauge::new("sieve_active_alerts", "Unacknowledged active alerts")?;
        registry.register(Box::new(active_alerts.clone()))?;

        let emergency = IntGauge::new("sieve_emergency", "1 while emergency mode is active")?;
        registry.register(Box::new(emergency.clone()))?;

        let sink_up = IntGaugeVec::new(
            Opts::new("sieve_sink_up", "1 when the sink is healthy or degraded"),
            &["sink"],
        )?;
        registry.register(Box::new(sink_up.clone()))?;

        let dead_letters = IntGauge::new("sieve_dead_letters", "Entries written to dead letters")?;
        registry.register(Box::new(dead_letters.clone()))?;

        let signals = IntGaugeVec::new(
            Opts::new("sieve_signals", "Adaptation signals since start"),
            &["stage"],
        )?;
        registry.register(Box::new(signals.clone()))?;

        let build_info = IntGauge::with_opts(
            Opts::new("sieve_build_info", "Build information")
                .const_label("version", env!("CARGO_PKG_VERSION")),
        )?;
        build_info.set(1);
        registry.register(Box::new(build_info))?;

        Ok(Self {
            registry,
            queue_entries,
            queue_capacity,
            queue_evicted,
            queue_rejected,
            decisions,
            stress,
            cpu_percent,
            memory_percent,
            active_alerts,
            emergency,
            sink_up,
            dead_letters,
            signals,
        })
    }

    pub fn update_from(&self, status: &StatusReport) {
        self.queue_entries.reset();
        self.queue_capacity.reset();
        self.queue_evicted.reset();
        self.queue_rejected.reset();
        for q in &status.queues.queues {
            let label = [q.queue.as_str()];
            self.queue_entries.with_label_values(&label).set(q.size as i64);
            self.queue_capacity
                .with_label_values(&label)
                .set(q.capacity as i64);
            self.queue_evicted
                .with_label_values(&label)
                .set(q.evicted.total() as i64);
            self.queue_rejected
                .with_label_values(&label)
                .set(q.rejected as i64);
        }

        let p = &status.persistence;
        for (action, n) in [
            ("persist", p.persisted),
            ("queue_only", p.queued_only),
            ("drop", p.dropped),
            ("emergency_preserve", p.emergency_preserved),
        ] {
            self.decisions.with_label_values(&[action]).set(n as i64);
        }

        if let Some(latest) = &status.monitor.latest {
            self.stress.set(latest.stress);
            self.cpu_percent.set(latest.cpu_percent);
            self.memory_percent.set(latest.memory_percent);
        }
        self.active_alerts
            .set(status.monitor.active_alerts.len() as i64);
        self.emergency.set(i64::from(status.queues.emergency));

        self.sink_up.reset();
        for sink in &status.sinks {
            let up = sink.health != HealthStatus::Failed;
            self.sink_up
                .with_label_values(&[sink.name.as_str()])
                .set(i64::from(up));
        }
        self.dead_letters.set(status.dead_letters as i64);
        self.signals
            .with_label_values(&["dispatched"])
            .set(status.signals.dispatched as i64);
        self.signals
            .with_label_values(&["applied"])
            .set(status.signals.applied as i64);
    }

    /// Render in Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
