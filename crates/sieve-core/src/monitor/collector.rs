//! Metric collection: resource gauges plus pipeline counters.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sieve_common::{Error, Result, Timestamp};
use sieve_config::settings::StressSettings;

use super::analysis::stress_level;
use crate::manager::QueueManager;

/// Assumed link capacity when turning byte counts into a percentage.
pub const DEFAULT_LINK_BYTES_PER_SEC: f64 = 125_000_000.0;

/// One periodic record of system and pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub timestamp: Timestamp,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub network_percent: f64,
    pub messages_processed: u64,
    pub error_count: u64,
    /// Messages per second since the previous snapshot.
    pub message_rate: f64,
    /// Percent of messages since the previous snapshot at ERROR or above.
    pub error_rate: f64,
    pub avg_latency_ms: f64,
    pub db_latency_ms: f64,
    pub queued_entries: usize,
    pub queue_capacity: usize,
    pub queue_fill_percent: f64,
    /// Fill fraction per queue.
    pub queue_fill: BTreeMap<String, f64>,
    pub failed_sinks: usize,
    pub stress: f64,
}

impl SystemSnapshot {
    /// Value of a named metric, as referenced by alert rules.
    pub fn metric(&self, name: &str) -> Option<f64> {
        let v = match name {
            "cpu_percent" => self.cpu_percent,
            "memory_percent" => self.memory_percent,
            "network_percent" => self.network_percent,
            "error_rate" => self.error_rate,
            "message_rate" => self.message_rate,
            "queue_fill_percent" => self.queue_fill_percent,
            "stress" => self.stress,
            "avg_latency_ms" => self.avg_latency_ms,
            "db_latency_ms" => self.db_latency_ms,
            "messages_processed" => self.messages_processed as f64,
            "error_count" => self.error_count as f64,
            "failed_sinks" => self.failed_sinks as f64,
            _ => return None,
        };
        Some(v)
    }
}

/// Resource gauges from the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub network_percent: f64,
}

pub trait MetricsSource: Send {
    fn sample(&mut self) -> Result<ResourceSample>;
}

/// Which sinks are currently failed; implemented by the sink registry.
pub trait SinkProbe: Send + Sync {
    fn failed_sinks(&self) -> Vec<String>;
    fn sink_count(&self) -> usize;
}

// ---------------------------------------------------------------------------
// /proc source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

/// Parse the aggregate `cpu` line of `/proc/stat` content.
pub fn parse_proc_stat_content(content: &str) -> Option<CpuTimes> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse().ok())
        .collect::<Option<Vec<u64>>>()?;
    if fields.len() < 4 {
        return None;
    }
    let total: u64 = fields.iter().sum();
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

/// Used memory as a percent of `MemTotal`, from `/proc/meminfo` content.
pub fn parse_meminfo_content(content: &str) -> Option<f64> {
    let mut total = None;
    let mut available = None;
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total = parts.next().and_then(|v| v.parse::<f64>().ok()),
            Some("MemAvailable:") => available = parts.next().and_then(|v| v.parse::<f64>().ok()),
            _ => {}
        }
    }
    let total = total.filter(|t| *t > 0.0)?;
    let available = available?;
    Some(((total - available) / total * 100.0).clamp(0.0, 100.0))
}

/// Received plus transmitted bytes over all non-loopback interfaces, from
/// `/proc/net/dev` content.
pub fn parse_net_dev_content(content: &str) -> Option<u64> {
    let mut total = 0u64;
    let mut seen = false;
    for line in content.lines().skip(2) {
        let Some((iface, rest)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        let rx: u64 = fields[0].parse().ok()?;
        let tx: u64 = fields[8].parse().ok()?;
        total = total.saturating_add(rx).saturating_add(tx);
        seen = true;
    }
    seen.then_some(total)
}

/// Reads `/proc` (or a directory laid out like it).
#[derive(Debug)]
pub struct ProcMetricsSource {
    root: PathBuf,
    link_bytes_per_sec: f64,
    prev_cpu: Option<CpuTimes>,
    prev_net: Option<(u64, Instant)>,
}

impl Default for ProcMetricsSource {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcMetricsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            link_bytes_per_sec: DEFAULT_LINK_BYTES_PER_SEC,
            prev_cpu: None,
            prev_net: None,
        }
    }

    pub fn with_link_bytes_per_sec(mut self, bytes: f64) -> Self {
        self.link_bytes_per_sec = bytes.max(1.0);
        self
    }

    fn read(&self, file: &str) -> Result<String> {
        let path = self.root.join(file);
        fs::read_to_string(&path).map_err(|e| {
            Error::MonitorCollection(format!("reading {}: {}", path.display(), e))
        })
    }
}

impl MetricsSource for ProcMetricsSource {
    fn sample(&mut self) -> Result<ResourceSample> {
        let cpu = parse_proc_stat_content(&self.read("stat")?)
            .ok_or_else(|| Error::MonitorCollection("unparseable stat".to_string()))?;
        let memory_percent = parse_meminfo_content(&self.read("meminfo")?)
            .ok_or_else(|| Error::MonitorCollection("unparseable meminfo".to_string()))?;

        let cpu_percent = match self.prev_cpu.replace(cpu) {
            Some(prev) if cpu.total > prev.total => {
                let busy = cpu.busy.saturating_sub(prev.busy) as f64;
                busy / (cpu.total - prev.total) as f64 * 100.0
            }
            _ if cpu.total > 0 => cpu.busy as f64 / cpu.total as f64 * 100.0,
            _ => 0.0,
        };

        // Network is best effort; containers often lack it.
        let now = Instant::now();
        let network_percent = match self
            .read("net/dev")
            .ok()
            .and_then(|c| parse_net_dev_content(&c))
        {
            Some(bytes) => {
                let pct = match self.prev_net {
                    Some((prev, at)) => {
                        let secs = now.duration_since(at).as_secs_f64();
                        if secs > 0.0 {
                            bytes.saturating_sub(prev) as f64 / secs / self.link_bytes_per_sec
                                * 100.0
                        } else {
                            0.0
                        }
                    }
                    None => 0.0,
                };
                self.prev_net = Some((bytes, now));
                pct
            }
            None => 0.0,
        };

        Ok(ResourceSample {
            cpu_percent: cpu_percent.clamp(0.0, 100.0),
            memory_percent,
            network_percent: network_percent.clamp(0.0, 100.0),
        })
    }
}

/// Replays a fixed sequence of samples and failures, then repeats the last
/// successful sample.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    script: VecDeque<std::result::Result<ResourceSample, String>>,
    last: ResourceSample,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, sample: ResourceSample) -> Self {
        self.script.push_back(Ok(sample));
        self
    }

    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.script.push_back(Err(message.into()));
        self
    }

    /// A constant source.
    pub fn steady(cpu: f64, memory: f64) -> Self {
        Self::new().then(ResourceSample {
            cpu_percent: cpu,
            memory_percent: memory,
            network_percent: 0.0,
        })
    }
}

impl MetricsSource for ScriptedSource {
    fn sample(&mut self) -> Result<ResourceSample> {
        match self.script.pop_front() {
            Some(Ok(sample)) => {
                self.last = sample;
                Ok(sample)
            }
            Some(Err(message)) => Err(Error::MonitorCollection(message)),
            None => Ok(self.last),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline counters
// ---------------------------------------------------------------------------

/// Counters fed by producers and drain workers.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    messages: AtomicU64,
    errors: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    db_latency_total_ms: AtomicU64,
    db_latency_samples: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineTotals {
    pub messages: u64,
    pub errors: u64,
    pub latency_total_ms: u64,
    pub latency_samples: u64,
    pub db_latency_total_ms: u64,
    pub db_latency_samples: u64,
}

impl PipelineCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self, is_error: bool) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Time from enqueue to handoff.
    pub fn record_latency(&self, ms: u64) {
        self.latency_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Time a sink took to accept a batch.
    pub fn record_sink_latency(&self, ms: u64) {
        self.db_latency_total_ms.fetch_add(ms, Ordering::Relaxed);
        self.db_latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn totals(&self) -> PipelineTotals {
        PipelineTotals {
            messages: self.messages.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            latency_total_ms: self.latency_total_ms.load(Ordering::Relaxed),
            latency_samples: self.latency_samples.load(Ordering::Relaxed),
            db_latency_total_ms: self.db_latency_total_ms.load(Ordering::Relaxed),
            db_latency_samples: self.db_latency_samples.load(Ordering::Relaxed),
        }
    }
}

fn average(total: u64, samples: u64) -> f64 {
    if samples == 0 {
        0.0
    } else {
        total as f64 / samples as f64
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

pub struct Collector {
    source: Mutex<Box<dyn MetricsSource>>,
    counters: Arc<PipelineCounters>,
    queues: Arc<QueueManager>,
    sinks: Option<Arc<dyn SinkProbe>>,
    stress: StressSettings,
    previous: Mutex<Option<(Timestamp, PipelineTotals)>>,
}

impl Collector {
    pub fn new(
        source: Box<dyn MetricsSource>,
        counters: Arc<PipelineCounters>,
        queues: Arc<QueueManager>,
        stress: StressSettings,
    ) -> Self {
        Self {
            source: Mutex::new(source),
            counters,
            queues,
            sinks: None,
            stress,
            previous: Mutex::new(None),
        }
    }

    pub fn with_sinks(mut self, sinks: Arc<dyn SinkProbe>) -> Self {
        self.sinks = Some(sinks);
        self
    }

    pub fn counters(&self) -> &Arc<PipelineCounters> {
        &self.counters
    }

    /// Take one snapshot. Rates are computed against the previous
    /// successful snapshot.
    pub fn collect(&self, now: Timestamp) -> Result<SystemSnapshot> {
        let resources = self
            .source
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .sample()?;
        let totals = self.counters.totals();

        let (message_rate, error_rate, latency, db_latency) = {
            let mut prev = self.previous.lock().unwrap_or_else(|e| e.into_inner());
            let base = prev.map(|(_, t)| t).unwrap_or_default();
            let secs = prev
                .map(|(at, _)| at.millis_until(now) as f64 / 1_000.0)
                .unwrap_or(0.0);
            let messages = totals.messages.saturating_sub(base.messages);
            let errors = totals.errors.saturating_sub(base.errors);
            let rate = if secs > 0.0 { messages as f64 / secs } else { 0.0 };
            let error_rate = if messages > 0 {
                errors as f64 * 100.0 / messages as f64
            } else {
                0.0
            };
            let latency = average(
                totals.latency_total_ms.saturating_sub(base.latency_total_ms),
                totals.latency_samples.saturating_sub(base.latency_samples),
            );
            let db_latency = average(
                totals.db_latency_total_ms.saturating_sub(base.db_latency_total_ms),
                totals.db_latency_samples.saturating_sub(base.db_latency_samples),
            );
            *prev = Some((now, totals));
            (rate, error_rate, latency, db_latency)
        };

        let queues = self.queues.all();
        let queued_entries: usize = queues.iter().map(|q| q.size()).sum();
        let queue_capacity: usize = queues.iter().map(|q| q.capacity()).sum();
        let queue_fill_percent = if queue_capacity == 0 {
            0.0
        } else {
            queued_entries as f64 * 100.0 / queue_capacity as f64
        };
        let queue_fill = queues
            .iter()
            .map(|q| (q.key().to_string(), q.fill_fraction()))
            .collect();
        let failed_sinks = self
            .sinks
            .as_ref()
            .map(|s| s.failed_sinks().len())
            .unwrap_or(0);

        let mut snapshot = SystemSnapshot {
            timestamp: now,
            cpu_percent: resources.cpu_percent,
            memory_percent: resources.memory_percent,
            network_percent: resources.network_percent,
            messages_processed: totals.messages,
            error_count: totals.errors,
            message_rate,
            error_rate,
            avg_latency_ms: latency,
            db_latency_ms: db_latency,
            queued_entries,
            queue_capacity,
            queue_fill_percent,
            queue_fill,
            failed_sinks,
            stress: 0.0,
        };
        snapshot.stress = stress_level(&snapshot, &self.stress);
        Ok(snapshot)
    }
}
