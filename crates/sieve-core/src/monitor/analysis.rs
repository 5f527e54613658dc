//! Stress scoring, trends, anomalies and predictions over the history.

use serde::{Deserialize, Serialize};
use sieve_config::settings::{Band, MonitorSettings, StressSettings};
use sieve_math::{
    classify_slope, is_anomalous, least_squares_slope, time_to_exhaustion, RunningStats,
    TrendDirection,
};

use super::collector::SystemSnapshot;
use super::history::MetricsHistory;

/// Metrics checked for anomalies on every evaluation.
pub const WATCHED_METRICS: &[&str] = &[
    "cpu_percent",
    "memory_percent",
    "error_rate",
    "message_rate",
    "avg_latency_ms",
    "db_latency_ms",
    "queue_fill_percent",
];

fn normalized(value: f64, band: &Band) -> f64 {
    let scale = if band.critical > 0.0 { band.critical } else { 100.0 };
    (value.max(0.0) / scale * 100.0).min(100.0)
}

/// Weighted sum of cpu, memory, queue fill and error rate, each normalised
/// so its critical level maps to 100. Saturates at 100.
pub fn stress_level(snapshot: &SystemSnapshot, settings: &StressSettings) -> f64 {
    let w = settings.weights;
    let total_weight = w.cpu + w.memory + w.queue_fill + w.error_rate;
    if total_weight.is_nan() || total_weight <= 0.0 {
        return 0.0;
    }
    let sum = w.cpu * normalized(snapshot.cpu_percent, &settings.cpu)
        + w.memory * normalized(snapshot.memory_percent, &settings.memory)
        + w.queue_fill * normalized(snapshot.queue_fill_percent, &settings.queue_fill)
        + w.error_rate * normalized(snapshot.error_rate, &settings.error_rate);
    (sum / total_weight).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub metric: String,
    pub samples: usize,
    /// Change per sample.
    pub slope: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub metric: String,
    pub value: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Seconds until a resource runs out at the current trend; `None` when it
/// is not growing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub queue_overflow_seconds: Option<f64>,
    pub memory_exhaustion_seconds: Option<f64>,
}

impl Predictions {
    pub fn within(&self, horizon_seconds: f64) -> bool {
        [self.queue_overflow_seconds, self.memory_exhaustion_seconds]
            .iter()
            .flatten()
            .any(|s| *s <= horizon_seconds)
    }
}

#[derive(Debug, Clone)]
pub struct Analyzer {
    settings: MonitorSettings,
    stress: StressSettings,
}

impl Analyzer {
    pub fn new(settings: MonitorSettings, stress: StressSettings) -> Self {
        Self { settings, stress }
    }

    pub fn trend(&self, history: &MetricsHistory, metric: &str) -> TrendReport {
        let values = history.values(metric, self.settings.trend_window.max(2));
        let slope = least_squares_slope(&values);
        TrendReport {
            metric: metric.to_string(),
            samples: values.len(),
            slope,
            direction: classify_slope(slope, self.settings.trend_slope_threshold),
        }
    }

    /// The newest sample of each watched metric tested against the samples
    /// before it.
    pub fn anomalies(&self, history: &MetricsHistory) -> Vec<Anomaly> {
        let mut found = Vec::new();
        for metric in WATCHED_METRICS {
            let mut values = history.values(metric, usize::MAX);
            let Some(current) = values.pop() else {
                continue;
            };
            if is_anomalous(
                &values,
                current,
                self.settings.anomaly_sigma,
                self.settings.anomaly_min_samples,
            ) {
                let stats = RunningStats::from_slice(&values);
                found.push(Anomaly {
                    metric: metric.to_string(),
                    value: current,
                    mean: stats.mean(),
                    std_dev: stats.std_dev(),
                });
            }
        }
        found
    }

    /// Growth per second of `metric` over the trend window.
    fn rate_per_second(&self, history: &MetricsHistory, metric: &str) -> f64 {
        let window = self.settings.trend_window.max(2);
        let samples = history.all();
        let skip = samples.len().saturating_sub(window);
        let tail = &samples[skip..];
        if tail.len() < 2 {
            return 0.0;
        }
        let values: Vec<f64> = tail.iter().filter_map(|s| s.metric(metric)).collect();
        let span_ms = tail[0].timestamp.millis_until(tail[tail.len() - 1].timestamp);
        if span_ms == 0 {
            return 0.0;
        }
        let per_sample_secs = span_ms as f64 / 1_000.0 / (tail.len() - 1) as f64;
        least_squares_slope(&values) / per_sample_secs
    }

    pub fn predictions(&self, history: &MetricsHistory) -> Predictions {
        let Some(latest) = history.latest() else {
            return Predictions::default();
        };
        let finite = |s: f64| s.is_finite().then_some(s);
        Predictions {
            queue_overflow_seconds: finite(time_to_exhaustion(
                100.0,
                latest.queue_fill_percent,
                self.rate_per_second(history, "queue_fill_percent"),
            )),
            memory_exhaustion_seconds: finite(time_to_exhaustion(
                100.0,
                latest.memory_percent,
                self.rate_per_second(history, "memory_percent"),
            )),
        }
    }

    /// Operator-facing suggestions for the current state.
    pub fn recommendations(&self, history: &MetricsHistory) -> Vec<String> {
        let Some(latest) = history.latest() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if self.stress.cpu.level(latest.cpu_percent) == 2 {
            out.push(format!(
                "cpu at {:.0}%: raise the persistence threshold or add drain capacity",
                latest.cpu_percent
            ));
        }
        if self.stress.memory.level(latest.memory_percent) == 2 {
            out.push(format!(
                "memory at {:.0}%: shrink queue capacity",
                latest.memory_percent
            ));
        }
        if self.stress.queue_fill.level(latest.queue_fill_percent) >= 1 {
            out.push(format!(
                "queues {:.0}% full: increase drain batch size or sink throughput",
                latest.queue_fill_percent
            ));
        }
        if self.stress.error_rate.level(latest.error_rate) >= 1 {
            out.push(format!(
                "error rate {:.1}%: lower thresholds to keep diagnostic detail",
                latest.error_rate
            ));
        }
        if latest.failed_sinks > 0 {
            out.push(format!("{} sink(s) failed: check sink health", latest.failed_sinks));
        }
        let predictions = self.predictions(history);
        if let Some(secs) = predictions.queue_overflow_seconds {
            if secs <= self.settings.prediction_horizon_seconds as f64 {
                out.push(format!("queues predicted to overflow in {:.0}s", secs));
            }
        }
        if let Some(secs) = predictions.memory_exhaustion_seconds {
            if secs <= self.settings.prediction_horizon_seconds as f64 {
                out.push(format!("memory predicted to run out in {:.0}s", secs));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::history::tests::snapshot_at;

    fn analyzer() -> Analyzer {
        Analyzer::new(MonitorSettings::default(), StressSettings::default())
    }

    #[test]
    fn stress_saturates() {
        let mut snap = snapshot_at(0, 100.0);
        snap.memory_percent = 100.0;
        snap.queue_fill_percent = 100.0;
        snap.error_rate = 100.0;
        assert_eq!(stress_level(&snap, &StressSettings::default()), 100.0);
        assert_eq!(stress_level(&snapshot_at(0, 0.0), &StressSettings::default()), 0.0);
    }

    #[test]
    fn stress_weights_cpu_most() {
        let settings = StressSettings::default();
        let cpu_only = stress_level(&snapshot_at(0, 90.0), &settings);
        assert!((cpu_only - 35.0).abs() < 1e-9);
    }

    #[test]
    fn empty_history_is_stable_and_quiet() {
        let history = MetricsHistory::new(100, 24);
        let a = analyzer();
        let trend = a.trend(&history, "cpu_percent");
        assert_eq!(trend.direction, TrendDirection::Stable);
        assert_eq!(trend.samples, 0);
        assert!(a.anomalies(&history).is_empty());
        assert_eq!(a.predictions(&history), Predictions::default());
        assert!(a.recommendations(&history).is_empty());
    }

    #[test]
    fn rising_cpu_is_up() {
        let history = MetricsHistory::new(100, 24);
        for i in 0..10 {
            history.push(snapshot_at(i * 5_000, 10.0 + i as f64 * 5.0));
        }
        let trend = analyzer().trend(&history, "cpu_percent");
        assert_eq!(trend.direction, TrendDirection::Up);
        assert!((trend.slope - 5.0).abs() < 1e-9);
    }

    #[test]
    fn spike_is_anomalous_after_min_samples() {
        let history = MetricsHistory::new(100, 24);
        for i in 0..12 {
            history.push(snapshot_at(i * 1_000, 20.0 + (i % 2) as f64));
        }
        history.push(snapshot_at(12_000, 95.0));
        let found = analyzer().anomalies(&history);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metric, "cpu_percent");
        assert_eq!(found[0].value, 95.0);
    }

    #[test]
    fn too_few_samples_never_anomalous() {
        let history = MetricsHistory::new(100, 24);
        for i in 0..5 {
            history.push(snapshot_at(i * 1_000, 20.0));
        }
        history.push(snapshot_at(5_000, 99.0));
        assert!(analyzer().anomalies(&history).is_empty());
    }

    #[test]
    fn growing_queue_predicts_overflow() {
        let history = MetricsHistory::new(100, 24);
        for i in 0..5 {
            let mut s = snapshot_at(i * 10_000, 0.0);
            s.queue_fill_percent = 50.0 + i as f64 * 10.0;
            history.push(s);
        }
        let p = analyzer().predictions(&history);
        // 1%/s from 90%.
        assert!((p.queue_overflow_seconds.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(p.memory_exhaustion_seconds, None);
        assert!(p.within(300.0));
    }
}
