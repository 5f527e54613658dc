//! Bounded snapshot history.

use std::collections::VecDeque;
use std::sync::Mutex;

use sieve_common::Timestamp;

use super::collector::SystemSnapshot;

/// Ordered by timestamp, bounded by count and by retention. Every read
/// copies out.
#[derive(Debug)]
pub struct MetricsHistory {
    max_samples: usize,
    retention_ms: u64,
    samples: Mutex<VecDeque<SystemSnapshot>>,
}

impl MetricsHistory {
    pub fn new(max_samples: usize, retention_hours: u64) -> Self {
        Self {
            max_samples: max_samples.max(1),
            retention_ms: retention_hours.saturating_mul(3_600_000),
            samples: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a snapshot and age out anything beyond the bounds. Snapshots
    /// older than the newest held one are ignored.
    pub fn push(&self, snapshot: SystemSnapshot) -> bool {
        let mut samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = samples.back() {
            if snapshot.timestamp < last.timestamp {
                return false;
            }
        }
        let newest = snapshot.timestamp;
        samples.push_back(snapshot);
        while samples.len() > self.max_samples {
            samples.pop_front();
        }
        while samples
            .front()
            .is_some_and(|s| s.timestamp.millis_until(newest) > self.retention_ms)
        {
            samples.pop_front();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn latest(&self) -> Option<SystemSnapshot> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .back()
            .cloned()
    }

    /// Snapshots at or after `from`, oldest first.
    pub fn since(&self, from: Timestamp) -> Vec<SystemSnapshot> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.timestamp >= from)
            .cloned()
            .collect()
    }

    /// The last `n` values of one metric, oldest first.
    pub fn values(&self, metric: &str, n: usize) -> Vec<f64> {
        let samples = self.samples.lock().unwrap_or_else(|e| e.into_inner());
        let skip = samples.len().saturating_sub(n);
        samples
            .iter()
            .skip(skip)
            .filter_map(|s| s.metric(metric))
            .collect()
    }

    pub fn all(&self) -> Vec<SystemSnapshot> {
        self.samples
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn snapshot_at(ms: i64, cpu: f64) -> SystemSnapshot {
        SystemSnapshot {
            timestamp: Timestamp::from_millis(ms),
            cpu_percent: cpu,
            memory_percent: 0.0,
            network_percent: 0.0,
            messages_processed: 0,
            error_count: 0,
            message_rate: 0.0,
            error_rate: 0.0,
            avg_latency_ms: 0.0,
            db_latency_ms: 0.0,
            queued_entries: 0,
            queue_capacity: 0,
            queue_fill_percent: 0.0,
            queue_fill: Default::default(),
            failed_sinks: 0,
            stress: 0.0,
        }
    }

    #[test]
    fn bounded_by_count() {
        let history = MetricsHistory::new(3, 24);
        for i in 0..5 {
            history.push(snapshot_at(i * 1_000, i as f64));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.values("cpu_percent", 10), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn ages_out_by_retention() {
        let history = MetricsHistory::new(100, 1);
        history.push(snapshot_at(0, 1.0));
        history.push(snapshot_at(1_800_000, 2.0));
        history.push(snapshot_at(3_700_000, 3.0));
        assert_eq!(history.len(), 2);
        assert_eq!(history.since(Timestamp::from_millis(2_000_000)).len(), 1);
    }

    #[test]
    fn rejects_out_of_order() {
        let history = MetricsHistory::new(10, 1);
        assert!(history.push(snapshot_at(5_000, 1.0)));
        assert!(!history.push(snapshot_at(4_000, 1.0)));
        assert_eq!(history.latest().unwrap().timestamp.as_millis(), 5_000);
    }
}
