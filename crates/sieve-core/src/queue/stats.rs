//! Per-queue statistics.
//!
//! Counters live inside the queue state and are updated under the queue
//! lock; [`QueueStats`] is a copied-out view.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sieve_common::Importance;
use sieve_config::settings::EvictionStep;

/// Why an entry left the queue without being drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// TTL passed.
    Expired,
    /// Lowest-priority non-preserved entry.
    LowestPriority,
    /// Preservation window had passed.
    LapsedPreservation,
    /// Preserved entry taken under emergency, or emergency cleanup.
    Emergency,
}

impl EvictionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionReason::Expired => "expired",
            EvictionReason::LowestPriority => "lowest_priority",
            EvictionReason::LapsedPreservation => "lapsed_preservation",
            EvictionReason::Emergency => "emergency",
        }
    }
}

impl From<EvictionStep> for EvictionReason {
    fn from(step: EvictionStep) -> Self {
        match step {
            EvictionStep::Expired => EvictionReason::Expired,
            EvictionStep::LowestPriority => EvictionReason::LowestPriority,
            EvictionStep::LapsedPreservation => EvictionReason::LapsedPreservation,
            EvictionStep::PreservedUnderEmergency => EvictionReason::Emergency,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionCounts {
    pub expired: u64,
    pub lowest_priority: u64,
    pub lapsed_preservation: u64,
    pub emergency: u64,
}

impl EvictionCounts {
    pub fn record(&mut self, reason: EvictionReason, n: u64) {
        match reason {
            EvictionReason::Expired => self.expired += n,
            EvictionReason::LowestPriority => self.lowest_priority += n,
            EvictionReason::LapsedPreservation => self.lapsed_preservation += n,
            EvictionReason::Emergency => self.emergency += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.expired + self.lowest_priority + self.lapsed_preservation + self.emergency
    }
}

/// Running counters kept under the queue lock.
#[derive(Debug, Clone, Default)]
pub(crate) struct Counters {
    pub enqueued: u64,
    pub drained: u64,
    pub evicted: EvictionCounts,
    pub dropped_by_policy: u64,
    pub rejected: u64,
    pub transferred_in: u64,
    pub transferred_out: u64,
    pub peak_size: usize,
    pub peak_bytes: usize,
    pub latency_total_ms: u64,
}

impl Counters {
    pub fn observe_peak(&mut self, size: usize, bytes: usize) {
        self.peak_size = self.peak_size.max(size);
        self.peak_bytes = self.peak_bytes.max(bytes);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.drained == 0 {
            0.0
        } else {
            self.latency_total_ms as f64 / self.drained as f64
        }
    }
}

/// Snapshot of one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue: String,
    pub size: usize,
    pub bytes: usize,
    pub capacity: usize,
    pub max_bytes: Option<usize>,
    pub batch_target: usize,
    pub emergency: bool,
    pub preserved: usize,
    pub enqueued: u64,
    pub drained: u64,
    pub evicted: EvictionCounts,
    pub dropped_by_policy: u64,
    pub rejected: u64,
    pub transferred_in: u64,
    pub transferred_out: u64,
    pub peak_size: usize,
    pub peak_bytes: usize,
    pub avg_latency_ms: f64,
    pub by_importance: BTreeMap<Importance, usize>,
}

impl QueueStats {
    pub fn fill_percent(&self) -> f64 {
        if self.capacity == 0 {
            100.0
        } else {
            self.size as f64 * 100.0 / self.capacity as f64
        }
    }

    /// Every admitted entry is accounted for exactly once.
    pub fn is_balanced(&self) -> bool {
        self.enqueued + self.transferred_in
            == self.drained
                + self.evicted.total()
                + self.dropped_by_policy
                + self.transferred_out
                + self.size as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_counts_total() {
        let mut c = EvictionCounts::default();
        c.record(EvictionReason::Expired, 2);
        c.record(EvictionReason::Emergency, 1);
        c.record(EvictionReason::from(EvictionStep::LowestPriority), 3);
        assert_eq!(c.total(), 6);
        assert_eq!(c.lowest_priority, 3);
    }

    #[test]
    fn latency_average_handles_zero() {
        let mut c = Counters::default();
        assert_eq!(c.avg_latency_ms(), 0.0);
        c.drained = 4;
        c.latency_total_ms = 100;
        assert_eq!(c.avg_latency_ms(), 25.0);
    }
}
