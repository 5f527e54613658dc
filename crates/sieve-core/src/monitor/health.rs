//! Health assessment.

use serde::{Deserialize, Serialize};
use sieve_common::Timestamp;

/// Three-state health, shared by sinks and the system as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Ok,
    Degraded,
    Failed,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: Timestamp,
    pub reasons: Vec<String>,
}

impl HealthReport {
    pub fn ok(checked_at: Timestamp) -> Self {
        Self {
            status: HealthStatus::Ok,
            checked_at,
            reasons: Vec::new(),
        }
    }

    fn raise(&mut self, status: HealthStatus, reason: String) {
        self.status = self.status.max(status);
        self.reasons.push(reason);
    }
}

/// What the health check looks at.
#[derive(Debug, Clone, Default)]
pub struct HealthInputs {
    pub stress: Option<f64>,
    pub stress_warning: f64,
    pub queue_fill_percent: f64,
    pub queue_fill_critical: f64,
    pub emergency: bool,
    pub sink_count: usize,
    pub failed_sinks: Vec<String>,
    pub collection_failures: u32,
    pub collection_backed_off: bool,
    pub policy_warnings: Vec<String>,
}

pub fn assess(inputs: &HealthInputs, now: Timestamp) -> HealthReport {
    let mut report = HealthReport::ok(now);

    if inputs.sink_count > 0 && inputs.failed_sinks.len() >= inputs.sink_count {
        report.raise(HealthStatus::Failed, "all sinks failed".to_string());
    } else if !inputs.failed_sinks.is_empty() {
        report.raise(
            HealthStatus::Degraded,
            format!("sinks failed: {}", inputs.failed_sinks.join(", ")),
        );
    }

    if inputs.collection_backed_off && inputs.stress.is_none() {
        report.raise(
            HealthStatus::Failed,
            format!(
                "metric collection failing ({} consecutive), no samples",
                inputs.collection_failures
            ),
        );
    } else if inputs.collection_failures > 0 {
        report.raise(
            HealthStatus::Degraded,
            format!(
                "metric collection failing ({} consecutive)",
                inputs.collection_failures
            ),
        );
    }

    if inputs.emergency {
        report.raise(HealthStatus::Degraded, "emergency mode active".to_string());
    }
    if let Some(stress) = inputs.stress {
        if stress >= inputs.stress_warning {
            report.raise(HealthStatus::Degraded, format!("stress {:.1}", stress));
        }
    }
    if inputs.queue_fill_critical > 0.0 && inputs.queue_fill_percent >= inputs.queue_fill_critical {
        report.raise(
            HealthStatus::Degraded,
            format!("queues {:.0}% full", inputs.queue_fill_percent),
        );
    }
    for warning in &inputs.policy_warnings {
        report.raise(HealthStatus::Degraded, warning.clone());
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calm() -> HealthInputs {
        HealthInputs {
            stress: Some(10.0),
            stress_warning: 70.0,
            queue_fill_critical: 90.0,
            sink_count: 2,
            ..Default::default()
        }
    }

    #[test]
    fn calm_is_ok() {
        let report = assess(&calm(), Timestamp::from_millis(0));
        assert_eq!(report.status, HealthStatus::Ok);
        assert!(report.reasons.is_empty());
    }

    #[test]
    fn one_failed_sink_degrades_all_failed_fails() {
        let mut inputs = calm();
        inputs.failed_sinks = vec!["jsonl".into()];
        assert_eq!(assess(&inputs, Timestamp::default()).status, HealthStatus::Degraded);
        inputs.failed_sinks.push("parquet".into());
        assert_eq!(assess(&inputs, Timestamp::default()).status, HealthStatus::Failed);
    }

    #[test]
    fn reasons_accumulate() {
        let mut inputs = calm();
        inputs.emergency = true;
        inputs.stress = Some(95.0);
        inputs.policy_warnings = vec!["fallback policy".into()];
        let report = assess(&inputs, Timestamp::default());
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.reasons.len(), 3);
    }

    #[test]
    fn collection_without_samples_fails() {
        let inputs = HealthInputs {
            collection_failures: 3,
            collection_backed_off: true,
            ..Default::default()
        };
        assert_eq!(assess(&inputs, Timestamp::default()).status, HealthStatus::Failed);
    }
}
