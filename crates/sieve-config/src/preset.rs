//! Configuration presets for common deployment scenarios.
//!
//! - Default: the built-in configuration
//! - Production: conservative persistence, larger queues, strict alerts
//! - Development: persist everything, small queues, fast monitoring
//! - HighThroughput: shed early, big batches, generous byte budgets
//! - Diagnostic: keep detail, long preservation, tight trend thresholds

use serde::{Deserialize, Serialize};
use sieve_common::{Importance, MessageType};
use std::collections::BTreeMap;
use std::fmt;

use crate::settings::{AlertSettings, Band, Comparison, SieveConfig, TransportSettings};

/// Available configuration presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresetName {
    Default,
    Production,
    Development,
    HighThroughput,
    Diagnostic,
}

impl PresetName {
    /// All available preset names.
    pub const ALL: &'static [PresetName] = &[
        PresetName::Default,
        PresetName::Production,
        PresetName::Development,
        PresetName::HighThroughput,
        PresetName::Diagnostic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PresetName::Default => "default",
            PresetName::Production => "production",
            PresetName::Development => "development",
            PresetName::HighThroughput => "high-throughput",
            PresetName::Diagnostic => "diagnostic",
        }
    }

    pub fn parse(s: &str) -> Option<PresetName> {
        match s.to_lowercase().as_str() {
            "default" => Some(PresetName::Default),
            "production" | "prod" => Some(PresetName::Production),
            "development" | "dev" => Some(PresetName::Development),
            "high-throughput" | "high_throughput" | "throughput" => {
                Some(PresetName::HighThroughput)
            }
            "diagnostic" | "debug" => Some(PresetName::Diagnostic),
            _ => None,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PresetName::Default => "Built-in defaults",
            PresetName::Production => {
                "Persist MEDIUM and above, large queues, CPU and error alerts"
            }
            PresetName::Development => "Persist everything, small queues, fast monitoring",
            PresetName::HighThroughput => "Persist HIGH and above, big batches, early shedding",
            PresetName::Diagnostic => "Persist LOW and above, long preservation windows",
        }
    }
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PresetName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PresetName::parse(s).ok_or_else(|| format!("unknown preset '{}'", s))
    }
}

/// Build the configuration for a preset.
pub fn get_preset(name: PresetName) -> SieveConfig {
    let mut cfg = SieveConfig::default();
    match name {
        PresetName::Default => {}
        PresetName::Production => {
            cfg.queue.max_entries = 50_000;
            cfg.queue.low_load_max_entries = 50_000;
            cfg.queue.high_load_max_entries = 20_000;
            cfg.queue.reserved = BTreeMap::from([
                (Importance::Critical, 1_000),
                (Importance::High, 500),
            ]);
            cfg.alerts.insert(
                "cpu_saturated".to_string(),
                alert("cpu_percent", 90.0, Comparison::Gt, 300),
            );
            cfg.alerts.insert(
                "error_burst".to_string(),
                alert("error_rate", 20.0, Comparison::Ge, 300),
            );
            cfg.alerts.insert(
                "sink_down".to_string(),
                alert("failed_sinks", 1.0, Comparison::Ge, 600),
            );
        }
        PresetName::Development => {
            cfg.min_importance_threshold = Importance::Low;
            cfg.queue.max_entries = 1_000;
            cfg.queue.low_load_max_entries = 1_000;
            cfg.queue.high_load_max_entries = 500;
            cfg.queue.reserved = BTreeMap::from([(Importance::Critical, 50)]);
            cfg.monitor.collection_interval_seconds = 1;
            cfg.monitor.health_interval_seconds = 5;
            cfg.monitor.adaptation_interval_seconds = 10;
            cfg.monitor.retention_hours = 1;
            cfg.importance
                .type_defaults
                .insert(MessageType::Debug, Importance::Medium);
        }
        PresetName::HighThroughput => {
            cfg.min_importance_threshold = Importance::High;
            cfg.queue.max_entries = 200_000;
            cfg.queue.max_bytes = Some(512 * 1024 * 1024);
            cfg.queue.batch_target = 1_000;
            cfg.queue.low_load_batch_target = 2_000;
            cfg.queue.high_load_batch_target = 500;
            cfg.queue.low_load_max_entries = 200_000;
            cfg.queue.high_load_max_entries = 100_000;
            cfg.sinks.drain_batch = 5_000;
            cfg.stress.load = Band::new(60.0, 85.0);
        }
        PresetName::Diagnostic => {
            cfg.min_importance_threshold = Importance::Low;
            cfg.queue.preservation_window_ms = 300_000;
            cfg.monitor.trend_slope_threshold = 0.05;
            cfg.monitor.anomaly_sigma = 2.5;
            cfg.stress.load = Band::new(85.0, 95.0);
        }
    }
    cfg
}

fn alert(metric: &str, threshold: f64, comparison: Comparison, cooldown: u64) -> AlertSettings {
    AlertSettings {
        metric: metric.to_string(),
        threshold,
        comparison,
        cooldown_seconds: cooldown,
        transport: TransportSettings::Log,
    }
}

/// List all presets with descriptions.
pub fn list_presets() -> Vec<(PresetName, &'static str)> {
    PresetName::ALL
        .iter()
        .map(|p| (*p, p.description()))
        .collect()
}
