//! Configuration snapshots for status reporting and audit.
//!
//! A snapshot records which configuration was in force, where it came from,
//! and a content hash so two running instances can be compared cheaply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sieve_common::Importance;
use std::path::Path;

use crate::resolve::ConfigSource;
use crate::settings::SieveConfig;

/// A frozen snapshot of configuration state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// When this snapshot was taken.
    pub timestamp: DateTime<Utc>,

    pub schema_version: String,

    /// Path the config was loaded from.
    #[serde(default)]
    pub path: Option<String>,

    pub source: String,

    /// SHA-256 of the raw file content, or of the effective config when built
    /// from defaults or an in-memory update.
    pub content_hash: String,

    /// Key configuration values for quick reference.
    pub summary: ConfigSummary,
}

/// Summary of key configuration values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub min_importance_threshold: Importance,
    pub queue_max_entries: usize,
    pub queue_max_bytes: Option<usize>,
    pub preservation_window_ms: u64,
    pub batch_target: usize,
    pub component_override_count: usize,
    pub function_override_count: usize,
    pub contextual_rule_count: usize,
    pub alert_count: usize,
    pub application_policy_count: usize,
}

impl ConfigSummary {
    pub fn of(cfg: &SieveConfig) -> Self {
        Self {
            min_importance_threshold: cfg.min_importance_threshold,
            queue_max_entries: cfg.queue.max_entries,
            queue_max_bytes: cfg.queue.max_bytes,
            preservation_window_ms: cfg.queue.preservation_window_ms,
            batch_target: cfg.queue.batch_target,
            component_override_count: cfg.importance.component_overrides.len(),
            function_override_count: cfg.importance.function_overrides.len(),
            contextual_rule_count: cfg.importance.contextual_rules.len(),
            alert_count: cfg.alerts.len(),
            application_policy_count: cfg.persistence.applications.len(),
        }
    }
}

impl ConfigSnapshot {
    pub fn new(
        cfg: &SieveConfig,
        path: Option<&Path>,
        source: &ConfigSource,
        raw: Option<&str>,
    ) -> Self {
        let content_hash = match raw {
            Some(raw) => hash_content(raw),
            None => hash_content(&cfg.to_json_pretty()),
        };
        ConfigSnapshot {
            timestamp: Utc::now(),
            schema_version: cfg.schema_version.clone(),
            path: path.map(|p| p.display().to_string()),
            source: source.to_string(),
            content_hash,
            summary: ConfigSummary::of(cfg),
        }
    }

    /// Serialize snapshot to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Check if this snapshot matches another (same config).
    pub fn matches(&self, other: &ConfigSnapshot) -> bool {
        self.content_hash == other.content_hash
    }

    /// Get a short identifier for this snapshot (first 12 chars of hash).
    pub fn short_id(&self) -> &str {
        &self.content_hash[..12.min(self.content_hash.len())]
    }
}

/// Hash content with SHA-256 and return hex string.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
