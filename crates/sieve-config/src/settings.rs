//! Configuration types for `sieve.toml` / `sieve.json`.
//!
//! Every section and field has a default, so partial files are valid.

use serde::{Deserialize, Serialize};
use sieve_common::{Importance, MessageType, DEFAULT_MAX_PAYLOAD_BYTES};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::mapping::MappingConfig;
use crate::pattern::GlobPattern;
use crate::validate::{ValidationError, ValidationResult};

/// Complete Sieve configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SieveConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Base threshold for persistence.
    #[serde(default)]
    pub min_importance_threshold: Importance,

    #[serde(default)]
    pub message: MessageSettings,

    #[serde(default)]
    pub importance: MappingConfig,

    #[serde(default)]
    pub queue: QueueSettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub alerts: BTreeMap<String, AlertSettings>,

    #[serde(default)]
    pub stress: StressSettings,

    #[serde(default)]
    pub emergency: EmergencySettings,

    #[serde(default)]
    pub sinks: SinkSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub http: HttpSettings,
}

fn default_schema_version() -> String {
    crate::CONFIG_SCHEMA_VERSION.to_string()
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            min_importance_threshold: Importance::Medium,
            message: MessageSettings::default(),
            importance: MappingConfig::default(),
            queue: QueueSettings::default(),
            persistence: PersistenceSettings::default(),
            monitor: MonitorSettings::default(),
            alerts: BTreeMap::new(),
            stress: StressSettings::default(),
            emergency: EmergencySettings::default(),
            sinks: SinkSettings::default(),
            storage: StorageSettings::default(),
            http: HttpSettings::default(),
        }
    }
}

impl SieveConfig {
    /// Load from a `.toml` or `.json` file, chosen by extension.
    pub fn from_file(path: &Path) -> ValidationResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ValidationError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::from_str_for_path(&content, path)
    }

    /// Parse `content` using the format implied by `path`'s extension.
    pub fn from_str_for_path(content: &str, path: &Path) -> ValidationResult<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(content),
            Some("json") | None => Self::from_json_str(content),
            Some(other) => Err(ValidationError::ParseError(format!(
                "unsupported config extension '.{}' (expected .toml or .json)",
                other
            ))),
        }
    }

    pub fn from_json_str(content: &str) -> ValidationResult<Self> {
        serde_json::from_str(content).map_err(|e| ValidationError::ParseError(e.to_string()))
    }

    pub fn from_toml_str(content: &str) -> ValidationResult<Self> {
        toml::from_str(content).map_err(|e| ValidationError::ParseError(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSettings {
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload(),
        }
    }
}

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

/// One step of the eviction walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionStep {
    /// Entries older than the TTL.
    Expired,
    /// Non-preserved entries, lowest priority then oldest.
    LowestPriority,
    /// Preserved entries whose deadline has passed.
    LapsedPreservation,
    /// Preserved entries, lowest priority first; emergency only.
    PreservedUnderEmergency,
}

impl EvictionStep {
    pub const DEFAULT_ORDER: [EvictionStep; 4] = [
        EvictionStep::Expired,
        EvictionStep::LowestPriority,
        EvictionStep::LapsedPreservation,
        EvictionStep::PreservedUnderEmergency,
    ];
}

/// Weights used to compute queue priority scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityWeights {
    #[serde(default = "default_type_weights")]
    pub types: BTreeMap<MessageType, u32>,
    #[serde(default = "default_importance_weights")]
    pub importance: BTreeMap<Importance, u32>,
    /// Added to HIGH and CRITICAL entries in proportion to system load.
    #[serde(default = "default_stress_bonus")]
    pub stress_bonus_max: u32,
    /// Added to CRITICAL entries while emergency mode is active.
    #[serde(default = "default_emergency_bonus")]
    pub emergency_bonus: u32,
    /// Fresh messages get this much; one point less per second of age.
    #[serde(default = "default_time_bonus")]
    pub time_bonus_max: u32,
}

fn default_type_weights() -> BTreeMap<MessageType, u32> {
    BTreeMap::from([
        (MessageType::Critical, 100),
        (MessageType::Error, 80),
        (MessageType::Warn, 60),
        (MessageType::Info, 40),
        (MessageType::Debug, 20),
        (MessageType::Trace, 10),
    ])
}

fn default_importance_weights() -> BTreeMap<Importance, u32> {
    BTreeMap::from([
        (Importance::Critical, 50),
        (Importance::High, 30),
        (Importance::Medium, 15),
        (Importance::Low, 5),
    ])
}

fn default_stress_bonus() -> u32 {
    20
}

fn default_emergency_bonus() -> u32 {
    25
}

fn default_time_bonus() -> u32 {
    5
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            types: default_type_weights(),
            importance: default_importance_weights(),
            stress_bonus_max: default_stress_bonus(),
            emergency_bonus: default_emergency_bonus(),
            time_bonus_max: default_time_bonus(),
        }
    }
}

impl PriorityWeights {
    pub fn type_weight(&self, t: MessageType) -> u32 {
        self.types.get(&t).copied().unwrap_or(0)
    }

    pub fn importance_weight(&self, i: Importance) -> u32 {
        self.importance.get(&i).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Byte budget per queue; `None` disables byte accounting.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: Option<usize>,

    /// Entries held back for each importance level.
    #[serde(default = "default_reserved")]
    pub reserved: BTreeMap<Importance, usize>,

    #[serde(default = "default_preservation_window")]
    pub preservation_window_ms: u64,

    #[serde(default = "default_batch_target")]
    pub batch_target: usize,

    /// Entries older than this are the first to go; `None` disables.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,

    #[serde(default = "default_eviction_order")]
    pub eviction_order: Vec<EvictionStep>,

    /// Fill fraction above which the queue manager rebalances.
    #[serde(default = "default_rebalance_percent")]
    pub rebalance_threshold_percent: f64,

    /// Capacity targets for low and high stress; adaptation interpolates.
    #[serde(default = "default_low_load_entries")]
    pub low_load_max_entries: usize,
    #[serde(default = "default_high_load_entries")]
    pub high_load_max_entries: usize,

    /// Batch targets for low and high stress.
    #[serde(default = "default_low_load_batch")]
    pub low_load_batch_target: usize,
    #[serde(default = "default_high_load_batch")]
    pub high_load_batch_target: usize,

    #[serde(default)]
    pub weights: PriorityWeights,
}

fn default_max_entries() -> usize {
    10_000
}

fn default_max_bytes() -> Option<usize> {
    Some(64 * 1024 * 1024)
}

fn default_reserved() -> BTreeMap<Importance, usize> {
    BTreeMap::from([(Importance::Critical, 100), (Importance::High, 50)])
}

fn default_preservation_window() -> u64 {
    30_000
}

fn default_batch_target() -> usize {
    100
}

fn default_eviction_order() -> Vec<EvictionStep> {
    EvictionStep::DEFAULT_ORDER.to_vec()
}

fn default_rebalance_percent() -> f64 {
    80.0
}

fn default_low_load_entries() -> usize {
    20_000
}

fn default_high_load_entries() -> usize {
    5_000
}

fn default_low_load_batch() -> usize {
    200
}

fn default_high_load_batch() -> usize {
    50
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
            reserved: default_reserved(),
            preservation_window_ms: default_preservation_window(),
            batch_target: default_batch_target(),
            ttl_seconds: None,
            eviction_order: default_eviction_order(),
            rebalance_threshold_percent: default_rebalance_percent(),
            low_load_max_entries: default_low_load_entries(),
            high_load_max_entries: default_high_load_entries(),
            low_load_batch_target: default_low_load_batch(),
            high_load_batch_target: default_high_load_batch(),
            weights: PriorityWeights::default(),
        }
    }
}

impl QueueSettings {
    pub fn reserved_total(&self) -> usize {
        self.reserved.values().sum()
    }

    /// Settings with no reservations and no byte budget.
    pub fn plain(max_entries: usize, preservation_window_ms: u64) -> Self {
        Self {
            max_entries,
            max_bytes: None,
            reserved: BTreeMap::new(),
            preservation_window_ms,
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Buffer matching messages without persisting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueOnlyRule {
    pub component: GlobPattern,
    /// Absent matches any function.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<GlobPattern>,
}

impl QueueOnlyRule {
    pub fn matches(&self, component: &str, function: &str) -> bool {
        self.component.matches(component)
            && self
                .function
                .as_ref()
                .map(|f| f.matches(function))
                .unwrap_or(true)
    }
}

/// Per-application persistence overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationPolicySettings {
    /// Replaces the global base threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_importance: Option<Importance>,
    #[serde(default)]
    pub queue_only: Vec<QueueOnlyRule>,
    /// Always persisted.
    #[serde(default)]
    pub critical_components: Vec<GlobPattern>,
    /// Never persisted.
    #[serde(default)]
    pub ignored_components: Vec<GlobPattern>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceSettings {
    #[serde(default)]
    pub queue_only: Vec<QueueOnlyRule>,
    #[serde(default)]
    pub critical_components: Vec<GlobPattern>,
    #[serde(default)]
    pub ignored_components: Vec<GlobPattern>,
    #[serde(default)]
    pub applications: BTreeMap<String, ApplicationPolicySettings>,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_collection_interval")]
    pub collection_interval_seconds: u64,
    #[serde(default = "default_health_interval")]
    pub health_interval_seconds: u64,
    #[serde(default = "default_adaptation_interval")]
    pub adaptation_interval_seconds: u64,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    /// Hard cap on history length regardless of retention.
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,
    /// K in the K-sigma anomaly test.
    #[serde(default = "default_anomaly_sigma")]
    pub anomaly_sigma: f64,
    /// M, the minimum window before anomalies are reported.
    #[serde(default = "default_anomaly_min_samples")]
    pub anomaly_min_samples: usize,
    #[serde(default = "default_slope_threshold")]
    pub trend_slope_threshold: f64,
    /// Samples used for trend fitting.
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    /// Predicted breaches inside this horizon trigger early signals.
    #[serde(default = "default_prediction_horizon")]
    pub prediction_horizon_seconds: u64,
    /// Interval multiplier applied after two consecutive failures.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
}

fn default_collection_interval() -> u64 {
    5
}

fn default_health_interval() -> u64 {
    30
}

fn default_adaptation_interval() -> u64 {
    60
}

fn default_retention_hours() -> u64 {
    24
}

fn default_max_samples() -> usize {
    20_000
}

fn default_anomaly_sigma() -> f64 {
    3.0
}

fn default_anomaly_min_samples() -> usize {
    10
}

fn default_slope_threshold() -> f64 {
    0.1
}

fn default_trend_window() -> usize {
    20
}

fn default_prediction_horizon() -> u64 {
    300
}

fn default_backoff_multiplier() -> u32 {
    4
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            collection_interval_seconds: default_collection_interval(),
            health_interval_seconds: default_health_interval(),
            adaptation_interval_seconds: default_adaptation_interval(),
            retention_hours: default_retention_hours(),
            max_samples: default_max_samples(),
            anomaly_sigma: default_anomaly_sigma(),
            anomaly_min_samples: default_anomaly_min_samples(),
            trend_slope_threshold: default_slope_threshold(),
            trend_window: default_trend_window(),
            prediction_horizon_seconds: default_prediction_horizon(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Ge,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Le,
    #[serde(alias = "==")]
    Eq,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Ge => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Le => value <= threshold,
            Comparison::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

/// Where an alert is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportSettings {
    /// Structured log line only.
    #[default]
    Log,
    /// HTTP POST of the alert as JSON.
    Webhook {
        url: String,
        #[serde(default = "default_webhook_timeout")]
        timeout_ms: u64,
    },
    /// Mail handed to a local sendmail-compatible binary.
    Email {
        to: Vec<String>,
        #[serde(default = "default_email_from")]
        from: String,
        #[serde(default = "default_sendmail")]
        sendmail_path: PathBuf,
    },
}

fn default_webhook_timeout() -> u64 {
    5_000
}

fn default_email_from() -> String {
    "sieve@localhost".to_string()
}

fn default_sendmail() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

/// `alerts[name]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    /// One of the metric names in [`ALERT_METRICS`].
    pub metric: String,
    pub threshold: f64,
    pub comparison: Comparison,
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub transport: TransportSettings,
}

fn default_cooldown() -> u64 {
    300
}

/// Metric names alerts may reference.
pub const ALERT_METRICS: &[&str] = &[
    "cpu_percent",
    "memory_percent",
    "network_percent",
    "error_rate",
    "message_rate",
    "queue_fill_percent",
    "stress",
    "avg_latency_ms",
    "db_latency_ms",
    "messages_processed",
    "error_count",
    "failed_sinks",
];

// ---------------------------------------------------------------------------
// Stress and emergency
// ---------------------------------------------------------------------------

/// Warning and critical levels for one 0-100 signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub warning: f64,
    pub critical: f64,
}

impl Band {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    /// 0 below warning, 1 between, 2 at or above critical.
    pub fn level(&self, value: f64) -> u8 {
        if value >= self.critical {
            2
        } else if value >= self.warning {
            1
        } else {
            0
        }
    }
}

/// Relative weights of the stress inputs; normalised on use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressWeights {
    pub cpu: f64,
    pub memory: f64,
    pub queue_fill: f64,
    pub error_rate: f64,
}

impl Default for StressWeights {
    fn default() -> Self {
        Self {
            cpu: 0.35,
            memory: 0.25,
            queue_fill: 0.25,
            error_rate: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressSettings {
    #[serde(default = "default_cpu_band")]
    pub cpu: Band,
    #[serde(default = "default_memory_band")]
    pub memory: Band,
    /// Percent of recent messages at ERROR or above.
    #[serde(default = "default_error_band")]
    pub error_rate: Band,
    #[serde(default = "default_queue_band")]
    pub queue_fill: Band,
    /// Bands over the combined stress score, used by persistence.
    #[serde(default = "default_load_band")]
    pub load: Band,
    #[serde(default)]
    pub weights: StressWeights,
}

fn default_cpu_band() -> Band {
    Band::new(70.0, 90.0)
}

fn default_memory_band() -> Band {
    Band::new(80.0, 95.0)
}

fn default_error_band() -> Band {
    Band::new(5.0, 20.0)
}

fn default_queue_band() -> Band {
    Band::new(75.0, 90.0)
}

fn default_load_band() -> Band {
    Band::new(70.0, 90.0)
}

impl Default for StressSettings {
    fn default() -> Self {
        Self {
            cpu: default_cpu_band(),
            memory: default_memory_band(),
            error_rate: default_error_band(),
            queue_fill: default_queue_band(),
            load: default_load_band(),
            weights: StressWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencySettings {
    /// Stress at or above this enters emergency mode.
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: f64,
    /// Stress at or below this allows leaving it.
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold: f64,
    #[serde(default = "default_min_duration")]
    pub min_duration_seconds: u64,
}

fn default_entry_threshold() -> f64 {
    90.0
}

fn default_exit_threshold() -> f64 {
    70.0
}

fn default_min_duration() -> u64 {
    60
}

impl Default for EmergencySettings {
    fn default() -> Self {
        Self {
            entry_threshold: default_entry_threshold(),
            exit_threshold: default_exit_threshold(),
            min_duration_seconds: default_min_duration(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks, storage, HTTP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSettings {
    #[serde(default = "default_retry_base")]
    pub retry_base_ms: u64,
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_drain_interval")]
    pub drain_interval_ms: u64,
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_ms: u64,
}

fn default_retry_base() -> u64 {
    100
}

fn default_retry_ceiling() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_drain_interval() -> u64 {
    200
}

fn default_drain_batch() -> usize {
    500
}

fn default_flush_timeout() -> u64 {
    5_000
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            retry_base_ms: default_retry_base(),
            retry_ceiling_ms: default_retry_ceiling(),
            max_attempts: default_max_attempts(),
            drain_interval_ms: default_drain_interval(),
            drain_batch: default_drain_batch(),
            flush_timeout_ms: default_flush_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Root for persisted records, state, and dead letters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Bound on varchar columns in persisted records.
    #[serde(default = "default_max_string_len")]
    pub max_string_len: usize,
    /// Rows buffered before a Parquet file is written.
    #[serde(default = "default_storage_batch")]
    pub batch_rows: usize,
    #[serde(default = "default_storage_retention")]
    pub retention_days: u32,
}

fn default_max_string_len() -> usize {
    256
}

fn default_storage_batch() -> usize {
    10_000
}

fn default_storage_retention() -> u32 {
    30
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            max_string_len: default_max_string_len(),
            batch_rows: default_storage_batch(),
            retention_days: default_storage_retention(),
        }
    }
}

impl StorageSettings {
    /// Configured data dir, else the XDG data dir, else `./sieve-data`.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("sieve"))
                .unwrap_or_else(|| PathBuf::from("sieve-data"))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_http_bind")]
    pub bind: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

fn default_http_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    9464
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_http_bind(),
            port: default_http_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_all_defaults() {
        let cfg = SieveConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, SieveConfig::default());
        assert_eq!(cfg.min_importance_threshold, Importance::Medium);
        assert_eq!(cfg.queue.eviction_order.len(), 4);
    }

    #[test]
    fn partial_toml() {
        let cfg = SieveConfig::from_toml_str(
            r#"
            min_importance_threshold = "HIGH"

            [queue]
            max_entries = 4
            preservation_window_ms = 0

            [queue.reserved]
            CRITICAL = 1

            [alerts.cpu_hot]
            metric = "cpu_percent"
            threshold = 90.0
            comparison = "gt"
            transport = { kind = "webhook", url = "http://localhost:9/hook" }
            "#,
        )
        .unwrap();
        assert_eq!(cfg.min_importance_threshold, Importance::High);
        assert_eq!(cfg.queue.max_entries, 4);
        assert_eq!(cfg.queue.reserved_total(), 1);
        assert_eq!(cfg.queue.batch_target, 100);
        let alert = &cfg.alerts["cpu_hot"];
        assert_eq!(alert.cooldown_seconds, 300);
        assert!(matches!(alert.transport, TransportSettings::Webhook { .. }));
    }

    #[test]
    fn comparison_aliases() {
        let c: Comparison = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(c, Comparison::Ge);
        assert!(c.holds(5.0, 5.0));
        assert!(!Comparison::Gt.holds(5.0, 5.0));
    }

    #[test]
    fn band_levels() {
        let b = Band::new(70.0, 90.0);
        assert_eq!(b.level(10.0), 0);
        assert_eq!(b.level(70.0), 1);
        assert_eq!(b.level(95.0), 2);
    }

    #[test]
    fn default_weights_order_types() {
        let w = PriorityWeights::default();
        assert!(w.type_weight(MessageType::Critical) > w.type_weight(MessageType::Error));
        assert!(w.importance_weight(Importance::Low) < w.importance_weight(Importance::Medium));
    }

    #[test]
    fn unknown_extension_rejected() {
        let err = SieveConfig::from_str_for_path("", Path::new("sieve.yaml")).unwrap_err();
        assert!(matches!(err, ValidationError::ParseError(_)));
    }

    #[test]
    fn queue_only_rule_matching() {
        let rule = QueueOnlyRule {
            component: GlobPattern::new("Net*").unwrap(),
            function: None,
        };
        assert!(rule.matches("NetIO", "anything"));
        assert!(!rule.matches("Disk", "anything"));
    }
}
