//! Configuration validation errors and semantic validation.

use std::collections::HashSet;
use thiserror::Error;

use crate::settings::{Band, SieveConfig, TransportSettings, ALERT_METRICS};

/// Validation result type.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Semantic validation failed: {0}")]
    SemanticError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::IoError(_) => 70,
            ValidationError::ParseError(_) => 12,
            ValidationError::SemanticError(_) => 13,
            ValidationError::InvalidValue { .. } => 14,
            ValidationError::InvalidPattern { .. } => 11,
            ValidationError::VersionMismatch { .. } => 15,
        }
    }
}

impl From<ValidationError> for sieve_common::Error {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::InvalidPattern { pattern, message } => {
                sieve_common::Error::InvalidPattern { pattern, message }
            }
            other => sieve_common::Error::Configuration(other.to_string()),
        }
    }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.into(),
        message: message.into(),
    }
}

/// Validate a complete configuration semantically.
///
/// Patterns are already checked during deserialization; this covers the
/// cross-field rules.
pub fn validate_config(cfg: &SieveConfig) -> ValidationResult<()> {
    if cfg.schema_version.split('.').next() != crate::CONFIG_SCHEMA_VERSION.split('.').next() {
        return Err(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: cfg.schema_version.clone(),
        });
    }

    if cfg.message.max_payload_bytes < 64 {
        return Err(invalid(
            "message.max_payload_bytes",
            format!("Must be at least 64, got {}", cfg.message.max_payload_bytes),
        ));
    }

    validate_queue(cfg)?;
    validate_mapping(cfg)?;
    validate_monitor(cfg)?;
    validate_alerts(cfg)?;
    validate_stress(cfg)?;
    validate_emergency(cfg)?;
    validate_sinks(cfg)?;

    if cfg.storage.max_string_len == 0 {
        return Err(invalid("storage.max_string_len", "Must be positive"));
    }

    Ok(())
}

fn validate_queue(cfg: &SieveConfig) -> ValidationResult<()> {
    let q = &cfg.queue;
    if q.max_entries == 0 {
        return Err(invalid("queue.max_entries", "Must be positive"));
    }
    if q.reserved_total() > q.max_entries {
        return Err(ValidationError::SemanticError(format!(
            "queue.reserved sums to {} which exceeds queue.max_entries {}",
            q.reserved_total(),
            q.max_entries
        )));
    }
    if let Some(bytes) = q.max_bytes {
        if bytes == 0 {
            return Err(invalid("queue.max_bytes", "Must be positive when set"));
        }
    }
    if q.batch_target == 0 {
        return Err(invalid("queue.batch_target", "Must be positive"));
    }
    if q.low_load_max_entries == 0 || q.high_load_max_entries == 0 {
        return Err(invalid(
            "queue.low_load_max_entries",
            "Interpolation targets must be positive",
        ));
    }
    if q.low_load_batch_target == 0 || q.high_load_batch_target == 0 {
        return Err(invalid(
            "queue.low_load_batch_target",
            "Interpolation targets must be positive",
        ));
    }
    if !(0.0..=100.0).contains(&q.rebalance_threshold_percent) {
        return Err(invalid(
            "queue.rebalance_threshold_percent",
            format!("Must be in [0, 100], got {}", q.rebalance_threshold_percent),
        ));
    }
    let mut seen = HashSet::new();
    for step in &q.eviction_order {
        if !seen.insert(*step) {
            return Err(invalid(
                "queue.eviction_order",
                format!("Step {:?} listed more than once", step),
            ));
        }
    }
    Ok(())
}

fn validate_mapping(cfg: &SieveConfig) -> ValidationResult<()> {
    let shift = cfg.importance.baseline_shift;
    if !(-2..=2).contains(&shift) {
        return Err(invalid(
            "importance.baseline_shift",
            format!("Must be in [-2, 2], got {}", shift),
        ));
    }
    for (idx, rule) in cfg.importance.contextual_rules.iter().enumerate() {
        if !(-3..=3).contains(&rule.adjustment) {
            return Err(invalid(
                format!("importance.contextual_rules[{}].adjustment", idx),
                format!("Must be in [-3, 3], got {}", rule.adjustment),
            ));
        }
    }
    Ok(())
}

fn validate_monitor(cfg: &SieveConfig) -> ValidationResult<()> {
    let m = &cfg.monitor;
    for (field, v) in [
        ("monitor.collection_interval_seconds", m.collection_interval_seconds),
        ("monitor.health_interval_seconds", m.health_interval_seconds),
        ("monitor.adaptation_interval_seconds", m.adaptation_interval_seconds),
        ("monitor.retention_hours", m.retention_hours),
    ] {
        if v == 0 {
            return Err(invalid(field, "Must be positive"));
        }
    }
    if m.anomaly_sigma.is_nan() || m.anomaly_sigma <= 0.0 {
        return Err(invalid(
            "monitor.anomaly_sigma",
            format!("Must be positive, got {}", m.anomaly_sigma),
        ));
    }
    if m.anomaly_min_samples < 2 {
        return Err(invalid("monitor.anomaly_min_samples", "Must be at least 2"));
    }
    if m.trend_slope_threshold < 0.0 || !m.trend_slope_threshold.is_finite() {
        return Err(invalid(
            "monitor.trend_slope_threshold",
            "Must be finite and non-negative",
        ));
    }
    if m.backoff_multiplier < 1 {
        return Err(invalid("monitor.backoff_multiplier", "Must be at least 1"));
    }
    if m.max_samples == 0 {
        return Err(invalid("monitor.max_samples", "Must be positive"));
    }
    Ok(())
}

fn validate_alerts(cfg: &SieveConfig) -> ValidationResult<()> {
    for (name, alert) in &cfg.alerts {
        if name.trim().is_empty() {
            return Err(invalid("alerts", "Alert names must not be empty"));
        }
        if !ALERT_METRICS.contains(&alert.metric.as_str()) {
            return Err(invalid(
                format!("alerts.{}.metric", name),
                format!(
                    "Unknown metric '{}'; expected one of {}",
                    alert.metric,
                    ALERT_METRICS.join(", ")
                ),
            ));
        }
        if !alert.threshold.is_finite() {
            return Err(invalid(format!("alerts.{}.threshold", name), "Must be finite"));
        }
        match &alert.transport {
            TransportSettings::Log => {}
            TransportSettings::Webhook { url, .. } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(invalid(
                        format!("alerts.{}.transport.url", name),
                        format!("Must be an http(s) URL, got '{}'", url),
                    ));
                }
            }
            TransportSettings::Email { to, .. } => {
                if to.is_empty() || to.iter().any(|a| !a.contains('@')) {
                    return Err(invalid(
                        format!("alerts.{}.transport.to", name),
                        "Must list at least one address",
                    ));
                }
            }
        }
    }
    Ok(())
}

fn validate_band(field: &str, band: &Band) -> ValidationResult<()> {
    if !(0.0..=100.0).contains(&band.warning) || !(0.0..=100.0).contains(&band.critical) {
        return Err(invalid(field, "Band levels must be in [0, 100]"));
    }
    if band.warning >= band.critical {
        return Err(invalid(
            field,
            format!(
                "warning ({}) must be below critical ({})",
                band.warning, band.critical
            ),
        ));
    }
    Ok(())
}

fn validate_stress(cfg: &SieveConfig) -> ValidationResult<()> {
    let s = &cfg.stress;
    validate_band("stress.cpu", &s.cpu)?;
    validate_band("stress.memory", &s.memory)?;
    validate_band("stress.error_rate", &s.error_rate)?;
    validate_band("stress.queue_fill", &s.queue_fill)?;
    validate_band("stress.load", &s.load)?;
    let w = &s.weights;
    let weights = [w.cpu, w.memory, w.queue_fill, w.error_rate];
    if weights.iter().any(|v| *v < 0.0 || !v.is_finite()) || weights.iter().sum::<f64>() <= 0.0 {
        return Err(invalid(
            "stress.weights",
            "Weights must be non-negative with a positive sum",
        ));
    }
    Ok(())
}

fn validate_emergency(cfg: &SieveConfig) -> ValidationResult<()> {
    let e = &cfg.emergency;
    if e.exit_threshold >= e.entry_threshold {
        return Err(ValidationError::SemanticError(format!(
            "emergency.exit_threshold ({}) must be below emergency.entry_threshold ({})",
            e.exit_threshold, e.entry_threshold
        )));
    }
    if !(0.0..=100.0).contains(&e.entry_threshold) || e.exit_threshold < 0.0 {
        return Err(invalid("emergency", "Thresholds must be in [0, 100]"));
    }
    Ok(())
}

fn validate_sinks(cfg: &SieveConfig) -> ValidationResult<()> {
    let s = &cfg.sinks;
    if s.retry_base_ms == 0 {
        return Err(invalid("sinks.retry_base_ms", "Must be positive"));
    }
    if s.retry_ceiling_ms < s.retry_base_ms {
        return Err(invalid(
            "sinks.retry_ceiling_ms",
            "Must be at least sinks.retry_base_ms",
        ));
    }
    if s.max_attempts == 0 {
        return Err(invalid("sinks.max_attempts", "Must be at least 1"));
    }
    if s.drain_batch == 0 {
        return Err(invalid("sinks.drain_batch", "Must be positive"));
    }
    Ok(())
}
