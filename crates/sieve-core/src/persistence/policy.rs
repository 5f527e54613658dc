//! Persistence policy values and threshold arithmetic.

use serde::{Deserialize, Serialize};
use sieve_common::{Context, Importance};
use sieve_config::settings::{ApplicationPolicySettings, Band, PersistenceSettings};
use sieve_config::{GlobPattern, SieveConfig};

/// Largest adaptive offset in either direction, in levels.
pub const MAX_THRESHOLD_OFFSET: i32 = 2;

/// Everything `decide` needs, swapped as one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistencePolicy {
    /// Base threshold for applications without their own.
    pub min_importance: Importance,
    /// Bands over `Context::system_load`; each level crossed raises the
    /// threshold by one.
    pub load_band: Band,
    /// Bands over `Context::error_rate`; each level crossed lowers it by one.
    pub error_band: Band,
    pub rules: PersistenceSettings,
    /// Adaptive offset from threshold signals.
    #[serde(default)]
    pub offset: i32,
    #[serde(default)]
    pub emergency: bool,
    /// Installed when a configuration was rejected: persist WARN and above.
    #[serde(default)]
    pub fallback: bool,
}

impl Default for PersistencePolicy {
    fn default() -> Self {
        Self::from_config(&SieveConfig::default())
    }
}

/// How the effective threshold was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub base: Importance,
    pub load_levels: i32,
    pub error_levels: i32,
    pub offset: i32,
    pub effective: Importance,
}

impl Threshold {
    /// The threshold without error-rate relief.
    pub fn without_relief(&self) -> Importance {
        self.base.shift(self.load_levels + self.offset)
    }

    pub fn is_raised(&self) -> bool {
        self.effective > self.base
    }
}

impl PersistencePolicy {
    pub fn from_config(cfg: &SieveConfig) -> Self {
        Self {
            min_importance: cfg.min_importance_threshold,
            load_band: cfg.stress.load,
            error_band: cfg.stress.error_rate,
            rules: cfg.persistence.clone(),
            offset: 0,
            emergency: false,
            fallback: false,
        }
    }

    /// Persist everything at WARN or above.
    pub fn fallback() -> Self {
        Self {
            fallback: true,
            ..Self::from_config(&SieveConfig::default())
        }
    }

    /// Reasons this policy cannot be used, if any.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, band) in [("load", &self.load_band), ("error_rate", &self.error_band)] {
            if !band.warning.is_finite() || !band.critical.is_finite() {
                problems.push(format!("{} band is not finite", name));
            } else if band.warning >= band.critical {
                problems.push(format!(
                    "{} band warning {} must be below critical {}",
                    name, band.warning, band.critical
                ));
            }
        }
        if self.offset.abs() > MAX_THRESHOLD_OFFSET {
            problems.push(format!(
                "offset {} outside [-{}, {}]",
                self.offset, MAX_THRESHOLD_OFFSET, MAX_THRESHOLD_OFFSET
            ));
        }
        problems
    }

    fn application(&self, application: &str) -> Option<&ApplicationPolicySettings> {
        self.rules.applications.get(application)
    }

    pub fn base_threshold(&self, application: &str) -> Importance {
        self.application(application)
            .and_then(|a| a.min_importance)
            .unwrap_or(self.min_importance)
    }

    pub fn threshold(&self, application: &str, ctx: &Context) -> Threshold {
        let base = self.base_threshold(application);
        let load_levels = i32::from(self.load_band.level(ctx.system_load));
        let error_levels = i32::from(self.error_band.level(ctx.error_rate));
        Threshold {
            base,
            load_levels,
            error_levels,
            offset: self.offset,
            effective: base.shift(load_levels - error_levels + self.offset),
        }
    }

    fn any_matches<'a>(
        global: &'a [GlobPattern],
        local: Option<&'a [GlobPattern]>,
        component: &str,
    ) -> bool {
        global
            .iter()
            .chain(local.unwrap_or_default())
            .any(|p| p.matches(component))
    }

    pub fn is_critical_component(&self, application: &str, component: &str) -> bool {
        Self::any_matches(
            &self.rules.critical_components,
            self.application(application)
                .map(|a| a.critical_components.as_slice()),
            component,
        )
    }

    pub fn is_ignored_component(&self, application: &str, component: &str) -> bool {
        Self::any_matches(
            &self.rules.ignored_components,
            self.application(application)
                .map(|a| a.ignored_components.as_slice()),
            component,
        )
    }

    pub fn is_queue_only(&self, application: &str, component: &str, function: &str) -> bool {
        let local = self
            .application(application)
            .map(|a| a.queue_only.as_slice())
            .unwrap_or_default();
        self.rules
            .queue_only
            .iter()
            .chain(local)
            .any(|r| r.matches(component, function))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_raises_and_errors_lower() {
        let policy = PersistencePolicy::default();
        let calm = policy.threshold("app", &Context::new("app").with_load(30.0));
        assert_eq!(calm.effective, Importance::Medium);
        assert!(!calm.is_raised());

        let hot = policy.threshold("app", &Context::new("app").with_load(95.0));
        assert_eq!(hot.load_levels, 2);
        assert_eq!(hot.effective, Importance::Critical);
        assert!(hot.is_raised());

        let incident = policy.threshold("app", &Context::new("app").with_error_rate(25.0));
        assert_eq!(incident.effective, Importance::Low);
        assert_eq!(incident.without_relief(), Importance::Medium);
    }

    #[test]
    fn application_base_overrides_global() {
        let mut policy = PersistencePolicy::default();
        policy.rules.applications.insert(
            "billing".into(),
            ApplicationPolicySettings {
                min_importance: Some(Importance::Low),
                ..Default::default()
            },
        );
        assert_eq!(policy.base_threshold("billing"), Importance::Low);
        assert_eq!(policy.base_threshold("other"), Importance::Medium);
    }

    #[test]
    fn inverted_band_is_a_problem() {
        let mut policy = PersistencePolicy::default();
        assert!(policy.problems().is_empty());
        policy.load_band = Band::new(90.0, 70.0);
        policy.offset = 5;
        assert_eq!(policy.problems().len(), 2);
    }
}
