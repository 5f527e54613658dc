//! Classification context snapshots.

use serde::{Deserialize, Serialize};

/// Runtime inputs to classification and persistence decisions.
///
/// Built fresh per call by the facade, or sampled by the monitor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Context {
    pub application: String,
    /// Stress score, 0-100.
    pub system_load: f64,
    /// Percent of recent messages at ERROR or above.
    pub error_rate: f64,
    /// Recent messages per second.
    pub message_rate: f64,
    pub emergency: bool,
}

impl Context {
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            ..Default::default()
        }
    }

    pub fn with_load(mut self, load: f64) -> Self {
        self.system_load = load.clamp(0.0, 100.0);
        self
    }

    pub fn with_error_rate(mut self, rate: f64) -> Self {
        self.error_rate = rate.max(0.0);
        self
    }

    pub fn with_message_rate(mut self, rate: f64) -> Self {
        self.message_rate = rate.max(0.0);
        self
    }

    pub fn with_emergency(mut self, emergency: bool) -> Self {
        self.emergency = emergency;
        self
    }

    /// Same snapshot, different application.
    pub fn for_application(&self, application: &str) -> Self {
        Self {
            application: application.to_string(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps() {
        let ctx = Context::new("app").with_load(140.0).with_error_rate(-3.0);
        assert_eq!(ctx.system_load, 100.0);
        assert_eq!(ctx.error_rate, 0.0);
        assert!(!ctx.emergency);
        assert_eq!(ctx.for_application("other").application, "other");
    }
}
