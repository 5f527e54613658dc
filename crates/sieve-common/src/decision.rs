//! Persistence decisions.

use crate::importance::Importance;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens to a message after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistenceAction {
    Persist,
    QueueOnly,
    Drop,
    EmergencyPreserve,
}

impl PersistenceAction {
    /// Returned by persistence drains.
    pub fn is_persistable(self) -> bool {
        matches!(
            self,
            PersistenceAction::Persist | PersistenceAction::EmergencyPreserve
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PersistenceAction::Persist => "PERSIST",
            PersistenceAction::QueueOnly => "QUEUE_ONLY",
            PersistenceAction::Drop => "DROP",
            PersistenceAction::EmergencyPreserve => "EMERGENCY_PRESERVE",
        }
    }
}

impl fmt::Display for PersistenceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which branch of the decision procedure fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// Importance met the unadjusted threshold.
    AboveThreshold,
    /// Importance met a threshold lowered by a high error rate.
    ErrorRateEscalation,
    /// Importance fell under a threshold raised by system load.
    ShedUnderLoad,
    /// Importance fell under the base threshold.
    BelowThreshold,
    QueueOnlyRule,
    EmergencyPreserve,
    CriticalComponent,
    IgnoredComponent,
    /// Policy was invalid; persisting everything at WARN or above.
    InvalidConfigFallback,
    /// A queued-only entry became persistable at drain time.
    Reconsidered,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::AboveThreshold => "ABOVE_THRESHOLD",
            ReasonCode::ErrorRateEscalation => "ERROR_RATE_ESCALATION",
            ReasonCode::ShedUnderLoad => "SHED_UNDER_LOAD",
            ReasonCode::BelowThreshold => "BELOW_THRESHOLD",
            ReasonCode::QueueOnlyRule => "QUEUE_ONLY_RULE",
            ReasonCode::EmergencyPreserve => "EMERGENCY_PRESERVE",
            ReasonCode::CriticalComponent => "CRITICAL_COMPONENT",
            ReasonCode::IgnoredComponent => "IGNORED_COMPONENT",
            ReasonCode::InvalidConfigFallback => "INVALID_CONFIG_FALLBACK",
            ReasonCode::Reconsidered => "RECONSIDERED",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the persistence manager for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceDecision {
    pub action: PersistenceAction,
    pub reason: ReasonCode,
    /// Effective importance the decision was made with.
    pub importance: Importance,
    /// Threshold in force when the decision was made.
    pub threshold: Importance,
}

impl PersistenceDecision {
    pub fn new(
        action: PersistenceAction,
        reason: ReasonCode,
        importance: Importance,
        threshold: Importance,
    ) -> Self {
        Self {
            action,
            reason,
            importance,
            threshold,
        }
    }

    /// A plain PERSIST decision, used where no policy applies.
    pub fn persist(importance: Importance) -> Self {
        Self::new(
            PersistenceAction::Persist,
            ReasonCode::AboveThreshold,
            importance,
            importance,
        )
    }
}
