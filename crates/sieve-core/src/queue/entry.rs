//! Queue entries and their priority score.

use serde::{Deserialize, Serialize};
use sieve_common::{
    Importance, LogMessage, MessageId, MessageType, PersistenceAction, PersistenceDecision,
    Timestamp,
};
use sieve_config::settings::PriorityWeights;

/// A message owned by exactly one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub message: LogMessage,
    pub importance: Importance,
    pub decision: PersistenceDecision,
    pub priority: u32,
    /// Admission order within the owning queue; FIFO tie-break.
    pub seq: u64,
    pub enqueued_at: Timestamp,
    /// Protected from ordinary eviction while strictly in the future.
    pub preserved_until: Option<Timestamp>,
}

impl QueueEntry {
    pub fn id(&self) -> MessageId {
        self.message.id()
    }

    pub fn size_bytes(&self) -> usize {
        self.message.size_bytes()
    }

    pub fn action(&self) -> PersistenceAction {
        self.decision.action
    }

    /// Inside its preservation window at `now`. A deadline equal to `now`
    /// has already lapsed.
    pub fn is_preserved_at(&self, now: Timestamp) -> bool {
        self.preserved_until.is_some_and(|d| d > now)
    }

    /// Was preserved once, and the window has passed.
    pub fn preservation_lapsed_at(&self, now: Timestamp) -> bool {
        self.preserved_until.is_some_and(|d| d <= now)
    }

    pub fn age_ms(&self, now: Timestamp) -> u64 {
        self.enqueued_at.millis_until(now)
    }

    /// Compact view for status output.
    pub fn summary(&self, now: Timestamp) -> EntrySummary {
        EntrySummary {
            id: self.id(),
            message_type: self.message.message_type(),
            importance: self.importance,
            action: self.decision.action,
            priority: self.priority,
            component: self.message.component().to_string(),
            age_ms: self.age_ms(now),
            preserved: self.is_preserved_at(now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub id: MessageId,
    pub message_type: MessageType,
    pub importance: Importance,
    pub action: PersistenceAction,
    pub priority: u32,
    pub component: String,
    pub age_ms: u64,
    pub preserved: bool,
}

/// Priority score: type weight + importance weight + contextual bonus + time bonus.
///
/// The contextual bonus grows with system load for HIGH and CRITICAL
/// entries and adds a flat amount to CRITICAL entries during emergencies.
/// The time bonus favours fresh messages by at most `time_bonus_max`
/// points and only matters as a tie-break.
pub fn priority_score(
    weights: &PriorityWeights,
    message_type: MessageType,
    importance: Importance,
    system_load: f64,
    emergency: bool,
    age_ms: u64,
) -> u32 {
    let mut score = weights
        .type_weight(message_type)
        .saturating_add(weights.importance_weight(importance));

    if importance >= Importance::High {
        let load = system_load.clamp(0.0, 100.0);
        let bonus = (f64::from(weights.stress_bonus_max) * load / 100.0).round() as u32;
        score = score.saturating_add(bonus);
    }
    if emergency && importance == Importance::Critical {
        score = score.saturating_add(weights.emergency_bonus);
    }

    let age_secs = u32::try_from(age_ms / 1_000).unwrap_or(u32::MAX);
    score.saturating_add(weights.time_bonus_max.saturating_sub(age_secs))
}
