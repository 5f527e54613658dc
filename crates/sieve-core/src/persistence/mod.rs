//! Contextual persistence manager.
//!
//! Decides per message whether it is persisted, buffered only, dropped, or
//! preserved under emergency. The threshold moves with context: system
//! load raises it, a high error rate lowers it, and adaptation signals add
//! a bounded offset on top.
//!
//! The policy is one immutable value behind an [`ArcSwap`], so `decide`
//! never observes a half-applied signal.

mod policy;

pub use policy::{PersistencePolicy, Threshold, MAX_THRESHOLD_OFFSET};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use sieve_common::{
    Context, Error, Importance, LogMessage, MessageType, PersistenceAction, PersistenceDecision,
    ReasonCode, Result,
};
use tracing::{debug, info, warn};

use crate::logging::event_names;
use crate::queue::{QueueEntry, Reconsider};
use crate::signals::{AdaptationSignal, SignalKind, SignalSink, SignalTarget};

const MAX_WARNINGS: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceStats {
    pub evaluated: u64,
    pub persisted: u64,
    pub queued_only: u64,
    pub dropped: u64,
    pub emergency_preserved: u64,
    pub reconsidered: u64,
    pub fallback_decisions: u64,
}

#[derive(Default)]
struct Counters {
    evaluated: AtomicU64,
    persisted: AtomicU64,
    queued_only: AtomicU64,
    dropped: AtomicU64,
    emergency_preserved: AtomicU64,
    reconsidered: AtomicU64,
    fallback_decisions: AtomicU64,
}

impl Counters {
    fn record(&self, decision: &PersistenceDecision) {
        self.evaluated.fetch_add(1, Ordering::Relaxed);
        let slot = match decision.action {
            PersistenceAction::Persist => &self.persisted,
            PersistenceAction::QueueOnly => &self.queued_only,
            PersistenceAction::Drop => &self.dropped,
            PersistenceAction::EmergencyPreserve => &self.emergency_preserved,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        if decision.reason == ReasonCode::InvalidConfigFallback {
            self.fallback_decisions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub struct PersistenceManager {
    policy: ArcSwap<PersistencePolicy>,
    /// Policy in force before the current emergency.
    saved: Mutex<Option<PersistencePolicy>>,
    writer: Mutex<()>,
    warnings: Mutex<Vec<String>>,
    counters: Counters,
}

impl Default for PersistenceManager {
    fn default() -> Self {
        Self::new(PersistencePolicy::default())
    }
}

impl PersistenceManager {
    /// Start with `policy`, or the fallback if it is unusable.
    pub fn new(policy: PersistencePolicy) -> Self {
        let manager = Self {
            policy: ArcSwap::from_pointee(PersistencePolicy::fallback()),
            saved: Mutex::new(None),
            writer: Mutex::new(()),
            warnings: Mutex::new(Vec::new()),
            counters: Counters::default(),
        };
        let _ = manager.configure(policy);
        manager
    }

    pub fn policy(&self) -> Arc<PersistencePolicy> {
        self.policy.load_full()
    }

    /// Install a new policy atomically.
    ///
    /// An unusable policy is replaced by the WARN-and-above fallback and a
    /// health warning is recorded; the error is still returned.
    pub fn configure(&self, policy: PersistencePolicy) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let problems = policy.problems();
        if problems.is_empty() {
            self.policy.store(Arc::new(policy));
            info!(target: event_names::POLICY_UPDATED, "persistence policy installed");
            return Ok(());
        }

        let summary = problems.join("; ");
        warn!(
            target: event_names::POLICY_FALLBACK,
            problems = %summary,
            "invalid persistence policy, persisting WARN and above"
        );
        self.push_warning(format!("persistence policy rejected: {}", summary));
        self.policy.store(Arc::new(PersistencePolicy::fallback()));
        Err(Error::Configuration(summary))
    }

    fn update(&self, f: impl FnOnce(&mut PersistencePolicy)) -> bool {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.policy.load_full();
        let mut next = (*current).clone();
        f(&mut next);
        if next == *current {
            return false;
        }
        self.policy.store(Arc::new(next));
        true
    }

    /// Replace the global base threshold.
    pub fn set_min_threshold(&self, importance: Importance) -> bool {
        let changed = self.update(|p| p.min_importance = importance);
        if changed {
            info!(
                target: event_names::POLICY_UPDATED,
                threshold = %importance,
                "base threshold set"
            );
        }
        changed
    }

    pub fn set_application_threshold(&self, application: &str, importance: Importance) -> bool {
        self.update(|p| {
            p.rules
                .applications
                .entry(application.to_string())
                .or_default()
                .min_importance = Some(importance);
        })
    }

    /// Effective threshold for `ctx` under the current policy.
    pub fn current_threshold(&self, ctx: &Context) -> Importance {
        self.policy.load().threshold(&ctx.application, ctx).effective
    }

    /// Decide what happens to `message`, classified at `importance`.
    pub fn decide(
        &self,
        message: &LogMessage,
        importance: Importance,
        ctx: &Context,
    ) -> PersistenceDecision {
        let decision = decide_with(&self.policy.load(), message, importance, ctx);
        self.counters.record(&decision);
        debug!(
            message_id = message.id().0,
            action = %decision.action,
            reason = %decision.reason,
            importance = %importance,
            threshold = %decision.threshold,
            "persistence decision"
        );
        decision
    }

    pub fn is_emergency(&self) -> bool {
        self.policy.load().emergency
    }

    /// Remember the current policy and switch to emergency handling.
    pub fn enter_emergency(&self) -> bool {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.policy.load_full();
        if current.emergency {
            return false;
        }
        *self.saved.lock().unwrap_or_else(|e| e.into_inner()) = Some((*current).clone());
        let mut next = (*current).clone();
        next.emergency = true;
        self.policy.store(Arc::new(next));
        true
    }

    /// Restore the policy saved by [`enter_emergency`](Self::enter_emergency).
    pub fn exit_emergency(&self) -> bool {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.policy.load_full();
        if !current.emergency {
            return false;
        }
        let restored = self
            .saved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_else(|| PersistencePolicy {
                emergency: false,
                ..(*current).clone()
            });
        self.policy.store(Arc::new(restored));
        true
    }

    pub fn stats(&self) -> PersistenceStats {
        let c = &self.counters;
        PersistenceStats {
            evaluated: c.evaluated.load(Ordering::Relaxed),
            persisted: c.persisted.load(Ordering::Relaxed),
            queued_only: c.queued_only.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            emergency_preserved: c.emergency_preserved.load(Ordering::Relaxed),
            reconsidered: c.reconsidered.load(Ordering::Relaxed),
            fallback_decisions: c.fallback_decisions.load(Ordering::Relaxed),
        }
    }

    fn push_warning(&self, warning: String) {
        let mut warnings = self.warnings.lock().unwrap_or_else(|e| e.into_inner());
        if warnings.len() == MAX_WARNINGS {
            warnings.remove(0);
        }
        warnings.push(warning);
    }

    /// Health warnings raised since start, oldest first.
    pub fn health_warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn decide_with(
    policy: &PersistencePolicy,
    message: &LogMessage,
    importance: Importance,
    ctx: &Context,
) -> PersistenceDecision {
    let app = message.application();
    let component = message.component();

    if policy.fallback {
        let action = if message.message_type() >= MessageType::Warn {
            PersistenceAction::Persist
        } else {
            PersistenceAction::Drop
        };
        return PersistenceDecision::new(
            action,
            ReasonCode::InvalidConfigFallback,
            importance,
            Importance::High,
        );
    }

    let threshold = policy.threshold(app, ctx);
    let decision = |action, reason| {
        PersistenceDecision::new(action, reason, importance, threshold.effective)
    };

    if policy.is_ignored_component(app, component) {
        return decision(PersistenceAction::Drop, ReasonCode::IgnoredComponent);
    }
    if policy.is_critical_component(app, component) {
        return decision(PersistenceAction::Persist, ReasonCode::CriticalComponent);
    }
    if importance >= threshold.effective {
        let reason = if importance < threshold.without_relief() {
            ReasonCode::ErrorRateEscalation
        } else {
            ReasonCode::AboveThreshold
        };
        return decision(PersistenceAction::Persist, reason);
    }
    if policy.is_queue_only(app, component, message.function()) {
        return decision(PersistenceAction::QueueOnly, ReasonCode::QueueOnlyRule);
    }
    if (policy.emergency || ctx.emergency) && importance >= Importance::High {
        return decision(
            PersistenceAction::EmergencyPreserve,
            ReasonCode::EmergencyPreserve,
        );
    }
    if threshold.is_raised() && importance >= threshold.base {
        decision(PersistenceAction::Drop, ReasonCode::ShedUnderLoad)
    } else {
        decision(PersistenceAction::Drop, ReasonCode::BelowThreshold)
    }
}

impl Reconsider for PersistenceManager {
    /// Queued-only entries become persistable once the threshold for the
    /// current context has dropped to their importance.
    fn reconsider(&self, entry: &QueueEntry, ctx: &Context) -> Option<PersistenceDecision> {
        let policy = self.policy.load();
        let threshold = policy.threshold(entry.message.application(), ctx);
        if entry.importance < threshold.effective {
            return None;
        }
        self.counters.reconsidered.fetch_add(1, Ordering::Relaxed);
        Some(PersistenceDecision::new(
            PersistenceAction::Persist,
            ReasonCode::Reconsidered,
            entry.importance,
            threshold.effective,
        ))
    }
}

impl SignalSink for PersistenceManager {
    fn name(&self) -> &'static str {
        "persistence"
    }

    fn apply_signal(&self, signal: &AdaptationSignal) -> bool {
        if !signal.is_for(SignalTarget::Persistence) {
            return false;
        }
        let delta = match signal.kind {
            SignalKind::RaiseThreshold => signal.levels(),
            SignalKind::LowerThreshold => -signal.levels(),
            SignalKind::EnterEmergency => return self.enter_emergency(),
            SignalKind::ExitEmergency => return self.exit_emergency(),
            _ => return false,
        };
        let changed = self.update(|p| {
            p.offset = (p.offset + delta).clamp(-MAX_THRESHOLD_OFFSET, MAX_THRESHOLD_OFFSET);
        });
        if changed {
            info!(
                target: event_names::POLICY_UPDATED,
                offset = self.policy.load().offset,
                rationale = %signal.rationale,
                "persistence threshold offset"
            );
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_common::{MessageId, Timestamp};
    use sieve_config::settings::{ApplicationPolicySettings, Band, QueueOnlyRule};
    use sieve_config::GlobPattern;

    fn msg(t: MessageType, component: &str) -> LogMessage {
        LogMessage::builder(t, "x")
            .application("app")
            .component(component)
            .function("run")
            .build()
    }

    fn ctx() -> Context {
        Context::new("app")
    }

    #[test]
    fn sheds_under_load_and_persists_when_calm() {
        let pm = PersistenceManager::default();
        let m = msg(MessageType::Info, "Api");

        let hot = pm.decide(&m, Importance::Medium, &ctx().with_load(95.0));
        assert_eq!(hot.action, PersistenceAction::Drop);
        assert_eq!(hot.reason, ReasonCode::ShedUnderLoad);

        let calm = pm.decide(&m, Importance::Medium, &ctx().with_load(30.0));
        assert_eq!(calm.action, PersistenceAction::Persist);
        assert_eq!(calm.reason, ReasonCode::AboveThreshold);
    }

    #[test]
    fn error_rate_escalation_keeps_detail() {
        let pm = PersistenceManager::default();
        let m = msg(MessageType::Debug, "Api");
        let quiet = pm.decide(&m, Importance::Low, &ctx());
        assert_eq!(quiet.action, PersistenceAction::Drop);
        assert_eq!(quiet.reason, ReasonCode::BelowThreshold);

        let incident = pm.decide(&m, Importance::Low, &ctx().with_error_rate(10.0));
        assert_eq!(incident.action, PersistenceAction::Persist);
        assert_eq!(incident.reason, ReasonCode::ErrorRateEscalation);
    }

    #[test]
    fn queue_only_rule_buffers() {
        let mut policy = PersistencePolicy::default();
        policy.rules.queue_only.push(QueueOnlyRule {
            component: GlobPattern::new("Metrics*").unwrap(),
            function: None,
        });
        let pm = PersistenceManager::new(policy);
        let d = pm.decide(&msg(MessageType::Debug, "MetricsPump"), Importance::Low, &ctx());
        assert_eq!(d.action, PersistenceAction::QueueOnly);
        assert_eq!(d.reason, ReasonCode::QueueOnlyRule);
    }

    #[test]
    fn emergency_preserves_high_and_above() {
        let pm = PersistenceManager::default();
        let hot = ctx().with_load(95.0).with_emergency(true);
        let high = pm.decide(&msg(MessageType::Warn, "Api"), Importance::High, &hot);
        assert_eq!(high.action, PersistenceAction::EmergencyPreserve);
        let medium = pm.decide(&msg(MessageType::Info, "Api"), Importance::Medium, &hot);
        assert_eq!(medium.action, PersistenceAction::Drop);
    }

    #[test]
    fn component_lists_take_precedence() {
        let mut policy = PersistencePolicy::default();
        policy.rules.applications.insert(
            "app".into(),
            ApplicationPolicySettings {
                critical_components: vec![GlobPattern::new("Auth*").unwrap()],
                ignored_components: vec![GlobPattern::new("Noise").unwrap()],
                ..Default::default()
            },
        );
        let pm = PersistenceManager::new(policy);
        let hot = ctx().with_load(99.0);
        let auth = pm.decide(&msg(MessageType::Trace, "AuthService"), Importance::Low, &hot);
        assert_eq!(auth.reason, ReasonCode::CriticalComponent);
        let noise = pm.decide(&msg(MessageType::Critical, "Noise"), Importance::Critical, &ctx());
        assert_eq!(noise.action, PersistenceAction::Drop);
        assert_eq!(noise.reason, ReasonCode::IgnoredComponent);
    }

    #[test]
    fn invalid_policy_falls_back_with_warning() {
        let mut policy = PersistencePolicy::default();
        policy.error_band = Band::new(50.0, 10.0);
        let pm = PersistenceManager::default();
        assert!(pm.configure(policy).is_err());
        assert_eq!(pm.health_warnings().len(), 1);

        let warn = pm.decide(&msg(MessageType::Warn, "Api"), Importance::Low, &ctx());
        assert_eq!(warn.action, PersistenceAction::Persist);
        assert_eq!(warn.reason, ReasonCode::InvalidConfigFallback);
        let info = pm.decide(&msg(MessageType::Info, "Api"), Importance::Critical, &ctx());
        assert_eq!(info.action, PersistenceAction::Drop);
        assert_eq!(pm.stats().fallback_decisions, 2);
    }

    #[test]
    fn threshold_signals_are_bounded() {
        let pm = PersistenceManager::default();
        let raise = AdaptationSignal::new(SignalKind::RaiseThreshold, 5.0, "load");
        assert!(pm.apply_signal(&raise));
        assert_eq!(pm.policy().offset, MAX_THRESHOLD_OFFSET);
        assert!(!pm.apply_signal(&raise));
        assert_eq!(pm.current_threshold(&ctx()), Importance::Critical);

        let resolver_only =
            AdaptationSignal::new(SignalKind::LowerThreshold, 1.0, "x").to(SignalTarget::Resolver);
        assert!(!pm.apply_signal(&resolver_only));
    }

    #[test]
    fn emergency_round_trip_restores_policy() {
        let pm = PersistenceManager::default();
        pm.apply_signal(&AdaptationSignal::new(SignalKind::RaiseThreshold, 1.0, "load"));
        let before = pm.policy();
        let enter = AdaptationSignal::new(SignalKind::EnterEmergency, 60.0, "stress");
        assert!(pm.apply_signal(&enter));
        assert!(pm.is_emergency());
        pm.set_min_threshold(Importance::Critical);
        assert!(pm.apply_signal(&AdaptationSignal::new(SignalKind::ExitEmergency, 0.0, "calm")));
        assert_eq!(*pm.policy(), *before);
    }

    #[test]
    fn reconsider_promotes_once_threshold_drops() {
        let pm = PersistenceManager::default();
        let entry = QueueEntry {
            message: LogMessage::builder(MessageType::Info, "x")
                .id(MessageId(7))
                .application("app")
                .build(),
            importance: Importance::Medium,
            decision: PersistenceDecision::new(
                PersistenceAction::QueueOnly,
                ReasonCode::QueueOnlyRule,
                Importance::Medium,
                Importance::High,
            ),
            priority: 0,
            seq: 0,
            enqueued_at: Timestamp::default(),
            preserved_until: None,
        };
        assert!(pm.reconsider(&entry, &ctx().with_load(80.0)).is_none());
        let d = pm.reconsider(&entry, &ctx()).unwrap();
        assert_eq!(d.reason, ReasonCode::Reconsidered);
        assert_eq!(pm.stats().reconsidered, 1);
    }

    #[test]
    fn stats_count_each_action() {
        let pm = PersistenceManager::default();
        pm.decide(&msg(MessageType::Error, "Api"), Importance::Critical, &ctx());
        pm.decide(&msg(MessageType::Trace, "Api"), Importance::Low, &ctx());
        let s = pm.stats();
        assert_eq!((s.evaluated, s.persisted, s.dropped), (2, 1, 1));
    }
}
