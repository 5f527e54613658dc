//! Importance resolver.
//!
//! Maps `(message type, component, function, context)` to an effective
//! [`Importance`] through four layers: type defaults, component overrides,
//! function overrides, and contextual rules, followed by an adaptive
//! baseline shift tuned by the monitor.
//!
//! The mapping lives behind an [`ArcSwap`]: every `resolve` loads one
//! snapshot and never blocks, while writers build a new snapshot under a
//! small mutex and publish it atomically.

mod compiled;

pub use compiled::{CompiledMapping, Resolution, ResolutionLayer};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use sieve_common::{Context, Error, Importance, LogMessage, MessageType, Result, RuleId};
use sieve_config::{
    ComponentOverride, ContextPredicate, ContextualRule, FunctionOverride, GlobPattern,
    MappingConfig,
};
use tracing::{debug, info};

use crate::logging::event_names;
use crate::signals::{AdaptationSignal, SignalKind, SignalSink, SignalTarget};

/// Largest adaptive shift in either direction.
pub const MAX_BASELINE_SHIFT: i32 = 2;

/// Largest adjustment a single contextual rule may carry.
pub const MAX_RULE_ADJUSTMENT: i32 = 3;

pub struct ImportanceResolver {
    current: ArcSwap<CompiledMapping>,
    next_rule_id: AtomicU64,
    writer: Mutex<()>,
}

impl Default for ImportanceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportanceResolver {
    /// Resolver with an empty mapping (type defaults only).
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(CompiledMapping::compile(MappingConfig::default())),
            next_rule_id: AtomicU64::new(1),
            writer: Mutex::new(()),
        }
    }

    pub fn with_mapping(mapping: MappingConfig) -> Result<Self> {
        let resolver = Self::new();
        resolver.load_mapping(mapping)?;
        Ok(resolver)
    }

    /// Current snapshot; hold it to resolve many messages consistently.
    pub fn snapshot(&self) -> Arc<CompiledMapping> {
        self.current.load_full()
    }

    pub fn resolve(&self, msg: &LogMessage, ctx: &Context) -> Importance {
        self.current.load().resolve(msg, ctx)
    }

    pub fn resolve_detailed(&self, msg: &LogMessage, ctx: &Context) -> Resolution {
        self.current.load().resolve_detailed(msg, ctx)
    }

    /// Order-preserving; the whole batch sees one snapshot.
    pub fn resolve_batch(&self, msgs: &[LogMessage], ctx: &Context) -> Vec<Importance> {
        let snapshot = self.current.load();
        msgs.iter().map(|m| snapshot.resolve(m, ctx)).collect()
    }

    pub fn add_component_override(
        &self,
        pattern: &str,
        importance: Importance,
        types: &[MessageType],
    ) -> Result<RuleId> {
        let pattern = GlobPattern::new(pattern)?;
        let id = self.allocate_id();
        let mut rule = ComponentOverride::new(pattern, importance).with_types(types);
        rule.id = Some(id);
        self.update(|cfg| cfg.component_overrides.push(rule));
        info!(
            target: event_names::OVERRIDE_ADDED,
            rule = %id,
            layer = "component",
            %importance,
            "override added"
        );
        Ok(id)
    }

    pub fn add_function_override(
        &self,
        component: &str,
        function: &str,
        importance: Importance,
        types: &[MessageType],
    ) -> Result<RuleId> {
        let component = GlobPattern::new(component)?;
        let function = GlobPattern::new(function)?;
        let id = self.allocate_id();
        let mut rule = FunctionOverride::new(component, function, importance).with_types(types);
        rule.id = Some(id);
        self.update(|cfg| cfg.function_overrides.push(rule));
        info!(
            target: event_names::OVERRIDE_ADDED,
            rule = %id,
            layer = "function",
            %importance,
            "override added"
        );
        Ok(id)
    }

    pub fn add_contextual_rule(
        &self,
        predicate: ContextPredicate,
        adjustment: i32,
    ) -> Result<RuleId> {
        if !(-MAX_RULE_ADJUSTMENT..=MAX_RULE_ADJUSTMENT).contains(&adjustment) {
            return Err(Error::Configuration(format!(
                "contextual adjustment must be in [-{m}, {m}], got {adjustment}",
                m = MAX_RULE_ADJUSTMENT
            )));
        }
        let id = self.allocate_id();
        let mut rule = ContextualRule::new(predicate, adjustment);
        rule.id = Some(id);
        self.update(|cfg| cfg.contextual_rules.push(rule));
        info!(
            target: event_names::OVERRIDE_ADDED,
            rule = %id,
            layer = "contextual",
            adjustment,
            "rule added"
        );
        Ok(id)
    }

    /// Remove an override or contextual rule by id from whichever layer holds it.
    pub fn remove_override(&self, id: RuleId) -> bool {
        let mut removed = false;
        self.update(|cfg| {
            let before = cfg.component_overrides.len()
                + cfg.function_overrides.len()
                + cfg.contextual_rules.len();
            cfg.component_overrides.retain(|o| o.id != Some(id));
            cfg.function_overrides.retain(|o| o.id != Some(id));
            cfg.contextual_rules.retain(|r| r.id != Some(id));
            let after = cfg.component_overrides.len()
                + cfg.function_overrides.len()
                + cfg.contextual_rules.len();
            removed = after < before;
        });
        if removed {
            info!(target: event_names::OVERRIDE_REMOVED, rule = %id, "override removed");
        }
        removed
    }

    pub fn set_type_default(&self, t: MessageType, importance: Importance) {
        self.update(|cfg| {
            cfg.type_defaults.insert(t, importance);
        });
    }

    /// Replace the whole mapping atomically.
    ///
    /// Rules without an id get one; ids already present are kept and the id
    /// counter moves past them.
    pub fn load_mapping(&self, mapping: MappingConfig) -> Result<()> {
        self.install(mapping, false)
    }

    /// Like [`load_mapping`](Self::load_mapping), but the baseline shift
    /// built up by adaptation signals stays in force.
    pub fn reload_rules(&self, mapping: MappingConfig) -> Result<()> {
        self.install(mapping, true)
    }

    fn install(&self, mut mapping: MappingConfig, keep_shift: bool) -> Result<()> {
        if !(-MAX_BASELINE_SHIFT..=MAX_BASELINE_SHIFT).contains(&mapping.baseline_shift) {
            return Err(Error::Configuration(format!(
                "baseline_shift must be in [-{m}, {m}], got {}",
                mapping.baseline_shift,
                m = MAX_BASELINE_SHIFT
            )));
        }
        if let Some(rule) = mapping
            .contextual_rules
            .iter()
            .find(|r| r.adjustment.abs() > MAX_RULE_ADJUSTMENT)
        {
            return Err(Error::Configuration(format!(
                "contextual adjustment must be in [-{m}, {m}], got {}",
                rule.adjustment,
                m = MAX_RULE_ADJUSTMENT
            )));
        }

        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        if keep_shift {
            mapping.baseline_shift = self.current.load().baseline_shift();
        }
        let max_existing = mapping
            .component_overrides
            .iter()
            .map(|o| o.id)
            .chain(mapping.function_overrides.iter().map(|o| o.id))
            .chain(mapping.contextual_rules.iter().map(|r| r.id))
            .flatten()
            .map(|id| id.0)
            .max()
            .unwrap_or(0);
        self.next_rule_id
            .fetch_max(max_existing + 1, Ordering::SeqCst);

        for o in &mut mapping.component_overrides {
            o.id.get_or_insert_with(|| self.allocate_id());
        }
        for o in &mut mapping.function_overrides {
            o.id.get_or_insert_with(|| self.allocate_id());
        }
        for r in &mut mapping.contextual_rules {
            r.id.get_or_insert_with(|| self.allocate_id());
        }

        info!(
            target: event_names::MAPPING_LOADED,
            component_overrides = mapping.component_overrides.len(),
            function_overrides = mapping.function_overrides.len(),
            contextual_rules = mapping.contextual_rules.len(),
            "importance mapping loaded"
        );
        self.current.store(Arc::new(CompiledMapping::compile(mapping)));
        Ok(())
    }

    /// The mapping as currently in force, ids included.
    pub fn export_mapping(&self) -> MappingConfig {
        self.current.load().config().clone()
    }

    pub fn baseline_shift(&self) -> i32 {
        self.current.load().baseline_shift()
    }

    fn allocate_id(&self) -> RuleId {
        RuleId(self.next_rule_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Copy-on-write update of the snapshot.
    fn update<F: FnOnce(&mut MappingConfig)>(&self, f: F) {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        let mut cfg = self.current.load().config().clone();
        f(&mut cfg);
        self.current.store(Arc::new(CompiledMapping::compile(cfg)));
    }
}

impl SignalSink for ImportanceResolver {
    fn name(&self) -> &'static str {
        "resolver"
    }

    /// Threshold signals aimed explicitly at the resolver move the baseline:
    /// raising the threshold demotes, lowering it promotes.
    fn apply_signal(&self, signal: &AdaptationSignal) -> bool {
        if signal.target != SignalTarget::Resolver {
            return false;
        }
        let delta = match signal.kind {
            SignalKind::RaiseThreshold => -signal.levels(),
            SignalKind::LowerThreshold => signal.levels(),
            _ => return false,
        };
        let mut changed = false;
        self.update(|cfg| {
            let next = (cfg.baseline_shift + delta).clamp(-MAX_BASELINE_SHIFT, MAX_BASELINE_SHIFT);
            changed = next != cfg.baseline_shift;
            cfg.baseline_shift = next;
        });
        debug!(kind = %signal.kind, shift = self.baseline_shift(), changed, "resolver baseline");
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(t: MessageType, component: &str, function: &str) -> LogMessage {
        LogMessage::builder(t, "payload")
            .application("app")
            .component(component)
            .function(function)
            .build()
    }

    #[test]
    fn empty_mapping_uses_type_defaults() {
        let r = ImportanceResolver::new();
        let ctx = Context::new("app");
        assert_eq!(r.resolve(&msg(MessageType::Trace, "a", "b"), &ctx), Importance::Low);
        assert_eq!(r.resolve(&msg(MessageType::Info, "a", "b"), &ctx), Importance::Medium);
        assert_eq!(r.resolve(&msg(MessageType::Warn, "a", "b"), &ctx), Importance::High);
        assert_eq!(r.resolve(&msg(MessageType::Error, "a", "b"), &ctx), Importance::Critical);
    }

    #[test]
    fn function_layer_beats_component_layer() {
        let r = ImportanceResolver::new();
        r.add_component_override("Db*", Importance::Low, &[]).unwrap();
        r.add_function_override("Db*", "commit", Importance::Critical, &[])
            .unwrap();
        let ctx = Context::new("app");
        assert_eq!(r.resolve(&msg(MessageType::Info, "DbPool", "query"), &ctx), Importance::Low);
        let detail = r.resolve_detailed(&msg(MessageType::Info, "DbPool", "commit"), &ctx);
        assert_eq!(detail.importance, Importance::Critical);
        assert_eq!(detail.layer, ResolutionLayer::FunctionOverride);
    }

    #[test]
    fn type_filter_limits_override() {
        let r = ImportanceResolver::new();
        r.add_component_override("Net", Importance::Critical, &[MessageType::Warn])
            .unwrap();
        let ctx = Context::new("app");
        assert_eq!(r.resolve(&msg(MessageType::Warn, "Net", "f"), &ctx), Importance::Critical);
        assert_eq!(r.resolve(&msg(MessageType::Info, "Net", "f"), &ctx), Importance::Medium);
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let r = ImportanceResolver::new();
        assert!(matches!(
            r.add_component_override("", Importance::Low, &[]),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn remove_override_by_id() {
        let r = ImportanceResolver::new();
        let id = r.add_component_override("Cache*", Importance::Low, &[]).unwrap();
        let rule = r
            .add_contextual_rule(ContextPredicate::EmergencyMode, 1)
            .unwrap();
        assert_ne!(id, rule);
        assert!(r.remove_override(id));
        assert!(!r.remove_override(id));
        assert!(r.remove_override(rule));
        assert!(r.export_mapping().is_empty());
    }

    #[test]
    fn oversized_adjustment_is_rejected() {
        let r = ImportanceResolver::new();
        assert!(r.add_contextual_rule(ContextPredicate::EmergencyMode, 4).is_err());
    }

    #[test]
    fn export_then_load_preserves_ids_and_behaviour() {
        let r = ImportanceResolver::new();
        r.add_component_override("Cache*", Importance::Low, &[]).unwrap();
        r.add_contextual_rule(ContextPredicate::ErrorRateAbove { value: 10.0 }, 1)
            .unwrap();
        let exported = r.export_mapping();

        let other = ImportanceResolver::with_mapping(exported.clone()).unwrap();
        assert_eq!(other.export_mapping(), exported);
        let next = other.add_component_override("X", Importance::High, &[]).unwrap();
        assert_eq!(next, RuleId(3));
    }

    #[test]
    fn load_mapping_assigns_missing_ids() {
        let mut mapping = MappingConfig::default();
        mapping.component_overrides.push(ComponentOverride::new(
            GlobPattern::new("A*").unwrap(),
            Importance::High,
        ));
        let r = ImportanceResolver::with_mapping(mapping).unwrap();
        assert_eq!(r.export_mapping().component_overrides[0].id, Some(RuleId(1)));
    }

    #[test]
    fn load_mapping_rejects_out_of_range_shift() {
        let mut mapping = MappingConfig::default();
        mapping.baseline_shift = 3;
        let r = ImportanceResolver::new();
        assert!(r.load_mapping(mapping).is_err());
        assert_eq!(r.baseline_shift(), 0);
    }

    #[test]
    fn reload_rules_keeps_adapted_baseline() {
        let r = ImportanceResolver::new();
        let raise = AdaptationSignal::new(SignalKind::RaiseThreshold, 1.0, "load")
            .to(SignalTarget::Resolver);
        assert!(r.apply_signal(&raise));
        assert_eq!(r.baseline_shift(), -1);

        let mut mapping = MappingConfig::default();
        mapping.type_defaults.insert(MessageType::Warn, Importance::Low);
        r.reload_rules(mapping.clone()).unwrap();
        assert_eq!(r.baseline_shift(), -1);
        assert_eq!(r.export_mapping().type_defaults[&MessageType::Warn], Importance::Low);

        r.load_mapping(mapping).unwrap();
        assert_eq!(r.baseline_shift(), 0);
    }

    #[test]
    fn signals_move_baseline_within_bounds() {
        let r = ImportanceResolver::new();
        let raise = AdaptationSignal::new(SignalKind::RaiseThreshold, 1.0, "load")
            .to(SignalTarget::Resolver);
        assert!(r.apply_signal(&raise));
        assert!(r.apply_signal(&raise));
        assert!(!r.apply_signal(&raise));
        assert_eq!(r.baseline_shift(), -2);

        // untargeted threshold signals belong to the persistence manager
        let untargeted = AdaptationSignal::new(SignalKind::LowerThreshold, 1.0, "errors");
        assert!(!r.apply_signal(&untargeted));

        let ctx = Context::new("app");
        assert_eq!(r.resolve(&msg(MessageType::Warn, "a", "b"), &ctx), Importance::Low);
        assert_eq!(r.resolve(&msg(MessageType::Critical, "a", "b"), &ctx), Importance::Critical);
    }

    #[test]
    fn batch_preserves_order() {
        let r = ImportanceResolver::new();
        let ctx = Context::new("app");
        let batch = vec![
            msg(MessageType::Error, "a", "b"),
            msg(MessageType::Debug, "a", "b"),
            msg(MessageType::Info, "a", "b"),
        ];
        assert_eq!(
            r.resolve_batch(&batch, &ctx),
            vec![Importance::Critical, Importance::Low, Importance::Medium]
        );
    }
}
