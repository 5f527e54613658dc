//! Immutable, pre-sorted form of a [`MappingConfig`].

use serde::{Deserialize, Serialize};
use sieve_common::{Context, Importance, LogMessage, MessageType, RuleId};
use sieve_config::MappingConfig;

/// The layer that produced the final importance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionLayer {
    TypeDefault,
    ComponentOverride,
    FunctionOverride,
    Contextual,
    BaselineShift,
}

/// Full trace of one classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub importance: Importance,
    /// Last layer that changed the value.
    pub layer: ResolutionLayer,
    /// Override that matched in layer 2 or 3, if any.
    pub matched_override: Option<RuleId>,
    /// Contextual rules that fired, in application order.
    pub fired_rules: Vec<RuleId>,
}

/// A mapping snapshot ready for lock-free reads.
///
/// Override indices are sorted by descending specificity; the sort is
/// stable, so equal specificity keeps insertion order and the first match
/// in the sorted list is the winner.
#[derive(Debug, Clone)]
pub struct CompiledMapping {
    config: MappingConfig,
    component_order: Vec<usize>,
    function_order: Vec<usize>,
}

impl CompiledMapping {
    pub fn compile(config: MappingConfig) -> Self {
        let mut component_order: Vec<usize> = (0..config.component_overrides.len()).collect();
        component_order.sort_by_key(|&i| {
            std::cmp::Reverse(config.component_overrides[i].pattern.specificity())
        });
        let mut function_order: Vec<usize> = (0..config.function_overrides.len()).collect();
        function_order
            .sort_by_key(|&i| std::cmp::Reverse(config.function_overrides[i].specificity()));
        Self {
            config,
            component_order,
            function_order,
        }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    pub fn baseline_shift(&self) -> i32 {
        self.config.baseline_shift
    }

    pub fn resolve(&self, msg: &LogMessage, ctx: &Context) -> Importance {
        self.resolve_detailed(msg, ctx).importance
    }

    pub fn resolve_detailed(&self, msg: &LogMessage, ctx: &Context) -> Resolution {
        let t = msg.message_type();
        let mut importance = self.config.type_default(t);
        let mut layer = ResolutionLayer::TypeDefault;
        let mut matched_override = None;

        let component_hit = self
            .component_order
            .iter()
            .map(|&i| &self.config.component_overrides[i])
            .find(|o| o.admits(t) && o.pattern.matches(msg.component()));
        if let Some(o) = component_hit {
            importance = o.importance;
            layer = ResolutionLayer::ComponentOverride;
            matched_override = o.id;
        }

        let function_hit = self
            .function_order
            .iter()
            .map(|&i| &self.config.function_overrides[i])
            .find(|o| {
                o.admits(t)
                    && o.component.matches(msg.component())
                    && o.function.matches(msg.function())
            });
        if let Some(o) = function_hit {
            importance = o.importance;
            layer = ResolutionLayer::FunctionOverride;
            matched_override = o.id;
        }

        // Saturating, so order matters once a bound is hit.
        let mut fired_rules = Vec::new();
        for rule in &self.config.contextual_rules {
            if rule.predicate.evaluate(ctx) {
                let next = importance.shift(rule.adjustment);
                if next != importance {
                    layer = ResolutionLayer::Contextual;
                }
                importance = next;
                if let Some(id) = rule.id {
                    fired_rules.push(id);
                }
            }
        }

        let shift = self.config.baseline_shift;
        if shift != 0 && !(shift < 0 && t == MessageType::Critical) {
            let next = importance.shift(shift);
            if next != importance {
                layer = ResolutionLayer::BaselineShift;
            }
            importance = next;
        }

        Resolution {
            importance,
            layer,
            matched_override,
            fired_rules,
        }
    }
}
