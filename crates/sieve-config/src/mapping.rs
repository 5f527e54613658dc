//! Importance mapping definitions.
//!
//! These are the serializable layers the resolver compiles into its snapshot:
//! type defaults, component overrides, function overrides, and contextual
//! rules. The same shape is used for config files and for
//! `export_mapping` / `load_mapping`.

use serde::{Deserialize, Serialize};
use sieve_common::{Context, Importance, MessageType, RuleId};
use std::collections::BTreeMap;

use crate::pattern::GlobPattern;

/// Complete mapping, lowest-precedence layer first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Layer 1. Types missing here use the built-in default.
    #[serde(default)]
    pub type_defaults: BTreeMap<MessageType, Importance>,

    /// Layer 2.
    #[serde(default)]
    pub component_overrides: Vec<ComponentOverride>,

    /// Layer 3.
    #[serde(default)]
    pub function_overrides: Vec<FunctionOverride>,

    /// Layer 4, applied in order.
    #[serde(default)]
    pub contextual_rules: Vec<ContextualRule>,

    /// Adaptive shift applied after layer 4, in [-2, 2].
    #[serde(default)]
    pub baseline_shift: i32,
}

impl MappingConfig {
    pub fn is_empty(&self) -> bool {
        self.type_defaults.is_empty()
            && self.component_overrides.is_empty()
            && self.function_overrides.is_empty()
            && self.contextual_rules.is_empty()
            && self.baseline_shift == 0
    }

    /// The table of defaults used for every message type.
    pub fn type_default(&self, t: MessageType) -> Importance {
        self.type_defaults
            .get(&t)
            .copied()
            .unwrap_or_else(|| t.default_importance())
    }
}

/// `(pattern, importance, optional type filter)` over component names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RuleId>,
    pub pattern: GlobPattern,
    pub importance: Importance,
    /// Empty admits every type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<MessageType>,
}

impl ComponentOverride {
    pub fn new(pattern: GlobPattern, importance: Importance) -> Self {
        Self {
            id: None,
            pattern,
            importance,
            types: Vec::new(),
        }
    }

    pub fn with_types(mut self, types: &[MessageType]) -> Self {
        self.types = types.to_vec();
        self
    }

    pub fn admits(&self, t: MessageType) -> bool {
        self.types.is_empty() || self.types.contains(&t)
    }
}

/// `(component pattern, function pattern, importance, optional type filter)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RuleId>,
    pub component: GlobPattern,
    pub function: GlobPattern,
    pub importance: Importance,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<MessageType>,
}

impl FunctionOverride {
    pub fn new(component: GlobPattern, function: GlobPattern, importance: Importance) -> Self {
        Self {
            id: None,
            component,
            function,
            importance,
            types: Vec::new(),
        }
    }

    pub fn with_types(mut self, types: &[MessageType]) -> Self {
        self.types = types.to_vec();
        self
    }

    pub fn admits(&self, t: MessageType) -> bool {
        self.types.is_empty() || self.types.contains(&t)
    }

    pub fn specificity(&self) -> usize {
        self.component.specificity() + self.function.specificity()
    }
}

/// Predicate over a [`Context`]. Comparisons are strict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum ContextPredicate {
    ErrorRateAbove { value: f64 },
    SystemLoadAbove { value: f64 },
    MessageRateAbove { value: f64 },
    EmergencyMode,
    ApplicationIs { name: String },
    All { of: Vec<ContextPredicate> },
    Any { of: Vec<ContextPredicate> },
    Not { predicate: Box<ContextPredicate> },
}

impl ContextPredicate {
    pub fn evaluate(&self, ctx: &Context) -> bool {
        match self {
            ContextPredicate::ErrorRateAbove { value } => ctx.error_rate > *value,
            ContextPredicate::SystemLoadAbove { value } => ctx.system_load > *value,
            ContextPredicate::MessageRateAbove { value } => ctx.message_rate > *value,
            ContextPredicate::EmergencyMode => ctx.emergency,
            ContextPredicate::ApplicationIs { name } => ctx.application == *name,
            ContextPredicate::All { of } => of.iter().all(|p| p.evaluate(ctx)),
            ContextPredicate::Any { of } => of.iter().any(|p| p.evaluate(ctx)),
            ContextPredicate::Not { predicate } => !predicate.evaluate(ctx),
        }
    }
}

/// `(predicate, adjustment)`; adjustments saturate at LOW and CRITICAL.
///
/// Rules are applied one after another in insertion order. Because every
/// step saturates, reordering rules can change the result whenever an
/// intermediate value hits a bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RuleId>,
    pub predicate: ContextPredicate,
    pub adjustment: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ContextualRule {
    pub fn new(predicate: ContextPredicate, adjustment: i32) -> Self {
        Self {
            id: None,
            predicate,
            adjustment,
            description: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_are_strict() {
        let p = ContextPredicate::ErrorRateAbove { value: 10.0 };
        assert!(!p.evaluate(&Context::new("a").with_error_rate(10.0)));
        assert!(p.evaluate(&Context::new("a").with_error_rate(10.5)));
    }

    #[test]
    fn compound_predicates() {
        let p = ContextPredicate::All {
            of: vec![
                ContextPredicate::SystemLoadAbove { value: 50.0 },
                ContextPredicate::Not {
                    predicate: Box::new(ContextPredicate::EmergencyMode),
                },
            ],
        };
        assert!(p.evaluate(&Context::new("a").with_load(60.0)));
        assert!(!p.evaluate(&Context::new("a").with_load(60.0).with_emergency(true)));
        let any = ContextPredicate::Any { of: vec![] };
        assert!(!any.evaluate(&Context::default()));
    }

    #[test]
    fn toml_mapping_parses() {
        let src = r#"
            baseline_shift = 0

            [type_defaults]
            WARN = "HIGH"

            [[component_overrides]]
            pattern = "Cache*"
            importance = "LOW"

            [[function_overrides]]
            component = "Db*"
            function = "commit"
            importance = "CRITICAL"
            types = ["ERROR"]

            [[contextual_rules]]
            adjustment = 1
            predicate = { when = "error_rate_above", value = 10.0 }
        "#;
        let m: MappingConfig = toml::from_str(src).unwrap();
        assert_eq!(m.type_default(MessageType::Warn), Importance::High);
        assert_eq!(m.type_default(MessageType::Info), Importance::Medium);
        assert_eq!(m.component_overrides[0].pattern.as_str(), "Cache*");
        assert!(m.function_overrides[0].admits(MessageType::Error));
        assert!(!m.function_overrides[0].admits(MessageType::Info));
        assert_eq!(m.contextual_rules[0].adjustment, 1);
    }

    #[test]
    fn empty_mapping() {
        assert!(MappingConfig::default().is_empty());
    }
}
