//! Sieve configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for `sieve.toml` / `sieve.json`
//! - Importance-mapping definitions shared with the resolver
//! - Glob patterns for component and function matching
//! - Config resolution (CLI → env → XDG → /etc → defaults)
//! - Semantic validation
//! - Presets and config snapshots

pub mod mapping;
pub mod pattern;
pub mod preset;
pub mod resolve;
pub mod settings;
pub mod snapshot;
pub mod validate;

pub use mapping::{
    ComponentOverride, ContextPredicate, ContextualRule, FunctionOverride, MappingConfig,
};
pub use pattern::GlobPattern;
pub use resolve::{load_config, resolve_config, ConfigSource, LoadedConfig};
pub use settings::SieveConfig;
pub use snapshot::ConfigSnapshot;
pub use validate::{validate_config, ValidationError, ValidationResult};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
