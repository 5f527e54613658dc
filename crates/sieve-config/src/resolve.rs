//! Configuration resolution and path discovery.
//!
//! Resolution order: CLI argument → environment variables → XDG paths →
//! /etc → built-in defaults.

use std::path::{Path, PathBuf};

use crate::settings::SieveConfig;
use crate::snapshot::ConfigSnapshot;
use crate::validate::{validate_config, ValidationError, ValidationResult};

/// Where a configuration file was found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,

    /// Set via environment variable.
    Environment,

    /// Found in XDG config directory.
    XdgConfig,

    /// Found in /etc/sieve/.
    SystemConfig,

    /// Using built-in defaults.
    #[default]
    BuiltinDefault,

    /// Pushed to a running instance over its HTTP surface.
    Remote,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
            ConfigSource::Remote => write!(f, "remote update"),
        }
    }
}

/// Environment variable names.
pub const ENV_CONFIG_PATH: &str = "SIEVE_CONFIG";
pub const ENV_CONFIG_DIR: &str = "SIEVE_CONFIG_DIR";

/// Standard config file names, in lookup order.
const CONFIG_FILENAMES: [&str; 2] = ["sieve.toml", "sieve.json"];

/// Application name for XDG directories.
const APP_NAME: &str = "sieve";

/// Resolve the configuration file path.
///
/// 1. Explicit CLI path (must exist; a missing explicit path is an error)
/// 2. `SIEVE_CONFIG`
/// 3. `SIEVE_CONFIG_DIR` + `sieve.toml` / `sieve.json`
/// 4. XDG config directory (`~/.config/sieve/`)
/// 5. System config (`/etc/sieve/`)
/// 6. Built-in defaults (None)
pub fn resolve_config(
    cli_path: Option<&Path>,
) -> ValidationResult<(Option<PathBuf>, ConfigSource)> {
    // 1. CLI argument
    if let Some(path) = cli_path {
        if path.exists() {
            return Ok((Some(path.to_path_buf()), ConfigSource::CliArgument));
        }
        return Err(ValidationError::IoError(format!(
            "config file not found: {}",
            path.display()
        )));
    }

    // 2. Environment variable (direct path)
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok((Some(path), ConfigSource::Environment));
        }
    }

    // 3. Environment variable (config dir)
    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        if let Some(path) = first_existing(&PathBuf::from(config_dir)) {
            return Ok((Some(path), ConfigSource::Environment));
        }
    }

    // 4. XDG config directory
    if let Some(dir) = xdg_config_dir() {
        if let Some(path) = first_existing(&dir) {
            return Ok((Some(path), ConfigSource::XdgConfig));
        }
    }

    // 5. System config
    if let Some(path) = first_existing(&system_config_dir()) {
        return Ok((Some(path), ConfigSource::SystemConfig));
    }

    // 6. Built-in default
    Ok((None, ConfigSource::BuiltinDefault))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Get the XDG config directory for sieve.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}

/// A resolved, parsed, and validated configuration.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: SieveConfig,
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
    pub snapshot: ConfigSnapshot,
}

/// Resolve, parse, and validate. Any failure leaves the caller's current
/// configuration untouched.
pub fn load_config(cli_path: Option<&Path>) -> ValidationResult<LoadedConfig> {
    let (path, source) = resolve_config(cli_path)?;
    let Some(path) = path else {
        let config = SieveConfig::default();
        let snapshot = ConfigSnapshot::new(&config, None, &source, None);
        return Ok(LoadedConfig {
            config,
            path: None,
            source,
            snapshot,
        });
    };

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| ValidationError::IoError(format!("{}: {}", path.display(), e)))?;
    let config = SieveConfig::from_str_for_path(&raw, &path)?;
    validate_config(&config)?;
    let snapshot = ConfigSnapshot::new(&config, Some(&path), &source, Some(&raw));
    Ok(LoadedConfig {
        config,
        path: Some(path),
        source,
        snapshot,
    })
}
