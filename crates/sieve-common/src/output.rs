//! Output formats for operator commands.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How `sieve` renders command results on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Structured JSON
    #[default]
    Json,

    /// Human-readable plain text
    Human,

    /// One-line summary for quick status checks
    Summary,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Human => write!(f, "human"),
            OutputFormat::Summary => write!(f, "summary"),
        }
    }
}
