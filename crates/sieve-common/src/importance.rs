//! Effective importance levels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered classification governing persistence and eviction.
///
/// Derived per message from the current mapping and context; never stored on
/// the message itself.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Importance {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Importance {
    pub const ALL: [Importance; 4] = [
        Importance::Low,
        Importance::Medium,
        Importance::High,
        Importance::Critical,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    /// Shift by `delta` levels, saturating at LOW and CRITICAL.
    pub fn shift(self, delta: i32) -> Self {
        let idx = (self as i32).saturating_add(delta).clamp(0, Importance::Critical as i32);
        Self::ALL[idx as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Importance::Low => "LOW",
            Importance::Medium => "MEDIUM",
            Importance::High => "HIGH",
            Importance::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(Importance::Low),
            "MEDIUM" => Ok(Importance::Medium),
            "HIGH" => Ok(Importance::High),
            "CRITICAL" => Ok(Importance::Critical),
            other => Err(format!(
                "invalid importance '{}': expected low, medium, high, or critical",
                other.to_ascii_lowercase()
            )),
        }
    }
}
