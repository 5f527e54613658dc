//! Glob patterns over component and function names.
//!
//! `*` matches any run of characters (including none), `?` matches exactly
//! one. Matching is against the full name and case-sensitive. The empty
//! pattern is rejected at compile time, so it can never match anything.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::validate::{ValidationError, ValidationResult};

#[derive(Clone)]
pub struct GlobPattern {
    source: String,
    matcher: Matcher,
    literal_count: usize,
}

#[derive(Clone)]
enum Matcher {
    Everything,
    Exact,
    Regex(Regex),
}

impl GlobPattern {
    pub fn new(pattern: &str) -> ValidationResult<Self> {
        if pattern.is_empty() {
            return Err(invalid(pattern, "pattern must not be empty"));
        }
        if let Some(c) = pattern.chars().find(|c| c.is_control()) {
            return Err(invalid(
                pattern,
                &format!("control character {:?} not allowed", c),
            ));
        }
        if pattern.contains('[') || pattern.contains(']') {
            return Err(invalid(pattern, "character classes are not supported"));
        }

        let literal_count = pattern.chars().filter(|c| *c != '*' && *c != '?').count();
        let matcher = if pattern.chars().all(|c| c == '*') {
            Matcher::Everything
        } else if literal_count == pattern.chars().count() {
            Matcher::Exact
        } else {
            let regex = Regex::new(&glob_to_regex(pattern))
                .map_err(|e| invalid(pattern, &e.to_string()))?;
            Matcher::Regex(regex)
        };

        Ok(Self {
            source: pattern.to_string(),
            matcher,
            literal_count,
        })
    }

    pub fn matches(&self, name: &str) -> bool {
        match &self.matcher {
            Matcher::Everything => true,
            Matcher::Exact => self.source == name,
            Matcher::Regex(re) => re.is_match(name),
        }
    }

    /// Number of non-wildcard characters; larger is more specific.
    pub fn specificity(&self) -> usize {
        self.literal_count
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn invalid(pattern: &str, message: &str) -> ValidationError {
    ValidationError::InvalidPattern {
        pattern: pattern.to_string(),
        message: message.to_string(),
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }
    out.push('$');
    out
}

impl fmt::Debug for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobPattern({:?})", self.source)
    }
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for GlobPattern {}

impl Serialize for GlobPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for GlobPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        GlobPattern::new(&s).map_err(serde::de::Error::custom)
    }
}
