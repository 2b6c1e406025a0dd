use std::fmt;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct InvalidField {
    pub key: String,
    pub expected: &'static str,
    pub found: Value,
}

impl fmt::Display for InvalidField {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} (expected {}, found {})", self.key, self.expected, self.found)
    }
}

/// Every mandatory field that is absent or wrongly typed, collected in one
/// pass so callers see the full picture of an unhandled checkpoint variant.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", describe(.missing, .invalid))]
pub struct ConfigError {
    pub missing: Vec<String>,
    pub invalid: Vec<InvalidField>,
}

impl ConfigError {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }
}

pub(crate) fn describe(
    missing: &[String],
    invalid: &[InvalidField],
) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing required fields: {}", missing.join(", ")));
    }
    if !invalid.is_empty() {
        let invalid: Vec<String> =
            invalid.iter().map(ToString::to_string).collect();
        parts.push(format!("invalid fields: {}", invalid.join(", ")));
    }
    parts.join("; ")
}
