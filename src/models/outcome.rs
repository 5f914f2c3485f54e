//! Item outcome models
//!
//! Defines the classification of a finished item and the opaque detail
//! payloads that travel with it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Final classification of an executed item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Error,
    Skip,
}

impl Outcome {
    pub fn symbol(&self) -> &'static str {
        match self {
            Outcome::Success => "✓",
            Outcome::Failure => "✗",
            Outcome::Skip => "○",
            Outcome::Error => "!",
        }
    }

    /// Failure or error; these trip fail-fast and mark the item for rerun
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failure | Outcome::Error)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "PASS"),
            Outcome::Failure => write!(f, "FAIL"),
            Outcome::Skip => write!(f, "SKIP"),
            Outcome::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of a single item execution
///
/// `errors`, `failures` and `skips` are opaque to the scheduler and are passed
/// through to aggregation untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub outcome: Outcome,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub failures: Vec<Value>,
    #[serde(default)]
    pub skips: Vec<Value>,
}

impl ItemResult {
    pub fn success(duration_ms: u64) -> Self {
        Self {
            outcome: Outcome::Success,
            duration_ms,
            errors: Vec::new(),
            failures: Vec::new(),
            skips: Vec::new(),
        }
    }

    pub fn failure(duration_ms: u64, detail: Value) -> Self {
        Self {
            outcome: Outcome::Failure,
            failures: vec![detail],
            ..Self::success(duration_ms)
        }
    }

    pub fn error(duration_ms: u64, detail: Value) -> Self {
        Self {
            outcome: Outcome::Error,
            errors: vec![detail],
            ..Self::success(duration_ms)
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Skip,
            skips: vec![Value::String(reason.into())],
            ..Self::success(0)
        }
    }

    /// First human readable message found in the payloads, if any
    pub fn message(&self) -> Option<String> {
        self.errors
            .iter()
            .chain(&self.failures)
            .chain(&self.skips)
            .next()
            .map(|value| match value {
                Value::String(s) => s.clone(),
                Value::Object(map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string()),
                other => other.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failed_classification() {
        assert!(Outcome::Failure.is_failed());
        assert!(Outcome::Error.is_failed());
        assert!(!Outcome::Success.is_failed());
        assert!(!Outcome::Skip.is_failed());
    }

    #[test]
    fn test_result_payloads() {
        let result = ItemResult::failure(12, json!({"exit_code": 1, "message": "boom"}));
        assert_eq!(result.outcome, Outcome::Failure);
        assert_eq!(result.failures.len(), 1);
        assert!(result.errors.is_empty());
        assert_eq!(result.message().as_deref(), Some("boom"));

        let skipped = ItemResult::skip("not on this platform");
        assert_eq!(skipped.message().as_deref(), Some("not on this platform"));
    }

    #[test]
    fn test_outcome_wire_format() {
        assert_eq!(serde_json::to_string(&Outcome::Skip).unwrap(), "\"skip\"");
        let parsed: Outcome = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(parsed, Outcome::Error);
    }
}
