//! Step outcome and failure classification.
//!
//! Every tool invocation ends in exactly one [`Outcome`]. Failures carry a
//! [`FailureKind`] from a closed taxonomy so that the executor can decide
//! whether to retry and the runner can record the final classification
//! without re-interpreting it.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// FailureKind
// ---------------------------------------------------------------------------

/// Classification of a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bound input did not match the tool's input schema. Never retried.
    InvalidInput,
    /// A required environment variable is not set.
    MissingEnv,
    /// The step references a tool absent from the registry.
    UnknownTool,
    /// The invocation exceeded its timeout.
    Timeout,
    /// The external service rate-limited the call.
    RateLimited,
    /// Transient network failure.
    TransientNetwork,
    /// Authentication or authorization was rejected.
    AuthFailure,
    /// The tool returned data that could not be parsed or validated.
    MalformedOutput,
    /// A paid, non-idempotent operation had an ambiguous outcome and must not
    /// be retried without an operator decision.
    RequiresConfirmation,
    /// An operator cancelled the instance.
    Cancelled,
    /// The tool failed without a usable classification.
    Unclassified,
}

impl FailureKind {
    /// Whether the executor may retry an invocation that failed this way.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::RateLimited | FailureKind::TransientNetwork
        )
    }

    /// Parse a category name as emitted by tools (`"rate_limited"`,
    /// `"timeout"`, ...). Unknown names map to `Unclassified`.
    pub fn from_category(category: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(category.to_ascii_lowercase()))
            .unwrap_or(FailureKind::Unclassified)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::MissingEnv => "missing_env",
            FailureKind::UnknownTool => "unknown_tool",
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::TransientNetwork => "transient_network",
            FailureKind::AuthFailure => "auth_failure",
            FailureKind::MalformedOutput => "malformed_output",
            FailureKind::RequiresConfirmation => "requires_confirmation",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FailureReason / Outcome
// ---------------------------------------------------------------------------

/// A classified failure with a human-readable summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Normalized result of executing one step.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The step produced an output. `tool` is the tool that produced it
    /// (the fallback's name when the fallback succeeded).
    Success {
        output: serde_json::Value,
        tool: String,
    },
    /// The step failed transiently and the retry budget is exhausted.
    RetryableFailure(FailureReason),
    /// The step failed in a way retrying cannot fix.
    FatalFailure(FailureReason),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// The failure reason, if this is a failure.
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::RetryableFailure(r) | Outcome::FatalFailure(r) => Some(r),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_kinds_are_retryable() {
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::RateLimited.is_retryable());
        assert!(FailureKind::TransientNetwork.is_retryable());

        assert!(!FailureKind::InvalidInput.is_retryable());
        assert!(!FailureKind::AuthFailure.is_retryable());
        assert!(!FailureKind::RequiresConfirmation.is_retryable());
        assert!(!FailureKind::Unclassified.is_retryable());
    }

    #[test]
    fn test_from_category() {
        assert_eq!(FailureKind::from_category("rate_limited"), FailureKind::RateLimited);
        assert_eq!(FailureKind::from_category("TIMEOUT"), FailureKind::Timeout);
        assert_eq!(FailureKind::from_category("bogus"), FailureKind::Unclassified);
    }

    #[test]
    fn test_as_str_matches_serde() {
        for kind in [
            FailureKind::InvalidInput,
            FailureKind::TransientNetwork,
            FailureKind::RequiresConfirmation,
            FailureKind::Cancelled,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn test_outcome_failure_accessor() {
        let ok = Outcome::Success {
            output: serde_json::json!({}),
            tool: "search".to_string(),
        };
        assert!(ok.is_success());
        assert!(ok.failure().is_none());

        let failed = Outcome::FatalFailure(FailureReason::new(FailureKind::AuthFailure, "401"));
        assert_eq!(failed.failure().unwrap().kind, FailureKind::AuthFailure);
        assert_eq!(failed.failure().unwrap().to_string(), "auth_failure: 401");
    }
}
