//! Tool transports.
//!
//! [`DispatchInvoker`] routes each call to the transport named in the tool's
//! `invoke` table. Both transports share the structured error shape tools use
//! to classify their own failures:
//!
//! ```json
//! {"error": {"category": "rate_limited", "message": "...", "side_effect_committed": false}}
//! {"success": false, "error": "...", "category": "timeout"}
//! ```

pub mod http;
pub mod process;

use serde_json::Value;
use waypoint_core::tool::invoker::{ToolCall, ToolError, ToolInvoker};
use waypoint_types::outcome::FailureKind;
use waypoint_types::tool::InvokeSpec;

pub use http::HttpInvoker;
pub use process::ProcessInvoker;

/// Invoker that picks the transport from the descriptor.
pub struct DispatchInvoker {
    process: ProcessInvoker,
    http: HttpInvoker,
}

impl DispatchInvoker {
    pub fn new(process: ProcessInvoker, http: HttpInvoker) -> Self {
        Self { process, http }
    }
}

impl ToolInvoker for DispatchInvoker {
    async fn invoke(&self, call: ToolCall<'_>) -> Result<Value, ToolError> {
        match &call.descriptor.invoke {
            Some(spec @ InvokeSpec::Process { .. }) => self.process.run(spec, call).await,
            Some(spec @ InvokeSpec::Http { .. }) => self.http.send(spec, call).await,
            None => Err(ToolError::new(
                FailureKind::Unclassified,
                format!("tool '{}' has no invoke configuration", call.descriptor.name),
            )),
        }
    }
}

/// Parse a tool-reported failure from a JSON document, if it is one.
///
/// Recognizes an `error` object carrying `category`/`message`, and the
/// `"success": false` convention with a flat `error` string. Anything else
/// returns `None`.
pub(crate) fn reported_failure(value: &Value) -> Option<ToolError> {
    let obj = value.as_object()?;

    if let Some(err) = obj.get("error").and_then(Value::as_object) {
        return Some(build_error(
            err.get("category").and_then(Value::as_str),
            err.get("message").and_then(Value::as_str),
            err.get("side_effect_committed")
                .or_else(|| obj.get("side_effect_committed"))
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ));
    }

    if obj.get("success").and_then(Value::as_bool) == Some(false) {
        let message = obj
            .get("error")
            .or_else(|| obj.get("message"))
            .and_then(Value::as_str);
        return Some(build_error(
            obj.get("category").and_then(Value::as_str),
            message,
            obj.get("side_effect_committed")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ));
    }

    None
}

fn build_error(category: Option<&str>, message: Option<&str>, side_effect: bool) -> ToolError {
    let kind = category
        .map(FailureKind::from_category)
        .unwrap_or(FailureKind::Unclassified);
    let err = ToolError::new(kind, message.unwrap_or("tool reported failure"));
    if side_effect { err.with_side_effect() } else { err }
}

/// Replace `${NAME}` with the value from `lookup`; unknown names expand to
/// the empty string.
pub(crate) fn expand_env(template: &str, lookup: &dyn Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&lookup(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Keep at most `max` characters of tool output for error messages.
pub(crate) fn excerpt(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;
    use waypoint_types::tool::ToolDescriptor;

    #[test]
    fn test_reported_failure_error_object() {
        let err = reported_failure(&json!({
            "error": {"category": "rate_limited", "message": "slow down", "side_effect_committed": true}
        }))
        .unwrap();
        assert_eq!(err.kind, FailureKind::RateLimited);
        assert_eq!(err.message, "slow down");
        assert!(err.side_effect_committed);
    }

    #[test]
    fn test_reported_failure_success_false() {
        let err = reported_failure(&json!({"success": false, "error": "bad key", "category": "auth_failure"}))
            .unwrap();
        assert_eq!(err.kind, FailureKind::AuthFailure);
        assert_eq!(err.message, "bad key");

        let err = reported_failure(&json!({"success": false})).unwrap();
        assert_eq!(err.kind, FailureKind::Unclassified);
        assert!(!err.side_effect_committed);
    }

    #[test]
    fn test_plain_outputs_are_not_failures() {
        assert!(reported_failure(&json!({"success": true, "results": []})).is_none());
        assert!(reported_failure(&json!({"error": "just a string field"})).is_none());
        assert!(reported_failure(&json!([1, 2])).is_none());
    }

    #[test]
    fn test_expand_env() {
        let lookup = |name: &str| (name == "API_KEY").then(|| "s3cret".to_string());
        assert_eq!(expand_env("Bearer ${API_KEY}", &lookup), "Bearer s3cret");
        assert_eq!(expand_env("${MISSING}-x", &lookup), "-x");
        assert_eq!(expand_env("no vars", &lookup), "no vars");
        assert_eq!(expand_env("broken ${API_KEY", &lookup), "broken ${API_KEY");
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("  short  ", 10), "short");
        assert_eq!(excerpt("abcdefghij", 4), "abcd...");
    }

    #[tokio::test]
    async fn test_dispatch_without_invoke_is_unclassified() {
        let invoker = DispatchInvoker::new(
            ProcessInvoker::new(std::env::temp_dir()),
            HttpInvoker::new(),
        );
        let desc = ToolDescriptor::new("inprocess_only");
        let input = json!({});
        let err = invoker
            .invoke(ToolCall {
                descriptor: &desc,
                input: &input,
                instance_id: Uuid::nil(),
                step_index: 0,
                idempotency_key: "k",
                timeout: Duration::from_secs(1),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Unclassified);
        assert!(err.message.contains("no invoke configuration"));
    }
}
