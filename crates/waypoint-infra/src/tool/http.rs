//! HTTP tool transport.
//!
//! Sends the bound input as the JSON request body with an `Idempotency-Key`
//! header and returns the JSON response body as the output. Status codes map
//! onto the failure taxonomy: 429 is `RateLimited`, 408 and 5xx are
//! `TransientNetwork`, 401/403 are `AuthFailure`, other 4xx are
//! `InvalidInput`. A structured error body overrides the status mapping.

use std::time::Duration;

use serde_json::Value;
use waypoint_core::tool::invoker::{ToolCall, ToolError};
use waypoint_types::outcome::FailureKind;
use waypoint_types::tool::InvokeSpec;

use super::{excerpt, expand_env, reported_failure};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

pub struct HttpInvoker {
    http_client: reqwest::Client,
}

impl Default for HttpInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpInvoker {
    pub fn new() -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("waypoint/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { http_client }
    }

    pub(crate) async fn send(&self, spec: &InvokeSpec, call: ToolCall<'_>) -> Result<Value, ToolError> {
        let InvokeSpec::Http {
            url,
            method,
            headers,
        } = spec
        else {
            return Err(ToolError::new(
                FailureKind::Unclassified,
                "http transport given a non-http tool",
            ));
        };

        let tool = &call.descriptor.name;
        let http_method: reqwest::Method = method.to_ascii_uppercase().parse().map_err(|_| {
            ToolError::new(
                FailureKind::Unclassified,
                format!("tool '{tool}' has invalid HTTP method '{method}'"),
            )
        })?;

        let lookup = |name: &str| std::env::var(name).ok();
        let mut request = self
            .http_client
            .request(http_method, url.as_str())
            .timeout(call.timeout)
            .header(IDEMPOTENCY_KEY_HEADER, call.idempotency_key)
            .json(call.input);
        for (key, value) in headers {
            request = request.header(key.as_str(), expand_env(value, &lookup));
        }

        let response = request.send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                FailureKind::Timeout
            } else {
                FailureKind::TransientNetwork
            };
            ToolError::new(kind, format!("request to '{url}' failed: {e}"))
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            ToolError::new(
                FailureKind::TransientNetwork,
                format!("failed to read response from '{url}': {e}"),
            )
        })?;
        tracing::debug!(tool = %tool, url = %url, status, body_len = body.len(), "tool HTTP call returned");

        let parsed = serde_json::from_str::<Value>(&body);

        if (200..300).contains(&status) {
            return match parsed {
                Ok(value) => match value.get("success").and_then(Value::as_bool) {
                    Some(false) => Err(reported_failure(&value).unwrap_or_else(|| {
                        ToolError::new(FailureKind::Unclassified, "tool reported failure")
                    })),
                    _ => Ok(value),
                },
                Err(e) => Err(ToolError::new(
                    FailureKind::MalformedOutput,
                    format!("'{url}' returned non-JSON body ({e}): {}", excerpt(&body, 200)),
                )),
            };
        }

        if let Some(err) = parsed.ok().as_ref().and_then(reported_failure) {
            return Err(err);
        }

        Err(ToolError::new(
            classify_status(status),
            format!("'{url}' returned HTTP {status}: {}", excerpt(&body, 500)),
        ))
    }
}

/// Failure kind for a non-2xx status.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        429 => FailureKind::RateLimited,
        408 => FailureKind::TransientNetwork,
        401 | 403 => FailureKind::AuthFailure,
        400..=499 => FailureKind::InvalidInput,
        500..=599 => FailureKind::TransientNetwork,
        _ => FailureKind::Unclassified,
    }
}
