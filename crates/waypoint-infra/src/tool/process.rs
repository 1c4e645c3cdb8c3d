//! Subprocess tool transport.
//!
//! Runs `program args...` with the bound input as JSON on stdin and reads a
//! JSON document from stdout. The child is killed if the call is dropped,
//! which is how the executor's timeout takes effect.
//!
//! Exit status classification:
//! - `0` with JSON stdout: success, unless the document says `"success": false`.
//! - `0` with anything else on stdout: `MalformedOutput`.
//! - non-zero with a structured error on stdout or stderr: the reported category.
//! - `75` (`EX_TEMPFAIL`): `TransientNetwork`; `77` (`EX_NOPERM`): `AuthFailure`.
//! - anything else: `Unclassified`.

use std::path::PathBuf;
use std::process::Stdio;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use waypoint_core::tool::invoker::{ToolCall, ToolError};
use waypoint_types::outcome::FailureKind;
use waypoint_types::tool::InvokeSpec;

use super::{excerpt, expand_env, reported_failure};

const EX_TEMPFAIL: i32 = 75;
const EX_NOPERM: i32 = 77;

/// Environment variable carrying the call's idempotency key.
pub const IDEMPOTENCY_KEY_ENV: &str = "WAYPOINT_IDEMPOTENCY_KEY";

pub struct ProcessInvoker {
    default_cwd: PathBuf,
}

impl ProcessInvoker {
    /// `default_cwd` is used when a tool does not set `cwd`; relative `cwd`
    /// values are resolved against it.
    pub fn new(default_cwd: PathBuf) -> Self {
        Self { default_cwd }
    }

    pub(crate) async fn run(&self, spec: &InvokeSpec, call: ToolCall<'_>) -> Result<Value, ToolError> {
        let InvokeSpec::Process {
            program,
            args,
            cwd,
            env,
        } = spec
        else {
            return Err(ToolError::new(
                FailureKind::Unclassified,
                "process transport given a non-process tool",
            ));
        };

        let tool = &call.descriptor.name;
        let cwd = match cwd {
            Some(dir) => self.default_cwd.join(dir),
            None => self.default_cwd.clone(),
        };
        let lookup = |name: &str| std::env::var(name).ok();

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .current_dir(&cwd)
            .env(IDEMPOTENCY_KEY_ENV, call.idempotency_key)
            .env("WAYPOINT_INSTANCE_ID", call.instance_id.to_string())
            .env("WAYPOINT_STEP_INDEX", call.step_index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            command.env(key, expand_env(value, &lookup));
        }

        tracing::debug!(tool = %tool, program = %program, cwd = %cwd.display(), "spawning tool process");
        let mut child = command.spawn().map_err(|e| {
            ToolError::new(
                FailureKind::Unclassified,
                format!("failed to spawn '{program}' for tool '{tool}': {e}"),
            )
        })?;

        let payload = serde_json::to_vec(call.input).map_err(|e| {
            ToolError::new(FailureKind::InvalidInput, format!("input is not serializable: {e}"))
        })?;
        // Stdin is fed while stdout and stderr drain.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A tool that ignores stdin may close it early.
                stdin.write_all(&payload).await.ok();
                stdin.shutdown().await.ok();
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());

        let output = output.map_err(|e| {
            ToolError::new(
                FailureKind::Unclassified,
                format!("failed to wait for tool '{tool}': {e}"),
            )
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            let value: Value = serde_json::from_str(stdout.trim()).map_err(|e| {
                ToolError::new(
                    FailureKind::MalformedOutput,
                    format!("tool '{tool}' wrote non-JSON output ({e}): {}", excerpt(&stdout, 200)),
                )
            })?;
            if value.get("success").and_then(Value::as_bool) == Some(false) {
                if let Some(err) = reported_failure(&value) {
                    return Err(err);
                }
            }
            return Ok(value);
        }

        for text in [&stdout, &stderr] {
            if let Ok(doc) = serde_json::from_str::<Value>(text.trim()) {
                if let Some(err) = reported_failure(&doc) {
                    return Err(err);
                }
            }
        }

        let kind = match output.status.code() {
            Some(EX_TEMPFAIL) => FailureKind::TransientNetwork,
            Some(EX_NOPERM) => FailureKind::AuthFailure,
            _ => FailureKind::Unclassified,
        };
        Err(ToolError::new(
            kind,
            format!("tool '{tool}' exited with {}: {}", output.status, excerpt(&stderr, 500)),
        ))
    }
}
