//! Step executor: one step, one normalized [`Outcome`].
//!
//! Owns the invocation policy around a [`ToolInvoker`]:
//! - environment and input-schema checks before any call;
//! - a per-invocation timeout;
//! - bounded retries with exponential backoff for transient failures;
//! - a single fallback attempt once the primary's retries are exhausted;
//! - the idempotency rule: a non-idempotent tool that reports a committed side
//!   effect is never invoked again and ends in `RequiresConfirmation`.
//!
//! The executor never touches the checkpoint store. The runner decides what
//! to persist from the returned outcome.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use waypoint_types::config::RetryPolicy;
use waypoint_types::outcome::{FailureKind, FailureReason, Outcome};
use waypoint_types::tool::{CostClass, ToolDescriptor};
use waypoint_types::workflow::StepSpec;

use super::retry::RetryHandler;
use crate::tool::invoker::{ToolCall, ToolInvoker};
use crate::tool::registry::missing_env;
use crate::tool::schema;

/// Environment lookup used for `required_env` checks.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

/// One step to execute, with its tools already resolved.
#[derive(Debug, Clone, Copy)]
pub struct StepInvocation<'a> {
    pub instance_id: Uuid,
    pub step_index: usize,
    pub step: &'a StepSpec,
    pub primary: &'a ToolDescriptor,
    pub fallback: Option<&'a ToolDescriptor>,
    pub input: &'a Value,
}

/// One call made while executing a step.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub tool: String,
    /// 1-based attempt number for this tool.
    pub attempt: u32,
    /// Backoff slept before this attempt.
    pub delay: Duration,
    /// `None` when the attempt succeeded.
    pub failure: Option<FailureReason>,
}

/// Outcome of a step together with the attempts that produced it.
#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: Outcome,
    pub attempts: Vec<AttemptRecord>,
}

/// How one tool's run ended.
enum ToolRun {
    Success(Value),
    /// Never retried, never falls back.
    Fatal(FailureReason),
    /// Transient failures used up the attempt budget.
    Exhausted(FailureReason),
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

pub struct StepExecutor<I: ToolInvoker> {
    invoker: I,
    policy: RetryPolicy,
    default_timeout: Duration,
    env: EnvLookup,
}

impl<I: ToolInvoker> StepExecutor<I> {
    pub fn new(invoker: I, policy: RetryPolicy, default_timeout: Duration) -> Self {
        Self {
            invoker,
            policy,
            default_timeout,
            env: Arc::new(|key| std::env::var(key).ok()),
        }
    }

    /// Replace the process-environment lookup.
    pub fn with_env(mut self, env: EnvLookup) -> Self {
        self.env = env;
        self
    }

    pub fn env(&self) -> &EnvLookup {
        &self.env
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute a bare tool call with the default timeout and no fallback.
    pub async fn execute(&self, descriptor: &ToolDescriptor, input: &Value) -> Outcome {
        let step = StepSpec {
            name: descriptor.name.clone(),
            tool: descriptor.name.clone(),
            input: input.clone(),
            fallback: None,
            idempotent: None,
            cost_class: None,
            timeout_secs: None,
        };
        self.execute_step(StepInvocation {
            instance_id: Uuid::nil(),
            step_index: 0,
            step: &step,
            primary: descriptor,
            fallback: None,
            input,
        })
        .await
        .outcome
    }

    /// Execute a step: the primary tool with retries, then the fallback once.
    pub async fn execute_step(&self, inv: StepInvocation<'_>) -> Execution {
        let mut attempts = Vec::new();
        let timeout = inv
            .step
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let primary = self
            .run_tool(&inv, inv.primary, timeout, self.policy.max_attempts.max(1), &mut attempts)
            .await;

        let outcome = match primary {
            ToolRun::Success(output) => Outcome::Success {
                output,
                tool: inv.primary.name.clone(),
            },
            ToolRun::Fatal(reason) => Outcome::FatalFailure(reason),
            ToolRun::Exhausted(reason) => match inv.fallback {
                None => Outcome::RetryableFailure(reason),
                Some(fallback) => {
                    tracing::warn!(
                        instance_id = %inv.instance_id,
                        step = %inv.step.name,
                        primary = %inv.primary.name,
                        fallback = %fallback.name,
                        error = %reason,
                        "primary tool exhausted retries, trying fallback"
                    );
                    match self.run_tool(&inv, fallback, timeout, 1, &mut attempts).await {
                        ToolRun::Success(output) => Outcome::Success {
                            output,
                            tool: fallback.name.clone(),
                        },
                        ToolRun::Fatal(reason) => Outcome::FatalFailure(reason),
                        ToolRun::Exhausted(reason) => Outcome::RetryableFailure(reason),
                    }
                }
            },
        };

        Execution { outcome, attempts }
    }

    async fn run_tool(
        &self,
        inv: &StepInvocation<'_>,
        tool: &ToolDescriptor,
        timeout: Duration,
        max_attempts: u32,
        attempts: &mut Vec<AttemptRecord>,
    ) -> ToolRun {
        let missing = missing_env(tool, &*self.env);
        if !missing.is_empty() {
            return ToolRun::Fatal(FailureReason::new(
                FailureKind::MissingEnv,
                format!("tool '{}' requires {}", tool.name, missing.join(", ")),
            ));
        }

        if let Err(violation) = schema::validate(tool.input_schema.as_ref(), inv.input) {
            return ToolRun::Fatal(FailureReason::new(
                FailureKind::InvalidInput,
                format!("input rejected by '{}' schema: {violation}", tool.name),
            ));
        }

        let idempotent = tool.idempotent && inv.step.idempotent.unwrap_or(true);
        let cost = tool.cost_class.max(inv.step.cost_class.unwrap_or_default());
        let key = idempotency_key(inv.instance_id, inv.step_index, &tool.name);
        let policy = RetryPolicy {
            max_attempts,
            ..self.policy.clone()
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let delay = if attempt > 1 {
                let delay = RetryHandler::delay_for_retry(&policy, attempt - 1);
                tokio::time::sleep(delay).await;
                delay
            } else {
                Duration::ZERO
            };

            let call = ToolCall {
                descriptor: tool,
                input: inv.input,
                instance_id: inv.instance_id,
                step_index: inv.step_index,
                idempotency_key: &key,
                timeout,
            };
            tracing::debug!(
                instance_id = %inv.instance_id,
                step = %inv.step.name,
                tool = %tool.name,
                attempt,
                "invoking tool"
            );

            let failure = match tokio::time::timeout(timeout, self.invoker.invoke(call)).await {
                Ok(Ok(output)) => {
                    match schema::validate(tool.output_schema.as_ref(), &output) {
                        Ok(()) => {
                            attempts.push(AttemptRecord {
                                tool: tool.name.clone(),
                                attempt,
                                delay,
                                failure: None,
                            });
                            return ToolRun::Success(output);
                        }
                        Err(violation) => {
                            // The call went through; only the payload is unusable.
                            let kind = if !idempotent && cost == CostClass::Paid {
                                FailureKind::RequiresConfirmation
                            } else {
                                FailureKind::MalformedOutput
                            };
                            let reason = FailureReason::new(
                                kind,
                                format!("output rejected by '{}' schema: {violation}", tool.name),
                            );
                            attempts.push(AttemptRecord {
                                tool: tool.name.clone(),
                                attempt,
                                delay,
                                failure: Some(reason.clone()),
                            });
                            return ToolRun::Fatal(reason);
                        }
                    }
                }
                Ok(Err(err)) if err.side_effect_committed && !idempotent => {
                    let reason = FailureReason::new(
                        FailureKind::RequiresConfirmation,
                        format!(
                            "'{}' reported a partial side effect ({err}); not re-invoking a non-idempotent tool",
                            tool.name
                        ),
                    );
                    tracing::warn!(
                        instance_id = %inv.instance_id,
                        step = %inv.step.name,
                        tool = %tool.name,
                        cost_class = %cost,
                        "partial side effect on non-idempotent tool, operator confirmation required"
                    );
                    attempts.push(AttemptRecord {
                        tool: tool.name.clone(),
                        attempt,
                        delay,
                        failure: Some(reason.clone()),
                    });
                    return ToolRun::Fatal(reason);
                }
                Ok(Err(err)) => FailureReason::new(err.kind, err.message),
                Err(_) => FailureReason::new(
                    FailureKind::Timeout,
                    format!("'{}' did not answer within {}s", tool.name, timeout.as_secs_f64()),
                ),
            };

            attempts.push(AttemptRecord {
                tool: tool.name.clone(),
                attempt,
                delay,
                failure: Some(failure.clone()),
            });

            if !failure.kind.is_retryable() {
                tracing::warn!(
                    instance_id = %inv.instance_id,
                    step = %inv.step.name,
                    tool = %tool.name,
                    attempt,
                    error = %failure,
                    "tool failed permanently"
                );
                return ToolRun::Fatal(failure);
            }
            if !RetryHandler::should_retry(&policy, attempt, failure.kind) {
                tracing::warn!(
                    instance_id = %inv.instance_id,
                    step = %inv.step.name,
                    tool = %tool.name,
                    attempts = attempt,
                    error = %failure,
                    "tool retries exhausted"
                );
                return ToolRun::Exhausted(failure);
            }
            tracing::info!(
                instance_id = %inv.instance_id,
                step = %inv.step.name,
                tool = %tool.name,
                attempt,
                error = %failure,
                "transient tool failure, will retry"
            );
        }
    }
}

/// Stable key for all attempts of one tool within one step of one instance.
pub fn idempotency_key(instance_id: Uuid, step_index: usize, tool: &str) -> String {
    let digest = Sha256::digest(format!("{instance_id}:{step_index}:{tool}").as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
