//! Running model-issued code under an [`ExecutionPolicy`].
//!
//! One generic executor interprets every policy: hooks rewrite the request,
//! the runner is raced against the per-attempt timeout, and failed attempts
//! are retried while the policy allows it. Every attempt is recorded.

pub mod hooks;
pub mod policy;
pub mod runner;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use loom_core::{
    AttemptRecord, ConfigError, ExecutionError, ExecutionId, ExecutionRequest, ExecutionResult,
    StrategyMetadata,
};

use crate::error::panic_message;

use self::hooks::ExecutionHooks;
use self::policy::ExecutionPolicy;
use self::runner::CodeRunner;

/// Run `request` under `policy`.
///
/// Only an empty request is an `Err`; every runtime failure is reported in
/// the returned [`ExecutionResult`].
#[instrument(skip_all, fields(strategy = %policy.name))]
pub async fn execute(
    policy: &ExecutionPolicy,
    hooks: &[Arc<dyn ExecutionHooks>],
    runner: &dyn CodeRunner,
    request: ExecutionRequest,
) -> Result<ExecutionResult, ConfigError> {
    if request.code.trim().is_empty() {
        return Err(ConfigError::MissingCode);
    }
    let execution_id = ExecutionId::new();

    let mut request = request;
    for hook in hooks {
        let original = request.clone();
        match hook.before_execution(request).await {
            Ok(rewritten) => request = rewritten,
            Err(error) => {
                warn!(
                    execution_id = %execution_id,
                    hook = hook.name(),
                    error = %error,
                    "before_execution rejected request"
                );
                let mut reported = original;
                if let ExecutionError::UnresolvedReference(reference) = &error {
                    if !reported.references.contains(reference) {
                        reported.references.push(reference.clone());
                    }
                }
                notify_error(hooks, &error, &reported).await;
                let result = ExecutionResult {
                    success: false,
                    value: None,
                    error: Some(error),
                    request: reported,
                    metadata: StrategyMetadata {
                        strategy_name: policy.name.clone(),
                        attempt_count: 0,
                        execution_id,
                        attempts: Vec::new(),
                    },
                };
                return Ok(finish(hooks, result).await);
            }
        }
    }

    let max_attempts = policy.effective_attempts();
    let mut attempts = Vec::new();
    let mut outcome: Result<Value, ExecutionError> =
        Err(ExecutionError::failed("no attempt was made"));

    for attempt in 1..=max_attempts {
        let started_at = Utc::now();
        let clock = Instant::now();
        outcome = run_attempt(policy, runner, &request).await;
        attempts.push(AttemptRecord {
            attempt,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            error: outcome.as_ref().err().map(ToString::to_string),
        });

        let Err(error) = &outcome else {
            debug!(execution_id = %execution_id, attempt, "attempt succeeded");
            break;
        };
        notify_error(hooks, error, &request).await;

        if attempt >= max_attempts || !(policy.should_retry)(error, attempt) {
            break;
        }
        if (policy.should_clean_context)(error) {
            runner.reset().await;
        }
        let delay = (policy.retry_delay)(attempt);
        warn!(
            execution_id = %execution_id,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error_kind = error.error_kind(),
            error = %error,
            "attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }

    let attempt_count = attempts.len() as u32;
    let metadata = StrategyMetadata {
        strategy_name: policy.name.clone(),
        attempt_count,
        execution_id,
        attempts,
    };
    let result = match outcome {
        Ok(value) => {
            info!(execution_id = %metadata.execution_id, attempt_count, "execution succeeded");
            ExecutionResult {
                success: true,
                value: Some(value),
                error: None,
                request,
                metadata,
            }
        }
        Err(error) => {
            warn!(
                execution_id = %metadata.execution_id,
                attempt_count,
                error_kind = error.error_kind(),
                error = %error,
                "execution failed"
            );
            ExecutionResult {
                success: false,
                value: None,
                error: Some(error),
                request,
                metadata,
            }
        }
    };
    Ok(finish(hooks, result).await)
}

async fn run_attempt(
    policy: &ExecutionPolicy,
    runner: &dyn CodeRunner,
    request: &ExecutionRequest,
) -> Result<Value, ExecutionError> {
    let work = AssertUnwindSafe(runner.run(request)).catch_unwind();
    let caught = match policy.timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(caught) => caught,
            Err(_) => return Err(ExecutionError::Timeout(limit)),
        },
        None => work.await,
    };
    caught.unwrap_or_else(|panic| {
        Err(ExecutionError::failed(format!(
            "runner panicked: {}",
            panic_message(&panic)
        )))
    })
}

async fn notify_error(
    hooks: &[Arc<dyn ExecutionHooks>],
    error: &ExecutionError,
    request: &ExecutionRequest,
) {
    for hook in hooks {
        hook.on_error(error, request).await;
    }
}

async fn finish(hooks: &[Arc<dyn ExecutionHooks>], mut result: ExecutionResult) -> ExecutionResult {
    for hook in hooks {
        result = hook.after_execution(result).await;
    }
    result
}

/// A policy, its hooks and a runner, bundled for repeated use.
#[derive(Clone)]
pub struct Executor {
    policy: ExecutionPolicy,
    hooks: Vec<Arc<dyn ExecutionHooks>>,
    runner: Arc<dyn CodeRunner>,
}

impl Executor {
    pub fn new(policy: ExecutionPolicy, runner: Arc<dyn CodeRunner>) -> Self {
        Self {
            policy,
            hooks: Vec::new(),
            runner,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ConfigError> {
        execute(&self.policy, &self.hooks, self.runner.as_ref(), request).await
    }
}
