use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use loom_core::{ExecutionError, ExecutionRequest};

/// Runs one unit of model-issued code. Sandboxing is the implementor's
/// concern.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    async fn run(&self, request: &ExecutionRequest) -> Result<Value, ExecutionError>;

    /// Discard accumulated working state before a retry.
    async fn reset(&self) {}
}

/// Runs code as the final argument of an interpreter command
/// (`sh -c <code>` by default). Each run is a fresh process, and the
/// process is killed if the attempt is dropped (e.g. on timeout).
pub struct ProcessRunner {
    interpreter: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(vec!["sh".into(), "-c".into()])
    }
}

impl ProcessRunner {
    pub fn new(interpreter: Vec<String>) -> Self {
        Self {
            interpreter,
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl CodeRunner for ProcessRunner {
    async fn run(&self, request: &ExecutionRequest) -> Result<Value, ExecutionError> {
        let Some((program, args)) = self.interpreter.split_first() else {
            return Err(ExecutionError::RunnerUnavailable("empty interpreter command".into()));
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&request.code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| ExecutionError::RunnerUnavailable(format!("{program}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        debug!(
            program = %program,
            status = ?output.status.code(),
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "process finished"
        );

        if output.status.success() {
            return Ok(Value::String(stdout));
        }

        let message = stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match output.status.code() {
                Some(code) => format!("process exited with status {code}"),
                None => "process terminated by signal".to_string(),
            });
        Err(ExecutionError::Failed {
            message,
            stack: (!stderr.is_empty()).then_some(stderr),
        })
    }
}
