//! Shell-free command execution
//!
//! Operations are turned into [`Invocation`]s (a program plus a discrete
//! argument vector) by the [`builder`] and executed by a [`CommandRunner`].
//! No argument ever passes through a shell.
//!
//! Key Properties:
//! - Direct process spawning with argv arrays
//! - Bounded mode kills the child when the timeout elapses
//! - Streaming mode hands output lines to the caller until cancelled

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command as TokioCommand;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::operations::Tool;

pub mod builder;
pub mod stream;

pub use builder::{DryRun, InvocationBuilder, PlannedOperation};
pub use stream::{StreamHandle, StreamLine};

/// Output format the tool was asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Json,
    Yaml,
    Text,
}

/// One subprocess call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub tool: Tool,
    /// Program to execute (must be in PATH or absolute path)
    pub program: String,
    pub args: Vec<String>,
    /// Environment variables (extends the inherited environment)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    pub output: OutputFormat,
}

impl Invocation {
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Shell-quoted rendering for display and audit. Never executed.
    pub fn command_line(&self) -> String {
        shell_words::join(self.argv())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run to completion under a timeout
    Bounded,
    /// Run until the caller cancels; output is delivered line by line
    Streaming,
}

/// Ordered invocations for one operation, run until the first failure.
/// The last step is the operation itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvocationPlan {
    pub steps: Vec<Invocation>,
    pub mode: ExecutionMode,
    /// Runs before the steps; when it lists the context, the steps are skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_if_context: Option<ContextCheck>,
}

/// Look for `context` in the output of `invocation`, one name per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextCheck {
    pub invocation: Invocation,
    pub context: String,
}

impl ContextCheck {
    pub fn is_listed(&self, stdout: &str) -> bool {
        stdout.lines().any(|line| line.trim() == self.context)
    }
}

impl InvocationPlan {
    pub fn single(invocation: Invocation, mode: ExecutionMode) -> Self {
        Self::sequence(vec![invocation], mode)
    }

    pub fn sequence(steps: Vec<Invocation>, mode: ExecutionMode) -> Self {
        Self {
            steps,
            mode,
            skip_if_context: None,
        }
    }

    pub fn skip_if_context(mut self, check: ContextCheck) -> Self {
        self.skip_if_context = Some(check);
        self
    }

    pub fn primary(&self) -> Option<&Invocation> {
        self.steps.last()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.skip_if_context
            .iter()
            .map(|check| &check.invocation)
            .chain(&self.steps)
            .map(Invocation::command_line)
            .collect()
    }
}

/// Result of running one invocation to completion
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub success: bool,
}

/// Errors that can occur during command execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("{program} not found on PATH")]
    ToolUnavailable { program: String },

    #[error("Process spawn failed: {0}")]
    Spawn(String),

    #[error("Timeout exceeded after {}s", .after.as_secs_f64())]
    Timeout { after: Duration },

    #[error("I/O operation failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Seam between the gateway and the operating system.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, killing the child if `timeout` elapses first.
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError>;

    /// Start a long-running invocation and deliver its output as lines.
    async fn stream(
        &self,
        invocation: &Invocation,
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamLine>), ExecutionError>;
}

/// Lines buffered per stream before the reader waits for the consumer.
pub const STREAM_BUFFER: usize = 256;

/// Runs invocations as real subprocesses via `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(invocation: &Invocation) -> TokioCommand {
        let mut cmd = TokioCommand::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> ExecutionError {
    if err.kind() == std::io::ErrorKind::NotFound {
        ExecutionError::ToolUnavailable {
            program: program.to_string(),
        }
    } else {
        ExecutionError::Spawn(format!("{}: {}", program, err))
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        debug!("Executing: {}", invocation.command_line());
        let started = Instant::now();

        let child = Self::command(invocation)
            .spawn()
            .map_err(|e| spawn_error(&invocation.program, e))?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "{} timed out after {:?}; child killed",
                    invocation.program, timeout
                );
                return Err(ExecutionError::Timeout { after: timeout });
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        Ok(ExecutionResult {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
            success: output.status.success(),
        })
    }

    async fn stream(
        &self,
        invocation: &Invocation,
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamLine>), ExecutionError> {
        debug!("Streaming: {}", invocation.command_line());

        let child = Self::command(invocation)
            .spawn()
            .map_err(|e| spawn_error(&invocation.program, e))?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(stream::pump(child, tx, cancel_rx));
        Ok((StreamHandle::new(cancel_tx, task), rx))
    }
}
