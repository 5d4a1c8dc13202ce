//! Shared fixtures for gateway integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use kubegate::config::GatewayConfig;
use kubegate::engine::command_executor::{
    CommandRunner, ExecutionError, ExecutionResult, Invocation, StreamHandle, StreamLine,
};
use kubegate::engine::confirmation::ManualClock;
use kubegate::Gateway;

/// What the next `run` call should produce
#[derive(Debug, Clone)]
pub enum Script {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
    },
    Timeout,
    Missing,
}

impl Script {
    pub fn ok(stdout: &str) -> Self {
        Script::Exit {
            code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn fail(code: i32, stderr: &str) -> Self {
        Script::Exit {
            code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }
}

/// Records every invocation and answers from a queue of scripts.
///
/// An empty queue answers with a successful run and empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    calls: Mutex<Vec<Invocation>>,
    scripts: Mutex<VecDeque<Script>>,
    stream_lines: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn stream_output(&self, lines: &[&str]) {
        *self.stream_lines.lock().unwrap() = lines.iter().map(|l| l.to_string()).collect();
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::ok(""));

        match script {
            Script::Exit {
                code,
                stdout,
                stderr,
            } => Ok(ExecutionResult {
                exit_code: code,
                stdout,
                stderr,
                duration: Duration::from_millis(7),
                success: code == 0,
            }),
            Script::Timeout => Err(ExecutionError::Timeout { after: timeout }),
            Script::Missing => Err(ExecutionError::ToolUnavailable {
                program: invocation.program.clone(),
            }),
        }
    }

    async fn stream(
        &self,
        invocation: &Invocation,
    ) -> Result<(StreamHandle, mpsc::Receiver<StreamLine>), ExecutionError> {
        self.calls.lock().unwrap().push(invocation.clone());
        let lines = self.stream_lines.lock().unwrap().clone();
        let (tx, rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            for line in lines {
                if tx.send(StreamLine::Stdout(line)).await.is_err() {
                    return None;
                }
            }
            // Hold the stream open until cancelled, like a port-forward.
            let _ = cancel_rx.await;
            None
        });

        Ok((StreamHandle::new(cancel_tx, task), rx))
    }
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
}

/// Kubeconfig path that never exists, so the host's kubeconfig stays out of tests.
pub const NO_KUBECONFIG: &str = "/nonexistent/kubegate-tests/kubeconfig";

pub fn gateway_with(
    mut config: GatewayConfig,
    runner: &Arc<ScriptedRunner>,
) -> (Gateway, Arc<ManualClock>) {
    config
        .kubeconfig
        .get_or_insert_with(|| std::path::PathBuf::from(NO_KUBECONFIG));
    let clock = Arc::new(ManualClock::new(start_time()));
    let gateway = Gateway::with_runner(config, runner.clone(), clock.clone()).unwrap();
    (gateway, clock)
}

pub fn gateway(runner: &Arc<ScriptedRunner>) -> (Gateway, Arc<ManualClock>) {
    gateway_with(GatewayConfig::default(), runner)
}

pub const PODS_JSON: &str = r#"{
  "apiVersion": "v1",
  "kind": "List",
  "items": [
    {
      "metadata": {"name": "web-0", "namespace": "prod"},
      "status": {"phase": "Running", "podIP": "10.0.0.4"}
    },
    {
      "metadata": {"name": "web-1", "namespace": "prod"},
      "status": {"phase": "Pending"}
    }
  ]
}"#;
