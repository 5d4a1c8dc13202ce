//! Audit logging for gateway events
//!
//! One JSON line per terminal event: executed, previewed, confirmation
//! issued/confirmed/rejected/expired, or rejected by validation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::risk::RiskLevel;
use crate::error::ErrorKind;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Executed,
    Previewed,
    StreamStarted,
    StreamCancelled,
    ConfirmationIssued,
    ConfirmationCancelled,
    Failed,
    Rejected,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl AuditRecord {
    pub fn new(event: AuditEvent, operation: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            operation: operation.into(),
            risk: None,
            target: None,
            error: None,
            exit_code: None,
            duration_ms: None,
            command: None,
        }
    }

    pub fn risk(mut self, risk: RiskLevel) -> Self {
        self.risk = Some(risk);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn error(mut self, kind: ErrorKind) -> Self {
        self.error = Some(kind);
        self
    }

    pub fn execution(mut self, exit_code: i32, duration_ms: u64) -> Self {
        self.exit_code = Some(exit_code);
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

/// Appends records to a single JSONL file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    // Serializes appends so concurrent records never interleave.
    write_lock: Mutex<()>,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, record: &AuditRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Enum wrapper so the gateway can hold either sink without boxing.
#[derive(Debug)]
pub enum AuditSinkImpl {
    Disabled,
    File(FileSink),
}

impl AuditSinkImpl {
    pub fn from_path(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => AuditSinkImpl::File(FileSink::new(path)),
            None => AuditSinkImpl::Disabled,
        }
    }

    /// Write a record. Audit failures are logged, never surfaced to callers.
    pub async fn record(&self, record: AuditRecord) {
        match self {
            AuditSinkImpl::Disabled => {}
            AuditSinkImpl::File(sink) => {
                if let Err(e) = sink.write(&record).await {
                    warn!("Failed to write audit record to {:?}: {}", sink.path(), e);
                }
            }
        }
    }
}
