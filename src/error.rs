use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::engine::normalizer::NormalizedResult;

/// Errors surfaced by the gateway pipeline.
///
/// Every variant maps onto one [`ErrorKind`] so callers can branch on the
/// kind without matching on payloads.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("invalid argument '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("unsupported operation '{name}'")]
    UnsupportedOperation { name: String },

    #[error("operation '{operation}' on {target} requires confirmation (token expires at {expires_at})")]
    ConfirmationRequired {
        operation: String,
        target: String,
        token: String,
        expires_at: DateTime<Utc>,
    },

    #[error("confirmation mismatch: {reason}")]
    ConfirmationMismatch { reason: String },

    #[error("confirmation token has expired")]
    ConfirmationExpired,

    #[error("{} failed with exit code {}", .result.operation, .result.execution.as_ref().map(|e| e.exit_code).unwrap_or(-1))]
    ExecutionFailed { result: Box<NormalizedResult> },

    #[error("operation '{operation}' timed out after {}s", .after.as_secs_f64())]
    Timeout { operation: String, after: Duration },

    /// `diagnostics` holds the normalized run when the tool started but
    /// rejected its credentials, so stderr and remediation survive.
    #[error("{tool} is unavailable: {reason}")]
    ToolUnavailable {
        tool: String,
        reason: String,
        diagnostics: Option<Box<NormalizedResult>>,
    },
}

impl GatewayError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        GatewayError::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            GatewayError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            GatewayError::ConfirmationRequired { .. } => ErrorKind::ConfirmationRequired,
            GatewayError::ConfirmationMismatch { .. } => ErrorKind::ConfirmationMismatch,
            GatewayError::ConfirmationExpired => ErrorKind::ConfirmationExpired,
            GatewayError::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            GatewayError::Timeout { .. } => ErrorKind::Timeout,
            GatewayError::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
        }
    }

    /// The normalized run behind this error, if a command actually ran.
    pub fn result(&self) -> Option<&NormalizedResult> {
        match self {
            GatewayError::ExecutionFailed { result } => Some(&**result),
            GatewayError::ToolUnavailable {
                diagnostics: Some(result),
                ..
            } => Some(&**result),
            _ => None,
        }
    }
}

/// Flat error taxonomy used on the wire and in audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    UnsupportedOperation,
    ConfirmationRequired,
    ConfirmationMismatch,
    ConfirmationExpired,
    ExecutionFailed,
    Timeout,
    ToolUnavailable,
}

#[derive(Error, Debug)]
pub enum KubegateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KubegateError>;
