//! Wire response
//!
//! Every outcome and every error folds into one serializable [`Response`],
//! so a caller always receives a result object.

use serde::Serialize;
use serde_json::Value;

use super::confirmation::{ConfirmationTicket, PendingConfirmation};
use super::normalizer::{ErrorDetail, ExecutionSummary, NormalizedResult};
use super::{Outcome, StreamSession};
use crate::error::{ErrorKind, GatewayError};

const DOCTOR_HINT: &str = "Run `kubegate doctor` to check tool installation and credentials";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    Preview,
    ConfirmationRequired,
    Streaming,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Caller-supplied correlation id, echoed back
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub status: ResponseStatus,
    pub operation: String,
    pub success: bool,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<ConfirmationTicket>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plan: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionSummary>,
}

impl Response {
    fn empty(status: ResponseStatus, operation: impl Into<String>, success: bool) -> Self {
        Self {
            id: None,
            status,
            operation: operation.into(),
            success,
            data: Value::Null,
            error: None,
            warnings: Vec::new(),
            next_steps: Vec::new(),
            confirmation: None,
            stream_id: None,
            plan: Vec::new(),
            execution: None,
        }
    }

    fn from_result(status: ResponseStatus, result: &NormalizedResult) -> Self {
        Self {
            data: result.data.clone(),
            error: result.error.clone(),
            warnings: result.warnings.clone(),
            next_steps: result.next_steps.clone(),
            execution: result.execution.clone(),
            ..Self::empty(status, result.operation.clone(), result.success)
        }
    }

    pub fn with_id(mut self, id: Option<Value>) -> Self {
        self.id = id;
        self
    }

    pub fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Completed(result) => Self::from_result(ResponseStatus::Completed, result),
            Outcome::Preview(preview) => Self {
                plan: preview.commands.clone(),
                ..Self::from_result(ResponseStatus::Preview, &preview.result)
            },
            Outcome::ConfirmationRequired(ticket) => Self::confirmation_required(ticket),
            Outcome::Stream(session) => Self::streaming(session),
        }
    }

    pub fn streaming(session: &StreamSession) -> Self {
        Self {
            stream_id: Some(session.id.to_string()),
            plan: vec![shell_words::join(&session.command)],
            next_steps: vec![format!(
                "Cancel with cancel_stream and stream_id={}",
                session.id
            )],
            ..Self::empty(ResponseStatus::Streaming, session.operation.to_string(), true)
        }
    }

    pub fn confirmation_required(ticket: &ConfirmationTicket) -> Self {
        let err = ticket.clone().into_error();
        Self {
            error: Some(ErrorDetail::from_error(&err)),
            next_steps: vec![format!(
                "Resubmit the identical request with confirmation_token={} before {}",
                ticket.token, ticket.expires_at
            )],
            confirmation: Some(ticket.clone()),
            ..Self::empty(
                ResponseStatus::ConfirmationRequired,
                ticket.operation.to_string(),
                false,
            )
        }
    }

    pub fn from_error(operation: impl Into<String>, err: &GatewayError) -> Self {
        match err {
            GatewayError::ExecutionFailed { result } => Self {
                error: Some(ErrorDetail::from_error(err)),
                ..Self::from_result(ResponseStatus::Error, result)
            },
            GatewayError::ToolUnavailable {
                diagnostics: Some(result),
                ..
            } => {
                let mut response = Self {
                    error: Some(ErrorDetail::from_error(err)),
                    ..Self::from_result(ResponseStatus::Error, result)
                };
                response.next_steps.push(DOCTOR_HINT.to_string());
                response
            }
            GatewayError::ConfirmationRequired {
                operation,
                target,
                token,
                expires_at,
            } => match operation.parse() {
                Ok(parsed) => Self::confirmation_required(&ConfirmationTicket {
                    token: token.clone(),
                    operation: parsed,
                    target: target.clone(),
                    expires_at: *expires_at,
                }),
                Err(_) => Self {
                    error: Some(ErrorDetail::from_error(err)),
                    ..Self::empty(ResponseStatus::Error, operation.clone(), false)
                },
            },
            _ => {
                let next_steps = match err.kind() {
                    ErrorKind::ConfirmationExpired | ErrorKind::ConfirmationMismatch => vec![
                        "Submit the request without a token to obtain a new confirmation token"
                            .to_string(),
                    ],
                    ErrorKind::ToolUnavailable => vec![DOCTOR_HINT.to_string()],
                    ErrorKind::Timeout => vec![
                        "Raise the timeout in the configuration or narrow the request".to_string(),
                    ],
                    _ => Vec::new(),
                };
                Self {
                    error: Some(ErrorDetail::from_error(err)),
                    next_steps,
                    ..Self::empty(ResponseStatus::Error, operation, false)
                }
            }
        }
    }

    pub fn confirmation_cancelled(pending: &PendingConfirmation) -> Self {
        Self {
            confirmation: Some(pending.ticket()),
            ..Self::empty(
                ResponseStatus::Cancelled,
                pending.key.operation.to_string(),
                true,
            )
        }
    }

    pub fn stream_cancelled(operation: impl Into<String>, stream_id: &str, exit_code: Option<i32>) -> Self {
        Self {
            stream_id: Some(stream_id.to_string()),
            data: serde_json::json!({ "exitCode": exit_code }),
            ..Self::empty(ResponseStatus::Cancelled, operation, true)
        }
    }
}
