//! JSON-lines session driver
//!
//! Each stdin line is one message; each stdout line is one JSON object.
//! Pending confirmations and running streams live as long as the session.
//!
//! ```text
//! {"id":1,"operation":"delete_resource","params":{"kind":"pod","name":"x"}}
//! {"id":2,"operation":"delete_resource","params":{"kind":"pod","name":"x"},"confirmation_token":"..."}
//! {"id":3,"action":"cancel_confirmation","token":"..."}
//! {"id":4,"action":"cancel_stream","stream_id":"..."}
//! ```

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CommandHandler, CommandResult};
use crate::engine::command_executor::StreamLine;
use crate::engine::request::OperationRequest;
use crate::engine::response::Response;
use crate::engine::{Gateway, Outcome};
use crate::error::GatewayError;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    Invoke {
        id: Option<Value>,
        request: OperationRequest,
    },
    CancelConfirmation {
        id: Option<Value>,
        token: String,
    },
    CancelStream {
        id: Option<Value>,
        stream_id: String,
    },
}

fn take_string(obj: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.remove(*key))
        .and_then(|value| value.as_str().map(str::to_string))
}

/// Parse one input line. Lines without an `action` are invocations.
pub fn parse_message(line: &str) -> std::result::Result<SessionMessage, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {}", e))?;
    let mut obj = match value {
        Value::Object(obj) => obj,
        _ => return Err("each line must be a JSON object".to_string()),
    };
    let id = obj.remove("id");
    let action = take_string(&mut obj, &["action"]).unwrap_or_else(|| "invoke".to_string());

    match action.as_str() {
        "invoke" => {
            let request: OperationRequest = serde_json::from_value(Value::Object(obj))
                .map_err(|e| format!("invalid request: {}", e))?;
            Ok(SessionMessage::Invoke { id, request })
        }
        "cancel_confirmation" => {
            let token = take_string(&mut obj, &["token", "confirmation_token"])
                .ok_or_else(|| "cancel_confirmation requires a token".to_string())?;
            Ok(SessionMessage::CancelConfirmation { id, token })
        }
        "cancel_stream" => {
            let stream_id = take_string(&mut obj, &["stream_id", "streamId"])
                .ok_or_else(|| "cancel_stream requires a stream_id".to_string())?;
            Ok(SessionMessage::CancelStream { id, stream_id })
        }
        other => Err(format!("unknown action '{}'", other)),
    }
}

/// A line of stream output as written to stdout.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamEvent<'a> {
    stream_id: &'a str,
    #[serde(flatten)]
    line: &'a StreamLine,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamEnd<'a> {
    stream_id: &'a str,
    event: &'static str,
    exit_code: Option<i32>,
}

type Output = mpsc::UnboundedSender<String>;

fn emit<T: Serialize>(out: &Output, value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => {
            let _ = out.send(line);
        }
        Err(e) => warn!("Failed to serialize session output: {}", e),
    }
}

pub struct SessionCommand {
    gateway: Arc<Gateway>,
}

impl SessionCommand {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }
}

/// Handle one message and write its response.
async fn dispatch(gateway: Arc<Gateway>, message: SessionMessage, out: Output) {
    match message {
        SessionMessage::Invoke { id, request } => {
            let operation = request.operation.clone();
            match gateway.invoke(request).await {
                Ok(Outcome::Stream(mut session)) => {
                    let stream_id = session.id.to_string();
                    emit(&out, &Response::streaming(&session).with_id(id));
                    while let Some(line) = session.lines.recv().await {
                        emit(
                            &out,
                            &StreamEvent {
                                stream_id: &stream_id,
                                line: &line,
                            },
                        );
                    }
                    // Reap the process if it ended on its own; a no-op after cancel_stream.
                    let exit_code = gateway
                        .cancel_stream(session.id)
                        .await
                        .and_then(|(_, code)| code);
                    emit(
                        &out,
                        &StreamEnd {
                            stream_id: &stream_id,
                            event: "stream_end",
                            exit_code,
                        },
                    );
                }
                Ok(outcome) => emit(&out, &Response::from_outcome(&outcome).with_id(id)),
                Err(e) => emit(&out, &Response::from_error(operation, &e).with_id(id)),
            }
        }
        SessionMessage::CancelConfirmation { id, token } => {
            let response = match gateway.cancel_confirmation(&token).await {
                Ok(pending) => Response::confirmation_cancelled(&pending),
                Err(e) => Response::from_error("cancel_confirmation", &e),
            };
            emit(&out, &response.with_id(id));
        }
        SessionMessage::CancelStream { id, stream_id } => {
            let response = match Uuid::parse_str(&stream_id) {
                Ok(uuid) => match gateway.cancel_stream(uuid).await {
                    Some((operation, exit_code)) => {
                        Response::stream_cancelled(operation.to_string(), &stream_id, exit_code)
                    }
                    None => Response::from_error(
                        "cancel_stream",
                        &GatewayError::invalid("stream_id", "no running stream with this id"),
                    ),
                },
                Err(_) => Response::from_error(
                    "cancel_stream",
                    &GatewayError::invalid("stream_id", "not a valid stream id"),
                ),
            };
            emit(&out, &response.with_id(id));
        }
    }
}

#[async_trait]
impl CommandHandler for SessionCommand {
    async fn execute(&self) -> Result<CommandResult> {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(mut line) = out_rx.recv().await {
                line.push('\n');
                if stdout.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
        });

        let mut tasks = JoinSet::new();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("Session started");

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match parse_message(&line) {
                Ok(message) => {
                    debug!("Session message: {:?}", message);
                    tasks.spawn(dispatch(
                        Arc::clone(&self.gateway),
                        message,
                        out_tx.clone(),
                    ));
                }
                Err(reason) => {
                    let err = GatewayError::invalid("message", reason);
                    emit(&out_tx, &Response::from_error("", &err));
                }
            }
            // Reap finished handlers as we go.
            while tasks.try_join_next().is_some() {}
        }

        info!("Input closed; stopping streams");
        self.gateway.shutdown().await;
        while tasks.join_next().await.is_some() {}

        drop(out_tx);
        let _ = writer.await;
        Ok(CommandResult::Success(None))
    }

    fn name(&self) -> &'static str {
        "session"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_is_invoke() {
        let message = parse_message(
            r#"{"id":7,"operation":"get_pods","namespace":"prod"}"#,
        )
        .unwrap();
        match message {
            SessionMessage::Invoke { id, request } => {
                assert_eq!(id, Some(Value::from(7)));
                assert_eq!(request.operation, "get_pods");
                assert_eq!(request.namespace.as_deref(), Some("prod"));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_cancel_messages() {
        assert_eq!(
            parse_message(r#"{"action":"cancel_confirmation","token":"abc"}"#).unwrap(),
            SessionMessage::CancelConfirmation {
                id: None,
                token: "abc".to_string()
            }
        );
        assert_eq!(
            parse_message(r#"{"id":"s","action":"cancel_stream","streamId":"u"}"#).unwrap(),
            SessionMessage::CancelStream {
                id: Some(Value::from("s")),
                stream_id: "u".to_string()
            }
        );
    }

    #[test]
    fn test_bad_lines() {
        assert!(parse_message("not json").is_err());
        assert!(parse_message("[1,2]").is_err());
        assert!(parse_message(r#"{"action":"cancel_stream"}"#).is_err());
        assert!(parse_message(r#"{"action":"reboot"}"#).unwrap_err().contains("reboot"));
    }
}
