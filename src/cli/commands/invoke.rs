use async_trait::async_trait;
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use tracing::{debug, info};

use super::{print_json, CommandHandler, CommandResult};
use crate::cli::OperationArgs;
use crate::engine::command_executor::StreamLine;
use crate::engine::confirmation::ConfirmationTicket;
use crate::engine::response::Response;
use crate::engine::{Gateway, Outcome, StreamSession};
use crate::Result;

/// One-shot invocation from the command line
pub struct InvokeCommand {
    gateway: Arc<Gateway>,
    operation: OperationArgs,
    yes: bool,
    token: Option<String>,
}

/// Ask on the terminal whether to proceed. Anything but y/yes declines.
fn confirm_on_terminal(ticket: &ConfirmationTicket) -> bool {
    let mut stderr = io::stderr();
    let _ = writeln!(stderr, "\n─── Confirmation Required ───────────────────────");
    let _ = writeln!(stderr, "  Operation: {}", ticket.operation);
    let _ = writeln!(stderr, "  Target:    {}", ticket.target);
    let _ = writeln!(stderr, "  Expires:   {}", ticket.expires_at);
    let _ = writeln!(stderr, "──────────────────────────────────────────────────");
    let _ = write!(stderr, "  Proceed? [y/N]: ");
    let _ = stderr.flush();

    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

impl InvokeCommand {
    pub fn new(
        gateway: Arc<Gateway>,
        operation: OperationArgs,
        yes: bool,
        token: Option<String>,
    ) -> Self {
        Self {
            gateway,
            operation,
            yes,
            token,
        }
    }

    /// Decide what to do with a pending confirmation. Returns the response
    /// to print.
    async fn resolve_confirmation(&self, ticket: ConfirmationTicket) -> Response {
        let approved = if self.yes {
            true
        } else if io::stdin().is_terminal() {
            let prompt_ticket = ticket.clone();
            tokio::task::spawn_blocking(move || confirm_on_terminal(&prompt_ticket))
                .await
                .unwrap_or(false)
        } else {
            // Non-interactive: hand the token back so the caller can resubmit.
            return Response::confirmation_required(&ticket);
        };

        if !approved {
            info!("Confirmation declined");
            return match self.gateway.cancel_confirmation(&ticket.token).await {
                Ok(pending) => Response::confirmation_cancelled(&pending),
                Err(e) => Response::from_error(ticket.operation.to_string(), &e),
            };
        }

        let request = self.operation.to_request().with_token(ticket.token);
        self.gateway.handle(request).await
    }

    /// Relay stream output until it ends or Ctrl-C, then reap the process.
    async fn follow(&self, mut session: StreamSession) -> Result<Response> {
        eprintln!("streaming {}; press Ctrl-C to stop", shell_words::join(&session.command));
        loop {
            tokio::select! {
                line = session.lines.recv() => match line {
                    Some(StreamLine::Stdout(line)) => println!("{}", line),
                    Some(StreamLine::Stderr(line)) => eprintln!("{}", line),
                    None => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    debug!("Interrupted; cancelling stream");
                    break;
                }
            }
        }

        let id = session.id.to_string();
        let exit_code = self
            .gateway
            .cancel_stream(session.id)
            .await
            .and_then(|(_, code)| code);
        Ok(Response::stream_cancelled(
            session.operation.to_string(),
            &id,
            exit_code,
        ))
    }
}

#[async_trait]
impl CommandHandler for InvokeCommand {
    async fn execute(&self) -> Result<CommandResult> {
        let mut request = self.operation.to_request();
        if let Some(token) = &self.token {
            request = request.with_token(token.clone());
        }
        let operation = request.operation.clone();

        let response = match self.gateway.invoke(request).await {
            Ok(Outcome::ConfirmationRequired(ticket)) => self.resolve_confirmation(ticket).await,
            Ok(Outcome::Stream(session)) => self.follow(session).await?,
            Ok(outcome) => Response::from_outcome(&outcome),
            Err(e) => Response::from_error(operation, &e),
        };

        print_json(&response)?;
        Ok(if response.success {
            CommandResult::Success(None)
        } else {
            let message = response
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| format!("{:?}", response.status));
            CommandResult::Error(message)
        })
    }

    fn name(&self) -> &'static str {
        "invoke"
    }
}
