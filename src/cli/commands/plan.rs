use async_trait::async_trait;
use std::sync::Arc;

use super::{print_json, CommandHandler, CommandResult};
use crate::cli::{OperationArgs, OutputFormat};
use crate::engine::response::Response;
use crate::engine::Gateway;
use crate::Result;

/// Shows what an operation would run without running it
pub struct PlanCommand {
    gateway: Arc<Gateway>,
    operation: OperationArgs,
    format: OutputFormat,
}

impl PlanCommand {
    pub fn new(gateway: Arc<Gateway>, operation: OperationArgs, format: OutputFormat) -> Self {
        Self {
            gateway,
            operation,
            format,
        }
    }
}

#[async_trait]
impl CommandHandler for PlanCommand {
    async fn execute(&self) -> Result<CommandResult> {
        let request = self.operation.to_request();
        let report = match self.gateway.plan(&request) {
            Ok(report) => report,
            Err(e) => {
                print_json(&Response::from_error(request.operation.clone(), &e))?;
                return Ok(CommandResult::Error(e.to_string()));
            }
        };

        match self.format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Text => {
                println!("operation: {}", report.operation);
                println!("risk:      {}", report.risk);
                println!("target:    {}", report.target);
                if report.requires_confirmation {
                    println!("requires a confirmation token before execution");
                }
                if report.preview {
                    println!("preview only; pass --apply to apply");
                }
                for command in &report.commands {
                    println!("  $ {}", command);
                }
            }
        }
        Ok(CommandResult::Success(None))
    }

    fn name(&self) -> &'static str {
        "plan"
    }
}
