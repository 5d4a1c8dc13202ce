use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use super::{print_json, CommandHandler, CommandResult};
use crate::cli::OutputFormat;
use crate::engine::operations::{Operation, ParamSpec, Scope, Tool};
use crate::engine::risk::RiskLevel;
use crate::engine::Gateway;
use crate::Result;

#[derive(Debug, Serialize)]
struct CatalogEntry {
    name: &'static str,
    description: &'static str,
    risk: RiskLevel,
    tool: Tool,
    scope: Scope,
    params: &'static [ParamSpec],
}

pub struct OperationsCommand {
    gateway: Arc<Gateway>,
    format: OutputFormat,
}

impl OperationsCommand {
    pub fn new(gateway: Arc<Gateway>, format: OutputFormat) -> Self {
        Self { gateway, format }
    }

    fn catalog(&self) -> Vec<CatalogEntry> {
        Operation::ALL
            .iter()
            .map(|op| CatalogEntry {
                name: op.name(),
                description: op.description(),
                risk: self.gateway.classify(*op),
                tool: op.tool(),
                scope: op.scope(),
                params: op.params(),
            })
            .collect()
    }
}

fn describe_params(params: &[ParamSpec]) -> String {
    params
        .iter()
        .map(|spec| match (spec.required, spec.default) {
            (true, _) => spec.name.to_string(),
            (false, Some(default)) => format!("[{}={}]", spec.name, default),
            (false, None) => format!("[{}]", spec.name),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl CommandHandler for OperationsCommand {
    async fn execute(&self) -> Result<CommandResult> {
        let catalog = self.catalog();
        match self.format {
            OutputFormat::Json => print_json(&catalog)?,
            OutputFormat::Text => {
                println!("{:<34} {:<12} {:<8} PARAMETERS", "OPERATION", "RISK", "TOOL");
                for entry in &catalog {
                    println!(
                        "{:<34} {:<12} {:<8} {}",
                        entry.name,
                        entry.risk,
                        entry.tool,
                        describe_params(entry.params)
                    );
                }
            }
        }
        Ok(CommandResult::Success(None))
    }

    fn name(&self) -> &'static str {
        "operations"
    }
}
