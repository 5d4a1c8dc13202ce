use async_trait::async_trait;
use std::sync::Arc;

use super::{print_json, CommandHandler, CommandResult};
use crate::cli::OutputFormat;
use crate::engine::operations::Tool;
use crate::engine::Gateway;
use crate::Result;

/// Reports which external tools are usable
pub struct DoctorCommand {
    gateway: Arc<Gateway>,
    format: OutputFormat,
}

impl DoctorCommand {
    pub fn new(gateway: Arc<Gateway>, format: OutputFormat) -> Self {
        Self { gateway, format }
    }
}

#[async_trait]
impl CommandHandler for DoctorCommand {
    async fn execute(&self) -> Result<CommandResult> {
        let statuses = self.gateway.probe_tools().await;

        match self.format {
            OutputFormat::Json => print_json(&statuses)?,
            OutputFormat::Text => {
                for status in &statuses {
                    let detail = match (&status.version, &status.error) {
                        (Some(version), _) => version.clone(),
                        (None, Some(error)) => error.clone(),
                        (None, None) => String::new(),
                    };
                    let mark = if status.available { "ok" } else { "missing" };
                    println!("{:<8} {:<8} {}", status.tool, mark, detail);
                }
            }
        }

        // kubectl is required for almost every operation; the others are optional.
        let kubectl_ok = statuses
            .iter()
            .any(|status| status.tool == Tool::Kubectl && status.available);
        let missing: Vec<String> = statuses
            .iter()
            .filter(|status| !status.available)
            .map(|status| status.tool.to_string())
            .collect();

        Ok(if !kubectl_ok {
            CommandResult::Error("kubectl is not available".to_string())
        } else if !missing.is_empty() {
            CommandResult::Warning(format!("unavailable: {}", missing.join(", ")))
        } else {
            CommandResult::Success(None)
        })
    }

    fn name(&self) -> &'static str {
        "doctor"
    }
}
