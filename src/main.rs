use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use kubegate::cli::commands::{
    doctor::DoctorCommand, invoke::InvokeCommand, operations::OperationsCommand,
    plan::PlanCommand, session::SessionCommand, CommandHandler, CommandResult,
};
use kubegate::cli::{Cli, Commands, LogLevel};
use kubegate::config::ConfigLoader;
use kubegate::Gateway;

const SWEEP_PERIOD: Duration = Duration::from_secs(5);

/// Logs always go to stderr; stdout carries responses.
fn initialize_tracing(log_level: LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(cli.log_level, cli.log_json);

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let config = loader.load().context("failed to load configuration")?;
    let gateway = Arc::new(Gateway::new(config).context("failed to initialize gateway")?);
    let sweeper = gateway.spawn_sweeper(SWEEP_PERIOD);

    let name = cli.command.name();
    debug!(command = name, executes_tools = cli.command.executes_tools(), "Dispatching");

    let handler: Box<dyn CommandHandler + Send + Sync> = match cli.command {
        Commands::Operations { format } => Box::new(OperationsCommand::new(gateway.clone(), format)),
        Commands::Plan { operation, format } => {
            Box::new(PlanCommand::new(gateway.clone(), operation, format))
        }
        Commands::Invoke {
            operation,
            yes,
            token,
        } => Box::new(InvokeCommand::new(gateway.clone(), operation, yes, token)),
        Commands::Session => Box::new(SessionCommand::new(gateway.clone())),
        Commands::Doctor { format } => Box::new(DoctorCommand::new(gateway.clone(), format)),
    };

    let result = handler.execute().await;
    sweeper.abort();
    gateway.shutdown().await;

    let result = match result {
        Ok(result) => result,
        Err(e) => {
            error!(command = handler.name(), "Command failed: {}", e);
            return Err(e.into());
        }
    };

    match &result {
        CommandResult::Success(Some(message)) => eprintln!("{}", message),
        CommandResult::Warning(message) => eprintln!("warning: {}", message),
        CommandResult::Error(message) => eprintln!("error: {}", message),
        CommandResult::Success(None) => {}
    }

    let code = result.exit_code();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
