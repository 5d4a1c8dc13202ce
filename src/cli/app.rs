use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::engine::request::OperationRequest;

/// kubegate: a guarded command gateway for kubectl, helm and gcloud
#[derive(Parser, Debug)]
#[command(name = "kubegate")]
#[command(version)]
#[command(about = "Validated, risk-gated execution of kubectl/helm/gcloud operations")]
#[command(
    long_about = "kubegate accepts named cluster operations, validates their arguments, classifies their risk, requires a confirmation token for destructive operations, and runs the underlying tool without a shell."
)]
pub struct Cli {
    /// Configuration file (defaults to $KUBEGATE_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log verbosity; RUST_LOG takes precedence when set
    #[arg(long, value_enum, default_value = "warn", global = true)]
    pub log_level: LogLevel,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

/// The operation and its arguments, shared by `plan` and `invoke`
#[derive(Args, Debug, Clone)]
pub struct OperationArgs {
    /// Operation name (see `kubegate operations`)
    pub operation: String,

    /// Operation parameter as key=value (repeatable)
    #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
    pub params: Vec<(String, String)>,

    /// Target namespace; listings default to all namespaces
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Kube context to run against instead of the current one
    #[arg(long)]
    pub context: Option<String>,

    /// Apply a mutating operation instead of previewing it
    #[arg(long)]
    pub apply: bool,
}

impl OperationArgs {
    pub fn to_request(&self) -> OperationRequest {
        let mut request = OperationRequest::new(self.operation.clone());
        for (key, value) in &self.params {
            request = request.param(key.clone(), value.clone());
        }
        request.namespace = self.namespace.clone();
        request.context = self.context.clone();
        request.apply = self.apply;
        request
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List supported operations with their risk level and parameters
    Operations {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate and classify an operation and show the exact commands, without running them
    Plan {
        #[command(flatten)]
        operation: OperationArgs,

        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,
    },

    /// Run one operation
    Invoke {
        #[command(flatten)]
        operation: OperationArgs,

        /// Confirm destructive operations without prompting
        #[arg(short, long)]
        yes: bool,

        /// Confirmation token from an earlier confirmation_required response
        #[arg(long)]
        token: Option<String>,
    },

    /// Serve JSON-lines requests on stdin, one response per stdout line
    Session,

    /// Check that kubectl, helm and gcloud are installed
    Doctor {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl Commands {
    /// Get the command name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Operations { .. } => "operations",
            Commands::Plan { .. } => "plan",
            Commands::Invoke { .. } => "invoke",
            Commands::Session => "session",
            Commands::Doctor { .. } => "doctor",
        }
    }

    /// Whether this command may run external tools
    pub fn executes_tools(&self) -> bool {
        matches!(
            self,
            Commands::Invoke { .. } | Commands::Session | Commands::Doctor { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_invoke_parsing() {
        let cli = Cli::parse_from([
            "kubegate",
            "invoke",
            "scale_deployment",
            "-p",
            "name=web",
            "--param",
            "replicas=3",
            "-n",
            "prod",
            "--apply",
        ]);

        match cli.command {
            Commands::Invoke {
                operation,
                yes,
                token,
            } => {
                assert_eq!(operation.operation, "scale_deployment");
                assert!(operation.apply);
                assert!(!yes);
                assert!(token.is_none());
                let request = operation.to_request();
                assert_eq!(request.params.get("replicas").map(String::as_str), Some("3"));
                assert_eq!(request.namespace.as_deref(), Some("prod"));
            }
            _ => panic!("Wrong command parsed"),
        }
        assert_eq!(cli.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_param_value_may_contain_equals() {
        let cli = Cli::parse_from([
            "kubegate",
            "plan",
            "install_helm_chart",
            "-p",
            "repo=bitnami=https://charts.bitnami.com/bitnami",
        ]);
        match cli.command {
            Commands::Plan { operation, format } => {
                assert_eq!(
                    operation.params,
                    vec![(
                        "repo".to_string(),
                        "bitnami=https://charts.bitnami.com/bitnami".to_string()
                    )]
                );
                assert_eq!(format, OutputFormat::Json);
            }
            _ => panic!("Wrong command parsed"),
        }
    }

    #[test]
    fn test_param_without_equals_rejected() {
        assert!(Cli::try_parse_from(["kubegate", "plan", "get_pods", "-p", "oops"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "kubegate",
            "doctor",
            "--log-level",
            "debug",
            "--log-json",
            "--config",
            "/etc/kubegate.yaml",
        ]);
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert!(cli.log_json);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/kubegate.yaml")));
        assert_eq!(cli.command.name(), "doctor");
        assert!(cli.command.executes_tools());
    }
}
