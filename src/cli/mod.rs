pub mod app;
pub mod commands;

pub use app::{Cli, Commands, LogLevel, OperationArgs, OutputFormat};
