//! Gateway configuration: YAML types and the loader that finds them,
//! plus the kubeconfig lookup used to pin the active context.

pub mod kubeconfig;
pub mod loader;
pub mod types;

pub use loader::{ConfigLoader, CONFIG_ENV};
pub use types::{GatewayConfig, TimeoutSettings, ToolPaths};
