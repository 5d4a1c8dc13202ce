//! kubegate: validated, risk-gated execution of kubectl, helm and gcloud
//! operations.
//!
//! The library exposes the [`engine::Gateway`] pipeline; the `kubegate`
//! binary wraps it in a CLI and a JSON-lines session.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;

pub use engine::request::OperationRequest;
pub use engine::{Gateway, Outcome};
pub use error::{ErrorKind, GatewayError, KubegateError, Result};
