use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::operations::{Operation, Tool};
use crate::engine::risk::RiskLevel;

fn default_confirmation_ttl_secs() -> u64 {
    120
}

/// Upper bound on the confirmation window (one week)
pub const MAX_CONFIRMATION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

fn default_timeout_secs() -> u64 {
    30
}

/// Gateway configuration, read once at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// How long a destructive operation waits for confirmation
    #[serde(default = "default_confirmation_ttl_secs")]
    pub confirmation_ttl_secs: u64,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Per-operation timeouts, taking precedence over the class timeout
    #[serde(default)]
    pub operation_timeouts: BTreeMap<Operation, u64>,

    /// Raise the risk level of specific operations
    #[serde(default)]
    pub risk_overrides: BTreeMap<Operation, RiskLevel>,

    #[serde(default)]
    pub tools: ToolPaths,

    /// Exported to every tool as `KUBECONFIG`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,

    /// JSON-lines audit file; auditing is off when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            confirmation_ttl_secs: default_confirmation_ttl_secs(),
            timeouts: TimeoutSettings::default(),
            operation_timeouts: BTreeMap::new(),
            risk_overrides: BTreeMap::new(),
            tools: ToolPaths::default(),
            kubeconfig: None,
            audit_log: None,
        }
    }
}

impl GatewayConfig {
    pub fn confirmation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.confirmation_ttl_secs.min(MAX_CONFIRMATION_TTL_SECS) as i64)
    }

    /// Timeout for a bounded run of `operation` at the given risk level.
    ///
    /// A configured per-operation timeout wins, then the built-in one for
    /// long-running operations, then the risk class timeout.
    pub fn timeout_for(&self, operation: Operation, risk: RiskLevel) -> Duration {
        let secs = self
            .operation_timeouts
            .get(&operation)
            .copied()
            .or_else(|| builtin_timeout_secs(operation))
            .unwrap_or(match risk {
                RiskLevel::ReadOnly => self.timeouts.read_only_secs,
                RiskLevel::Mutating => self.timeouts.mutating_secs,
                RiskLevel::Destructive => self.timeouts.destructive_secs,
            });
        Duration::from_secs(secs)
    }
}

/// Draining a node pool evicts every pod on it and routinely outlasts the
/// class default.
const NODE_POOL_DRAIN_TIMEOUT_SECS: u64 = 1800;

/// Helm waits on hooks and chart downloads.
const HELM_RELEASE_TIMEOUT_SECS: u64 = 300;

fn builtin_timeout_secs(operation: Operation) -> Option<u64> {
    match operation {
        Operation::MigrateGkeNodePoolWorkloads => Some(NODE_POOL_DRAIN_TIMEOUT_SECS),
        Operation::InstallHelmChart | Operation::UpgradeHelmChart | Operation::UninstallHelmChart => {
            Some(HELM_RELEASE_TIMEOUT_SECS)
        }
        _ => None,
    }
}

/// Execution timeouts per risk class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TimeoutSettings {
    #[serde(default = "default_timeout_secs")]
    pub read_only_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub mutating_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub destructive_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            read_only_secs: default_timeout_secs(),
            mutating_secs: default_timeout_secs(),
            destructive_secs: default_timeout_secs(),
        }
    }
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_helm() -> String {
    "helm".to_string()
}

fn default_gcloud() -> String {
    "gcloud".to_string()
}

/// Binary name or path for each external tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ToolPaths {
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
    #[serde(default = "default_helm")]
    pub helm: String,
    #[serde(default = "default_gcloud")]
    pub gcloud: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
            helm: default_helm(),
            gcloud: default_gcloud(),
        }
    }
}

impl ToolPaths {
    pub fn program(&self, tool: Tool) -> &str {
        match tool {
            Tool::Kubectl => &self.kubectl,
            Tool::Helm => &self.helm,
            Tool::Gcloud => &self.gcloud,
        }
    }
}
