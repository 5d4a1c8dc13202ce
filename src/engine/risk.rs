//! Risk classification
//!
//! `base_risk` is the safety policy: one exhaustive match over every
//! supported operation. Configured overrides can only raise a level.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::operations::Operation;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    ReadOnly,
    Mutating,
    Destructive,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::ReadOnly => "read_only",
            RiskLevel::Mutating => "mutating",
            RiskLevel::Destructive => "destructive",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn base_risk(operation: Operation) -> RiskLevel {
    match operation {
        Operation::GetPods
        | Operation::GetNamespaces
        | Operation::GetServices
        | Operation::GetNodes
        | Operation::GetConfigmaps
        | Operation::GetSecrets
        | Operation::GetDeployments
        | Operation::GetEvents
        | Operation::GetPodEvents
        | Operation::CheckPodHealth
        | Operation::GetLogs
        | Operation::GetRbacRoles
        | Operation::GetClusterRoles
        | Operation::GetResourceUsage
        | Operation::GetCurrentContext
        | Operation::KubectlExplain
        | Operation::GetApiResources
        | Operation::HealthCheck
        | Operation::PortForward => RiskLevel::ReadOnly,
        Operation::CreateDeployment
        | Operation::ScaleDeployment
        | Operation::ExposeDeploymentWithService
        | Operation::SwitchContext
        | Operation::InstallHelmChart
        | Operation::UpgradeHelmChart
        | Operation::ConnectToGke => RiskLevel::Mutating,
        Operation::DeleteResource
        | Operation::UninstallHelmChart
        | Operation::MigrateGkeNodePoolWorkloads => RiskLevel::Destructive,
    }
}

#[derive(Debug, Clone, Default)]
pub struct RiskClassifier {
    overrides: BTreeMap<Operation, RiskLevel>,
}

impl RiskClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a classifier with configured overrides.
    ///
    /// Fails with the first override that would lower an operation's risk.
    pub fn with_overrides(overrides: BTreeMap<Operation, RiskLevel>) -> Result<Self, String> {
        for (operation, level) in &overrides {
            let base = base_risk(*operation);
            if *level < base {
                return Err(format!(
                    "risk override for {} cannot lower {} to {}",
                    operation, base, level
                ));
            }
        }
        Ok(Self { overrides })
    }

    pub fn classify(&self, operation: Operation) -> RiskLevel {
        let base = base_risk(operation);
        match self.overrides.get(&operation) {
            Some(level) => base.max(*level),
            None => base,
        }
    }

    pub fn classify_name(&self, name: &str) -> Result<RiskLevel, GatewayError> {
        let operation: Operation = name.parse()?;
        Ok(self.classify(operation))
    }
}
