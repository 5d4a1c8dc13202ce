//! Operation catalog
//!
//! The closed set of operations the gateway accepts. Every per-operation
//! decision (parameter schema, namespace scope, tool, streaming mode) is an
//! exhaustive `match` over [`Operation`], so adding a variant without
//! deciding its policy fails to compile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    GetPods,
    GetNamespaces,
    GetServices,
    GetNodes,
    GetConfigmaps,
    GetSecrets,
    GetDeployments,
    GetEvents,
    GetPodEvents,
    CheckPodHealth,
    GetLogs,
    GetRbacRoles,
    GetClusterRoles,
    GetResourceUsage,
    GetCurrentContext,
    KubectlExplain,
    GetApiResources,
    HealthCheck,
    PortForward,
    CreateDeployment,
    ScaleDeployment,
    ExposeDeploymentWithService,
    SwitchContext,
    InstallHelmChart,
    UpgradeHelmChart,
    ConnectToGke,
    DeleteResource,
    UninstallHelmChart,
    MigrateGkeNodePoolWorkloads,
}

/// External binary an operation is executed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tool {
    Kubectl,
    Helm,
    Gcloud,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Kubectl, Tool::Helm, Tool::Gcloud];

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Kubectl => "kubectl",
            Tool::Helm => "helm",
            Tool::Gcloud => "gcloud",
        }
    }

    /// Arguments for a cheap, cluster-independent version probe.
    pub fn probe_args(&self) -> &'static [&'static str] {
        match self {
            Tool::Kubectl => &["version", "--client"],
            Tool::Helm => &["version", "--short"],
            Tool::Gcloud => &["--version"],
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How an operation relates to Kubernetes namespaces and kube contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Listing; no namespace means all namespaces.
    NamespacedList,
    /// Targets one object; no namespace means `default`.
    Namespaced,
    /// Cluster-scoped; a namespace is rejected.
    Cluster,
    /// Acts on the local kubeconfig; namespace and context are rejected.
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Kubernetes object name
    Name,
    Image,
    Replicas,
    Port,
    Lines,
    Bool,
    ChartRef,
    /// `name=url`
    HelmRepo,
    /// `key=value[,key=value]`
    HelmSet,
    ContextName,
    GcpProject,
    GcpZone,
    DeletableKind,
    ExplainPath,
    Protocol,
    ServiceType,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
}

const fn required(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: true,
        default: None,
    }
}

const fn optional(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        default: None,
    }
}

const fn defaulted(name: &'static str, kind: ParamKind, default: &'static str) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        default: Some(default),
    }
}

const POD_TARGET: &[ParamSpec] = &[required("pod_name", ParamKind::Name)];

const LOGS: &[ParamSpec] = &[
    required("pod_name", ParamKind::Name),
    optional("container", ParamKind::Name),
    optional("tail", ParamKind::Lines),
    defaulted("follow", ParamKind::Bool, "false"),
];

const EXPLAIN: &[ParamSpec] = &[required("resource", ParamKind::ExplainPath)];

const PORT_FORWARD: &[ParamSpec] = &[
    required("pod_name", ParamKind::Name),
    required("local_port", ParamKind::Port),
    required("pod_port", ParamKind::Port),
];

const CREATE_DEPLOYMENT: &[ParamSpec] = &[
    required("name", ParamKind::Name),
    required("image", ParamKind::Image),
    defaulted("replicas", ParamKind::Replicas, "1"),
];

const SCALE_DEPLOYMENT: &[ParamSpec] = &[
    required("name", ParamKind::Name),
    required("replicas", ParamKind::Replicas),
];

// `port` falls back to `target_port`; the validator fills it in.
const EXPOSE: &[ParamSpec] = &[
    required("deployment_name", ParamKind::Name),
    required("service_name", ParamKind::Name),
    required("target_port", ParamKind::Port),
    optional("port", ParamKind::Port),
    defaulted("protocol", ParamKind::Protocol, "TCP"),
    defaulted("service_type", ParamKind::ServiceType, "ClusterIP"),
];

const SWITCH_CONTEXT: &[ParamSpec] = &[required("context_name", ParamKind::ContextName)];

const HELM_CHART: &[ParamSpec] = &[
    required("name", ParamKind::Name),
    required("chart", ParamKind::ChartRef),
    optional("repo", ParamKind::HelmRepo),
    optional("set", ParamKind::HelmSet),
];

const CONNECT_GKE: &[ParamSpec] = &[
    required("project_id", ParamKind::GcpProject),
    required("zone", ParamKind::GcpZone),
    required("cluster_name", ParamKind::Name),
];

const DELETE_RESOURCE: &[ParamSpec] = &[
    required("kind", ParamKind::DeletableKind),
    required("name", ParamKind::Name),
];

const RELEASE: &[ParamSpec] = &[required("name", ParamKind::Name)];

const NODE_POOL: &[ParamSpec] = &[required("node_pool", ParamKind::Name)];

impl Operation {
    pub const ALL: [Operation; 29] = [
        Operation::GetPods,
        Operation::GetNamespaces,
        Operation::GetServices,
        Operation::GetNodes,
        Operation::GetConfigmaps,
        Operation::GetSecrets,
        Operation::GetDeployments,
        Operation::GetEvents,
        Operation::GetPodEvents,
        Operation::CheckPodHealth,
        Operation::GetLogs,
        Operation::GetRbacRoles,
        Operation::GetClusterRoles,
        Operation::GetResourceUsage,
        Operation::GetCurrentContext,
        Operation::KubectlExplain,
        Operation::GetApiResources,
        Operation::HealthCheck,
        Operation::PortForward,
        Operation::CreateDeployment,
        Operation::ScaleDeployment,
        Operation::ExposeDeploymentWithService,
        Operation::SwitchContext,
        Operation::InstallHelmChart,
        Operation::UpgradeHelmChart,
        Operation::ConnectToGke,
        Operation::DeleteResource,
        Operation::UninstallHelmChart,
        Operation::MigrateGkeNodePoolWorkloads,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetPods => "get_pods",
            Operation::GetNamespaces => "get_namespaces",
            Operation::GetServices => "get_services",
            Operation::GetNodes => "get_nodes",
            Operation::GetConfigmaps => "get_configmaps",
            Operation::GetSecrets => "get_secrets",
            Operation::GetDeployments => "get_deployments",
            Operation::GetEvents => "get_events",
            Operation::GetPodEvents => "get_pod_events",
            Operation::CheckPodHealth => "check_pod_health",
            Operation::GetLogs => "get_logs",
            Operation::GetRbacRoles => "get_rbac_roles",
            Operation::GetClusterRoles => "get_cluster_roles",
            Operation::GetResourceUsage => "get_resource_usage",
            Operation::GetCurrentContext => "get_current_context",
            Operation::KubectlExplain => "kubectl_explain",
            Operation::GetApiResources => "get_api_resources",
            Operation::HealthCheck => "health_check",
            Operation::PortForward => "port_forward",
            Operation::CreateDeployment => "create_deployment",
            Operation::ScaleDeployment => "scale_deployment",
            Operation::ExposeDeploymentWithService => "expose_deployment_with_service",
            Operation::SwitchContext => "switch_context",
            Operation::InstallHelmChart => "install_helm_chart",
            Operation::UpgradeHelmChart => "upgrade_helm_chart",
            Operation::ConnectToGke => "connect_to_gke",
            Operation::DeleteResource => "delete_resource",
            Operation::UninstallHelmChart => "uninstall_helm_chart",
            Operation::MigrateGkeNodePoolWorkloads => "migrate_gke_node_pool_workloads",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Operation::GetPods => "List pods",
            Operation::GetNamespaces => "List namespaces",
            Operation::GetServices => "List services",
            Operation::GetNodes => "List cluster nodes",
            Operation::GetConfigmaps => "List ConfigMaps",
            Operation::GetSecrets => "List Secrets (metadata only)",
            Operation::GetDeployments => "List deployments",
            Operation::GetEvents => "List events",
            Operation::GetPodEvents => "List events for one pod",
            Operation::CheckPodHealth => "Report a pod's phase and conditions",
            Operation::GetLogs => "Fetch or follow pod logs",
            Operation::GetRbacRoles => "List RBAC roles",
            Operation::GetClusterRoles => "List RBAC cluster roles",
            Operation::GetResourceUsage => "Show pod CPU/memory usage (kubectl top)",
            Operation::GetCurrentContext => "Show the current kube context",
            Operation::KubectlExplain => "Explain a resource schema",
            Operation::GetApiResources => "List API resources served by the cluster",
            Operation::HealthCheck => "Check API server readiness",
            Operation::PortForward => "Forward a local port to a pod port",
            Operation::CreateDeployment => "Create a deployment",
            Operation::ScaleDeployment => "Scale a deployment",
            Operation::ExposeDeploymentWithService => "Expose a deployment with a service",
            Operation::SwitchContext => "Switch the current kube context",
            Operation::InstallHelmChart => "Install a Helm chart",
            Operation::UpgradeHelmChart => "Upgrade a Helm release",
            Operation::ConnectToGke => "Fetch GKE cluster credentials into kubeconfig",
            Operation::DeleteResource => "Delete a namespaced resource",
            Operation::UninstallHelmChart => "Uninstall a Helm release",
            Operation::MigrateGkeNodePoolWorkloads => {
                "Cordon and drain every node of a GKE node pool"
            }
        }
    }

    pub fn tool(&self) -> Tool {
        match self {
            Operation::InstallHelmChart
            | Operation::UpgradeHelmChart
            | Operation::UninstallHelmChart => Tool::Helm,
            Operation::ConnectToGke => Tool::Gcloud,
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
            | Operation::PortForward
            | Operation::CreateDeployment
            | Operation::ScaleDeployment
            | Operation::ExposeDeploymentWithService
            | Operation::SwitchContext
            | Operation::DeleteResource
            | Operation::MigrateGkeNodePoolWorkloads => Tool::Kubectl,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Operation::GetPods
            | Operation::GetServices
            | Operation::GetConfigmaps
            | Operation::GetSecrets
            | Operation::GetDeployments
            | Operation::GetEvents
            | Operation::GetRbacRoles
            | Operation::GetResourceUsage => Scope::NamespacedList,
            Operation::GetPodEvents
            | Operation::CheckPodHealth
            | Operation::GetLogs
            | Operation::PortForward
            | Operation::CreateDeployment
            | Operation::ScaleDeployment
            | Operation::ExposeDeploymentWithService
            | Operation::InstallHelmChart
            | Operation::UpgradeHelmChart
            | Operation::DeleteResource
            | Operation::UninstallHelmChart => Scope::Namespaced,
            Operation::GetNamespaces
            | Operation::GetNodes
            | Operation::GetClusterRoles
            | Operation::KubectlExplain
            | Operation::GetApiResources
            | Operation::HealthCheck
            | Operation::MigrateGkeNodePoolWorkloads => Scope::Cluster,
            Operation::GetCurrentContext | Operation::SwitchContext | Operation::ConnectToGke => {
                Scope::Local
            }
        }
    }

    pub fn params(&self) -> &'static [ParamSpec] {
        match self {
            Operation::GetPods
            | Operation::GetNamespaces
            | Operation::GetServices
            | Operation::GetNodes
            | Operation::GetConfigmaps
            | Operation::GetSecrets
            | Operation::GetDeployments
            | Operation::GetEvents
            | Operation::GetRbacRoles
            | Operation::GetClusterRoles
            | Operation::GetResourceUsage
            | Operation::GetCurrentContext
            | Operation::GetApiResources
            | Operation::HealthCheck => &[],
            Operation::GetPodEvents | Operation::CheckPodHealth => POD_TARGET,
            Operation::GetLogs => LOGS,
            Operation::KubectlExplain => EXPLAIN,
            Operation::PortForward => PORT_FORWARD,
            Operation::CreateDeployment => CREATE_DEPLOYMENT,
            Operation::ScaleDeployment => SCALE_DEPLOYMENT,
            Operation::ExposeDeploymentWithService => EXPOSE,
            Operation::SwitchContext => SWITCH_CONTEXT,
            Operation::InstallHelmChart | Operation::UpgradeHelmChart => HELM_CHART,
            Operation::ConnectToGke => CONNECT_GKE,
            Operation::DeleteResource => DELETE_RESOURCE,
            Operation::UninstallHelmChart => RELEASE,
            Operation::MigrateGkeNodePoolWorkloads => NODE_POOL,
        }
    }

    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        self.params().iter().find(|spec| spec.name == name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| GatewayError::UnsupportedOperation {
                name: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>().unwrap(), op);
        }
    }

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = Operation::ALL.iter().map(|op| op.name()).collect();
        assert_eq!(names.len(), Operation::ALL.len());
    }

    #[test]
    fn test_serde_name_matches_catalog_name() {
        for op in Operation::ALL {
            let json = serde_json::to_string(&op).unwrap();
            assert_eq!(json, format!("\"{}\"", op.name()));
        }
    }

    #[test]
    fn test_unknown_operation_is_unsupported() {
        let err = "drop_cluster".parse::<Operation>().unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedOperation { name } if name == "drop_cluster"));
    }

    #[test]
    fn test_required_params_have_no_defaults() {
        for op in Operation::ALL {
            for spec in op.params() {
                assert!(
                    !(spec.required && spec.default.is_some()),
                    "{}.{} is required but has a default",
                    op,
                    spec.name
                );
            }
        }
    }

    #[test]
    fn test_helm_operations_use_helm() {
        assert_eq!(Operation::InstallHelmChart.tool(), Tool::Helm);
        assert_eq!(Operation::UninstallHelmChart.tool(), Tool::Helm);
        assert_eq!(Operation::ConnectToGke.tool(), Tool::Gcloud);
        assert_eq!(Operation::DeleteResource.tool(), Tool::Kubectl);
    }
}
