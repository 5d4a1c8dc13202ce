//! Builds the exact argument vectors for each operation.
//!
//! Every parameter reaching this module has passed validation, so nothing
//! here can fail; values are appended as discrete arguments, never joined
//! into a string that a shell would parse.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::{ContextCheck, ExecutionMode, Invocation, InvocationPlan, OutputFormat};
use crate::config::ToolPaths;
use crate::engine::operations::{Operation, Tool};
use crate::engine::request::{NamespaceSelection, ValidatedRequest};

/// How a preview of a mutating operation is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DryRun {
    /// Read-only or destructive operation; previews do not apply
    NotApplicable,
    /// The tool validates the change server- or client-side without applying it
    Native,
    /// The tool has no dry-run; a preview returns the plan only
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedOperation {
    pub plan: InvocationPlan,
    pub dry_run: DryRun,
}

#[derive(Debug, Clone, Default)]
pub struct InvocationBuilder {
    tools: ToolPaths,
    kubeconfig: Option<PathBuf>,
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl InvocationBuilder {
    pub fn new(tools: ToolPaths, kubeconfig: Option<PathBuf>) -> Self {
        Self { tools, kubeconfig }
    }

    fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(path) = &self.kubeconfig {
            env.insert(
                "KUBECONFIG".to_string(),
                path.to_string_lossy().into_owned(),
            );
        }
        env
    }

    fn invocation(&self, tool: Tool, args: Vec<String>, output: OutputFormat) -> Invocation {
        Invocation {
            tool,
            program: self.tools.program(tool).to_string(),
            args,
            env: self.env(),
            output,
        }
    }

    fn kubectl(
        &self,
        request: &ValidatedRequest,
        args: Vec<String>,
        output: OutputFormat,
    ) -> Invocation {
        let mut argv = Vec::with_capacity(args.len() + 2);
        if let Some(context) = &request.context {
            argv.push("--context".to_string());
            argv.push(context.clone());
        }
        argv.extend(args);
        self.invocation(Tool::Kubectl, argv, output)
    }

    fn helm(&self, request: &ValidatedRequest, mut args: Vec<String>, output: OutputFormat) -> Invocation {
        if let Some(context) = &request.context {
            args.push("--kube-context".to_string());
            args.push(context.clone());
        }
        self.invocation(Tool::Helm, args, output)
    }

    /// `-n <ns>`, `--all-namespaces`, or nothing.
    fn namespace_args(request: &ValidatedRequest) -> Vec<String> {
        match &request.namespace {
            NamespaceSelection::All => owned(&["--all-namespaces"]),
            NamespaceSelection::Named(ns) => vec!["-n".to_string(), ns.clone()],
            NamespaceSelection::NotApplicable => Vec::new(),
        }
    }

    /// `kubectl get <resource> [ns] -o json`
    fn kubectl_get(&self, request: &ValidatedRequest, resource: &str) -> Invocation {
        let mut args = vec!["get".to_string(), resource.to_string()];
        args.extend(Self::namespace_args(request));
        args.extend(owned(&["-o", "json"]));
        self.kubectl(request, args, OutputFormat::Json)
    }

    fn bounded(invocation: Invocation) -> InvocationPlan {
        InvocationPlan::single(invocation, ExecutionMode::Bounded)
    }

    /// Version probe for `doctor`; never touches a cluster.
    pub fn probe(&self, tool: Tool) -> Invocation {
        self.invocation(tool, owned(tool.probe_args()), OutputFormat::Text)
    }

    /// Build the plan for a request.
    ///
    /// With `preview` set, mutating operations that support it get their
    /// tool's dry-run flag.
    pub fn plan(&self, request: &ValidatedRequest, preview: bool) -> PlannedOperation {
        let text = |name: &str| request.text(name).unwrap_or_default().to_string();
        let number = |name: &str| request.number(name).unwrap_or_default();

        let (plan, dry_run) = match request.operation {
            Operation::GetPods => (Self::bounded(self.kubectl_get(request, "pods")), DryRun::NotApplicable),
            Operation::GetNamespaces => (
                Self::bounded(self.kubectl_get(request, "namespaces")),
                DryRun::NotApplicable,
            ),
            Operation::GetServices => (
                Self::bounded(self.kubectl_get(request, "services")),
                DryRun::NotApplicable,
            ),
            Operation::GetNodes => (Self::bounded(self.kubectl_get(request, "nodes")), DryRun::NotApplicable),
            Operation::GetConfigmaps => (
                Self::bounded(self.kubectl_get(request, "configmaps")),
                DryRun::NotApplicable,
            ),
            Operation::GetSecrets => (
                Self::bounded(self.kubectl_get(request, "secrets")),
                DryRun::NotApplicable,
            ),
            Operation::GetDeployments => (
                Self::bounded(self.kubectl_get(request, "deployments")),
                DryRun::NotApplicable,
            ),
            Operation::GetEvents => (
                Self::bounded(self.kubectl_get(request, "events")),
                DryRun::NotApplicable,
            ),
            Operation::GetRbacRoles => (Self::bounded(self.kubectl_get(request, "roles")), DryRun::NotApplicable),
            Operation::GetClusterRoles => (
                Self::bounded(self.kubectl_get(request, "clusterroles")),
                DryRun::NotApplicable,
            ),
            Operation::GetPodEvents => {
                let mut args = owned(&["get", "events"]);
                args.extend(Self::namespace_args(request));
                args.push("--field-selector".to_string());
                args.push(format!("involvedObject.name={}", text("pod_name")));
                args.extend(owned(&["-o", "json"]));
                (
                    Self::bounded(self.kubectl(request, args, OutputFormat::Json)),
                    DryRun::NotApplicable,
                )
            }
            Operation::CheckPodHealth => {
                let mut args = vec!["get".to_string(), "pod".to_string(), text("pod_name")];
                args.extend(Self::namespace_args(request));
                args.extend(owned(&["-o", "json"]));
                (
                    Self::bounded(self.kubectl(request, args, OutputFormat::Json)),
                    DryRun::NotApplicable,
                )
            }
            Operation::GetLogs => {
                let mut args = vec!["logs".to_string(), text("pod_name")];
                args.extend(Self::namespace_args(request));
                if let Some(container) = request.text("container") {
                    args.push("-c".to_string());
                    args.push(container.to_string());
                }
                if let Some(tail) = request.number("tail") {
                    args.push(format!("--tail={}", tail));
                }
                let follow = request.flag("follow");
                if follow {
                    args.push("-f".to_string());
                }
                let mode = if follow {
                    ExecutionMode::Streaming
                } else {
                    ExecutionMode::Bounded
                };
                (
                    InvocationPlan::single(self.kubectl(request, args, OutputFormat::Text), mode),
                    DryRun::NotApplicable,
                )
            }
            Operation::GetResourceUsage => {
                let mut pods = owned(&["top", "pods"]);
                pods.extend(Self::namespace_args(request));
                let steps = vec![
                    self.kubectl(request, pods, OutputFormat::Text),
                    self.kubectl(request, owned(&["top", "nodes"]), OutputFormat::Text),
                ];
                (
                    InvocationPlan::sequence(steps, ExecutionMode::Bounded),
                    DryRun::NotApplicable,
                )
            }
            Operation::GetCurrentContext => (
                Self::bounded(self.kubectl(request, owned(&["config", "current-context"]), OutputFormat::Text)),
                DryRun::NotApplicable,
            ),
            Operation::KubectlExplain => (
                Self::bounded(self.kubectl(
                    request,
                    vec!["explain".to_string(), text("resource")],
                    OutputFormat::Text,
                )),
                DryRun::NotApplicable,
            ),
            Operation::GetApiResources => (
                Self::bounded(self.kubectl(request, owned(&["api-resources"]), OutputFormat::Text)),
                DryRun::NotApplicable,
            ),
            Operation::HealthCheck => (
                Self::bounded(self.kubectl(request, owned(&["get", "--raw", "/readyz"]), OutputFormat::Text)),
                DryRun::NotApplicable,
            ),
            Operation::PortForward => {
                let mut args = vec![
                    "port-forward".to_string(),
                    format!("pod/{}", text("pod_name")),
                    format!("{}:{}", number("local_port"), number("pod_port")),
                ];
                args.extend(Self::namespace_args(request));
                (
                    InvocationPlan::single(
                        self.kubectl(request, args, OutputFormat::Text),
                        ExecutionMode::Streaming,
                    ),
                    DryRun::NotApplicable,
                )
            }
            Operation::CreateDeployment => {
                let mut args = vec![
                    "create".to_string(),
                    "deployment".to_string(),
                    text("name"),
                    format!("--image={}", text("image")),
                    format!("--replicas={}", number("replicas")),
                ];
                args.extend(Self::namespace_args(request));
                if preview {
                    args.push("--dry-run=client".to_string());
                }
                args.extend(owned(&["-o", "json"]));
                (
                    Self::bounded(self.kubectl(request, args, OutputFormat::Json)),
                    DryRun::Native,
                )
            }
            Operation::ScaleDeployment => {
                let mut args = vec![
                    "scale".to_string(),
                    format!("deployment/{}", text("name")),
                    format!("--replicas={}", number("replicas")),
                ];
                args.extend(Self::namespace_args(request));
                if preview {
                    args.push("--dry-run=client".to_string());
                }
                (
                    Self::bounded(self.kubectl(request, args, OutputFormat::Text)),
                    DryRun::Native,
                )
            }
            Operation::ExposeDeploymentWithService => {
                let mut args = vec![
                    "expose".to_string(),
                    "deployment".to_string(),
                    text("deployment_name"),
                    format!("--name={}", text("service_name")),
                    format!("--port={}", number("port")),
                    format!("--target-port={}", number("target_port")),
                    format!("--protocol={}", text("protocol")),
                    format!("--type={}", text("service_type")),
                ];
                args.extend(Self::namespace_args(request));
                if preview {
                    args.push("--dry-run=client".to_string());
                }
                args.extend(owned(&["-o", "json"]));
                (
                    Self::bounded(self.kubectl(request, args, OutputFormat::Json)),
                    DryRun::Native,
                )
            }
            Operation::SwitchContext => (
                Self::bounded(self.invocation(
                    Tool::Kubectl,
                    vec![
                        "config".to_string(),
                        "use-context".to_string(),
                        text("context_name"),
                    ],
                    OutputFormat::Text,
                )),
                DryRun::Unsupported,
            ),
            Operation::ConnectToGke => {
                let credentials = self.invocation(
                    Tool::Gcloud,
                    vec![
                        "container".to_string(),
                        "clusters".to_string(),
                        "get-credentials".to_string(),
                        text("cluster_name"),
                        format!("--zone={}", text("zone")),
                        format!("--project={}", text("project_id")),
                    ],
                    OutputFormat::Text,
                );
                // Context name written by get-credentials
                let check = ContextCheck {
                    invocation: self.invocation(
                        Tool::Kubectl,
                        owned(&["config", "get-contexts", "-o", "name"]),
                        OutputFormat::Text,
                    ),
                    context: format!(
                        "gke_{}_{}_{}",
                        text("project_id"),
                        text("zone"),
                        text("cluster_name")
                    ),
                };
                (
                    Self::bounded(credentials).skip_if_context(check),
                    DryRun::Unsupported,
                )
            }
            Operation::InstallHelmChart | Operation::UpgradeHelmChart => {
                (self.helm_release(request, preview), DryRun::Native)
            }
            Operation::UninstallHelmChart => {
                let mut args = vec!["uninstall".to_string(), text("name")];
                args.extend(Self::namespace_args(request));
                (
                    Self::bounded(self.helm(request, args, OutputFormat::Text)),
                    DryRun::NotApplicable,
                )
            }
            Operation::DeleteResource => {
                let mut args = vec!["delete".to_string(), text("kind"), text("name")];
                args.extend(Self::namespace_args(request));
                (
                    Self::bounded(self.kubectl(request, args, OutputFormat::Text)),
                    DryRun::NotApplicable,
                )
            }
            Operation::MigrateGkeNodePoolWorkloads => {
                let args = vec![
                    "drain".to_string(),
                    "-l".to_string(),
                    format!("cloud.google.com/gke-nodepool={}", text("node_pool")),
                    "--ignore-daemonsets".to_string(),
                    "--delete-emptydir-data".to_string(),
                ];
                (
                    Self::bounded(self.kubectl(request, args, OutputFormat::Text)),
                    DryRun::NotApplicable,
                )
            }
        };

        PlannedOperation { plan, dry_run }
    }

    /// `helm install|upgrade`. A repo is passed as `--repo <url>` so the
    /// user's helm repository config is never touched.
    fn helm_release(&self, request: &ValidatedRequest, preview: bool) -> InvocationPlan {
        let mut chart = request.text("chart").unwrap_or_default();
        let repo = request.text("repo").and_then(|r| r.split_once('='));
        if let Some((repo_name, _)) = repo {
            // `--repo` takes the bare chart name
            chart = chart
                .strip_prefix(repo_name)
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(chart);
        }

        let verb = match request.operation {
            Operation::UpgradeHelmChart => "upgrade",
            _ => "install",
        };
        let mut args = vec![
            verb.to_string(),
            request.text("name").unwrap_or_default().to_string(),
            chart.to_string(),
        ];
        if let Some((_, repo_url)) = repo {
            args.push("--repo".to_string());
            args.push(repo_url.to_string());
        }
        args.extend(Self::namespace_args(request));
        if verb == "install" {
            args.push("--create-namespace".to_string());
        }
        if let Some(set) = request.text("set") {
            args.push("--set".to_string());
            args.push(set.to_string());
        }
        if preview {
            args.push("--dry-run".to_string());
        }
        args.extend(owned(&["-o", "json"]));
        Self::bounded(self.helm(request, args, OutputFormat::Json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::request::OperationRequest;
    use crate::engine::validator::validate;
    use pretty_assertions::assert_eq;

    fn builder() -> InvocationBuilder {
        InvocationBuilder::new(ToolPaths::default(), None)
    }

    fn args_for(request: OperationRequest, preview: bool) -> Vec<String> {
        let validated = validate(&request).unwrap();
        builder()
            .plan(&validated, preview)
            .plan
            .primary()
            .unwrap()
            .args
            .clone()
    }

    #[test]
    fn test_get_pods_namespaced() {
        assert_eq!(
            args_for(OperationRequest::new("get_pods").namespace("prod"), false),
            owned(&["get", "pods", "-n", "prod", "-o", "json"])
        );
    }

    #[test]
    fn test_get_pods_all_namespaces_with_context() {
        assert_eq!(
            args_for(OperationRequest::new("get_pods").context("staging"), false),
            owned(&["--context", "staging", "get", "pods", "--all-namespaces", "-o", "json"])
        );
    }

    #[test]
    fn test_scale_preview_uses_client_dry_run() {
        let request = OperationRequest::new("scale_deployment")
            .param("name", "web")
            .param("replicas", "3")
            .namespace("prod");
        assert_eq!(
            args_for(request.clone(), true),
            owned(&["scale", "deployment/web", "--replicas=3", "-n", "prod", "--dry-run=client"])
        );
        assert!(!args_for(request, false).contains(&"--dry-run=client".to_string()));
    }

    #[test]
    fn test_delete_resource_argv() {
        let request = OperationRequest::new("delete_resource")
            .param("kind", "pod")
            .param("name", "x");
        assert_eq!(
            args_for(request, false),
            owned(&["delete", "pod", "x", "-n", "default"])
        );
    }

    #[test]
    fn test_helm_install_with_repo() {
        let request = OperationRequest::new("install_helm_chart")
            .param("name", "web")
            .param("chart", "bitnami/nginx")
            .param("repo", "bitnami=https://charts.bitnami.com/bitnami")
            .param("set", "replicaCount=2")
            .namespace("apps")
            .context("prod");
        let planned = builder().plan(&validate(&request).unwrap(), false);
        assert_eq!(planned.dry_run, DryRun::Native);
        assert_eq!(planned.plan.steps.len(), 1);
        assert_eq!(
            planned.plan.steps[0].args,
            owned(&[
                "install",
                "web",
                "nginx",
                "--repo",
                "https://charts.bitnami.com/bitnami",
                "-n",
                "apps",
                "--create-namespace",
                "--set",
                "replicaCount=2",
                "-o",
                "json",
                "--kube-context",
                "prod",
            ])
        );
    }

    #[test]
    fn test_helm_preview_never_touches_repo_config() {
        let request = OperationRequest::new("upgrade_helm_chart")
            .param("name", "web")
            .param("chart", "nginx")
            .param("repo", "bitnami=https://charts.example.com/bitnami")
            .namespace("apps");
        let planned = builder().plan(&validate(&request).unwrap(), true);
        assert_eq!(planned.plan.steps.len(), 1);
        let args = &planned.plan.steps[0].args;
        assert_eq!(args[..3], owned(&["upgrade", "web", "nginx"])[..]);
        assert!(!args.contains(&"repo".to_string()));
        assert!(args.contains(&"--dry-run".to_string()));
    }

    #[test]
    fn test_resource_usage_covers_pods_and_nodes() {
        let request = OperationRequest::new("get_resource_usage")
            .namespace("prod")
            .context("staging");
        let planned = builder().plan(&validate(&request).unwrap(), false);
        let steps: Vec<Vec<String>> = planned.plan.steps.iter().map(|s| s.args.clone()).collect();
        assert_eq!(
            steps,
            vec![
                owned(&["--context", "staging", "top", "pods", "-n", "prod"]),
                owned(&["--context", "staging", "top", "nodes"]),
            ]
        );
    }

    #[test]
    fn test_connect_to_gke_checks_existing_context() {
        let request = OperationRequest::new("connect_to_gke")
            .param("project_id", "acme-prod")
            .param("cluster_name", "main")
            .param("zone", "us-central1-a");
        let planned = builder().plan(&validate(&request).unwrap(), false);
        let check = planned.plan.skip_if_context.as_ref().unwrap();
        assert_eq!(check.context, "gke_acme-prod_us-central1-a_main");
        assert_eq!(check.invocation.args, owned(&["config", "get-contexts", "-o", "name"]));
        assert_eq!(planned.plan.primary().unwrap().program, "gcloud");
    }

    #[test]
    fn test_streaming_modes() {
        let logs = OperationRequest::new("get_logs")
            .param("pod_name", "web-0")
            .param("follow", "true");
        let planned = builder().plan(&validate(&logs).unwrap(), false);
        assert_eq!(planned.plan.mode, ExecutionMode::Streaming);

        let forward = OperationRequest::new("port_forward")
            .param("pod_name", "web-0")
            .param("local_port", "8080")
            .param("pod_port", "80");
        let planned = builder().plan(&validate(&forward).unwrap(), false);
        assert_eq!(planned.plan.mode, ExecutionMode::Streaming);
        assert_eq!(
            planned.plan.primary().unwrap().args,
            owned(&["port-forward", "pod/web-0", "8080:80", "-n", "default"])
        );
    }

    #[test]
    fn test_switch_context_has_no_dry_run() {
        let request = OperationRequest::new("switch_context").param("context_name", "prod");
        let planned = builder().plan(&validate(&request).unwrap(), true);
        assert_eq!(planned.dry_run, DryRun::Unsupported);
    }

    #[test]
    fn test_kubeconfig_is_exported() {
        let builder = InvocationBuilder::new(
            ToolPaths::default(),
            Some(PathBuf::from("/etc/kube/config")),
        );
        let request = validate(&OperationRequest::new("get_nodes")).unwrap();
        let planned = builder.plan(&request, false);
        let invocation = planned.plan.primary().unwrap();
        assert_eq!(invocation.program, "kubectl");
        assert_eq!(
            invocation.env.get("KUBECONFIG").map(String::as_str),
            Some("/etc/kube/config")
        );
    }

    #[test]
    fn test_every_operation_builds_a_plan() {
        for op in Operation::ALL {
            let mut request = OperationRequest::new(op.name());
            for spec in op.params().iter().filter(|s| s.required) {
                let value = match spec.name {
                    "kind" => "pod",
                    "image" => "nginx:1.27",
                    "replicas" => "1",
                    "local_port" | "pod_port" | "target_port" => "8080",
                    "chart" => "bitnami/nginx",
                    "project_id" => "my-project",
                    "zone" => "us-central1-a",
                    "resource" => "pods.spec",
                    _ => "sample",
                };
                request = request.param(spec.name, value);
            }
            let validated = validate(&request).unwrap_or_else(|e| panic!("{}: {}", op, e));
            let planned = builder().plan(&validated, false);
            assert!(!planned.plan.steps.is_empty(), "{} has no steps", op);
            assert_eq!(planned.plan.primary().unwrap().tool, op.tool());
        }
    }
}
