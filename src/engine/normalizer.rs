//! Result normalization
//!
//! Turns raw subprocess output into a [`NormalizedResult`]: parsed data
//! (JSON, then YAML, then raw text), projected to a compact per-operation
//! shape, with stderr always carried along as warnings or error detail and
//! remediation hints matched from known failure messages.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use super::command_executor::{ExecutionResult, Invocation, OutputFormat};
use super::operations::Operation;
use crate::error::{ErrorKind, GatewayError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl ErrorDetail {
    pub fn from_error(err: &GatewayError) -> Self {
        let field = match err {
            GatewayError::InvalidArgument { field, .. } => Some(field.clone()),
            _ => None,
        };
        let stderr = err
            .result()
            .and_then(|result| result.error.as_ref())
            .and_then(|detail| detail.stderr.clone());
        Self {
            kind: err.kind(),
            message: err.to_string(),
            field,
            stderr,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub exit_code: i32,
    pub duration_ms: u64,
    pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResult {
    pub operation: String,
    pub success: bool,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub next_steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionSummary>,
}

impl NormalizedResult {
    /// A result with no subprocess behind it (plan-only previews).
    pub fn plan_only(operation: Operation, data: Value) -> Self {
        Self {
            operation: operation.to_string(),
            success: true,
            data,
            error: None,
            warnings: Vec::new(),
            next_steps: Vec::new(),
            execution: None,
        }
    }

    /// Prepend warnings collected from earlier steps.
    pub fn with_leading_warnings(mut self, mut warnings: Vec<String>) -> Self {
        warnings.append(&mut self.warnings);
        self.warnings = warnings;
        self
    }
}

/// Parse tool output according to the requested format, falling back to
/// raw text when it does not parse.
pub fn parse_output(format: OutputFormat, stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match format {
        OutputFormat::Json => serde_json::from_str(trimmed)
            .or_else(|_| serde_yaml_ng::from_str::<Value>(trimmed))
            .unwrap_or_else(|_| Value::String(trimmed.to_string())),
        OutputFormat::Yaml => serde_yaml_ng::from_str::<Value>(trimmed)
            .unwrap_or_else(|_| Value::String(trimmed.to_string())),
        OutputFormat::Text => Value::String(trimmed.to_string()),
    }
}

fn items(doc: &Value) -> impl Iterator<Item = &Value> {
    doc.get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn meta<'a>(item: &'a Value, key: &str) -> &'a Value {
    item.pointer(&format!("/metadata/{}", key))
        .unwrap_or(&Value::Null)
}

fn at<'a>(item: &'a Value, pointer: &str) -> &'a Value {
    item.pointer(pointer).unwrap_or(&Value::Null)
}

/// Reduce a parsed document to the fields callers need.
///
/// Documents that are not Kubernetes lists (text output, helm JSON) pass
/// through unchanged. Secret data is never relayed.
pub fn project(operation: Operation, doc: Value) -> Value {
    if !doc.is_object() {
        return doc;
    }
    match operation {
        Operation::GetPods => items(&doc)
            .map(|pod| {
                json!({
                    "name": meta(pod, "name"),
                    "namespace": meta(pod, "namespace"),
                    "status": at(pod, "/status/phase"),
                    "ip": at(pod, "/status/podIP"),
                })
            })
            .collect(),
        Operation::GetNamespaces => items(&doc).map(|ns| meta(ns, "name").clone()).collect(),
        Operation::GetServices => items(&doc)
            .map(|svc| {
                json!({
                    "name": meta(svc, "name"),
                    "namespace": meta(svc, "namespace"),
                    "type": at(svc, "/spec/type"),
                    "clusterIp": at(svc, "/spec/clusterIP"),
                })
            })
            .collect(),
        Operation::GetNodes => items(&doc)
            .map(|node| {
                let status = node
                    .pointer("/status/conditions")
                    .and_then(Value::as_array)
                    .and_then(|conditions| {
                        conditions
                            .iter()
                            .find(|c| c.get("type") == Some(&json!("Ready")))
                            .or_else(|| conditions.last())
                    })
                    .map(|c| {
                        let ready = c.get("status") == Some(&json!("True"));
                        match c.get("type").and_then(Value::as_str) {
                            Some("Ready") if ready => json!("Ready"),
                            Some("Ready") => json!("NotReady"),
                            Some(other) => json!(other),
                            None => Value::Null,
                        }
                    })
                    .unwrap_or(Value::Null);
                let addresses: Vec<Value> = node
                    .pointer("/status/addresses")
                    .and_then(Value::as_array)
                    .map(|addrs| addrs.iter().map(|a| at(a, "/address").clone()).collect())
                    .unwrap_or_default();
                json!({
                    "name": meta(node, "name"),
                    "status": status,
                    "addresses": addresses,
                })
            })
            .collect(),
        Operation::GetConfigmaps => items(&doc)
            .map(|cm| {
                json!({
                    "name": meta(cm, "name"),
                    "namespace": meta(cm, "namespace"),
                    "data": at(cm, "/data"),
                })
            })
            .collect(),
        Operation::GetSecrets => items(&doc)
            .map(|secret| {
                json!({
                    "name": meta(secret, "name"),
                    "namespace": meta(secret, "namespace"),
                    "type": at(secret, "/type"),
                })
            })
            .collect(),
        Operation::GetDeployments => items(&doc)
            .map(|d| {
                json!({
                    "name": meta(d, "name"),
                    "namespace": meta(d, "namespace"),
                    "replicas": at(d, "/status/replicas"),
                })
            })
            .collect(),
        Operation::GetEvents => items(&doc)
            .map(|event| {
                json!({
                    "name": meta(event, "name"),
                    "namespace": meta(event, "namespace"),
                    "type": at(event, "/type"),
                    "reason": at(event, "/reason"),
                    "message": at(event, "/message"),
                })
            })
            .collect(),
        Operation::GetPodEvents => items(&doc)
            .map(|event| {
                json!({
                    "name": meta(event, "name"),
                    "type": at(event, "/type"),
                    "reason": at(event, "/reason"),
                    "message": at(event, "/message"),
                    "timestamp": at(event, "/lastTimestamp"),
                })
            })
            .collect(),
        Operation::CheckPodHealth => {
            let conditions: Vec<Value> = doc
                .pointer("/status/conditions")
                .and_then(Value::as_array)
                .map(|cs| cs.iter().map(|c| at(c, "/type").clone()).collect())
                .unwrap_or_default();
            json!({
                "phase": at(&doc, "/status/phase"),
                "conditions": conditions,
            })
        }
        Operation::GetLogs
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
        | Operation::InstallHelmChart
        | Operation::UpgradeHelmChart
        | Operation::ConnectToGke
        | Operation::DeleteResource
        | Operation::UninstallHelmChart
        | Operation::MigrateGkeNodePoolWorkloads => doc,
    }
}

struct Remediation {
    pattern: Regex,
    hint: &'static str,
}

static REMEDIATIONS: Lazy<Vec<Remediation>> = Lazy::new(|| {
    [
        (
            r#"(?i)namespaces? "[^"]*" not found"#,
            "Check the namespace name with get_namespaces",
        ),
        (
            r"(?i)\(NotFound\)|not found",
            "Verify the resource name and namespace; list resources with the matching get_* operation",
        ),
        (
            r"(?i)forbidden|cannot (get|list|create|delete|patch|update)",
            "The current identity lacks RBAC permission; inspect roles with get_rbac_roles or switch context",
        ),
        (
            r"(?i)already exists",
            "Choose a different name, or upgrade/scale the existing resource instead",
        ),
        (
            r"(?i)unable to connect to the server|connection refused|no such host|i/o timeout",
            "The cluster API server is unreachable; check the current context with get_current_context",
        ),
        (
            r"(?i)metrics api not available|metrics.k8s.io",
            "Install metrics-server in the cluster to enable resource usage",
        ),
        (
            r"(?i)release: not found|release .* not found",
            "List Helm releases in the namespace; the release name may be wrong",
        ),
    ]
    .into_iter()
    .map(|(pattern, hint)| Remediation {
        pattern: Regex::new(pattern).expect("valid regex"),
        hint,
    })
    .collect()
});

static AUTH_FAILURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)unauthorized|must be logged in|reauthentication|no configuration has been provided|you must be logged in",
    )
    .expect("valid regex")
});

/// Suggested next steps for a failure message, most specific first.
pub fn remediation(stderr: &str) -> Vec<String> {
    let mut hints: Vec<String> = Vec::new();
    for rule in REMEDIATIONS.iter() {
        if rule.pattern.is_match(stderr) && !hints.iter().any(|h| h == rule.hint) {
            hints.push(rule.hint.to_string());
        }
    }
    // A missing namespace also matches the generic not-found rule.
    if hints.len() > 1 && hints[0].starts_with("Check the namespace") {
        hints.retain(|h| !h.starts_with("Verify the resource name"));
    }
    hints
}

/// Whether stderr indicates the tool has no usable credentials.
pub fn is_auth_failure(stderr: &str) -> bool {
    AUTH_FAILURE.is_match(stderr)
}

fn stderr_lines(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Normalize one completed subprocess run.
pub fn normalize(
    operation: Operation,
    invocation: &Invocation,
    result: &ExecutionResult,
) -> NormalizedResult {
    let execution = Some(ExecutionSummary {
        exit_code: result.exit_code,
        duration_ms: result.duration.as_millis() as u64,
        command: invocation.argv(),
    });

    if result.success {
        let data = project(operation, parse_output(invocation.output, &result.stdout));
        return NormalizedResult {
            operation: operation.to_string(),
            success: true,
            data,
            error: None,
            warnings: stderr_lines(&result.stderr),
            next_steps: Vec::new(),
            execution,
        };
    }

    let stderr = result.stderr.trim();
    let message = stderr
        .lines()
        .find(|line| !line.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{} exited with code {}", invocation.program, result.exit_code));
    let data = match result.stdout.trim() {
        "" => Value::Null,
        stdout => Value::String(stdout.to_string()),
    };

    NormalizedResult {
        operation: operation.to_string(),
        success: false,
        data,
        error: Some(ErrorDetail {
            kind: ErrorKind::ExecutionFailed,
            message,
            field: None,
            stderr: (!stderr.is_empty()).then(|| stderr.to_string()),
        }),
        warnings: Vec::new(),
        next_steps: remediation(stderr),
        execution,
    }
}

/// Fold the results of a multi-step plan into one.
///
/// The last step carries the operation's data. Resource usage is the
/// exception: it reports `kubectl top pods` and `kubectl top nodes` side
/// by side.
pub fn combine(operation: Operation, mut results: Vec<NormalizedResult>) -> NormalizedResult {
    let Some(mut last) = results.pop() else {
        return NormalizedResult::plan_only(operation, Value::Null);
    };
    if operation == Operation::GetResourceUsage {
        if let Some(pods) = results.first() {
            let nodes = std::mem::take(&mut last.data);
            last.data = json!({ "podUsage": pods.data, "nodeUsage": nodes });
        }
    }
    let warnings = results.into_iter().flat_map(|r| r.warnings).collect();
    last.with_leading_warnings(warnings)
}
