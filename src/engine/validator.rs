//! Argument validation
//!
//! Pure checks that turn an [`OperationRequest`] into a [`ValidatedRequest`]
//! or an `InvalidArgument` naming the offending field. Nothing that fails
//! here ever reaches the command executor.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use super::operations::{Operation, ParamKind, ParamSpec, Scope};
use super::request::{NamespaceSelection, OperationRequest, ParamValue, ValidatedRequest};
use crate::error::GatewayError;

pub const MAX_NAME_LEN: usize = 253;
pub const MAX_NAMESPACE_LEN: usize = 63;
pub const MAX_REPLICAS: u64 = i32::MAX as u64;
pub const MAX_LINES: u64 = 1_000_000;
const MAX_REFERENCE_LEN: usize = 512;

pub const DELETABLE_KINDS: &[&str] = &[
    "pod",
    "deployment",
    "service",
    "configmap",
    "secret",
    "job",
    "cronjob",
    "statefulset",
    "daemonset",
    "replicaset",
    "ingress",
    "persistentvolumeclaim",
];

static DNS_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid regex"));
static IMAGE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/:@-]*$").expect("valid regex"));
static CHART_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(oci://)?[A-Za-z0-9][A-Za-z0-9._/-]*$").expect("valid regex"));
static CONTEXT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:/@_-]*$").expect("valid regex"));
static GCP_PROJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]{4,28}[a-z0-9]$").expect("valid regex"));
static GCP_ZONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z]+-[a-z]+[0-9]+(-[a-z])?$").expect("valid regex"));
static EXPLAIN_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(\.[a-zA-Z][a-zA-Z0-9]*)*$").expect("valid regex")
});
static HELM_SET_PAIR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\[\]-]*=[^\s,]*$").expect("valid regex")
});

/// Validate a request against its operation's parameter schema.
pub fn validate(request: &OperationRequest) -> Result<ValidatedRequest, GatewayError> {
    let operation: Operation = request.operation.trim().parse()?;

    let mut raw = request.params.clone();
    let namespace = take_aliased(&mut raw, "namespace", request.namespace.as_deref())?;
    let context = take_aliased(&mut raw, "context", request.context.as_deref())?;

    if let Some(key) = raw.keys().find(|key| operation.param(key).is_none()) {
        return Err(GatewayError::invalid(
            key.as_str(),
            format!("not a parameter of {}", operation),
        ));
    }

    let namespace = resolve_namespace(operation, namespace)?;
    let context = resolve_context(operation, context)?;

    let mut params = BTreeMap::new();
    for spec in operation.params() {
        let value = match (raw.get(spec.name), spec.default) {
            (Some(value), _) => value.as_str(),
            (None, Some(default)) => default,
            (None, None) if spec.required => {
                return Err(GatewayError::invalid(spec.name, "required parameter is missing"))
            }
            (None, None) => continue,
        };
        params.insert(spec.name, validate_param(spec, value)?);
    }

    if operation == Operation::ExposeDeploymentWithService && !params.contains_key("port") {
        if let Some(target_port) = params.get("target_port").cloned() {
            params.insert("port", target_port);
        }
    }

    Ok(ValidatedRequest {
        operation,
        params,
        namespace,
        context,
        apply: request.apply,
    })
}

/// Merge a field that may arrive either on the request or inside `params`.
fn take_aliased(
    raw: &mut BTreeMap<String, String>,
    key: &str,
    explicit: Option<&str>,
) -> Result<Option<String>, GatewayError> {
    let from_params = raw.remove(key);
    match (explicit, from_params) {
        (Some(a), Some(b)) if a != b => Err(GatewayError::invalid(
            key,
            format!("conflicting values '{}' and '{}'", a, b),
        )),
        (Some(a), _) => Ok(Some(a.to_string())),
        (None, b) => Ok(b),
    }
}

fn resolve_namespace(
    operation: Operation,
    namespace: Option<String>,
) -> Result<NamespaceSelection, GatewayError> {
    let namespace = namespace.filter(|ns| !ns.is_empty());
    match (operation.scope(), namespace) {
        (Scope::NamespacedList, None) => Ok(NamespaceSelection::All),
        (Scope::Namespaced, None) => Ok(NamespaceSelection::Named("default".to_string())),
        (Scope::NamespacedList | Scope::Namespaced, Some(ns)) => {
            check_dns_name("namespace", &ns, MAX_NAMESPACE_LEN)?;
            Ok(NamespaceSelection::Named(ns))
        }
        (Scope::Cluster | Scope::Local, None) => Ok(NamespaceSelection::NotApplicable),
        (Scope::Cluster | Scope::Local, Some(_)) => Err(GatewayError::invalid(
            "namespace",
            format!("{} is not namespaced", operation),
        )),
    }
}

fn resolve_context(
    operation: Operation,
    context: Option<String>,
) -> Result<Option<String>, GatewayError> {
    match context.filter(|ctx| !ctx.is_empty()) {
        None => Ok(None),
        Some(_) if operation.scope() == Scope::Local => Err(GatewayError::invalid(
            "context",
            format!("{} acts on the local kubeconfig and takes no context", operation),
        )),
        Some(ctx) => {
            check_pattern("context", &ctx, &CONTEXT_NAME, MAX_NAME_LEN, "a kube context name")?;
            Ok(Some(ctx))
        }
    }
}

/// Fill in the context of a request that named none, checked like a
/// caller-supplied one. On error the request is left unchanged.
pub fn pin_context(request: &mut ValidatedRequest, context: String) -> Result<(), GatewayError> {
    if request.context.is_none() {
        request.context = resolve_context(request.operation, Some(context))?;
    }
    Ok(())
}

fn validate_param(spec: &ParamSpec, value: &str) -> Result<ParamValue, GatewayError> {
    let field = spec.name;
    if value.is_empty() {
        return Err(GatewayError::invalid(field, "must not be empty"));
    }
    if value.starts_with('-') && !matches!(spec.kind, ParamKind::Replicas | ParamKind::Port | ParamKind::Lines) {
        return Err(GatewayError::invalid(field, "must not start with '-'"));
    }

    match spec.kind {
        ParamKind::Name => {
            check_dns_name(field, value, MAX_NAME_LEN)?;
            Ok(ParamValue::Text(value.to_string()))
        }
        ParamKind::Image => {
            check_pattern(field, value, &IMAGE_REF, MAX_REFERENCE_LEN, "a container image reference")?;
            Ok(ParamValue::Text(value.to_string()))
        }
        ParamKind::Replicas => parse_bounded(field, value, 0, MAX_REPLICAS).map(ParamValue::Number),
        ParamKind::Port => parse_bounded(field, value, 1, u16::MAX as u64).map(ParamValue::Number),
        ParamKind::Lines => parse_bounded(field, value, 0, MAX_LINES).map(ParamValue::Number),
        ParamKind::Bool => match value.to_ascii_lowercase().as_str() {
            "true" => Ok(ParamValue::Flag(true)),
            "false" => Ok(ParamValue::Flag(false)),
            _ => Err(GatewayError::invalid(field, "must be 'true' or 'false'")),
        },
        ParamKind::ChartRef => {
            check_pattern(field, value, &CHART_REF, MAX_REFERENCE_LEN, "a Helm chart reference")?;
            Ok(ParamValue::Text(value.to_string()))
        }
        ParamKind::HelmRepo => validate_helm_repo(field, value),
        ParamKind::HelmSet => {
            if value.len() > MAX_REFERENCE_LEN * 8 {
                return Err(GatewayError::invalid(field, "too long"));
            }
            for pair in value.split(',') {
                if !HELM_SET_PAIR.is_match(pair) {
                    return Err(GatewayError::invalid(
                        field,
                        format!("'{}' is not a key=value override", pair),
                    ));
                }
            }
            Ok(ParamValue::Text(value.to_string()))
        }
        ParamKind::ContextName => {
            check_pattern(field, value, &CONTEXT_NAME, MAX_NAME_LEN, "a kube context name")?;
            Ok(ParamValue::Text(value.to_string()))
        }
        ParamKind::GcpProject => {
            check_pattern(field, value, &GCP_PROJECT, 30, "a GCP project id")?;
            Ok(ParamValue::Text(value.to_string()))
        }
        ParamKind::GcpZone => {
            check_pattern(field, value, &GCP_ZONE, 63, "a GCP zone or region")?;
            Ok(ParamValue::Text(value.to_string()))
        }
        ParamKind::DeletableKind => {
            let kind = value.to_ascii_lowercase();
            if DELETABLE_KINDS.contains(&kind.as_str()) {
                Ok(ParamValue::Text(kind))
            } else {
                Err(GatewayError::invalid(
                    field,
                    format!("unsupported kind '{}', expected one of: {}", value, DELETABLE_KINDS.join(", ")),
                ))
            }
        }
        ParamKind::ExplainPath => {
            check_pattern(field, value, &EXPLAIN_PATH, MAX_NAME_LEN, "a resource or field path")?;
            Ok(ParamValue::Text(value.to_string()))
        }
        ParamKind::Protocol => match value.to_ascii_uppercase().as_str() {
            p @ ("TCP" | "UDP" | "SCTP") => Ok(ParamValue::Text(p.to_string())),
            _ => Err(GatewayError::invalid(field, "must be TCP, UDP or SCTP")),
        },
        ParamKind::ServiceType => {
            let canonical = ["ClusterIP", "NodePort", "LoadBalancer"]
                .into_iter()
                .find(|t| t.eq_ignore_ascii_case(value));
            canonical
                .map(|t| ParamValue::Text(t.to_string()))
                .ok_or_else(|| GatewayError::invalid(field, "must be ClusterIP, NodePort or LoadBalancer"))
        }
    }
}

fn check_dns_name(field: &str, value: &str, max_len: usize) -> Result<(), GatewayError> {
    if value.len() > max_len {
        return Err(GatewayError::invalid(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }
    if !DNS_NAME.is_match(value) {
        return Err(GatewayError::invalid(
            field,
            "must consist of lowercase alphanumerics and '-', starting and ending with an alphanumeric",
        ));
    }
    Ok(())
}

fn check_pattern(
    field: &str,
    value: &str,
    pattern: &Regex,
    max_len: usize,
    expected: &str,
) -> Result<(), GatewayError> {
    if value.len() > max_len {
        return Err(GatewayError::invalid(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }
    if !pattern.is_match(value) {
        return Err(GatewayError::invalid(field, format!("is not {}", expected)));
    }
    Ok(())
}

fn parse_bounded(field: &str, value: &str, min: u64, max: u64) -> Result<u64, GatewayError> {
    let parsed: i128 = value
        .trim()
        .parse()
        .map_err(|_| GatewayError::invalid(field, "must be an integer"))?;
    if parsed < 0 {
        return Err(GatewayError::invalid(field, "must be a non-negative integer"));
    }
    let parsed = parsed as u128;
    if parsed < min as u128 || parsed > max as u128 {
        return Err(GatewayError::invalid(
            field,
            format!("must be between {} and {}", min, max),
        ));
    }
    Ok(parsed as u64)
}

fn validate_helm_repo(field: &str, value: &str) -> Result<ParamValue, GatewayError> {
    let (name, repo_url) = value
        .split_once('=')
        .ok_or_else(|| GatewayError::invalid(field, "must have the form repo_name=repo_url"))?;
    check_dns_name(field, name, MAX_NAMESPACE_LEN)?;
    let parsed = url::Url::parse(repo_url)
        .map_err(|e| GatewayError::invalid(field, format!("invalid repository url: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(GatewayError::invalid(field, "repository url must be http or https"));
    }
    Ok(ParamValue::Text(format!("{}={}", name, parsed)))
}
