//! Request types flowing through the gateway

use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use super::operations::Operation;

/// An operation request as received from the caller.
///
/// Parameter values are string-typed; JSON callers may send scalar numbers
/// or booleans, which are converted to their string form on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    #[serde(alias = "name")]
    pub operation: String,

    #[serde(default, deserialize_with = "string_params")]
    pub params: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Apply a mutating operation instead of previewing it
    #[serde(default)]
    pub apply: bool,

    #[serde(default, alias = "token", skip_serializing_if = "Option::is_none")]
    pub confirmation_token: Option<String>,
}

impl OperationRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Default::default()
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn apply(mut self) -> Self {
        self.apply = true;
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.confirmation_token = Some(token.into());
        self
    }
}

fn string_params<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                other => {
                    return Err(de::Error::custom(format!(
                        "parameter '{}' must be a string, number or boolean, got {}",
                        key, other
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}

/// A parameter value after validation and normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Number(u64),
    Flag(bool),
}

/// Which namespace(s) an operation runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceSelection {
    All,
    Named(String),
    /// Cluster-scoped or local operation
    NotApplicable,
}

/// A request that passed validation. Only the validator constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedRequest {
    pub operation: Operation,
    pub params: BTreeMap<&'static str, ParamValue>,
    pub namespace: NamespaceSelection,
    pub context: Option<String>,
    pub apply: bool,
}

impl ValidatedRequest {
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.params.get(name) {
            Some(ParamValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<u64> {
        match self.params.get(name) {
            Some(ParamValue::Number(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.params.get(name), Some(ParamValue::Flag(true)))
    }

    pub fn namespace_name(&self) -> Option<&str> {
        match &self.namespace {
            NamespaceSelection::Named(ns) => Some(ns),
            _ => None,
        }
    }

    /// Stable description of the resource this request acts on.
    ///
    /// Used as the confirmation gate key together with the operation, so it
    /// folds in the kube context and namespace. The gateway pins destructive
    /// requests to the kubeconfig's current context first; `current` remains
    /// only when no kubeconfig names one.
    pub fn target(&self) -> String {
        let resource = match self.operation {
            Operation::DeleteResource => format!(
                "{}/{}",
                self.text("kind").unwrap_or_default(),
                self.text("name").unwrap_or_default()
            ),
            Operation::UninstallHelmChart
            | Operation::InstallHelmChart
            | Operation::UpgradeHelmChart => {
                format!("release/{}", self.text("name").unwrap_or_default())
            }
            Operation::MigrateGkeNodePoolWorkloads => {
                format!("nodepool/{}", self.text("node_pool").unwrap_or_default())
            }
            Operation::CreateDeployment | Operation::ScaleDeployment => {
                format!("deployment/{}", self.text("name").unwrap_or_default())
            }
            Operation::ExposeDeploymentWithService => format!(
                "service/{}",
                self.text("service_name").unwrap_or_default()
            ),
            Operation::SwitchContext => {
                format!("context/{}", self.text("context_name").unwrap_or_default())
            }
            Operation::ConnectToGke => format!(
                "gke/{}/{}/{}",
                self.text("project_id").unwrap_or_default(),
                self.text("zone").unwrap_or_default(),
                self.text("cluster_name").unwrap_or_default()
            ),
            Operation::GetPodEvents
            | Operation::CheckPodHealth
            | Operation::GetLogs
            | Operation::PortForward => {
                format!("pod/{}", self.text("pod_name").unwrap_or_default())
            }
            Operation::KubectlExplain => self.text("resource").unwrap_or_default().to_string(),
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
            | Operation::HealthCheck => "*".to_string(),
        };

        let namespace = match &self.namespace {
            NamespaceSelection::All => "*",
            NamespaceSelection::Named(ns) => ns.as_str(),
            NamespaceSelection::NotApplicable => "-",
        };
        let context = self.context.as_deref().unwrap_or("current");

        format!("{}@{}/{}", resource, context, namespace)
    }

    /// Whether two requests describe the same action, ignoring the apply flag.
    pub fn same_action(&self, other: &ValidatedRequest) -> bool {
        self.operation == other.operation
            && self.params == other.params
            && self.namespace == other.namespace
            && self.context == other.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_scalar_params() {
        let json = r#"{"operation":"scale_deployment","params":{"name":"web","replicas":3}}"#;
        let request: OperationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.params.get("replicas").map(String::as_str), Some("3"));
        assert!(!request.apply);
    }

    #[test]
    fn test_request_rejects_nested_params() {
        let json = r#"{"operation":"get_pods","params":{"labels":{"app":"web"}}}"#;
        let err = serde_json::from_str::<OperationRequest>(json).unwrap_err();
        assert!(err.to_string().contains("labels"));
    }

    #[test]
    fn test_token_alias() {
        let json = r#"{"name":"delete_resource","token":"abc"}"#;
        let request: OperationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.operation, "delete_resource");
        assert_eq!(request.confirmation_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_target_includes_context_and_namespace() {
        let mut params = BTreeMap::new();
        params.insert("kind", ParamValue::Text("pod".into()));
        params.insert("name", ParamValue::Text("x".into()));
        let request = ValidatedRequest {
            operation: Operation::DeleteResource,
            params,
            namespace: NamespaceSelection::Named("prod".into()),
            context: Some("staging".into()),
            apply: false,
        };
        assert_eq!(request.target(), "pod/x@staging/prod");
    }
}
