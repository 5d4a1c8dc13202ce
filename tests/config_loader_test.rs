//! Loading configuration files from disk

use std::fs;
use std::time::Duration;

use kubegate::config::ConfigLoader;
use kubegate::engine::operations::Operation;
use kubegate::engine::risk::RiskLevel;
use kubegate::{Gateway, KubegateError};

#[test]
fn test_load_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kubegate.yaml");
    fs::write(
        &path,
        r#"
confirmation_ttl_secs: 45
timeouts:
  mutating_secs: 90
operation_timeouts:
  get_logs: 300
risk_overrides:
  scale_deployment: destructive
tools:
  kubectl: /opt/bin/kubectl
audit_log: /var/log/kubegate.jsonl
"#,
    )
    .unwrap();

    let config = ConfigLoader::new().with_path(&path).load().unwrap();
    assert_eq!(config.confirmation_ttl_secs, 45);
    assert_eq!(config.tools.kubectl, "/opt/bin/kubectl");
    assert_eq!(config.tools.helm, "helm");
    assert_eq!(
        config.timeout_for(Operation::CreateDeployment, RiskLevel::Mutating),
        Duration::from_secs(90)
    );
    assert_eq!(
        config.timeout_for(Operation::GetLogs, RiskLevel::ReadOnly),
        Duration::from_secs(300)
    );

    let gateway = Gateway::new(config).unwrap();
    assert_eq!(
        gateway.classify(Operation::ScaleDeployment),
        RiskLevel::Destructive
    );
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigLoader::new()
        .with_path(dir.path().join("absent.yaml"))
        .load()
        .unwrap_err();
    assert!(matches!(err, KubegateError::Config(_)));
    assert!(err.to_string().contains("absent.yaml"));
}

#[test]
fn test_lowering_override_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kubegate.yaml");
    fs::write(&path, "risk_overrides:\n  delete_resource: read_only\n").unwrap();

    let err = ConfigLoader::new().with_path(&path).load().unwrap_err();
    assert!(err.to_string().contains("cannot lower"));
}

#[test]
fn test_unknown_keys_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kubegate.yaml");
    fs::write(&path, "allow_shell: true\n").unwrap();

    assert!(ConfigLoader::new().with_path(&path).load().is_err());
}

#[test]
fn test_empty_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kubegate.yaml");
    fs::write(&path, "").unwrap();

    let config = ConfigLoader::new().with_path(&path).load().unwrap();
    assert_eq!(config.confirmation_ttl_secs, 120);
    assert!(config.audit_log.is_none());
}
