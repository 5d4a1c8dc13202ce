use super::types::{GatewayConfig, MAX_CONFIRMATION_TTL_SECS};
use crate::engine::risk::RiskClassifier;
use crate::{KubegateError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "KUBEGATE_CONFIG";

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Locates, parses and validates the gateway configuration
#[derive(Debug, Default)]
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this file instead of discovering one
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    /// Where the configuration would be read from, if anywhere.
    ///
    /// Order: explicit path, `KUBEGATE_CONFIG`, then the platform config
    /// directory if the file exists there.
    pub fn discover(&self) -> Option<PathBuf> {
        if let Some(path) = &self.explicit {
            return Some(path.clone());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        directories::ProjectDirs::from("", "", "kubegate")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .filter(|path| path.exists())
    }

    /// Load the configuration, falling back to defaults when no file is found.
    pub fn load(&self) -> Result<GatewayConfig> {
        match self.discover() {
            Some(path) => Self::load_file(&path),
            None => {
                debug!("No configuration file found; using defaults");
                Ok(GatewayConfig::default())
            }
        }
    }

    pub fn load_file(path: &Path) -> Result<GatewayConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            KubegateError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&contents).map_err(|e| match e {
            KubegateError::Config(msg) => {
                KubegateError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse and validate YAML configuration text.
    pub fn parse(contents: &str) -> Result<GatewayConfig> {
        let mut config: GatewayConfig = if contents.trim().is_empty() {
            GatewayConfig::default()
        } else {
            serde_yaml_ng::from_str(contents)?
        };
        config.kubeconfig = config.kubeconfig.map(expand_home);
        config.audit_log = config.audit_log.map(expand_home);
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &GatewayConfig) -> Result<()> {
    if config.confirmation_ttl_secs == 0 {
        return Err(KubegateError::Config(
            "confirmation_ttl_secs must be positive".to_string(),
        ));
    }
    if config.confirmation_ttl_secs > MAX_CONFIRMATION_TTL_SECS {
        return Err(KubegateError::Config(format!(
            "confirmation_ttl_secs must be at most {}",
            MAX_CONFIRMATION_TTL_SECS
        )));
    }

    let timeouts = &config.timeouts;
    for (name, secs) in [
        ("timeouts.read_only_secs", timeouts.read_only_secs),
        ("timeouts.mutating_secs", timeouts.mutating_secs),
        ("timeouts.destructive_secs", timeouts.destructive_secs),
    ] {
        if secs == 0 {
            return Err(KubegateError::Config(format!("{} must be positive", name)));
        }
    }
    for (operation, secs) in &config.operation_timeouts {
        if *secs == 0 {
            return Err(KubegateError::Config(format!(
                "operation_timeouts.{} must be positive",
                operation
            )));
        }
    }

    RiskClassifier::with_overrides(config.risk_overrides.clone()).map_err(KubegateError::Config)?;
    Ok(())
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: PathBuf) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match directories::BaseDirs::new() {
            Some(base) => base.home_dir().join(rest),
            None => path,
        },
        Err(_) => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::operations::Operation;
    use crate::engine::risk::RiskLevel;
    use std::time::Duration;

    #[test]
    fn test_empty_config_is_default() {
        let config = ConfigLoader::parse("").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.confirmation_ttl_secs, 120);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
confirmation_ttl_secs: 60
timeouts:
  read_only_secs: 10
  mutating_secs: 45
operation_timeouts:
  install_helm_chart: 600
risk_overrides:
  scale_deployment: destructive
tools:
  kubectl: /usr/local/bin/kubectl
audit_log: /tmp/kubegate/audit.jsonl
"#;
        let config = ConfigLoader::parse(yaml).unwrap();
        assert_eq!(config.confirmation_ttl_secs, 60);
        assert_eq!(config.timeouts.destructive_secs, 30);
        assert_eq!(config.tools.kubectl, "/usr/local/bin/kubectl");
        assert_eq!(config.tools.helm, "helm");
        assert_eq!(
            config.timeout_for(Operation::InstallHelmChart, RiskLevel::Mutating),
            Duration::from_secs(600)
        );
        assert_eq!(
            config.timeout_for(Operation::GetPods, RiskLevel::ReadOnly),
            Duration::from_secs(10)
        );
        assert_eq!(
            config.risk_overrides.get(&Operation::ScaleDeployment),
            Some(&RiskLevel::Destructive)
        );
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let err = ConfigLoader::parse("confirmation_ttl_secs: 0").unwrap_err();
        assert!(err.to_string().contains("confirmation_ttl_secs"));
    }

    #[test]
    fn test_lowering_override_rejected() {
        let err = ConfigLoader::parse("risk_overrides:\n  delete_resource: read_only\n").unwrap_err();
        assert!(err.to_string().contains("cannot lower"));
    }

    #[test]
    fn test_unknown_operation_rejected() {
        assert!(ConfigLoader::parse("operation_timeouts:\n  drop_cluster: 5\n").is_err());
        assert!(ConfigLoader::parse("confirmation_tll_secs: 5\n").is_err());
    }

    #[test]
    fn test_home_expansion() {
        let config = ConfigLoader::parse("kubeconfig: ~/.kube/config\n").unwrap();
        let path = config.kubeconfig.unwrap();
        if directories::BaseDirs::new().is_some() {
            assert!(!path.starts_with("~"));
            assert!(path.ends_with(".kube/config"));
        }
    }
}
