//! Reads the active kube context from kubeconfig files.
//!
//! Only `current-context` is looked at; the rest of the file is left to
//! kubectl.

use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct KubeconfigFile {
    #[serde(rename = "current-context", default)]
    current_context: Option<String>,
}

/// Kubeconfig files in kubectl's lookup order.
///
/// An explicit path (which may itself be a path list) wins, then
/// `$KUBECONFIG`, then `~/.kube/config`.
pub fn kubeconfig_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let list: Option<OsString> = match explicit {
        Some(path) => Some(path.as_os_str().to_os_string()),
        None => std::env::var_os("KUBECONFIG").filter(|value| !value.is_empty()),
    };
    match list {
        Some(list) => std::env::split_paths(&list)
            .filter(|path| !path.as_os_str().is_empty())
            .collect(),
        None => directories::BaseDirs::new()
            .map(|base| vec![base.home_dir().join(".kube").join("config")])
            .unwrap_or_default(),
    }
}

/// The `current-context` of the first file that sets one.
///
/// Missing or unreadable files are skipped, as kubectl does when merging.
pub async fn current_context(explicit: Option<&Path>) -> Option<String> {
    for path in kubeconfig_paths(explicit) {
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                debug!("Skipping kubeconfig {}: {}", path.display(), e);
                continue;
            }
        };
        match serde_yaml_ng::from_str::<KubeconfigFile>(&contents) {
            Ok(file) => {
                if let Some(context) = file.current_context.filter(|c| !c.is_empty()) {
                    return Some(context);
                }
            }
            Err(e) => debug!("Unparseable kubeconfig {}: {}", path.display(), e),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: prod-cluster
contexts:
  - name: prod-cluster
    context: {cluster: prod, user: admin}
"#;

    #[tokio::test]
    async fn test_reads_current_context() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, KUBECONFIG).unwrap();

        assert_eq!(
            current_context(Some(&path)).await.as_deref(),
            Some("prod-cluster")
        );
    }

    #[tokio::test]
    async fn test_first_file_with_a_context_wins() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty");
        let full = dir.path().join("full");
        std::fs::write(&empty, "apiVersion: v1\nkind: Config\n").unwrap();
        std::fs::write(&full, KUBECONFIG).unwrap();
        let missing = dir.path().join("missing");
        let list = std::env::join_paths([&missing, &empty, &full]).unwrap();

        assert_eq!(
            current_context(Some(Path::new(&list))).await.as_deref(),
            Some("prod-cluster")
        );
    }

    #[tokio::test]
    async fn test_missing_file_has_no_context() {
        let dir = TempDir::new().unwrap();
        assert_eq!(current_context(Some(&dir.path().join("nope"))).await, None);
    }
}
