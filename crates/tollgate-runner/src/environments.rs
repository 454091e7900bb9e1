//! Execution environment management.

use async_trait::async_trait;
use std::path::PathBuf;
use tollgate_core::ids::EnvironmentId;
use tollgate_core::ports::{EnvironmentHandle, EnvironmentProvider};
use tollgate_core::{Error, Result};
use tracing::{info, warn};

/// Host environment configuration.
#[derive(Debug, Clone)]
pub struct HostEnvironmentConfig {
    /// Directory under which each job gets its own workspace.
    pub root: PathBuf,
    /// Target labels this host satisfies.
    pub labels: Vec<String>,
    /// Leave workspaces on disk after teardown.
    pub keep_workspaces: bool,
}

impl Default for HostEnvironmentConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("tollgate"),
            labels: default_labels(),
            keep_workspaces: false,
        }
    }
}

pub fn default_labels() -> Vec<String> {
    ["ubuntu-latest", "host", "local"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Provides environments on the local host, one fresh directory per job.
#[derive(Debug, Clone, Default)]
pub struct HostEnvironmentProvider {
    config: HostEnvironmentConfig,
}

impl HostEnvironmentProvider {
    pub fn new(config: HostEnvironmentConfig) -> Self {
        Self { config }
    }

    pub fn supports(&self, label: &str) -> bool {
        self.config.labels.iter().any(|l| l == label)
    }
}

#[async_trait]
impl EnvironmentProvider for HostEnvironmentProvider {
    async fn provision(&self, label: &str, job: &str) -> Result<EnvironmentHandle> {
        if !self.supports(label) {
            return Err(Error::Environment(format!(
                "no environment available for label '{}'",
                label
            )));
        }

        let id = EnvironmentId::new();
        let workspace = self
            .config
            .root
            .join(format!("{}-{}", sanitize(job), id.as_uuid().simple()));

        info!(label = %label, job = %job, workspace = %workspace.display(), "Preparing host environment");
        tokio::fs::create_dir_all(&workspace).await.map_err(|e| {
            Error::Environment(format!(
                "failed to create workspace {}: {}",
                workspace.display(),
                e
            ))
        })?;

        Ok(EnvironmentHandle {
            id,
            label: label.to_string(),
            job: job.to_string(),
            workspace,
        })
    }

    async fn teardown(&self, handle: EnvironmentHandle) -> Result<()> {
        if self.config.keep_workspaces {
            info!(workspace = %handle.workspace.display(), "Keeping host workspace");
            return Ok(());
        }

        info!(workspace = %handle.workspace.display(), "Cleaning up host environment");
        match tokio::fs::remove_dir_all(&handle.workspace).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(workspace = %handle.workspace.display(), error = %e, "Failed to remove workspace");
                Err(Error::Environment(format!(
                    "failed to remove workspace {}: {}",
                    handle.workspace.display(),
                    e
                )))
            }
        }
    }
}

fn sanitize(job: &str) -> String {
    job.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
