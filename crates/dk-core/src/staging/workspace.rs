use std::sync::Arc;

use dk_types::{Result, WorkspaceBackend, WorkspaceCredentials, WorkspaceOptions};
use tracing::{info, warn};

use super::WorkspaceProvider;

/// Decides between reusing a persistent workspace and creating a new one.
pub struct WorkspaceManager {
    provider: Arc<dyn WorkspaceProvider>,
}

impl WorkspaceManager {
    pub fn new(provider: Arc<dyn WorkspaceProvider>) -> Self {
        Self { provider }
    }

    /// Workspace for one job definition.
    ///
    /// With a configuration id the workspace is persistent: an existing one is reused
    /// (the first in list order when there are several), otherwise one is created.
    /// Without a configuration id an ephemeral workspace is created.
    pub async fn acquire(
        &self,
        backend: WorkspaceBackend,
        component_id: &str,
        config_id: Option<&str>,
    ) -> Result<WorkspaceCredentials> {
        let Some(config_id) = config_id else {
            let workspace = self
                .provider
                .create(&WorkspaceOptions {
                    backend,
                    component_id: component_id.to_string(),
                    config_id: None,
                    persistent: false,
                })
                .await?;
            info!(workspace_id = %workspace.id, backend = backend.as_str(), "Created ephemeral workspace");
            return Ok(workspace);
        };

        let mut existing = self.provider.list(component_id, config_id).await?;
        match existing.len() {
            0 => {
                let workspace = self
                    .provider
                    .create(&WorkspaceOptions {
                        backend,
                        component_id: component_id.to_string(),
                        config_id: Some(config_id.to_string()),
                        persistent: true,
                    })
                    .await?;
                info!(
                    workspace_id = %workspace.id,
                    config_id,
                    "Created a new persistent workspace"
                );
                Ok(workspace)
            }
            1 => {
                let workspace = existing.remove(0);
                info!(workspace_id = %workspace.id, config_id, "Reusing persistent workspace");
                Ok(workspace)
            }
            _ => {
                let ids: Vec<&str> = existing.iter().map(|w| w.id.as_str()).collect();
                warn!(
                    config_id,
                    workspace_ids = %ids.join(", "),
                    "Multiple workspaces (total {}) found for configuration, using {}",
                    ids.len(),
                    ids[0]
                );
                Ok(existing.remove(0))
            }
        }
    }

    /// Delete `workspace` unless it is persistent. Failures are only logged.
    pub async fn release(&self, workspace: &WorkspaceCredentials) {
        if workspace.persistent {
            return;
        }
        match self.provider.delete(&workspace.id).await {
            Ok(()) => info!(workspace_id = %workspace.id, "Ephemeral workspace deleted"),
            Err(e) => warn!(workspace_id = %workspace.id, error = %e, "Failed to delete workspace"),
        }
    }
}
