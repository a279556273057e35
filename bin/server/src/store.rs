//! Workflow documents on the filesystem.

use async_trait::async_trait;
use callflow_core::WorkflowId;
use callflow_engine::{StoreError, WorkflowStore};
use callflow_workflow::Workflow;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Stores each workflow as `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileWorkflowStore {
    dir: PathBuf,
}

impl FileWorkflowStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_of(&self, workflow_id: WorkflowId) -> PathBuf {
        self.dir.join(format!("{workflow_id}.json"))
    }
}

fn io_error(path: &Path, error: &std::io::Error) -> StoreError {
    StoreError::Io {
        reason: format!("{}: {error}", path.display()),
    }
}

#[async_trait]
impl WorkflowStore for FileWorkflowStore {
    async fn load(&self, workflow_id: WorkflowId) -> Result<Workflow, StoreError> {
        let path = self.path_of(workflow_id);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound { workflow_id });
            }
            Err(e) => return Err(io_error(&path, &e)),
        };
        let workflow = Workflow::from_json(&json).map_err(|e| StoreError::Corrupt {
            reason: format!("{}: {e}", path.display()),
        })?;
        if workflow.id != workflow_id {
            return Err(StoreError::Corrupt {
                reason: format!("{} holds workflow {}", path.display(), workflow.id),
            });
        }
        Ok(workflow)
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError> {
        let json = workflow.to_json().map_err(|e| StoreError::Corrupt {
            reason: e.to_string(),
        })?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, &e))?;
        let path = self.path_of(workflow.id);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| io_error(&staging, &e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| io_error(&path, &e))?;
        debug!(workflow_id = %workflow.id, path = %path.display(), "workflow saved");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkflowId>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir, &e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, &e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match stem.parse::<WorkflowId>() {
                Ok(id) => ids.push(id),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unrecognized file"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}
