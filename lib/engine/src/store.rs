//! Collaborators the engine depends on but does not own.
//!
//! - [`WorkflowStore`]: where workflow definitions live
//! - [`SharedVariables`]: the cross-session variable scope
//! - [`AuditSink`]: durable storage for finished session reports
//! - [`CallerFallback`]: the apologize-and-disconnect path for failed sessions
//!
//! In-memory implementations are provided for embedding and tests.

use crate::error::{ProviderError, StoreError};
use crate::providers::{CallControl, SpeechProvider, SpeechRequest};
use crate::session::{SessionMeta, SessionReport};
use async_trait::async_trait;
use callflow_core::{SessionId, WorkflowId};
use callflow_workflow::Workflow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Storage of workflow definitions.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Loads a workflow by ID.
    async fn load(&self, workflow_id: WorkflowId) -> Result<Workflow, StoreError>;

    /// Saves a workflow, replacing any previous version.
    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError>;

    /// Lists the stored workflow IDs.
    async fn list(&self) -> Result<Vec<WorkflowId>, StoreError>;
}

/// Workflow store backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl InMemoryWorkflowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the given workflows.
    #[must_use]
    pub fn with_workflows(workflows: impl IntoIterator<Item = Workflow>) -> Self {
        Self {
            workflows: RwLock::new(workflows.into_iter().map(|w| (w.id, w)).collect()),
        }
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn load(&self, workflow_id: WorkflowId) -> Result<Workflow, StoreError> {
        self.workflows
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .ok_or(StoreError::NotFound { workflow_id })
    }

    async fn save(&self, workflow: &Workflow) -> Result<(), StoreError> {
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<WorkflowId>, StoreError> {
        let mut ids: Vec<WorkflowId> = self.workflows.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

/// The `shared` variable scope.
///
/// Writes are forwarded as they happen. Concurrent writers are arbitrated by
/// the implementation; the in-memory one is last-writer-wins.
#[async_trait]
pub trait SharedVariables: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError>;

    /// Writes a key. `None` removes it.
    async fn set(&self, key: &str, value: Option<JsonValue>) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemorySharedVariables {
    values: RwLock<HashMap<String, JsonValue>>,
}

impl InMemorySharedVariables {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedVariables for InMemorySharedVariables {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Option<JsonValue>) -> Result<(), StoreError> {
        let mut values = self.values.write().await;
        match value {
            Some(value) => {
                values.insert(key.to_string(), value);
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }
}

/// An analytics event emitted by an `analytics` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub session_id: SessionId,
    pub workflow_id: WorkflowId,
    pub event: String,
    #[serde(default)]
    pub properties: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

/// Receiver of finished sessions and analytics events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Stores the report of a finished session.
    async fn record(&self, report: &SessionReport);

    /// Stores an analytics event.
    async fn track(&self, event: &AnalyticsEvent) {
        let _ = event;
    }
}

/// Audit sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, report: &SessionReport) {
        info!(
            session_id = %report.view.meta.session_id,
            workflow_id = %report.view.meta.workflow_id,
            status = ?report.view.status,
            steps = report.view.history.len(),
            "Session finished"
        );
    }

    async fn track(&self, event: &AnalyticsEvent) {
        info!(
            session_id = %event.session_id,
            event = %event.event,
            "Analytics event"
        );
    }
}

/// Audit sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    reports: Mutex<Vec<SessionReport>>,
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn reports(&self) -> Vec<SessionReport> {
        self.reports.lock().await.clone()
    }

    pub async fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, report: &SessionReport) {
        self.reports.lock().await.push(report.clone());
    }

    async fn track(&self, event: &AnalyticsEvent) {
        self.events.lock().await.push(event.clone());
    }
}

/// Graceful exit for the caller of a failed session.
#[async_trait]
pub trait CallerFallback: Send + Sync {
    /// Plays `message` to the caller and disconnects.
    async fn apologize_and_disconnect(
        &self,
        meta: &SessionMeta,
        message: &str,
    ) -> Result<(), ProviderError>;
}

/// Fallback built on the speech and call-control providers.
///
/// Missing providers are skipped; a fallback never fails because one of its
/// steps is unavailable.
#[derive(Clone, Default)]
pub struct SpeechFallback {
    speech: Option<Arc<dyn SpeechProvider>>,
    call_control: Option<Arc<dyn CallControl>>,
}

impl SpeechFallback {
    #[must_use]
    pub fn new(
        speech: Option<Arc<dyn SpeechProvider>>,
        call_control: Option<Arc<dyn CallControl>>,
    ) -> Self {
        Self {
            speech,
            call_control,
        }
    }
}

#[async_trait]
impl CallerFallback for SpeechFallback {
    async fn apologize_and_disconnect(
        &self,
        meta: &SessionMeta,
        message: &str,
    ) -> Result<(), ProviderError> {
        let mut first_error = None;

        if let Some(speech) = &self.speech {
            let request = SpeechRequest {
                call_id: meta.call_id.clone(),
                text: Some(message.to_string()),
                ssml: None,
                voice: None,
                language: None,
            };
            if let Err(e) = speech.synthesize(request).await {
                warn!(session_id = %meta.session_id, error = %e, "Fallback message not played");
                first_error = Some(e);
            }
        }

        if let Some(call_control) = &self.call_control {
            if let Err(e) = call_control.hangup(&meta.call_id).await {
                warn!(session_id = %meta.session_id, error = %e, "Fallback hangup failed");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
