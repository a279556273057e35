//! The engine facade: workflow activation and the session directory.

use crate::config::EngineConfig;
use crate::error::{ActivationError, EngineError};
use crate::handler::{HandlerRegistry, NodeHandler, ResumeResult};
use crate::handlers;
use crate::providers::Providers;
use crate::runner::{PendingResumes, Runtime, SessionRunner};
use crate::session::{SessionMeta, SessionReport, SessionState, SessionStatus, SessionView};
use crate::store::{
    AuditSink, CallerFallback, InMemorySharedVariables, InMemoryWorkflowStore, SharedVariables,
    SpeechFallback, TracingAuditSink, WorkflowStore,
};
use callflow_core::{Result, SessionId, WorkflowId};
use callflow_workflow::{
    NodeTypeRegistry, TriggerEvent, VariableStore, Workflow, WorkflowNode, WorkflowReport,
    validate_workflow,
};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

/// What the directory knows about a live session.
struct SessionEntry {
    cancel: CancellationToken,
    view: watch::Receiver<SessionView>,
    pending: PendingResumes,
}

struct EngineInner {
    runtime: Arc<Runtime>,
    store: Arc<dyn WorkflowStore>,
    fallback: Arc<dyn CallerFallback>,
    active: RwLock<HashMap<WorkflowId, Arc<Workflow>>>,
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    shutdown: CancellationToken,
}

impl EngineInner {
    /// Hands a finished session to the audit sink, runs the caller fallback
    /// for failures, and drops the session from the directory.
    async fn finish(&self, report: &SessionReport) {
        let meta = &report.view.meta;
        self.runtime.audit.record(report).await;
        if report.status() == SessionStatus::Failed {
            let message = &self.runtime.config.fallback_message;
            if let Err(e) = self.fallback.apologize_and_disconnect(meta, message).await {
                warn!(session_id = %meta.session_id, error = %e, "caller fallback failed");
            }
        }
        self.sessions.write().await.remove(&meta.session_id);
    }
}

/// Runs sessions of active workflows.
///
/// Cheap to clone; clones share the same session directory.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The node type registry the engine validates and dispatches with.
    #[must_use]
    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.inner.runtime.registry
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.runtime.config
    }

    /// Loads, validates, and activates a workflow.
    ///
    /// Every node must pass validation and have a registered handler.
    /// Returns the validation report, which may still carry warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow cannot be loaded or is invalid.
    pub async fn activate(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<WorkflowReport, ActivationError> {
        let mut workflow = self
            .inner
            .store
            .load(workflow_id)
            .await
            .map_err(ActivationError::from)?;

        let registry = &self.inner.runtime.registry;
        let report = validate_workflow(&workflow, registry);
        let mut errors = report.errors();
        errors.extend(workflow.graph.nodes().filter_map(|node| {
            let node_type = registry.canonical(&node.node_type);
            let known = registry.contains(node_type);
            (known && !self.inner.runtime.handlers.contains(node_type))
                .then(|| format!("node {}: no handler for node type `{node_type}`", node.id))
        }));
        if !errors.is_empty() {
            warn!(%workflow_id, errors = errors.len(), "workflow failed validation");
            return Err(ActivationError::Invalid {
                workflow_id,
                errors,
            }
            .into());
        }

        workflow.activate();
        self.inner
            .store
            .save(&workflow)
            .await
            .map_err(ActivationError::from)?;
        self.inner
            .active
            .write()
            .await
            .insert(workflow_id, Arc::new(workflow));
        info!(%workflow_id, warnings = report.warnings.len(), "workflow activated");
        Ok(report)
    }

    /// Detaches a workflow from new calls. Running sessions finish on the
    /// definition they started with.
    ///
    /// Returns false if the workflow was not active.
    ///
    /// # Errors
    ///
    /// Returns an error if the inactive flag cannot be stored.
    pub async fn deactivate(&self, workflow_id: WorkflowId) -> Result<bool, ActivationError> {
        let Some(workflow) = self.inner.active.write().await.remove(&workflow_id) else {
            return Ok(false);
        };
        let mut workflow = Workflow::clone(&workflow);
        workflow.deactivate();
        self.inner
            .store
            .save(&workflow)
            .await
            .map_err(ActivationError::from)?;
        info!(%workflow_id, "workflow deactivated");
        Ok(true)
    }

    /// Returns true if the workflow accepts new sessions.
    pub async fn is_active(&self, workflow_id: WorkflowId) -> bool {
        self.inner.active.read().await.contains_key(&workflow_id)
    }

    /// Starts a session for an inbound call.
    ///
    /// The session runs on its own task. The trigger payload is available
    /// to nodes as `trigger`, the call identity as `call`.
    ///
    /// # Errors
    ///
    /// Returns an error if the workflow is not active or has no matching
    /// trigger node.
    pub async fn start_session(&self, event: TriggerEvent) -> Result<SessionHandle, EngineError> {
        let workflow_id = event.workflow_id;
        let workflow = self
            .inner
            .active
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .ok_or(EngineError::WorkflowNotActive { workflow_id })?;
        let start = self.select_trigger(&workflow, &event)?.id.clone();

        let meta = SessionMeta {
            session_id: SessionId::new(),
            workflow_id,
            call_id: event.call_id.clone(),
            started_at: Utc::now(),
        };
        let session_id = meta.session_id;
        let mut variables = VariableStore::new();
        variables.set("trigger", event.trigger_payload);
        variables.set(
            "call",
            json!({
                "id": meta.call_id,
                "workflowId": workflow_id.to_string(),
                "sessionId": session_id.to_string(),
            }),
        );

        let (state, view) = SessionState::new(meta.clone());
        let cancel = self.inner.shutdown.child_token();
        let pending = PendingResumes::default();
        self.inner.sessions.write().await.insert(
            session_id,
            SessionEntry {
                cancel: cancel.clone(),
                view,
                pending: pending.clone(),
            },
        );

        let span = info_span!(
            "session",
            %session_id,
            %workflow_id,
            call_id = %meta.call_id,
        );
        let runner = SessionRunner::new(
            Arc::clone(&self.inner.runtime),
            workflow,
            meta,
            state,
            pending,
            cancel,
        );
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(
            async move {
                let report = runner.run(start, variables).await;
                inner.finish(&report).await;
                report
            }
            .instrument(span),
        );
        Ok(SessionHandle { session_id, task })
    }

    fn select_trigger<'w>(
        &self,
        workflow: &'w Workflow,
        event: &TriggerEvent,
    ) -> Result<&'w WorkflowNode, EngineError> {
        let registry = &self.inner.runtime.registry;
        let workflow_id = workflow.id;
        match &event.trigger_node_id {
            Some(node_id) => workflow
                .graph
                .get_node(node_id)
                .filter(|node| registry.canonical(&node.node_type) == "trigger")
                .ok_or_else(|| {
                    EngineError::TriggerNotFound {
                        workflow_id,
                        node_id: node_id.clone(),
                    }
                    .into()
                }),
            None => workflow
                .graph
                .triggers(registry)
                .into_iter()
                .next()
                .ok_or_else(|| EngineError::NoTrigger { workflow_id }.into()),
        }
    }

    /// Cancels a session. It stops at the next step boundary, or after the
    /// grace period if it is waiting on an external operation.
    ///
    /// # Errors
    ///
    /// Returns an error if no live session has this ID.
    pub async fn cancel(&self, session_id: SessionId) -> Result<(), EngineError> {
        let sessions = self.inner.sessions.read().await;
        let entry = sessions
            .get(&session_id)
            .ok_or(EngineError::SessionNotFound { session_id })?;
        info!(%session_id, "cancelling session");
        entry.cancel.cancel();
        Ok(())
    }

    /// Delivers the result of an operation a suspended node is waiting on.
    ///
    /// # Errors
    ///
    /// Returns an error if the session does not exist or is not waiting on
    /// `resume_token`.
    pub async fn resume(
        &self,
        session_id: SessionId,
        resume_token: &str,
        result: ResumeResult,
    ) -> Result<(), EngineError> {
        let sessions = self.inner.sessions.read().await;
        let entry = sessions
            .get(&session_id)
            .ok_or(EngineError::SessionNotFound { session_id })?;
        if entry.pending.deliver(resume_token, result) {
            Ok(())
        } else {
            Err(EngineError::UnknownResumeToken {
                session_id,
                token: resume_token.to_string(),
            }
            .into())
        }
    }

    /// Returns the live view of a session.
    ///
    /// # Errors
    ///
    /// Returns an error if no live session has this ID.
    pub async fn session_status(&self, session_id: SessionId) -> Result<SessionView, EngineError> {
        let sessions = self.inner.sessions.read().await;
        let entry = sessions
            .get(&session_id)
            .ok_or(EngineError::SessionNotFound { session_id })?;
        Ok(entry.view.borrow().clone())
    }

    /// Views of every live session, oldest first.
    pub async fn active_sessions(&self) -> Vec<SessionView> {
        let mut views: Vec<SessionView> = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .map(|entry| entry.view.borrow().clone())
            .collect();
        views.sort_by_key(|view| view.meta.session_id);
        views
    }

    /// Cancels every live session.
    pub fn shutdown(&self) {
        info!("cancelling all sessions");
        self.inner.shutdown.cancel();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("handlers", &self.inner.runtime.handlers)
            .field("config", &self.inner.runtime.config)
            .finish_non_exhaustive()
    }
}

/// A running session.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: SessionId,
    task: JoinHandle<SessionReport>,
}

impl SessionHandle {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Waits for the session to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the session task panicked or was aborted.
    pub async fn wait(self) -> Result<SessionReport, EngineError> {
        let session_id = self.session_id;
        self.task.await.map_err(|e| {
            EngineError::SessionAborted {
                session_id,
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Builds an [`Engine`].
///
/// Anything left unset gets an in-process default: the built-in node
/// catalog and handlers, in-memory stores, and a tracing audit sink.
#[derive(Default)]
pub struct EngineBuilder {
    registry: Option<NodeTypeRegistry>,
    handlers: Option<HandlerRegistry>,
    extra_handlers: Vec<(String, Arc<dyn NodeHandler>)>,
    providers: Providers,
    config: EngineConfig,
    store: Option<Arc<dyn WorkflowStore>>,
    shared: Option<Arc<dyn SharedVariables>>,
    audit: Option<Arc<dyn AuditSink>>,
    fallback: Option<Arc<dyn CallerFallback>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn with_registry(mut self, registry: NodeTypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replaces the built-in handlers entirely.
    #[must_use]
    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Registers a handler on top of the built-in ones.
    #[must_use]
    pub fn with_handler(
        mut self,
        node_type: impl Into<String>,
        handler: Arc<dyn NodeHandler>,
    ) -> Self {
        self.extra_handlers.push((node_type.into(), handler));
        self
    }

    /// Providers the built-in handlers and the default fallback talk to.
    #[must_use]
    pub fn with_providers(mut self, providers: Providers) -> Self {
        self.providers = providers;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_shared_variables(mut self, shared: Arc<dyn SharedVariables>) -> Self {
        self.shared = Some(shared);
        self
    }

    #[must_use]
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn CallerFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[must_use]
    pub fn build(self) -> Engine {
        let mut handlers = self
            .handlers
            .unwrap_or_else(|| handlers::builtin(&self.providers));
        for (node_type, handler) in self.extra_handlers {
            handlers.register(node_type, handler);
        }
        let fallback = self.fallback.unwrap_or_else(|| {
            Arc::new(SpeechFallback::new(
                self.providers.speech.clone(),
                self.providers.call_control.clone(),
            ))
        });
        let runtime = Runtime {
            registry: Arc::new(self.registry.unwrap_or_else(NodeTypeRegistry::builtin)),
            handlers,
            config: self.config,
            shared: self
                .shared
                .unwrap_or_else(|| Arc::new(InMemorySharedVariables::new())),
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
        };
        Engine {
            inner: Arc::new(EngineInner {
                runtime: Arc::new(runtime),
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(InMemoryWorkflowStore::new())),
                fallback,
                active: RwLock::new(HashMap::new()),
                sessions: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }
}
