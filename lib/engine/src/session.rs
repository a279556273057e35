//! Session state machine.
//!
//! A session is one execution of a workflow for one call. Its lifecycle:
//!
//! ```text
//! Idle -> Running -> {Suspended <-> Running} -> {Completed | Failed | Cancelled}
//! ```
//!
//! The runner owns a [`SessionState`] and publishes every change through a
//! watch channel, so status queries read a snapshot without touching the
//! running session.

use crate::error::ErrorDescriptor;
use callflow_core::{SessionId, WorkflowId};
use callflow_workflow::{CallId, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::watch;

/// The overall state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not yet started.
    Idle,
    /// Dispatching the current node's handler.
    Running,
    /// The current node is waiting on an external operation or a timer.
    Suspended,
    /// An `end` node was reached.
    Completed,
    /// An unrecoverable error occurred.
    Failed,
    /// Cancelled from outside.
    Cancelled,
}

impl SessionStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of one node visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
    /// The handler is executing or awaiting its external operation.
    Running,
    /// Between attempts, waiting out a retry backoff.
    Idle,
}

/// Record of one node visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeExecutionResult {
    /// Position in the session history, starting at 1. Zero until recorded.
    pub step: u64,
    pub node_id: NodeId,
    pub node_type: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
    /// Output handle chosen by the node, if it completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_handle: Option<String>,
    /// Parallel branch the visit belongs to, as `parallelNode#index`
    /// segments joined by `/` for nested groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl NodeExecutionResult {
    /// Starts a visit record for a node.
    #[must_use]
    pub fn begin(node_id: &NodeId, node_type: &str, branch: Option<&str>) -> Self {
        Self {
            step: 0,
            node_id: node_id.clone(),
            node_type: node_type.to_string(),
            status: ResultStatus::Running,
            output: None,
            error: None,
            selected_handle: None,
            branch: branch.map(str::to_string),
            attempts: 0,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Finishes the visit successfully.
    #[must_use]
    pub fn succeed(mut self, output: Option<JsonValue>, handle: Option<String>) -> Self {
        self.status = ResultStatus::Success;
        self.output = output;
        self.selected_handle = handle;
        self.stop_clock();
        self
    }

    /// Finishes the visit with an error.
    #[must_use]
    pub fn fail(mut self, error: ErrorDescriptor) -> Self {
        self.status = ResultStatus::Error;
        self.error = Some(error);
        self.stop_clock();
        self
    }

    fn stop_clock(&mut self) {
        let elapsed = Utc::now() - self.started_at;
        self.duration_ms = u64::try_from(elapsed.num_milliseconds()).unwrap_or(0);
    }

    /// Returns true if the visit finished successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

/// Identity of a session, handed to node handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub session_id: SessionId,
    pub workflow_id: WorkflowId,
    pub call_id: CallId,
    pub started_at: DateTime<Utc>,
}

/// Read-only snapshot of a session for monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(flatten)]
    pub meta: SessionMeta,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<NodeId>,
    /// The visit in progress, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<NodeExecutionResult>,
    pub history: Vec<NodeExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl SessionView {
    #[must_use]
    pub fn new(meta: SessionMeta) -> Self {
        Self {
            meta,
            status: SessionStatus::Idle,
            current_node_id: None,
            in_flight: None,
            history: Vec::new(),
            error: None,
            finished_at: None,
        }
    }

    /// The step counter: number of recorded visits.
    #[must_use]
    pub fn step(&self) -> u64 {
        self.history.len() as u64
    }
}

/// Final outcome of a session, handed to the audit collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    #[serde(flatten)]
    pub view: SessionView,
    /// Session-scoped variables at the end of the session.
    pub variables: JsonValue,
}

impl SessionReport {
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.view.status
    }

    #[must_use]
    pub fn history(&self) -> &[NodeExecutionResult] {
        &self.view.history
    }

    /// Node IDs in visit order.
    #[must_use]
    pub fn path(&self) -> Vec<&str> {
        self.view.history.iter().map(|r| r.node_id.as_str()).collect()
    }
}

/// Live state of a running session.
///
/// Every transition is published to the watch channel the session directory
/// reads from.
#[derive(Debug)]
pub struct SessionState {
    view: watch::Sender<SessionView>,
}

impl SessionState {
    /// Creates an idle session and the receiver monitors read from.
    #[must_use]
    pub fn new(meta: SessionMeta) -> (Self, watch::Receiver<SessionView>) {
        let (view, receiver) = watch::channel(SessionView::new(meta));
        (Self { view }, receiver)
    }

    /// Returns a copy of the current view.
    #[must_use]
    pub fn snapshot(&self) -> SessionView {
        self.view.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.view.borrow().status
    }

    /// Starts the session.
    pub fn start(&self) {
        self.transition(SessionStatus::Running);
    }

    /// Moves the current-node pointer to a node about to execute.
    pub fn enter(&self, visit: &NodeExecutionResult) {
        self.view.send_modify(|view| {
            view.current_node_id = Some(visit.node_id.clone());
            view.in_flight = Some(visit.clone());
        });
    }

    /// Marks the in-flight visit as waiting out a retry backoff.
    pub fn backing_off(&self, attempts: u32) {
        self.view.send_modify(|view| {
            if let Some(visit) = view.in_flight.as_mut() {
                visit.status = ResultStatus::Idle;
                visit.attempts = attempts;
            }
        });
    }

    /// Marks the in-flight visit as executing attempt `attempt`.
    pub fn attempting(&self, attempt: u32) {
        self.view.send_modify(|view| {
            if let Some(visit) = view.in_flight.as_mut() {
                visit.status = ResultStatus::Running;
                visit.attempts = attempt;
            }
        });
    }

    /// The current node is waiting on an external operation.
    pub fn suspend(&self) {
        self.transition(SessionStatus::Suspended);
    }

    /// The awaited operation finished.
    pub fn resume(&self) {
        self.transition(SessionStatus::Running);
    }

    /// Appends a finished visit, assigning its step number.
    pub fn record(&self, mut result: NodeExecutionResult) {
        self.view.send_modify(|view| {
            result.step = view.step() + 1;
            view.in_flight = None;
            view.history.push(result);
        });
    }

    /// An `end` node was reached.
    pub fn complete(&self) {
        self.finish(SessionStatus::Completed, None);
    }

    /// The session failed.
    pub fn fail(&self, error: ErrorDescriptor) {
        self.finish(SessionStatus::Failed, Some(error));
    }

    /// The session was cancelled. Any in-flight visit is dropped unrecorded.
    pub fn cancel(&self) {
        self.finish(SessionStatus::Cancelled, Some(ErrorDescriptor::cancelled()));
    }

    fn transition(&self, status: SessionStatus) {
        self.view.send_if_modified(|view| {
            if view.status.is_terminal() || view.status == status {
                return false;
            }
            view.status = status;
            true
        });
    }

    fn finish(&self, status: SessionStatus, error: Option<ErrorDescriptor>) {
        self.view.send_modify(|view| {
            if view.status.is_terminal() {
                return;
            }
            view.status = status;
            view.error = error;
            view.in_flight = None;
            view.finished_at = Some(Utc::now());
        });
    }
}
