//! Error types for the execution engine.
//!
//! Two families live here. [`NodeError`] and [`ErrorDescriptor`] describe
//! runtime failures of a node; they are data recorded in the session history
//! and routed to error handlers. The remaining enums are failures of the
//! engine API itself and its collaborators.

use callflow_core::{SessionId, WorkflowId};
use callflow_workflow::NodeId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classification of a runtime failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Configuration incomplete at activation time.
    #[serde(rename = "ValidationError")]
    Validation,
    /// The node's type has no definition or no handler.
    UnknownNodeType,
    /// No outgoing connection matches the selected handle.
    DeadEnd,
    /// External I/O or business failure inside a node.
    #[serde(rename = "HandlerError")]
    Handler,
    /// The handler exceeded its deadline.
    #[serde(rename = "TimeoutError")]
    Timeout,
    /// A loop or the whole session exceeded its iteration bound.
    LoopBoundExceeded,
    /// The session was cancelled.
    #[serde(rename = "CancelledError")]
    Cancelled,
}

impl ErrorKind {
    /// Returns true if the failure may be offered to an error handler.
    ///
    /// Authoring defects and cancellation always terminate the session.
    #[must_use]
    pub fn is_routable(&self) -> bool {
        matches!(self, Self::Handler | Self::Timeout | Self::LoopBoundExceeded)
    }

    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Handler | Self::Timeout)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::UnknownNodeType => "UnknownNodeType",
            Self::DeadEnd => "DeadEnd",
            Self::Handler => "HandlerError",
            Self::Timeout => "TimeoutError",
            Self::LoopBoundExceeded => "LoopBoundExceeded",
            Self::Cancelled => "CancelledError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A runtime failure as recorded in history and exposed to error handlers
/// through the `error` variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
    /// Node the failure happened in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Number of attempts made before giving up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl ErrorDescriptor {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            node_id: None,
            attempts: None,
        }
    }

    #[must_use]
    pub fn at(mut self, node_id: &NodeId) -> Self {
        self.node_id = Some(node_id.clone());
        self
    }

    #[must_use]
    pub fn after_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    #[must_use]
    pub fn dead_end(node_id: &NodeId, handle: &str) -> Self {
        Self::new(
            ErrorKind::DeadEnd,
            format!("no connection leaves node {node_id} on handle `{handle}`"),
        )
        .at(node_id)
    }

    #[must_use]
    pub fn unknown_node_type(node_id: &NodeId, node_type: &str) -> Self {
        Self::new(
            ErrorKind::UnknownNodeType,
            format!("no handler for node type `{node_type}`"),
        )
        .at(node_id)
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "session cancelled")
    }
}

impl std::fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(node_id) => write!(f, "{} at {node_id}: {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Failure returned by a node handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// External I/O or business failure.
    Failed { message: String },
    /// The node's configuration cannot be used at runtime.
    InvalidConfig { message: String },
    /// The handler did not finish within its deadline.
    TimedOut { after: Duration },
    /// A loop node ran out of iterations with nowhere to go.
    LoopBoundExceeded { node_id: NodeId, bound: u64 },
    /// A collaborator the handler needs is not wired.
    MissingProvider { capability: &'static str },
}

impl NodeError {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Classifies the failure.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Failed { .. } | Self::InvalidConfig { .. } | Self::MissingProvider { .. } => {
                ErrorKind::Handler
            }
            Self::TimedOut { .. } => ErrorKind::Timeout,
            Self::LoopBoundExceeded { .. } => ErrorKind::LoopBoundExceeded,
        }
    }

    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut { .. })
    }

    /// Converts the failure into a history descriptor.
    #[must_use]
    pub fn describe(&self, node_id: &NodeId) -> ErrorDescriptor {
        ErrorDescriptor::new(self.kind(), self.to_string()).at(node_id)
    }
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed { message } => f.write_str(message),
            Self::InvalidConfig { message } => write!(f, "invalid configuration: {message}"),
            Self::TimedOut { after } => write!(f, "timed out after {}ms", after.as_millis()),
            Self::LoopBoundExceeded { node_id, bound } => {
                write!(f, "loop {node_id} exceeded {bound} iterations")
            }
            Self::MissingProvider { capability } => {
                write!(f, "no {capability} provider is configured")
            }
        }
    }
}

impl std::error::Error for NodeError {}

impl From<ProviderError> for NodeError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Timeout { after } => Self::TimedOut { after },
            ProviderError::NotConfigured { capability } => Self::MissingProvider { capability },
            other => Self::Failed {
                message: other.to_string(),
            },
        }
    }
}

/// Errors from provider collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider could not be reached.
    Unavailable { provider: String, reason: String },
    /// The provider refused or failed the request.
    Rejected { reason: String },
    /// The provider answered with something unusable.
    InvalidResponse { reason: String },
    /// The provider did not answer in time.
    Timeout { after: Duration },
    /// No provider is wired for the capability.
    NotConfigured { capability: &'static str },
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable { provider, reason } => {
                write!(f, "provider {provider} unavailable: {reason}")
            }
            Self::Rejected { reason } => write!(f, "provider rejected request: {reason}"),
            Self::InvalidResponse { reason } => write!(f, "invalid provider response: {reason}"),
            Self::Timeout { after } => {
                write!(f, "provider timed out after {}ms", after.as_millis())
            }
            Self::NotConfigured { capability } => {
                write!(f, "no {capability} provider is configured")
            }
        }
    }
}

impl std::error::Error for ProviderError {}

/// Errors from the workflow store and shared-variable collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The workflow does not exist.
    NotFound { workflow_id: WorkflowId },
    /// The stored document could not be read back.
    Corrupt { reason: String },
    /// The backing storage failed.
    Io { reason: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::Corrupt { reason } => write!(f, "stored workflow is corrupt: {reason}"),
            Self::Io { reason } => write!(f, "storage error: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from activating a workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationError {
    /// The workflow does not exist in the store.
    NotFound { workflow_id: WorkflowId },
    /// Validation found errors. Each entry is one human-readable problem.
    Invalid {
        workflow_id: WorkflowId,
        errors: Vec<String>,
    },
    /// The store failed.
    Store { reason: String },
}

impl std::fmt::Display for ActivationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { workflow_id } => write!(f, "workflow not found: {workflow_id}"),
            Self::Invalid {
                workflow_id,
                errors,
            } => write!(
                f,
                "workflow {workflow_id} has {} validation error(s): {}",
                errors.len(),
                errors.join("; ")
            ),
            Self::Store { reason } => write!(f, "workflow store error: {reason}"),
        }
    }
}

impl std::error::Error for ActivationError {}

impl From<StoreError> for ActivationError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { workflow_id } => Self::NotFound { workflow_id },
            other => Self::Store {
                reason: other.to_string(),
            },
        }
    }
}

/// Errors from the engine's session API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The workflow is not active.
    WorkflowNotActive { workflow_id: WorkflowId },
    /// The workflow has no trigger node to start from.
    NoTrigger { workflow_id: WorkflowId },
    /// The requested trigger node does not exist or is not a trigger.
    TriggerNotFound {
        workflow_id: WorkflowId,
        node_id: NodeId,
    },
    /// No live session has this ID.
    SessionNotFound { session_id: SessionId },
    /// The session is not waiting on this resume token.
    UnknownResumeToken { session_id: SessionId, token: String },
    /// The session task ended without producing a report.
    SessionAborted { session_id: SessionId, reason: String },
    /// The store failed.
    Store { reason: String },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WorkflowNotActive { workflow_id } => {
                write!(f, "workflow {workflow_id} is not active")
            }
            Self::NoTrigger { workflow_id } => {
                write!(f, "workflow {workflow_id} has no trigger node")
            }
            Self::TriggerNotFound {
                workflow_id,
                node_id,
            } => write!(f, "workflow {workflow_id} has no trigger node {node_id}"),
            Self::SessionNotFound { session_id } => write!(f, "session not found: {session_id}"),
            Self::UnknownResumeToken { session_id, token } => {
                write!(f, "session {session_id} is not waiting on token {token}")
            }
            Self::SessionAborted { session_id, reason } => {
                write!(f, "session {session_id} aborted: {reason}")
            }
            Self::Store { reason } => write!(f, "workflow store error: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_serializes_taxonomy_names() {
        let descriptor = NodeError::TimedOut {
            after: Duration::from_millis(2000),
        }
        .describe(&NodeId::new("lookup"))
        .after_attempts(3);
        let json = serde_json::to_value(&descriptor).expect("serialize");
        assert_eq!(json["kind"], "TimeoutError");
        assert_eq!(json["nodeId"], "lookup");
        assert_eq!(json["attempts"], 3);
        assert_eq!(json["message"], "timed out after 2000ms");
    }

    #[test]
    fn routing_classes() {
        assert!(ErrorKind::Handler.is_routable());
        assert!(ErrorKind::Timeout.is_routable());
        assert!(ErrorKind::LoopBoundExceeded.is_routable());
        assert!(!ErrorKind::DeadEnd.is_routable());
        assert!(!ErrorKind::UnknownNodeType.is_routable());
        assert!(!ErrorKind::Cancelled.is_routable());
        assert!(!ErrorKind::LoopBoundExceeded.is_retryable());
    }

    #[test]
    fn provider_errors_map_to_node_errors() {
        let timeout: NodeError = ProviderError::Timeout {
            after: Duration::from_secs(1),
        }
        .into();
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let missing: NodeError = ProviderError::NotConfigured { capability: "speech" }.into();
        assert_eq!(missing.kind(), ErrorKind::Handler);
        assert!(!missing.is_retryable());

        let rejected: NodeError = ProviderError::Rejected {
            reason: "bad number".to_string(),
        }
        .into();
        assert!(rejected.is_retryable());
        assert_eq!(rejected.to_string(), "provider rejected request: bad number");
    }
}
