//! Connections between workflow nodes.
//!
//! A connection leaves a named output handle on its source node and enters
//! a handle on its target node. An optional guard expression restricts when
//! the connection fires; unguarded connections always fire for their handle.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Well-known handle names.
pub mod handles {
    /// Fallback output of every node; the only output of most.
    pub const DEFAULT: &str = "default";
    /// Condition evaluated truthy.
    pub const TRUE: &str = "true";
    /// Condition evaluated falsy.
    pub const FALSE: &str = "false";
    /// Runtime error raised by the node.
    pub const ERROR: &str = "error";
    /// Loop body entry.
    pub const BODY: &str = "body";
    /// Loop exited because its condition stopped holding.
    pub const DONE: &str = "done";
    /// Loop exited because its iteration bound was reached.
    pub const TIMEOUT: &str = "timeout";
}

/// Identifier of a connection within a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a connection ID from an editor-provided identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, globally unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Ulid::new()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Edge weight stored in the workflow graph.
///
/// Source and target node IDs are implied by the graph endpoints; the
/// flattened document form is [`ConnectionDocument`](crate::definition::ConnectionDocument).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConnection {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Output handle on the source node.
    pub source_handle: String,
    /// Input handle on the target node.
    pub target_handle: String,
    /// Optional guard expression evaluated against session variables.
    pub condition: Option<String>,
}

impl NodeConnection {
    /// Creates an unguarded connection leaving the given handle.
    #[must_use]
    pub fn new(source_handle: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::generate(),
            source_handle: source_handle.into(),
            target_handle: handles::DEFAULT.to_string(),
            condition: None,
        }
    }

    /// Creates an unguarded connection on the `default` handle.
    #[must_use]
    pub fn default_handle() -> Self {
        Self::new(handles::DEFAULT)
    }

    /// Sets the connection ID, builder style.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = ConnectionId::new(id);
        self
    }

    /// Sets the target handle, builder style.
    #[must_use]
    pub fn into_handle(mut self, target_handle: impl Into<String>) -> Self {
        self.target_handle = target_handle.into();
        self
    }

    /// Adds a guard expression, builder style.
    #[must_use]
    pub fn guarded(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    /// Returns the guard expression, ignoring blank ones.
    #[must_use]
    pub fn guard(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Returns true if the connection leaves the given handle.
    #[must_use]
    pub fn leaves(&self, handle: &str) -> bool {
        self.source_handle == handle
    }
}

impl Default for NodeConnection {
    fn default() -> Self {
        Self::default_handle()
    }
}
