//! Error types for the workflow crate.
//!
//! Errors are layered with rootcause:
//! - `RegistryError`: Node type lookups and registration
//! - `GraphError`: Graph operations and structural invariants
//! - `DefinitionError`: Parsing and building workflow documents (wraps lower errors via context)
//! - `ExpressionError`: Guard expression syntax

use crate::node::NodeId;
use std::fmt;

/// Errors from the node type registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No type or alias with this identifier.
    NotFound { node_type: String },
    /// The identifier is already registered.
    DuplicateType { node_type: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { node_type } => write!(f, "unknown node type: {node_type}"),
            Self::DuplicateType { node_type } => {
                write!(f, "node type already registered: {node_type}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors from graph operations and structural checks.
///
/// Structural variants are collected by
/// [`WorkflowGraph::check_structure`](crate::graph::WorkflowGraph::check_structure)
/// rather than returned one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Node with the given ID was not found in the graph.
    NodeNotFound { node_id: NodeId },
    /// A node with the same ID already exists.
    DuplicateNode { node_id: NodeId },
    /// The workflow has no trigger node.
    NoTrigger,
    /// A connected node cannot be reached from any trigger.
    Unreachable { node_id: NodeId },
    /// An `end` node has outgoing connections.
    EndHasOutgoing { node_id: NodeId },
    /// A `condition` node must have exactly one `default` connection.
    ConditionDefault { node_id: NodeId, defaults: usize },
    /// A `switch` node neither covers every case nor has exactly one `default`.
    SwitchUncovered {
        node_id: NodeId,
        missing: Vec<String>,
        defaults: usize,
    },
    /// A `parallel` node's `joinNodeId` is missing or not a `join` node.
    InvalidJoin {
        node_id: NodeId,
        join_node_id: Option<String>,
    },
    /// The workflow-level error handler does not exist.
    ErrorHandlerNotFound { node_id: NodeId },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::NoTrigger => write!(f, "workflow has no trigger node"),
            Self::Unreachable { node_id } => {
                write!(f, "node {node_id} is not reachable from any trigger")
            }
            Self::EndHasOutgoing { node_id } => {
                write!(f, "end node {node_id} has outgoing connections")
            }
            Self::ConditionDefault { node_id, defaults } => write!(
                f,
                "condition node {node_id} needs exactly one default connection, found {defaults}"
            ),
            Self::SwitchUncovered {
                node_id,
                missing,
                defaults,
            } => write!(
                f,
                "switch node {node_id} leaves cases [{}] unconnected and has {defaults} default connections",
                missing.join(", ")
            ),
            Self::InvalidJoin {
                node_id,
                join_node_id: Some(join),
            } => write!(
                f,
                "parallel node {node_id} joins at {join}, which is not a join node"
            ),
            Self::InvalidJoin {
                node_id,
                join_node_id: None,
            } => write!(f, "parallel node {node_id} has no joinNodeId"),
            Self::ErrorHandlerNotFound { node_id } => {
                write!(f, "workflow error handler {node_id} does not exist")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors building a workflow from its definition document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// The document is not valid JSON for the definition format.
    Malformed { reason: String },
    /// Two nodes share an ID.
    DuplicateNode { node_id: NodeId },
    /// A connection references a node that does not exist.
    UnknownEndpoint {
        connection_id: String,
        node_id: NodeId,
    },
    /// The document ID is not a valid workflow ID.
    InvalidId { value: String },
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed workflow document: {reason}"),
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::UnknownEndpoint {
                connection_id,
                node_id,
            } => write!(
                f,
                "connection {connection_id} references unknown node {node_id}"
            ),
            Self::InvalidId { value } => write!(f, "invalid workflow id: {value}"),
        }
    }
}

impl std::error::Error for DefinitionError {}

/// Syntax errors in guard expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// The expression is empty.
    Empty,
    /// A character that starts no token.
    UnexpectedChar { ch: char, offset: usize },
    /// A string literal is not closed.
    UnterminatedString { offset: usize },
    /// A token that does not fit the grammar at this point.
    UnexpectedToken { token: String, offset: usize },
    /// The expression ended early.
    UnexpectedEnd,
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "expression is empty"),
            Self::UnexpectedChar { ch, offset } => {
                write!(f, "unexpected character '{ch}' at offset {offset}")
            }
            Self::UnterminatedString { offset } => {
                write!(f, "unterminated string starting at offset {offset}")
            }
            Self::UnexpectedToken { token, offset } => {
                write!(f, "unexpected '{token}' at offset {offset}")
            }
            Self::UnexpectedEnd => write!(f, "unexpected end of expression"),
        }
    }
}

impl std::error::Error for ExpressionError {}
