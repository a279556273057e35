//! Workflow definitions and their document format.
//!
//! A workflow is an editor-authored call flow that consists of:
//! - Metadata (name, category, active flag, timestamps)
//! - A directed graph of nodes and connections
//! - An optional workflow-level error handler node
//!
//! The engine treats a loaded workflow as immutable. Edits made in the
//! editor produce a new document and only affect sessions started later.

use crate::edge::{ConnectionId, NodeConnection, handles};
use crate::error::{DefinitionError, GraphError};
use crate::graph::WorkflowGraph;
use crate::node::{NodeId, WorkflowNode};
use crate::registry::NodeTypeRegistry;
use callflow_core::{Result, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    /// Unique identifier for this workflow.
    pub id: WorkflowId,
    /// Human-readable name.
    pub name: String,
    /// Free-form grouping used by the dashboard (e.g. `support`, `sales`).
    pub category: String,
    /// Whether the workflow is attached to live triggers.
    pub active: bool,
    /// Node receiving runtime errors not caught by a node's own `error` connection.
    pub error_handler: Option<NodeId>,
    /// When this workflow was created.
    pub created_at: DateTime<Utc>,
    /// When this workflow was last updated.
    pub updated_at: DateTime<Utc>,
    /// The call-flow graph.
    pub graph: WorkflowGraph,
}

impl Workflow {
    /// Creates an empty, inactive workflow with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(WorkflowId::new(), name)
    }

    /// Creates an empty workflow with a specific ID.
    #[must_use]
    pub fn with_id(id: WorkflowId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            category: String::new(),
            active: false,
            error_handler: None,
            created_at: now,
            updated_at: now,
            graph: WorkflowGraph::new(),
        }
    }

    /// Sets the category.
    #[must_use]
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Sets the workflow-level error handler.
    #[must_use]
    pub fn with_error_handler(mut self, node_id: impl Into<NodeId>) -> Self {
        self.error_handler = Some(node_id.into());
        self
    }

    /// Adds a node, builder style.
    ///
    /// # Errors
    ///
    /// Returns an error if the node ID is already used.
    pub fn node(mut self, node: WorkflowNode) -> Result<Self, GraphError> {
        self.graph.add_node(node)?;
        Ok(self)
    }

    /// Connects two nodes on a source handle, builder style.
    ///
    /// # Errors
    ///
    /// Returns an error if either node does not exist.
    pub fn connect(
        mut self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        connection: NodeConnection,
    ) -> Result<Self, GraphError> {
        self.graph
            .connect(&source.into(), &target.into(), connection)?;
        Ok(self)
    }

    /// Connects two nodes on the `default` handle, builder style.
    ///
    /// # Errors
    ///
    /// Returns an error if either node does not exist.
    pub fn then(
        self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
    ) -> Result<Self, GraphError> {
        self.connect(source, target, NodeConnection::new(handles::DEFAULT))
    }

    /// Marks the workflow active.
    pub fn activate(&mut self) {
        self.active = true;
        self.updated_at = Utc::now();
    }

    /// Marks the workflow inactive.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.updated_at = Utc::now();
    }

    /// Checks the structural invariants of the graph and the error handler reference.
    #[must_use]
    pub fn check_structure(&self, registry: &NodeTypeRegistry) -> Vec<GraphError> {
        let mut violations = self.graph.check_structure(registry);
        if let Some(handler) = &self.error_handler {
            if self.graph.contains(handler) {
                // The handler is entered by error routing, not by a connection.
                let caught = self.graph.reachable_from(handler);
                violations.retain(|violation| match violation {
                    GraphError::Unreachable { node_id } => !caught.contains(node_id),
                    _ => true,
                });
            } else {
                violations.push(GraphError::ErrorHandlerNotFound {
                    node_id: handler.clone(),
                });
            }
        }
        violations
    }

    /// Converts the workflow to its document form.
    #[must_use]
    pub fn to_document(&self) -> WorkflowDocument {
        WorkflowDocument {
            id: self.id.to_string(),
            name: self.name.clone(),
            category: self.category.clone(),
            active: self.active,
            error_handler_node_id: self.error_handler.clone(),
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
            nodes: self.graph.nodes().cloned().collect(),
            connections: self
                .graph
                .connections()
                .map(|c| ConnectionDocument {
                    id: c.connection.id.clone(),
                    source_node_id: c.source.id.clone(),
                    target_node_id: c.target.id.clone(),
                    source_handle: c.connection.source_handle.clone(),
                    target_handle: c.connection.target_handle.clone(),
                    condition: c.connection.condition.clone(),
                })
                .collect(),
        }
    }

    /// Builds a workflow from its document form.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is invalid, node IDs repeat, or a
    /// connection references a node that does not exist.
    pub fn from_document(document: WorkflowDocument) -> Result<Self, DefinitionError> {
        let id = document
            .id
            .parse::<WorkflowId>()
            .map_err(|_| DefinitionError::InvalidId {
                value: document.id.clone(),
            })?;

        let mut graph = WorkflowGraph::new();
        for node in document.nodes {
            graph.add_node(node).map_err(|e| match e {
                GraphError::DuplicateNode { node_id } => DefinitionError::DuplicateNode { node_id },
                other => DefinitionError::Malformed {
                    reason: other.to_string(),
                },
            })?;
        }

        for conn in document.connections {
            for endpoint in [&conn.source_node_id, &conn.target_node_id] {
                if !graph.contains(endpoint) {
                    return Err(DefinitionError::UnknownEndpoint {
                        connection_id: conn.id.to_string(),
                        node_id: endpoint.clone(),
                    }
                    .into());
                }
            }
            let connection = NodeConnection {
                id: conn.id,
                source_handle: conn.source_handle,
                target_handle: conn.target_handle,
                condition: conn.condition,
            };
            graph
                .connect(&conn.source_node_id, &conn.target_node_id, connection)
                .map_err(|e| DefinitionError::Malformed {
                    reason: e.to_string(),
                })?;
        }

        let now = Utc::now();
        Ok(Self {
            id,
            name: document.name,
            category: document.category,
            active: document.active,
            error_handler: document.error_handler_node_id,
            created_at: document.created_at.unwrap_or(now),
            updated_at: document.updated_at.unwrap_or(now),
            graph,
        })
    }

    /// Parses a workflow from its JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the document is invalid.
    pub fn from_json(json: &str) -> Result<Self, DefinitionError> {
        let document: WorkflowDocument =
            serde_json::from_str(json).map_err(|e| DefinitionError::Malformed {
                reason: e.to_string(),
            })?;
        Self::from_document(document)
    }

    /// Serializes the workflow to its JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, DefinitionError> {
        serde_json::to_string_pretty(&self.to_document()).map_err(|e| {
            DefinitionError::Malformed {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Serializable workflow document exchanged with the flow editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handler_node_id: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub connections: Vec<ConnectionDocument>,
}

/// A connection as it appears in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDocument {
    #[serde(default = "ConnectionId::generate")]
    pub id: ConnectionId,
    pub source_node_id: NodeId,
    pub target_node_id: NodeId,
    #[serde(default = "default_handle")]
    pub source_handle: String,
    #[serde(default = "default_handle")]
    pub target_handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

fn default_handle() -> String {
    handles::DEFAULT.to_string()
}
