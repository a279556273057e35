//! Call-flow model for the callflow IVR platform.
//!
//! This crate describes call flows and everything that can be checked
//! about them without running a call:
//!
//! - **Node Types**: The built-in catalog and the registry it lives in
//! - **Graph Model**: Directed graphs using petgraph with typed nodes and handle-labelled connections
//! - **Definition Format**: The JSON document exchanged with the flow editor
//! - **Validation**: Per-node configuration checks and structural invariants
//! - **Expressions**: The guard language used for branching and templating
//! - **Variables**: The per-session variable store
//! - **Triggers**: Inbound call events that start sessions

pub mod definition;
pub mod edge;
pub mod error;
pub mod expression;
pub mod graph;
pub mod node;
pub mod node_type;
pub mod registry;
pub mod trigger;
pub mod validation;
pub mod variables;

pub use definition::{ConnectionDocument, Workflow, WorkflowDocument};
pub use edge::{ConnectionId, NodeConnection, handles};
pub use error::{DefinitionError, ExpressionError, GraphError, RegistryError};
pub use expression::{Expression, Value, Variables};
pub use graph::{ConnectionRef, WorkflowGraph};
pub use node::{NodeConfig, NodeId, Position, SwitchCase, WorkflowNode};
pub use node_type::{NodeCategory, NodeTypeDefinition, Requirement};
pub use registry::NodeTypeRegistry;
pub use trigger::{CallId, TriggerEvent};
pub use validation::{ValidationReport, WorkflowReport, validate_node, validate_workflow};
pub use variables::{Scope, VariablePatch, VariableStore, VariableWrite};
