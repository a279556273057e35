//! The node handler capability.
//!
//! Every node type is executed by one [`NodeHandler`]. The engine hands the
//! handler a [`NodeContext`] and routes on the returned [`NodeOutcome`];
//! it never inspects node types itself. Adding a node type means registering
//! a definition in the node type registry and a handler here.

use crate::config::EngineConfig;
use crate::error::NodeError;
use crate::session::SessionMeta;
use crate::store::{AuditSink, SharedVariables};
use async_trait::async_trait;
use callflow_workflow::{
    NodeConfig, NodeConnection, NodeId, NodeTypeDefinition, VariablePatch, VariableStore,
    WorkflowNode, handles,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// How a parallel group treats failing branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchPolicy {
    /// The first unhandled branch failure fails the group and stops the
    /// other branches.
    #[default]
    FailFast,
    /// Failed branches are recorded; the group still proceeds to the join.
    BestEffort,
}

impl BranchPolicy {
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "fail_fast" => Some(Self::FailFast),
            "best_effort" => Some(Self::BestEffort),
            _ => None,
        }
    }
}

/// Which way execution continues after a node completes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HandleSelection {
    /// The `default` handle.
    #[default]
    Default,
    /// A named handle. Falls back to `default` if nothing is connected to it.
    Named(String),
    /// Every connection on the `default` handle runs concurrently until
    /// reaching `join`.
    FanOut { join: NodeId, policy: BranchPolicy },
    /// The session completes.
    Terminate,
}

impl HandleSelection {
    #[must_use]
    pub fn named(handle: impl Into<String>) -> Self {
        let handle = handle.into();
        if handle == handles::DEFAULT {
            Self::Default
        } else {
            Self::Named(handle)
        }
    }

    /// The handle name recorded in history.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Default | Self::FanOut { .. } => Some(handles::DEFAULT),
            Self::Named(handle) => Some(handle),
            Self::Terminate => None,
        }
    }
}

/// What a handler produced on success.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HandlerOutput {
    /// Variable writes to merge into the session.
    pub variables: VariablePatch,
    pub handle: HandleSelection,
    /// Output payload recorded in history and exposed as `nodes.<id>`.
    pub output: Option<JsonValue>,
}

impl HandlerOutput {
    /// Completes on the `default` handle with no output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_output(mut self, output: JsonValue) -> Self {
        self.output = Some(output);
        self
    }

    #[must_use]
    pub fn with_variables(mut self, variables: VariablePatch) -> Self {
        self.variables = variables;
        self
    }

    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.variables = self.variables.set(key, value);
        self
    }

    #[must_use]
    pub fn select(mut self, handle: HandleSelection) -> Self {
        self.handle = handle;
        self
    }

    #[must_use]
    pub fn terminate(self) -> Self {
        self.select(HandleSelection::Terminate)
    }
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Complete(HandlerOutput),
    /// The handler started an operation that finishes out of band. The
    /// session stays suspended until [`Engine::resume`](crate::Engine::resume)
    /// delivers the result for `resume_token`.
    Suspend { resume_token: String },
}

impl From<HandlerOutput> for NodeOutcome {
    fn from(output: HandlerOutput) -> Self {
        Self::Complete(output)
    }
}

/// The result delivered to a suspended node.
pub type ResumeResult = Result<HandlerOutput, NodeError>;

/// Wire form of a resume result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePayload {
    /// Session variables to set.
    #[serde(default)]
    pub variables: Map<String, JsonValue>,
    /// Handle to continue on. Defaults to `default`.
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub output: Option<JsonValue>,
    /// Marks the operation as failed.
    #[serde(default)]
    pub error: Option<String>,
}

impl ResumePayload {
    #[must_use]
    pub fn into_result(self) -> ResumeResult {
        if let Some(message) = self.error {
            return Err(NodeError::failed(message));
        }
        let variables = self
            .variables
            .into_iter()
            .fold(VariablePatch::new(), |patch, (key, value)| patch.set(key, value));
        let handle = self
            .handle
            .map_or(HandleSelection::Default, HandleSelection::named);
        Ok(HandlerOutput {
            variables,
            handle,
            output: self.output,
        })
    }
}

/// Everything a handler can see while executing one node.
pub struct NodeContext<'a> {
    pub node: &'a WorkflowNode,
    pub definition: &'a NodeTypeDefinition,
    /// Snapshot of the session variables at the start of the visit.
    pub variables: &'a VariableStore,
    pub meta: &'a SessionMeta,
    /// Outgoing connections of the node, in declaration order.
    pub outgoing: Vec<&'a NodeConnection>,
    /// 1-based attempt number.
    pub attempt: u32,
    pub engine: &'a EngineConfig,
    pub shared: &'a dyn SharedVariables,
    pub audit: &'a dyn AuditSink,
}

impl NodeContext<'_> {
    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.node.config
    }

    #[must_use]
    pub fn node_id(&self) -> &NodeId {
        &self.node.id
    }

    /// Returns a string config value with `{{ }}` placeholders rendered.
    #[must_use]
    pub fn render(&self, key: &str) -> Option<String> {
        self.config().str(key).map(|raw| self.variables.render(raw))
    }

    /// Returns the first of `keys` that is set, rendered.
    #[must_use]
    pub fn render_any(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.render(key))
    }

    /// Returns a config value with every string inside it rendered.
    #[must_use]
    pub fn render_value(&self, key: &str) -> Option<JsonValue> {
        self.config()
            .get(key)
            .filter(|_| self.config().has(key))
            .map(|value| self.variables.render_json(value))
    }

    /// Returns a rendered string config value or an invalid-config error.
    ///
    /// # Errors
    ///
    /// Returns an error if none of `keys` is set.
    pub fn require(&self, keys: &[&str]) -> Result<String, NodeError> {
        self.render_any(keys).ok_or_else(|| {
            NodeError::invalid_config(format!("`{}` is not set", keys.join("` or `")))
        })
    }

    /// Variable the node writes its result to: `outputVariable` or `fallback`.
    #[must_use]
    pub fn output_variable(&self, fallback: &str) -> String {
        self.config()
            .str("outputVariable")
            .unwrap_or(fallback)
            .trim()
            .to_string()
    }

    /// Returns true if some connection leaves the node on `handle`.
    #[must_use]
    pub fn has_connection(&self, handle: &str) -> bool {
        self.outgoing.iter().any(|c| c.leaves(handle))
    }

    /// Resume token unique to this node visit in this session.
    #[must_use]
    pub fn resume_token(&self) -> String {
        format!("{}:{}:{}", self.meta.session_id, self.node.id, self.attempt)
    }
}

impl fmt::Debug for NodeContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("node", &self.node.id)
            .field("node_type", &self.definition.id)
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

/// Executes one node type.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError>;
}

/// Maps canonical node type identifiers to handlers.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Creates a registry with no handlers.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registers a handler, replacing any previous handler for the type.
    pub fn register(&mut self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type.into(), handler);
    }

    /// Registers a handler, builder style.
    #[must_use]
    pub fn with(mut self, node_type: impl Into<String>, handler: Arc<dyn NodeHandler>) -> Self {
        self.register(node_type, handler);
        self
    }

    #[must_use]
    pub fn get(&self, node_type: &str) -> Option<&Arc<dyn NodeHandler>> {
        self.handlers.get(node_type)
    }

    #[must_use]
    pub fn contains(&self, node_type: &str) -> bool {
        self.handlers.contains_key(node_type)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("HandlerRegistry")
            .field("types", &types)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn named_default_collapses() {
        assert_eq!(HandleSelection::named("default"), HandleSelection::Default);
        assert_eq!(
            HandleSelection::named("billing"),
            HandleSelection::Named("billing".to_string())
        );
        assert_eq!(HandleSelection::Terminate.label(), None);
    }

    #[test]
    fn resume_payload_success() {
        let payload: ResumePayload = serde_json::from_value(json!({
            "variables": {"digits": "1234"},
            "handle": "collected",
            "output": {"digits": "1234"}
        }))
        .expect("parse");
        let output = payload.into_result().expect("success");
        assert_eq!(output.handle, HandleSelection::Named("collected".to_string()));
        assert_eq!(output.variables.len(), 1);
        assert_eq!(output.output, Some(json!({"digits": "1234"})));
    }

    #[test]
    fn resume_payload_error() {
        let payload = ResumePayload {
            error: Some("caller hung up the keypad".to_string()),
            ..ResumePayload::default()
        };
        let error = payload.into_result().expect_err("error");
        assert_eq!(error, NodeError::failed("caller hung up the keypad"));
    }

    #[test]
    fn branch_policy_parses() {
        assert_eq!(BranchPolicy::parse("best_effort"), Some(BranchPolicy::BestEffort));
        assert_eq!(BranchPolicy::parse("fail_fast"), Some(BranchPolicy::FailFast));
        assert_eq!(BranchPolicy::parse("yolo"), None);
        assert_eq!(BranchPolicy::default(), BranchPolicy::FailFast);
    }
}
