//! Node and workflow validation.
//!
//! [`validate_node`] checks a node's configuration against its type. It is
//! a pure function of the node and the registry and knows nothing about
//! connectivity. [`validate_workflow`] adds the structural invariants and
//! guard expressions on connections.
//!
//! Errors block activation. Warnings are advisory and never block anything.

use crate::definition::Workflow;
use crate::error::GraphError;
use crate::expression::Expression;
use crate::node::{NodeId, WorkflowNode};
use crate::registry::NodeTypeRegistry;
use crate::variables::Scope;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// Retry counts above this are flagged.
pub const MAX_RECOMMENDED_RETRIES: u64 = 5;

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];
const PARALLEL_POLICIES: &[&str] = &["fail_fast", "best_effort"];

/// Result of validating one node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Returns true if there are no errors.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns true if there are neither errors nor warnings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Validates a node's configuration against its type.
#[must_use]
pub fn validate_node(node: &WorkflowNode, registry: &NodeTypeRegistry) -> ValidationReport {
    let mut report = ValidationReport::default();

    let definition = match registry.lookup(&node.node_type) {
        Ok(definition) => definition,
        Err(e) => {
            report.error(e.to_string());
            return report;
        }
    };

    for requirement in definition.required {
        if !requirement.0.iter().any(|key| node.config.has(key)) {
            report.error(requirement.describe());
        }
    }

    let config = &node.config;
    match definition.id {
        "condition" => {
            if let Some(source) = config.str("condition").or_else(|| config.str("expression")) {
                check_expression(&mut report, "condition", source);
            }
        }
        "switch" => {
            if let Some(source) = config.str("expression") {
                check_expression(&mut report, "expression", source);
            }
            if config.has("cases") && config.switch_cases().is_empty() {
                report.error("`cases` must be a non-empty array");
            }
        }
        "loop" => {
            if let Some(source) = config.str("condition") {
                check_expression(&mut report, "condition", source);
            }
            match (config.has("maxIterations"), config.u64("maxIterations")) {
                (false, _) => report.warn(
                    "`maxIterations` is not set; the engine's default bound applies",
                ),
                (true, Some(0) | None) => {
                    report.error("`maxIterations` must be a positive integer");
                }
                (true, Some(_)) => {}
            }
        }
        "transform" => {
            if let Some(source) = config.str("expression") {
                check_expression(&mut report, "expression", source);
            }
        }
        "parallel" => {
            if let Some(policy) = config.str("policy") {
                if !PARALLEL_POLICIES.contains(&policy) {
                    report.error(format!(
                        "`policy` must be one of {}, got `{policy}`",
                        PARALLEL_POLICIES.join(", ")
                    ));
                }
            }
        }
        "delay" => {
            if config.has("duration") && config.duration("duration").is_none() {
                report.error("`duration` must be a non-negative number of milliseconds");
            }
        }
        "api" => {
            if let Some(method) = config.str("method") {
                if !HTTP_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
                    report.error(format!("`method` `{method}` is not an HTTP method"));
                }
            }
        }
        "email" => {
            if !config.has("subject") {
                report.warn("`subject` is not set; the email will be sent without one");
            }
        }
        "variable" => {
            if let Some(scope) = config.str("scope") {
                if Scope::parse(scope).is_none() {
                    report.error(format!("`scope` must be `session` or `shared`, got `{scope}`"));
                }
            }
        }
        "redact" => {
            if config.has("fields") && config.array("fields").is_none() {
                report.error("`fields` must be an array of variable paths");
            }
        }
        _ => {}
    }

    if definition.performs_io {
        if !config.has("timeout") {
            report.warn("no `timeout` set; the engine's default I/O timeout applies");
        } else if config.duration("timeout").is_none_or(|t| t.is_zero()) {
            report.error("`timeout` must be a positive number of milliseconds");
        }

        if config.has("retries") {
            match config.u64("retries") {
                None => report.error("`retries` must be a non-negative integer"),
                Some(n) if n > MAX_RECOMMENDED_RETRIES => report.warn(format!(
                    "`retries` is {n}; more than {MAX_RECOMMENDED_RETRIES} retries can keep a caller waiting"
                )),
                Some(_) => {}
            }
        }
    }

    report
}

fn check_expression(report: &mut ValidationReport, key: &str, source: &str) {
    if let Err(e) = Expression::parse(source) {
        report.error(format!("`{key}` does not parse: {e}"));
    }
}

/// Problem with a connection's guard expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionIssue {
    pub connection_id: String,
    pub message: String,
}

/// Result of validating a whole workflow.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
    /// Per-node reports, only for nodes with findings.
    pub nodes: BTreeMap<NodeId, ValidationReport>,
    /// Structural invariant violations.
    #[serde(serialize_with = "as_messages")]
    pub structure: Vec<GraphError>,
    /// Connections whose guard does not parse.
    pub connections: Vec<ConnectionIssue>,
    /// Workflow-level advisories, such as orphaned nodes.
    pub warnings: Vec<String>,
}

impl WorkflowReport {
    /// Returns true if no errors were found anywhere.
    #[must_use]
    pub fn is_activatable(&self) -> bool {
        self.structure.is_empty()
            && self.connections.is_empty()
            && self.nodes.values().all(ValidationReport::is_valid)
    }

    /// All errors as human-readable lines.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        let nodes = self.nodes.iter().flat_map(|(id, report)| {
            report.errors.iter().map(move |e| format!("node {id}: {e}"))
        });
        let structure = self.structure.iter().map(ToString::to_string);
        let connections = self
            .connections
            .iter()
            .map(|c| format!("connection {}: {}", c.connection_id, c.message));
        nodes.chain(structure).chain(connections).collect()
    }
}

fn as_messages<S: Serializer>(errors: &[GraphError], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(errors.iter().map(ToString::to_string))
}

/// Validates every node, the graph structure, and connection guards.
#[must_use]
pub fn validate_workflow(workflow: &Workflow, registry: &NodeTypeRegistry) -> WorkflowReport {
    let mut report = WorkflowReport {
        structure: workflow.check_structure(registry),
        ..WorkflowReport::default()
    };

    for node in workflow.graph.nodes() {
        let node_report = validate_node(node, registry);
        if !node_report.is_clean() {
            report.nodes.insert(node.id.clone(), node_report);
        }
    }

    for conn in workflow.graph.connections() {
        if let Some(guard) = conn.connection.guard() {
            if let Err(e) = Expression::parse(guard) {
                report.connections.push(ConnectionIssue {
                    connection_id: conn.connection.id.to_string(),
                    message: format!("guard does not parse: {e}"),
                });
            }
        }
    }

    for orphan in workflow.graph.orphans() {
        report
            .warnings
            .push(format!("node {} is not connected to anything", orphan.id));
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::{NodeConnection, handles};
    use crate::node::NodeConfig;
    use serde_json::json;

    fn node(node_type: &str, config: NodeConfig) -> WorkflowNode {
        WorkflowNode::new("n", node_type).with_config(config)
    }

    fn check(node_type: &str, config: NodeConfig) -> ValidationReport {
        validate_node(&node(node_type, config), &NodeTypeRegistry::builtin())
    }

    #[test]
    fn unknown_type_is_an_error() {
        let report = check("teleport", NodeConfig::new());
        assert_eq!(report.errors, vec!["unknown node type: teleport"]);
    }

    #[test]
    fn api_requires_endpoint_and_method() {
        let report = check("api", NodeConfig::new());
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("endpoint"));
        assert!(report.errors[1].contains("method"));

        let report = check(
            "api",
            NodeConfig::new()
                .with("endpoint", "https://crm.test/lookup")
                .with("method", "FETCH")
                .with("timeout", 2000),
        );
        assert_eq!(report.errors, vec!["`method` `FETCH` is not an HTTP method"]);
    }

    #[test]
    fn io_node_without_timeout_warns() {
        let report = check(
            "api",
            NodeConfig::new()
                .with("endpoint", "https://crm.test")
                .with("method", "get"),
        );
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("timeout"));
    }

    #[test]
    fn excessive_retries_warn() {
        let report = check(
            "webhook",
            NodeConfig::new()
                .with("url", "https://hooks.test")
                .with("timeout", "2s")
                .with("retries", 9),
        );
        assert!(report.is_valid());
        assert!(report.warnings[0].contains("retries"));

        let report = check(
            "webhook",
            NodeConfig::new()
                .with("url", "https://hooks.test")
                .with("timeout", 0)
                .with("retries", "many"),
        );
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn branching_node_requires_parsable_condition() {
        let report = check("condition", NodeConfig::new());
        assert_eq!(report.errors.len(), 1);

        let report = check("condition", NodeConfig::new().with("condition", "score >"));
        assert!(report.errors[0].starts_with("`condition` does not parse"));

        let report = check("condition", NodeConfig::new().with("condition", "score > 3"));
        assert!(report.is_clean());
    }

    #[test]
    fn agent_accepts_prompt_or_model() {
        assert!(!check("agent", NodeConfig::new()).is_valid());
        let prompt = NodeConfig::new().with("prompt", "Help").with("timeout", 5000);
        assert!(check("agent", prompt).is_clean());
        let model = NodeConfig::new().with("model", "gpt").with("timeout", 5000);
        assert!(check("agent", model).is_clean());
    }

    #[test]
    fn tts_requires_text_or_ssml() {
        let report = check("tts", NodeConfig::new().with("voice", "alloy"));
        assert_eq!(report.errors, vec!["one of `text`, `ssml` is required"]);
        assert!(check("tts", NodeConfig::new().with("ssml", "<speak/>")).is_valid());
    }

    #[test]
    fn messaging_requires_recipient_and_body() {
        let report = check("sms", NodeConfig::new().with("to", "+1555"));
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("message"));

        let report = check(
            "email",
            NodeConfig::new()
                .with("to", "a@b.test")
                .with("message", "Hi")
                .with("timeout", 1000),
        );
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("subject"));
    }

    #[test]
    fn loop_bound_rules() {
        let report = check("loop", NodeConfig::new().with("condition", "true"));
        assert!(report.is_valid());
        assert!(report.warnings[0].contains("maxIterations"));

        let report = check(
            "loop",
            NodeConfig::new().with("condition", "true").with("maxIterations", 0),
        );
        assert!(!report.is_valid());

        let report = check(
            "loop",
            NodeConfig::new().with("condition", "true").with("maxIterations", 3),
        );
        assert!(report.is_clean());
    }

    #[test]
    fn switch_cases_and_parallel_policy() {
        let report = check(
            "switch",
            NodeConfig::new().with("expression", "intent").with("cases", json!({})),
        );
        assert_eq!(report.errors.len(), 1);

        let report = check(
            "parallel",
            NodeConfig::new().with("joinNodeId", "j").with("policy", "yolo"),
        );
        assert!(report.errors[0].contains("fail_fast, best_effort"));
    }

    #[test]
    fn delay_duration_must_be_non_negative() {
        assert!(!check("delay", NodeConfig::new().with("duration", -5)).is_valid());
        assert!(check("delay", NodeConfig::new().with("duration", "1.5s")).is_valid());
    }

    #[test]
    fn validation_is_idempotent() {
        let n = node("api", NodeConfig::new().with("endpoint", "x").with("retries", 7));
        let registry = NodeTypeRegistry::builtin();
        assert_eq!(validate_node(&n, &registry), validate_node(&n, &registry));
    }

    fn workflow() -> Workflow {
        Workflow::new("Support")
            .node(WorkflowNode::new("start", "trigger"))
            .and_then(|w| {
                w.node(
                    WorkflowNode::new("say", "tts")
                        .with_config(NodeConfig::new().with("text", "Hi").with("timeout", 3000)),
                )
            })
            .and_then(|w| w.node(WorkflowNode::new("bye", "end")))
            .and_then(|w| w.then("start", "say"))
            .and_then(|w| w.then("say", "bye"))
            .expect("valid workflow")
    }

    #[test]
    fn valid_workflow_is_activatable() {
        let report = validate_workflow(&workflow(), &NodeTypeRegistry::builtin());
        assert!(report.is_activatable(), "{:?}", report.errors());
        assert!(report.nodes.is_empty());
    }

    #[test]
    fn node_error_blocks_activation() {
        let mut wf = workflow();
        if let Some(say) = wf.graph.get_node_mut(&"say".into()) {
            say.config = NodeConfig::new();
        }
        let report = validate_workflow(&wf, &NodeTypeRegistry::builtin());
        assert!(!report.is_activatable());
        assert_eq!(report.errors(), vec!["node say: one of `text`, `ssml` is required"]);
    }

    #[test]
    fn bad_guard_and_orphans_are_reported() {
        let wf = workflow()
            .node(WorkflowNode::new("draft", "analytics"))
            .and_then(|w| {
                w.connect(
                    "start",
                    "bye",
                    NodeConnection::new(handles::DEFAULT)
                        .with_id("c-guard")
                        .guarded("caller.vip ==="),
                )
            })
            .expect("valid workflow");
        let report = validate_workflow(&wf, &NodeTypeRegistry::builtin());
        assert!(!report.is_activatable());
        assert_eq!(report.connections.len(), 1);
        assert_eq!(report.connections[0].connection_id, "c-guard");
        assert_eq!(report.warnings, vec!["node draft is not connected to anything"]);
        // The orphan still carries its own node errors.
        assert!(!report.nodes[&NodeId::new("draft")].is_valid());
    }

    #[test]
    fn report_serializes_structure_as_messages() {
        let wf = workflow().with_error_handler("ghost");
        let report = validate_workflow(&wf, &NodeTypeRegistry::builtin());
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["structure"][0], "workflow error handler ghost does not exist");
    }
}
