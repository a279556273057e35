//! Workflow graph implementation using petgraph.
//!
//! Call flows are directed graphs where:
//! - Nodes are typed call-flow steps
//! - Edges connect a named output handle of one node to another node
//!
//! Cycles are allowed; `loop` nodes are built from them. Outgoing
//! connections are always returned in the order they were added, which is
//! the order guard conditions are evaluated in.

use crate::edge::{NodeConnection, handles};
use crate::error::GraphError;
use crate::node::{NodeId, WorkflowNode};
use crate::registry::NodeTypeRegistry;
use petgraph::Direction;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use std::collections::{HashMap, HashSet};

/// A call-flow graph using petgraph's directed graph.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    graph: DiGraph<WorkflowNode, NodeConnection>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
}

/// A connection together with its endpoints.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionRef<'a> {
    pub source: &'a WorkflowNode,
    pub target: &'a WorkflowNode,
    pub connection: &'a NodeConnection,
}

impl WorkflowGraph {
    /// Creates a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node to the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a node with the same ID already exists.
    pub fn add_node(&mut self, node: WorkflowNode) -> Result<NodeId, GraphError> {
        if self.node_index_map.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode { node_id: node.id });
        }
        let node_id = node.id.clone();
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id.clone(), index);
        Ok(node_id)
    }

    /// Removes a node and every connection touching it.
    pub fn remove_node(&mut self, node_id: &NodeId) -> Option<WorkflowNode> {
        let index = self.node_index_map.remove(node_id)?;
        let removed = self.graph.remove_node(index);
        // petgraph moves the last node into the freed slot.
        self.rebuild_index_map();
        removed
    }

    /// Returns a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: &NodeId) -> Option<&WorkflowNode> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns a mutable reference to a node by its ID.
    pub fn get_node_mut(&mut self, node_id: &NodeId) -> Option<&mut WorkflowNode> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight_mut(*index)
    }

    /// Returns true if the graph has a node with this ID.
    #[must_use]
    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.node_index_map.contains_key(node_id)
    }

    /// Adds a connection between two nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the source or target node doesn't exist.
    pub fn connect(
        &mut self,
        source_id: &NodeId,
        target_id: &NodeId,
        connection: NodeConnection,
    ) -> Result<(), GraphError> {
        let source = self.index_of(source_id)?;
        let target = self.index_of(target_id)?;
        self.graph.add_edge(source, target, connection);
        Ok(())
    }

    fn index_of(&self, node_id: &NodeId) -> Result<NodeIndex, GraphError> {
        self.node_index_map
            .get(node_id)
            .copied()
            .ok_or_else(|| GraphError::NodeNotFound {
                node_id: node_id.clone(),
            })
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.graph.node_weights()
    }

    /// Returns all connections in insertion order.
    pub fn connections(&self) -> impl Iterator<Item = ConnectionRef<'_>> {
        self.graph.edge_references().filter_map(|edge| {
            Some(ConnectionRef {
                source: self.graph.node_weight(edge.source())?,
                target: self.graph.node_weight(edge.target())?,
                connection: edge.weight(),
            })
        })
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of connections in the graph.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the outgoing connections of a node, in insertion order.
    #[must_use]
    pub fn outgoing(&self, node_id: &NodeId) -> Vec<ConnectionRef<'_>> {
        self.adjacent(node_id, Direction::Outgoing)
    }

    /// Returns the incoming connections of a node, in insertion order.
    #[must_use]
    pub fn incoming(&self, node_id: &NodeId) -> Vec<ConnectionRef<'_>> {
        self.adjacent(node_id, Direction::Incoming)
    }

    fn adjacent(&self, node_id: &NodeId, direction: Direction) -> Vec<ConnectionRef<'_>> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };
        // petgraph walks adjacency lists newest first.
        let mut edges: Vec<EdgeIndex> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| edge.id())
            .collect();
        edges.sort_unstable();
        edges
            .into_iter()
            .filter_map(|edge| {
                let (source, target) = self.graph.edge_endpoints(edge)?;
                Some(ConnectionRef {
                    source: self.graph.node_weight(source)?,
                    target: self.graph.node_weight(target)?,
                    connection: self.graph.edge_weight(edge)?,
                })
            })
            .collect()
    }

    /// Returns the outgoing connections leaving a specific handle.
    #[must_use]
    pub fn outgoing_on(&self, node_id: &NodeId, handle: &str) -> Vec<ConnectionRef<'_>> {
        self.outgoing(node_id)
            .into_iter()
            .filter(|c| c.connection.leaves(handle))
            .collect()
    }

    /// Returns the trigger nodes (entry points).
    #[must_use]
    pub fn triggers(&self, registry: &NodeTypeRegistry) -> Vec<&WorkflowNode> {
        self.nodes()
            .filter(|node| registry.canonical(&node.node_type) == "trigger")
            .collect()
    }

    /// Returns the nodes reachable from any trigger, triggers included.
    #[must_use]
    pub fn reachable(&self, registry: &NodeTypeRegistry) -> HashSet<NodeId> {
        self.triggers(registry)
            .iter()
            .flat_map(|trigger| self.reachable_from(&trigger.id))
            .collect()
    }

    /// Returns the IDs of every node reachable from `start`, itself included.
    #[must_use]
    pub fn reachable_from(&self, start: &NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let Some(&index) = self.node_index_map.get(start) else {
            return seen;
        };
        let mut bfs = Bfs::new(&self.graph, index);
        while let Some(index) = bfs.next(&self.graph) {
            if let Some(node) = self.graph.node_weight(index) {
                seen.insert(node.id.clone());
            }
        }
        seen
    }

    /// Returns nodes with no connections at all.
    ///
    /// Orphans are exempt from the reachability invariant; editors leave
    /// them on the canvas while a flow is being built.
    #[must_use]
    pub fn orphans(&self) -> Vec<&WorkflowNode> {
        self.graph
            .node_indices()
            .filter(|&index| {
                self.graph
                    .edges_directed(index, Direction::Outgoing)
                    .next()
                    .is_none()
                    && self
                        .graph
                        .edges_directed(index, Direction::Incoming)
                        .next()
                        .is_none()
            })
            .filter_map(|index| self.graph.node_weight(index))
            .collect()
    }

    /// Checks the structural invariants, returning every violation found.
    ///
    /// Checks:
    /// - At least one trigger exists
    /// - Every connected non-trigger node is reachable from a trigger
    /// - `end` nodes have no outgoing connections
    /// - `condition` nodes have exactly one `default` connection
    /// - `switch` nodes cover all cases or have exactly one `default` connection
    /// - `parallel` nodes name an existing `join` node in `joinNodeId`
    #[must_use]
    pub fn check_structure(&self, registry: &NodeTypeRegistry) -> Vec<GraphError> {
        let mut violations = Vec::new();

        if self.triggers(registry).is_empty() {
            violations.push(GraphError::NoTrigger);
        }

        let reachable = self.reachable(registry);
        let orphans: HashSet<&NodeId> = self.orphans().into_iter().map(|n| &n.id).collect();

        for node in self.nodes() {
            let node_type = registry.canonical(&node.node_type);
            if node_type != "trigger"
                && !orphans.contains(&node.id)
                && !reachable.contains(&node.id)
            {
                violations.push(GraphError::Unreachable {
                    node_id: node.id.clone(),
                });
            }

            let outgoing = self.outgoing(&node.id);
            let defaults = outgoing
                .iter()
                .filter(|c| c.connection.leaves(handles::DEFAULT))
                .count();

            match node_type {
                "end" if !outgoing.is_empty() => {
                    violations.push(GraphError::EndHasOutgoing {
                        node_id: node.id.clone(),
                    });
                }
                "condition" if defaults != 1 => {
                    violations.push(GraphError::ConditionDefault {
                        node_id: node.id.clone(),
                        defaults,
                    });
                }
                "switch" => {
                    let missing: Vec<String> = node
                        .config
                        .switch_cases()
                        .into_iter()
                        .map(|case| case.handle)
                        .filter(|handle| !outgoing.iter().any(|c| c.connection.leaves(handle)))
                        .collect();
                    let covered = defaults == 1 || (missing.is_empty() && defaults == 0);
                    if !covered {
                        violations.push(GraphError::SwitchUncovered {
                            node_id: node.id.clone(),
                            missing,
                            defaults,
                        });
                    }
                }
                "parallel" => {
                    let join = node.config.str("joinNodeId");
                    let valid = join
                        .and_then(|id| self.get_node(&NodeId::new(id)))
                        .is_some_and(|target| registry.canonical(&target.node_type) == "join");
                    if !valid {
                        violations.push(GraphError::InvalidJoin {
                            node_id: node.id.clone(),
                            join_node_id: join.map(str::to_string),
                        });
                    }
                }
                _ => {}
            }
        }

        violations
    }

    fn rebuild_index_map(&mut self) {
        self.node_index_map.clear();
        for index in self.graph.node_indices() {
            if let Some(node) = self.graph.node_weight(index) {
                self.node_index_map.insert(node.id.clone(), index);
            }
        }
    }
}

/// Graphs are equal when they hold the same nodes and the same connections,
/// regardless of insertion order.
impl PartialEq for WorkflowGraph {
    fn eq(&self, other: &Self) -> bool {
        if self.node_count() != other.node_count()
            || self.connection_count() != other.connection_count()
        {
            return false;
        }
        let nodes_match = self
            .nodes()
            .all(|node| other.get_node(&node.id) == Some(node));
        nodes_match && sorted_connections(self) == sorted_connections(other)
    }
}

fn sorted_connections(graph: &WorkflowGraph) -> Vec<(&NodeId, &NodeId, &NodeConnection)> {
    let mut connections: Vec<_> = graph
        .connections()
        .map(|c| (&c.source.id, &c.target.id, c.connection))
        .collect();
    connections.sort_by(|a, b| {
        (&a.2.id, a.0, a.1, &a.2.source_handle).cmp(&(&b.2.id, b.0, b.1, &b.2.source_handle))
    });
    connections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeConfig;
    use serde_json::json;

    fn linear() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        graph.add_node(WorkflowNode::new("start", "trigger")).unwrap();
        graph
            .add_node(
                WorkflowNode::new("greet", "tts")
                    .with_config(NodeConfig::new().with("text", "Hello")),
            )
            .unwrap();
        graph.add_node(WorkflowNode::new("bye", "end")).unwrap();
        graph
            .connect(&"start".into(), &"greet".into(), NodeConnection::default_handle())
            .unwrap();
        graph
            .connect(&"greet".into(), &"bye".into(), NodeConnection::default_handle())
            .unwrap();
        graph
    }

    #[test]
    fn add_and_get_node() {
        let graph = linear();
        let greet = graph.get_node(&"greet".into()).expect("greet exists");
        assert_eq!(greet.node_type, "tts");
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.connection_count(), 2);
    }

    #[test]
    fn duplicate_node_is_rejected() {
        let mut graph = linear();
        let err = graph.add_node(WorkflowNode::new("greet", "sms")).unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateNode {
                node_id: "greet".into()
            }
        );
    }

    #[test]
    fn connect_rejects_missing_node() {
        let mut graph = linear();
        let result = graph.connect(&"greet".into(), &"ghost".into(), NodeConnection::default());
        assert!(matches!(result, Err(GraphError::NodeNotFound { .. })));
    }

    #[test]
    fn outgoing_preserves_insertion_order() {
        let mut graph = linear();
        graph.add_node(WorkflowNode::new("a", "end")).unwrap();
        graph.add_node(WorkflowNode::new("b", "end")).unwrap();
        let src: NodeId = "start".into();
        graph
            .connect(&src, &"a".into(), NodeConnection::default().with_id("c-a"))
            .unwrap();
        graph
            .connect(&src, &"b".into(), NodeConnection::default().with_id("c-b"))
            .unwrap();

        let targets: Vec<_> = graph
            .outgoing(&src)
            .iter()
            .map(|c| c.target.id.as_str().to_string())
            .collect();
        assert_eq!(targets, vec!["greet", "a", "b"]);
    }

    #[test]
    fn remove_node_keeps_lookup_consistent() {
        let mut graph = linear();
        let removed = graph.remove_node(&"start".into()).expect("removed");
        assert_eq!(removed.id.as_str(), "start");
        assert!(graph.get_node(&"start".into()).is_none());
        assert_eq!(graph.get_node(&"bye".into()).map(|n| n.node_type.as_str()), Some("end"));
        assert_eq!(graph.connection_count(), 1);
    }

    #[test]
    fn linear_flow_is_structurally_valid() {
        let registry = NodeTypeRegistry::builtin();
        assert!(linear().check_structure(&registry).is_empty());
    }

    #[test]
    fn missing_trigger_and_unreachable_nodes_are_reported() {
        let registry = NodeTypeRegistry::builtin();
        let mut graph = linear();
        graph.remove_node(&"start".into());
        let violations = graph.check_structure(&registry);
        assert!(violations.contains(&GraphError::NoTrigger));
        assert!(violations.contains(&GraphError::Unreachable {
            node_id: "greet".into()
        }));
    }

    #[test]
    fn orphans_are_exempt_from_reachability() {
        let registry = NodeTypeRegistry::builtin();
        let mut graph = linear();
        graph.add_node(WorkflowNode::new("draft", "sms")).unwrap();
        assert!(graph.check_structure(&registry).is_empty());
        let orphans: Vec<_> = graph.orphans().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(orphans, vec!["draft"]);
    }

    #[test]
    fn aliased_trigger_counts_as_entry() {
        let registry = NodeTypeRegistry::builtin();
        let mut graph = WorkflowGraph::new();
        graph.add_node(WorkflowNode::new("in", "phone_call")).unwrap();
        graph.add_node(WorkflowNode::new("out", "end")).unwrap();
        graph
            .connect(&"in".into(), &"out".into(), NodeConnection::default())
            .unwrap();
        assert!(graph.check_structure(&registry).is_empty());
    }

    #[test]
    fn end_with_outgoing_is_reported() {
        let registry = NodeTypeRegistry::builtin();
        let mut graph = linear();
        graph
            .connect(&"bye".into(), &"greet".into(), NodeConnection::default())
            .unwrap();
        assert_eq!(
            graph.check_structure(&registry),
            vec![GraphError::EndHasOutgoing {
                node_id: "bye".into()
            }]
        );
    }

    #[test]
    fn condition_requires_single_default() {
        let registry = NodeTypeRegistry::builtin();
        let mut graph = linear();
        graph
            .add_node(
                WorkflowNode::new("check", "condition")
                    .with_config(NodeConfig::new().with("condition", "x > 1")),
            )
            .unwrap();
        graph
            .connect(&"start".into(), &"check".into(), NodeConnection::default())
            .unwrap();
        graph
            .connect(&"check".into(), &"bye".into(), NodeConnection::new(handles::TRUE))
            .unwrap();
        assert_eq!(
            graph.check_structure(&registry),
            vec![GraphError::ConditionDefault {
                node_id: "check".into(),
                defaults: 0
            }]
        );

        graph
            .connect(&"check".into(), &"greet".into(), NodeConnection::default())
            .unwrap();
        assert!(graph.check_structure(&registry).is_empty());
    }

    fn with_switch(cases: serde_json::Value) -> WorkflowGraph {
        let mut graph = linear();
        graph
            .add_node(
                WorkflowNode::new("route", "switch").with_config(
                    NodeConfig::new()
                        .with("expression", "intent")
                        .with("cases", cases),
                ),
            )
            .unwrap();
        graph
            .connect(&"start".into(), &"route".into(), NodeConnection::default())
            .unwrap();
        graph
    }

    #[test]
    fn switch_covering_every_case_needs_no_default() {
        let registry = NodeTypeRegistry::builtin();
        let mut graph = with_switch(json!(["billing", "sales"]));
        graph
            .connect(&"route".into(), &"greet".into(), NodeConnection::new("billing"))
            .unwrap();
        graph
            .connect(&"route".into(), &"bye".into(), NodeConnection::new("sales"))
            .unwrap();
        assert!(graph.check_structure(&registry).is_empty());
    }

    #[test]
    fn switch_with_gaps_needs_default() {
        let registry = NodeTypeRegistry::builtin();
        let mut graph = with_switch(json!(["billing", "sales"]));
        graph
            .connect(&"route".into(), &"greet".into(), NodeConnection::new("billing"))
            .unwrap();
        assert_eq!(
            graph.check_structure(&registry),
            vec![GraphError::SwitchUncovered {
                node_id: "route".into(),
                missing: vec!["sales".to_string()],
                defaults: 0
            }]
        );

        graph
            .connect(&"route".into(), &"bye".into(), NodeConnection::default())
            .unwrap();
        assert!(graph.check_structure(&registry).is_empty());
    }

    #[test]
    fn parallel_must_join_at_join_node() {
        let registry = NodeTypeRegistry::builtin();
        let mut graph = linear();
        graph
            .add_node(
                WorkflowNode::new("fork", "parallel")
                    .with_config(NodeConfig::new().with("joinNodeId", "greet")),
            )
            .unwrap();
        graph
            .connect(&"start".into(), &"fork".into(), NodeConnection::default())
            .unwrap();
        graph
            .connect(&"fork".into(), &"greet".into(), NodeConnection::default())
            .unwrap();
        assert_eq!(
            graph.check_structure(&registry),
            vec![GraphError::InvalidJoin {
                node_id: "fork".into(),
                join_node_id: Some("greet".to_string())
            }]
        );
    }

    #[test]
    fn cycles_are_allowed() {
        let registry = NodeTypeRegistry::builtin();
        let mut graph = linear();
        graph
            .add_node(
                WorkflowNode::new("again", "loop")
                    .with_config(NodeConfig::new().with("condition", "true")),
            )
            .unwrap();
        graph
            .connect(&"start".into(), &"again".into(), NodeConnection::default())
            .unwrap();
        graph
            .connect(&"again".into(), &"greet".into(), NodeConnection::new(handles::BODY))
            .unwrap();
        graph
            .connect(&"greet".into(), &"again".into(), NodeConnection::default())
            .unwrap();
        assert!(graph.check_structure(&registry).is_empty());
    }
}
