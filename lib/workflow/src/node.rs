//! Workflow nodes and their configuration.
//!
//! A node is one typed step of a call flow. Each node has:
//! - An identifier authored by the flow editor, unique within the workflow
//! - A type identifier that must resolve in the
//!   [`NodeTypeRegistry`](crate::registry::NodeTypeRegistry)
//! - An open configuration map, interpreted per node type
//! - A canvas position, kept only so the editor can round-trip the layout

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use ulid::Ulid;

/// Identifier of a node within a workflow.
///
/// Node IDs come from the flow editor and are free-form strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID from an editor-provided identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, globally unique node ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("node_{}", Ulid::new()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Position of a node on the editor canvas. Irrelevant to execution.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Open key/value configuration of a node.
///
/// Keys are interpreted per node type. The typed getters treat `null`,
/// blank strings, and empty arrays/objects as absent so that half-filled
/// editor forms validate the same way as missing keys.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeConfig(Map<String, JsonValue>);

impl NodeConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Adds a key, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Sets a key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the raw value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Returns true if the key holds a meaningful value.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        match self.0.get(key) {
            None | Some(JsonValue::Null) => false,
            Some(JsonValue::String(s)) => !s.trim().is_empty(),
            Some(JsonValue::Array(items)) => !items.is_empty(),
            Some(JsonValue::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }

    /// Returns a non-blank string value.
    #[must_use]
    pub fn str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(JsonValue::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Returns a numeric value, accepting numeric strings.
    #[must_use]
    pub fn f64(&self, key: &str) -> Option<f64> {
        match self.0.get(key)? {
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns a non-negative integer value, accepting numeric strings.
    #[must_use]
    pub fn u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            JsonValue::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns a boolean value.
    #[must_use]
    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            JsonValue::Bool(b) => Some(*b),
            JsonValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Returns an array value.
    #[must_use]
    pub fn array(&self, key: &str) -> Option<&Vec<JsonValue>> {
        self.0.get(key).and_then(JsonValue::as_array)
    }

    /// Returns a duration.
    ///
    /// Bare numbers are milliseconds. Strings may carry an `ms`, `s`, or `m`
    /// suffix (`"2000ms"`, `"2s"`, `"1m"`).
    #[must_use]
    pub fn duration(&self, key: &str) -> Option<Duration> {
        match self.0.get(key)? {
            JsonValue::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .map(Duration::from_millis),
            JsonValue::String(s) => parse_duration(s),
            _ => None,
        }
    }

    /// Iterates over all keys and values.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    /// Returns true if no keys are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One case of a `switch` node.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// Value compared against the discriminant.
    pub value: JsonValue,
    /// Output handle selected when the case matches.
    pub handle: String,
}

impl NodeConfig {
    /// Returns the cases of a `switch` node, in declaration order.
    ///
    /// A case is either a bare scalar, whose string form is also its handle,
    /// or an object `{ "value": .., "handle": ".." }` where `handle` is optional.
    #[must_use]
    pub fn switch_cases(&self) -> Vec<SwitchCase> {
        let Some(cases) = self.array("cases") else {
            return Vec::new();
        };
        cases
            .iter()
            .filter_map(|case| match case {
                JsonValue::Object(map) => {
                    let value = map.get("value")?.clone();
                    let handle = map
                        .get("handle")
                        .and_then(JsonValue::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| handle_for(&value));
                    Some(SwitchCase { value, handle })
                }
                JsonValue::Null | JsonValue::Array(_) => None,
                scalar => Some(SwitchCase {
                    value: scalar.clone(),
                    handle: handle_for(scalar),
                }),
            })
            .collect()
    }
}

fn handle_for(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl From<Map<String, JsonValue>> for NodeConfig {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (digits, scale): (&str, u32) = if let Some(ms) = raw.strip_suffix("ms") {
        (ms, 1)
    } else if let Some(s) = raw.strip_suffix('s') {
        (s, 1_000)
    } else if let Some(m) = raw.strip_suffix('m') {
        (m, 60_000)
    } else {
        (raw, 1)
    };
    let value: f64 = digits.trim().parse().ok()?;
    if value < 0.0 || !value.is_finite() {
        return None;
    }
    Some(Duration::from_millis((value * f64::from(scale)) as u64))
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// Identifier, unique within the workflow.
    pub id: NodeId,
    /// Node type identifier (e.g. `tts`, `condition`).
    #[serde(rename = "type")]
    pub node_type: String,
    /// Type-specific configuration.
    #[serde(default)]
    pub config: NodeConfig,
    /// Editor canvas position.
    #[serde(default)]
    pub position: Position,
}

impl WorkflowNode {
    /// Creates a node with an empty configuration.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: NodeConfig::new(),
            position: Position::default(),
        }
    }

    /// Replaces the configuration, builder style.
    #[must_use]
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the canvas position, builder style.
    #[must_use]
    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Position::new(x, y);
        self
    }

    /// Human-readable label, falling back to the node ID.
    #[must_use]
    pub fn label(&self) -> &str {
        self.config.str("label").unwrap_or(self.id.as_str())
    }

    /// Returns true if this node has the given type.
    #[must_use]
    pub fn is(&self, node_type: &str) -> bool {
        self.node_type == node_type
    }
}
