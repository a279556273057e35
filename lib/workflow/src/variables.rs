//! Session variables.
//!
//! Every session owns a [`VariableStore`]. Keys are dotted paths; writing
//! `loop.ask.iterations` creates the intermediate objects. Reads never
//! fail: a missing path is [`Value::Undefined`].
//!
//! Reserved top-level keys:
//! - `trigger`: the payload of the event that started the session
//! - `call`: `{ id, workflowId, sessionId }`
//! - `error`: the last error routed to an error handler
//! - `loop`: per-loop iteration counters (`loop.<nodeId>.iterations`)
//! - `nodes`: each node's output (`nodes.<nodeId>`)
//! - `shared`: local mirror of shared-scope values read or written this session

use crate::expression::{Expression, Value, Variables, walk};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// Key prefix under which shared-scope values are mirrored.
pub const SHARED_PREFIX: &str = "shared";

/// Visibility of a variable write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Cleared when the session ends.
    #[default]
    Session,
    /// Survives across sessions; owned by an external store.
    #[serde(alias = "global")]
    Shared,
}

impl Scope {
    /// Parses a scope name as written in node configuration.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "session" | "local" => Some(Self::Session),
            "shared" | "global" => Some(Self::Shared),
            _ => None,
        }
    }
}

/// A single variable write. `value: None` removes the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableWrite {
    pub scope: Scope,
    pub key: String,
    pub value: Option<JsonValue>,
}

/// Ordered set of variable writes produced by a node.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariablePatch(Vec<VariableWrite>);

impl VariablePatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a session-scope write, builder style.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.push(Scope::Session, key, Some(value.into()));
        self
    }

    /// Adds a shared-scope write, builder style.
    #[must_use]
    pub fn set_shared(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.push(Scope::Shared, key, Some(value.into()));
        self
    }

    /// Adds a session-scope removal, builder style.
    #[must_use]
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.push(Scope::Session, key, None);
        self
    }

    /// Appends a write.
    pub fn push(&mut self, scope: Scope, key: impl Into<String>, value: Option<JsonValue>) {
        self.0.push(VariableWrite {
            scope,
            key: key.into(),
            value,
        });
    }

    /// Appends every write of another patch.
    pub fn extend(&mut self, other: VariablePatch) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableWrite> {
        self.0.iter()
    }

    /// Writes that must be forwarded to the shared variable store.
    pub fn shared(&self) -> impl Iterator<Item = &VariableWrite> {
        self.0.iter().filter(|w| w.scope == Scope::Shared)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Session-scoped key/value state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableStore {
    values: BTreeMap<String, JsonValue>,
}

impl VariableStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value at a dotted path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        if let Some(value) = self.values.get(path) {
            return Some(value);
        }
        let (head, rest) = path.split_once('.')?;
        walk(self.values.get(head)?, rest)
    }

    /// Returns the value at a dotted path, or `Undefined`.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Value {
        self.get(path).map_or(Value::Undefined, Value::from)
    }

    /// Returns true if the path resolves to a value.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Writes a value at a dotted path, creating intermediate objects.
    ///
    /// Intermediate values that are not objects are replaced.
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((head, rest)) = segments.split_first() else {
            return;
        };
        let slot = self
            .values
            .entry((*head).to_string())
            .or_insert(JsonValue::Null);
        set_in(slot, rest, value);
    }

    /// Removes the value at a dotted path.
    pub fn remove(&mut self, path: &str) -> Option<JsonValue> {
        if let Some(value) = self.values.remove(path) {
            return Some(value);
        }
        let (parent, last) = path.rsplit_once('.')?;
        let (head, rest) = match parent.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (parent, None),
        };
        let mut current = self.values.get_mut(head)?;
        if let Some(rest) = rest {
            for segment in rest.split('.') {
                current = current.as_object_mut()?.get_mut(segment)?;
            }
        }
        current.as_object_mut()?.remove(last)
    }

    /// Applies a patch.
    ///
    /// Session writes land at their key. Shared writes are mirrored under
    /// `shared.<key>` so later nodes can read them; forwarding them to the
    /// shared store is the caller's job.
    pub fn apply(&mut self, patch: &VariablePatch) {
        for write in patch.iter() {
            let key = match write.scope {
                Scope::Session => write.key.clone(),
                Scope::Shared => format!("{SHARED_PREFIX}.{}", write.key),
            };
            match &write.value {
                Some(value) => self.set(&key, value.clone()),
                None => {
                    self.remove(&key);
                }
            }
        }
    }

    /// Evaluates `{{ expression }}` placeholders in a template.
    ///
    /// Missing values render as empty strings. A placeholder that does not
    /// parse is left as written.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                return out;
            };
            let source = &after[..end];
            match Expression::parse(source) {
                Ok(expr) => out.push_str(&expr.evaluate(self).render()),
                Err(_) => out.push_str(&rest[start..start + end + 4]),
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        out
    }

    /// Renders every string inside a JSON value.
    #[must_use]
    pub fn render_json(&self, value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::String(s) => JsonValue::String(self.render(s)),
            JsonValue::Array(items) => {
                JsonValue::Array(items.iter().map(|v| self.render_json(v)).collect())
            }
            JsonValue::Object(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render_json(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Returns the whole store as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Iterates over the top-level keys and values.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.values.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Variables for VariableStore {
    fn get_path(&self, path: &str) -> Option<&JsonValue> {
        self.get(path)
    }
}

fn set_in(target: &mut JsonValue, segments: &[&str], value: JsonValue) {
    let Some((first, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    if !target.is_object() {
        *target = JsonValue::Object(Map::new());
    }
    if let JsonValue::Object(map) = target {
        let slot = map.entry((*first).to_string()).or_insert(JsonValue::Null);
        set_in(slot, rest, value);
    }
}
