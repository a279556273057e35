//! Trigger events that start sessions.
//!
//! The call-ingestion service turns an inbound call into a [`TriggerEvent`].
//! Its payload becomes the `trigger` variable of the new session.

use crate::node::NodeId;
use callflow_core::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Identifier of a call, assigned by the telephony provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An inbound event that instantiates a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    /// Workflow to run. Accepts `wf_`-prefixed or bare ULIDs.
    pub workflow_id: WorkflowId,
    /// The call this session serves.
    pub call_id: CallId,
    /// Provider data about the call (caller number, DNIS, language, ...).
    #[serde(default, alias = "payload")]
    pub trigger_payload: JsonValue,
    /// Trigger node to start from when the workflow has several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_node_id: Option<NodeId>,
    /// When the event was received.
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl TriggerEvent {
    /// Creates a trigger event with an empty payload.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, call_id: impl Into<String>) -> Self {
        Self {
            workflow_id,
            call_id: CallId::new(call_id),
            trigger_payload: JsonValue::Object(serde_json::Map::new()),
            trigger_node_id: None,
            received_at: Utc::now(),
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.trigger_payload = payload;
        self
    }

    /// Selects the trigger node to start from.
    #[must_use]
    pub fn at_trigger(mut self, node_id: impl Into<NodeId>) -> Self {
        self.trigger_node_id = Some(node_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_editor_payload() {
        let workflow_id = WorkflowId::new();
        let event: TriggerEvent = serde_json::from_value(json!({
            "workflowId": workflow_id.to_string(),
            "callId": "CA123",
            "triggerPayload": {"from": "+15550100", "language": "es"}
        }))
        .expect("parse");
        assert_eq!(event.workflow_id, workflow_id);
        assert_eq!(event.call_id.as_str(), "CA123");
        assert_eq!(event.trigger_payload["language"], "es");
        assert!(event.trigger_node_id.is_none());
    }

    #[test]
    fn accepts_bare_ulid_and_payload_alias() {
        let workflow_id = WorkflowId::new();
        let event: TriggerEvent = serde_json::from_value(json!({
            "workflowId": workflow_id.ulid().to_string(),
            "callId": "CA9",
            "payload": {"from": "+1"}
        }))
        .expect("parse");
        assert_eq!(event.workflow_id, workflow_id);
        assert_eq!(event.trigger_payload["from"], "+1");
    }

    #[test]
    fn rejects_invalid_workflow_id() {
        let result: Result<TriggerEvent, _> = serde_json::from_value(json!({
            "workflowId": "nope",
            "callId": "CA1"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn serializes_prefixed_id() {
        let event = TriggerEvent::new(WorkflowId::new(), "CA1").at_trigger("main");
        let json = serde_json::to_value(&event).expect("serialize");
        assert!(json["workflowId"].as_str().unwrap().starts_with("wf_"));
        assert_eq!(json["triggerNodeId"], "main");
    }
}
