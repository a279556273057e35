//! Variable manipulation, redaction, and analytics.

use crate::error::NodeError;
use crate::handler::{HandlerOutput, NodeContext, NodeHandler, NodeOutcome};
use crate::store::AnalyticsEvent;
use async_trait::async_trait;
use callflow_workflow::{Expression, Scope, VariablePatch};
use chrono::Utc;
use serde_json::{Value as JsonValue, json};

const DEFAULT_MASK: &str = "[REDACTED]";

/// Sets, removes, increments, or loads a variable.
///
/// `operation` is one of `set` (default), `remove`, `increment`, `load`.
/// `load` copies a shared-scope value into the session under `target`
/// (or the same key).
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableHandler;

impl VariableHandler {
    async fn current(
        ctx: &NodeContext<'_>,
        scope: Scope,
        key: &str,
    ) -> Result<Option<JsonValue>, NodeError> {
        match scope {
            Scope::Session => Ok(ctx.variables.get(key).cloned()),
            Scope::Shared => ctx
                .shared
                .get(key)
                .await
                .map_err(|e| NodeError::failed(format!("reading shared `{key}`: {e}"))),
        }
    }
}

#[async_trait]
impl NodeHandler for VariableHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let key = ctx.require(&["key"])?;
        let scope = match ctx.config().str("scope") {
            None => Scope::Session,
            Some(raw) => Scope::parse(raw)
                .ok_or_else(|| NodeError::invalid_config(format!("unknown scope `{raw}`")))?,
        };
        let operation = ctx.config().str("operation").unwrap_or("set");

        let mut patch = VariablePatch::new();
        let value = match operation {
            "set" => {
                let value = ctx.render_value("value").unwrap_or(JsonValue::Null);
                patch.push(scope, key.clone(), Some(value.clone()));
                value
            }
            "remove" => {
                patch.push(scope, key.clone(), None);
                JsonValue::Null
            }
            "increment" => {
                let by = ctx.config().f64("by").unwrap_or(1.0);
                let current = Self::current(ctx, scope, &key)
                    .await?
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                let sum = current + by;
                let value = if sum.fract() == 0.0 {
                    json!(sum as i64)
                } else {
                    json!(sum)
                };
                patch.push(scope, key.clone(), Some(value.clone()));
                value
            }
            "load" => {
                let value = Self::current(ctx, Scope::Shared, &key)
                    .await?
                    .unwrap_or(JsonValue::Null);
                let target = ctx.render("target").unwrap_or_else(|| key.clone());
                patch.push(Scope::Session, target, Some(value.clone()));
                value
            }
            other => {
                return Err(NodeError::invalid_config(format!(
                    "unknown variable operation `{other}`"
                )));
            }
        };

        Ok(HandlerOutput::new()
            .with_variables(patch)
            .with_output(json!({ "key": key, "scope": scope, "value": value }))
            .into())
    }
}

/// Evaluates `expression` and stores the result in `target`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransformHandler;

#[async_trait]
impl NodeHandler for TransformHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let source = ctx
            .config()
            .str("expression")
            .ok_or_else(|| NodeError::invalid_config("`expression` is not set"))?;
        let target = ctx.require(&["target"])?;
        let value = Expression::parse(source)
            .map_err(|e| NodeError::invalid_config(format!("`expression` does not parse: {e}")))?
            .evaluate(ctx.variables)
            .into_json();
        Ok(HandlerOutput::new()
            .set(target, value.clone())
            .with_output(value)
            .into())
    }
}

/// Masks variables so they never reach later outputs or the audit trail.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedactHandler;

#[async_trait]
impl NodeHandler for RedactHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let fields = ctx
            .config()
            .array("fields")
            .ok_or_else(|| NodeError::invalid_config("`fields` must be an array"))?;
        let mask = ctx.config().str("mask").unwrap_or(DEFAULT_MASK);

        let mut patch = VariablePatch::new();
        let mut redacted = Vec::new();
        for path in fields.iter().filter_map(JsonValue::as_str) {
            if ctx.variables.contains(path) {
                patch.push(Scope::Session, path, Some(JsonValue::from(mask)));
                redacted.push(path);
            }
        }
        Ok(HandlerOutput::new()
            .with_output(json!({ "redacted": redacted }))
            .with_variables(patch)
            .into())
    }
}

/// Records an analytics event with the audit collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyticsHandler;

#[async_trait]
impl NodeHandler for AnalyticsHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let event = AnalyticsEvent {
            session_id: ctx.meta.session_id,
            workflow_id: ctx.meta.workflow_id,
            event: ctx.require(&["event"])?,
            properties: ctx
                .render_value("properties")
                .unwrap_or_else(|| json!({})),
            recorded_at: Utc::now(),
        };
        ctx.audit.track(&event).await;
        Ok(HandlerOutput::new()
            .with_output(json!({ "event": event.event, "properties": event.properties }))
            .into())
    }
}
