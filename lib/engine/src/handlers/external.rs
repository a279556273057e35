//! Calls to third-party systems: REST, webhooks, SOAP, GraphQL.

use crate::error::NodeError;
use crate::handler::{HandlerOutput, NodeContext, NodeHandler, NodeOutcome};
use crate::providers::{ExternalRequest, ExternalRequester, RequestKind, require};
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Executes an external request of one protocol.
///
/// A non-2xx response is a handler error. The response body is written to
/// `outputVariable` (default `response`).
#[derive(Clone)]
pub struct ExternalCallHandler {
    kind: RequestKind,
    external: Option<Arc<dyn ExternalRequester>>,
}

impl ExternalCallHandler {
    #[must_use]
    pub fn new(kind: RequestKind, external: Option<Arc<dyn ExternalRequester>>) -> Self {
        Self { kind, external }
    }

    fn build(&self, ctx: &NodeContext<'_>) -> Result<ExternalRequest, NodeError> {
        let url = match self.kind {
            RequestKind::Webhook => ctx.require(&["url", "endpoint"])?,
            _ => ctx.require(&["endpoint", "url"])?,
        };
        let mut headers: BTreeMap<String, String> = ctx
            .render_value("headers")
            .and_then(|h| h.as_object().cloned())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(k, v)| match v {
                JsonValue::String(s) => Some((k, s)),
                JsonValue::Null => None,
                other => Some((k, other.to_string())),
            })
            .collect();

        let (method, body) = match self.kind {
            RequestKind::Rest => (
                ctx.render("method")
                    .unwrap_or_else(|| "GET".to_string())
                    .to_ascii_uppercase(),
                ctx.render_value("body"),
            ),
            RequestKind::Webhook => {
                let body = ctx.render_value("body").unwrap_or_else(|| {
                    json!({
                        "session": ctx.meta,
                        "nodeId": ctx.node_id(),
                        "variables": ctx.variables.to_json(),
                    })
                });
                ("POST".to_string(), Some(body))
            }
            RequestKind::Soap => {
                let action = ctx.require(&["action"])?;
                headers.insert("SOAPAction".to_string(), action.clone());
                let body = json!({
                    "action": action,
                    "payload": ctx.render_value("payload").unwrap_or(JsonValue::Null),
                });
                ("POST".to_string(), Some(body))
            }
            RequestKind::Graphql => {
                let body = json!({
                    "query": ctx.require(&["query"])?,
                    "variables": ctx.render_value("variables").unwrap_or_else(|| json!({})),
                });
                ("POST".to_string(), Some(body))
            }
        };

        Ok(ExternalRequest {
            kind: self.kind,
            method,
            url,
            headers,
            body,
        })
    }
}

#[async_trait]
impl NodeHandler for ExternalCallHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let external = require(self.external.as_ref(), "external request")?;
        let request = self.build(ctx)?;
        let url = request.url.clone();
        let response = external.request(request).await?;
        if !response.is_success() {
            return Err(NodeError::failed(format!(
                "{url} answered HTTP {}",
                response.status
            )));
        }
        // GraphQL reports failures in the body with a 200.
        if self.kind == RequestKind::Graphql {
            if let Some(errors) = response.body.get("errors").filter(|e| !e.is_null()) {
                return Err(NodeError::failed(format!("{url} returned errors: {errors}")));
            }
        }
        Ok(HandlerOutput::new()
            .set(ctx.output_variable("response"), response.body.clone())
            .with_output(json!({ "status": response.status, "body": response.body }))
            .into())
    }
}
