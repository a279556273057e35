//! Entry, exit, and pass-through nodes.

use crate::error::NodeError;
use crate::handler::{HandlerOutput, NodeContext, NodeHandler, NodeOutcome};
use async_trait::async_trait;
use serde_json::json;

/// Starts the flow. Exposes the trigger payload as its output.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerHandler;

#[async_trait]
impl NodeHandler for TriggerHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let mut output = HandlerOutput::new();
        if let Some(payload) = ctx.variables.get("trigger") {
            output = output.with_output(payload.clone());
        }
        Ok(output.into())
    }
}

/// Synchronization point for parallel branches.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinHandler;

#[async_trait]
impl NodeHandler for JoinHandler {
    async fn execute(&self, _ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        Ok(HandlerOutput::new().into())
    }
}

/// Receives routed errors. The descriptor is already in the `error` variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorHandlerHandler;

#[async_trait]
impl NodeHandler for ErrorHandlerHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let mut output = HandlerOutput::new();
        if let Some(error) = ctx.variables.get("error") {
            output = output.with_output(error.clone());
        }
        Ok(output.into())
    }
}

/// Completes the session.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndHandler;

#[async_trait]
impl NodeHandler for EndHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let mut output = HandlerOutput::new().terminate();
        if let Some(reason) = ctx.render("reason") {
            output = output.with_output(json!({ "reason": reason }));
        }
        Ok(output.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandleSelection;
    use crate::handlers::testing::Harness;
    use callflow_workflow::NodeConfig;

    #[tokio::test]
    async fn trigger_outputs_payload() {
        let harness = Harness::new().var("trigger", json!({"from": "+15550100"}));
        let output = harness
            .complete(&TriggerHandler, "trigger", NodeConfig::new())
            .await;
        assert_eq!(output.output, Some(json!({"from": "+15550100"})));
        assert_eq!(output.handle, HandleSelection::Default);
    }

    #[tokio::test]
    async fn end_terminates() {
        let harness = Harness::new().var("outcome", json!("resolved"));
        let output = harness
            .complete(
                &EndHandler,
                "end",
                NodeConfig::new().with("reason", "{{ outcome }}"),
            )
            .await;
        assert_eq!(output.handle, HandleSelection::Terminate);
        assert_eq!(output.output, Some(json!({"reason": "resolved"})));
    }
}
