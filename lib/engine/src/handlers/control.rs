//! Call control: digit collection, delays, transfers, caller verification.

use super::encode;
use crate::error::NodeError;
use crate::handler::{HandlerOutput, NodeContext, NodeHandler, NodeOutcome};
use crate::providers::{CallControl, DigitCollection, VerificationRequest, require};
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

/// Waits for `duration` (milliseconds, or a string like `2s`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DelayHandler;

#[async_trait]
impl NodeHandler for DelayHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let duration = ctx
            .config()
            .duration("duration")
            .ok_or_else(|| NodeError::invalid_config("`duration` is not a valid duration"))?;
        tokio::time::sleep(duration).await;
        let waited = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Ok(HandlerOutput::new()
            .with_output(json!({ "waitedMs": waited }))
            .into())
    }
}

/// Starts keypad collection and suspends until the digits arrive.
///
/// The telephony side resumes the session with the digits in `variable`.
#[derive(Clone)]
pub struct DtmfHandler {
    call_control: Option<Arc<dyn CallControl>>,
}

impl DtmfHandler {
    #[must_use]
    pub fn new(call_control: Option<Arc<dyn CallControl>>) -> Self {
        Self { call_control }
    }
}

#[async_trait]
impl NodeHandler for DtmfHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let call_control = require(self.call_control.as_ref(), "call control")?;
        let resume_token = ctx.resume_token();
        call_control
            .collect_digits(DigitCollection {
                call_id: ctx.meta.call_id.clone(),
                resume_token: resume_token.clone(),
                variable: ctx.require(&["variable"])?,
                prompt: ctx.render("prompt"),
                max_digits: ctx.config().u64("maxDigits"),
                finish_on_key: ctx.render("finishOnKey"),
            })
            .await?;
        Ok(NodeOutcome::Suspend { resume_token })
    }
}

/// Transfers the call to `destination`.
#[derive(Clone)]
pub struct TransferHandler {
    call_control: Option<Arc<dyn CallControl>>,
}

impl TransferHandler {
    #[must_use]
    pub fn new(call_control: Option<Arc<dyn CallControl>>) -> Self {
        Self { call_control }
    }
}

#[async_trait]
impl NodeHandler for TransferHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let call_control = require(self.call_control.as_ref(), "call control")?;
        let destination = ctx.require(&["destination"])?;
        call_control
            .transfer(&ctx.meta.call_id, &destination)
            .await?;
        Ok(HandlerOutput::new()
            .with_output(json!({ "destination": destination }))
            .into())
    }
}

/// Verifies the caller and writes the verdict to `verification`.
///
/// A failed verification is not an error; workflows branch on
/// `verification.verified`.
#[derive(Clone)]
pub struct VerifyCallerHandler {
    call_control: Option<Arc<dyn CallControl>>,
}

impl VerifyCallerHandler {
    #[must_use]
    pub fn new(call_control: Option<Arc<dyn CallControl>>) -> Self {
        Self { call_control }
    }
}

#[async_trait]
impl NodeHandler for VerifyCallerHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let call_control = require(self.call_control.as_ref(), "call control")?;
        let verification = call_control
            .verify_caller(VerificationRequest {
                call_id: ctx.meta.call_id.clone(),
                method: ctx.require(&["method"])?,
                data: ctx.render_value("data").unwrap_or(JsonValue::Null),
            })
            .await?;
        let encoded = encode(&verification)?;
        Ok(HandlerOutput::new()
            .set(ctx.output_variable("verification"), encoded.clone())
            .with_output(encoded)
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::handlers::testing::Harness;
    use crate::providers::Verification;
    use callflow_workflow::{CallId, NodeConfig, VariableStore};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Switchboard {
        transfers: Mutex<Vec<String>>,
        collections: Mutex<Vec<DigitCollection>>,
    }

    #[async_trait]
    impl CallControl for Switchboard {
        async fn transfer(
            &self,
            _call_id: &CallId,
            destination: &str,
        ) -> Result<(), ProviderError> {
            self.transfers.lock().unwrap().push(destination.to_string());
            Ok(())
        }

        async fn verify_caller(
            &self,
            request: VerificationRequest,
        ) -> Result<Verification, ProviderError> {
            Ok(Verification {
                verified: request.data["pin"] == "4321",
                confidence: Some(0.9),
            })
        }

        async fn collect_digits(&self, request: DigitCollection) -> Result<(), ProviderError> {
            self.collections.lock().unwrap().push(request);
            Ok(())
        }

        async fn hangup(&self, _call_id: &CallId) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delay_sleeps_for_the_configured_duration() {
        let started = tokio::time::Instant::now();
        let output = Harness::new()
            .complete(&DelayHandler, "delay", NodeConfig::new().with("duration", "2s"))
            .await;
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(output.output, Some(json!({"waitedMs": 2000})));
    }

    #[tokio::test]
    async fn delay_rejects_garbage_duration() {
        let error = Harness::new()
            .run(&DelayHandler, "delay", NodeConfig::new().with("duration", "soon"))
            .await
            .expect_err("invalid duration");
        assert!(matches!(error, NodeError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn dtmf_starts_collection_and_suspends() {
        let board = Arc::new(Switchboard::default());
        let handler = DtmfHandler::new(Some(board.clone()));
        let harness = Harness::new();
        let outcome = harness
            .run(
                &handler,
                "dtmf",
                NodeConfig::new()
                    .with("variable", "account")
                    .with("maxDigits", 6)
                    .with("prompt", "Enter your account number"),
            )
            .await
            .expect("suspends");

        let collections = board.collections.lock().unwrap().clone();
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].variable, "account");
        assert_eq!(collections[0].max_digits, Some(6));
        assert_eq!(
            outcome,
            NodeOutcome::Suspend {
                resume_token: format!("{}:node:1", harness.meta.session_id)
            }
        );
    }

    #[tokio::test]
    async fn transfer_renders_destination() {
        let board = Arc::new(Switchboard::default());
        let handler = TransferHandler::new(Some(board.clone()));
        Harness::new()
            .var("queue", json!({"number": "+15550100"}))
            .complete(
                &handler,
                "transfer",
                NodeConfig::new().with("destination", "{{ queue.number }}"),
            )
            .await;
        assert_eq!(*board.transfers.lock().unwrap(), vec!["+15550100".to_string()]);
    }

    #[tokio::test]
    async fn verification_result_lands_in_variables() {
        let handler = VerifyCallerHandler::new(Some(Arc::new(Switchboard::default())));
        let output = Harness::new()
            .var("digits", json!("4321"))
            .complete(
                &handler,
                "verify_caller",
                NodeConfig::new()
                    .with("method", "pin")
                    .with("data", json!({"pin": "{{ digits }}"})),
            )
            .await;
        let mut vars = VariableStore::new();
        vars.apply(&output.variables);
        assert_eq!(vars.get("verification.verified"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn missing_call_control_is_reported() {
        let error = Harness::new()
            .run(
                &TransferHandler::new(None),
                "transfer",
                NodeConfig::new().with("destination", "+1555"),
            )
            .await
            .expect_err("no provider");
        assert_eq!(error, NodeError::MissingProvider { capability: "call control" });
    }
}
