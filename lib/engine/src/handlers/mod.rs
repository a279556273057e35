//! Built-in node handlers.
//!
//! Local handlers (flow control, logic, data) are self-contained. Adapter
//! handlers translate node configuration into provider calls and write the
//! result back into session variables.

mod ai;
mod control;
mod data;
mod external;
mod flow;
mod logic;
mod output;

pub use ai::{
    AgentHandler, CulturalAdaptHandler, NluHandler, SentimentHandler, SttHandler,
    TranslateHandler,
};
pub use control::{DelayHandler, DtmfHandler, TransferHandler, VerifyCallerHandler};
pub use data::{AnalyticsHandler, RedactHandler, TransformHandler, VariableHandler};
pub use external::ExternalCallHandler;
pub use flow::{EndHandler, ErrorHandlerHandler, JoinHandler, TriggerHandler};
pub use logic::{ConditionHandler, LOOP_PREFIX, LoopHandler, ParallelHandler, SwitchHandler};
pub use output::{MessageHandler, TtsHandler};

use crate::error::NodeError;
use crate::handler::HandlerRegistry;
use crate::providers::{Channel, Providers, RequestKind};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Serializes a provider result for history and variables.
pub(crate) fn encode<T: Serialize>(value: &T) -> Result<JsonValue, NodeError> {
    serde_json::to_value(value)
        .map_err(|e| NodeError::failed(format!("provider result is not serializable: {e}")))
}

/// Creates a registry with a handler for every built-in node type.
#[must_use]
pub fn builtin(providers: &Providers) -> HandlerRegistry {
    HandlerRegistry::empty()
        // Input
        .with("trigger", Arc::new(TriggerHandler))
        .with("dtmf", Arc::new(DtmfHandler::new(providers.call_control.clone())))
        // AI processing
        .with("stt", Arc::new(SttHandler::new(providers.speech.clone())))
        .with("nlu", Arc::new(NluHandler::new(providers.language.clone())))
        .with("agent", Arc::new(AgentHandler::new(providers.language.clone())))
        .with("sentiment", Arc::new(SentimentHandler::new(providers.language.clone())))
        .with("translate", Arc::new(TranslateHandler::new(providers.language.clone())))
        .with(
            "cultural_adapt",
            Arc::new(CulturalAdaptHandler::new(providers.language.clone())),
        )
        // Data
        .with("variable", Arc::new(VariableHandler))
        .with("transform", Arc::new(TransformHandler))
        // Logic
        .with("condition", Arc::new(ConditionHandler))
        .with("switch", Arc::new(SwitchHandler))
        .with("loop", Arc::new(LoopHandler))
        .with("parallel", Arc::new(ParallelHandler))
        .with("join", Arc::new(JoinHandler))
        // External
        .with(
            "api",
            Arc::new(ExternalCallHandler::new(RequestKind::Rest, providers.external.clone())),
        )
        .with(
            "webhook",
            Arc::new(ExternalCallHandler::new(RequestKind::Webhook, providers.external.clone())),
        )
        .with(
            "soap",
            Arc::new(ExternalCallHandler::new(RequestKind::Soap, providers.external.clone())),
        )
        .with(
            "graphql",
            Arc::new(ExternalCallHandler::new(RequestKind::Graphql, providers.external.clone())),
        )
        // Output
        .with("tts", Arc::new(TtsHandler::new(providers.speech.clone())))
        .with(
            "sms",
            Arc::new(MessageHandler::new(Channel::Sms, providers.messaging.clone())),
        )
        .with(
            "email",
            Arc::new(MessageHandler::new(Channel::Email, providers.messaging.clone())),
        )
        .with(
            "whatsapp",
            Arc::new(MessageHandler::new(Channel::Whatsapp, providers.messaging.clone())),
        )
        // Analytics
        .with("analytics", Arc::new(AnalyticsHandler))
        // Security
        .with(
            "verify_caller",
            Arc::new(VerifyCallerHandler::new(providers.call_control.clone())),
        )
        .with("redact", Arc::new(RedactHandler))
        // Control
        .with("delay", Arc::new(DelayHandler))
        .with(
            "transfer",
            Arc::new(TransferHandler::new(providers.call_control.clone())),
        )
        .with("error_handler", Arc::new(ErrorHandlerHandler))
        .with("end", Arc::new(EndHandler))
}
