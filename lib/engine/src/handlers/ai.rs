//! Speech recognition and language-model nodes.
//!
//! Each handler reads its input text from `text` (templated) or, failing
//! that, from the `transcript` variable an earlier `stt` node produced, and
//! writes its result to `outputVariable` or a type-specific default.

use super::encode;
use crate::error::NodeError;
use crate::handler::{HandlerOutput, NodeContext, NodeHandler, NodeOutcome};
use crate::providers::{
    AdaptRequest, CompletionRequest, LanguageProvider, SpeechProvider, TranscriptionRequest,
    TranslationRequest, UnderstandRequest, require,
};
use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;

const TRANSCRIPT: &str = "transcript";

fn utterance(ctx: &NodeContext<'_>) -> Result<String, NodeError> {
    ctx.render("text")
        .or_else(|| {
            ctx.variables
                .get(TRANSCRIPT)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        })
        .ok_or_else(|| {
            NodeError::invalid_config("no `text` configured and no transcript in the session")
        })
}

fn finish(ctx: &NodeContext<'_>, default_variable: &str, value: JsonValue) -> NodeOutcome {
    HandlerOutput::new()
        .set(ctx.output_variable(default_variable), value.clone())
        .with_output(value)
        .into()
}

/// Transcribes the caller into the `transcript` variable.
#[derive(Clone)]
pub struct SttHandler {
    speech: Option<Arc<dyn SpeechProvider>>,
}

impl SttHandler {
    #[must_use]
    pub fn new(speech: Option<Arc<dyn SpeechProvider>>) -> Self {
        Self { speech }
    }
}

#[async_trait]
impl NodeHandler for SttHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let speech = require(self.speech.as_ref(), "speech")?;
        let transcription = speech
            .transcribe(TranscriptionRequest {
                call_id: ctx.meta.call_id.clone(),
                language: ctx.render("language"),
                max_duration_ms: ctx
                    .config()
                    .duration("maxDuration")
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            })
            .await?;
        let variable = ctx.output_variable(TRANSCRIPT);
        Ok(HandlerOutput::new()
            .set(variable, transcription.text.clone())
            .with_output(encode(&transcription)?)
            .into())
    }
}

/// Extracts intent, entities, and confidence into the `nlu` variable.
#[derive(Clone)]
pub struct NluHandler {
    language: Option<Arc<dyn LanguageProvider>>,
}

impl NluHandler {
    #[must_use]
    pub fn new(language: Option<Arc<dyn LanguageProvider>>) -> Self {
        Self { language }
    }
}

#[async_trait]
impl NodeHandler for NluHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let language = require(self.language.as_ref(), "language")?;
        let intents = ctx
            .config()
            .array("intents")
            .map(|items| {
                items
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let understanding = language
            .understand(UnderstandRequest {
                text: utterance(ctx)?,
                language: ctx.render("language"),
                intents,
            })
            .await?;
        Ok(finish(ctx, "nlu", encode(&understanding)?))
    }
}

/// Generates a response into `agent.response`.
#[derive(Clone)]
pub struct AgentHandler {
    language: Option<Arc<dyn LanguageProvider>>,
}

impl AgentHandler {
    #[must_use]
    pub fn new(language: Option<Arc<dyn LanguageProvider>>) -> Self {
        Self { language }
    }
}

#[async_trait]
impl NodeHandler for AgentHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let language = require(self.language.as_ref(), "language")?;
        let prompt = match ctx.render("prompt") {
            Some(prompt) => prompt,
            None => utterance(ctx)?,
        };
        let completion = language
            .complete(CompletionRequest {
                prompt,
                model: ctx.render("model"),
                system: ctx.render_any(&["systemPrompt", "system"]),
                temperature: ctx.config().f64("temperature"),
            })
            .await?;
        Ok(finish(ctx, "agent", json!({ "response": completion.text })))
    }
}

/// Scores the tone of an utterance into the `sentiment` variable.
#[derive(Clone)]
pub struct SentimentHandler {
    language: Option<Arc<dyn LanguageProvider>>,
}

impl SentimentHandler {
    #[must_use]
    pub fn new(language: Option<Arc<dyn LanguageProvider>>) -> Self {
        Self { language }
    }
}

#[async_trait]
impl NodeHandler for SentimentHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let language = require(self.language.as_ref(), "language")?;
        let sentiment = language.analyze_sentiment(&utterance(ctx)?).await?;
        Ok(finish(ctx, "sentiment", encode(&sentiment)?))
    }
}

/// Translates text into the `translation` variable.
#[derive(Clone)]
pub struct TranslateHandler {
    language: Option<Arc<dyn LanguageProvider>>,
}

impl TranslateHandler {
    #[must_use]
    pub fn new(language: Option<Arc<dyn LanguageProvider>>) -> Self {
        Self { language }
    }
}

#[async_trait]
impl NodeHandler for TranslateHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let language = require(self.language.as_ref(), "language")?;
        let translation = language
            .translate(TranslationRequest {
                text: utterance(ctx)?,
                source_language: ctx.render("sourceLanguage"),
                target_language: ctx.require(&["targetLanguage"])?,
            })
            .await?;
        Ok(finish(ctx, "translation", encode(&translation)?))
    }
}

/// Adapts phrasing to the caller's locale into the `adapted` variable.
#[derive(Clone)]
pub struct CulturalAdaptHandler {
    language: Option<Arc<dyn LanguageProvider>>,
}

impl CulturalAdaptHandler {
    #[must_use]
    pub fn new(language: Option<Arc<dyn LanguageProvider>>) -> Self {
        Self { language }
    }
}

#[async_trait]
impl NodeHandler for CulturalAdaptHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let language = require(self.language.as_ref(), "language")?;
        let adaptation = language
            .adapt(AdaptRequest {
                text: utterance(ctx)?,
                locale: ctx.require(&["locale"])?,
                formality: ctx.render("formality"),
            })
            .await?;
        Ok(finish(ctx, "adapted", json!({ "text": adaptation.text })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ProviderError};
    use crate::handlers::testing::Harness;
    use crate::providers::{
        Adaptation, Completion, Sentiment, SpeechPlayback, SpeechRequest, Transcription,
        Translation, Understanding,
    };
    use callflow_workflow::{NodeConfig, VariableStore};
    use std::sync::Mutex;

    #[derive(Default)]
    struct EchoLanguage {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageProvider for EchoLanguage {
        async fn understand(
            &self,
            request: UnderstandRequest,
        ) -> Result<Understanding, ProviderError> {
            let intent = if request.text.contains("bill") { "billing" } else { "other" };
            Ok(Understanding {
                intent: intent.to_string(),
                confidence: 0.9,
                entities: Default::default(),
            })
        }

        async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            Ok(Completion {
                text: format!("re: {}", request.prompt),
            })
        }

        async fn translate(
            &self,
            request: TranslationRequest,
        ) -> Result<Translation, ProviderError> {
            Ok(Translation {
                text: format!("[{}] {}", request.target_language, request.text),
                detected_language: Some("en".to_string()),
            })
        }

        async fn analyze_sentiment(&self, _text: &str) -> Result<Sentiment, ProviderError> {
            Err(ProviderError::Rejected {
                reason: "quota".to_string(),
            })
        }

        async fn adapt(&self, request: AdaptRequest) -> Result<Adaptation, ProviderError> {
            Ok(Adaptation {
                text: format!("{} ({})", request.text, request.locale),
            })
        }
    }

    struct FixedSpeech;

    #[async_trait]
    impl SpeechProvider for FixedSpeech {
        async fn synthesize(
            &self,
            _request: SpeechRequest,
        ) -> Result<SpeechPlayback, ProviderError> {
            Ok(SpeechPlayback::default())
        }

        async fn transcribe(
            &self,
            _request: TranscriptionRequest,
        ) -> Result<Transcription, ProviderError> {
            Ok(Transcription {
                text: "I have a question about my bill".to_string(),
                confidence: Some(0.95),
                language: Some("en".to_string()),
            })
        }
    }

    fn language() -> Option<Arc<dyn LanguageProvider>> {
        Some(Arc::new(EchoLanguage::default()))
    }

    fn applied(output: &HandlerOutput) -> VariableStore {
        let mut store = VariableStore::new();
        store.apply(&output.variables);
        store
    }

    #[tokio::test]
    async fn stt_writes_transcript() {
        let handler = SttHandler::new(Some(Arc::new(FixedSpeech)));
        let output = Harness::new()
            .complete(&handler, "stt", NodeConfig::new())
            .await;
        assert_eq!(
            applied(&output).get("transcript"),
            Some(&json!("I have a question about my bill"))
        );
    }

    #[tokio::test]
    async fn nlu_reads_transcript() {
        let handler = NluHandler::new(language());
        let harness = Harness::new().var("transcript", json!("my bill is wrong"));
        let output = harness.complete(&handler, "nlu", NodeConfig::new()).await;
        let vars = applied(&output);
        assert_eq!(vars.get("nlu.intent"), Some(&json!("billing")));
        assert_eq!(vars.get("nlu.confidence"), Some(&json!(0.9)));
    }

    #[tokio::test]
    async fn agent_renders_prompt_into_output_variable() {
        let handler = AgentHandler::new(language());
        let harness = Harness::new().var("nlu", json!({"intent": "billing"}));
        let output = harness
            .complete(
                &handler,
                "agent",
                NodeConfig::new()
                    .with("prompt", "Help with {{ nlu.intent }}")
                    .with("outputVariable", "reply"),
            )
            .await;
        assert_eq!(
            applied(&output).get("reply.response"),
            Some(&json!("re: Help with billing"))
        );
    }

    #[tokio::test]
    async fn translate_and_adapt() {
        let harness = Harness::new().var("transcript", json!("hello"));
        let output = harness
            .complete(
                &TranslateHandler::new(language()),
                "translate",
                NodeConfig::new().with("targetLanguage", "es"),
            )
            .await;
        assert_eq!(applied(&output).get("translation.text"), Some(&json!("[es] hello")));

        let output = harness
            .complete(
                &CulturalAdaptHandler::new(language()),
                "cultural_adapt",
                NodeConfig::new().with("locale", "es-MX"),
            )
            .await;
        assert_eq!(applied(&output).get("adapted.text"), Some(&json!("hello (es-MX)")));
    }

    #[tokio::test]
    async fn provider_failures_are_handler_errors() {
        let harness = Harness::new().var("transcript", json!("ugh"));
        let error = harness
            .run(&SentimentHandler::new(language()), "sentiment", NodeConfig::new())
            .await
            .expect_err("rejected");
        assert_eq!(error.kind(), ErrorKind::Handler);
    }

    #[tokio::test]
    async fn missing_provider_and_input() {
        let error = Harness::new()
            .run(&NluHandler::new(None), "nlu", NodeConfig::new())
            .await
            .expect_err("no provider");
        assert_eq!(error.to_string(), "no language provider is configured");

        let error = Harness::new()
            .run(&NluHandler::new(language()), "nlu", NodeConfig::new())
            .await
            .expect_err("no input");
        assert!(error.to_string().contains("transcript"));
    }
}
