//! Provider contracts for speech, language, messaging, external calls, and
//! call control.
//!
//! Built-in handlers talk to the outside world only through these traits.
//! The engine requires nothing of an implementation beyond resolving every
//! call to a result eventually; deadlines and retries are applied around it.

use crate::error::ProviderError;
use async_trait::async_trait;
use callflow_workflow::CallId;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Speech synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechRequest {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssml: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Result of playing synthesized speech.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechPlayback {
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub audio_url: Option<String>,
}

/// Speech recognition request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptionRequest {
    pub call_id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
}

/// What the caller said.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub language: Option<String>,
}

#[async_trait]
pub trait SpeechProvider: Send + Sync {
    /// Plays synthesized speech to the caller.
    async fn synthesize(&self, request: SpeechRequest) -> Result<SpeechPlayback, ProviderError>;

    /// Listens to the caller and returns the transcript.
    async fn transcribe(
        &self,
        request: TranscriptionRequest,
    ) -> Result<Transcription, ProviderError>;
}

/// Intent extraction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnderstandRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Candidate intents, if the node restricts them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intents: Vec<String>,
}

/// Intent, entities, and confidence of an utterance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Understanding {
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub entities: BTreeMap<String, JsonValue>,
}

/// Language-model completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
    pub target_language: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub text: String,
    #[serde(default)]
    pub detected_language: Option<String>,
}

/// Sentiment score in `[-1, 1]` with a label.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sentiment {
    pub score: f64,
    pub label: String,
}

/// Locale adaptation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptRequest {
    pub text: String,
    pub locale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formality: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Adaptation {
    pub text: String,
}

#[async_trait]
pub trait LanguageProvider: Send + Sync {
    async fn understand(&self, request: UnderstandRequest)
    -> Result<Understanding, ProviderError>;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError>;

    async fn translate(&self, request: TranslationRequest) -> Result<Translation, ProviderError>;

    async fn analyze_sentiment(&self, text: &str) -> Result<Sentiment, ProviderError>;

    async fn adapt(&self, request: AdaptRequest) -> Result<Adaptation, ProviderError>;
}

/// Messaging channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
    Whatsapp,
}

impl Channel {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
            Self::Whatsapp => "whatsapp",
        }
    }
}

/// An outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub channel: Channel,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    #[serde(default)]
    pub message_id: Option<String>,
}

#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(&self, message: Message) -> Result<Delivery, ProviderError>;
}

/// Protocol of an external request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Rest,
    Webhook,
    Soap,
    Graphql,
}

/// An outbound request to a third-party system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalRequest {
    pub kind: RequestKind,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalResponse {
    pub status: u16,
    #[serde(default)]
    pub body: JsonValue,
}

impl ExternalResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait ExternalRequester: Send + Sync {
    async fn request(&self, request: ExternalRequest) -> Result<ExternalResponse, ProviderError>;
}

/// Caller verification request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub call_id: CallId,
    pub method: String,
    #[serde(default)]
    pub data: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub verified: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Request to start collecting keypad digits.
///
/// The telephony side delivers the digits later by resuming the session
/// with `resume_token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitCollection {
    pub call_id: CallId,
    pub resume_token: String,
    /// Session variable the digits should be delivered into.
    pub variable: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_digits: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_on_key: Option<String>,
}

#[async_trait]
pub trait CallControl: Send + Sync {
    async fn transfer(&self, call_id: &CallId, destination: &str) -> Result<(), ProviderError>;

    async fn verify_caller(
        &self,
        request: VerificationRequest,
    ) -> Result<Verification, ProviderError>;

    async fn collect_digits(&self, request: DigitCollection) -> Result<(), ProviderError>;

    async fn hangup(&self, call_id: &CallId) -> Result<(), ProviderError>;
}

/// The set of providers handed to the built-in handlers.
#[derive(Clone, Default)]
pub struct Providers {
    pub speech: Option<Arc<dyn SpeechProvider>>,
    pub language: Option<Arc<dyn LanguageProvider>>,
    pub messaging: Option<Arc<dyn MessageDispatcher>>,
    pub external: Option<Arc<dyn ExternalRequester>>,
    pub call_control: Option<Arc<dyn CallControl>>,
}

impl Providers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_speech(mut self, speech: Arc<dyn SpeechProvider>) -> Self {
        self.speech = Some(speech);
        self
    }

    #[must_use]
    pub fn with_language(mut self, language: Arc<dyn LanguageProvider>) -> Self {
        self.language = Some(language);
        self
    }

    #[must_use]
    pub fn with_messaging(mut self, messaging: Arc<dyn MessageDispatcher>) -> Self {
        self.messaging = Some(messaging);
        self
    }

    #[must_use]
    pub fn with_external(mut self, external: Arc<dyn ExternalRequester>) -> Self {
        self.external = Some(external);
        self
    }

    #[must_use]
    pub fn with_call_control(mut self, call_control: Arc<dyn CallControl>) -> Self {
        self.call_control = Some(call_control);
        self
    }
}

impl std::fmt::Debug for Providers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Providers")
            .field("speech", &self.speech.is_some())
            .field("language", &self.language.is_some())
            .field("messaging", &self.messaging.is_some())
            .field("external", &self.external.is_some())
            .field("call_control", &self.call_control.is_some())
            .finish()
    }
}

/// Returns the provider or a `NotConfigured` error naming the capability.
pub(crate) fn require<'a, T: ?Sized>(
    provider: Option<&'a Arc<T>>,
    capability: &'static str,
) -> Result<&'a Arc<T>, ProviderError> {
    provider.ok_or(ProviderError::NotConfigured { capability })
}
