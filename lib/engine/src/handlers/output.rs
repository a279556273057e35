//! Speech and messaging toward the caller.

use super::encode;
use crate::error::NodeError;
use crate::handler::{HandlerOutput, NodeContext, NodeHandler, NodeOutcome};
use crate::providers::{Channel, Message, MessageDispatcher, SpeechProvider, SpeechRequest, require};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

/// Plays `text` or `ssml` to the caller.
#[derive(Clone)]
pub struct TtsHandler {
    speech: Option<Arc<dyn SpeechProvider>>,
}

impl TtsHandler {
    #[must_use]
    pub fn new(speech: Option<Arc<dyn SpeechProvider>>) -> Self {
        Self { speech }
    }
}

#[async_trait]
impl NodeHandler for TtsHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let speech = require(self.speech.as_ref(), "speech")?;
        let text = ctx.render("text");
        let ssml = ctx.render("ssml");
        if text.is_none() && ssml.is_none() {
            return Err(NodeError::invalid_config("`text` or `ssml` is required"));
        }
        let playback = speech
            .synthesize(SpeechRequest {
                call_id: ctx.meta.call_id.clone(),
                text: text.clone(),
                ssml,
                voice: ctx.render("voice"),
                language: ctx.render("language"),
            })
            .await?;
        Ok(HandlerOutput::new()
            .with_output(json!({ "text": text, "playback": encode(&playback)? }))
            .into())
    }
}

/// Sends an SMS, email, or WhatsApp message.
#[derive(Clone)]
pub struct MessageHandler {
    channel: Channel,
    messaging: Option<Arc<dyn MessageDispatcher>>,
}

impl MessageHandler {
    #[must_use]
    pub fn new(channel: Channel, messaging: Option<Arc<dyn MessageDispatcher>>) -> Self {
        Self { channel, messaging }
    }
}

#[async_trait]
impl NodeHandler for MessageHandler {
    async fn execute(&self, ctx: &NodeContext<'_>) -> Result<NodeOutcome, NodeError> {
        let messaging = require(self.messaging.as_ref(), "messaging")?;
        let message = Message {
            channel: self.channel,
            to: ctx.require(&["to", "recipient"])?,
            subject: match self.channel {
                Channel::Email => ctx.render("subject"),
                Channel::Sms | Channel::Whatsapp => None,
            },
            body: ctx.require(&["message", "body"])?,
        };
        let to = message.to.clone();
        let delivery = messaging.dispatch(message).await?;
        Ok(HandlerOutput::new()
            .with_output(json!({
                "channel": self.channel,
                "to": to,
                "messageId": delivery.message_id,
            }))
            .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::handlers::testing::Harness;
    use crate::providers::{Delivery, SpeechPlayback, Transcription, TranscriptionRequest};
    use callflow_workflow::NodeConfig;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Outbox {
        spoken: Mutex<Vec<SpeechRequest>>,
        sent: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl SpeechProvider for Outbox {
        async fn synthesize(
            &self,
            request: SpeechRequest,
        ) -> Result<SpeechPlayback, ProviderError> {
            self.spoken.lock().unwrap().push(request);
            Ok(SpeechPlayback {
                duration_ms: Some(1200),
                audio_url: None,
            })
        }

        async fn transcribe(
            &self,
            _request: TranscriptionRequest,
        ) -> Result<Transcription, ProviderError> {
            Ok(Transcription::default())
        }
    }

    #[async_trait]
    impl MessageDispatcher for Outbox {
        async fn dispatch(&self, message: Message) -> Result<Delivery, ProviderError> {
            self.sent.lock().unwrap().push(message);
            Ok(Delivery {
                message_id: Some("SM1".to_string()),
            })
        }
    }

    #[tokio::test]
    async fn tts_renders_text() {
        let outbox = Arc::new(Outbox::default());
        let handler = TtsHandler::new(Some(outbox.clone()));
        let harness = Harness::new().var("agent", json!({"response": "Your balance is $42."}));
        let output = harness
            .complete(&handler, "tts", NodeConfig::new().with("text", "{{ agent.response }}"))
            .await;
        let spoken = outbox.spoken.lock().unwrap().clone();
        assert_eq!(spoken.len(), 1);
        assert_eq!(spoken[0].text.as_deref(), Some("Your balance is $42."));
        assert_eq!(spoken[0].call_id.as_str(), "CA-test");
        assert_eq!(output.output.map(|o| o["playback"]["durationMs"].clone()), Some(json!(1200)));
    }

    #[tokio::test]
    async fn email_carries_subject_but_sms_does_not() {
        let outbox = Arc::new(Outbox::default());
        let config = NodeConfig::new()
            .with("to", "{{ caller.contact }}")
            .with("subject", "Your ticket")
            .with("message", "Ticket opened");
        let harness = Harness::new().var("caller", json!({"contact": "ana@example.com"}));

        let email = MessageHandler::new(Channel::Email, Some(outbox.clone()));
        harness.complete(&email, "email", config.clone()).await;
        let sms = MessageHandler::new(Channel::Sms, Some(outbox.clone()));
        harness.complete(&sms, "sms", config).await;

        let sent = outbox.sent.lock().unwrap().clone();
        assert_eq!(sent[0].to, "ana@example.com");
        assert_eq!(sent[0].subject.as_deref(), Some("Your ticket"));
        assert_eq!(sent[1].channel, Channel::Sms);
        assert_eq!(sent[1].subject, None);
    }

    #[tokio::test]
    async fn message_without_recipient_is_rejected() {
        let handler = MessageHandler::new(Channel::Whatsapp, Some(Arc::new(Outbox::default())));
        let error = Harness::new()
            .run(&handler, "whatsapp", NodeConfig::new().with("body", "hi"))
            .await
            .expect_err("no recipient");
        assert!(error.to_string().contains("`to` or `recipient`"));
    }
}
