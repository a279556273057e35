//! Provider implementations over HTTP.
//!
//! [`HttpBridge`] forwards speech, language, messaging, and call-control
//! requests as JSON to a provider sidecar, one route per operation.
//! [`DirectRequester`] performs external requests for `api`, `webhook`,
//! `soap`, and `graphql` nodes itself.

use async_trait::async_trait;
use callflow_engine::providers::{
    AdaptRequest, Adaptation, Completion, CompletionRequest, Delivery, DigitCollection,
    ExternalRequest, ExternalResponse, Message, Sentiment, SpeechPlayback, SpeechRequest,
    Transcription, TranscriptionRequest, Translation, TranslationRequest, UnderstandRequest,
    Understanding, Verification, VerificationRequest,
};
use callflow_engine::{
    CallControl, ExternalRequester, LanguageProvider, MessageDispatcher, ProviderError,
    SpeechProvider,
};
use callflow_workflow::CallId;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::debug;

fn client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::Unavailable {
            provider: "http".to_string(),
            reason: e.to_string(),
        })
}

fn transport_error(provider: &str, timeout: Duration, error: &reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout { after: timeout }
    } else {
        ProviderError::Unavailable {
            provider: provider.to_string(),
            reason: error.to_string(),
        }
    }
}

/// JSON-over-HTTP client for the provider sidecar.
#[derive(Debug, Clone)]
pub struct HttpBridge {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBridge {
    /// Creates a bridge rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client: client(timeout)?,
            base_url,
            timeout,
        })
    }

    async fn send<Req: Serialize + Sync>(
        &self,
        route: &str,
        body: &Req,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/{route}", self.base_url);
        debug!(%url, "bridge request");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error("bridge", self.timeout, &e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(ProviderError::Rejected {
            reason: format!("{route} answered HTTP {}: {detail}", status.as_u16()),
        })
    }

    async fn call<Req, Resp>(&self, route: &str, body: &Req) -> Result<Resp, ProviderError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        self.send(route, body)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                reason: format!("{route}: {e}"),
            })
    }

    async fn notify<Req: Serialize + Sync>(
        &self,
        route: &str,
        body: &Req,
    ) -> Result<(), ProviderError> {
        self.send(route, body).await.map(|_| ())
    }
}

#[async_trait]
impl SpeechProvider for HttpBridge {
    async fn synthesize(&self, request: SpeechRequest) -> Result<SpeechPlayback, ProviderError> {
        self.call("speech/synthesize", &request).await
    }

    async fn transcribe(
        &self,
        request: TranscriptionRequest,
    ) -> Result<Transcription, ProviderError> {
        self.call("speech/transcribe", &request).await
    }
}

#[async_trait]
impl LanguageProvider for HttpBridge {
    async fn understand(
        &self,
        request: UnderstandRequest,
    ) -> Result<Understanding, ProviderError> {
        self.call("language/understand", &request).await
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        self.call("language/complete", &request).await
    }

    async fn translate(&self, request: TranslationRequest) -> Result<Translation, ProviderError> {
        self.call("language/translate", &request).await
    }

    async fn analyze_sentiment(&self, text: &str) -> Result<Sentiment, ProviderError> {
        self.call("language/sentiment", &json!({ "text": text }))
            .await
    }

    async fn adapt(&self, request: AdaptRequest) -> Result<Adaptation, ProviderError> {
        self.call("language/adapt", &request).await
    }
}

#[async_trait]
impl MessageDispatcher for HttpBridge {
    async fn dispatch(&self, message: Message) -> Result<Delivery, ProviderError> {
        self.call("messages", &message).await
    }
}

#[async_trait]
impl CallControl for HttpBridge {
    async fn transfer(&self, call_id: &CallId, destination: &str) -> Result<(), ProviderError> {
        self.notify(
            "calls/transfer",
            &json!({ "callId": call_id, "destination": destination }),
        )
        .await
    }

    async fn verify_caller(
        &self,
        request: VerificationRequest,
    ) -> Result<Verification, ProviderError> {
        self.call("calls/verify", &request).await
    }

    async fn collect_digits(&self, request: DigitCollection) -> Result<(), ProviderError> {
        self.notify("calls/collect-digits", &request).await
    }

    async fn hangup(&self, call_id: &CallId) -> Result<(), ProviderError> {
        self.notify("calls/hangup", &json!({ "callId": call_id }))
            .await
    }
}

/// Performs external requests with reqwest.
///
/// Any HTTP status is a response; the handler decides what counts as
/// failure. Bodies that are not JSON come back as a string.
#[derive(Debug, Clone)]
pub struct DirectRequester {
    client: Client,
    timeout: Duration,
}

impl DirectRequester {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: client(timeout)?,
            timeout,
        })
    }
}

#[async_trait]
impl ExternalRequester for DirectRequester {
    async fn request(&self, request: ExternalRequest) -> Result<ExternalResponse, ProviderError> {
        let method = Method::from_bytes(request.method.to_uppercase().as_bytes()).map_err(|_| {
            ProviderError::Rejected {
                reason: format!("unsupported HTTP method `{}`", request.method),
            }
        })?;
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&request.url, self.timeout, &e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_error(&request.url, self.timeout, &e))?;
        let body = if text.trim().is_empty() || status == StatusCode::NO_CONTENT {
            JsonValue::Null
        } else {
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
        };
        debug!(url = %request.url, status = status.as_u16(), "external request finished");
        Ok(ExternalResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::{get, post};
    use callflow_engine::providers::RequestKind;
    use std::collections::BTreeMap;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn bridge_posts_json_and_decodes_the_answer() {
        let sidecar = Router::new().route(
            "/speech/transcribe",
            post(|axum::Json(body): axum::Json<JsonValue>| async move {
                axum::Json(json!({
                    "text": format!("heard on {}", body["callId"].as_str().unwrap_or("?")),
                    "confidence": 0.8
                }))
            }),
        );
        let bridge = HttpBridge::new(format!("{}/", serve(sidecar).await), Duration::from_secs(5))
            .expect("bridge");

        let transcription = bridge
            .transcribe(TranscriptionRequest {
                call_id: CallId::new("CA1"),
                language: None,
                max_duration_ms: None,
            })
            .await
            .expect("transcription");

        assert_eq!(transcription.text, "heard on CA1");
        assert_eq!(transcription.confidence, Some(0.8));
    }

    #[tokio::test]
    async fn bridge_rejection_carries_status() {
        let sidecar = Router::new().route(
            "/calls/hangup",
            post(|| async { (AxumStatus::BAD_GATEWAY, "carrier down") }),
        );
        let bridge = HttpBridge::new(serve(sidecar).await, Duration::from_secs(5)).expect("bridge");

        let err = bridge
            .hangup(&CallId::new("CA1"))
            .await
            .expect_err("rejected");

        assert_eq!(
            err,
            ProviderError::Rejected {
                reason: "calls/hangup answered HTTP 502: carrier down".to_string()
            }
        );
    }

    #[tokio::test]
    async fn direct_requests_keep_non_json_bodies() {
        let upstream = Router::new()
            .route("/plain", get(|| async { "pong" }))
            .route(
                "/missing",
                get(|| async { (AxumStatus::NOT_FOUND, axum::Json(json!({"found": false}))) }),
            );
        let base = serve(upstream).await;
        let requester = DirectRequester::new(Duration::from_secs(5)).expect("requester");
        let request = |path: &str| ExternalRequest {
            kind: RequestKind::Rest,
            method: "get".to_string(),
            url: format!("{base}{path}"),
            headers: BTreeMap::new(),
            body: None,
        };

        let plain = requester.request(request("/plain")).await.expect("plain");
        assert_eq!(plain.status, 200);
        assert_eq!(plain.body, json!("pong"));

        let missing = requester.request(request("/missing")).await.expect("missing");
        assert_eq!(missing.status, 404);
        assert_eq!(missing.body, json!({"found": false}));
    }

    #[tokio::test]
    async fn unreachable_sidecar_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let bridge =
            HttpBridge::new(format!("http://{addr}"), Duration::from_secs(5)).expect("bridge");

        let err = bridge
            .hangup(&CallId::new("CA1"))
            .await
            .expect_err("unreachable");

        assert!(matches!(err, ProviderError::Unavailable { .. }));
    }
}
