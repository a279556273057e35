//! End-to-end call flows through the engine with scripted providers.

use async_trait::async_trait;
use callflow_engine::providers::{
    AdaptRequest, Adaptation, Completion, CompletionRequest, DigitCollection, ExternalRequest,
    ExternalResponse, SpeechPlayback, SpeechRequest, Transcription, TranscriptionRequest,
    Translation, TranslationRequest, UnderstandRequest, Understanding, Verification,
    VerificationRequest,
};
use callflow_engine::{
    CallControl, Engine, ErrorKind, ExternalRequester, InMemoryWorkflowStore, LanguageProvider,
    MemoryAuditSink, ProviderError, Providers, ResultStatus, ResumePayload, SessionReport,
    SessionStatus, SharedVariables, SpeechProvider, StoreError,
};
use callflow_workflow::{
    CallId, NodeConfig, NodeConnection, TriggerEvent, Workflow, WorkflowNode, handles,
};
use serde_json::{Value as JsonValue, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted stand-in for every provider.
#[derive(Default)]
struct Telephony {
    transcript: String,
    confidence: f64,
    /// Speech synthesis never finishes.
    stall_speech: bool,
    /// External requests never finish.
    stall_requests: bool,
    spoken: Mutex<Vec<String>>,
    requests: AtomicUsize,
    hangups: AtomicUsize,
    collections: Mutex<Vec<DigitCollection>>,
}

impl Telephony {
    fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    fn providers(self: &Arc<Self>) -> Providers {
        Providers::new()
            .with_speech(self.clone())
            .with_language(self.clone())
            .with_external(self.clone())
            .with_call_control(self.clone())
    }
}

#[async_trait]
impl SpeechProvider for Telephony {
    async fn synthesize(&self, request: SpeechRequest) -> Result<SpeechPlayback, ProviderError> {
        if self.stall_speech {
            std::future::pending::<()>().await;
        }
        self.spoken
            .lock()
            .unwrap()
            .push(request.text.unwrap_or_default());
        Ok(SpeechPlayback::default())
    }

    async fn transcribe(
        &self,
        _request: TranscriptionRequest,
    ) -> Result<Transcription, ProviderError> {
        Ok(Transcription {
            text: self.transcript.clone(),
            confidence: Some(0.97),
            language: Some("en-US".to_string()),
        })
    }
}

#[async_trait]
impl LanguageProvider for Telephony {
    async fn understand(
        &self,
        request: UnderstandRequest,
    ) -> Result<Understanding, ProviderError> {
        Ok(Understanding {
            intent: if request.text.contains("balance") {
                "check_balance".to_string()
            } else {
                "unknown".to_string()
            },
            confidence: self.confidence,
            entities: Default::default(),
        })
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        Ok(Completion {
            text: format!("You asked: {}", request.prompt),
        })
    }

    async fn translate(&self, request: TranslationRequest) -> Result<Translation, ProviderError> {
        Ok(Translation {
            text: request.text,
            detected_language: None,
        })
    }

    async fn analyze_sentiment(
        &self,
        _text: &str,
    ) -> Result<callflow_engine::providers::Sentiment, ProviderError> {
        Ok(Default::default())
    }

    async fn adapt(&self, request: AdaptRequest) -> Result<Adaptation, ProviderError> {
        Ok(Adaptation { text: request.text })
    }
}

#[async_trait]
impl ExternalRequester for Telephony {
    async fn request(&self, request: ExternalRequest) -> Result<ExternalResponse, ProviderError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.stall_requests {
            std::future::pending::<()>().await;
        }
        let status = if request.url.contains("/fail") { 500 } else { 200 };
        Ok(ExternalResponse {
            status,
            body: json!({"ok": status == 200}),
        })
    }
}

#[async_trait]
impl CallControl for Telephony {
    async fn transfer(&self, _call_id: &CallId, _destination: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn verify_caller(
        &self,
        _request: VerificationRequest,
    ) -> Result<Verification, ProviderError> {
        Ok(Verification::default())
    }

    async fn collect_digits(&self, request: DigitCollection) -> Result<(), ProviderError> {
        self.collections.lock().unwrap().push(request);
        Ok(())
    }

    async fn hangup(&self, _call_id: &CallId) -> Result<(), ProviderError> {
        self.hangups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn node(id: &str, node_type: &str, config: JsonValue) -> WorkflowNode {
    let config = match config {
        JsonValue::Object(map) => NodeConfig::from(map),
        _ => NodeConfig::new(),
    };
    WorkflowNode::new(id, node_type).with_config(config)
}

struct Harness {
    engine: Engine,
    audit: Arc<MemoryAuditSink>,
    telephony: Arc<Telephony>,
    workflow_id: callflow_core::WorkflowId,
}

impl Harness {
    async fn activate(workflow: Workflow, telephony: Telephony) -> Self {
        let telephony = Arc::new(telephony);
        let audit = Arc::new(MemoryAuditSink::new());
        let workflow_id = workflow.id;
        let engine = Engine::builder()
            .with_store(Arc::new(InMemoryWorkflowStore::with_workflows([workflow])))
            .with_providers(telephony.providers())
            .with_audit(audit.clone())
            .build();
        engine.activate(workflow_id).await.expect("workflow activates");
        Self {
            engine,
            audit,
            telephony,
            workflow_id,
        }
    }

    async fn call(&self, payload: JsonValue) -> SessionReport {
        self.engine
            .start_session(TriggerEvent::new(self.workflow_id, "CA100").with_payload(payload))
            .await
            .expect("session starts")
            .wait()
            .await
            .expect("session finishes")
    }
}

fn support_line() -> Workflow {
    Workflow::new("support line")
        .node(node("start", "trigger", json!({})))
        .and_then(|w| w.node(node("listen", "stt", json!({"timeout": 5000}))))
        .and_then(|w| w.node(node("understand", "nlu", json!({"timeout": 5000}))))
        .and_then(|w| {
            w.node(node(
                "check",
                "condition",
                json!({"condition": "nlu.confidence > 0.8"}),
            ))
        })
        .and_then(|w| {
            w.node(node(
                "agent",
                "agent",
                json!({"prompt": "{{ transcript }}", "timeout": 5000}),
            ))
        })
        .and_then(|w| w.node(node("apology", "error_handler", json!({}))))
        .and_then(|w| {
            w.node(node(
                "speak",
                "tts",
                json!({"text": "{{ agent.response }}", "timeout": 5000}),
            ))
        })
        .and_then(|w| w.node(node("bye", "end", json!({}))))
        .and_then(|w| w.then("start", "listen"))
        .and_then(|w| w.then("listen", "understand"))
        .and_then(|w| w.then("understand", "check"))
        .and_then(|w| w.connect("check", "agent", NodeConnection::new(handles::TRUE)))
        .and_then(|w| w.connect("check", "apology", NodeConnection::new(handles::FALSE)))
        .and_then(|w| w.then("check", "apology"))
        .and_then(|w| w.then("agent", "speak"))
        .and_then(|w| w.then("apology", "speak"))
        .and_then(|w| w.then("speak", "bye"))
        .expect("valid workflow")
}

#[tokio::test]
async fn confident_caller_is_answered_by_the_agent() {
    let harness = Harness::activate(
        support_line(),
        Telephony {
            transcript: "what is my balance".to_string(),
            confidence: 0.9,
            ..Telephony::default()
        },
    )
    .await;

    let report = harness.call(json!({"from": "+15550100"})).await;

    assert_eq!(report.status(), SessionStatus::Completed);
    assert_eq!(
        report.path(),
        vec!["start", "listen", "understand", "check", "agent", "speak", "bye"]
    );
    let steps: Vec<u64> = report.history().iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(report.history()[3].selected_handle.as_deref(), Some("true"));
    assert_eq!(harness.telephony.spoken(), vec!["You asked: what is my balance"]);
    assert_eq!(report.variables["nlu"]["intent"], "check_balance");
    assert_eq!(report.variables["trigger"]["from"], "+15550100");

    let audited = harness.audit.reports().await;
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].status(), SessionStatus::Completed);
}

#[tokio::test]
async fn unsure_caller_takes_the_false_branch() {
    let harness = Harness::activate(
        support_line(),
        Telephony {
            transcript: "hmm".to_string(),
            confidence: 0.4,
            ..Telephony::default()
        },
    )
    .await;

    let report = harness.call(json!({})).await;

    assert_eq!(report.status(), SessionStatus::Completed);
    assert_eq!(
        report.path(),
        vec!["start", "listen", "understand", "check", "apology", "speak", "bye"]
    );
}

#[tokio::test]
async fn loop_exits_through_timeout_after_its_bound() {
    let workflow = Workflow::new("retry menu")
        .node(node("start", "trigger", json!({})))
        .and_then(|w| {
            w.node(node(
                "spin",
                "loop",
                json!({"condition": "true", "maxIterations": 3}),
            ))
        })
        .and_then(|w| {
            w.node(node(
                "count",
                "variable",
                json!({"key": "attempts", "operation": "increment"}),
            ))
        })
        .and_then(|w| w.node(node("bye", "end", json!({}))))
        .and_then(|w| w.then("start", "spin"))
        .and_then(|w| w.connect("spin", "count", NodeConnection::new(handles::BODY)))
        .and_then(|w| w.then("count", "spin"))
        .and_then(|w| w.connect("spin", "bye", NodeConnection::new(handles::TIMEOUT)))
        .expect("valid workflow");
    let harness = Harness::activate(workflow, Telephony::default()).await;

    let report = harness.call(json!({})).await;

    assert_eq!(report.status(), SessionStatus::Completed);
    assert_eq!(
        report.path(),
        vec!["start", "spin", "count", "spin", "count", "spin", "count", "spin", "bye"]
    );
    assert_eq!(report.variables["attempts"], 3);
    assert_eq!(
        report.history()[7].selected_handle.as_deref(),
        Some(handles::TIMEOUT)
    );
    assert!(report.variables["loop"]["spin"].get("iterations").is_none());
}

#[tokio::test(start_paused = true)]
async fn timed_out_request_is_retried_then_routed_to_error_handler() {
    let workflow = Workflow::new("account lookup")
        .node(node("start", "trigger", json!({})))
        .and_then(|w| {
            w.node(node(
                "lookup",
                "api",
                json!({
                    "endpoint": "https://crm.example/accounts",
                    "method": "GET",
                    "timeout": 2000,
                    "retries": 2
                }),
            ))
        })
        .and_then(|w| w.node(node("oops", "error_handler", json!({}))))
        .and_then(|w| w.node(node("bye", "end", json!({}))))
        .and_then(|w| w.then("start", "lookup"))
        .and_then(|w| w.then("lookup", "bye"))
        .and_then(|w| w.connect("lookup", "oops", NodeConnection::new(handles::ERROR)))
        .and_then(|w| w.then("oops", "bye"))
        .expect("valid workflow");
    let harness = Harness::activate(
        workflow,
        Telephony {
            stall_requests: true,
            ..Telephony::default()
        },
    )
    .await;

    let started = tokio::time::Instant::now();
    let report = harness.call(json!({})).await;

    assert_eq!(harness.telephony.requests.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_millis(3 * 2000 + 250 + 500));
    assert_eq!(report.status(), SessionStatus::Completed);
    assert_eq!(report.path(), vec!["start", "lookup", "oops", "bye"]);

    let lookup = &report.history()[1];
    assert_eq!(lookup.status, ResultStatus::Error);
    assert_eq!(lookup.attempts, 3);
    let error = lookup.error.as_ref().expect("error recorded");
    assert_eq!(error.kind, ErrorKind::Timeout);
    assert_eq!(error.attempts, Some(3));
    assert_eq!(report.variables["error"]["kind"], "TimeoutError");
    assert_eq!(report.variables["error"]["nodeId"], "lookup");
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_suspended_session_records_nothing_for_the_pending_node() {
    let workflow = Workflow::new("greeting")
        .node(node("start", "trigger", json!({})))
        .and_then(|w| w.node(node("greet", "tts", json!({"text": "Welcome", "timeout": 30000}))))
        .and_then(|w| w.node(node("bye", "end", json!({}))))
        .and_then(|w| w.then("start", "greet"))
        .and_then(|w| w.then("greet", "bye"))
        .expect("valid workflow");
    let harness = Harness::activate(
        workflow,
        Telephony {
            stall_speech: true,
            ..Telephony::default()
        },
    )
    .await;

    let handle = harness
        .engine
        .start_session(TriggerEvent::new(harness.workflow_id, "CA200"))
        .await
        .expect("session starts");
    let session_id = handle.session_id();
    loop {
        let view = harness
            .engine
            .session_status(session_id)
            .await
            .expect("session is live");
        if view.status == SessionStatus::Suspended {
            assert_eq!(view.current_node_id.as_ref().map(|n| n.as_str()), Some("greet"));
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.engine.active_sessions().await.len(), 1);

    harness.engine.cancel(session_id).await.expect("cancel");
    let report = handle.wait().await.expect("session finishes");

    assert_eq!(report.status(), SessionStatus::Cancelled);
    assert_eq!(report.path(), vec!["start"]);
    assert_eq!(
        report.view.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Cancelled)
    );
    assert_eq!(harness.telephony.hangups.load(Ordering::SeqCst), 0);
    assert!(harness.engine.active_sessions().await.is_empty());
    assert!(harness.engine.session_status(session_id).await.is_err());
}

fn menu(with_default: bool) -> Workflow {
    let workflow = Workflow::new("menu")
        .node(node("start", "trigger", json!({})))
        .and_then(|w| {
            w.node(node(
                "route",
                "switch",
                json!({"expression": "trigger.digit", "cases": [1, 2]}),
            ))
        })
        .and_then(|w| w.node(node("billing", "end", json!({"reason": "billing"}))))
        .and_then(|w| w.node(node("support", "end", json!({"reason": "support"}))))
        .and_then(|w| w.then("start", "route"))
        .and_then(|w| w.connect("route", "billing", NodeConnection::new("1")))
        .and_then(|w| w.connect("route", "support", NodeConnection::new("2")))
        .expect("valid workflow");
    if with_default {
        workflow
            .node(node("operator", "end", json!({})))
            .and_then(|w| w.then("route", "operator"))
            .expect("valid workflow")
    } else {
        workflow
    }
}

#[tokio::test]
async fn switch_takes_the_first_matching_case() {
    let harness = Harness::activate(menu(true), Telephony::default()).await;

    let report = harness.call(json!({"digit": "2"})).await;
    assert_eq!(report.path(), vec!["start", "route", "support"]);

    let report = harness.call(json!({"digit": 9})).await;
    assert_eq!(report.path(), vec!["start", "route", "operator"]);
}

#[tokio::test]
async fn switch_without_match_or_default_is_a_dead_end() {
    let harness = Harness::activate(menu(false), Telephony::default()).await;

    let report = harness.call(json!({"digit": 7})).await;

    assert_eq!(report.status(), SessionStatus::Failed);
    assert_eq!(
        report.view.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::DeadEnd)
    );
    assert_eq!(report.path(), vec!["start", "route"]);
    assert_eq!(harness.telephony.hangups.load(Ordering::SeqCst), 1);
    assert_eq!(
        harness.telephony.spoken(),
        vec!["We're sorry, something went wrong. Goodbye."]
    );
}

fn fan_out(policy: &str) -> Workflow {
    Workflow::new("parallel lookups")
        .node(node("start", "trigger", json!({})))
        .and_then(|w| {
            w.node(node(
                "fork",
                "parallel",
                json!({"joinNodeId": "merge", "policy": policy}),
            ))
        })
        .and_then(|w| {
            w.node(node(
                "profile",
                "variable",
                json!({"key": "tier", "value": "gold"}),
            ))
        })
        .and_then(|w| {
            w.node(node(
                "orders",
                "api",
                json!({"endpoint": "https://shop.example/fail", "method": "GET", "timeout": 1000}),
            ))
        })
        .and_then(|w| w.node(node("merge", "join", json!({}))))
        .and_then(|w| w.node(node("oops", "error_handler", json!({}))))
        .and_then(|w| w.node(node("bye", "end", json!({}))))
        .and_then(|w| w.then("start", "fork"))
        .and_then(|w| w.then("fork", "profile"))
        .and_then(|w| w.then("fork", "orders"))
        .and_then(|w| w.then("profile", "merge"))
        .and_then(|w| w.then("orders", "merge"))
        .and_then(|w| w.then("merge", "bye"))
        .and_then(|w| w.connect("fork", "oops", NodeConnection::new(handles::ERROR)))
        .and_then(|w| w.then("oops", "bye"))
        .expect("valid workflow")
}

#[tokio::test]
async fn failing_branch_fails_the_group_by_default() {
    let harness = Harness::activate(fan_out("fail_fast"), Telephony::default()).await;

    let report = harness.call(json!({})).await;

    assert_eq!(report.status(), SessionStatus::Completed);
    assert_eq!(
        report.path(),
        vec!["start", "fork", "profile", "orders", "fork", "oops", "bye"]
    );
    let history = report.history();
    assert_eq!(history[2].branch.as_deref(), Some("fork#0"));
    assert_eq!(history[3].branch.as_deref(), Some("fork#1"));
    assert_eq!(history[3].status, ResultStatus::Error);
    assert_eq!(history[4].status, ResultStatus::Error);
    assert_eq!(history[4].branch, None);
    assert_eq!(report.variables["error"]["nodeId"], "fork");
}

#[tokio::test(start_paused = true)]
async fn group_failure_keeps_the_branch_error_kind() {
    let harness = Harness::activate(
        fan_out("fail_fast"),
        Telephony {
            stall_requests: true,
            ..Telephony::default()
        },
    )
    .await;

    let report = harness.call(json!({})).await;

    assert_eq!(report.status(), SessionStatus::Completed);
    assert_eq!(report.path().last(), Some(&"bye"));
    let group = report
        .history()
        .iter()
        .find(|r| r.node_id.as_str() == "fork" && r.status == ResultStatus::Error)
        .and_then(|r| r.error.clone())
        .expect("group failure recorded");
    assert_eq!(group.kind, ErrorKind::Timeout);
    assert!(group.message.starts_with("branch fork#1 failed"));
    assert_eq!(report.variables["error"]["kind"], "TimeoutError");
}

#[tokio::test]
async fn best_effort_group_rejoins_despite_failures() {
    let harness = Harness::activate(fan_out("best_effort"), Telephony::default()).await;

    let report = harness.call(json!({})).await;

    assert_eq!(report.status(), SessionStatus::Completed);
    assert_eq!(
        report.path(),
        vec!["start", "fork", "profile", "orders", "merge", "bye"]
    );
    assert_eq!(report.variables["tier"], "gold");
    let failed = &report.variables["nodes"]["fork"]["failedBranches"];
    assert_eq!(failed[0]["branch"], "fork#1");
    assert_eq!(failed[0]["error"]["kind"], "HandlerError");
}

#[tokio::test]
async fn workflow_error_handler_catches_unconnected_failures() {
    let workflow = Workflow::new("order status")
        .node(node("start", "trigger", json!({})))
        .and_then(|w| {
            w.node(node(
                "orders",
                "api",
                json!({"endpoint": "https://shop.example/fail", "method": "GET", "timeout": 1000}),
            ))
        })
        .and_then(|w| w.node(node("oops", "error_handler", json!({}))))
        .and_then(|w| w.node(node("bye", "end", json!({}))))
        .and_then(|w| w.then("start", "orders"))
        .and_then(|w| w.then("orders", "bye"))
        .and_then(|w| w.then("oops", "bye"))
        .map(|w| w.with_error_handler("oops"))
        .expect("valid workflow");
    let harness = Harness::activate(workflow, Telephony::default()).await;

    let report = harness.call(json!({})).await;

    assert_eq!(report.status(), SessionStatus::Completed);
    assert_eq!(report.path(), vec!["start", "orders", "oops", "bye"]);
    assert_eq!(report.variables["error"]["kind"], "HandlerError");
    assert_eq!(harness.telephony.hangups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unhandled_failure_apologizes_exactly_once() {
    let workflow = Workflow::new("order status")
        .node(node("start", "trigger", json!({})))
        .and_then(|w| {
            w.node(node(
                "orders",
                "api",
                json!({"endpoint": "https://shop.example/fail", "method": "GET", "timeout": 1000}),
            ))
        })
        .and_then(|w| w.node(node("bye", "end", json!({}))))
        .and_then(|w| w.then("start", "orders"))
        .and_then(|w| w.then("orders", "bye"))
        .expect("valid workflow");
    let harness = Harness::activate(workflow, Telephony::default()).await;

    let report = harness.call(json!({})).await;

    assert_eq!(report.status(), SessionStatus::Failed);
    assert_eq!(report.path(), vec!["start", "orders"]);
    assert_eq!(
        report.view.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::Handler)
    );
    assert_eq!(harness.telephony.hangups.load(Ordering::SeqCst), 1);
    assert_eq!(harness.telephony.spoken().len(), 1);

    let audited = harness.audit.reports().await;
    assert_eq!(audited.len(), 1);
    assert_eq!(audited[0].history().len(), 2);
}

#[tokio::test]
async fn collected_digits_resume_the_session() {
    let workflow = Workflow::new("pin entry")
        .node(node("start", "trigger", json!({})))
        .and_then(|w| {
            w.node(node(
                "pin",
                "dtmf",
                json!({"variable": "pin", "maxDigits": 4, "timeout": 60000}),
            ))
        })
        .and_then(|w| w.node(node("bye", "end", json!({}))))
        .and_then(|w| w.then("start", "pin"))
        .and_then(|w| w.then("pin", "bye"))
        .expect("valid workflow");
    let harness = Harness::activate(workflow, Telephony::default()).await;

    let handle = harness
        .engine
        .start_session(TriggerEvent::new(harness.workflow_id, "CA300"))
        .await
        .expect("session starts");
    let collection = loop {
        let pending = harness.telephony.collections.lock().unwrap().first().cloned();
        if let Some(collection) = pending {
            break collection;
        }
        tokio::task::yield_now().await;
    };
    assert_eq!(collection.variable, "pin");

    let wrong = harness
        .engine
        .resume(handle.session_id(), "not-a-token", Ok(Default::default()))
        .await;
    assert!(wrong.is_err());

    let payload: ResumePayload =
        serde_json::from_value(json!({"variables": {"pin": "4321"}})).expect("payload");
    harness
        .engine
        .resume(handle.session_id(), &collection.resume_token, payload.into_result())
        .await
        .expect("resume accepted");

    let report = handle.wait().await.expect("session finishes");
    assert_eq!(report.status(), SessionStatus::Completed);
    assert_eq!(report.path(), vec!["start", "pin", "bye"]);
    assert_eq!(report.variables["pin"], "4321");
}

/// Shared store that refuses every write.
struct ReadOnlyShared;

#[async_trait]
impl SharedVariables for ReadOnlyShared {
    async fn get(&self, _key: &str) -> Result<Option<JsonValue>, StoreError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Option<JsonValue>) -> Result<(), StoreError> {
        Err(StoreError::Io {
            reason: "replica is read-only".to_string(),
        })
    }
}

#[tokio::test]
async fn rejected_shared_write_fails_the_node() {
    let workflow = Workflow::new("campaign counter")
        .node(node("start", "trigger", json!({})))
        .and_then(|w| {
            w.node(node(
                "save",
                "variable",
                json!({"key": "lastCaller", "value": "{{ trigger.from }}", "scope": "shared"}),
            ))
        })
        .and_then(|w| w.node(node("oops", "error_handler", json!({}))))
        .and_then(|w| w.node(node("bye", "end", json!({}))))
        .and_then(|w| w.then("start", "save"))
        .and_then(|w| w.then("save", "bye"))
        .and_then(|w| w.connect("save", "oops", NodeConnection::new(handles::ERROR)))
        .and_then(|w| w.then("oops", "bye"))
        .expect("valid workflow");
    let workflow_id = workflow.id;
    let engine = Engine::builder()
        .with_store(Arc::new(InMemoryWorkflowStore::with_workflows([workflow])))
        .with_shared_variables(Arc::new(ReadOnlyShared))
        .build();
    engine.activate(workflow_id).await.expect("workflow activates");

    let report = engine
        .start_session(
            TriggerEvent::new(workflow_id, "CA200").with_payload(json!({"from": "+15550142"})),
        )
        .await
        .expect("session starts")
        .wait()
        .await
        .expect("session finishes");

    assert_eq!(report.status(), SessionStatus::Completed);
    assert_eq!(report.path(), vec!["start", "save", "oops", "bye"]);
    let save = &report.history()[1];
    assert_eq!(save.status, ResultStatus::Error);
    let error = save.error.as_ref().expect("error recorded");
    assert_eq!(error.kind, ErrorKind::Handler);
    assert!(error.message.contains("lastCaller"));
    assert_eq!(report.variables["error"]["kind"], "HandlerError");
}
