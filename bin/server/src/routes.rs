//! HTTP routes: call ingestion, session control, workflow activation.

use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use callflow_core::{SessionId, WorkflowId};
use callflow_engine::{Engine, ResumePayload, SessionView};
use callflow_workflow::TriggerEvent;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state of the HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: Engine,
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/calls", post(start_call))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(session_status).delete(cancel_session))
        .route("/sessions/{id}/resume", post(resume_session))
        .route("/workflows/{id}/activate", post(activate_workflow))
        .route("/workflows/{id}/deactivate", post(deactivate_workflow))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn parse_session_id(raw: &str) -> Result<SessionId, ApiError> {
    raw.parse().map_err(|e| ApiError::BadRequest {
        reason: format!("invalid session id `{raw}`: {e}"),
    })
}

fn parse_workflow_id(raw: &str) -> Result<WorkflowId, ApiError> {
    raw.parse().map_err(|e| ApiError::BadRequest {
        reason: format!("invalid workflow id `{raw}`: {e}"),
    })
}

async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

/// Starts a session for an inbound call.
async fn start_call(
    State(state): State<AppState>,
    Json(event): Json<TriggerEvent>,
) -> Result<(StatusCode, Json<JsonValue>), ApiError> {
    let call_id = event.call_id.clone();
    let handle = state.engine.start_session(event).await?;
    let session_id = handle.session_id();
    info!(%session_id, %call_id, "call accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "sessionId": session_id.to_string() })),
    ))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionView>> {
    Json(state.engine.active_sessions().await)
}

async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session_id = parse_session_id(&id)?;
    Ok(Json(state.engine.session_status(session_id).await?))
}

async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session_id = parse_session_id(&id)?;
    state.engine.cancel(session_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Body of a resume request: the token plus the operation's result.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResumeRequest {
    resume_token: String,
    #[serde(flatten)]
    payload: ResumePayload,
}

async fn resume_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ResumeRequest>,
) -> Result<StatusCode, ApiError> {
    let session_id = parse_session_id(&id)?;
    state
        .engine
        .resume(
            session_id,
            &request.resume_token,
            request.payload.into_result(),
        )
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let workflow_id = parse_workflow_id(&id)?;
    let report = state.engine.activate(workflow_id).await?;
    Ok(Json(json!({
        "workflowId": workflow_id.to_string(),
        "active": true,
        "warnings": report.warnings,
    })))
}

async fn deactivate_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JsonValue>, ApiError> {
    let workflow_id = parse_workflow_id(&id)?;
    let was_active = state.engine.deactivate(workflow_id).await?;
    Ok(Json(json!({
        "workflowId": workflow_id.to_string(),
        "active": false,
        "wasActive": was_active,
    })))
}
