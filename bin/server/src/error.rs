//! HTTP-facing errors.
//!
//! Engine reports are mapped onto status codes by their current context.
//! Store and internal failures are logged and answered without detail.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use callflow_engine::{ActivationError, EngineError};
use rootcause::Report;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    /// A path parameter or body could not be understood.
    BadRequest { reason: String },
    /// The addressed workflow or session does not exist.
    NotFound { what: String },
    /// The request conflicts with the current state.
    Conflict { reason: String },
    /// The workflow failed validation.
    Invalid { errors: Vec<String> },
    /// Something failed on our side.
    Internal { details: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest { reason } => write!(f, "bad request: {reason}"),
            Self::NotFound { what } => write!(f, "{what} not found"),
            Self::Conflict { reason } => write!(f, "conflict: {reason}"),
            Self::Invalid { errors } => {
                write!(f, "workflow is invalid: {}", errors.join("; "))
            }
            Self::Internal { details } => write!(f, "internal error: {details}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<Report<EngineError>> for ApiError {
    fn from(report: Report<EngineError>) -> Self {
        match report.current_context() {
            EngineError::WorkflowNotActive { workflow_id } => Self::Conflict {
                reason: format!("workflow {workflow_id} is not active"),
            },
            EngineError::NoTrigger { .. } | EngineError::TriggerNotFound { .. } => {
                Self::BadRequest {
                    reason: report.current_context().to_string(),
                }
            }
            EngineError::SessionNotFound { session_id } => Self::NotFound {
                what: format!("session {session_id}"),
            },
            EngineError::UnknownResumeToken { .. } => Self::Conflict {
                reason: report.current_context().to_string(),
            },
            EngineError::SessionAborted { .. } | EngineError::Store { .. } => Self::Internal {
                details: report.to_string(),
            },
        }
    }
}

impl From<Report<ActivationError>> for ApiError {
    fn from(report: Report<ActivationError>) -> Self {
        match report.current_context() {
            ActivationError::NotFound { workflow_id } => Self::NotFound {
                what: format!("workflow {workflow_id}"),
            },
            ActivationError::Invalid { errors, .. } => Self::Invalid {
                errors: errors.clone(),
            },
            ActivationError::Store { .. } => Self::Internal {
                details: report.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::BadRequest { reason } => (StatusCode::BAD_REQUEST, json!({ "error": reason })),
            Self::NotFound { what } => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("{what} not found") }),
            ),
            Self::Conflict { reason } => (StatusCode::CONFLICT, json!({ "error": reason })),
            Self::Invalid { errors } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "workflow failed validation", "errors": errors }),
            ),
            Self::Internal { details } => {
                tracing::error!(%details, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
