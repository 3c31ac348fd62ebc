use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};
use triage_engine::{ErrorKind, TriageError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Triage(#[from] TriageError),

    /// Body or query string could not be decoded.
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Triage(e) => match e.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::InvalidState | ErrorKind::ConcurrencyConflict => StatusCode::CONFLICT,
                ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::AuditInconsistency => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn kind(&self) -> ErrorKind {
        match self {
            ApiError::BadRequest(_) => ErrorKind::Validation,
            ApiError::Triage(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        if status.is_server_error() {
            error!(%kind, "Request failed: {}", self);
        } else {
            debug!(%kind, "Request rejected: {}", self);
        }

        let body = Json(json!({
            "status": "error",
            "kind": kind,
            "message": self.to_string(),
            "retryable": kind.is_retryable(),
            "suggestedAction": kind.suggested_action(),
        }));

        (status, body).into_response()
    }
}
