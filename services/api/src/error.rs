use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lifecycle::EngineError;
use query::QueryError;
use serde_json::json;
use tracing::warn;
use verification::VerificationError;

/// Error body returned by every handler: `{ "error": "..." }`, plus
/// `"deferred"` when the verifier could not be reached.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub deferred: Option<bool>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            deferred: None,
        }
    }
}

pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::InvalidTransition { .. } | EngineError::SettlementConflict(_) => {
            StatusCode::CONFLICT
        }
        EngineError::InvalidBetReference(_) => StatusCode::NOT_FOUND,
        EngineError::VerificationUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        EngineError::VerificationCancelled(_) => StatusCode::REQUEST_TIMEOUT,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            warn!("request failed: {}", err);
        }
        let deferred = match &err {
            EngineError::VerificationUnavailable { deferred, .. } => Some(*deferred),
            _ => None,
        };
        Self {
            deferred,
            ..Self::new(status, err.to_string())
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let status = match err {
            QueryError::UnknownUser(_) | QueryError::UnknownBet(_) => StatusCode::NOT_FOUND,
            QueryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        let status = match err {
            VerificationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            VerificationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.deferred {
            Some(deferred) => json!({ "error": self.message, "deferred": deferred }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}
