//! Gateway error types and their HTTP mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use securag_audit::AuditStoreError;
use serde_json::json;
use thiserror::Error;

/// Gateway-level errors.
///
/// Flagged content is deliberately *not* an error here; flag outcomes are
/// part of the regular 200 response body.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("audit persistence is disabled")]
    WritesDisabled,

    #[error("audit record conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::InvalidRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message })),
            )
                .into_response(),
            GatewayError::WritesDisabled => (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "message": "Auditing disabled on the secuRAG server. \
                                All audit operations are forbidden."
                })),
            )
                .into_response(),
            GatewayError::Conflict(message) => (
                StatusCode::CONFLICT,
                Json(json!({ "error": message })),
            )
                .into_response(),
            GatewayError::Internal(message) => {
                // The detail never leaks to the client; it goes to the log.
                tracing::error!(error = %message, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "detail": "An error occurred" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<AuditStoreError> for GatewayError {
    fn from(err: AuditStoreError) -> Self {
        match err {
            AuditStoreError::Conflict(message) => GatewayError::Conflict(message),
            other => GatewayError::Internal(other.to_string()),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
