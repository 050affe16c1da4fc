//! HTTP error responses.
//!
//! Bridges [`RaffleError`] to HTTP: every error kind maps to one status code and
//! one machine-readable code, returned as `{"code": "...", "message": "..."}`.

use crate::error::RaffleError;
use axum::{
    Json,
    extract::rejection::PathRejection,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Error type for HTTP handlers
#[derive(Debug)]
pub struct ApiError(pub RaffleError);

impl From<RaffleError> for ApiError {
    fn from(error: RaffleError) -> Self {
        Self(error)
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        match rejection {
            PathRejection::FailedToDeserializePathParams(inner) => {
                Self(RaffleError::Validation(inner.body_text()))
            }
            other => Self(RaffleError::Storage(other.body_text())),
        }
    }
}

impl ApiError {
    /// HTTP status and error code for the wrapped error
    #[must_use]
    pub const fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self.0 {
            RaffleError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            RaffleError::StateConflict(_) => (StatusCode::CONFLICT, "STATE_CONFLICT"),
            RaffleError::TransientConflict { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "TRANSIENT_CONFLICT")
            }
            RaffleError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            RaffleError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            RaffleError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            RaffleError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR"),
        }
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: &'static str,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = if status.is_server_error() && !self.0.is_transient() {
            tracing::error!(status = %status, code, error = %self.0, "Internal server error");
            "An internal error occurred".to_string()
        } else {
            self.0.to_string()
        };

        let mut response = (status, Json(ErrorResponse { code, message })).into_response();
        if self.0.is_transient() {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}
