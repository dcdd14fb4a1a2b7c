//! API error handling.
//!
//! Structured error responses with HTTP status codes and request tracking.
//! Engine errors map 1:1 from their kind; infrastructure details never leak
//! to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

use crate::errors::{EngineError, ErrorKind};

/// Top-level API error response with request tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code (VALIDATION, INVALID_STATE, ...).
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error carried through handlers alongside the request id.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    /// An engine operation failed; status derives from the error's kind.
    Engine(EngineError),
    /// Request was malformed before it reached the engine.
    BadRequest(String),
    /// No `x-user-id` header on an endpoint that needs one.
    Unauthorized,
}

impl ApiError {
    pub fn engine(request_id: String, err: EngineError) -> Self {
        Self {
            kind: ApiErrorKind::Engine(err),
            request_id,
        }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn unauthorized(request_id: String) -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized,
            request_id,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::Engine(err) => write!(f, "[{}] {}", self.request_id, err),
            ApiErrorKind::BadRequest(msg) => {
                write!(f, "[{}] Bad Request: {}", self.request_id, msg)
            }
            ApiErrorKind::Unauthorized => write!(f, "[{}] Unauthorized", self.request_id),
        }
    }
}

impl std::error::Error for ApiError {}

fn engine_status(kind: ErrorKind) -> (StatusCode, &'static str) {
    match kind {
        ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION"),
        ErrorKind::State => (StatusCode::BAD_REQUEST, "INVALID_STATE"),
        ErrorKind::ResourceExhausted => (StatusCode::BAD_REQUEST, "RESOURCE_EXHAUSTED"),
        ErrorKind::CommitmentMismatch => (StatusCode::BAD_REQUEST, "COMMITMENT_MISMATCH"),
        ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        ErrorKind::Infrastructure => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self.kind {
            ApiErrorKind::Engine(err) => {
                let (status, code) = engine_status(err.kind());
                // Clients get a generic message for infrastructure faults;
                // the real cause goes to the log.
                let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    error!("Request {} failed: {}", self.request_id, err);
                    "internal error".to_string()
                } else {
                    err.to_string()
                };
                (status, code, message)
            }
            ApiErrorKind::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiErrorKind::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "missing x-user-id header".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            request_id: self.request_id,
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_engine_errors_map_to_status() {
        let cases = [
            (
                EngineError::InvalidArgument {
                    field: "entry_cost",
                    reason: "must be positive".to_string(),
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::PotNotFound(Uuid::new_v4()),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::Storage("backend offline".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let (status, _) = engine_status(err.kind());
            assert_eq!(status, expected, "wrong status for {:?}", err);
        }
    }

    #[test]
    fn test_infrastructure_message_is_generic() {
        let api_err = ApiError::engine(
            "req-1".to_string(),
            EngineError::Storage("connection refused to 10.0.0.5".to_string()),
        );
        let response = api_err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
