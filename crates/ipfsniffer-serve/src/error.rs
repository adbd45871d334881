//! API error type and response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Invalid request parameters.
    #[error("{0}")]
    BadRequest(String),

    /// Document not found.
    #[error("not found")]
    NotFound,

    /// The search backend failed or is unreachable.
    #[error("{0}")]
    Backend(String),

    /// The server itself is misconfigured.
    #[error("{0}")]
    Misconfigured(String),
}

impl From<ipfsniffer_index::Error> for ApiError {
    fn from(err: ipfsniffer_index::Error) -> ApiError {
        if err.is_bad_request() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Backend(err.to_string())
        }
    }
}

/// JSON error body: `{"error": "<msg>"}`. Never a stack trace.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Backend(msg) => {
                tracing::error!(error = %msg, "search backend failure");
                (StatusCode::BAD_GATEWAY, "search failed".to_string())
            }
            ApiError::Misconfigured(msg) => {
                tracing::error!(error = %msg, "server misconfiguration");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
