/// Unified error types for the Castlight overlay server
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the overlay server
#[derive(Error, Debug)]
pub enum OverlayError {
    /// Live connection to a platform failed or timed out
    #[error("Platform connection error: {0}")]
    Connection(String),

    /// Initial connect did not resolve within the bounded timeout
    #[error("Connection timed out after {0} seconds")]
    ConnectTimeout(u64),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed platform event payload
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Document (flat-file) storage errors
    #[error("Document store error: {0}")]
    Document(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON error response format used by the query API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert OverlayError to HTTP response
impl IntoResponse for OverlayError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            OverlayError::Validation(_) | OverlayError::MalformedEvent(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            OverlayError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NotFound",
                self.to_string(),
            ),
            OverlayError::Connection(_) | OverlayError::ConnectTimeout(_) => (
                StatusCode::BAD_GATEWAY,
                "UpstreamUnavailable",
                self.to_string(),
            ),
            OverlayError::Document(_)
            | OverlayError::Internal(_)
            | OverlayError::Io(_)
            | OverlayError::Json(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for overlay operations
pub type Result<T> = std::result::Result<T, OverlayError>;
