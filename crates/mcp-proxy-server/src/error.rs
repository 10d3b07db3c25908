//! Error types for the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The accept loop failed.
    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),

    /// A backend URL in the configuration is unusable.
    #[error("Invalid URL for backend '{backend}': {reason}")]
    InvalidBackendUrl { backend: String, reason: String },

    /// A backend name cannot be used as a path segment.
    #[error("Invalid backend name '{backend}': {reason}")]
    InvalidBackendName { backend: String, reason: String },

    /// Request could not be read.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The backend did not answer in time.
    #[error("Backend '{backend}' timed out")]
    UpstreamTimeout { backend: String },

    /// The backend could not be reached or broke the connection.
    #[error("Backend '{backend}' unavailable: {reason}")]
    Upstream { backend: String, reason: String },

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Classify a failed upstream call.
    pub fn upstream(backend: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServerError::UpstreamTimeout {
                backend: backend.to_string(),
            }
        } else {
            // The URL may carry credentials in its query.
            ServerError::Upstream {
                backend: backend.to_string(),
                reason: err.without_url().to_string(),
            }
        }
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServerError::UpstreamTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "upstream_timeout"),
            ServerError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            ServerError::Bind { .. }
            | ServerError::Serve(_)
            | ServerError::InvalidBackendUrl { .. }
            | ServerError::InvalidBackendName { .. }
            | ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(status = %status, code, error = %message, "Server error");
        } else {
            tracing::warn!(status = %status, code, error = %message, "Client error");
        }

        let body = ErrorResponse {
            code: code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let timeout = ServerError::UpstreamTimeout {
            backend: "github".to_string(),
        };
        assert_eq!(timeout.into_response().status(), StatusCode::GATEWAY_TIMEOUT);

        let down = ServerError::Upstream {
            backend: "github".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(down.into_response().status(), StatusCode::BAD_GATEWAY);

        let bad = ServerError::BadRequest("body too large".to_string());
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
