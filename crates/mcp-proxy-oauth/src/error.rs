//! Error types for the Authorization Server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, OAuthError>;

/// OAuth protocol errors, rendered as `{error, error_description}` bodies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OAuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error("invalid_client: {0}")]
    InvalidClient(String),

    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    #[error("invalid_redirect_uri: {0}")]
    InvalidRedirectUri(String),

    #[error("access_denied: {0}")]
    AccessDenied(String),

    #[error("server_error: {0}")]
    ServerError(String),
}

impl OAuthError {
    /// The wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidRedirectUri(_) => "invalid_redirect_uri",
            Self::AccessDenied(_) => "access_denied",
            Self::ServerError(_) => "server_error",
        }
    }

    /// HTTP status the error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Human-readable description, safe to return to the caller.
    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnsupportedGrantType(d)
            | Self::InvalidRedirectUri(d)
            | Self::AccessDenied(d)
            | Self::ServerError(d) => d,
        }
    }
}

/// Standard OAuth error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<&'a str>,
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = self.code(), "{}", self.description());
        } else {
            tracing::debug!(error = self.code(), "{}", self.description());
        }
        let body = ErrorBody {
            error: self.code(),
            error_description: Some(self.description()).filter(|d| !d.is_empty()),
        };
        (status, Json(body)).into_response()
    }
}

/// Errors reading or writing the persistence snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors parsing or rendering an HTML template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("{template}: {reason} at byte {offset}")]
    Parse {
        template: String,
        offset: usize,
        reason: String,
    },

    #[error("failed to read template '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("no template named '{0}'")]
    Missing(String),
}
