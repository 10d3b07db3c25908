//! Authentication and per-backend user filtering.
//!
//! A backend protected by OAuth accepts only bearer tokens issued by the
//! Authorization Server. Otherwise a non-empty `authTokens` list gates it, and a
//! backend with neither is open.
//!
//! # Security
//!
//! Static token comparison is constant time. Token values are never logged.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, header::WWW_AUTHENTICATE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use mcp_proxy_oauth::{credentials::constant_time_eq, protected_resource_url};
use serde::{Deserialize, Serialize};

use crate::state::BackendState;

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Who a request was authenticated as.
///
/// Inserted into request extensions by [`auth_middleware`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Identity {
    /// The backend requires no authentication.
    Anonymous,
    /// Matched one of the configured static tokens.
    StaticToken,
    /// Holder of an OAuth access token.
    OAuth { username: String, client_id: String },
}

impl Identity {
    /// Username for the user filter; empty unless authenticated via OAuth.
    pub fn username(&self) -> &str {
        match self {
            Identity::OAuth { username, .. } => username,
            _ => "",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth Error
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication error.
#[derive(Debug, Clone)]
pub enum AuthError {
    /// Missing authorization header.
    MissingToken { challenge: Option<String> },
    /// Header present but not a bearer token.
    InvalidFormat { challenge: Option<String> },
    /// Unknown or expired token.
    InvalidToken { challenge: Option<String> },
    /// The user filter rejected the authenticated user.
    UserNotAllowed,
}

impl AuthError {
    fn challenge(&self) -> Option<&str> {
        match self {
            AuthError::MissingToken { challenge }
            | AuthError::InvalidFormat { challenge }
            | AuthError::InvalidToken { challenge } => challenge.as_deref(),
            AuthError::UserNotAllowed => None,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingToken { .. } => write!(f, "Missing authorization token"),
            AuthError::InvalidFormat { .. } => write!(f, "Invalid authorization format"),
            AuthError::InvalidToken { .. } => write!(f, "Invalid token"),
            AuthError::UserNotAllowed => write!(f, "User not allowed"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::UserNotAllowed => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "code": status.as_u16(),
        });

        let mut response = (status, Json(body)).into_response();
        if let Some(challenge) = self.challenge()
            && let Ok(value) = HeaderValue::from_str(challenge)
        {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        response
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Middleware
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication middleware function.
///
/// Validates the request and injects the [`Identity`] into request extensions.
pub async fn auth_middleware(
    State(backend): State<BackendState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = match validate_request(&request, &backend) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(backend = %backend.name, error = %e, "Rejected request");
            return Err(e);
        }
    };

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// User filter middleware; runs after [`auth_middleware`].
pub async fn user_filter_middleware(
    State(backend): State<BackendState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    if let Some(filter) = backend.user_filter() {
        let username = request
            .extensions()
            .get::<Identity>()
            .map(Identity::username)
            .unwrap_or_default();
        if !filter.is_user_allowed(username) {
            tracing::warn!(backend = %backend.name, user = %username, "User blocked by filter");
            return Err(AuthError::UserNotAllowed);
        }
    }
    Ok(next.run(request).await)
}

/// Validate a request and return the identity.
fn validate_request(request: &Request<Body>, backend: &BackendState) -> Result<Identity, AuthError> {
    if let Some(server) = &backend.oauth {
        let challenge = Some(format!(
            "Bearer resource_metadata=\"{}\"",
            protected_resource_url(&backend.base_url, &backend.name)
        ));
        let token = bearer_token(request, &challenge)?;
        let Some(access) = server.validate(token) else {
            return Err(AuthError::InvalidToken { challenge });
        };
        tracing::debug!(backend = %backend.name, client_id = %access.client_id, "OAuth token accepted");
        return Ok(Identity::OAuth {
            username: access.username,
            client_id: access.client_id,
        });
    }

    let tokens = backend.auth_tokens();
    if tokens.is_empty() {
        return Ok(Identity::Anonymous);
    }
    let token = bearer_token(request, &None)?;
    if tokens.iter().any(|t| constant_time_eq(token, t)) {
        Ok(Identity::StaticToken)
    } else {
        Err(AuthError::InvalidToken { challenge: None })
    }
}

/// Extract the bearer token from the `Authorization` header.
fn bearer_token<'a>(
    request: &'a Request<Body>,
    challenge: &Option<String>,
) -> Result<&'a str, AuthError> {
    let Some(header) = request.headers().get(AUTHORIZATION) else {
        return Err(AuthError::MissingToken {
            challenge: challenge.clone(),
        });
    };
    let value = header.to_str().map_err(|_| AuthError::InvalidFormat {
        challenge: challenge.clone(),
    })?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::InvalidFormat {
            challenge: challenge.clone(),
        })?
        .trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken {
            challenge: challenge.clone(),
        });
    }
    Ok(token)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
