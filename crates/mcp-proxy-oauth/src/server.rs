//! The Authorization Server: client registry, authorization flow, token
//! service and token validator over one shared state.
//!
//! All maps live behind a single reader/writer lock. Mutations take the write
//! lock, release it, then rewrite the snapshot. The validator only takes the
//! read lock and hands expiry cleanup off to a background task.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use mcp_proxy_config::OAuth2Config;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::credentials::CredentialStore;
use crate::error::{OAuthError, Result, TemplateError};
use crate::metadata::{ProtectedResourceMetadata, ServerMetadata};
use crate::model::{AccessToken, AuthorizationCode, RegisteredClient};
use crate::pkce::{
    AUTH_CODE_LEN, CLIENT_ID_LEN, CLIENT_SECRET_LEN, TOKEN_LEN, random_string, verify_s256,
};
use crate::store::{Snapshot, SnapshotStore};
use crate::templates::{AuthorizePage, SuccessPage, Templates};

/// Redirect URIs a client may register.
pub const ALLOWED_CALLBACK_URLS: [&str; 2] = [
    "https://claude.ai/api/mcp/auth_callback",
    "https://claude.com/api/mcp/auth_callback",
];

/// Lifetime of an authorization code.
const AUTH_CODE_TTL: TimeDelta = TimeDelta::minutes(10);

/// Lifetime used when token expiration is disabled.
const NO_EXPIRY_TTL: TimeDelta = TimeDelta::days(3650);

const DEFAULT_CLIENT_NAME: &str = "Claude";
const DEFAULT_RESOURCE_NAME: &str = "MCP Proxy";
const LOGIN_FAILED_MESSAGE: &str = "Invalid username or password. Please try again.";

// ============================================================================
// Requests and responses
// ============================================================================

/// Dynamic client registration request (RFC 7591 subset).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RegistrationRequest {
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub scope: String,
    pub client_name: String,
}

/// Dynamic client registration response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub client_id_issued_at: i64,
}

/// Query parameters of `GET /oauth/authorize`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthorizeParams {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    pub scope: String,
    pub state: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub resource: String,
}

/// Form fields of `POST /oauth/authorize`.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub state: String,
    pub code_challenge: String,
    pub resource: String,
}

impl std::fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginForm")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Bad credentials: show the form again with a generic error.
    Rejected(AuthorizePage),
    /// A code was issued; the page sends the browser back to the client.
    Authorized(SuccessPage),
}

/// Token endpoint request, from either a JSON or a form body.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: String,
    pub redirect_uri: String,
    pub client_id: String,
    pub code_verifier: String,
    pub resource: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRequest")
            .field("grant_type", &self.grant_type)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Default)]
struct State {
    clients: HashMap<String, RegisteredClient>,
    auth_codes: HashMap<String, AuthorizationCode>,
    access_tokens: HashMap<String, AccessToken>,
}

/// OAuth 2.1 Authorization Server.
///
/// Construct once at startup and share it behind an `Arc`.
pub struct AuthorizationServer {
    base_url: String,
    credentials: CredentialStore,
    token_ttl: TimeDelta,
    state: Arc<RwLock<State>>,
    store: Arc<SnapshotStore>,
    templates: Templates,
}

impl AuthorizationServer {
    /// Build from configuration, loading persisted state and templates.
    pub fn new(base_url: &str, config: &OAuth2Config) -> std::result::Result<Self, TemplateError> {
        let token_ttl = if config.disable_token_expiration {
            NO_EXPIRY_TTL
        } else {
            TimeDelta::from_std(config.token_ttl())
                .map_or(NO_EXPIRY_TTL, |ttl| ttl.min(NO_EXPIRY_TTL))
        };
        let store = SnapshotStore::open(&config.resolved_persistence_dir());
        let templates = Templates::load(&config.resolved_template_dir())?;
        let credentials = CredentialStore::new(config.users.clone(), config.allowed_ips.clone());

        tracing::info!(
            snapshot = %store.path().display(),
            templates = templates.kind(),
            token_ttl_secs = token_ttl.num_seconds(),
            users = config.users.len(),
            "OAuth authorization server configured"
        );
        Ok(Self::from_parts(base_url, credentials, token_ttl, store, templates))
    }

    /// Build from explicit parts and load whatever `store` holds.
    pub fn from_parts(
        base_url: &str,
        credentials: CredentialStore,
        token_ttl: TimeDelta,
        store: SnapshotStore,
        templates: Templates,
    ) -> Self {
        let loaded = store.load();
        let state = State {
            clients: loaded.clients,
            auth_codes: HashMap::new(),
            access_tokens: loaded.access_tokens,
        };
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            token_ttl,
            state: Arc::new(RwLock::new(state)),
            store: Arc::new(store),
            templates,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    pub fn has_client(&self, client_id: &str) -> bool {
        self.state.read().clients.contains_key(client_id)
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    pub fn server_metadata(&self, backend: Option<&str>) -> ServerMetadata {
        ServerMetadata::new(&self.base_url, backend)
    }

    pub fn protected_resource_metadata(&self, backend: &str) -> ProtectedResourceMetadata {
        ProtectedResourceMetadata::new(&self.base_url, backend)
    }

    // ------------------------------------------------------------------------
    // Client registry
    // ------------------------------------------------------------------------

    /// Gate registration on the IP allowlist.
    pub fn check_registration_ip(&self, ip: Option<std::net::IpAddr>) -> Result<()> {
        if self.credentials.is_ip_allowed(ip) {
            if self.credentials.restricts_registration() {
                tracing::debug!(ip = ?ip, "Client registration allowed by IP allowlist");
            }
            Ok(())
        } else {
            tracing::warn!(ip = ?ip, "Client registration blocked by IP allowlist");
            Err(OAuthError::AccessDenied(
                "Client registration not allowed from this IP".to_string(),
            ))
        }
    }

    /// Register a client. Callers check the IP allowlist first.
    pub fn register(&self, request: RegistrationRequest) -> Result<RegistrationResponse> {
        if request.redirect_uris.is_empty() {
            return Err(OAuthError::InvalidRedirectUri(
                "At least one redirect URI is required".to_string(),
            ));
        }
        if let Some(uri) = request
            .redirect_uris
            .iter()
            .find(|uri| !ALLOWED_CALLBACK_URLS.contains(&uri.as_str()))
        {
            tracing::warn!(redirect_uri = %uri, "Client registration rejected: redirect URI not allowed");
            return Err(OAuthError::InvalidRedirectUri(
                "Redirect URI not allowed".to_string(),
            ));
        }

        let grant_types = if request.grant_types.is_empty() {
            vec!["authorization_code".to_string()]
        } else {
            request.grant_types
        };
        let client = RegisteredClient {
            client_id: random_string(CLIENT_ID_LEN),
            client_secret: random_string(CLIENT_SECRET_LEN),
            redirect_uris: request.redirect_uris,
            grant_types,
            created_at: Utc::now(),
            client_name: request.client_name,
        };
        let response = RegistrationResponse {
            client_id: client.client_id.clone(),
            client_secret: client.client_secret.clone(),
            redirect_uris: client.redirect_uris.clone(),
            grant_types: client.grant_types.clone(),
            client_id_issued_at: client.created_at.timestamp(),
        };

        self.state
            .write()
            .clients
            .insert(client.client_id.clone(), client);
        self.persist();

        tracing::info!(client_id = %response.client_id, "Registered OAuth client");
        Ok(response)
    }

    // ------------------------------------------------------------------------
    // Authorization flow
    // ------------------------------------------------------------------------

    /// Validate an authorization request and build the login page.
    ///
    /// The client is not looked up here; unknown clients surface as
    /// `invalid_client` at the token endpoint so they re-register.
    pub fn authorization_request(&self, params: &AuthorizeParams) -> Result<AuthorizePage> {
        if params.client_id.is_empty()
            || params.redirect_uri.is_empty()
            || params.response_type != "code"
        {
            return Err(OAuthError::InvalidRequest(
                "Missing or invalid required parameters".to_string(),
            ));
        }
        tracing::debug!(
            client_id = %params.client_id,
            resource = %params.resource,
            "Authorization request, showing login page"
        );
        Ok(login_page(
            &params.client_id,
            &params.redirect_uri,
            &params.response_type,
            &params.scope,
            &params.state,
            &params.code_challenge,
            &params.resource,
            "",
        ))
    }

    /// Authenticate a login form and, on success, issue an authorization code.
    pub fn login(&self, form: LoginForm) -> Result<LoginOutcome> {
        if !self.credentials.has_users() {
            return Err(OAuthError::ServerError(
                "Authentication not configured".to_string(),
            ));
        }

        if !self.credentials.verify(&form.username, &form.password) {
            tracing::warn!(username = %form.username, client_id = %form.client_id, "Login failed");
            return Ok(LoginOutcome::Rejected(login_page(
                &form.client_id,
                &form.redirect_uri,
                "code",
                &form.scope,
                &form.state,
                &form.code_challenge,
                &form.resource,
                LOGIN_FAILED_MESSAGE,
            )));
        }

        let mut redirect = parse_redirect_uri(&form.redirect_uri)?;
        let code = AuthorizationCode {
            code: random_string(AUTH_CODE_LEN),
            client_id: form.client_id,
            redirect_uri: form.redirect_uri,
            scope: form.scope,
            code_challenge: form.code_challenge,
            resource: form.resource,
            username: form.username.clone(),
            expires_at: Utc::now() + AUTH_CODE_TTL,
        };

        let query: Vec<(String, String)> = redirect
            .query_pairs()
            .filter(|(k, _)| k != "code" && k != "state")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = redirect.query_pairs_mut();
            pairs.clear().extend_pairs(query);
            pairs.append_pair("code", &code.code);
            if !form.state.is_empty() {
                pairs.append_pair("state", &form.state);
            }
        }

        tracing::info!(username = %form.username, client_id = %code.client_id, "Login succeeded, issued authorization code");
        self.state
            .write()
            .auth_codes
            .insert(code.code.clone(), code);

        Ok(LoginOutcome::Authorized(SuccessPage {
            redirect_url: redirect.to_string(),
            username: form.username,
        }))
    }

    // ------------------------------------------------------------------------
    // Token service
    // ------------------------------------------------------------------------

    /// Handle a token endpoint request.
    pub fn exchange(&self, request: TokenRequest) -> Result<TokenResponse> {
        match request.grant_type.as_str() {
            "authorization_code" => self.exchange_code(request),
            "refresh_token" => self.refresh(request),
            other => {
                tracing::debug!(grant_type = %other, "Unsupported grant type");
                Err(OAuthError::UnsupportedGrantType(
                    "Only authorization_code and refresh_token grant types are supported"
                        .to_string(),
                ))
            }
        }
    }

    fn exchange_code(&self, request: TokenRequest) -> Result<TokenResponse> {
        if request.code.is_empty() || request.redirect_uri.is_empty() || request.client_id.is_empty()
        {
            return Err(OAuthError::InvalidRequest(
                "Missing required parameters".to_string(),
            ));
        }
        self.require_client(&request.client_id)?;

        let code = self
            .state
            .write()
            .auth_codes
            .remove(&request.code)
            .ok_or_else(|| {
                OAuthError::InvalidGrant("Invalid or expired authorization code".to_string())
            })?;

        if code.is_expired(Utc::now()) {
            return Err(OAuthError::InvalidGrant(
                "Authorization code expired".to_string(),
            ));
        }
        if code.client_id != request.client_id || code.redirect_uri != request.redirect_uri {
            return Err(OAuthError::InvalidGrant(
                "Authorization code does not match client".to_string(),
            ));
        }
        if !request.code_verifier.is_empty()
            && !code.code_challenge.is_empty()
            && !verify_s256(&request.code_verifier, &code.code_challenge)
        {
            tracing::warn!(client_id = %request.client_id, "PKCE verification failed");
            return Err(OAuthError::InvalidGrant(
                "PKCE verification failed".to_string(),
            ));
        }

        let resource = if request.resource.is_empty() {
            code.resource
        } else {
            request.resource
        };
        let token = self.new_token(request.client_id, code.scope, resource, code.username);
        let response = self.token_response(&token);
        self.state
            .write()
            .access_tokens
            .insert(token.token.clone(), token);
        self.persist();

        tracing::info!(client_id = %code.client_id, "Issued access token");
        Ok(response)
    }

    fn refresh(&self, request: TokenRequest) -> Result<TokenResponse> {
        if request.refresh_token.is_empty() {
            return Err(OAuthError::InvalidRequest(
                "Missing refresh_token".to_string(),
            ));
        }
        self.require_client(&request.client_id)?;

        let response = {
            let mut state = self.state.write();
            let key = state
                .access_tokens
                .iter()
                .find(|(_, t)| t.refresh_token == request.refresh_token)
                .map(|(key, t)| (key.clone(), t.client_id == request.client_id));
            let key = match key {
                None => {
                    return Err(OAuthError::InvalidGrant(
                        "Invalid refresh token".to_string(),
                    ));
                }
                Some((_, false)) => {
                    return Err(OAuthError::InvalidGrant(
                        "Refresh token does not belong to client".to_string(),
                    ));
                }
                Some((key, true)) => key,
            };
            let old = state
                .access_tokens
                .remove(&key)
                .ok_or_else(|| OAuthError::InvalidGrant("Invalid refresh token".to_string()))?;
            let token = self.new_token(old.client_id, old.scope, old.resource, old.username);
            let response = self.token_response(&token);
            state.access_tokens.insert(token.token.clone(), token);
            response
        };
        self.persist();

        tracing::info!(client_id = %request.client_id, "Refreshed access token");
        Ok(response)
    }

    fn require_client(&self, client_id: &str) -> Result<()> {
        if self.has_client(client_id) {
            Ok(())
        } else {
            tracing::info!(client_id = %client_id, "Unknown client at token endpoint");
            Err(OAuthError::InvalidClient("Client not found".to_string()))
        }
    }

    fn new_token(
        &self,
        client_id: String,
        scope: String,
        resource: String,
        username: String,
    ) -> AccessToken {
        AccessToken {
            token: random_string(TOKEN_LEN),
            refresh_token: random_string(TOKEN_LEN),
            client_id,
            scope,
            resource,
            expires_at: Utc::now()
                .checked_add_signed(self.token_ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            username,
        }
    }

    fn token_response(&self, token: &AccessToken) -> TokenResponse {
        TokenResponse {
            access_token: token.token.clone(),
            token_type: "Bearer".to_string(),
            expires_in: self.token_ttl.num_seconds(),
            refresh_token: token.refresh_token.clone(),
            scope: token.scope.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Token validator
    // ------------------------------------------------------------------------

    /// Look up a bearer token.
    ///
    /// Expired tokens are rejected immediately; their removal and the snapshot
    /// rewrite happen off the calling path.
    pub fn validate(&self, token: &str) -> Option<AccessToken> {
        {
            let state = self.state.read();
            let entry = state.access_tokens.get(token)?;
            if !entry.is_expired(Utc::now()) {
                return Some(entry.clone());
            }
        }
        self.schedule_expiry_cleanup(token.to_string());
        None
    }

    fn schedule_expiry_cleanup(&self, token: String) {
        let state = Arc::clone(&self.state);
        let store = Arc::clone(&self.store);
        let cleanup = move || {
            let removed = {
                let mut guard = state.write();
                let expired = guard
                    .access_tokens
                    .get(&token)
                    .is_some_and(|t| t.is_expired(Utc::now()));
                expired && guard.access_tokens.remove(&token).is_some()
            };
            if removed {
                tracing::debug!("Removed expired access token");
                persist(&state, &store);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(cleanup);
            }
            Err(_) => cleanup(),
        }
    }

    fn persist(&self) {
        persist(&self.state, &self.store);
    }
}

impl std::fmt::Debug for AuthorizationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationServer")
            .field("base_url", &self.base_url)
            .field("snapshot", &self.store.path())
            .field("templates", &self.templates)
            .finish_non_exhaustive()
    }
}

/// Rewrite the snapshot. Failures are logged; in-memory state stays authoritative.
fn persist(state: &RwLock<State>, store: &SnapshotStore) {
    let snapshot = {
        let state = state.read();
        Snapshot {
            clients: state.clients.clone(),
            access_tokens: state.access_tokens.clone(),
            saved_at: Utc::now(),
        }
    };
    if let Err(e) = store.save(&snapshot) {
        tracing::error!(error = %e, "Failed to persist OAuth state");
    }
}

/// The redirect target must be an absolute http(s) URL before a code is attached.
fn parse_redirect_uri(raw: &str) -> Result<url::Url> {
    url::Url::parse(raw)
        .ok()
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .ok_or_else(|| OAuthError::InvalidRequest("Invalid redirect_uri".to_string()))
}

/// Display name for the requested resource: the last path segment of its URL.
fn resource_name(resource: &str) -> String {
    if resource.is_empty() {
        return DEFAULT_RESOURCE_NAME.to_string();
    }
    let path = match url::Url::parse(resource) {
        Ok(url) => url.path().to_string(),
        Err(_) => resource.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    path.trim_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_RESOURCE_NAME.to_string())
}

#[allow(clippy::too_many_arguments)]
fn login_page(
    client_id: &str,
    redirect_uri: &str,
    response_type: &str,
    scope: &str,
    state: &str,
    code_challenge: &str,
    resource: &str,
    error_message: &str,
) -> AuthorizePage {
    AuthorizePage {
        client_id: client_id.to_string(),
        client_name: DEFAULT_CLIENT_NAME.to_string(),
        resource_name: resource_name(resource),
        redirect_uri: redirect_uri.to_string(),
        response_type: response_type.to_string(),
        scope: scope.to_string(),
        state: state.to_string(),
        code_challenge: code_challenge.to_string(),
        resource: resource.to_string(),
        error_message: error_message.to_string(),
    }
}
