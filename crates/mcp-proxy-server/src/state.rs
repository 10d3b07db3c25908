//! Application state shared across handlers.

use std::sync::Arc;

use mcp_proxy_config::{BackendConfig, Config, TransportType, UserFilterConfig};
use mcp_proxy_oauth::AuthorizationServer;
use url::Url;

use crate::error::{Result, ServerError};

/// Path segments served by the proxy itself.
const RESERVED_NAMES: &[&str] = &["health", "paths", "oauth", ".well-known"];

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<Config>,

    /// The Authorization Server (None unless OAuth is enabled for the proxy).
    pub oauth: Option<Arc<AuthorizationServer>>,

    /// Outbound HTTP client shared by every backend.
    pub http: reqwest::Client,
}

impl AppState {
    /// Create a new application state without OAuth.
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            oauth: None,
            http: reqwest::Client::new(),
        }
    }

    /// Attach the Authorization Server.
    pub fn with_oauth(mut self, server: Arc<AuthorizationServer>) -> Self {
        self.oauth = Some(server);
        self
    }

    /// Use a specific outbound client.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Public base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.config.mcp_proxy.base_url_trimmed()
    }

    /// Build per-backend state for every URL backend.
    ///
    /// Stdio backends are skipped with a warning. A backend with an unusable URL
    /// is skipped too, unless its `panicIfInvalid` option is set.
    pub fn backends(&self) -> Result<Vec<BackendState>> {
        let mut out = Vec::new();
        for (name, backend) in &self.config.mcp_servers {
            match backend.transport() {
                Some(TransportType::Sse | TransportType::StreamableHttp) => {
                    match self.backend_state(name, backend) {
                        Ok(state) => out.push(state),
                        Err(e) if backend.options.panic_if_invalid.unwrap_or(false) => {
                            return Err(e);
                        }
                        Err(e) => tracing::warn!(backend = %name, error = %e, "Skipping backend"),
                    }
                }
                Some(TransportType::Stdio) => {
                    tracing::warn!(backend = %name, "Stdio backends are not proxied, skipping");
                }
                None => {
                    tracing::warn!(backend = %name, "Backend has no transport, skipping");
                }
            }
        }
        Ok(out)
    }

    fn backend_state(&self, name: &str, backend: &BackendConfig) -> Result<BackendState> {
        check_name(name)?;
        let raw = backend.url.as_deref().unwrap_or_default();
        let upstream = Url::parse(raw).map_err(|e| ServerError::InvalidBackendUrl {
            backend: name.to_string(),
            reason: e.to_string(),
        })?;

        let oauth = self.oauth.as_ref().filter(|_| {
            backend
                .options
                .oauth2
                .as_ref()
                .is_some_and(|o| o.enabled)
        });

        Ok(BackendState {
            name: Arc::from(name),
            base_url: Arc::from(self.base_url()),
            upstream: Arc::new(upstream),
            backend: Arc::new(backend.clone()),
            oauth: oauth.cloned(),
            http: self.http.clone(),
        })
    }
}

fn check_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "empty"
    } else if RESERVED_NAMES.contains(&name) {
        "reserved by the proxy"
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        "only letters, digits, '-', '_' and '.' are allowed"
    } else {
        return Ok(());
    };
    Err(ServerError::InvalidBackendName {
        backend: name.to_string(),
        reason: reason.to_string(),
    })
}

/// State handed to one backend's middleware and passthrough handler.
#[derive(Clone)]
pub struct BackendState {
    /// Backend name; also its path segment.
    pub name: Arc<str>,

    /// Public base URL of the proxy.
    pub base_url: Arc<str>,

    /// Where requests are forwarded to.
    pub upstream: Arc<Url>,

    pub backend: Arc<BackendConfig>,

    /// Set when this backend is protected by OAuth.
    pub oauth: Option<Arc<AuthorizationServer>>,

    pub http: reqwest::Client,
}

impl BackendState {
    /// Static bearer tokens accepted for this backend.
    pub fn auth_tokens(&self) -> &[String] {
        self.backend.options.auth_tokens()
    }

    /// User filter, if one is configured.
    pub fn user_filter(&self) -> Option<&UserFilterConfig> {
        self.backend.options.user_filter.as_ref()
    }

    /// Whether requests should be logged individually.
    pub fn log_enabled(&self) -> bool {
        self.backend.options.log_enabled.unwrap_or(false)
    }

    /// Route prefix, e.g. `/github`.
    pub fn prefix(&self) -> String {
        format!("/{}", self.name)
    }
}
