//! Configuration types mapping to the config file schema.
//!
//! Top-level config (JSON shown, TOML uses the same keys):
//! ```json
//! {
//!   "mcpProxy":   { "baseURL": "...", "addr": ":9090", "type": "streamable-http", "options": {} },
//!   "mcpServers": { "github": { "url": "...", "options": {} } }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Front-facing proxy settings.
    pub mcp_proxy: ProxyServerConfig,

    /// Backend servers keyed by name. The name is also the URL path segment.
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, BackendConfig>,
}

impl Config {
    /// Whether the OAuth Authorization Server should be started.
    ///
    /// Only the streamable-HTTP front end carries OAuth; SSE deployments keep using
    /// static bearer tokens.
    pub fn oauth_enabled(&self) -> bool {
        self.mcp_proxy.server_type == ServerType::StreamableHttp
            && self
                .mcp_proxy
                .options
                .oauth2
                .as_ref()
                .is_some_and(|o| o.enabled)
    }

    /// Copy unset backend options from the proxy-level options.
    ///
    /// The user filter is deliberately per-backend and never inherited.
    pub fn apply_inheritance(&mut self) {
        let shared = self.mcp_proxy.options.clone();
        for backend in self.mcp_servers.values_mut() {
            let options = &mut backend.options;
            if options.auth_tokens.is_none() {
                options.auth_tokens = shared.auth_tokens.clone();
            }
            if options.oauth2.is_none() {
                options.oauth2 = shared.oauth2.clone();
            }
            if options.log_enabled.is_none() {
                options.log_enabled = shared.log_enabled;
            }
            if options.panic_if_invalid.is_none() {
                options.panic_if_invalid = shared.panic_if_invalid;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Proxy server
// ─────────────────────────────────────────────────────────────────────────────

/// Front-facing transport of the proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerType {
    #[default]
    #[serde(rename = "sse")]
    Sse,
    #[serde(rename = "streamable-http")]
    StreamableHttp,
}

/// `mcpProxy` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyServerConfig {
    /// Public URL the proxy is reachable at. Used as the OAuth issuer.
    #[serde(rename = "baseURL")]
    pub base_url: String,

    /// Listen address, e.g. `0.0.0.0:9090` or `:9090`.
    pub addr: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default, rename = "type")]
    pub server_type: ServerType,

    #[serde(default)]
    pub options: Options,
}

impl ProxyServerConfig {
    /// The base URL without a trailing slash.
    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Listen address in `host:port` form; a bare `:port` binds all interfaces.
    pub fn listen_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Options shared by the proxy and each backend.
///
/// `None` means "not set" so that backend options can inherit from the proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Options {
    /// Static bearer tokens accepted when OAuth is not active.
    pub auth_tokens: Option<Vec<String>>,

    /// OAuth 2.1 Authorization Server settings.
    pub oauth2: Option<OAuth2Config>,

    /// Per-backend user allow/block filter.
    pub user_filter: Option<UserFilterConfig>,

    /// Log every request routed to the backend.
    pub log_enabled: Option<bool>,

    /// Abort startup if the backend fails to initialize.
    pub panic_if_invalid: Option<bool>,
}

impl Options {
    /// Configured static tokens, empty when unset.
    pub fn auth_tokens(&self) -> &[String] {
        self.auth_tokens.as_deref().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OAuth 2.1
// ─────────────────────────────────────────────────────────────────────────────

/// Default token lifetime in minutes.
pub const DEFAULT_TOKEN_EXPIRATION_MINUTES: u64 = 60;

/// Default directory (relative to the working directory) for external templates.
pub const DEFAULT_TEMPLATE_DIR: &str = "templates/oauth";

/// Directory name under the home directory used when `persistenceDir` is unset.
const DEFAULT_PERSISTENCE_DIR_NAME: &str = ".mcpproxy";

/// `options.oauth2` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OAuth2Config {
    pub enabled: bool,

    /// Username → plaintext password.
    pub users: HashMap<String, String>,

    /// Directory holding `oauth_clients.json`.
    pub persistence_dir: Option<PathBuf>,

    /// IP allowlist for dynamic client registration. Empty allows everyone.
    #[serde(rename = "allowedIPs")]
    pub allowed_ips: Vec<String>,

    /// Access token lifetime; `0` or unset means the default of 60 minutes.
    pub token_expiration_minutes: u64,

    /// Issue tokens that effectively never expire.
    pub disable_token_expiration: bool,

    /// Root of the external template tree; templates are read from `<dir>/oauth`.
    pub template_dir: Option<PathBuf>,
}

impl OAuth2Config {
    /// Access token lifetime.
    pub fn token_ttl(&self) -> Duration {
        let minutes = if self.token_expiration_minutes > 0 {
            self.token_expiration_minutes
        } else {
            DEFAULT_TOKEN_EXPIRATION_MINUTES
        };
        Duration::from_secs(minutes.saturating_mul(60))
    }

    /// Directory for the persistence snapshot.
    ///
    /// Falls back to `~/.mcpproxy`, or `./.mcpproxy` when the home directory is unknown.
    pub fn resolved_persistence_dir(&self) -> PathBuf {
        match &self.persistence_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.clone(),
            _ => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_PERSISTENCE_DIR_NAME),
        }
    }

    /// Directory searched for `authorize.html` and `success.html`.
    pub fn resolved_template_dir(&self) -> PathBuf {
        match &self.template_dir {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join("oauth"),
            _ => PathBuf::from(DEFAULT_TEMPLATE_DIR),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User filter
// ─────────────────────────────────────────────────────────────────────────────

/// How a [`UserFilterConfig`] list is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserFilterMode {
    Allow,
    Block,
    /// Anything unrecognised; behaves as "no filter".
    #[serde(other)]
    Unknown,
}

/// Per-backend user access control, evaluated after authentication.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserFilterConfig {
    pub mode: Option<UserFilterMode>,
    pub list: Vec<String>,
}

impl UserFilterConfig {
    /// Check whether `username` may reach the backend.
    ///
    /// An empty username (static-token or unauthenticated access) is always allowed;
    /// the filter only narrows OAuth identities.
    pub fn is_user_allowed(&self, username: &str) -> bool {
        if username.is_empty() {
            return true;
        }
        let listed = self.list.iter().any(|u| u == username);
        match self.mode {
            Some(UserFilterMode::Allow) => listed,
            Some(UserFilterMode::Block) => !listed,
            Some(UserFilterMode::Unknown) | None => true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backends
// ─────────────────────────────────────────────────────────────────────────────

/// Transport used to reach a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    #[serde(rename = "stdio")]
    Stdio,
    #[serde(rename = "sse")]
    Sse,
    #[serde(rename = "streamable-http")]
    StreamableHttp,
}

/// One `mcpServers` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendConfig {
    pub transport_type: Option<TransportType>,

    // Stdio
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,

    // SSE or streamable HTTP
    pub url: Option<String>,
    pub headers: HashMap<String, String>,
    /// Request timeout in seconds; `0` means no timeout.
    pub timeout: u64,

    pub options: Options,
}

impl BackendConfig {
    /// Resolve the effective transport.
    ///
    /// A command (or explicit stdio) selects stdio; otherwise a URL selects
    /// streamable HTTP when requested and SSE by default.
    pub fn transport(&self) -> Option<TransportType> {
        if self.command.as_deref().is_some_and(|c| !c.is_empty())
            || self.transport_type == Some(TransportType::Stdio)
        {
            return Some(TransportType::Stdio);
        }
        if self.url.as_deref().is_some_and(|u| !u.is_empty()) {
            return Some(match self.transport_type {
                Some(TransportType::StreamableHttp) => TransportType::StreamableHttp,
                _ => TransportType::Sse,
            });
        }
        None
    }

    /// Per-request timeout, if configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }
}
