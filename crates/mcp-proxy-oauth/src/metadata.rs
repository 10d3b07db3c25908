//! Discovery documents (RFC 8414 authorization server metadata and RFC 9728
//! protected resource metadata).

use serde::{Deserialize, Serialize};

/// Authorization server metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: String,
    pub scopes_supported: Vec<String>,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
}

impl ServerMetadata {
    /// Metadata for the proxy as a whole, or scoped to one backend.
    ///
    /// The scoped variant names the backend as issuer and pins the authorization
    /// endpoint's `resource` parameter to it.
    pub fn new(base_url: &str, backend: Option<&str>) -> Self {
        let (issuer, authorization_endpoint) = match backend {
            Some(name) => {
                let resource = format!("{base_url}/{name}");
                let endpoint = format!(
                    "{base_url}/oauth/authorize?resource={}",
                    query_escape(&resource)
                );
                (resource, endpoint)
            }
            None => (base_url.to_string(), format!("{base_url}/oauth/authorize")),
        };
        Self {
            issuer,
            authorization_endpoint,
            token_endpoint: format!("{base_url}/oauth/token"),
            registration_endpoint: format!("{base_url}/oauth/register"),
            scopes_supported: strings(&["mcp"]),
            response_types_supported: strings(&["code"]),
            grant_types_supported: strings(&["authorization_code", "refresh_token"]),
            token_endpoint_auth_methods_supported: strings(&["client_secret_post", "none"]),
            code_challenge_methods_supported: strings(&["S256"]),
        }
    }
}

/// Protected resource metadata for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub bearer_methods_supported: Vec<String>,
    pub resource_documentation: String,
}

impl ProtectedResourceMetadata {
    pub fn new(base_url: &str, backend: &str) -> Self {
        let resource = format!("{base_url}/{backend}");
        Self {
            resource_documentation: format!("{resource}/mcp"),
            resource,
            authorization_servers: vec![base_url.to_string()],
            scopes_supported: strings(&["mcp"]),
            bearer_methods_supported: strings(&["header"]),
        }
    }
}

/// URL of the protected resource document for `backend`, as advertised in
/// `WWW-Authenticate` challenges.
pub fn protected_resource_url(base_url: &str, backend: &str) -> String {
    format!("{base_url}/.well-known/oauth-protected-resource/{backend}")
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Form-style query escaping (spaces become `+`).
fn query_escape(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
