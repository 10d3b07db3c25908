//! Listing of the paths the proxy serves.

use std::collections::BTreeMap;

use axum::{Json, Router, extract::State, routing::get};
use mcp_proxy_config::TransportType;

use crate::state::AppState;

/// Map of path to description.
pub async fn paths(State(state): State<AppState>) -> Json<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    out.insert("/health".to_string(), "Health check endpoint".to_string());
    out.insert("/paths".to_string(), "List of available API paths".to_string());

    for (name, backend) in &state.config.mcp_servers {
        let description = match backend.transport() {
            Some(TransportType::StreamableHttp) => format!("Streamable HTTP endpoint for {name}"),
            Some(TransportType::Sse) => format!("SSE endpoint for {name}"),
            Some(TransportType::Stdio) | None => continue,
        };
        out.insert(format!("/{name}/"), description);
    }

    if state.oauth.is_some() {
        for (path, description) in [
            ("/.well-known/oauth-authorization-server", "OAuth server metadata"),
            ("/oauth/register", "Dynamic client registration"),
            ("/oauth/authorize", "Authorization endpoint"),
            ("/oauth/token", "Token endpoint"),
        ] {
            out.insert(path.to_string(), description.to_string());
        }
    }

    Json(out)
}

/// Create path listing routes.
pub fn paths_routes() -> Router<AppState> {
    Router::new().route("/paths", get(paths))
}
