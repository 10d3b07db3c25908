//! Axum router for the OAuth HTTP surface.
//!
//! - `GET  /.well-known/oauth-authorization-server[/{backend}]`
//! - `GET  /.well-known/oauth-protected-resource/{backend}`
//! - `POST /oauth/register`
//! - `GET|POST /oauth/authorize`
//! - `POST /oauth/token`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{ConnectInfo, Path, RawQuery, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};

use crate::client_ip::resolve_client_ip;
use crate::error::{OAuthError, Result};
use crate::server::{
    AuthorizationServer, AuthorizeParams, LoginForm, LoginOutcome, RegistrationRequest,
    TokenRequest,
};
use crate::templates::PageData;

/// Largest request body accepted by the OAuth endpoints.
const MAX_BODY_BYTES: usize = 64 * 1024;

type Shared = Arc<AuthorizationServer>;

/// Build the OAuth router around a shared server.
pub fn router(server: Shared) -> Router {
    Router::new()
        .route(
            "/.well-known/oauth-authorization-server",
            get(server_metadata),
        )
        .route(
            "/.well-known/oauth-authorization-server/{*backend}",
            get(backend_server_metadata),
        )
        .route(
            "/.well-known/oauth-protected-resource",
            get(missing_backend),
        )
        .route(
            "/.well-known/oauth-protected-resource/",
            get(missing_backend),
        )
        .route(
            "/.well-known/oauth-protected-resource/{*backend}",
            get(protected_resource_metadata),
        )
        .route("/oauth/register", axum::routing::post(register))
        .route("/oauth/authorize", get(authorize_page).post(authorize_login))
        .route("/oauth/token", axum::routing::post(token))
        .with_state(server)
}

/// First path segment of a wildcard capture, if any.
fn first_segment(rest: &str) -> Option<&str> {
    rest.split('/').next().filter(|s| !s.is_empty())
}

async fn server_metadata(State(server): State<Shared>) -> impl IntoResponse {
    Json(server.server_metadata(None))
}

async fn backend_server_metadata(
    State(server): State<Shared>,
    Path(rest): Path<String>,
) -> impl IntoResponse {
    Json(server.server_metadata(first_segment(&rest)))
}

async fn protected_resource_metadata(
    State(server): State<Shared>,
    Path(rest): Path<String>,
) -> Response {
    match first_segment(&rest) {
        Some(backend) => Json(server.protected_resource_metadata(backend)).into_response(),
        None => missing_backend().await.into_response(),
    }
}

async fn missing_backend() -> impl IntoResponse {
    (StatusCode::BAD_REQUEST, "Server name required")
}

/// POST /oauth/register
async fn register(State(server): State<Shared>, request: Request) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    server.check_registration_ip(resolve_client_ip(&parts.headers, peer))?;

    let body = read_body(body).await?;
    let registration: RegistrationRequest = serde_json::from_slice(&body)
        .map_err(|_| OAuthError::InvalidRequest("Invalid JSON request".to_string()))?;
    let response = server.register(registration)?;
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// GET /oauth/authorize
async fn authorize_page(
    State(server): State<Shared>,
    RawQuery(query): RawQuery,
) -> Result<Response> {
    let params: AuthorizeParams = serde_urlencoded::from_str(query.as_deref().unwrap_or_default())
        .map_err(|_| {
            OAuthError::InvalidRequest("Missing or invalid required parameters".to_string())
        })?;
    let page = server.authorization_request(&params)?;
    render(&server, &page)
}

/// POST /oauth/authorize
async fn authorize_login(State(server): State<Shared>, body: Bytes) -> Result<Response> {
    let form: LoginForm = serde_urlencoded::from_bytes(&body)
        .map_err(|_| OAuthError::InvalidRequest("Failed to parse form".to_string()))?;
    match server.login(form)? {
        LoginOutcome::Rejected(page) => render(&server, &page),
        LoginOutcome::Authorized(page) => render(&server, &page),
    }
}

/// POST /oauth/token
async fn token(
    State(server): State<Shared>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));
    let request: TokenRequest = if is_json {
        serde_json::from_slice(&body)
            .map_err(|_| OAuthError::InvalidRequest("Invalid JSON request".to_string()))?
    } else {
        serde_urlencoded::from_bytes(&body)
            .map_err(|_| OAuthError::InvalidRequest("Invalid form data".to_string()))?
    };
    tracing::debug!(request = ?request, "Token request");

    let response = server.exchange(request)?;
    Ok((
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(response),
    )
        .into_response())
}

async fn read_body(body: Body) -> Result<Bytes> {
    axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| OAuthError::InvalidRequest("Request body too large".to_string()))
}

fn render(server: &AuthorizationServer, page: &dyn PageData) -> Result<Response> {
    let html = server.templates().render(page).map_err(|e| {
        tracing::error!(error = %e, "Failed to render OAuth page");
        OAuthError::ServerError("Internal server error".to_string())
    })?;
    Ok(Html(html).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialStore;
    use crate::pkce::s256_challenge;
    use crate::store::SnapshotStore;
    use crate::templates::Templates;
    use axum::http::Request as HttpRequest;
    use chrono::TimeDelta;
    use std::collections::HashMap;
    use tower::ServiceExt;

    const CALLBACK: &str = "https://claude.ai/api/mcp/auth_callback";

    fn app(allowed_ips: Vec<String>) -> (tempfile::TempDir, Router) {
        let dir = tempfile::tempdir().unwrap();
        let server = AuthorizationServer::from_parts(
            "https://mcp.example.com",
            CredentialStore::new(
                HashMap::from([("alice".to_string(), "wonderland".to_string())]),
                allowed_ips,
            ),
            TimeDelta::hours(1),
            SnapshotStore::open(dir.path()),
            Templates::embedded().unwrap(),
        );
        (dir, router(Arc::new(server)))
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_str(&body_string(response).await).unwrap()
    }

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, content_type: &str, body: impl Into<Body>) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", content_type)
            .body(body.into())
            .unwrap()
    }

    #[tokio::test]
    async fn test_server_metadata_routes() {
        let (_dir, app) = app(Vec::new());
        let response = app
            .clone()
            .oneshot(get("/.well-known/oauth-authorization-server"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["issuer"], "https://mcp.example.com");

        let response = app
            .oneshot(get("/.well-known/oauth-authorization-server/github/mcp"))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["issuer"], "https://mcp.example.com/github");
    }

    #[tokio::test]
    async fn test_protected_resource_routes() {
        let (_dir, app) = app(Vec::new());
        let response = app
            .clone()
            .oneshot(get("/.well-known/oauth-protected-resource/github"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["resource"], "https://mcp.example.com/github");

        for uri in [
            "/.well-known/oauth-protected-resource",
            "/.well-known/oauth-protected-resource/",
        ] {
            let response = app.clone().oneshot(get(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_register_created() {
        let (_dir, app) = app(Vec::new());
        let body = serde_json::json!({ "redirect_uris": [CALLBACK], "client_name": "Claude" });
        let response = app
            .oneshot(post("/oauth/register", "application/json", body.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        assert_eq!(json["grant_types"], serde_json::json!(["authorization_code"]));
        assert!(json["client_id_issued_at"].is_i64());
    }

    #[tokio::test]
    async fn test_register_invalid_json() {
        let (_dir, app) = app(Vec::new());
        let response = app
            .oneshot(post("/oauth/register", "application/json", "{"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_register_ip_allowlist_uses_forwarded_headers() {
        let (_dir, app) = app(vec!["203.0.113.7".to_string()]);
        let body = serde_json::json!({ "redirect_uris": [CALLBACK] }).to_string();

        let mut request = post("/oauth/register", "application/json", body.clone());
        request
            .headers_mut()
            .insert("x-forwarded-for", "198.51.100.1".parse().unwrap());
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["error"], "access_denied");

        let mut request = post("/oauth/register", "application/json", body);
        request
            .headers_mut()
            .insert("cf-connecting-ip", "203.0.113.7".parse().unwrap());
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_register_ip_allowlist_peer_address() {
        let (_dir, app) = app(vec!["127.0.0.1".to_string()]);
        let body = serde_json::json!({ "redirect_uris": [CALLBACK] }).to_string();
        let mut request = post("/oauth/register", "application/json", body);
        request
            .extensions_mut()
            .insert(ConnectInfo("127.0.0.1:40000".parse::<SocketAddr>().unwrap()));
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_authorize_get_renders_login() {
        let (_dir, app) = app(Vec::new());
        let uri = format!(
            "/oauth/authorize?client_id=abc&redirect_uri={}&response_type=code&state=%22%3E%3Cx&resource=https%3A%2F%2Fmcp.example.com%2Fgithub",
            "https%3A%2F%2Fclaude.ai%2Fapi%2Fmcp%2Fauth_callback"
        );
        let response = app.oneshot(get(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/html"));
        let html = body_string(response).await;
        assert!(html.contains("Sign in to github"));
        assert!(html.contains("&quot;&gt;&lt;x"));
        assert!(!html.contains("\"><x"));
    }

    #[tokio::test]
    async fn test_authorize_get_missing_params() {
        let (_dir, app) = app(Vec::new());
        let response = app
            .oneshot(get("/oauth/authorize?client_id=abc"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_authorize_post_bad_password_rerenders_form() {
        let (_dir, app) = app(Vec::new());
        let form = serde_urlencoded::to_string([
            ("username", "alice"),
            ("password", "wrong"),
            ("client_id", "abc"),
            ("redirect_uri", CALLBACK),
            ("state", "s1"),
        ])
        .unwrap();
        let response = app
            .oneshot(post(
                "/oauth/authorize",
                "application/x-www-form-urlencoded",
                form,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_string(response).await;
        assert!(html.contains("Invalid username or password"));
        assert!(html.contains("value=\"s1\""));
        assert!(!html.contains("wrong"));
    }

    #[tokio::test]
    async fn test_token_endpoint_json_and_form() {
        let (_dir, app) = app(Vec::new());

        let body = serde_json::json!({ "redirect_uris": [CALLBACK] }).to_string();
        let response = app
            .clone()
            .oneshot(post("/oauth/register", "application/json", body))
            .await
            .unwrap();
        let client_id = body_json(response).await["client_id"]
            .as_str()
            .unwrap()
            .to_string();

        let verifier = "a-verifier-that-is-long-enough-for-pkce-0123456789";
        let form = serde_urlencoded::to_string([
            ("username", "alice"),
            ("password", "wonderland"),
            ("client_id", client_id.as_str()),
            ("redirect_uri", CALLBACK),
            ("code_challenge", s256_challenge(verifier).as_str()),
        ])
        .unwrap();
        let response = app
            .clone()
            .oneshot(post(
                "/oauth/authorize",
                "application/x-www-form-urlencoded",
                form,
            ))
            .await
            .unwrap();
        let html = body_string(response).await;
        let start = html.find("code=").unwrap() + "code=".len();
        let code: String = html[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();

        let body = serde_json::json!({
            "grant_type": "authorization_code",
            "code": code,
            "redirect_uri": CALLBACK,
            "client_id": client_id,
            "code_verifier": verifier,
        });
        let response = app
            .clone()
            .oneshot(post("/oauth/token", "application/json", body.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        let json = body_json(response).await;
        assert_eq!(json["token_type"], "Bearer");
        let refresh = json["refresh_token"].as_str().unwrap().to_string();

        let form = serde_urlencoded::to_string([
            ("grant_type", "refresh_token"),
            ("client_id", client_id.as_str()),
            ("refresh_token", refresh.as_str()),
        ])
        .unwrap();
        let response = app
            .oneshot(post(
                "/oauth/token",
                "application/x-www-form-urlencoded",
                form,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_ne!(body_json(response).await["refresh_token"], refresh.as_str());
    }

    #[tokio::test]
    async fn test_token_endpoint_bad_json() {
        let (_dir, app) = app(Vec::new());
        let response = app
            .oneshot(post("/oauth/token", "application/json", "not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_token_endpoint_unknown_client() {
        let (_dir, app) = app(Vec::new());
        let form = "grant_type=authorization_code&code=x&redirect_uri=y&client_id=nobody";
        let response = app
            .oneshot(post(
                "/oauth/token",
                "application/x-www-form-urlencoded",
                form,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "invalid_client");
    }
}
