//! End-to-end OAuth flow through the HTTP router.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use chrono::{TimeDelta, Utc};
use mcp_proxy_config::OAuth2Config;
use mcp_proxy_oauth::{
    AccessToken, AuthorizationServer, CredentialStore, RegisteredClient, SNAPSHOT_FILE,
    SnapshotStore, Templates, pkce::s256_challenge, router,
};
use tower::ServiceExt;

const CALLBACK: &str = "https://claude.ai/api/mcp/auth_callback";
const VERIFIER: &str = "Zz9xq5hN2c_Kd-0o3yHsLtQWm8aRfVbEuJ1iG7pX4eM";

struct Harness {
    dir: tempfile::TempDir,
    server: Arc<AuthorizationServer>,
    app: Router,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = OAuth2Config {
        enabled: true,
        users: HashMap::from([("alice".to_string(), "wonderland".to_string())]),
        persistence_dir: Some(dir.path().join("state")),
        template_dir: Some(dir.path().join("no-templates")),
        ..Default::default()
    };
    let server = Arc::new(AuthorizationServer::new("https://mcp.example.com", &config).unwrap());
    let app = router(Arc::clone(&server));
    Harness { dir, server, app }
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

async fn json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_form(uri: &str, pairs: &[(&str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(serde_urlencoded::to_string(pairs).unwrap()))
        .unwrap()
}

async fn register(app: &Router) -> String {
    let response = send(
        app,
        post_json(
            "/oauth/register",
            serde_json::json!({ "redirect_uris": [CALLBACK], "client_name": "Claude" }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json(response).await["client_id"].as_str().unwrap().to_string()
}

/// Log in and pull the code out of the success page's redirect link.
async fn login(app: &Router, client_id: &str) -> String {
    let challenge = s256_challenge(VERIFIER);
    let response = send(
        app,
        post_form(
            "/oauth/authorize",
            &[
                ("username", "alice"),
                ("password", "wonderland"),
                ("client_id", client_id),
                ("redirect_uri", CALLBACK),
                ("scope", "mcp"),
                ("state", "opaque-state"),
                ("code_challenge", &challenge),
                ("resource", "https://mcp.example.com/github"),
            ],
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = text(response).await;
    assert!(html.contains("Signed in as alice"));
    assert!(html.contains("state=opaque-state"));

    let start = html.find("code=").unwrap() + "code=".len();
    html[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

async fn exchange(app: &Router, client_id: &str, code: &str, verifier: &str) -> Response {
    send(
        app,
        post_json(
            "/oauth/token",
            serde_json::json!({
                "grant_type": "authorization_code",
                "code": code,
                "redirect_uri": CALLBACK,
                "client_id": client_id,
                "code_verifier": verifier,
            }),
        ),
    )
    .await
}

async fn refresh(app: &Router, client_id: &str, refresh_token: &str) -> Response {
    send(
        app,
        post_form(
            "/oauth/token",
            &[
                ("grant_type", "refresh_token"),
                ("client_id", client_id),
                ("refresh_token", refresh_token),
            ],
        ),
    )
    .await
}

#[tokio::test]
async fn test_full_flow_issues_valid_token() {
    let h = harness();

    let response = send(
        &h.app,
        Request::builder()
            .uri("/.well-known/oauth-authorization-server")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let metadata = json(response).await;
    assert_eq!(metadata["registration_endpoint"], "https://mcp.example.com/oauth/register");

    let client_id = register(&h.app).await;

    let authorize_uri = format!(
        "/oauth/authorize?response_type=code&client_id={client_id}&redirect_uri={}&state=s&code_challenge={}&code_challenge_method=S256",
        url_encode(CALLBACK),
        s256_challenge(VERIFIER)
    );
    let response = send(
        &h.app,
        Request::builder().uri(authorize_uri).body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(text(response).await.contains("name=\"password\""));

    let code = login(&h.app, &client_id).await;
    let response = exchange(&h.app, &client_id, &code, VERIFIER).await;
    assert_eq!(response.status(), StatusCode::OK);
    let tokens = json(response).await;
    let access = tokens["access_token"].as_str().unwrap();
    assert!(!access.is_empty());
    assert!(!tokens["refresh_token"].as_str().unwrap().is_empty());
    assert_eq!(tokens["expires_in"], 3600);

    let token = h.server.validate(access).unwrap();
    assert_eq!(token.username, "alice");
    assert_eq!(token.scope, "mcp");

    // Snapshot was written owner-only next to the configured directory.
    let snapshot = h.dir.path().join("state").join(SNAPSHOT_FILE);
    let data: serde_json::Value = serde_json::from_slice(&std::fs::read(&snapshot).unwrap()).unwrap();
    assert!(data["clients"][&client_id].is_object());
    assert!(data["accessTokens"][access].is_object());
}

#[tokio::test]
async fn test_pkce_mismatch_burns_the_code() {
    let h = harness();
    let client_id = register(&h.app).await;
    let code = login(&h.app, &client_id).await;

    let response = exchange(&h.app, &client_id, &code, "not-the-verifier").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"], "invalid_grant");

    let response = exchange(&h.app, &client_id, &code, VERIFIER).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_code_cannot_be_exchanged_twice() {
    let h = harness();
    let client_id = register(&h.app).await;
    let code = login(&h.app, &client_id).await;

    assert_eq!(
        exchange(&h.app, &client_id, &code, VERIFIER).await.status(),
        StatusCode::OK
    );
    let response = exchange(&h.app, &client_id, &code, VERIFIER).await;
    assert_eq!(json(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_rotates_and_rejects_replay() {
    let h = harness();
    let client_id = register(&h.app).await;
    let code = login(&h.app, &client_id).await;
    let first = json(exchange(&h.app, &client_id, &code, VERIFIER).await).await;
    let first_refresh = first["refresh_token"].as_str().unwrap();

    let response = refresh(&h.app, &client_id, first_refresh).await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = json(response).await;
    assert!(h.server.validate(first["access_token"].as_str().unwrap()).is_none());
    assert!(h.server.validate(second["access_token"].as_str().unwrap()).is_some());

    let response = refresh(&h.app, &client_id, first_refresh).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_registration_rejects_foreign_redirect() {
    let h = harness();
    let response = send(
        &h.app,
        post_json(
            "/oauth/register",
            serde_json::json!({ "redirect_uris": ["https://evil.example/callback"] }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"], "invalid_redirect_uri");
}

#[tokio::test]
async fn test_registration_respects_ip_allowlist() {
    let dir = tempfile::tempdir().unwrap();
    let config = OAuth2Config {
        enabled: true,
        users: HashMap::from([("alice".to_string(), "wonderland".to_string())]),
        persistence_dir: Some(dir.path().to_path_buf()),
        allowed_ips: vec!["192.0.2.10".to_string()],
        template_dir: Some(dir.path().join("none")),
        ..Default::default()
    };
    let server = Arc::new(AuthorizationServer::new("https://mcp.example.com", &config).unwrap());
    let app = router(server);

    let mut request = post_json(
        "/oauth/register",
        serde_json::json!({ "redirect_uris": [CALLBACK] }),
    );
    request
        .headers_mut()
        .insert("x-real-ip", "192.0.2.99".parse().unwrap());
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json(response).await["error"], "access_denied");

    // No resolvable address at all is also denied.
    let response = send(
        &app,
        post_json(
            "/oauth/register",
            serde_json::json!({ "redirect_uris": [CALLBACK] }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_expired_tokens_are_rejected_and_purged() {
    let dir = tempfile::tempdir().unwrap();
    let server = Arc::new(AuthorizationServer::from_parts(
        "https://mcp.example.com",
        CredentialStore::new(
            HashMap::from([("alice".to_string(), "wonderland".to_string())]),
            Vec::new(),
        ),
        TimeDelta::seconds(-1),
        SnapshotStore::open(dir.path()),
        Templates::embedded().unwrap(),
    ));
    let app = router(Arc::clone(&server));
    let client_id = register(&app).await;
    let code = login(&app, &client_id).await;
    let tokens = json(exchange(&app, &client_id, &code, VERIFIER).await).await;
    let access = tokens["access_token"].as_str().unwrap().to_string();

    assert!(server.validate(&access).is_none());
    assert!(server.validate(&access).is_none());

    // Cleanup runs on the blocking pool; wait for the snapshot to drop the token.
    let snapshot = dir.path().join(SNAPSHOT_FILE);
    let mut purged = false;
    for _ in 0..50 {
        let data: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&snapshot).unwrap()).unwrap();
        if data["accessTokens"].get(&access).is_none() {
            purged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(purged);
}

#[test]
fn test_snapshot_reload_drops_expired_tokens() {
    let dir = tempfile::tempdir().unwrap();
    let now = Utc::now();
    let client = RegisteredClient {
        client_id: "client-1".into(),
        client_secret: "secret".into(),
        redirect_uris: vec![CALLBACK.into()],
        grant_types: vec!["authorization_code".into()],
        created_at: now,
        client_name: "Claude".into(),
    };
    let token = |value: &str, expires_at| AccessToken {
        token: value.into(),
        refresh_token: format!("{value}-r"),
        client_id: "client-1".into(),
        scope: "mcp".into(),
        resource: String::new(),
        expires_at,
        username: "alice".into(),
    };
    let file = serde_json::json!({
        "clients": { "client-1": client },
        "accessTokens": {
            "live": token("live", now + TimeDelta::hours(1)),
            "stale": token("stale", now - TimeDelta::hours(1)),
        },
        "savedAt": now,
    });
    std::fs::write(dir.path().join(SNAPSHOT_FILE), file.to_string()).unwrap();

    let server = AuthorizationServer::from_parts(
        "https://mcp.example.com",
        CredentialStore::default(),
        TimeDelta::hours(1),
        SnapshotStore::open(dir.path()),
        Templates::embedded().unwrap(),
    );
    assert!(server.has_client("client-1"));
    assert!(server.validate("live").is_some());
    assert!(server.validate("stale").is_none());
}

fn url_encode(value: &str) -> String {
    serde_urlencoded::to_string([("v", value)])
        .unwrap()
        .trim_start_matches("v=")
        .to_string()
}
