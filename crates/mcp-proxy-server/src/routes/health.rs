//! Liveness check for the proxy process.
//!
//! Answers without touching backends or the Authorization Server, so load
//! balancers can poll it while a backend is down.

use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Version of the running proxy build.
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /health`, mounted outside every backend prefix.
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
