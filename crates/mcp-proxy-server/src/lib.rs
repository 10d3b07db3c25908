//! HTTP front end for the MCP proxy.
//!
//! Serves the health and path listing routes, mounts the OAuth Authorization
//! Server when it is enabled, and forwards `/<backend>/…` to each URL backend
//! behind authentication and the backend's user filter.
//!
//! # Example
//!
//! ```ignore
//! use mcp_proxy_server::{AppState, Server};
//!
//! let config = mcp_proxy_config::load_config_file(path)?;
//! let server = Server::from_state(AppState::new(config));
//! server.run().await?;
//! ```

pub mod auth;
pub mod error;
pub mod logging;
pub mod passthrough;
pub mod routes;
pub mod state;

pub use auth::{AuthError, Identity, auth_middleware, user_filter_middleware};
pub use error::{Result, ServerError};
pub use logging::request_logging_middleware;
pub use state::{AppState, BackendState};

use std::future::Future;
use std::net::SocketAddr;

use axum::{Router, middleware, routing::any};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// The MCP proxy HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Result<Router> {
        let mut router = Router::new()
            .merge(routes::health_routes())
            .merge(routes::paths_routes())
            .with_state(self.state.clone());

        if let Some(server) = &self.state.oauth {
            router = router.merge(mcp_proxy_oauth::router(server.clone()));
        }

        for backend in self.state.backends()? {
            info!(
                backend = %backend.name,
                path = %backend.prefix(),
                oauth = backend.oauth.is_some(),
                "Mounted backend"
            );
            router = router.merge(backend_routes(backend));
        }

        Ok(router.layer(TraceLayer::new_for_http()))
    }

    /// Run the server until the process is stopped.
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Run the server until `shutdown` resolves, then drain open connections.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config.mcp_proxy.listen_addr();
        let router = self.router()?;

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        info!(addr = %addr, base_url = %self.state.base_url(), "Starting server");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve)?;

        info!("Server stopped");
        Ok(())
    }
}

/// Routes for one backend.
///
/// Layers run outside in: request logging, authentication, user filter.
fn backend_routes(backend: BackendState) -> Router {
    let prefix = backend.prefix();
    Router::new()
        .route(&prefix, any(passthrough::proxy))
        .route(&format!("{prefix}/"), any(passthrough::proxy))
        .route(&format!("{prefix}/{{*rest}}"), any(passthrough::proxy))
        .layer(middleware::from_fn_with_state(
            backend.clone(),
            auth::user_filter_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            backend.clone(),
            auth::auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            backend.clone(),
            logging::request_logging_middleware,
        ))
        .with_state(backend)
}
