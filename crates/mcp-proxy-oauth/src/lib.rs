//! OAuth 2.1 Authorization Server for the MCP proxy.
//!
//! Lets MCP clients discover the proxy, register themselves dynamically, sign a
//! user in with a username and password, and trade the resulting authorization
//! code (bound to a PKCE challenge) for opaque bearer tokens. The HTTP layer asks
//! [`AuthorizationServer::validate`] about every proxied request.
//!
//! # Components
//!
//! - [`credentials`]: configured users and the registration IP allowlist
//! - [`store`]: JSON snapshot of clients and live tokens
//! - [`server`]: client registry, authorization flow, token service, validator
//! - [`templates`]: login and success pages, external with hot reload or embedded
//! - [`metadata`]: discovery documents
//! - [`client_ip`]: originating IP behind proxies
//! - [`routes`]: axum router for the endpoints

pub mod client_ip;
pub mod credentials;
pub mod error;
pub mod metadata;
pub mod model;
pub mod pkce;
pub mod routes;
pub mod server;
pub mod store;
pub mod templates;

pub use credentials::CredentialStore;
pub use error::{OAuthError, Result, StoreError, TemplateError};
pub use metadata::{ProtectedResourceMetadata, ServerMetadata, protected_resource_url};
pub use model::{AccessToken, AuthorizationCode, RegisteredClient};
pub use routes::router;
pub use server::{
    AuthorizationServer, AuthorizeParams, LoginForm, LoginOutcome, RegistrationRequest,
    RegistrationResponse, TokenRequest, TokenResponse,
};
pub use store::{SNAPSHOT_FILE, SnapshotStore};
pub use templates::Templates;
