//! Routes served directly by the proxy.

pub mod health;
pub mod paths;

pub use health::{HealthResponse, health_routes};
pub use paths::paths_routes;
