//! Configuration system for the MCP proxy.
//!
//! Provides JSON or TOML configuration with:
//! - A front-facing proxy section (`mcpProxy`) carrying the bind address, public base
//!   URL, transport type and shared options
//! - Named backend servers (`mcpServers`) that inherit unset options from the proxy
//! - The OAuth 2.1 Authorization Server settings (`options.oauth2`)
//! - Per-backend user allow/block filters

pub mod error;
pub mod loader;
pub mod types;

pub use error::{ConfigError, Result};
pub use loader::{ConfigFormat, load_config_file, parse_config};
pub use types::*;
