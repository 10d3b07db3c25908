//! MCP proxy
//!
//! Main entry point: parses the command line, installs logging, loads the
//! configuration and serves until Ctrl-C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use mcp_proxy_config::Config;
use mcp_proxy_oauth::AuthorizationServer;
use mcp_proxy_server::{AppState, Server};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// MCP proxy with an OAuth 2.1 Authorization Server
#[derive(Debug, Parser)]
#[command(name = "mcp-proxy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the config file (.json or .toml)
    #[arg(short, long, env = "MCP_PROXY_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Also write JSON logs to daily files in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

const DEFAULT_FILTER: &str = "mcp_proxy=info,mcp_proxy_oauth=info,mcp_proxy_server=info,warn";
const VERBOSE_FILTER: &str =
    "mcp_proxy=debug,mcp_proxy_oauth=debug,mcp_proxy_server=debug,mcp_proxy_config=debug,info";

/// `RUST_LOG` wins over `--verbose`.
fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER }))
}

/// Install the console layer and, with `--log-dir`, a rolling JSON file layer.
///
/// The returned guard flushes the file writer when dropped.
fn init_tracing(cli: &Cli) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_filter(env_filter(cli.verbose));

    let Some(dir) = &cli.log_dir else {
        tracing_subscriber::registry().with(console).init();
        return None;
    };

    let file_appender = tracing_appender::rolling::daily(dir, "mcp-proxy.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(env_filter(cli.verbose)),
        )
        .init();
    Some(guard)
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli);

    let config = mcp_proxy_config::load_config_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    info!(
        config = %cli.config.display(),
        backends = config.mcp_servers.len(),
        oauth = config.oauth_enabled(),
        "Configuration loaded"
    );

    let state = build_state(config)?;
    Server::from_state(state)
        .run_with_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;
    Ok(())
}

/// Wire the application state, creating the Authorization Server when enabled.
fn build_state(config: Config) -> Result<AppState> {
    let oauth = match config.mcp_proxy.options.oauth2.as_ref() {
        Some(oauth2) if config.oauth_enabled() => {
            let server = AuthorizationServer::new(config.mcp_proxy.base_url_trimmed(), oauth2)
                .context("Failed to initialise the OAuth authorization server")?;
            Some(Arc::new(server))
        }
        _ => None,
    };

    let state = AppState::new(config);
    Ok(match oauth {
        Some(server) => state.with_oauth(server),
        None => state,
    })
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcp_proxy_config::{ConfigFormat, parse_config};

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["mcp-proxy"]).unwrap();
        if std::env::var_os("MCP_PROXY_CONFIG").is_none() {
            assert_eq!(cli.config, PathBuf::from("config.json"));
        }
        assert!(!cli.verbose);
        assert!(cli.log_dir.is_none());
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::try_parse_from([
            "mcp-proxy",
            "--config",
            "proxy.toml",
            "--verbose",
            "--log-dir",
            "/var/log/mcp",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("proxy.toml"));
        assert!(cli.verbose);
        assert_eq!(cli.log_dir, Some(PathBuf::from("/var/log/mcp")));
    }

    #[test]
    fn test_build_state_skips_oauth_for_sse() {
        let config = parse_config(
            r#"{
                "mcpProxy": {
                    "baseURL": "https://mcp.example.com",
                    "addr": ":9090",
                    "options": { "oauth2": { "enabled": true, "users": { "a": "b" } } }
                }
            }"#,
            ConfigFormat::Json,
        )
        .unwrap();
        let state = build_state(config).unwrap();
        assert!(state.oauth.is_none());
    }

    #[test]
    fn test_build_state_creates_oauth_server() {
        let dir = tempfile::tempdir().unwrap();
        let json = format!(
            r#"{{
                "mcpProxy": {{
                    "baseURL": "https://mcp.example.com",
                    "addr": ":9090",
                    "type": "streamable-http",
                    "options": {{ "oauth2": {{
                        "enabled": true,
                        "users": {{ "a": "b" }},
                        "persistenceDir": {dir:?},
                        "templateDir": {templates:?}
                    }} }}
                }}
            }}"#,
            dir = dir.path().join("state").display().to_string(),
            templates = dir.path().join("templates").display().to_string(),
        );
        let config = parse_config(&json, ConfigFormat::Json).unwrap();
        let state = build_state(config).unwrap();
        let server = state.oauth.expect("oauth server");
        assert_eq!(server.base_url(), "https://mcp.example.com");
    }
}
