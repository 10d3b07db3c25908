//! Loading config files from disk.

use std::io::Write;

use mcp_proxy_config::{ConfigError, ServerType, TransportType, load_config_file};

#[test]
fn test_loads_json_file_with_backends() {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{
            "mcpProxy": {{
                "baseURL": "https://mcp.example.com/",
                "addr": "127.0.0.1:9090",
                "name": "MCP Proxy",
                "type": "streamable-http",
                "options": {{
                    "oauth2": {{
                        "enabled": true,
                        "users": {{ "alice": "wonderland" }},
                        "disableTokenExpiration": true
                    }}
                }}
            }},
            "mcpServers": {{
                "github": {{
                    "transportType": "streamable-http",
                    "url": "http://localhost:3000/mcp",
                    "headers": {{ "X-Api-Key": "k" }},
                    "timeout": 30,
                    "options": {{ "userFilter": {{ "mode": "allow", "list": ["alice"] }} }}
                }}
            }}
        }}"#
    )
    .unwrap();

    let config = load_config_file(file.path()).unwrap();
    assert_eq!(config.mcp_proxy.server_type, ServerType::StreamableHttp);
    assert_eq!(config.mcp_proxy.base_url_trimmed(), "https://mcp.example.com");
    assert!(config.oauth_enabled());

    let github = &config.mcp_servers["github"];
    assert_eq!(github.transport(), Some(TransportType::StreamableHttp));
    assert_eq!(github.headers["X-Api-Key"], "k");
    assert_eq!(github.request_timeout().map(|d| d.as_secs()), Some(30));

    let filter = github.options.user_filter.as_ref().unwrap();
    assert!(filter.is_user_allowed("alice"));
    assert!(!filter.is_user_allowed("bob"));

    let oauth = github.options.oauth2.as_ref().unwrap();
    assert!(oauth.disable_token_expiration);
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.json");
    match load_config_file(&path) {
        Err(ConfigError::ReadFile { path: reported, .. }) => {
            assert!(reported.ends_with("absent.json"));
        }
        other => panic!("expected ReadFile error, got {other:?}"),
    }
}

#[test]
fn test_toml_extension_selects_toml_parser() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "[mcpProxy]\nbaseURL = \"http://localhost:9090\"\naddr = \":9090\"\n"
    )
    .unwrap();
    let config = load_config_file(file.path()).unwrap();
    assert_eq!(config.mcp_proxy.listen_addr(), "0.0.0.0:9090");
}
