//! Config file loading, option inheritance and validation.

use std::path::Path;

use crate::{BackendConfig, Config, ConfigError, Result, TransportType};

/// On-disk format of a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick a format from the file extension. Anything but `.toml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Load, inherit and validate a config file.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_config(&contents, ConfigFormat::from_path(path))
}

/// Parse config text, apply option inheritance and validate the result.
pub fn parse_config(contents: &str, format: ConfigFormat) -> Result<Config> {
    let mut config: Config = match format {
        ConfigFormat::Json => serde_json::from_str(contents)?,
        ConfigFormat::Toml => toml::from_str(contents)?,
    };
    config.apply_inheritance();
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let proxy = &config.mcp_proxy;
    if proxy.base_url.is_empty() {
        return Err(ConfigError::MissingField {
            field: "baseURL".to_string(),
            context: "mcpProxy".to_string(),
        });
    }
    url::Url::parse(&proxy.base_url).map_err(|e| ConfigError::InvalidValue {
        field: "mcpProxy.baseURL".to_string(),
        reason: e.to_string(),
    })?;
    if proxy.addr.is_empty() {
        return Err(ConfigError::MissingField {
            field: "addr".to_string(),
            context: "mcpProxy".to_string(),
        });
    }

    for (name, backend) in &config.mcp_servers {
        validate_backend(name, backend)?;
    }
    Ok(())
}

fn validate_backend(name: &str, backend: &BackendConfig) -> Result<()> {
    let context = format!("mcpServers.{name}");
    match backend.transport() {
        Some(TransportType::Stdio) => {
            if backend.command.as_deref().is_none_or(str::is_empty) {
                return Err(ConfigError::MissingField {
                    field: "command".to_string(),
                    context,
                });
            }
        }
        Some(_) => {
            let raw = backend.url.as_deref().unwrap_or_default();
            url::Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
                field: format!("{context}.url"),
                reason: e.to_string(),
            })?;
        }
        None => {
            return Err(ConfigError::MissingField {
                field: "command or url".to_string(),
                context,
            });
        }
    }
    Ok(())
}
