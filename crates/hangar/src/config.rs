//! Application configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML config file,
//! then `HANGAR__SECTION__KEY` environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::config::{Config, Environment, File, FileFormat};
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::auth::AuthConfig;
use crate::container::ContainerConfig;
use crate::gateway::GatewayConfig;

pub const APP_NAME: &str = "hangar";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub auth: AuthConfig,
    pub container: ContainerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// CORS origins. Empty allows any origin in dev mode and none otherwise.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["http://localhost:3000".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.queue_capacity == 0 {
            bail!("gateway.queue_capacity must be greater than zero");
        }
        if self.gateway.max_message_size == 0 {
            bail!("gateway.max_message_size must be greater than zero");
        }
        if self.gateway.read_timeout_ms == 0
            || self.gateway.write_timeout_ms == 0
            || self.gateway.ping_interval_ms == 0
        {
            bail!("gateway timeouts must be greater than zero");
        }
        if self.gateway.ping_interval_ms >= self.gateway.read_timeout_ms {
            bail!("gateway.ping_interval_ms must be shorter than gateway.read_timeout_ms");
        }
        self.auth.validate().context("invalid [auth] section")?;
        Ok(())
    }
}

/// Load configuration from `path` (optional) and the environment.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let prefix = env_prefix();
    let built = Config::builder()
        .add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(prefix.as_str())
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.allowed_origins")
                .with_list_parse_key("auth.dev_users")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("reading config from {}", path.display()))?;

    built
        .try_deserialize()
        .with_context(|| format!("parsing config from {}", path.display()))
}

/// Like [`load_config`], writing a default file first if none exists.
pub fn load_or_init_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        write_default_config(path)?;
    }
    load_config(path)
}

/// Write the default configuration, creating parent directories.
pub fn write_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {parent:?}"))?;
    }

    let toml = toml::to_string_pretty(&AppConfig::default())
        .context("serializing default config to TOML")?;
    let mut body = default_config_header(path);
    body.push_str(&toml);
    fs::write(path, body).with_context(|| format!("writing config file to {}", path.display()))
}

fn default_config_header(path: &Path) -> String {
    format!(
        "# Configuration for {APP_NAME}\n# File: {}\n# Override any key with {}__SECTION__KEY\n\n",
        path.display(),
        env_prefix()
    )
}

/// Resolve the config file: an explicit path (file or directory) or the
/// default location.
pub fn resolve_config_path(override_path: Option<PathBuf>) -> Result<PathBuf> {
    match override_path {
        Some(path) => {
            let expanded = expand_path(path)?;
            if expanded.is_dir() {
                Ok(expanded.join("config.toml"))
            } else {
                Ok(expanded)
            }
        }
        None => Ok(default_config_dir()?.join("config.toml")),
    }
}

pub fn expand_path(path: PathBuf) -> Result<PathBuf> {
    match path.to_str() {
        Some(text) => expand_str_path(text),
        None => Ok(path),
    }
}

pub fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

pub fn default_config_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(dir) = dirs::config_dir() {
        return Ok(dir.join(APP_NAME));
    }

    dirs::home_dir()
        .map(|home| home.join(".config").join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

pub fn env_prefix() -> String {
    APP_NAME
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
