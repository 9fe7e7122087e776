//! Server configuration loading from file and environment variables.

use pathwise_db::{DatabaseOpts, DbRuntimeSettings};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Version reported by `/health`.
    #[serde(default = "default_version")]
    pub version: String,
}

/// Database configuration.
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Local file path, or the remote database name when `token` is set.
    #[serde(default = "default_db_url")]
    pub url: String,

    /// Remote authentication token. Empty means a local database.
    #[serde(default)]
    pub token: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// How long a pool checkout may wait, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "pathwise_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log line format.
    #[serde(default)]
    pub output: LogOutput,
}

/// Format of emitted log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log output '{other}'")),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_db_url() -> String {
    "./db.sqlite3".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DbRuntimeSettings::default().busy_timeout_ms
}

fn default_pool_max_size() -> u32 {
    DbRuntimeSettings::default().pool_max_size
}

fn default_connect_timeout_ms() -> u64 {
    DbRuntimeSettings::default().connect_timeout_ms
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            version: default_version(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_db_url(),
            token: String::new(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: LogOutput::default(),
        }
    }
}

impl DatabaseConfig {
    /// Returns the options handed to [`pathwise_db::connect`].
    pub fn opts(&self) -> DatabaseOpts {
        DatabaseOpts {
            url: self.url.clone(),
            token: self.token.clone(),
        }
    }

    /// Returns the driver tunables.
    pub fn runtime_settings(&self) -> DbRuntimeSettings {
        DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
            connect_timeout_ms: self.connect_timeout_ms,
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url)
            .field("token_set", &!self.token.is_empty())
            .field("busy_timeout_ms", &self.busy_timeout_ms)
            .field("pool_max_size", &self.pool_max_size)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides are applied afterwards, see
/// [`apply_env_overrides`].
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies environment overrides read through `lookup`.
///
/// - `HOST` overrides `server.host`
/// - `PORT` overrides `server.port`
/// - `VERSION` overrides `server.version`
/// - `DB_URL` overrides `database.url`
/// - `DB_TOKEN` overrides `database.token`
/// - `DB_BUSY_TIMEOUT_MS` overrides `database.busy_timeout_ms`
/// - `DB_POOL_MAX_SIZE` overrides `database.pool_max_size`
/// - `DB_CONNECT_TIMEOUT_MS` overrides `database.connect_timeout_ms`
/// - `LOG_LEVEL` overrides `logging.level`
/// - `LOG_OUTPUT` overrides `logging.output` (`text` or `json`)
///
/// Empty values and values that fail to parse are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(parsed) = var("HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = var("PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(version) = var("VERSION") {
        config.server.version = version;
    }
    if let Some(url) = var("DB_URL") {
        config.database.url = url;
    }
    if let Some(token) = var("DB_TOKEN") {
        config.database.token = token;
    }
    if let Some(parsed) = var("DB_BUSY_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.database.busy_timeout_ms = parsed;
    }
    if let Some(parsed) = var("DB_POOL_MAX_SIZE").and_then(|v| v.parse().ok()) {
        config.database.pool_max_size = parsed;
    }
    if let Some(parsed) = var("DB_CONNECT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.database.connect_timeout_ms = parsed;
    }
    if let Some(level) = var("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(parsed) = var("LOG_OUTPUT").and_then(|v| v.parse().ok()) {
        config.logging.output = parsed;
    }
}
