//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Canister the scheduled functions call.
    #[serde(default)]
    pub canister: CanisterConfig,

    /// Social posting API credentials.
    #[serde(default)]
    pub twitter: TwitterConfig,

    /// Scheduled function intervals.
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "johndao_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Canister connection.
#[derive(Clone, Deserialize)]
pub struct CanisterConfig {
    /// Canister principal in text form.
    #[serde(default = "default_canister_id")]
    pub id: String,

    /// Gateway base URL.
    #[serde(default = "default_canister_host")]
    pub host: String,

    /// Hex secp256k1 secret key of the server identity. A fresh key is
    /// generated at startup when unset.
    #[serde(default)]
    pub identity_secret: Option<String>,
}

/// Social posting API.
#[derive(Clone, Deserialize)]
pub struct TwitterConfig {
    /// Base URL of the v2 API.
    #[serde(default = "default_twitter_api")]
    pub api_base: String,

    /// Base URL of the media upload API.
    #[serde(default = "default_twitter_upload")]
    pub upload_base: String,

    /// OAuth 2.0 user-context bearer token. Posting is disabled when unset.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

/// Intervals of the scheduled functions, in seconds. Zero disables a job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_backup_interval")]
    pub backup_interval_seconds: u64,

    #[serde(default = "default_tweet_interval")]
    pub tweet_interval_seconds: u64,

    /// Whether the create-user trigger runs.
    #[serde(default = "default_true")]
    pub create_user_trigger: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "johndao.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_canister_id() -> String {
    "migeh-kqaaa-aaaai-aatrq-cai".to_string()
}

fn default_canister_host() -> String {
    "https://icp0.io".to_string()
}

fn default_twitter_api() -> String {
    "https://api.twitter.com".to_string()
}

fn default_twitter_upload() -> String {
    "https://upload.twitter.com".to_string()
}

fn default_backup_interval() -> u64 {
    24 * 60 * 60
}

fn default_tweet_interval() -> u64 {
    5 * 60
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for CanisterConfig {
    fn default() -> Self {
        Self {
            id: default_canister_id(),
            host: default_canister_host(),
            identity_secret: None,
        }
    }
}

impl Default for TwitterConfig {
    fn default() -> Self {
        Self {
            api_base: default_twitter_api(),
            upload_base: default_twitter_upload(),
            bearer_token: None,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            backup_interval_seconds: default_backup_interval(),
            tweet_interval_seconds: default_tweet_interval(),
            create_user_trigger: true,
        }
    }
}

fn redacted(secret: &Option<String>) -> &'static str {
    if secret.is_some() {
        "[REDACTED]"
    } else {
        "<unset>"
    }
}

impl fmt::Debug for CanisterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanisterConfig")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("identity_secret", &redacted(&self.identity_secret))
            .finish()
    }
}

impl fmt::Debug for TwitterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitterConfig")
            .field("api_base", &self.api_base)
            .field("upload_base", &self.upload_base)
            .field("bearer_token", &redacted(&self.bearer_token))
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
/// Environment variable overrides:
/// - `JOHNDAO_HOST`, `JOHNDAO_PORT` override `server.*`
/// - `JOHNDAO_DB_PATH` overrides `database.path`
/// - `JOHNDAO_LOG_LEVEL`, `JOHNDAO_LOG_JSON` override `logging.*`
/// - `JOHNDAO_CANISTER_ID`, `JOHNDAO_CANISTER_HOST` override `canister.id` and `canister.host`
/// - `JOHNDAO_IDENTITY_SECRET` overrides `canister.identity_secret`
/// - `JOHNDAO_TWITTER_BEARER_TOKEN` overrides `twitter.bearer_token`
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

    apply_env(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(parsed) = var("JOHNDAO_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = var("JOHNDAO_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(db_path) = var("JOHNDAO_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("JOHNDAO_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("JOHNDAO_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(id) = var("JOHNDAO_CANISTER_ID") {
        config.canister.id = id;
    }
    if let Some(host) = var("JOHNDAO_CANISTER_HOST") {
        config.canister.host = host;
    }
    if let Some(secret) = var("JOHNDAO_IDENTITY_SECRET") {
        config.canister.identity_secret = Some(secret);
    }
    if let Some(token) = var("JOHNDAO_TWITTER_BEARER_TOKEN") {
        config.twitter.bearer_token = Some(token);
    }
}
