//! Configuration module for issuewatch.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, WatchError};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/issuewatch.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/issuewatch.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// Update checking configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Interval between two ticks in seconds.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Maximum number of feeds fetched at the same time within one tick.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    /// Consecutive failures after which a feed is reported at error level.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

fn default_check_interval() -> u64 {
    60 // 1 minute
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_max_consecutive_errors() -> u32 {
    5
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

/// GitHub API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// Base URL of the REST API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Personal access token (empty = unauthenticated).
    #[serde(default)]
    pub token: String,
    /// Number of issues requested per page (1-100).
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    /// Maximum number of pages walked back in one fetch.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Total request timeout in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Maximum response body size in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: u64,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_per_page() -> u32 {
    30
}

fn default_max_pages() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    20
}

fn default_total_timeout() -> u64 {
    30
}

fn default_max_response_bytes() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_user_agent() -> String {
    "issuewatch/0.1".to_string()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: String::new(),
            per_page: default_per_page(),
            max_pages: default_max_pages(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            total_timeout_secs: default_total_timeout(),
            max_response_bytes: default_max_response_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Update checking configuration.
    #[serde(default)]
    pub watch: WatchConfig,
    /// GitHub API configuration.
    #[serde(default)]
    pub github: GitHubConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(WatchError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| WatchError::Validation(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `ISSUEWATCH_GITHUB_TOKEN`: Override the GitHub API token
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("ISSUEWATCH_GITHUB_TOKEN") {
            if !token.is_empty() {
                self.github.token = token;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.watch.check_interval_secs == 0 {
            return Err(WatchError::Config(
                "watch.check_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.watch.max_concurrent_fetches == 0 {
            return Err(WatchError::Config(
                "watch.max_concurrent_fetches must be greater than 0".to_string(),
            ));
        }
        if !(1..=100).contains(&self.github.per_page) {
            return Err(WatchError::Config(format!(
                "github.per_page must be between 1 and 100 (got {})",
                self.github.per_page
            )));
        }
        if self.github.max_pages == 0 {
            return Err(WatchError::Config(
                "github.max_pages must be greater than 0".to_string(),
            ));
        }
        let api_url = url::Url::parse(&self.github.api_url)
            .map_err(|e| WatchError::Config(format!("github.api_url is invalid: {e}")))?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(WatchError::Config(format!(
                "github.api_url has unsupported scheme: {}",
                api_url.scheme()
            )));
        }
        Ok(())
    }
}
