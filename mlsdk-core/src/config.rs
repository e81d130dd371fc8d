//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/mlsdk/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/mlsdk/` (~/.config/mlsdk/)
//! - State/Logs: `$XDG_STATE_HOME/mlsdk/` (~/.local/state/mlsdk/)
//!
//! ```toml
//! [client]
//! api_key = "ml_live_xxxxxxxxxxxx"
//! project_id = "my-project"
//! debug = true
//!
//! [logging]
//! level = "debug"
//! ```

use crate::error::{Error, Result};
use crate::types::Attributes;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Production analytics endpoint
pub const DEFAULT_SERVER_ENDPOINT: &str = "https://app.mindlytics.ai";

/// Directory named by the XDG variable `var`, else `$HOME/<fallback>`
///
/// Empty and relative values are ignored, as the XDG base directory rules
/// require.
fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    match std::env::var_os(var).map(PathBuf::from) {
        Some(dir) if dir.is_absolute() => dir,
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(fallback),
    }
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Client connection settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings consumed when a [`crate::Client`] is constructed
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Organization API key, sent as a bearer token
    #[serde(default)]
    pub api_key: String,

    /// Default project for sessions that don't name one
    pub project_id: Option<String>,

    /// Override for the analytics endpoint
    pub server_endpoint: Option<String>,

    /// Emit per-message debug events
    #[serde(default)]
    pub debug: bool,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total time budget for retrying connection failures, in seconds
    #[serde(default = "default_max_retry_secs")]
    pub max_retry_secs: u64,

    /// First retry delay in milliseconds (doubles each attempt)
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound for a single retry delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Maximum undelivered messages per session (unbounded when unset)
    pub max_pending: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            project_id: None,
            server_endpoint: None,
            debug: false,
            timeout_secs: default_timeout_secs(),
            max_retry_secs: default_max_retry_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_pending: None,
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retry_secs() -> u64 {
    60
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl ClientConfig {
    /// Create a config with the given API key and defaults for everything else
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Effective endpoint without a trailing slash
    pub fn endpoint(&self) -> String {
        self.server_endpoint
            .as_deref()
            .unwrap_or(DEFAULT_SERVER_ENDPOINT)
            .trim_end_matches('/')
            .to_string()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn max_retry_elapsed(&self) -> Duration {
        Duration::from_secs(self.max_retry_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("client.api_key is required".to_string()));
        }
        let endpoint = self.endpoint();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::Config(format!(
                "client.server_endpoint must be an http(s) URL, got {:?}",
                endpoint
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "client.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.max_pending == Some(0) {
            return Err(Error::Config(
                "client.max_pending must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-session options passed to [`crate::Client::create_session`]
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Explicit session id; a UUID is generated at start when absent
    pub session_id: Option<String>,
    /// Project id; falls back to the client's default project
    pub project_id: Option<String>,
    /// Optional end-user id, merged into the session attributes
    pub user_id: Option<String>,
    /// Attributes sent with the session start/end messages
    pub attributes: Option<Attributes>,
}

impl SessionConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: Some(project_id.into()),
            ..Default::default()
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/mlsdk/config.toml` (~/.config/mlsdk/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_dir("XDG_CONFIG_HOME", ".config").join("mlsdk").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/mlsdk/` (~/.local/state/mlsdk/)
    pub fn state_dir() -> PathBuf {
        xdg_dir("XDG_STATE_HOME", ".local/state").join("mlsdk")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join(crate::logging::LOG_FILE_NAME)
    }
}
