//! TOML Configuration File Support
//!
//! Centralized configuration for the relay server, loaded from
//! `~/.config/relay/relay.toml` with environment and CLI overrides.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`RELAY_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8080"
//! shutdown_grace_ms = 5000
//!
//! [stream]
//! relay_capacity = 5
//! token_delay_ms = 80
//! token_jitter_ms = 40
//! sse_interval_ms = 1000
//! text_interval_ms = 500
//! json_interval_ms = 1000
//! deadline_ms = 0          # 0 = no deadline
//! keep_alive_ms = 15000    # 0 = no keep-alive comments
//! default_prompt = "Tell me about streaming"
//! history_limit = 64
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::DEFAULT_HISTORY_LIMIT;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("Failed to read config file at {path}: {source}")]
    Io {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range or malformed
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Where the highest-priority value in a configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from a command-line argument
    Cli,
    /// Value from an environment variable
    Env,
    /// Value from the TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Listener settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind: SocketAddr,
    /// How long shutdown waits for live sessions to end
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Per-session streaming settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Relay channel capacity: how far a source may run ahead of its sink
    pub relay_capacity: usize,
    /// Base delay between pipeline tokens
    pub token_delay: Duration,
    /// Random extra delay (0..jitter) added to each pipeline token
    pub token_jitter: Duration,
    /// Delay between SSE messages
    pub sse_interval: Duration,
    /// Delay between text lines
    pub text_interval: Duration,
    /// Delay between JSON array records
    pub json_interval: Duration,
    /// Number of messages on the SSE endpoint
    pub sse_messages: u32,
    /// Number of records on the JSON endpoint
    pub json_messages: u32,
    /// Maximum session duration (`None` = unlimited)
    pub deadline: Option<Duration>,
    /// Idle interval before an SSE keep-alive comment (`None` = disabled)
    pub keep_alive: Option<Duration>,
    /// Prompt used by the pipeline endpoint when none is supplied
    pub default_prompt: String,
    /// Finished session reports kept for diagnostics
    pub history_limit: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            relay_capacity: 5,
            token_delay: Duration::from_millis(80),
            token_jitter: Duration::from_millis(40),
            sse_interval: Duration::from_secs(1),
            text_interval: Duration::from_millis(500),
            json_interval: Duration::from_secs(1),
            sse_messages: 10,
            json_messages: 5,
            deadline: None,
            keep_alive: Some(Duration::from_secs(15)),
            default_prompt: "Tell me about streaming".to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Fully resolved relay configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Listener settings
    pub server: ServerConfig,
    /// Streaming settings
    pub stream: StreamConfig,
    /// Config file that was loaded, if any
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            stream: StreamConfig::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Where the highest-priority value came from
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check cross-field constraints and normalize recoverable values
    ///
    /// A relay capacity of zero is raised to one, since a zero-capacity relay
    /// could never hand over a token.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for values that cannot be repaired.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.stream.relay_capacity == 0 {
            tracing::warn!("relay_capacity = 0 is not usable, using 1");
            self.stream.relay_capacity = 1;
        }
        if self.stream.relay_capacity > 65_536 {
            return Err(ConfigError::Invalid(format!(
                "relay_capacity {} exceeds 65536",
                self.stream.relay_capacity
            )));
        }
        if self.stream.default_prompt.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_prompt must not be empty".to_string(),
            ));
        }
        if self.stream.sse_messages == 0 || self.stream.json_messages == 0 {
            return Err(ConfigError::Invalid(
                "sse_messages and json_messages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[server]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listen address, e.g. `"127.0.0.1:8080"`
    pub bind: Option<String>,
    /// Shutdown grace period in milliseconds
    pub shutdown_grace_ms: Option<u64>,
}

/// `[stream]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Relay channel capacity
    pub relay_capacity: Option<usize>,
    /// Base pipeline token delay in milliseconds
    pub token_delay_ms: Option<u64>,
    /// Pipeline token jitter in milliseconds
    pub token_jitter_ms: Option<u64>,
    /// SSE message interval in milliseconds
    pub sse_interval_ms: Option<u64>,
    /// Text line interval in milliseconds
    pub text_interval_ms: Option<u64>,
    /// JSON record interval in milliseconds
    pub json_interval_ms: Option<u64>,
    /// SSE message count
    pub sse_messages: Option<u32>,
    /// JSON record count
    pub json_messages: Option<u32>,
    /// Session deadline in milliseconds (0 = none)
    pub deadline_ms: Option<u64>,
    /// SSE keep-alive interval in milliseconds (0 = disabled)
    pub keep_alive_ms: Option<u64>,
    /// Default pipeline prompt
    pub default_prompt: Option<String>,
    /// Finished session reports to keep
    pub history_limit: Option<usize>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Listener settings
    pub server: ServerToml,
    /// Streaming settings
    pub stream: StreamToml,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/relay/relay.toml` or
/// `~/.config/relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("relay").join("relay.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if a value is invalid. A missing config file is not an error.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if a value is
/// invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with a custom environment lookup
///
/// `env` maps a variable name to its value; tests pass a fixed map instead of
/// touching the process environment.
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RelayConfig::default();

    if let Some(config_path) = path {
        if config_path.exists() {
            let toml_config = read_toml(&config_path)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.source = ConfigSource::File;
            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
            config.config_file_path = Some(config_path);
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

fn read_toml(path: &Path) -> Result<RelayToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(toml::from_str(&content)?)
}

fn parse_bind(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("bind address '{value}' is not host:port")))
}

/// Zero means "disabled" for optional intervals
fn optional_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) -> Result<(), ConfigError> {
    if let Some(ref bind) = toml.server.bind {
        config.server.bind = parse_bind(bind)?;
    }
    if let Some(ms) = toml.server.shutdown_grace_ms {
        config.server.shutdown_grace = Duration::from_millis(ms);
    }

    let stream = &toml.stream;
    if let Some(capacity) = stream.relay_capacity {
        config.stream.relay_capacity = capacity;
    }
    if let Some(ms) = stream.token_delay_ms {
        config.stream.token_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = stream.token_jitter_ms {
        config.stream.token_jitter = Duration::from_millis(ms);
    }
    if let Some(ms) = stream.sse_interval_ms {
        config.stream.sse_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = stream.text_interval_ms {
        config.stream.text_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = stream.json_interval_ms {
        config.stream.json_interval = Duration::from_millis(ms);
    }
    if let Some(n) = stream.sse_messages {
        config.stream.sse_messages = n;
    }
    if let Some(n) = stream.json_messages {
        config.stream.json_messages = n;
    }
    if let Some(ms) = stream.deadline_ms {
        config.stream.deadline = optional_millis(ms);
    }
    if let Some(ms) = stream.keep_alive_ms {
        config.stream.keep_alive = optional_millis(ms);
    }
    if let Some(ref prompt) = stream.default_prompt {
        config.stream.default_prompt = prompt.clone();
    }
    if let Some(limit) = stream.history_limit {
        config.stream.history_limit = limit;
    }
    Ok(())
}

/// Parse a numeric environment value, warning and ignoring it when malformed
fn env_number<T, F>(env: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring malformed environment value");
            None
        }
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut RelayConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bind) = env("RELAY_BIND") {
        config.server.bind = parse_bind(bind.trim())?;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env_number::<u64, _>(&env, "RELAY_SHUTDOWN_GRACE_MS") {
        config.server.shutdown_grace = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(capacity) = env_number::<usize, _>(&env, "RELAY_CAPACITY") {
        config.stream.relay_capacity = capacity;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env_number::<u64, _>(&env, "RELAY_TOKEN_DELAY_MS") {
        config.stream.token_delay = Duration::from_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env_number::<u64, _>(&env, "RELAY_DEADLINE_MS") {
        config.stream.deadline = optional_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env_number::<u64, _>(&env, "RELAY_KEEP_ALIVE_MS") {
        config.stream.keep_alive = optional_millis(ms);
        config.source = ConfigSource::Env;
    }
    if let Some(prompt) = env("RELAY_DEFAULT_PROMPT") {
        config.stream.default_prompt = prompt;
        config.source = ConfigSource::Env;
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen address override
    pub bind: Option<SocketAddr>,
    /// Relay capacity override
    pub relay_capacity: Option<usize>,
    /// Pipeline token delay override (milliseconds)
    pub token_delay_ms: Option<u64>,
    /// Session deadline override (milliseconds, 0 = none)
    pub deadline_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create an empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Set relay capacity override
    #[must_use]
    pub fn with_relay_capacity(mut self, capacity: usize) -> Self {
        self.relay_capacity = Some(capacity);
        self
    }

    /// Set pipeline token delay override
    #[must_use]
    pub fn with_token_delay_ms(mut self, ms: u64) -> Self {
        self.token_delay_ms = Some(ms);
        self
    }

    /// Set deadline override
    #[must_use]
    pub fn with_deadline_ms(mut self, ms: u64) -> Self {
        self.deadline_ms = Some(ms);
        self
    }

    fn is_empty(&self) -> bool {
        self.bind.is_none()
            && self.relay_capacity.is_none()
            && self.token_delay_ms.is_none()
            && self.deadline_ms.is_none()
    }

    /// Apply overrides to a configuration and re-validate it
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if an override produces an invalid
    /// configuration.
    pub fn apply(&self, config: &mut RelayConfig) -> Result<(), ConfigError> {
        if self.is_empty() {
            return Ok(());
        }
        config.source = ConfigSource::Cli;

        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(capacity) = self.relay_capacity {
            config.stream.relay_capacity = capacity;
        }
        if let Some(ms) = self.token_delay_ms {
            config.stream.token_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.deadline_ms {
            config.stream.deadline = optional_millis(ms);
        }
        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
