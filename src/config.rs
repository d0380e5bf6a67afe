//! Configuration loading
//!
//! Configuration comes from an optional JSON file plus environment
//! overrides (`ANTHROPIC_API_KEY`, `TFO_MCP_BASE_URL`). Unknown fields
//! are rejected so typos fail loudly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::values::Model;

/// Configuration failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {message}")]
    Validation { message: String },
}

/// Root configuration structure.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub claude: ClaudeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from a file, or defaults when no path is given. Environment
    /// overrides are applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)?
            }
            None => Config::default(),
        };

        if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
            if !api_key.is_empty() {
                config.claude.api_key = Some(api_key);
            }
        }
        if let Ok(base_url) = std::env::var("TFO_MCP_BASE_URL") {
            if !base_url.is_empty() {
                config.claude.base_url = base_url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.claude.max_tokens == 0 {
            return Err(ConfigError::Validation {
                message: "claude.max_tokens must be positive".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.claude.temperature) {
            return Err(ConfigError::Validation {
                message: "claude.temperature must be within [0, 2]".to_string(),
            });
        }
        if !(self.claude.top_p > 0.0 && self.claude.top_p <= 1.0) {
            return Err(ConfigError::Validation {
                message: "claude.top_p must be within (0, 1]".to_string(),
            });
        }
        if self.claude.tool_loop_limit == 0 {
            return Err(ConfigError::Validation {
                message: "claude.tool_loop_limit must be positive".to_string(),
            });
        }
        if self.server.max_concurrent_requests == 0 {
            return Err(ConfigError::Validation {
                message: "server.max_concurrent_requests must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Dispatcher and process settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Maximum concurrently running request handlers.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// Grace period for in-flight handlers on shutdown, in milliseconds.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// Upstream Claude settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaudeConfig {
    /// API key; usually supplied via `ANTHROPIC_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: Model,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_top_p")]
    pub top_p: f64,

    #[serde(default)]
    pub top_k: u32,

    /// Per-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per upstream call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base retry delay in milliseconds; the n-th retry waits n times this.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Hard cap on tool-use turns per execute call.
    #[serde(default = "default_tool_loop_limit")]
    pub tool_loop_limit: u32,
}

impl ClaudeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: 0,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            tool_loop_limit: default_tool_loop_limit(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
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

/// Default config file location under the user's config directory.
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("tfo-mcp")
            .join("config.json")
    })
}

fn default_max_concurrent() -> usize {
    32
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> Model {
    crate::values::DEFAULT_MODEL
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_top_p() -> f64 {
    0.9
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_tool_loop_limit() -> u32 {
    16
}

fn default_log_level() -> String {
    "warn".to_string()
}
