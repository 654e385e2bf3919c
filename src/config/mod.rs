//! Configuration system for Prism
//!
//! Supports loading configuration from:
//! 1. CLI --config argument
//! 2. ~/.config/prism/config.{PRISM_ENV}.json
//! 3. Default values
//!
//! Where PRISM_ENV can be: production (default), development, test
//!
//! # Examples
//!
//! ```no_run
//! use prism::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load(None)?;
//! println!("Research service at {}", config.api_url);
//! # Ok(())
//! # }
//! ```
//!
//! ## Environment Variables
//!
//! Environment variables override config file values:
//! - PRISM_API_URL
//! - PRISM_LLM_API_URL
//! - PRISM_DATA_DIR

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config JSON: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Health monitoring cadence and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Delay before the first check
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Interval between checks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Probe timeout for the research backend
    #[serde(default = "default_backend_timeout_ms")]
    pub backend_timeout_ms: u64,

    /// Probe timeout for the LLM API
    #[serde(default = "default_llm_timeout_ms")]
    pub llm_timeout_ms: u64,

    /// Reachable services slower than this are degraded
    #[serde(default = "default_degraded_threshold_ms")]
    pub degraded_threshold_ms: u64,
}

fn default_initial_delay_ms() -> u64 {
    1500
}

fn default_interval_secs() -> u64 {
    30
}

fn default_backend_timeout_ms() -> u64 {
    3000
}

fn default_llm_timeout_ms() -> u64 {
    5000
}

fn default_degraded_threshold_ms() -> u64 {
    1500
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            interval_secs: default_interval_secs(),
            backend_timeout_ms: default_backend_timeout_ms(),
            llm_timeout_ms: default_llm_timeout_ms(),
            degraded_threshold_ms: default_degraded_threshold_ms(),
        }
    }
}

impl HealthConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "health.interval_secs must be greater than 0".to_string(),
            ));
        }

        for (name, value) in [
            ("backend_timeout_ms", self.backend_timeout_ms),
            ("llm_timeout_ms", self.llm_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "health.{} must be greater than 0",
                    name
                )));
            }
            if value > self.interval_secs * 1000 {
                return Err(ConfigError::ValidationError(format!(
                    "health.{} ({}ms) exceeds the check interval",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Research service base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// LLM API base URL (health probe only)
    #[serde(default = "default_llm_api_url")]
    pub llm_api_url: String,

    #[serde(default)]
    pub health: HealthConfig,

    /// Where the local database lives (defaults to the platform data dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[serde(default)]
    pub debug: bool,
}

fn default_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_llm_api_url() -> String {
    "https://text.pollinations.ai".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            llm_api_url: default_llm_api_url(),
            health: HealthConfig::default(),
            data_dir: None,
            debug: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&content)?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration with standard priority:
    /// 1. Explicit path
    /// 2. ~/.config/prism/config.{PRISM_ENV}.json
    /// 3. Defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            if path.exists() {
                tracing::info!("Loading config from: {:?}", path);
                return Self::from_file(path);
            } else {
                return Err(ConfigError::ValidationError(format!(
                    "Config file not found: {:?}",
                    path
                )));
            }
        }

        let env = std::env::var("PRISM_ENV").unwrap_or_else(|_| "production".to_string());

        if let Some(config_dir) = Self::config_dir() {
            let config_path = config_dir.join(format!("config.{}.json", env));

            if config_path.exists() {
                tracing::info!("Loading config from: {:?}", config_path);
                return Self::from_file(&config_path);
            }
        }

        tracing::info!("Using default configuration with environment overrides");
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PRISM_API_URL") {
            self.api_url = url;
        }

        if let Ok(url) = std::env::var("PRISM_LLM_API_URL") {
            self.llm_api_url = url;
        }

        if let Ok(dir) = std::env::var("PRISM_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, url) in [("api_url", &self.api_url), ("llm_api_url", &self.llm_api_url)] {
            if url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{} cannot be empty",
                    name
                )));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be an http(s) URL, got {}",
                    name, url
                )));
            }
        }

        self.health.validate()
    }

    /// Get the config directory path
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("prism"))
    }

    /// Path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        let dir = self.data_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "prism", "prism")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."))
        });
        dir.join("prism.db")
    }
}
