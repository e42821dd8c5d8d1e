//! Configuration structures for Wattcast
//!
//! This module defines all configuration types used by the forecaster.
//! Configurations are loaded from YAML files and can be overridden by environment variables.

use crate::error::{Result, WattcastError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for Wattcast
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WattcastConfig {
    /// Forecast worker configuration
    #[serde(default)]
    pub forecaster: ForecasterConfig,

    /// Reading ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Forecast worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecasterConfig {
    /// Path to the trained sequence model (safetensors)
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    /// Path to the fitted feature scaler (JSON)
    #[serde(default = "default_scaler_path")]
    pub scaler_path: PathBuf,

    /// Number of most recent readings fed to the model
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Minimum number of buffered readings before a cycle runs inference
    #[serde(default = "default_window_size")]
    pub min_readings: usize,

    /// Seconds between forecasting cycles
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum readings retained in the shared buffer
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Forecasts buffered per subscriber before the oldest are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Reading ingestion configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Stop the process when the reading stream reaches end of input
    #[serde(default)]
    pub exit_on_eof: bool,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Record Prometheus metrics for forecast cycles and dump them at shutdown
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,
}

/// Default value functions
fn default_model_path() -> PathBuf {
    PathBuf::from("models/lstm_model.safetensors")
}

fn default_scaler_path() -> PathBuf {
    PathBuf::from("models/scaler.json")
}

fn default_window_size() -> usize {
    10
}

fn default_poll_interval() -> u64 {
    60
}

fn default_history_capacity() -> usize {
    1440 // one day of per-minute readings
}

fn default_channel_capacity() -> usize {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

impl Default for ForecasterConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            scaler_path: default_scaler_path(),
            window_size: default_window_size(),
            min_readings: default_window_size(),
            poll_interval_secs: default_poll_interval(),
            history_capacity: default_history_capacity(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
        }
    }
}

impl ForecasterConfig {
    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Validate forecaster settings
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(WattcastError::config("window_size must be at least 1"));
        }
        if self.min_readings < self.window_size {
            return Err(WattcastError::config(format!(
                "min_readings ({}) must not be smaller than window_size ({})",
                self.min_readings, self.window_size
            )));
        }
        if self.history_capacity < self.min_readings {
            return Err(WattcastError::config(format!(
                "history_capacity ({}) cannot hold min_readings ({})",
                self.history_capacity, self.min_readings
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(WattcastError::config("poll_interval_secs must be positive"));
        }
        if self.channel_capacity == 0 {
            return Err(WattcastError::config("channel_capacity must be positive"));
        }
        Ok(())
    }
}

impl WattcastConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| WattcastError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config: WattcastConfig = serde_yaml::from_str(&content)
            .map_err(|e| WattcastError::Config(format!("Failed to parse config file {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, otherwise start from defaults, then apply env overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override individual fields from `WATTCAST_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let forecaster = &mut self.forecaster;

        if let Some(path) = lookup("WATTCAST_MODEL_PATH") {
            forecaster.model_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("WATTCAST_SCALER_PATH") {
            forecaster.scaler_path = PathBuf::from(path);
        }
        if let Some(value) = lookup("WATTCAST_WINDOW_SIZE") {
            forecaster.window_size = parse_env("WATTCAST_WINDOW_SIZE", &value)?;
        }
        if let Some(value) = lookup("WATTCAST_MIN_READINGS") {
            forecaster.min_readings = parse_env("WATTCAST_MIN_READINGS", &value)?;
        }
        if let Some(value) = lookup("WATTCAST_POLL_INTERVAL_SECS") {
            forecaster.poll_interval_secs = parse_env("WATTCAST_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("WATTCAST_EXIT_ON_EOF") {
            self.ingest.exit_on_eof = parse_env("WATTCAST_EXIT_ON_EOF", &value)?;
        }
        if let Some(level) = lookup("WATTCAST_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.forecaster.validate()?;

        match self.observability.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(WattcastError::config(format!("Invalid log level: {}", other))),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| WattcastError::config(format!("Invalid value for {}: {}", key, value)))
}
