//! Common error types for Wattcast
//!
//! This module defines all error types used across the Wattcast workspace.
//! Startup errors (config, model, scaler) are fatal; cycle errors are returned
//! to the worker, which logs and counts them.

use thiserror::Error;

/// Main error type for Wattcast
#[derive(Error, Debug)]
pub enum WattcastError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model loading or inference errors
    #[error("Model error: {0}")]
    Model(String),

    /// Feature scaler loading or transform errors
    #[error("Scaler error: {0}")]
    Scaler(String),

    /// Tensor operation errors
    #[error("Tensor error: {0}")]
    Tensor(String),

    /// A forecasting cycle could not produce a value
    #[error("Forecast error: {0}")]
    Forecast(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input line or value
    #[error("Parse error: {0}")]
    Parse(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WattcastError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        WattcastError::Config(msg.into())
    }

    /// Create a model error
    pub fn model(msg: impl Into<String>) -> Self {
        WattcastError::Model(msg.into())
    }

    /// Create a scaler error
    pub fn scaler(msg: impl Into<String>) -> Self {
        WattcastError::Scaler(msg.into())
    }

    /// Create a tensor error
    pub fn tensor(msg: impl Into<String>) -> Self {
        WattcastError::Tensor(msg.into())
    }

    /// Create a forecast error
    pub fn forecast(msg: impl Into<String>) -> Self {
        WattcastError::Forecast(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        WattcastError::Parse(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        WattcastError::Internal(msg.into())
    }
}

/// Result type alias for Wattcast operations
pub type Result<T> = std::result::Result<T, WattcastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WattcastError::scaler("data_min is NaN");
        assert_eq!(err.to_string(), "Scaler error: data_min is NaN");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: WattcastError = io.into();
        assert!(matches!(err, WattcastError::Io(_)));
    }
}
