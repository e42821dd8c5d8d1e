//! Wattcast common library
//!
//! This crate contains shared code used across Wattcast components.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use config::{ForecasterConfig, WattcastConfig};
pub use error::{Result, WattcastError};
pub use metrics::{MetricsRegistry, METRICS};
