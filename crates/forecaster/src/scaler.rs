//! Feature scaling
//!
//! Fitted transforms applied to the window before inference and inverted on
//! the model output. Parameters are produced by the training pipeline and
//! stored as JSON, e.g.
//!
//! ```json
//! { "kind": "min_max", "data_min": 80.0, "data_max": 640.0, "feature_range": [0.0, 1.0] }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;
use wattcast_common::{Result, WattcastError};

/// A fitted, invertible single-feature transform
pub trait FeatureScaler: Send + Sync {
    /// Map raw values into the model's normalized range
    fn transform(&self, values: &[f64]) -> Result<Vec<f64>>;

    /// Map normalized values back to the raw scale
    fn inverse_transform(&self, values: &[f64]) -> Result<Vec<f64>>;
}

fn default_feature_range() -> (f64, f64) {
    (0.0, 1.0)
}

/// Scaler parameters as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scaler {
    /// Rescale `[data_min, data_max]` onto `feature_range`
    MinMax {
        data_min: f64,
        data_max: f64,
        #[serde(default = "default_feature_range")]
        feature_range: (f64, f64),
    },

    /// Remove `mean` and divide by `scale`
    Standard { mean: f64, scale: f64 },

    /// Pass values through unchanged
    Identity,
}

impl Scaler {
    /// Load and validate scaler parameters from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| WattcastError::scaler(format!("Failed to read scaler {}: {}", path.display(), e)))?;

        let scaler: Scaler = serde_json::from_str(&content)
            .map_err(|e| WattcastError::scaler(format!("Failed to parse scaler {}: {}", path.display(), e)))?;

        scaler.validate()?;
        info!("Loaded {} scaler from {}", scaler.kind(), path.display());
        Ok(scaler)
    }

    /// Reject parameters that would produce non-finite output
    pub fn validate(&self) -> Result<()> {
        match *self {
            Scaler::MinMax { data_min, data_max, feature_range: (lo, hi) } => {
                if ![data_min, data_max, lo, hi].iter().all(|v| v.is_finite()) {
                    return Err(WattcastError::scaler("min_max parameters must be finite"));
                }
                if data_max < data_min {
                    return Err(WattcastError::scaler(format!(
                        "data_max {} is below data_min {}",
                        data_max, data_min
                    )));
                }
                if hi <= lo {
                    return Err(WattcastError::scaler(format!(
                        "feature_range ({}, {}) is empty",
                        lo, hi
                    )));
                }
            }
            Scaler::Standard { mean, scale } => {
                if !mean.is_finite() || !scale.is_finite() || scale < 0.0 {
                    return Err(WattcastError::scaler(format!(
                        "standard parameters must be finite with non-negative scale (mean {}, scale {})",
                        mean, scale
                    )));
                }
            }
            Scaler::Identity => {}
        }
        Ok(())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Scaler::MinMax { .. } => "min_max",
            Scaler::Standard { .. } => "standard",
            Scaler::Identity => "identity",
        }
    }

    /// `(multiplier, offset)` such that `scaled = raw * multiplier + offset`
    fn affine(&self) -> (f64, f64) {
        match *self {
            Scaler::MinMax { data_min, data_max, feature_range: (lo, hi) } => {
                let multiplier = (hi - lo) / non_zero(data_max - data_min);
                (multiplier, lo - data_min * multiplier)
            }
            Scaler::Standard { mean, scale } => {
                let scale = non_zero(scale);
                (1.0 / scale, -mean / scale)
            }
            Scaler::Identity => (1.0, 0.0),
        }
    }
}

/// A zero spread means a constant feature; treat it as unit spread
fn non_zero(spread: f64) -> f64 {
    if spread == 0.0 {
        1.0
    } else {
        spread
    }
}

fn checked(values: Vec<f64>, direction: &str) -> Result<Vec<f64>> {
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(WattcastError::scaler(format!("{} produced non-finite value {}", direction, bad)));
    }
    Ok(values)
}

impl FeatureScaler for Scaler {
    fn transform(&self, values: &[f64]) -> Result<Vec<f64>> {
        let (multiplier, offset) = self.affine();
        checked(values.iter().map(|v| v * multiplier + offset).collect(), "transform")
    }

    fn inverse_transform(&self, values: &[f64]) -> Result<Vec<f64>> {
        let (multiplier, offset) = self.affine();
        checked(values.iter().map(|v| (v - offset) / multiplier).collect(), "inverse transform")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-9, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_min_max() {
        let scaler = Scaler::MinMax {
            data_min: 100.0,
            data_max: 200.0,
            feature_range: (0.0, 1.0),
        };

        let scaled = scaler.transform(&[100.0, 150.0, 200.0, 250.0]).unwrap();
        assert_close(&scaled, &[0.0, 0.5, 1.0, 1.5]);

        let restored = scaler.inverse_transform(&scaled).unwrap();
        assert_close(&restored, &[100.0, 150.0, 200.0, 250.0]);
    }

    #[test]
    fn test_min_max_custom_range() {
        let scaler = Scaler::MinMax {
            data_min: 0.0,
            data_max: 10.0,
            feature_range: (-1.0, 1.0),
        };

        assert_close(&scaler.transform(&[0.0, 5.0, 10.0]).unwrap(), &[-1.0, 0.0, 1.0]);
        assert_close(&scaler.inverse_transform(&[0.5]).unwrap(), &[7.5]);
    }

    #[test]
    fn test_min_max_constant_feature() {
        let scaler = Scaler::MinMax {
            data_min: 42.0,
            data_max: 42.0,
            feature_range: (0.0, 1.0),
        };

        assert_close(&scaler.transform(&[42.0, 43.0]).unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn test_standard() {
        let scaler = Scaler::Standard { mean: 300.0, scale: 50.0 };

        assert_close(&scaler.transform(&[250.0, 300.0, 400.0]).unwrap(), &[-1.0, 0.0, 2.0]);
        assert_close(&scaler.inverse_transform(&[1.0]).unwrap(), &[350.0]);
    }

    #[test]
    fn test_identity() {
        let scaler = Scaler::Identity;
        assert_close(&scaler.transform(&[1.5, -2.0]).unwrap(), &[1.5, -2.0]);
        assert_close(&scaler.inverse_transform(&[109.0]).unwrap(), &[109.0]);
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let scaler = Scaler::Standard { mean: 0.0, scale: 1.0 };
        assert!(scaler.transform(&[f64::INFINITY]).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"kind": "min_max", "data_min": 80.0, "data_max": 640.0}}"#).unwrap();

        let scaler = Scaler::from_file(file.path()).unwrap();
        assert_eq!(
            scaler,
            Scaler::MinMax {
                data_min: 80.0,
                data_max: 640.0,
                feature_range: (0.0, 1.0),
            }
        );
    }

    #[test]
    fn test_from_file_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"kind": "min_max", "data_min": 10.0, "data_max": 1.0}}"#).unwrap();
        assert!(Scaler::from_file(file.path()).is_err());

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"kind": "robust"}}"#).unwrap();
        assert!(Scaler::from_file(file.path()).is_err());

        assert!(Scaler::from_file("/nonexistent/scaler.json").is_err());
    }
}
