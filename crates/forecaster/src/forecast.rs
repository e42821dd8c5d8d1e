//! One forecasting cycle
//!
//! Takes the most recent window of readings, scales it, runs the sequence
//! model and maps the prediction back to the reading scale. Each cycle returns
//! a typed outcome so the caller decides how to surface skips and failures.

use crate::model::{LstmModel, SequenceModel};
use crate::readings::{ReadingSource, TIMESTAMP_FORMAT};
use crate::scaler::{FeatureScaler, Scaler};
use crate::tensor::Tensor;
use chrono::Local;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use wattcast_common::{ForecasterConfig, Result, WattcastError};

/// A published prediction
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    /// Predicted value on the reading scale
    pub value: f64,

    /// Local wall-clock time the forecast was made, `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
}

impl fmt::Display for Forecast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3} @ {}", self.value, self.timestamp)
    }
}

/// Result of a cycle that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Too few readings buffered; nothing was scaled or predicted
    Skipped { available: usize, required: usize },

    /// A forecast was produced
    Produced(Forecast),
}

/// Model, scaler and window settings for forecasting cycles
pub struct Forecaster {
    model: Arc<dyn SequenceModel>,
    scaler: Arc<dyn FeatureScaler>,
    window_size: usize,
    min_readings: usize,
}

impl Forecaster {
    /// Assemble a forecaster from loaded artifacts
    pub fn new(
        model: Arc<dyn SequenceModel>,
        scaler: Arc<dyn FeatureScaler>,
        window_size: usize,
        min_readings: usize,
    ) -> Result<Self> {
        if window_size == 0 {
            return Err(WattcastError::config("window_size must be at least 1"));
        }
        if min_readings < window_size {
            return Err(WattcastError::config(format!(
                "min_readings ({}) must not be smaller than window_size ({})",
                min_readings, window_size
            )));
        }
        if let Some(trained) = model.window_size() {
            if trained != window_size {
                return Err(WattcastError::model(format!(
                    "model was trained on windows of {} readings, configured window is {}",
                    trained, window_size
                )));
            }
        }

        Ok(Self {
            model,
            scaler,
            window_size,
            min_readings,
        })
    }

    /// Load the model and scaler named by `config`
    ///
    /// Any load failure is fatal to construction.
    pub fn load(config: &ForecasterConfig) -> Result<Self> {
        config.validate()?;

        let model = LstmModel::load(&config.model_path)?;
        let scaler = Scaler::from_file(&config.scaler_path)?;

        let forecaster = Self::new(
            Arc::new(model),
            Arc::new(scaler),
            config.window_size,
            config.min_readings,
        )?;

        info!(
            "Forecaster ready: window={}, min_readings={}",
            forecaster.window_size, forecaster.min_readings
        );
        Ok(forecaster)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn min_readings(&self) -> usize {
        self.min_readings
    }

    /// Scale, predict and inverse-transform one window of raw values
    pub fn forecast_window(&self, values: &[f64]) -> Result<f64> {
        if values.len() != self.window_size {
            return Err(WattcastError::forecast(format!(
                "window has {} values, model needs {}",
                values.len(),
                self.window_size
            )));
        }

        let scaled = self.scaler.transform(values)?;
        let input = Tensor::new(scaled.iter().map(|&v| v as f32).collect(), vec![self.window_size])?
            .reshape(vec![1, self.window_size, 1])?;

        let output = self.model.predict(&input)?;
        let predicted = output
            .data
            .first()
            .copied()
            .ok_or_else(|| WattcastError::forecast("model returned an empty prediction"))?;

        if !predicted.is_finite() {
            return Err(WattcastError::forecast(format!("model predicted {}", predicted)));
        }

        let restored = self.scaler.inverse_transform(&[predicted as f64])?;
        debug!("window {:?} -> scaled prediction {} -> {:?}", values, predicted, restored);

        restored
            .first()
            .copied()
            .ok_or_else(|| WattcastError::forecast("inverse transform returned no value"))
    }

    /// Run one cycle against the shared readings
    pub fn run_cycle(&self, source: &dyn ReadingSource) -> Result<CycleOutcome> {
        let available = source.len();
        if available < self.min_readings {
            return Ok(CycleOutcome::Skipped {
                available,
                required: self.min_readings,
            });
        }

        let window = source.snapshot_last(self.window_size);
        if window.len() < self.window_size {
            return Ok(CycleOutcome::Skipped {
                available: window.len(),
                required: self.min_readings,
            });
        }

        let values: Vec<f64> = window.iter().map(|reading| reading.value).collect();
        let value = self.forecast_window(&values)?;
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();

        Ok(CycleOutcome::Produced(Forecast { value, timestamp }))
    }
}
