//! Wattcast Forecaster
//!
//! Periodic power-consumption forecasting with a pre-trained LSTM. A
//! background worker feeds the most recent window of shared readings through
//! a fitted scaler and the sequence model, and publishes one forecast per cycle.

pub mod forecast;
pub mod model;
pub mod readings;
pub mod scaler;
pub mod tensor;
pub mod worker;

pub use forecast::{CycleOutcome, Forecast, Forecaster};
pub use model::{LstmModel, SequenceModel};
pub use readings::{Reading, ReadingBuffer, ReadingSource, TIMESTAMP_FORMAT};
pub use scaler::{FeatureScaler, Scaler};
pub use worker::{ForecastWorker, WorkerState};
