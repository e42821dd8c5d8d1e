//! Metrics collection for Wattcast
//!
//! This module provides Prometheus metrics for the forecast worker.

use lazy_static::lazy_static;
use prometheus::{Gauge, Histogram, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics registry for Wattcast
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub forecast: ForecastMetrics,
}

/// Forecast-cycle metrics
#[derive(Debug, Clone)]
pub struct ForecastMetrics {
    /// Total number of cycles started
    pub cycles_total: IntCounter,

    /// Cycles skipped for lack of readings
    pub cycles_skipped: IntCounter,

    /// Forecasts produced and published
    pub forecasts_total: IntCounter,

    /// Cycles that failed during scaling, inference or inverse-transform
    pub failures_total: IntCounter,

    /// Duration of scale + predict + inverse-transform
    pub inference_duration: Histogram,

    /// Most recently published forecast value
    pub last_forecast: Gauge,

    /// Readings held in the shared buffer at the start of the last cycle
    pub readings_buffered: IntGauge,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let cycles_total = IntCounter::new(
            "wattcast_forecast_cycles_total",
            "Total number of forecasting cycles started"
        ).unwrap();

        let cycles_skipped = IntCounter::new(
            "wattcast_forecast_cycles_skipped_total",
            "Forecasting cycles skipped because too few readings were buffered"
        ).unwrap();

        let forecasts_total = IntCounter::new(
            "wattcast_forecasts_total",
            "Total number of forecasts published"
        ).unwrap();

        let failures_total = IntCounter::new(
            "wattcast_forecast_failures_total",
            "Forecasting cycles that failed"
        ).unwrap();

        let inference_duration = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "wattcast_inference_duration_seconds",
                "Scale, predict and inverse-transform duration in seconds"
            ).buckets(vec![0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0])
        ).unwrap();

        let last_forecast = Gauge::new(
            "wattcast_last_forecast",
            "Most recently published forecast value"
        ).unwrap();

        let readings_buffered = IntGauge::new(
            "wattcast_readings_buffered",
            "Readings held in the shared buffer"
        ).unwrap();

        // Register all metrics
        registry.register(Box::new(cycles_total.clone())).unwrap();
        registry.register(Box::new(cycles_skipped.clone())).unwrap();
        registry.register(Box::new(forecasts_total.clone())).unwrap();
        registry.register(Box::new(failures_total.clone())).unwrap();
        registry.register(Box::new(inference_duration.clone())).unwrap();
        registry.register(Box::new(last_forecast.clone())).unwrap();
        registry.register(Box::new(readings_buffered.clone())).unwrap();

        let forecast = ForecastMetrics {
            cycles_total,
            cycles_skipped,
            forecasts_total,
            failures_total,
            inference_duration,
            last_forecast,
            readings_buffered,
        };

        MetricsRegistry { registry, forecast }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# failed to encode metrics: {}\n", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let metrics = MetricsRegistry::new();

        metrics.forecast.cycles_total.inc();
        metrics.forecast.last_forecast.set(109.0);
        metrics.forecast.readings_buffered.set(10);

        let output = metrics.gather();
        assert!(output.contains("wattcast_forecast_cycles_total 1"));
        assert!(output.contains("wattcast_last_forecast 109"));
        assert!(output.contains("wattcast_readings_buffered 10"));
    }
}
