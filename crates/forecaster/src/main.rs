//! Wattcast - Main Entry Point
//!
//! Loads the forecasting artifacts, starts the forecast worker and feeds it
//! power readings from stdin, one `value` or `YYYY-MM-DD HH:MM:SS,value` per
//! line. Forecasts are written to stdout as `timestamp<TAB>value`.

use anyhow::Context;
use std::io::BufRead;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wattcast_common::{WattcastConfig, METRICS};
use wattcast_forecaster::{Forecast, ForecastWorker, Forecaster, Reading, ReadingBuffer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::var("WATTCAST_CONFIG")
        .unwrap_or_else(|_| "configs/forecaster.yaml".to_string());

    let config = WattcastConfig::load(&config_path)?;

    // Initialize logging
    let level = &config.observability.log_level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("wattcast={level},wattcast_forecaster={level},wattcast_common={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting Wattcast forecaster");
    info!(
        "Configuration loaded from {}: model={}, scaler={}, window={}, interval={}s",
        config_path,
        config.forecaster.model_path.display(),
        config.forecaster.scaler_path.display(),
        config.forecaster.window_size,
        config.forecaster.poll_interval_secs
    );

    let forecaster = Forecaster::load(&config.forecaster)
        .context("failed to load forecasting artifacts")?;

    let buffer = ReadingBuffer::new(config.forecaster.history_capacity);
    debug!("Reading buffer retains up to {} readings", buffer.capacity());

    let mut worker = ForecastWorker::from_config(
        Arc::new(forecaster),
        Arc::new(buffer.clone()),
        &config.forecaster,
    );
    if !config.observability.enable_metrics {
        worker = worker.without_metrics();
    }
    let printer = tokio::spawn(print_forecasts(worker.subscribe()));
    worker.start()?;

    let mut eof = spawn_stdin_reader(buffer)?;

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        count = &mut eof, if config.ingest.exit_on_eof => {
            info!("Reading stream closed after {} readings", count.unwrap_or(0));
        }
    }

    worker.stop().await?;
    drop(worker);
    printer.await?;

    if config.observability.enable_metrics {
        debug!("Final metrics:\n{}", METRICS.gather());
    }

    info!("Wattcast shutdown complete");
    Ok(())
}

/// Read readings on a dedicated thread; resolves with the count at end of input
fn spawn_stdin_reader(buffer: ReadingBuffer) -> std::io::Result<oneshot::Receiver<usize>> {
    let (tx, rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("wattcast-stdin".to_string())
        .spawn(move || {
            let mut count = 0;

            for (line_no, line) in std::io::stdin().lock().lines().enumerate() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Stopped reading stdin: {}", e);
                        break;
                    }
                };

                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }

                match Reading::parse_line(trimmed) {
                    Ok(reading) => {
                        buffer.push(reading);
                        count += 1;
                    }
                    Err(e) => warn!("Skipping line {}: {}", line_no + 1, e),
                }
            }

            let _ = tx.send(count);
        })?;

    Ok(rx)
}

/// Write each forecast to stdout until the worker goes away
async fn print_forecasts(mut forecasts: broadcast::Receiver<Forecast>) {
    loop {
        match forecasts.recv().await {
            Ok(forecast) => println!("{}\t{:.3}", forecast.timestamp, forecast.value),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Forecast output lagged, {} forecasts dropped", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
