//! Background forecast worker
//!
//! Runs [`Forecaster::run_cycle`] on a fixed interval and publishes every
//! forecast on a broadcast channel. The CPU work of each cycle runs on the
//! blocking pool, so a slow or panicking model never stalls the runtime or
//! ends the loop.

use crate::forecast::{CycleOutcome, Forecast, Forecaster};
use crate::readings::ReadingSource;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};
use wattcast_common::metrics::MetricsRegistry;
use wattcast_common::{ForecasterConfig, Result, WattcastError, METRICS};

/// Worker lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Constructed, not yet started
    Idle,
    /// Loop task is running
    Running,
    /// Stopped; cannot be restarted
    Stopped,
}

/// State moved into the loop task
struct LoopContext {
    forecaster: Arc<Forecaster>,
    source: Arc<dyn ReadingSource>,
    poll_interval: Duration,
    sender: broadcast::Sender<Forecast>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    metrics: Option<MetricsRegistry>,
}

/// Periodic forecaster over a shared reading source
///
/// Subscribe before calling [`start`](Self::start) to receive the first
/// cycle's forecast.
pub struct ForecastWorker {
    forecaster: Arc<Forecaster>,
    source: Arc<dyn ReadingSource>,
    poll_interval: Duration,
    sender: broadcast::Sender<Forecast>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    metrics: Option<MetricsRegistry>,
    state: WorkerState,
    handle: Option<JoinHandle<()>>,
}

impl ForecastWorker {
    /// Create a worker; nothing runs until [`start`](Self::start)
    pub fn new(
        forecaster: Arc<Forecaster>,
        source: Arc<dyn ReadingSource>,
        poll_interval: Duration,
        channel_capacity: usize,
    ) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));

        Self {
            forecaster,
            source,
            poll_interval,
            sender,
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            metrics: Some(METRICS.clone()),
            state: WorkerState::Idle,
            handle: None,
        }
    }

    /// Create a worker using the interval and channel size from `config`
    pub fn from_config(
        forecaster: Arc<Forecaster>,
        source: Arc<dyn ReadingSource>,
        config: &ForecasterConfig,
    ) -> Self {
        Self::new(forecaster, source, config.poll_interval(), config.channel_capacity)
    }

    /// Record metrics into `metrics` instead of the global registry
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Do not record any metrics
    pub fn without_metrics(mut self) -> Self {
        self.metrics = None;
        self
    }

    /// Receive every forecast published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Forecast> {
        self.sender.subscribe()
    }

    pub fn state(&self) -> WorkerState {
        match (&self.state, &self.handle) {
            // the loop only exits on its own if the task was aborted
            (WorkerState::Running, Some(handle)) if handle.is_finished() => WorkerState::Stopped,
            (state, _) => *state,
        }
    }

    /// Spawn the loop task; the first cycle runs immediately
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.state != WorkerState::Idle {
            return Err(WattcastError::internal(format!(
                "forecast worker cannot start from state {:?}",
                self.state
            )));
        }

        let ctx = LoopContext {
            forecaster: Arc::clone(&self.forecaster),
            source: Arc::clone(&self.source),
            poll_interval: self.poll_interval,
            sender: self.sender.clone(),
            shutdown: Arc::clone(&self.shutdown),
            notify: Arc::clone(&self.notify),
            metrics: self.metrics.clone(),
        };

        info!("Starting forecast worker: interval={:?}", self.poll_interval);
        self.handle = Some(tokio::spawn(run_loop(ctx)));
        self.state = WorkerState::Running;
        Ok(())
    }

    /// Signal the loop to exit and wait until it has
    ///
    /// An in-flight cycle is allowed to finish; nothing is published after
    /// this returns. Stopping twice is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        // notify_one keeps a permit if the loop is mid-cycle rather than waiting
        self.notify.notify_one();
        self.state = WorkerState::Stopped;

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| WattcastError::internal(format!("forecast worker task failed: {}", e)))?;
            info!("Forecast worker stopped");
        }

        Ok(())
    }
}

impl Drop for ForecastWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shutdown.store(true, Ordering::Release);
            handle.abort();
        }
    }
}

/// Main worker loop
async fn run_loop(ctx: LoopContext) {
    let mut interval = tokio::time::interval(ctx.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if ctx.shutdown.load(Ordering::Acquire) {
            break;
        }

        tokio::select! {
            biased;
            _ = ctx.notify.notified() => continue,
            _ = interval.tick() => {}
        }

        run_cycle(&ctx).await;
    }

    debug!("Forecast loop exited");
}

/// Run one cycle on the blocking pool and record its outcome
async fn run_cycle(ctx: &LoopContext) {
    let forecaster = Arc::clone(&ctx.forecaster);
    let source = Arc::clone(&ctx.source);
    let metrics = ctx.metrics.as_ref().map(|registry| &registry.forecast);

    if let Some(metrics) = metrics {
        metrics.cycles_total.inc();
        metrics.readings_buffered.set(ctx.source.len() as i64);
    }

    let start = Instant::now();
    let outcome = tokio::task::spawn_blocking(move || forecaster.run_cycle(source.as_ref()))
        .await
        .unwrap_or_else(|e| Err(WattcastError::internal(format!("forecast cycle aborted: {}", e))));

    let elapsed = start.elapsed().as_secs_f64();

    match outcome {
        Ok(CycleOutcome::Skipped { available, required }) => {
            if let Some(metrics) = metrics {
                metrics.cycles_skipped.inc();
            }
            debug!("Skipping forecast: {} of {} readings buffered", available, required);
        }
        Ok(CycleOutcome::Produced(forecast)) => {
            if let Some(metrics) = metrics {
                metrics.inference_duration.observe(elapsed);
                metrics.forecasts_total.inc();
                metrics.last_forecast.set(forecast.value);
            }

            info!("Forecast {}", forecast);
            if ctx.sender.send(forecast).is_err() {
                trace!("No forecast subscribers");
            }
        }
        Err(e) => {
            if let Some(metrics) = metrics {
                metrics.inference_duration.observe(elapsed);
                metrics.failures_total.inc();
            }
            error!("forecasting error: {}", e);
        }
    }
}
