//! Refresh service: owns the queue, recorder and worker pool and drives their
//! lifecycle.

use std::sync::Arc;
use std::time::Duration;

use fxrefresh_common::{Currency, CurrencyRegistry, Record, RecordIdentifier, RefreshError, Result};
use fxrefresh_provider::RateProvider;
use fxrefresh_store::RecordStore;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::PipelineConfig;
use crate::consumer::{Consumer, ConsumerConfig, PoolCompletion};
use crate::metrics::{Metrics, MetricsSnapshot, SharedMetrics};
use crate::queue::{refresh_queue, QueueSender};
use crate::recorder::Recorder;
use crate::state::{ServiceState, SharedState};

/// The asynchronous refresh pipeline.
pub struct RefreshService {
    state: SharedState,
    shutdown: CancellationToken,
    recorder: Arc<Recorder>,
    consumer: Consumer,
    completion: Mutex<Option<PoolCompletion>>,
    queue: QueueSender,
    provider: Arc<dyn RateProvider>,
    metrics: SharedMetrics,
}

impl RefreshService {
    /// Wire a service. Nothing runs until [`start`](Self::start).
    ///
    /// Fails with `Configuration` if the pipeline sizing is invalid.
    pub fn new(
        config: &PipelineConfig,
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn RateProvider>,
        registry: Arc<CurrencyRegistry>,
    ) -> Result<Self> {
        config.validate().map_err(RefreshError::Configuration)?;

        let state: SharedState = Arc::new(RwLock::new(ServiceState::Starting));
        let shutdown = CancellationToken::new();
        let metrics: SharedMetrics = Arc::new(Metrics::new());

        let (queue, receiver) = refresh_queue(config.queue_capacity, shutdown.clone());

        let recorder = Arc::new(Recorder::new(
            store,
            registry,
            queue.clone(),
            state.clone(),
            metrics.clone(),
        ));

        let (consumer, completion) = Consumer::new(
            ConsumerConfig {
                workers: config.workers,
            },
            shutdown.clone(),
            receiver,
            provider.clone(),
            recorder.clone(),
            metrics.clone(),
        );

        Ok(Self {
            state,
            shutdown,
            recorder,
            consumer,
            completion: Mutex::new(Some(completion)),
            queue,
            provider,
            metrics,
        })
    }

    /// Start the worker pool and begin accepting requests.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        // Held across the pool start so a concurrent `stop` sees either
        // `Starting` with no workers or `Running` with all of them.
        let mut state = self.state.write();
        match *state {
            ServiceState::Starting => {}
            ServiceState::Running => return Err(RefreshError::AlreadyStarted),
            ServiceState::ShuttingDown | ServiceState::Stopped => {
                return Err(RefreshError::ServiceUnavailable)
            }
        }

        self.consumer.start()?;
        *state = ServiceState::Running;
        drop(state);

        info!(
            queue_capacity = self.queue.capacity(),
            provider = self.provider.name(),
            "Refresh service running"
        );
        Ok(())
    }

    /// Stop accepting requests, cancel the workers and wait for them to exit.
    ///
    /// Fetches already in progress are completed and recorded. Records still
    /// waiting in the queue stay `created`. Calling `stop` again is a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        {
            let mut state = self.state.write();
            if matches!(*state, ServiceState::ShuttingDown | ServiceState::Stopped) {
                return;
            }
            *state = ServiceState::ShuttingDown;
        }

        info!("Stopping refresh service");
        self.shutdown.cancel();

        // An unstarted pool still holds the sender, so its completion would
        // never fire.
        let completion = self.completion.lock().await.take();
        if let Some(completion) = completion {
            if self.consumer.is_started() {
                completion.wait().await;
            }
        }

        let abandoned = self.queue.len();
        if abandoned > 0 {
            warn!(abandoned, "Queued records left in created state");
        }

        *self.state.write() = ServiceState::Stopped;
        info!("Refresh service stopped");
    }

    /// Request-boundary API.
    pub fn recorder(&self) -> Arc<Recorder> {
        self.recorder.clone()
    }

    /// Get the current service state.
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Check if the service is accepting requests.
    pub fn is_accepting_requests(&self) -> bool {
        self.state().accepts_requests()
    }

    /// Poll a record until it reaches a terminal state or `timeout` elapses.
    ///
    /// Returns the record as last seen, which is still `created` on timeout.
    pub async fn wait_for_terminal(
        &self,
        identifier: &RecordIdentifier,
        poll: Duration,
        timeout: Duration,
    ) -> Result<Record> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let record = self.recorder.fetch(identifier).await?;
            if record.status.is_terminal() || tokio::time::Instant::now() >= deadline {
                return Ok(record);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Currencies known to the rate provider.
    pub async fn provider_currencies(&self) -> Result<Vec<Currency>> {
        self.provider
            .supported_currencies()
            .await
            .map_err(|e| RefreshError::Provider(e.to_string()))
    }

    /// Get current metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.set_queue_depth(self.queue.len() as u64);
        self.metrics.snapshot()
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        self.metrics.set_queue_depth(self.queue.len() as u64);
        self.metrics.to_prometheus()
    }
}
