//! Worker pool draining the refresh queue.
//!
//! Each worker takes one record at a time, asks the rate provider for the
//! pair, and applies exactly one terminal transition. Cancellation is only
//! observed between records, so a fetch that has started always completes
//! and is recorded.

use std::sync::Arc;

use fxrefresh_common::{Record, RefreshError, Result};
use fxrefresh_provider::RateProvider;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::SharedMetrics;
use crate::queue::QueueReceiver;
use crate::recorder::StatusTransitions;

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self { workers: 5 }
    }
}

/// Resolves once every worker of a started pool has exited.
pub struct PoolCompletion {
    rx: oneshot::Receiver<()>,
}

impl PoolCompletion {
    /// Wait for the pool to finish.
    ///
    /// Also returns if the pool is dropped without ever being started.
    pub async fn wait(self) {
        let _ = self.rx.await;
    }
}

/// Pool of workers consuming the refresh queue.
pub struct Consumer {
    config: ConsumerConfig,
    shutdown: CancellationToken,
    queue: QueueReceiver,
    provider: Arc<dyn RateProvider>,
    transitions: Arc<dyn StatusTransitions>,
    metrics: SharedMetrics,
    tracker: TaskTracker,
    done_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Consumer {
    /// Create a pool and the handle that reports its completion.
    pub fn new(
        config: ConsumerConfig,
        shutdown: CancellationToken,
        queue: QueueReceiver,
        provider: Arc<dyn RateProvider>,
        transitions: Arc<dyn StatusTransitions>,
        metrics: SharedMetrics,
    ) -> (Self, PoolCompletion) {
        let (done_tx, done_rx) = oneshot::channel();

        let consumer = Self {
            config,
            shutdown,
            queue,
            provider,
            transitions,
            metrics,
            tracker: TaskTracker::new(),
            done_tx: Mutex::new(Some(done_tx)),
        };

        (consumer, PoolCompletion { rx: done_rx })
    }

    /// Spawn the workers. A pool can only be started once.
    pub fn start(&self) -> Result<()> {
        let done_tx = self
            .done_tx
            .lock()
            .take()
            .ok_or(RefreshError::AlreadyStarted)?;

        for id in 0..self.config.workers {
            let worker = Worker {
                id,
                shutdown: self.shutdown.clone(),
                queue: self.queue.clone(),
                provider: self.provider.clone(),
                transitions: self.transitions.clone(),
                metrics: self.metrics.clone(),
            };
            self.tracker.spawn(worker.run());
        }
        self.tracker.close();

        let tracker = self.tracker.clone();
        tokio::spawn(async move {
            tracker.wait().await;
            info!("All refresh workers exited");
            let _ = done_tx.send(());
        });

        info!(
            workers = self.config.workers,
            provider = self.provider.name(),
            "Refresh workers started"
        );
        Ok(())
    }

    /// Whether `start` has been called.
    pub fn is_started(&self) -> bool {
        self.done_tx.lock().is_none()
    }

    /// Workers still running.
    pub fn active_workers(&self) -> usize {
        self.tracker.len()
    }
}

struct Worker {
    id: usize,
    shutdown: CancellationToken,
    queue: QueueReceiver,
    provider: Arc<dyn RateProvider>,
    transitions: Arc<dyn StatusTransitions>,
    metrics: SharedMetrics,
}

impl Worker {
    async fn run(self) {
        debug!(worker = self.id, "Worker started");

        loop {
            let record = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                next = self.queue.pop() => match next {
                    Some(record) => record,
                    None => break,
                },
            };

            self.process(record).await;
        }

        debug!(worker = self.id, "Worker stopped");
    }

    #[instrument(skip(self, record), fields(worker = self.id, identifier = %record.identifier, pair = %record.pair))]
    async fn process(&self, record: Record) {
        self.metrics.fetch_started();
        let fetched = self.provider.get_latest_rate(&record.pair).await;
        self.metrics.fetch_finished();

        match fetched {
            Ok(rate) => match self.transitions.shift_updated(&record.identifier, rate.value).await {
                Ok(()) => self.metrics.record_updated(),
                Err(e) => {
                    self.metrics.transition_error();
                    error!(error = %e, "Failed to mark record updated");
                }
            },
            Err(e) => {
                warn!(
                    provider = self.provider.name(),
                    kind = e.kind(),
                    error = %e,
                    "Rate fetch failed"
                );
                match self.transitions.shift_failed(&record.identifier).await {
                    Ok(()) => self.metrics.record_failed(),
                    Err(e) => {
                        self.metrics.transition_error();
                        error!(error = %e, "Failed to mark record failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::queue::{refresh_queue, QueueSender};
    use async_trait::async_trait;
    use fxrefresh_common::{Currency, CurrencyPair, RecordIdentifier};
    use fxrefresh_provider::{MockRateProvider, ProviderError};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Shift {
        Updated(RecordIdentifier, Decimal),
        Failed(RecordIdentifier),
    }

    /// Records every transition it is asked to apply.
    #[derive(Default)]
    struct RecordingTransitions {
        shifts: Mutex<Vec<Shift>>,
        reject: bool,
    }

    impl RecordingTransitions {
        fn shifts(&self) -> Vec<Shift> {
            self.shifts.lock().clone()
        }
    }

    #[async_trait]
    impl StatusTransitions for RecordingTransitions {
        async fn shift_updated(&self, identifier: &RecordIdentifier, rate: Decimal) -> Result<()> {
            self.shifts.lock().push(Shift::Updated(*identifier, rate));
            if self.reject {
                return Err(RefreshError::NoRecord);
            }
            Ok(())
        }

        async fn shift_failed(&self, identifier: &RecordIdentifier) -> Result<()> {
            self.shifts.lock().push(Shift::Failed(*identifier));
            if self.reject {
                return Err(RefreshError::NoRecord);
            }
            Ok(())
        }
    }

    fn eur(secondary: &str) -> CurrencyPair {
        CurrencyPair::new(Currency::eur(), Currency::new(secondary))
    }

    struct Harness {
        shutdown: CancellationToken,
        tx: QueueSender,
        provider: Arc<MockRateProvider>,
        transitions: Arc<RecordingTransitions>,
        metrics: SharedMetrics,
        consumer: Consumer,
        completion: PoolCompletion,
    }

    fn create_test_pool(workers: usize, transitions: RecordingTransitions) -> Harness {
        let shutdown = CancellationToken::new();
        let (tx, rx) = refresh_queue(5, shutdown.clone());
        let provider = Arc::new(MockRateProvider::new("mock"));
        let transitions = Arc::new(transitions);
        let metrics = Arc::new(Metrics::new());

        let (consumer, completion) = Consumer::new(
            ConsumerConfig { workers },
            shutdown.clone(),
            rx,
            provider.clone(),
            transitions.clone(),
            metrics.clone(),
        );

        Harness {
            shutdown,
            tx,
            provider,
            transitions,
            metrics,
            consumer,
            completion,
        }
    }

    async fn wait_for_shifts(transitions: &RecordingTransitions, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while transitions.shifts().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("transitions not applied in time");
    }

    #[tokio::test]
    async fn test_success_shifts_updated_with_rate() {
        let h = create_test_pool(2, RecordingTransitions::default());
        h.provider.set_rate(eur("USD"), dec!(1.08));
        h.consumer.start().unwrap();

        let record = Record::new(eur("USD"));
        h.tx.push(record.clone()).await.unwrap();

        wait_for_shifts(&h.transitions, 1).await;
        assert_eq!(
            h.transitions.shifts(),
            vec![Shift::Updated(record.identifier, dec!(1.08))]
        );
        assert_eq!(h.metrics.snapshot().records_updated, 1);

        h.shutdown.cancel();
        h.completion.wait().await;
    }

    #[tokio::test]
    async fn test_provider_failure_shifts_failed_only() {
        let h = create_test_pool(1, RecordingTransitions::default());
        h.provider
            .fail_pair(eur("BTC"), ProviderError::MaxRequestsReached("quota".into()));
        h.consumer.start().unwrap();

        let record = Record::new(eur("BTC"));
        h.tx.push(record.clone()).await.unwrap();

        wait_for_shifts(&h.transitions, 1).await;
        // Give a stray second transition a chance to show up.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(h.transitions.shifts(), vec![Shift::Failed(record.identifier)]);
        assert_eq!(h.metrics.snapshot().records_failed, 1);
        assert_eq!(h.metrics.snapshot().records_updated, 0);

        h.shutdown.cancel();
        h.completion.wait().await;
    }

    #[tokio::test]
    async fn test_transition_error_does_not_stop_worker() {
        let transitions = RecordingTransitions {
            reject: true,
            ..Default::default()
        };
        let h = create_test_pool(1, transitions);
        h.provider.set_rate(eur("USD"), dec!(1.08));
        h.consumer.start().unwrap();

        h.tx.push(Record::new(eur("USD"))).await.unwrap();
        h.tx.push(Record::new(eur("USD"))).await.unwrap();

        wait_for_shifts(&h.transitions, 2).await;
        assert_eq!(h.metrics.snapshot().transition_errors, 2);

        h.shutdown.cancel();
        h.completion.wait().await;
    }

    #[tokio::test]
    async fn test_every_record_resolved_exactly_once() {
        let h = create_test_pool(3, RecordingTransitions::default());
        h.provider.set_rate(eur("USD"), dec!(1.08));
        h.provider
            .fail_pair(eur("MXN"), ProviderError::Transport("reset".into()));
        h.consumer.start().unwrap();

        let mut ids = Vec::new();
        for i in 0..20 {
            let pair = if i % 2 == 0 { eur("USD") } else { eur("MXN") };
            let record = Record::new(pair);
            ids.push(record.identifier);
            h.tx.push(record).await.unwrap();
        }

        wait_for_shifts(&h.transitions, 20).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let shifts = h.transitions.shifts();
        assert_eq!(shifts.len(), 20);
        for id in ids {
            let hits = shifts
                .iter()
                .filter(|s| matches!(s, Shift::Updated(i, _) | Shift::Failed(i) if *i == id))
                .count();
            assert_eq!(hits, 1);
        }

        h.shutdown.cancel();
        h.completion.wait().await;
    }

    #[tokio::test]
    async fn test_second_start_rejected() {
        let h = create_test_pool(1, RecordingTransitions::default());
        h.consumer.start().unwrap();
        assert!(h.consumer.is_started());

        assert_eq!(h.consumer.start().unwrap_err(), RefreshError::AlreadyStarted);

        h.shutdown.cancel();
        h.completion.wait().await;
    }

    #[tokio::test]
    async fn test_completion_fires_after_cancel() {
        let h = create_test_pool(4, RecordingTransitions::default());
        h.consumer.start().unwrap();

        h.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), h.completion.wait())
            .await
            .expect("pool did not complete");
        assert_eq!(h.consumer.active_workers(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_fetch_completes_and_backlog_stays() {
        let h = create_test_pool(1, RecordingTransitions::default());
        h.provider.set_rate(eur("USD"), dec!(1.08));
        h.provider.set_latency(Duration::from_millis(100));
        h.consumer.start().unwrap();

        let in_flight = Record::new(eur("USD"));
        let queued = Record::new(eur("USD"));
        h.tx.push(in_flight.clone()).await.unwrap();
        h.tx.push(queued.clone()).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while h.provider.calls() < 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        h.shutdown.cancel();
        h.completion.wait().await;

        assert_eq!(
            h.transitions.shifts(),
            vec![Shift::Updated(in_flight.identifier, dec!(1.08))]
        );
        assert_eq!(h.provider.calls(), 1);
        assert_eq!(h.tx.len(), 1);
    }
}
