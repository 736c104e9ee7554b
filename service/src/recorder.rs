//! Request boundary of the refresh pipeline.
//!
//! The recorder validates requests, persists new records and is the only
//! producer onto the refresh queue. It also serves reads and applies the two
//! terminal status transitions on behalf of the workers.

use std::sync::Arc;

use async_trait::async_trait;
use fxrefresh_common::{
    CurrencyRegistry, Record, RecordIdentifier, RefreshError, Result,
};
use fxrefresh_store::RecordStore;
use rust_decimal::Decimal;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::SharedMetrics;
use crate::queue::QueueSender;
use crate::state::SharedState;

/// Terminal status transitions, the only part of the recorder workers need.
#[async_trait]
pub trait StatusTransitions: Send + Sync {
    /// Mark a record `updated` with the fetched rate.
    async fn shift_updated(&self, identifier: &RecordIdentifier, rate: Decimal) -> Result<()>;

    /// Mark a record `failed`.
    async fn shift_failed(&self, identifier: &RecordIdentifier) -> Result<()>;
}

/// Validates, persists and enqueues refresh requests.
pub struct Recorder {
    store: Arc<dyn RecordStore>,
    registry: Arc<CurrencyRegistry>,
    queue: QueueSender,
    state: SharedState,
    metrics: SharedMetrics,
}

impl Recorder {
    /// Create a new recorder.
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<CurrencyRegistry>,
        queue: QueueSender,
        state: SharedState,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            store,
            registry,
            queue,
            state,
            metrics,
        }
    }

    /// Request a rate refresh for a pair.
    ///
    /// Returns as soon as the record is persisted and queued; the rate is
    /// fetched in the background. Waits while the queue is full. Nothing is
    /// queued if persisting fails.
    #[instrument(skip(self))]
    pub async fn refresh(&self, base: &str, secondary: &str) -> Result<RecordIdentifier> {
        let state = *self.state.read();
        if !state.accepts_requests() {
            return Err(RefreshError::ServiceUnavailable);
        }

        self.metrics.refresh_requested();

        let pair = self.registry.validate_pair(base, secondary).map_err(|e| {
            self.metrics.refresh_rejected();
            e
        })?;

        let record = Record::new(pair);
        let identifier = record.identifier;

        self.store.insert(&record).await.map_err(|e| {
            error!(identifier = %identifier, error = %e, "Failed to persist record");
            e
        })?;
        self.metrics.record_created();

        let pair = record.pair.clone();
        if let Err(e) = self.queue.push(record).await {
            // Persisted but never picked up; the record stays `created`.
            self.metrics.enqueue_failed();
            warn!(identifier = %identifier, error = %e, "Record persisted but not queued");
            return Err(e);
        }
        self.metrics.record_enqueued();

        info!(identifier = %identifier, pair = %pair, "Refresh queued");
        Ok(identifier)
    }

    /// Look up a record by its textual identifier.
    ///
    /// Surrounding whitespace is ignored. A value that is not a valid
    /// identifier cannot match anything and yields `NoRecord`.
    pub async fn fetch_by_identifier(&self, identifier: &str) -> Result<Record> {
        let identifier = match RecordIdentifier::parse(identifier) {
            Ok(identifier) => identifier,
            Err(_) => {
                debug!(identifier = identifier.trim(), "Malformed identifier");
                return Err(RefreshError::NoRecord);
            }
        };

        self.fetch(&identifier).await
    }

    /// Look up a record by identifier.
    pub async fn fetch(&self, identifier: &RecordIdentifier) -> Result<Record> {
        self.store
            .fetch_by_identifier(identifier)
            .await?
            .ok_or(RefreshError::NoRecord)
    }

    /// Most recent `updated` record for a pair.
    pub async fn fetch_latest(&self, base: &str, secondary: &str) -> Result<Record> {
        let pair = self.registry.validate_pair(base, secondary)?;

        self.store
            .fetch_latest_updated(&pair)
            .await?
            .ok_or(RefreshError::NoRecord)
    }

    /// Supported currency allow-lists.
    pub fn registry(&self) -> &CurrencyRegistry {
        &self.registry
    }
}

#[async_trait]
impl StatusTransitions for Recorder {
    #[instrument(skip(self), fields(identifier = %identifier))]
    async fn shift_updated(&self, identifier: &RecordIdentifier, rate: Decimal) -> Result<()> {
        self.store.transition_to_updated(identifier, rate).await?;
        debug!(rate = %rate, "Record updated");
        Ok(())
    }

    #[instrument(skip(self), fields(identifier = %identifier))]
    async fn shift_failed(&self, identifier: &RecordIdentifier) -> Result<()> {
        self.store.transition_to_failed(identifier).await?;
        debug!("Record failed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::queue::{refresh_queue, QueueReceiver};
    use crate::state::ServiceState;
    use fxrefresh_common::{Currency, CurrencyPair, RecordStatus};
    use fxrefresh_store::InMemoryRecordStore;
    use parking_lot::RwLock;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    /// Store wrapper that can be told to fail inserts and counts calls.
    struct FlakyStore {
        inner: InMemoryRecordStore,
        fail_inserts: bool,
        inserts: AtomicUsize,
    }

    impl FlakyStore {
        fn failing() -> Self {
            Self {
                inner: InMemoryRecordStore::new(),
                fail_inserts: true,
                inserts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RecordStore for FlakyStore {
        async fn insert(&self, record: &Record) -> Result<()> {
            self.inserts.fetch_add(1, Ordering::SeqCst);
            if self.fail_inserts {
                return Err(RefreshError::Database("connection reset".into()));
            }
            self.inner.insert(record).await
        }

        async fn fetch_by_identifier(&self, identifier: &RecordIdentifier) -> Result<Option<Record>> {
            self.inner.fetch_by_identifier(identifier).await
        }

        async fn fetch_latest_updated(&self, pair: &CurrencyPair) -> Result<Option<Record>> {
            self.inner.fetch_latest_updated(pair).await
        }

        async fn transition_to_updated(&self, identifier: &RecordIdentifier, rate: Decimal) -> Result<()> {
            self.inner.transition_to_updated(identifier, rate).await
        }

        async fn transition_to_failed(&self, identifier: &RecordIdentifier) -> Result<()> {
            self.inner.transition_to_failed(identifier).await
        }
    }

    fn create_test_recorder(
        store: Arc<dyn RecordStore>,
        capacity: usize,
    ) -> (Recorder, QueueReceiver, SharedMetrics) {
        let (tx, rx) = refresh_queue(capacity, CancellationToken::new());
        let metrics = Arc::new(Metrics::new());
        let recorder = Recorder::new(
            store,
            Arc::new(CurrencyRegistry::reference()),
            tx,
            Arc::new(RwLock::new(ServiceState::Running)),
            metrics.clone(),
        );
        (recorder, rx, metrics)
    }

    #[tokio::test]
    async fn test_refresh_persists_then_enqueues() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (recorder, rx, metrics) = create_test_recorder(store.clone(), 5);

        let id = recorder.refresh("eur", "usd").await.unwrap();

        let stored = store.fetch_by_identifier(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, RecordStatus::Created);
        assert_eq!(stored.rate, Decimal::ZERO);
        assert_eq!(stored.pair, CurrencyPair::new(Currency::eur(), Currency::usd()));

        let queued = rx.pop().await.unwrap();
        assert_eq!(queued.identifier, id);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_created, 1);
        assert_eq!(snapshot.records_enqueued, 1);
    }

    #[tokio::test]
    async fn test_refresh_rejects_unsupported_without_side_effects() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (recorder, _rx, metrics) = create_test_recorder(store.clone(), 5);

        let err = recorder.refresh("USD", "MXN").await.unwrap_err();
        assert_eq!(err, RefreshError::UnsupportedBaseCurrency("USD".into()));

        let err = recorder.refresh("EUR", "GBP").await.unwrap_err();
        assert_eq!(err, RefreshError::UnsupportedSecondaryCurrency("GBP".into()));

        assert!(store.is_empty());
        assert_eq!(metrics.snapshot().refresh_rejected, 2);
        assert_eq!(metrics.snapshot().records_enqueued, 0);
    }

    #[tokio::test]
    async fn test_refresh_does_not_enqueue_when_insert_fails() {
        let store = Arc::new(FlakyStore::failing());
        let (recorder, rx, metrics) = create_test_recorder(store.clone(), 5);

        let err = recorder.refresh("EUR", "USD").await.unwrap_err();
        assert!(matches!(err, RefreshError::Database(_)));
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().records_enqueued, 0);

        // Nothing reached the queue.
        let popped = tokio::time::timeout(std::time::Duration::from_millis(20), rx.pop()).await;
        assert!(popped.is_err());
    }

    #[tokio::test]
    async fn test_refresh_refused_when_not_running() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (tx, _rx) = refresh_queue(5, CancellationToken::new());
        let recorder = Recorder::new(
            store.clone(),
            Arc::new(CurrencyRegistry::reference()),
            tx,
            Arc::new(RwLock::new(ServiceState::Starting)),
            Arc::new(Metrics::new()),
        );

        assert_eq!(
            recorder.refresh("EUR", "USD").await.unwrap_err(),
            RefreshError::ServiceUnavailable
        );
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_by_identifier() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (recorder, _rx, _) = create_test_recorder(store, 5);
        let id = recorder.refresh("EUR", "USD").await.unwrap();

        let padded = format!("  {}\n", id);
        let record = recorder.fetch_by_identifier(&padded).await.unwrap();
        assert_eq!(record.identifier, id);

        assert_eq!(
            recorder
                .fetch_by_identifier(&RecordIdentifier::new().to_string())
                .await
                .unwrap_err(),
            RefreshError::NoRecord
        );
        assert_eq!(
            recorder.fetch_by_identifier("not-an-id").await.unwrap_err(),
            RefreshError::NoRecord
        );
    }

    #[tokio::test]
    async fn test_fetch_latest() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (recorder, _rx, _) = create_test_recorder(store, 5);

        let first = recorder.refresh("EUR", "USD").await.unwrap();
        let second = recorder.refresh("EUR", "USD").await.unwrap();
        let pending = recorder.refresh("EUR", "USD").await.unwrap();

        assert_eq!(
            recorder.fetch_latest("EUR", "USD").await.unwrap_err(),
            RefreshError::NoRecord
        );

        recorder.shift_updated(&second, dec!(1.09)).await.unwrap();
        recorder.shift_updated(&first, dec!(1.07)).await.unwrap();
        recorder.shift_failed(&pending).await.unwrap();

        let latest = recorder.fetch_latest("eur", " usd ").await.unwrap();
        assert_eq!(latest.identifier, second);
        assert_eq!(latest.rate, dec!(1.09));

        assert!(matches!(
            recorder.fetch_latest("EUR", "XYZ").await.unwrap_err(),
            RefreshError::UnsupportedSecondaryCurrency(_)
        ));
    }

    #[tokio::test]
    async fn test_shift_unknown_identifier() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (recorder, _rx, _) = create_test_recorder(store, 5);
        let id = RecordIdentifier::new();

        assert_eq!(
            recorder.shift_updated(&id, dec!(1.0)).await.unwrap_err(),
            RefreshError::NoRecord
        );
        assert_eq!(recorder.shift_failed(&id).await.unwrap_err(), RefreshError::NoRecord);
    }

    #[tokio::test]
    async fn test_shift_failed_leaves_rate() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (recorder, _rx, _) = create_test_recorder(store, 5);
        let id = recorder.refresh("EUR", "BTC").await.unwrap();

        recorder.shift_failed(&id).await.unwrap();

        let record = recorder.fetch(&id).await.unwrap();
        assert_eq!(record.status, RecordStatus::Failed);
        assert_eq!(record.rate, Decimal::ZERO);
        assert!(record.updated_at >= record.created_at);
    }

    #[tokio::test]
    async fn test_shift_updated_twice_is_idempotent() {
        let store = Arc::new(InMemoryRecordStore::new());
        let (recorder, _rx, _) = create_test_recorder(store, 5);
        let id = recorder.refresh("EUR", "USD").await.unwrap();

        recorder.shift_updated(&id, dec!(1.08)).await.unwrap();
        let first = recorder.fetch(&id).await.unwrap();

        recorder.shift_updated(&id, dec!(1.08)).await.unwrap();
        let second = recorder.fetch(&id).await.unwrap();

        assert_eq!(second.status, RecordStatus::Updated);
        assert_eq!(second.rate, dec!(1.08));
        assert!(second.updated_at >= first.updated_at);
    }
}
