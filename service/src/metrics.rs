//! Pipeline metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Refresh pipeline metrics.
pub struct Metrics {
    /// Refresh calls received.
    pub refresh_requests: AtomicU64,
    /// Refresh calls rejected by currency validation.
    pub refresh_rejected: AtomicU64,
    /// Records persisted in `created` state.
    pub records_created: AtomicU64,
    /// Records handed to the queue.
    pub records_enqueued: AtomicU64,
    /// Persisted records the queue refused (left in `created`).
    pub enqueue_failures: AtomicU64,
    /// Records resolved to `updated`.
    pub records_updated: AtomicU64,
    /// Records resolved to `failed`.
    pub records_failed: AtomicU64,
    /// Status transitions the store rejected.
    pub transition_errors: AtomicU64,
    /// Provider calls currently running.
    pub fetches_in_flight: AtomicU64,
    /// Records waiting in the queue at last sample.
    pub queue_depth: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            refresh_requests: AtomicU64::new(0),
            refresh_rejected: AtomicU64::new(0),
            records_created: AtomicU64::new(0),
            records_enqueued: AtomicU64::new(0),
            enqueue_failures: AtomicU64::new(0),
            records_updated: AtomicU64::new(0),
            records_failed: AtomicU64::new(0),
            transition_errors: AtomicU64::new(0),
            fetches_in_flight: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
        }
    }

    pub fn refresh_requested(&self) {
        self.refresh_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refresh_rejected(&self) {
        self.refresh_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_created(&self) {
        self.records_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.records_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enqueue_failed(&self) {
        self.enqueue_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the start of a provider call.
    pub fn fetch_started(&self) {
        self.fetches_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the end of a provider call.
    pub fn fetch_finished(&self) {
        self.fetches_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_updated(&self) {
        self.records_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.records_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transition_error(&self) {
        self.transition_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Set the sampled queue depth.
    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            refresh_requests: self.refresh_requests.load(Ordering::Relaxed),
            refresh_rejected: self.refresh_rejected.load(Ordering::Relaxed),
            records_created: self.records_created.load(Ordering::Relaxed),
            records_enqueued: self.records_enqueued.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            records_updated: self.records_updated.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            transition_errors: self.transition_errors.load(Ordering::Relaxed),
            fetches_in_flight: self.fetches_in_flight.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let series: [(&str, &str, &str, u64); 10] = [
            ("refresh_requests_total", "counter", "Refresh calls received", snapshot.refresh_requests),
            ("refresh_rejected_total", "counter", "Refresh calls rejected by validation", snapshot.refresh_rejected),
            ("records_created_total", "counter", "Records persisted in created state", snapshot.records_created),
            ("records_enqueued_total", "counter", "Records handed to the refresh queue", snapshot.records_enqueued),
            ("enqueue_failures_total", "counter", "Persisted records the queue refused", snapshot.enqueue_failures),
            ("records_updated_total", "counter", "Records resolved to updated", snapshot.records_updated),
            ("records_failed_total", "counter", "Records resolved to failed", snapshot.records_failed),
            ("transition_errors_total", "counter", "Status transitions rejected by the store", snapshot.transition_errors),
            ("fetches_in_flight", "gauge", "Provider calls currently running", snapshot.fetches_in_flight),
            ("queue_depth", "gauge", "Records waiting in the refresh queue", snapshot.queue_depth),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in series {
            out.push_str(&format!(
                "# HELP fxrefresh_{name} {help}\n# TYPE fxrefresh_{name} {kind}\nfxrefresh_{name} {value}\n\n"
            ));
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub refresh_requests: u64,
    pub refresh_rejected: u64,
    pub records_created: u64,
    pub records_enqueued: u64,
    pub enqueue_failures: u64,
    pub records_updated: u64,
    pub records_failed: u64,
    pub transition_errors: u64,
    pub fetches_in_flight: u64,
    pub queue_depth: u64,
}

impl MetricsSnapshot {
    /// Records resolved to a terminal state.
    pub fn records_resolved(&self) -> u64 {
        self.records_updated + self.records_failed
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
