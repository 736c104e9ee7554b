//! In-memory record store.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use fxrefresh_common::{
    now, CurrencyPair, Record, RecordIdentifier, RecordStatus, RefreshError, Result,
};
use rust_decimal::Decimal;
use tracing::debug;

use crate::store::{report_outcome, RecordStore};

/// Number of records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

impl StatusCounts {
    /// Total number of records.
    pub fn total(&self) -> usize {
        self.created + self.updated + self.failed
    }
}

struct Entry {
    seq: u64,
    record: Record,
}

/// Record store backed by a concurrent map.
///
/// An insertion counter stands in for the surrogate key, so "latest" means
/// most recently inserted, same as in Postgres.
pub struct InMemoryRecordStore {
    records: DashMap<RecordIdentifier, Entry>,
    next_seq: AtomicU64,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Count records per status.
    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.records.iter() {
            match entry.record.status {
                RecordStatus::Created => counts.created += 1,
                RecordStatus::Updated => counts.updated += 1,
                RecordStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, record: &Record) -> Result<()> {
        use dashmap::mapref::entry::Entry as MapEntry;

        match self.records.entry(record.identifier) {
            MapEntry::Occupied(_) => Err(RefreshError::Database(format!(
                "duplicate identifier {}",
                record.identifier
            ))),
            MapEntry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
                slot.insert(Entry {
                    seq,
                    record: record.clone(),
                });
                debug!(identifier = %record.identifier, seq, "Record inserted");
                Ok(())
            }
        }
    }

    async fn fetch_by_identifier(&self, identifier: &RecordIdentifier) -> Result<Option<Record>> {
        Ok(self.records.get(identifier).map(|entry| entry.record.clone()))
    }

    async fn fetch_latest_updated(&self, pair: &CurrencyPair) -> Result<Option<Record>> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.record.status == RecordStatus::Updated && entry.record.pair == *pair)
            .max_by_key(|entry| entry.seq)
            .map(|entry| entry.record.clone()))
    }

    async fn transition_to_updated(&self, identifier: &RecordIdentifier, rate: Decimal) -> Result<()> {
        let mut entry = self.records.get_mut(identifier).ok_or(RefreshError::NoRecord)?;
        let outcome = entry.record.mark_updated(rate, now());
        drop(entry);

        report_outcome(identifier, outcome);
        Ok(())
    }

    async fn transition_to_failed(&self, identifier: &RecordIdentifier) -> Result<()> {
        let mut entry = self.records.get_mut(identifier).ok_or(RefreshError::NoRecord)?;
        let outcome = entry.record.mark_failed(now());
        drop(entry);

        report_outcome(identifier, outcome);
        Ok(())
    }
}
