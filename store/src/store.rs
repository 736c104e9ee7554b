//! Record store trait.

use async_trait::async_trait;
use fxrefresh_common::{CurrencyPair, Record, RecordIdentifier, Result, TransitionOutcome};
use rust_decimal::Decimal;
use tracing::warn;

/// Durable keyed storage for records.
///
/// Status transitions are last-write-wins: applying a terminal transition to a
/// record that is already terminal overwrites it. `updated_at` never moves
/// backwards.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record. Fails if the identifier already exists.
    async fn insert(&self, record: &Record) -> Result<()>;

    /// Look up a record by identifier.
    async fn fetch_by_identifier(&self, identifier: &RecordIdentifier) -> Result<Option<Record>>;

    /// Most recently inserted `updated` record for a pair.
    async fn fetch_latest_updated(&self, pair: &CurrencyPair) -> Result<Option<Record>>;

    /// Set the rate and move the record to `updated`.
    /// Returns `NoRecord` if the identifier is unknown.
    async fn transition_to_updated(&self, identifier: &RecordIdentifier, rate: Decimal) -> Result<()>;

    /// Move the record to `failed`, leaving the rate as is.
    /// Returns `NoRecord` if the identifier is unknown.
    async fn transition_to_failed(&self, identifier: &RecordIdentifier) -> Result<()>;
}

/// Log a transition that replaced a different terminal state.
pub(crate) fn report_outcome(identifier: &RecordIdentifier, outcome: TransitionOutcome) {
    if let TransitionOutcome::Overwrote(previous) = outcome {
        warn!(
            identifier = %identifier,
            previous = %previous,
            "Terminal record overwritten"
        );
    }
}
