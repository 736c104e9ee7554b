//! Refresh records and their status state machine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::time::{now, Timestamp};
use crate::{CurrencyPair, RecordIdentifier};

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Persisted and waiting for a worker.
    Created,
    /// Rate fetched and stored.
    Updated,
    /// Rate could not be fetched.
    Failed,
}

impl RecordStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Updated | RecordStatus::Failed)
    }

    /// Valid next states. A terminal state may only be re-applied to itself.
    pub fn valid_transitions(&self) -> &[RecordStatus] {
        match self {
            RecordStatus::Created => &[RecordStatus::Updated, RecordStatus::Failed],
            RecordStatus::Updated => &[RecordStatus::Updated],
            RecordStatus::Failed => &[RecordStatus::Failed],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: RecordStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Numeric code used by persistent stores.
    pub fn code(&self) -> i16 {
        match self {
            RecordStatus::Created => 1,
            RecordStatus::Updated => 2,
            RecordStatus::Failed => 3,
        }
    }

    /// Decode a persisted status code. `0` (unknown) and anything past
    /// `Failed` are rejected.
    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(RecordStatus::Created),
            2 => Some(RecordStatus::Updated),
            3 => Some(RecordStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Created => "created",
            RecordStatus::Updated => "updated",
            RecordStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What applying a terminal transition did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// First transition out of `created`.
    Applied,
    /// Same terminal state written again.
    Reapplied,
    /// A different terminal state was overwritten (last write wins).
    Overwrote(RecordStatus),
}

/// One requested pair refresh and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Caller-visible key.
    pub identifier: RecordIdentifier,
    /// Validated currency pair.
    pub pair: CurrencyPair,
    /// Current status.
    pub status: RecordStatus,
    /// Fetched rate; zero unless status is `updated`.
    pub rate: Decimal,
    /// Creation time.
    pub created_at: Timestamp,
    /// Time of the last status change.
    pub updated_at: Timestamp,
}

impl Record {
    /// Create a new record in `created` state with a fresh identifier.
    pub fn new(pair: CurrencyPair) -> Self {
        let now = now();
        Self {
            identifier: RecordIdentifier::new(),
            pair,
            status: RecordStatus::Created,
            rate: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transition to `updated` with the given rate.
    pub fn mark_updated(&mut self, rate: Decimal, at: Timestamp) -> TransitionOutcome {
        let outcome = self.shift(RecordStatus::Updated, at);
        self.rate = rate;
        outcome
    }

    /// Transition to `failed`. The rate is left untouched.
    pub fn mark_failed(&mut self, at: Timestamp) -> TransitionOutcome {
        self.shift(RecordStatus::Failed, at)
    }

    fn shift(&mut self, next: RecordStatus, at: Timestamp) -> TransitionOutcome {
        let outcome = if self.status == RecordStatus::Created {
            TransitionOutcome::Applied
        } else if self.status.can_transition_to(next) {
            TransitionOutcome::Reapplied
        } else {
            TransitionOutcome::Overwrote(self.status)
        };

        self.status = next;
        if at > self.updated_at {
            self.updated_at = at;
        }
        outcome
    }
}
