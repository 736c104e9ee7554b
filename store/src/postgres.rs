//! PostgreSQL record store.
//!
//! Rows keep a `BIGSERIAL` surrogate key that only orders inserts; callers
//! only ever see the UUID identifier.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fxrefresh_common::{
    now, Currency, CurrencyPair, Record, RecordIdentifier, RecordStatus, RefreshError, Result,
    TransitionOutcome,
};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::store::{report_outcome, RecordStore};

const RECORD_COLUMNS: &str =
    "identifier, base, secondary, rate, status, created_at, updated_at";

fn db_error(err: sqlx::Error) -> RefreshError {
    RefreshError::Database(err.to_string())
}

#[derive(Debug, FromRow)]
struct RecordRow {
    identifier: Uuid,
    base: String,
    secondary: String,
    rate: Decimal,
    status: i16,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for Record {
    type Error = RefreshError;

    fn try_from(row: RecordRow) -> Result<Self> {
        let status = RecordStatus::from_code(row.status).ok_or_else(|| {
            RefreshError::InvalidRecord(format!(
                "record {} has unknown status {}",
                row.identifier, row.status
            ))
        })?;

        Ok(Record {
            identifier: RecordIdentifier::from_uuid(row.identifier),
            pair: CurrencyPair::new(Currency::new(row.base), Currency::new(row.secondary)),
            status,
            rate: row.rate,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Record store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Open a connection pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
            .map_err(db_error)?;

        info!(max_connections, "Connected to database");
        Ok(Self { pool })
    }

    /// Open a connection pool, retrying `attempts` times with `delay` between
    /// tries while the database comes up.
    pub async fn connect_with_retry(
        database_url: &str,
        max_connections: u32,
        attempts: u32,
        delay: Duration,
    ) -> Result<Self> {
        let mut remaining = attempts.max(1);
        loop {
            match Self::connect(database_url, max_connections).await {
                Ok(store) => return Ok(store),
                Err(e) if remaining > 1 => {
                    remaining -= 1;
                    warn!(error = %e, attempts_left = remaining, "Database not reachable, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RefreshError::Database(e.to_string()))?;

        info!("Database migrations applied");
        Ok(())
    }

    /// Check the database is reachable.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn transition(
        &self,
        identifier: &RecordIdentifier,
        status: RecordStatus,
        rate: Option<Decimal>,
    ) -> Result<()> {
        // The subselect locks the row and hands back the status it had
        // before this write.
        let previous: Option<i16> = sqlx::query_scalar(
            "UPDATE records AS r \
             SET status = $1, \
                 rate = COALESCE($2, r.rate), \
                 updated_at = GREATEST(r.updated_at, $3) \
             FROM (SELECT id, status FROM records WHERE identifier = $4 FOR UPDATE) AS old \
             WHERE r.id = old.id \
             RETURNING old.status",
        )
        .bind(status.code())
        .bind(rate)
        .bind(now())
        .bind(*identifier.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        let previous = previous.ok_or(RefreshError::NoRecord)?;
        let outcome = match RecordStatus::from_code(previous) {
            Some(RecordStatus::Created) => TransitionOutcome::Applied,
            Some(prev) if prev == status => TransitionOutcome::Reapplied,
            Some(prev) => TransitionOutcome::Overwrote(prev),
            None => TransitionOutcome::Applied,
        };
        report_outcome(identifier, outcome);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    #[instrument(skip(self, record), fields(identifier = %record.identifier))]
    async fn insert(&self, record: &Record) -> Result<()> {
        sqlx::query(
            "INSERT INTO records (identifier, base, secondary, rate, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(*record.identifier.as_uuid())
        .bind(record.pair.base.code())
        .bind(record.pair.secondary.code())
        .bind(record.rate)
        .bind(record.status.code())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn fetch_by_identifier(&self, identifier: &RecordIdentifier) -> Result<Option<Record>> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM records WHERE identifier = $1 LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(*identifier.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Record::try_from).transpose()
    }

    async fn fetch_latest_updated(&self, pair: &CurrencyPair) -> Result<Option<Record>> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {} FROM records \
             WHERE base = $1 AND secondary = $2 AND status = $3 \
             ORDER BY id DESC LIMIT 1",
            RECORD_COLUMNS
        ))
        .bind(pair.base.code())
        .bind(pair.secondary.code())
        .bind(RecordStatus::Updated.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Record::try_from).transpose()
    }

    #[instrument(skip(self), fields(identifier = %identifier))]
    async fn transition_to_updated(&self, identifier: &RecordIdentifier, rate: Decimal) -> Result<()> {
        self.transition(identifier, RecordStatus::Updated, Some(rate)).await
    }

    #[instrument(skip(self), fields(identifier = %identifier))]
    async fn transition_to_failed(&self, identifier: &RecordIdentifier) -> Result<()> {
        self.transition(identifier, RecordStatus::Failed, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_row(status: i16) -> RecordRow {
        let now = now();
        RecordRow {
            identifier: Uuid::new_v4(),
            base: "EUR".to_string(),
            secondary: "USD".to_string(),
            rate: dec!(1.08),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_decoding() {
        let row = create_test_row(2);
        let id = row.identifier;

        let record = Record::try_from(row).unwrap();
        assert_eq!(record.identifier, RecordIdentifier::from_uuid(id));
        assert_eq!(record.pair.to_string(), "EUR/USD");
        assert_eq!(record.status, RecordStatus::Updated);
        assert_eq!(record.rate, dec!(1.08));
    }

    #[test]
    fn test_row_with_unknown_status_is_rejected() {
        let err = Record::try_from(create_test_row(0)).unwrap_err();
        assert!(matches!(err, RefreshError::InvalidRecord(_)));
    }

    /// Needs a disposable database: `DATABASE_URL=... cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn test_postgres_round_trip() {
        let url = match std::env::var("DATABASE_URL") {
            Ok(url) => url,
            Err(_) => return,
        };

        let store = PgRecordStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();

        let pair = CurrencyPair::new(Currency::eur(), Currency::usd());
        let record = Record::new(pair.clone());
        store.insert(&record).await.unwrap();

        let fetched = store.fetch_by_identifier(&record.identifier).await.unwrap().unwrap();
        assert_eq!(fetched.status, RecordStatus::Created);

        store.transition_to_updated(&record.identifier, dec!(1.077064)).await.unwrap();
        let latest = store.fetch_latest_updated(&pair).await.unwrap().unwrap();
        assert_eq!(latest.identifier, record.identifier);
        assert_eq!(latest.rate, dec!(1.077064));

        store.transition_to_failed(&record.identifier).await.unwrap();
        let failed = store.fetch_by_identifier(&record.identifier).await.unwrap().unwrap();
        assert_eq!(failed.status, RecordStatus::Failed);
        assert_eq!(failed.rate, dec!(1.077064));
        assert!(failed.updated_at >= latest.updated_at);

        let missing = store.transition_to_failed(&RecordIdentifier::new()).await.unwrap_err();
        assert_eq!(missing, RefreshError::NoRecord);
    }
}
