//! Postgres-backed outbox store.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE event_store_outbox (
//!     id           bigserial PRIMARY KEY,
//!     split_key    text NULL,
//!     format       text NOT NULL,
//!     payload      text NOT NULL,
//!     created_at   timestamptz NOT NULL DEFAULT now(),
//!     enqueued_at  timestamptz NULL
//! );
//!
//! CREATE INDEX index_event_store_outbox_for_pool
//!     ON event_store_outbox (format, enqueued_at, split_key);
//! ```
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | OutboxError | Scenario |
//! |------------|----------------------|-------------|----------|
//! | Database (lock not available) | `55P03` | `LockTimeout` | Row locks held longer than `lock_timeout` |
//! | Database (deadlock detected) | `40P01` | `Deadlock` | Competing consumers locked rows in conflicting order |
//! | Database (other) / connection errors | Any other | `Storage` | Everything else |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{Span, instrument};

use super::error::OutboxError;
use super::record::OutboxRecord;
use super::store::{BatchFilter, LockedBatch, OutboxStore};
use crate::runtime;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbox table in Postgres.
///
/// Batches are locked with `SELECT .. FOR UPDATE` inside a transaction whose
/// `lock_timeout` is set locally, so a consumer waiting on rows held by another
/// consumer gives up after [`lock_timeout`](Self::with_lock_timeout).
#[derive(Debug, Clone)]
pub struct PostgresOutboxStore {
    pool: Arc<PgPool>,
    handle: Handle,
    lock_timeout: Duration,
}

impl PostgresOutboxStore {
    /// Create a store over `pool`, blocking on the current Tokio runtime.
    pub fn new(pool: PgPool) -> Result<Self, OutboxError> {
        let handle = runtime::current_handle().ok_or_else(|| {
            OutboxError::Storage(
                "PostgresOutboxStore requires a tokio runtime; construct it inside one or pass a handle"
                    .to_string(),
            )
        })?;
        Ok(Self::with_handle(pool, handle))
    }

    pub fn with_handle(pool: PgPool, handle: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            handle,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Add a pending row and return its id.
    #[instrument(skip(self, payload), fields(split_key = ?split_key, format = %format), err)]
    pub async fn insert(
        &self,
        split_key: Option<&str>,
        format: &str,
        payload: &str,
    ) -> Result<i64, OutboxError> {
        let row = sqlx::query(
            r#"
            INSERT INTO event_store_outbox (split_key, format, payload)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(split_key)
        .bind(format)
        .bind(payload)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        row.try_get("id").map_err(|e| map_sqlx_error("insert", e))
    }

    /// Open a transaction and lock the rows `filter` selects.
    #[instrument(
        skip(self, filter),
        fields(format = %filter.format, limit = filter.limit),
        err
    )]
    pub async fn lock_rows(
        &self,
        filter: &BatchFilter,
    ) -> Result<(Transaction<'static, Postgres>, Vec<OutboxRecord>), OutboxError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // SET does not take bind parameters.
        let set_timeout = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&set_timeout)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        let rows = sqlx::query(
            r#"
            SELECT id, split_key, format, payload, created_at, enqueued_at
            FROM event_store_outbox
            WHERE format = $1
                AND enqueued_at IS NULL
                AND ($2::text[] IS NULL OR split_key = ANY($2))
            ORDER BY id ASC
            LIMIT $3
            FOR UPDATE
            "#,
        )
        .bind(&filter.format)
        .bind(&filter.split_keys)
        .bind(filter.limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("lock_batch", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = OutboxRow::from_row(&row).map_err(|e| {
                OutboxError::Storage(format!("failed to deserialize outbox row: {}", e))
            })?;
            records.push(record.into());
        }

        Span::current().record("locked_rows", records.len());
        Ok((tx, records))
    }
}

impl OutboxStore for PostgresOutboxStore {
    fn lock_batch(&self, filter: &BatchFilter) -> Result<Box<dyn LockedBatch + '_>, OutboxError> {
        let (tx, records) = runtime::block_on(&self.handle, self.lock_rows(filter))?;
        Ok(Box::new(PostgresBatch {
            tx: Some(tx),
            records,
            handle: self.handle.clone(),
        }))
    }
}

/// Locked rows plus the transaction holding the locks.
///
/// Dropping the transaction uncommitted rolls it back.
struct PostgresBatch {
    tx: Option<Transaction<'static, Postgres>>,
    records: Vec<OutboxRecord>,
    handle: Handle,
}

impl LockedBatch for PostgresBatch {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    fn mark_enqueued(&mut self, ids: &[i64], at: DateTime<Utc>) -> Result<(), OutboxError> {
        if ids.is_empty() {
            return Ok(());
        }
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| OutboxError::Storage("outbox batch already finished".to_string()))?;

        runtime::block_on(&self.handle, async {
            sqlx::query("UPDATE event_store_outbox SET enqueued_at = $1 WHERE id = ANY($2)")
                .bind(at)
                .bind(ids)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("mark_enqueued", e))
        })?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), OutboxError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| OutboxError::Storage("outbox batch already finished".to_string()))?;
        runtime::block_on(&self.handle, tx.commit())
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

impl Drop for PostgresBatch {
    fn drop(&mut self) {
        // Returning the connection to the pool spawns onto the runtime.
        let _guard = self.handle.enter();
        drop(self.tx.take());
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OutboxError {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("55P03") => OutboxError::LockTimeout,
            Some("40P01") => OutboxError::Deadlock,
            _ => OutboxError::Storage(format!(
                "database error in {}: {}",
                operation,
                db_err.message()
            )),
        },
        sqlx::Error::PoolClosed => {
            OutboxError::Storage(format!("connection pool closed during {}", operation))
        }
        other => OutboxError::Storage(format!("{} failed: {}", operation, other)),
    }
}

#[derive(Debug)]
struct OutboxRow {
    id: i64,
    split_key: Option<String>,
    format: String,
    payload: String,
    created_at: DateTime<Utc>,
    enqueued_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for OutboxRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            split_key: row.try_get("split_key")?,
            format: row.try_get("format")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            enqueued_at: row.try_get("enqueued_at")?,
        })
    }
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            split_key: row.split_key,
            format: row.format,
            payload: row.payload,
            created_at: row.created_at,
            enqueued_at: row.enqueued_at,
        }
    }
}
