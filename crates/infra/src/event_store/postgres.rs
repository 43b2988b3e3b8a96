//! Postgres-backed event repository.
//!
//! Events live once in `event_store_events`. Stream membership (including the position
//! of the event within the stream) lives in `event_store_events_in_streams`. The
//! `bigserial` id of the events table defines the global order.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE event_store_events (
//!     id          bigserial PRIMARY KEY,
//!     event_id    uuid NOT NULL,
//!     event_type  text NOT NULL,
//!     data        jsonb NOT NULL,
//!     metadata    jsonb NOT NULL DEFAULT '{}',
//!     created_at  timestamptz NOT NULL DEFAULT now(),
//!     CONSTRAINT event_store_events_event_id UNIQUE (event_id)
//! );
//!
//! CREATE TABLE event_store_events_in_streams (
//!     id          bigserial PRIMARY KEY,
//!     stream      text NOT NULL,
//!     position    bigint NULL,
//!     event_id    uuid NOT NULL REFERENCES event_store_events (event_id),
//!     created_at  timestamptz NOT NULL DEFAULT now(),
//!     CONSTRAINT event_store_events_in_streams_stream_position UNIQUE (stream, position),
//!     CONSTRAINT event_store_events_in_streams_stream_event_id UNIQUE (stream, event_id)
//! );
//! ```
//!
//! Appends with expected version `any` store a `NULL` position; NULLs never collide in
//! the `(stream, position)` constraint.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | EventStoreError | Scenario |
//! |------------|----------------------|-----------------|----------|
//! | Database (unique violation) on `..._stream_position` | `23505` | `WrongExpectedVersion` | Concurrent writer claimed the same position |
//! | Database (unique violation) on `..._stream_event_id` | `23505` | `EventDuplicatedInStream` | Event already linked into the stream |
//! | Database (unique violation) on `event_store_events_event_id` | `23505` | `EventDuplicatedInStream` | Appended record id already exists |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / Io / Tls / other | N/A | `Backend` | Connection failures |
//!
//! ## Thread Safety
//!
//! `PostgresRepository` is `Send + Sync`. The synchronous [`Repository`] methods block
//! on the runtime captured at construction; see [`PostgresRepository::new`].

use std::sync::Arc;

use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tokio::runtime::Handle;
use tracing::{Span, instrument};

use eventline_core::{
    EventId, EventRecord, EventStoreError, EventStoreResult, ExpectedVersion, Metadata, Stream,
    compute_position,
};

use super::repository::Repository;
use crate::runtime;
use crate::specification::{Direction, Specification, Start};

const STREAM_POSITION_CONSTRAINT: &str = "event_store_events_in_streams_stream_position";

/// Postgres-backed repository.
///
/// ## Optimistic Concurrency
///
/// Every write runs in one transaction that:
/// 1. Reads the stream's last position (its link count, or `MAX(position)` if higher)
/// 2. Checks it against the expected version
/// 3. Inserts the events and their stream links at the following positions
///
/// If another transaction commits between steps 1 and 3, the unique constraint on
/// `(stream, position)` fails the insert and the write is reported as
/// `WrongExpectedVersion`.
///
/// Mixing `any` with checked versions on one stream is not detected by this backend.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: Arc<PgPool>,
    handle: Handle,
}

/// How positions are assigned for a write.
#[derive(Debug, Clone, Copy)]
enum Positions {
    /// `any`: links carry no position.
    Unassigned,
    /// Checked versions: dense positions after the resolved one.
    After(Option<u64>),
}

impl Positions {
    fn at(self, index: usize) -> Option<i64> {
        match self {
            Positions::Unassigned => None,
            Positions::After(resolved) => Some(compute_position(resolved, index) as i64),
        }
    }
}

impl PostgresRepository {
    /// Create a repository over `pool`, blocking on the current Tokio runtime.
    ///
    /// Fails with `Backend` when called outside of a runtime; use
    /// [`with_handle`](Self::with_handle) in that case.
    pub fn new(pool: PgPool) -> EventStoreResult<Self> {
        let handle = runtime::current_handle().ok_or_else(|| {
            EventStoreError::backend(
                "PostgresRepository requires a tokio runtime; construct it inside one or pass a handle",
            )
        })?;
        Ok(Self::with_handle(pool, handle))
    }

    pub fn with_handle(pool: PgPool, handle: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            handle,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert `records` and link them into `stream`.
    #[instrument(
        skip(self, records),
        fields(
            stream = %stream,
            event_count = records.len(),
            expected_version = %expected_version
        ),
        err
    )]
    pub async fn append_records(
        &self,
        records: Vec<EventRecord>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let positions = check_expected_version(&mut tx, stream, expected_version).await?;

        for record in &records {
            let metadata = serde_json::to_value(record.metadata())
                .map_err(|e| EventStoreError::Serialization(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO event_store_events (event_id, event_type, data, metadata)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(record.event_id().as_uuid())
            .bind(record.event_type())
            .bind(record.data())
            .bind(&metadata)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_write_error("insert_event", stream, record.event_id(), e))?;
        }

        if !stream.is_global() {
            let ids: Vec<EventId> = records.iter().map(EventRecord::event_id).collect();
            insert_links(&mut tx, stream, &ids, positions).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("committed_events", records.len());
        Ok(())
    }

    /// Link already stored events into `stream`.
    #[instrument(
        skip(self, event_ids),
        fields(
            stream = %stream,
            event_count = event_ids.len(),
            expected_version = %expected_version
        ),
        err
    )]
    pub async fn link_events(
        &self,
        event_ids: &[EventId],
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let uuids: Vec<uuid::Uuid> = event_ids.iter().map(|id| *id.as_uuid()).collect();
        let rows = sqlx::query("SELECT event_id FROM event_store_events WHERE event_id = ANY($1)")
            .bind(&uuids)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("link_events", e))?;

        let mut known = std::collections::HashSet::with_capacity(rows.len());
        for row in rows {
            let id: uuid::Uuid = row
                .try_get("event_id")
                .map_err(|e| map_sqlx_error("link_events", e))?;
            known.insert(id);
        }
        if let Some(missing) = event_ids.iter().find(|id| !known.contains(id.as_uuid())) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(EventStoreError::EventNotFound(*missing));
        }

        let positions = check_expected_version(&mut tx, stream, expected_version).await?;

        // Every stored event is already part of the global stream.
        if stream.is_global() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return match event_ids.first() {
                Some(first) => Err(EventStoreError::duplicated(first, stream.name())),
                None => Ok(()),
            };
        }

        insert_links(&mut tx, stream, event_ids, positions).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(stream = %stream), err)]
    pub async fn remove_stream(&self, stream: &Stream) -> EventStoreResult<()> {
        if stream.is_global() {
            return Err(EventStoreError::ReservedInternalName(stream.name().to_string()));
        }

        let result = sqlx::query("DELETE FROM event_store_events_in_streams WHERE stream = $1")
            .bind(stream.name())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_stream", e))?;

        Span::current().record("removed_links", result.rows_affected());
        Ok(())
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    pub async fn contains_event(&self, event_id: EventId) -> EventStoreResult<bool> {
        let row = sqlx::query(
            "SELECT EXISTS (SELECT 1 FROM event_store_events WHERE event_id = $1) AS found",
        )
        .bind(event_id.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_event", e))?;

        row.try_get("found")
            .map_err(|e| map_sqlx_error("has_event", e))
    }

    #[instrument(skip(self), fields(stream = %stream), err)]
    pub async fn last_event(&self, stream: &Stream) -> EventStoreResult<Option<EventRecord>> {
        let specification = Specification::new()
            .in_stream(stream.clone())
            .backward()
            .limit(1)?;
        Ok(self.read_records(&specification).await?.into_iter().next())
    }

    /// Records matching `specification`, in its direction.
    #[instrument(
        skip(self, specification),
        fields(
            stream = %specification.target(),
            forward = specification.is_forward(),
            limit = ?specification.max_count()
        ),
        err
    )]
    pub async fn read_records(
        &self,
        specification: &Specification,
    ) -> EventStoreResult<Vec<EventRecord>> {
        let cursor = self.resolve_cursor(specification).await?;
        let types = specification.event_types().map(<[String]>::to_vec);
        let limit = specification.max_count().map(|n| n as i64);
        let (comparison, order) = match specification.read_direction() {
            Direction::Forward => (">", "ASC"),
            Direction::Backward => ("<", "DESC"),
        };

        let rows = match specification.target() {
            Stream::Global => {
                let sql = format!(
                    r#"
                    SELECT e.event_id, e.event_type, e.data, e.metadata
                    FROM event_store_events e
                    WHERE ($1::text[] IS NULL OR e.event_type = ANY($1))
                        AND ($2::bigint IS NULL OR e.id {comparison} $2)
                    ORDER BY e.id {order}
                    LIMIT $3
                    "#
                );
                sqlx::query(&sql)
                    .bind(&types)
                    .bind(cursor)
                    .bind(limit)
                    .fetch_all(&*self.pool)
                    .await
            }
            Stream::Named(name) => {
                let sql = format!(
                    r#"
                    SELECT e.event_id, e.event_type, e.data, e.metadata
                    FROM event_store_events_in_streams s
                    JOIN event_store_events e ON e.event_id = s.event_id
                    WHERE s.stream = $1
                        AND ($2::text[] IS NULL OR e.event_type = ANY($2))
                        AND ($3::bigint IS NULL OR s.id {comparison} $3)
                    ORDER BY s.id {order}
                    LIMIT $4
                    "#
                );
                sqlx::query(&sql)
                    .bind(name)
                    .bind(&types)
                    .bind(cursor)
                    .bind(limit)
                    .fetch_all(&*self.pool)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("read", e))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let row = EventRow::from_row(&row).map_err(|e| {
                EventStoreError::backend(format!("failed to deserialize event row: {}", e))
            })?;
            records.push(row.into_record()?);
        }

        Span::current().record("event_count", records.len());
        Ok(records)
    }

    #[instrument(skip(self, specification), fields(stream = %specification.target()), err)]
    pub async fn count_records(&self, specification: &Specification) -> EventStoreResult<usize> {
        let cursor = self.resolve_cursor(specification).await?;
        let types = specification.event_types().map(<[String]>::to_vec);
        let comparison = match specification.read_direction() {
            Direction::Forward => ">",
            Direction::Backward => "<",
        };

        let row = match specification.target() {
            Stream::Global => {
                let sql = format!(
                    r#"
                    SELECT COUNT(*) AS total
                    FROM event_store_events e
                    WHERE ($1::text[] IS NULL OR e.event_type = ANY($1))
                        AND ($2::bigint IS NULL OR e.id {comparison} $2)
                    "#
                );
                sqlx::query(&sql)
                    .bind(&types)
                    .bind(cursor)
                    .fetch_one(&*self.pool)
                    .await
            }
            Stream::Named(name) => {
                let sql = format!(
                    r#"
                    SELECT COUNT(*) AS total
                    FROM event_store_events_in_streams s
                    JOIN event_store_events e ON e.event_id = s.event_id
                    WHERE s.stream = $1
                        AND ($2::text[] IS NULL OR e.event_type = ANY($2))
                        AND ($3::bigint IS NULL OR s.id {comparison} $3)
                    "#
                );
                sqlx::query(&sql)
                    .bind(name)
                    .bind(&types)
                    .bind(cursor)
                    .fetch_one(&*self.pool)
                    .await
            }
        }
        .map_err(|e| map_sqlx_error("count", e))?;

        let total: i64 = row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count", e))?;
        Ok(total as usize)
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    pub async fn fetch_event(&self, event_id: EventId) -> EventStoreResult<EventRecord> {
        let row = sqlx::query(
            r#"
            SELECT event_id, event_type, data, metadata
            FROM event_store_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("read_event", e))?
        .ok_or(EventStoreError::EventNotFound(event_id))?;

        EventRow::from_row(&row)
            .map_err(|e| EventStoreError::backend(format!("failed to deserialize event row: {}", e)))?
            .into_record()
    }

    /// Global position derived from the events table's `bigserial` id.
    ///
    /// Sequence values consumed by rolled-back appends are never reused, so positions
    /// are ordered but may have gaps.
    #[instrument(skip(self), fields(event_id = %event_id), err)]
    pub async fn event_global_position(&self, event_id: EventId) -> EventStoreResult<u64> {
        let id = self
            .global_row_id(event_id)
            .await?
            .ok_or(EventStoreError::EventNotFound(event_id))?;
        Ok((id - 1).max(0) as u64)
    }

    #[instrument(skip(self), fields(event_id = %event_id, stream = %stream), err)]
    pub async fn event_position_in_stream(
        &self,
        event_id: EventId,
        stream: &Stream,
    ) -> EventStoreResult<Option<u64>> {
        if stream.is_global() {
            return self.event_global_position(event_id).await.map(Some);
        }

        let row = sqlx::query(
            "SELECT position FROM event_store_events_in_streams WHERE stream = $1 AND event_id = $2",
        )
        .bind(stream.name())
        .bind(event_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("position_in_stream", e))?
        .ok_or(EventStoreError::EventNotFound(event_id))?;

        let position: Option<i64> = row
            .try_get("position")
            .map_err(|e| map_sqlx_error("position_in_stream", e))?;
        Ok(position.map(|p| p as u64))
    }

    #[instrument(skip(self), fields(event_id = %event_id), err)]
    pub async fn event_streams(&self, event_id: EventId) -> EventStoreResult<Vec<Stream>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT stream
            FROM event_store_events_in_streams
            WHERE event_id = $1
            ORDER BY stream
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("streams_of", e))?;

        rows.iter()
            .map(|row| {
                let name: String = row
                    .try_get("stream")
                    .map_err(|e| map_sqlx_error("streams_of", e))?;
                Stream::new(name)
            })
            .collect()
    }

    async fn global_row_id(&self, event_id: EventId) -> EventStoreResult<Option<i64>> {
        let row = sqlx::query("SELECT id FROM event_store_events WHERE event_id = $1")
            .bind(event_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("global_position", e))?;

        row.map(|row| row.try_get("id"))
            .transpose()
            .map_err(|e| map_sqlx_error("global_position", e))
    }

    /// Row id the cursor refers to, within the specification's stream.
    async fn resolve_cursor(&self, specification: &Specification) -> EventStoreResult<Option<i64>> {
        let event_id = match specification.start() {
            Start::Head => return Ok(None),
            Start::After(event_id) => event_id,
        };

        let id = match specification.target() {
            Stream::Global => self.global_row_id(event_id).await?,
            Stream::Named(name) => {
                let row = sqlx::query(
                    "SELECT id FROM event_store_events_in_streams WHERE stream = $1 AND event_id = $2",
                )
                .bind(name)
                .bind(event_id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("resolve_cursor", e))?;

                row.map(|row| row.try_get("id"))
                    .transpose()
                    .map_err(|e| map_sqlx_error("resolve_cursor", e))?
            }
        };

        id.map(Some).ok_or(EventStoreError::EventNotFound(event_id))
    }
}

/// Verify `expected_version` against the stream's state inside `tx`.
async fn check_expected_version(
    tx: &mut Transaction<'_, Postgres>,
    stream: &Stream,
    expected_version: ExpectedVersion,
) -> EventStoreResult<Positions> {
    if expected_version.is_any() || stream.is_global() {
        // Rejects checked versions on the global stream.
        expected_version.resolve_for(stream, |_| Ok(None))?;
        return Ok(Positions::Unassigned);
    }

    // `any` links carry no position but still count towards the stream's length.
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS linked, MAX(position) AS last_position
        FROM event_store_events_in_streams
        WHERE stream = $1
        "#,
    )
    .bind(stream.name())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_expected_version", e))?;

    let linked: i64 = row
        .try_get("linked")
        .map_err(|e| map_sqlx_error("check_expected_version", e))?;
    let last_position: Option<i64> = row
        .try_get("last_position")
        .map_err(|e| map_sqlx_error("check_expected_version", e))?;
    let last_position = effective_last_position(linked, last_position);

    let resolved = expected_version.resolve_for(stream, |_| Ok(last_position))?;
    if resolved != last_position {
        return Err(EventStoreError::wrong_expected_version(format!(
            "stream '{}' expected {}, last position is {}",
            stream,
            expected_version,
            last_position.map_or_else(|| "none".to_string(), |p| p.to_string())
        )));
    }

    Ok(Positions::After(resolved))
}

/// Last position of a stream holding `linked` links, the highest assigned being
/// `max_position`.
///
/// Positions are dense over every link, so unpositioned `any` links still move the
/// stream forward.
fn effective_last_position(linked: i64, max_position: Option<i64>) -> Option<u64> {
    let by_count = (linked > 0).then(|| (linked - 1) as u64);
    by_count.max(max_position.map(|p| p as u64))
}

async fn insert_links(
    tx: &mut Transaction<'_, Postgres>,
    stream: &Stream,
    event_ids: &[EventId],
    positions: Positions,
) -> EventStoreResult<()> {
    for (index, event_id) in event_ids.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO event_store_events_in_streams (stream, position, event_id)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(stream.name())
        .bind(positions.at(index))
        .bind(event_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_write_error("insert_link", stream, *event_id, e))?;
    }
    Ok(())
}

/// Map a write failure, telling version races apart from duplicates.
///
/// Only the `(stream, position)` constraint signals a version race; the event id
/// constraints both mean the event is already there.
fn map_write_error(
    operation: &str,
    stream: &Stream,
    event_id: EventId,
    err: sqlx::Error,
) -> EventStoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23505") {
            return match db_err.constraint() {
                Some(STREAM_POSITION_CONSTRAINT) => EventStoreError::wrong_expected_version(
                    format!("concurrent write to stream '{}' claimed the same position", stream),
                ),
                _ => EventStoreError::duplicated(event_id, stream.name()),
            };
        }
    }
    map_sqlx_error(operation, err)
}

/// Map SQLx errors to EventStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> EventStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            EventStoreError::backend(format!(
                "database error in {} ({}): {}",
                operation,
                code,
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            EventStoreError::backend(format!("connection pool closed during {}", operation))
        }
        other => EventStoreError::backend(format!("{} failed: {}", operation, other)),
    }
}

#[derive(Debug)]
struct EventRow {
    event_id: uuid::Uuid,
    event_type: String,
    data: JsonValue,
    metadata: JsonValue,
}

impl<'r> FromRow<'r, sqlx::postgres::PgRow> for EventRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            event_id: row.try_get("event_id")?,
            event_type: row.try_get("event_type")?,
            data: row.try_get("data")?,
            metadata: row.try_get("metadata")?,
        })
    }
}

impl EventRow {
    fn into_record(self) -> EventStoreResult<EventRecord> {
        let metadata: Metadata = serde_json::from_value(self.metadata)
            .map_err(|e| EventStoreError::Serialization(e.to_string()))?;
        Ok(
            EventRecord::with_id(EventId::from_uuid(self.event_id), self.event_type, self.data)
                .with_metadata(metadata),
        )
    }
}

impl Repository for PostgresRepository {
    fn append_to_stream(
        &self,
        records: Vec<EventRecord>,
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        runtime::block_on(
            &self.handle,
            self.append_records(records, stream, expected_version),
        )
    }

    fn link_to_stream(
        &self,
        event_ids: &[EventId],
        stream: &Stream,
        expected_version: ExpectedVersion,
    ) -> EventStoreResult<()> {
        runtime::block_on(
            &self.handle,
            self.link_events(event_ids, stream, expected_version),
        )
    }

    fn delete_stream(&self, stream: &Stream) -> EventStoreResult<()> {
        runtime::block_on(&self.handle, self.remove_stream(stream))
    }

    fn has_event(&self, event_id: EventId) -> EventStoreResult<bool> {
        runtime::block_on(&self.handle, self.contains_event(event_id))
    }

    fn last_stream_event(&self, stream: &Stream) -> EventStoreResult<Option<EventRecord>> {
        runtime::block_on(&self.handle, self.last_event(stream))
    }

    fn read(&self, specification: &Specification) -> EventStoreResult<Vec<EventRecord>> {
        runtime::block_on(&self.handle, self.read_records(specification))
    }

    fn count(&self, specification: &Specification) -> EventStoreResult<usize> {
        runtime::block_on(&self.handle, self.count_records(specification))
    }

    fn read_event(&self, event_id: EventId) -> EventStoreResult<EventRecord> {
        runtime::block_on(&self.handle, self.fetch_event(event_id))
    }

    fn global_position(&self, event_id: EventId) -> EventStoreResult<u64> {
        runtime::block_on(&self.handle, self.event_global_position(event_id))
    }

    fn position_in_stream(
        &self,
        event_id: EventId,
        stream: &Stream,
    ) -> EventStoreResult<Option<u64>> {
        runtime::block_on(
            &self.handle,
            self.event_position_in_stream(event_id, stream),
        )
    }

    fn streams_of(&self, event_id: EventId) -> EventStoreResult<Vec<Stream>> {
        runtime::block_on(&self.handle, self.event_streams(event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::lint;
    use crate::test_database::TestDatabase;

    const SCHEMA: &str = r#"
        DROP TABLE IF EXISTS event_store_events_in_streams;
        DROP TABLE IF EXISTS event_store_events;

        CREATE TABLE event_store_events (
            id          bigserial PRIMARY KEY,
            event_id    uuid NOT NULL,
            event_type  text NOT NULL,
            data        jsonb NOT NULL,
            metadata    jsonb NOT NULL DEFAULT '{}',
            created_at  timestamptz NOT NULL DEFAULT now(),
            CONSTRAINT event_store_events_event_id UNIQUE (event_id)
        );

        CREATE TABLE event_store_events_in_streams (
            id          bigserial PRIMARY KEY,
            stream      text NOT NULL,
            position    bigint NULL,
            event_id    uuid NOT NULL REFERENCES event_store_events (event_id),
            created_at  timestamptz NOT NULL DEFAULT now(),
            CONSTRAINT event_store_events_in_streams_stream_position UNIQUE (stream, position),
            CONSTRAINT event_store_events_in_streams_stream_event_id UNIQUE (stream, event_id)
        );
    "#;

    fn fresh(db: &TestDatabase) -> PostgresRepository {
        db.execute("TRUNCATE event_store_events_in_streams, event_store_events RESTART IDENTITY");
        PostgresRepository::with_handle(db.pool(), db.handle())
    }

    #[test]
    fn unpositioned_links_count_towards_the_last_position() {
        assert_eq!(effective_last_position(0, None), None);
        assert_eq!(effective_last_position(2, None), Some(1));
        assert_eq!(effective_last_position(3, Some(2)), Some(2));
        assert_eq!(effective_last_position(4, Some(1)), Some(3));
    }

    #[test]
    fn non_constraint_errors_are_backend_errors() {
        let stream = Stream::new("orders").unwrap();
        let err = map_write_error("insert_link", &stream, EventId::new(), sqlx::Error::PoolClosed);
        assert!(matches!(err, EventStoreError::Backend(_)));

        let err = map_sqlx_error("read", sqlx::Error::RowNotFound);
        assert!(matches!(err, EventStoreError::Backend(_)));
    }

    #[test]
    #[ignore = "requires EVENTLINE_DATABASE_URL"]
    fn passes_repository_lint() {
        let Some(db) = TestDatabase::connect() else {
            return;
        };
        db.execute(SCHEMA);
        lint::run_all(|| fresh(&db));
    }

    #[test]
    #[ignore = "requires EVENTLINE_DATABASE_URL"]
    fn any_links_are_stored_without_a_position() {
        let Some(db) = TestDatabase::connect() else {
            return;
        };
        db.execute(SCHEMA);
        let repo = fresh(&db);
        let stream = Stream::new("loose").unwrap();
        let event = EventRecord::new("TestEvent", serde_json::json!({}));
        repo.append_to_stream(vec![event.clone()], &stream, ExpectedVersion::Any)
            .unwrap();

        assert_eq!(repo.position_in_stream(event.event_id(), &stream).unwrap(), None);
        assert_eq!(
            db.scalar(
                "SELECT COUNT(*) FROM event_store_events_in_streams \
                 WHERE stream = 'loose' AND position IS NULL"
            ),
            1
        );
    }

    #[test]
    #[ignore = "requires EVENTLINE_DATABASE_URL"]
    fn position_races_are_version_errors() {
        let Some(db) = TestDatabase::connect() else {
            return;
        };
        db.execute(SCHEMA);
        let repo = fresh(&db);
        let stream = Stream::new("race").unwrap();
        let winner = EventRecord::new("TestEvent", serde_json::json!({}));
        repo.append_to_stream(vec![winner], &stream, ExpectedVersion::NoStream)
            .unwrap();

        // A writer that read the stream before the winner committed tries position 0.
        let loser = EventRecord::new("TestEvent", serde_json::json!({}));
        let err = db.block_on(async {
            let mut tx = repo.pool().begin().await.unwrap();
            sqlx::query("INSERT INTO event_store_events (event_id, event_type, data) VALUES ($1, 'TestEvent', '{}')")
                .bind(loser.event_id().as_uuid())
                .execute(&mut *tx)
                .await
                .unwrap();
            insert_links(&mut tx, &stream, &[loser.event_id()], Positions::After(None))
                .await
                .unwrap_err()
        });
        assert!(matches!(err, EventStoreError::WrongExpectedVersion(_)));
    }
}
