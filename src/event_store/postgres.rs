//! `PostgreSQL` event store.
//!
//! Events live in `raffle_events`, keyed by `(stream_id, version)`. An append reads
//! the stream head and inserts inside one transaction; two writers racing for the
//! same version collide on the primary key and the loser gets
//! [`EventStoreError::ConcurrencyConflict`].
//!
//! Snapshots live in `raffle_snapshots`, one row per stream; an upsert only replaces
//! a row with an older version.

use super::{EventStore, EventStoreError, SerializedEvent, SnapshotData, StreamId, Version};
use futures::future::BoxFuture;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

/// Event store backed by a `PostgreSQL` pool.
#[derive(Clone, Debug)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Connects to the database.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the pool cannot be created.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(database_error)?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if a migration fails.
    pub async fn migrate(&self) -> Result<(), EventStoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EventStoreError::DatabaseError(e.to_string()))
    }

    async fn append(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> Result<Version, EventStoreError> {
        let mut tx = self.pool.begin().await.map_err(database_error)?;

        let head: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version) + 1, 0) FROM raffle_events WHERE stream_id = $1",
        )
        .bind(stream_id.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(database_error)?;
        let actual = Version::new(u64::try_from(head).unwrap_or_default());

        if let Some(expected) = expected_version {
            if expected != actual {
                return Err(EventStoreError::ConcurrencyConflict {
                    stream_id,
                    expected,
                    actual,
                });
            }
        }

        for (offset, event) in events.iter().enumerate() {
            let version = to_db_version(actual.advance(offset))?;
            let inserted = sqlx::query(
                "INSERT INTO raffle_events (stream_id, version, event_type, event_data, metadata) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(stream_id.as_str())
            .bind(version)
            .bind(&event.event_type)
            .bind(&event.data)
            .bind(&event.metadata)
            .execute(&mut *tx)
            .await;

            if let Err(error) = inserted {
                let unique_violation = error
                    .as_database_error()
                    .is_some_and(|db| db.is_unique_violation());
                if unique_violation {
                    tracing::warn!(stream_id = %stream_id, version, "Lost append race");
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id,
                        expected: actual,
                        actual: actual.advance(offset + 1),
                    });
                }
                return Err(database_error(error));
            }
        }

        tx.commit().await.map_err(database_error)?;
        Ok(actual.advance(events.len()))
    }

    async fn load(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> Result<Vec<SerializedEvent>, EventStoreError> {
        let from = to_db_version(from_version.unwrap_or(Version::INITIAL))?;
        let rows = sqlx::query(
            "SELECT event_type, event_data, metadata FROM raffle_events \
             WHERE stream_id = $1 AND version >= $2 ORDER BY version ASC",
        )
        .bind(stream_id.as_str())
        .bind(from)
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;

        rows.iter()
            .map(|row| {
                Ok::<_, EventStoreError>(SerializedEvent::new(
                    row.try_get("event_type").map_err(database_error)?,
                    row.try_get("event_data").map_err(database_error)?,
                    row.try_get("metadata").map_err(database_error)?,
                ))
            })
            .collect()
    }

    async fn streams(&self) -> Result<Vec<StreamId>, EventStoreError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT stream_id FROM raffle_events ORDER BY stream_id")
                .fetch_all(&self.pool)
                .await
                .map_err(database_error)?;
        Ok(ids.into_iter().map(StreamId::new).collect())
    }

    async fn save(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> Result<(), EventStoreError> {
        sqlx::query(
            "INSERT INTO raffle_snapshots (stream_id, version, state_data) VALUES ($1, $2, $3) \
             ON CONFLICT (stream_id) DO UPDATE \
             SET version = EXCLUDED.version, state_data = EXCLUDED.state_data, created_at = now() \
             WHERE raffle_snapshots.version < EXCLUDED.version",
        )
        .bind(stream_id.as_str())
        .bind(to_db_version(version)?)
        .bind(state)
        .execute(&self.pool)
        .await
        .map_err(database_error)?;
        Ok(())
    }

    async fn snapshot(&self, stream_id: StreamId) -> Result<Option<SnapshotData>, EventStoreError> {
        let row: Option<(i64, Vec<u8>)> = sqlx::query_as(
            "SELECT version, state_data FROM raffle_snapshots WHERE stream_id = $1",
        )
        .bind(stream_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(database_error)?;

        row.map(|(version, state)| {
            u64::try_from(version)
                .map(|version| (Version::new(version), state))
                .map_err(|_| {
                    EventStoreError::DatabaseError(format!(
                        "negative snapshot version {version} for {stream_id}"
                    ))
                })
        })
        .transpose()
    }
}

impl EventStore for PostgresEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> BoxFuture<'_, Result<Version, EventStoreError>> {
        Box::pin(self.append(stream_id, expected_version, events))
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> BoxFuture<'_, Result<Vec<SerializedEvent>, EventStoreError>> {
        Box::pin(self.load(stream_id, from_version))
    }

    fn stream_ids(&self) -> BoxFuture<'_, Result<Vec<StreamId>, EventStoreError>> {
        Box::pin(self.streams())
    }

    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), EventStoreError>> {
        Box::pin(self.save(stream_id, version, state))
    }

    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> BoxFuture<'_, Result<Option<SnapshotData>, EventStoreError>> {
        Box::pin(self.snapshot(stream_id))
    }
}

fn database_error(error: sqlx::Error) -> EventStoreError {
    EventStoreError::DatabaseError(error.to_string())
}

fn to_db_version(version: Version) -> Result<i64, EventStoreError> {
    i64::try_from(version.value())
        .map_err(|_| EventStoreError::DatabaseError(format!("version {version} out of range")))
}
