//! Append-only event store with optimistic concurrency.
//!
//! Each `Event` aggregate is one stream, identified by [`StreamId::for_event`].
//! A command handler loads the stream, folds it into state, decides, then appends the
//! resulting domain events with the version it loaded. If another writer committed in
//! between, the append fails with [`EventStoreError::ConcurrencyConflict`] and nothing
//! is written. This is the per-aggregate serialization point for registration, the
//! raffle draw, and ticket issuance.
//!
//! Streams only grow, so the store also keeps one snapshot per stream: the
//! bincode-encoded folded state together with the version it covers. Loading reads the
//! snapshot and replays only the events appended after it.
//!
//! # Implementations
//!
//! - [`InMemoryEventStore`]: mutex-guarded map, used by tests and when no database is
//!   configured
//! - [`PostgresEventStore`]: `(stream_id, version)` primary key inside a transaction

mod memory;
mod postgres;

pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;

use crate::types::EventId;
use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Errors that can occur during event store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// The stream moved past the version the writer loaded.
    #[error("Concurrency conflict on {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream where the conflict occurred
        stream_id: StreamId,
        /// The version the writer expected
        expected: Version,
        /// The actual current version
        actual: Version,
    },

    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Identifier of an event stream (one aggregate instance).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(String);

impl StreamId {
    /// Creates a stream id from a string
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The stream holding an event aggregate
    #[must_use]
    pub fn for_event(event_id: &EventId) -> Self {
        Self(format!("event-{event_id}"))
    }

    /// Returns the stream id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The event whose aggregate this stream holds, if it is an event stream
    #[must_use]
    pub fn event_id(&self) -> Option<EventId> {
        self.0.strip_prefix("event-")?.parse().ok()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of events in a stream.
///
/// A new stream is at [`Version::INITIAL`]; appending `n` events moves it to `v + n`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    /// The version of an empty stream
    pub const INITIAL: Self = Self(0);

    /// Creates a version
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the version number
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version after appending `count` events
    #[must_use]
    pub const fn advance(self, count: usize) -> Self {
        Self(self.0 + count as u64)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A domain event that can be persisted.
///
/// `event_type` returns a stable, versioned name (e.g. `"TicketIssued.v1"`) stored
/// next to the payload. Payloads are encoded with `bincode`.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable event type identifier
    fn event_type(&self) -> &'static str;

    /// Encodes the event for storage.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if the event cannot be encoded.
    fn to_serialized(&self) -> Result<SerializedEvent, EventStoreError> {
        let data = bincode::serialize(self)
            .map_err(|e| EventStoreError::SerializationError(e.to_string()))?;
        Ok(SerializedEvent::new(self.event_type().to_string(), data, None))
    }

    /// Decodes a stored event.
    ///
    /// # Errors
    ///
    /// Returns `SerializationError` if the payload does not decode into `Self`.
    fn from_serialized(event: &SerializedEvent) -> Result<Self, EventStoreError> {
        bincode::deserialize(&event.data).map_err(|e| {
            EventStoreError::SerializationError(format!("{}: {e}", event.event_type))
        })
    }
}

/// A serialized event ready for storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedEvent {
    /// Event type identifier (e.g. `"RaffleDrawn.v1"`)
    pub event_type: String,
    /// Bincode payload
    pub data: Vec<u8>,
    /// Optional JSON metadata (correlation ids, actor)
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Creates a serialized event
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }
}

/// A stored snapshot: the version it covers and the encoded state.
///
/// The state is the fold of events `0..version`; replay resumes at `version`.
pub type SnapshotData = (Version, Vec<u8>);

/// Event store abstraction.
///
/// Returns boxed futures instead of `async fn` so the store can be shared as
/// `Arc<dyn EventStore>`.
pub trait EventStore: Send + Sync {
    /// Appends events to a stream.
    ///
    /// With `expected_version = Some(v)` the append succeeds only if the stream is
    /// currently at `v`; either every event is written or none is. Returns the new
    /// stream version.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the stream is not at `expected_version`
    /// - `DatabaseError`: the backend failed
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> BoxFuture<'_, Result<Version, EventStoreError>>;

    /// Loads events from a stream, oldest first, starting at `from_version`
    /// (inclusive, zero-based). A missing stream yields an empty vector.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend failed
    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> BoxFuture<'_, Result<Vec<SerializedEvent>, EventStoreError>>;

    /// Every stream holding at least one event, in id order.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend failed
    fn stream_ids(&self) -> BoxFuture<'_, Result<Vec<StreamId>, EventStoreError>>;

    /// Saves a snapshot of a stream's folded state at `version`.
    ///
    /// A snapshot older than the one already stored is ignored, so concurrent
    /// writers can only move a stream's snapshot forward.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend failed
    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), EventStoreError>>;

    /// Loads the latest snapshot of a stream, `None` if there is none.
    ///
    /// # Errors
    ///
    /// - `DatabaseError`: the backend failed
    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> BoxFuture<'_, Result<Option<SnapshotData>, EventStoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_error_display() {
        let error = EventStoreError::ConcurrencyConflict {
            stream_id: StreamId::new("event-1"),
            expected: Version::new(5),
            actual: Version::new(7),
        };

        let display = error.to_string();
        assert!(display.contains("expected version 5"));
        assert!(display.contains("found 7"));
    }

    #[test]
    fn version_advances_by_event_count() {
        assert_eq!(Version::INITIAL.advance(3), Version::new(3));
        assert_eq!(Version::new(3).advance(0), Version::new(3));
    }

    #[test]
    fn event_streams_are_prefixed() {
        let id = EventId::new();
        assert_eq!(StreamId::for_event(&id).as_str(), format!("event-{id}"));
        assert_eq!(StreamId::for_event(&id).event_id(), Some(id));
        assert_eq!(StreamId::new("ledger-1").event_id(), None);
    }
}
