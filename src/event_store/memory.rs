//! In-memory event store.
//!
//! The version check and the write happen under one lock, so concurrent appends to
//! the same stream are serialized and at most one of them sees the expected version.

use super::{EventStore, EventStoreError, SerializedEvent, SnapshotData, StreamId, Version};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Event store backed by a `HashMap` of streams.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    streams: Arc<Mutex<HashMap<StreamId, Vec<SerializedEvent>>>>,
    snapshots: Arc<Mutex<HashMap<StreamId, SnapshotData>>>,
}

impl InMemoryEventStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events in a stream
    #[must_use]
    pub fn stream_len(&self, stream_id: &StreamId) -> usize {
        self.streams
            .lock()
            .map(|streams| streams.get(stream_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn poisoned() -> EventStoreError {
        EventStoreError::DatabaseError("in-memory store lock poisoned".to_string())
    }
}

impl EventStore for InMemoryEventStore {
    fn append_events(
        &self,
        stream_id: StreamId,
        expected_version: Option<Version>,
        events: Vec<SerializedEvent>,
    ) -> BoxFuture<'_, Result<Version, EventStoreError>> {
        Box::pin(async move {
            let mut streams = self.streams.lock().map_err(|_| Self::poisoned())?;
            let stream = streams.entry(stream_id.clone()).or_default();
            let actual = Version::INITIAL.advance(stream.len());

            if let Some(expected) = expected_version {
                if expected != actual {
                    return Err(EventStoreError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual,
                    });
                }
            }

            let appended = events.len();
            stream.extend(events);
            Ok(actual.advance(appended))
        })
    }

    fn load_events(
        &self,
        stream_id: StreamId,
        from_version: Option<Version>,
    ) -> BoxFuture<'_, Result<Vec<SerializedEvent>, EventStoreError>> {
        Box::pin(async move {
            let streams = self.streams.lock().map_err(|_| Self::poisoned())?;
            let skip = usize::try_from(from_version.map_or(0, Version::value)).unwrap_or(usize::MAX);
            Ok(streams
                .get(&stream_id)
                .map(|stream| stream.iter().skip(skip).cloned().collect())
                .unwrap_or_default())
        })
    }

    fn stream_ids(&self) -> BoxFuture<'_, Result<Vec<StreamId>, EventStoreError>> {
        Box::pin(async move {
            let streams = self.streams.lock().map_err(|_| Self::poisoned())?;
            let mut ids: Vec<StreamId> = streams
                .iter()
                .filter(|(_, events)| !events.is_empty())
                .map(|(id, _)| id.clone())
                .collect();
            ids.sort();
            Ok(ids)
        })
    }

    fn save_snapshot(
        &self,
        stream_id: StreamId,
        version: Version,
        state: Vec<u8>,
    ) -> BoxFuture<'_, Result<(), EventStoreError>> {
        Box::pin(async move {
            let mut snapshots = self.snapshots.lock().map_err(|_| Self::poisoned())?;
            let newer = snapshots
                .get(&stream_id)
                .is_none_or(|(stored, _)| *stored < version);
            if newer {
                snapshots.insert(stream_id, (version, state));
            }
            Ok(())
        })
    }

    fn load_snapshot(
        &self,
        stream_id: StreamId,
    ) -> BoxFuture<'_, Result<Option<SnapshotData>, EventStoreError>> {
        Box::pin(async move {
            let snapshots = self.snapshots.lock().map_err(|_| Self::poisoned())?;
            Ok(snapshots.get(&stream_id).cloned())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn event(name: &str) -> SerializedEvent {
        SerializedEvent::new(name.to_string(), vec![1, 2, 3], None)
    }

    #[tokio::test]
    async fn append_then_load_preserves_order() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("event-a");

        let v1 = store
            .append_events(stream.clone(), Some(Version::INITIAL), vec![event("A"), event("B")])
            .await
            .unwrap();
        assert_eq!(v1, Version::new(2));

        let v2 = store
            .append_events(stream.clone(), Some(v1), vec![event("C")])
            .await
            .unwrap();
        assert_eq!(v2, Version::new(3));

        let loaded = store.load_events(stream.clone(), None).await.unwrap();
        let types: Vec<_> = loaded.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["A", "B", "C"]);

        let tail = store
            .load_events(stream, Some(Version::new(2)))
            .await
            .unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].event_type, "C");
    }

    #[tokio::test]
    async fn stale_writer_is_rejected_without_writing() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("event-b");
        store
            .append_events(stream.clone(), Some(Version::INITIAL), vec![event("A")])
            .await
            .unwrap();

        let result = store
            .append_events(stream.clone(), Some(Version::INITIAL), vec![event("B")])
            .await;

        assert_eq!(
            result,
            Err(EventStoreError::ConcurrencyConflict {
                stream_id: stream.clone(),
                expected: Version::INITIAL,
                actual: Version::new(1),
            })
        );
        assert_eq!(store.stream_len(&stream), 1);
    }

    #[tokio::test]
    async fn missing_stream_loads_empty() {
        let store = InMemoryEventStore::new();
        let loaded = store
            .load_events(StreamId::new("nope"), None)
            .await
            .unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn snapshot_only_moves_forward() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("event-snap");
        assert_eq!(store.load_snapshot(stream.clone()).await.unwrap(), None);

        store
            .save_snapshot(stream.clone(), Version::new(10), vec![10])
            .await
            .unwrap();
        store
            .save_snapshot(stream.clone(), Version::new(5), vec![5])
            .await
            .unwrap();

        assert_eq!(
            store.load_snapshot(stream).await.unwrap(),
            Some((Version::new(10), vec![10]))
        );
    }

    #[tokio::test]
    async fn stream_ids_lists_non_empty_streams() {
        let store = InMemoryEventStore::new();
        store
            .append_events(StreamId::new("event-b"), None, vec![event("A")])
            .await
            .unwrap();
        store
            .append_events(StreamId::new("event-a"), None, vec![event("A")])
            .await
            .unwrap();
        let _ = store
            .append_events(StreamId::new("event-c"), Some(Version::new(4)), vec![event("A")])
            .await;

        assert_eq!(
            store.stream_ids().await.unwrap(),
            vec![StreamId::new("event-a"), StreamId::new("event-b")]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_at_same_version_admit_one() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("event-race");

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let store = store.clone();
            let stream = stream.clone();
            tasks.spawn(async move {
                store
                    .append_events(stream, Some(Version::INITIAL), vec![event(&format!("E{i}"))])
                    .await
            });
        }

        let mut successes = 0;
        while let Some(result) = tasks.join_next().await {
            if result.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(store.stream_len(&stream), 1);
    }
}
