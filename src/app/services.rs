//! Command handler for the Event aggregate.
//!
//! Every command runs the same loop:
//! 1. Load the stream's snapshot and the events after it, and fold them into state
//! 2. Decide with the reducer
//! 3. Append the new events at the loaded version
//! 4. On a version conflict, back off and start again from 1
//!
//! The append is the serialization point: two writers that decided on the same
//! version cannot both commit, so capacity and uniqueness checks made in `decide`
//! hold for the committed stream.

use crate::aggregates::{EventCommand, EventEnvironment, EventReducer, RaffleEvent};
use crate::error::RaffleError;
use crate::event_store::{DomainEvent, EventStore, EventStoreError, StreamId, Version};
use crate::metrics;
use crate::reducer::Reducer;
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::types::{EventId, EventState};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Result of a committed command.
#[derive(Clone, Debug)]
pub struct CommandOutcome {
    /// Events appended by the command
    pub events: Vec<RaffleEvent>,
    /// State after the events were applied
    pub state: EventState,
    /// Stream version after the append
    pub version: Version,
}

/// Events between two snapshots of a stream, unless configured otherwise
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 50;

/// Event aggregate service.
#[derive(Clone)]
pub struct EventService {
    store: Arc<dyn EventStore>,
    reducer: EventReducer,
    env: EventEnvironment,
    retry: RetryPolicy,
    snapshot_interval: u64,
}

impl EventService {
    /// Creates a new service
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, env: EventEnvironment, retry: RetryPolicy) -> Self {
        Self {
            store,
            reducer: EventReducer::new(),
            env,
            retry,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }

    /// Snapshots a stream each time its version crosses a multiple of `interval`.
    /// Zero disables snapshots.
    #[must_use]
    pub const fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Loads an event stream and rebuilds its state.
    ///
    /// Starts from the stream's snapshot when there is one and replays the events
    /// appended after it. A snapshot that does not decode is ignored.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the stream cannot be read or an event does not decode.
    pub async fn load(&self, event_id: EventId) -> Result<(EventState, Version), RaffleError> {
        let stream_id = StreamId::for_event(&event_id);
        let (mut state, base) = self.load_snapshot(&stream_id).await?;

        let stored = self.store.load_events(stream_id, Some(base)).await?;
        for serialized in &stored {
            let event = RaffleEvent::from_serialized(serialized)?;
            self.reducer.apply(&mut state, &event);
        }
        let version = base.advance(stored.len());

        debug!(%event_id, %base, %version, "Loaded event stream");
        Ok((state, version))
    }

    /// Current state of an event.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the stream cannot be read.
    pub async fn state(&self, event_id: EventId) -> Result<EventState, RaffleError> {
        self.load(event_id).await.map(|(state, _)| state)
    }

    /// Decoded events of an event stream, starting at `from`.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the stream cannot be read or an event does not decode.
    pub async fn events_since(
        &self,
        event_id: EventId,
        from: Version,
    ) -> Result<Vec<RaffleEvent>, RaffleError> {
        let stored = self
            .store
            .load_events(StreamId::for_event(&event_id), Some(from))
            .await?;
        Ok(stored
            .iter()
            .map(RaffleEvent::from_serialized)
            .collect::<Result<_, _>>()?)
    }

    /// Every event that has a stream in the store.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store cannot be read.
    pub async fn event_ids(&self) -> Result<Vec<EventId>, RaffleError> {
        let streams = self.store.stream_ids().await?;
        Ok(streams.iter().filter_map(StreamId::event_id).collect())
    }

    /// Executes a command, retrying storage conflicts.
    ///
    /// # Errors
    ///
    /// - The reducer's business error, unchanged, on the first attempt it occurs
    /// - `TransientConflict` once the retry budget is spent
    /// - `Storage` on any other backend failure
    #[tracing::instrument(
        skip(self, command),
        fields(event_id = %command.event_id(), command = command.name())
    )]
    pub async fn execute(&self, command: EventCommand) -> Result<CommandOutcome, RaffleError> {
        let attempts = AtomicUsize::new(0);

        let result = retry_with_predicate(
            self.retry.clone(),
            || {
                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                self.attempt(command.clone(), attempt)
            },
            RaffleError::is_transient,
        )
        .await;

        match &result {
            Ok(outcome) => {
                metrics::record_committed(&outcome.events);
                info!(
                    version = %outcome.version,
                    events = outcome.events.len(),
                    "Command committed"
                );
            }
            Err(error) => {
                metrics::record_rejection(error);
                debug!(kind = error.kind(), %error, "Command refused");
            }
        }
        result
    }

    async fn attempt(
        &self,
        command: EventCommand,
        attempt: usize,
    ) -> Result<CommandOutcome, RaffleError> {
        let event_id = command.event_id();
        let (mut state, version) = self.load(event_id).await?;

        let events = self.reducer.reduce(&mut state, command, &self.env)?;
        if events.is_empty() {
            return Ok(CommandOutcome {
                events: Vec::new(),
                state,
                version,
            });
        }

        let serialized = events
            .iter()
            .map(DomainEvent::to_serialized)
            .collect::<Result<Vec<_>, _>>()?;

        match self
            .store
            .append_events(StreamId::for_event(&event_id), Some(version), serialized)
            .await
        {
            Ok(committed) => {
                self.snapshot_if_due(&event_id, version, committed, &state)
                    .await;
                Ok(CommandOutcome {
                    events: events.into_vec(),
                    state,
                    version: committed,
                })
            }
            Err(EventStoreError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                metrics::record_storage_conflict();
                warn!(
                    %event_id,
                    attempt,
                    %expected,
                    %actual,
                    "Event stream moved while deciding"
                );
                Err(RaffleError::TransientConflict {
                    event_id,
                    attempts: attempt,
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn load_snapshot(
        &self,
        stream_id: &StreamId,
    ) -> Result<(EventState, Version), RaffleError> {
        let Some((version, data)) = self.store.load_snapshot(stream_id.clone()).await? else {
            return Ok((EventState::new(), Version::INITIAL));
        };

        match bincode::deserialize::<EventState>(&data) {
            Ok(state) => Ok((state, version)),
            Err(error) => {
                warn!(%stream_id, %version, %error, "Ignoring undecodable snapshot");
                Ok((EventState::new(), Version::INITIAL))
            }
        }
    }

    /// Saves a snapshot when the append crossed a multiple of the interval.
    /// Failures are logged; the stream stays authoritative.
    async fn snapshot_if_due(
        &self,
        event_id: &EventId,
        before: Version,
        after: Version,
        state: &EventState,
    ) {
        let interval = self.snapshot_interval;
        if interval == 0 || before.value() / interval == after.value() / interval {
            return;
        }

        let stream_id = StreamId::for_event(event_id);
        let saved = match bincode::serialize(state) {
            Ok(data) => self.store.save_snapshot(stream_id, after, data).await,
            Err(error) => Err(EventStoreError::SerializationError(error.to_string())),
        };
        match saved {
            Ok(()) => debug!(%event_id, version = %after, "Saved snapshot"),
            Err(error) => warn!(%event_id, version = %after, %error, "Snapshot not saved"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::environment::{Clock, SeededSampler};
    use crate::error::{Conflict, Resource};
    use crate::event_store::{InMemoryEventStore, SerializedEvent, SnapshotData};
    use crate::testing::test_clock;
    use crate::types::{Capacity, Money, RegistrationScope, TicketId, UserId, Venue, ZoneId};
    use futures::future::BoxFuture;
    use std::time::Duration;

    fn service(store: Arc<dyn EventStore>, max_retries: usize) -> EventService {
        EventService::new(
            store,
            EventEnvironment::new(
                Arc::new(test_clock()),
                Arc::new(SeededSampler::new(1)),
                RegistrationScope::PerZone,
            ),
            RetryPolicy::builder()
                .max_retries(max_retries)
                .initial_delay(Duration::from_millis(1))
                .build(),
        )
    }

    fn create(event_id: EventId) -> EventCommand {
        EventCommand::CreateEvent {
            id: event_id,
            name: "Night Show".to_string(),
            dates: vec![test_clock().now()],
            venue: Venue::new("Hall".to_string(), Capacity::new(100)),
            open_registration: true,
        }
    }

    /// Store whose every append loses the version race
    struct AlwaysConflicting {
        appends: AtomicUsize,
    }

    impl EventStore for AlwaysConflicting {
        fn append_events(
            &self,
            stream_id: StreamId,
            expected_version: Option<Version>,
            _events: Vec<SerializedEvent>,
        ) -> BoxFuture<'_, Result<Version, EventStoreError>> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            let expected = expected_version.unwrap_or(Version::INITIAL);
            Box::pin(async move {
                Err(EventStoreError::ConcurrencyConflict {
                    stream_id,
                    expected,
                    actual: expected.advance(1),
                })
            })
        }

        fn load_events(
            &self,
            _stream_id: StreamId,
            _from_version: Option<Version>,
        ) -> BoxFuture<'_, Result<Vec<SerializedEvent>, EventStoreError>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn stream_ids(&self) -> BoxFuture<'_, Result<Vec<StreamId>, EventStoreError>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn save_snapshot(
            &self,
            _stream_id: StreamId,
            _version: Version,
            _state: Vec<u8>,
        ) -> BoxFuture<'_, Result<(), EventStoreError>> {
            Box::pin(async { Ok(()) })
        }

        fn load_snapshot(
            &self,
            _stream_id: StreamId,
        ) -> BoxFuture<'_, Result<Option<SnapshotData>, EventStoreError>> {
            Box::pin(async { Ok(None) })
        }
    }

    /// Folds the whole stream, ignoring snapshots
    async fn full_replay(store: &InMemoryEventStore, event_id: EventId) -> (EventState, Version) {
        let stored = store
            .load_events(StreamId::for_event(&event_id), None)
            .await
            .unwrap();
        let reducer = EventReducer::new();
        let mut state = EventState::new();
        for serialized in &stored {
            reducer.apply(&mut state, &RaffleEvent::from_serialized(serialized).unwrap());
        }
        (state, Version::INITIAL.advance(stored.len()))
    }

    async fn busy_event(service: &EventService) -> EventId {
        let event_id = EventId::new();
        let zone_id = ZoneId::new();
        service.execute(create(event_id)).await.unwrap();
        service
            .execute(EventCommand::AddZone {
                event_id,
                zone_id,
                name: "Floor".to_string(),
                capacity: Capacity::new(3),
                performance_date: test_clock().now(),
                ticket_price: Money::from_cents(2_000),
            })
            .await
            .unwrap();
        let users: Vec<_> = (0..7).map(|_| UserId::new()).collect();
        for user in &users {
            service
                .execute(EventCommand::Register {
                    event_id,
                    zone_id,
                    user_id: *user,
                })
                .await
                .unwrap();
        }
        service
            .execute(EventCommand::CloseRegistration { event_id })
            .await
            .unwrap();
        let drawn = service
            .execute(EventCommand::DrawRaffle { event_id })
            .await
            .unwrap();
        let winner = *drawn.state.get().unwrap().zone(&zone_id).unwrap().winners.iter().next().unwrap();
        service
            .execute(EventCommand::PurchaseTicket {
                event_id,
                zone_id,
                user_id: winner,
                ticket_id: TicketId::new(),
            })
            .await
            .unwrap();
        event_id
    }

    #[tokio::test]
    async fn committed_events_rebuild_the_same_state() {
        let store = Arc::new(InMemoryEventStore::new());
        let service = service(store.clone(), 3);
        let event_id = EventId::new();

        let outcome = service.execute(create(event_id)).await.unwrap();
        assert_eq!(outcome.version, Version::new(1));

        let (state, version) = service.load(event_id).await.unwrap();
        assert_eq!(state, outcome.state);
        assert_eq!(version, outcome.version);
        assert_eq!(store.stream_len(&StreamId::for_event(&event_id)), 1);
    }

    #[tokio::test]
    async fn snapshot_load_matches_full_replay() {
        let store = Arc::new(InMemoryEventStore::new());
        let service = service(store.clone(), 3).with_snapshot_interval(4);
        let event_id = busy_event(&service).await;

        let (snapshot_version, _) = store
            .load_snapshot(StreamId::for_event(&event_id))
            .await
            .unwrap()
            .unwrap();
        let (replayed, version) = full_replay(&store, event_id).await;
        assert_eq!(version, Version::new(12));
        assert_eq!(snapshot_version, Version::new(12));

        assert_eq!(service.load(event_id).await.unwrap(), (replayed.clone(), version));

        service
            .execute(EventCommand::OpenRegistration { event_id })
            .await
            .unwrap();
        let (replayed, version) = full_replay(&store, event_id).await;
        assert_eq!(service.load(event_id).await.unwrap(), (replayed, version));
    }

    #[tokio::test]
    async fn snapshots_are_taken_only_at_the_interval() {
        let store = Arc::new(InMemoryEventStore::new());
        let event_id = busy_event(&service(store.clone(), 3).with_snapshot_interval(5)).await;
        let snapshot = store
            .load_snapshot(StreamId::for_event(&event_id))
            .await
            .unwrap();
        assert_eq!(snapshot.map(|(version, _)| version), Some(Version::new(10)));

        let store = Arc::new(InMemoryEventStore::new());
        let event_id = busy_event(&service(store.clone(), 3).with_snapshot_interval(0)).await;
        let snapshot = store
            .load_snapshot(StreamId::for_event(&event_id))
            .await
            .unwrap();
        assert_eq!(snapshot, None);
    }

    #[tokio::test]
    async fn undecodable_snapshot_falls_back_to_replay() {
        let store = Arc::new(InMemoryEventStore::new());
        let service = service(store.clone(), 3).with_snapshot_interval(0);
        let event_id = busy_event(&service).await;
        store
            .save_snapshot(StreamId::for_event(&event_id), Version::new(6), vec![0xff; 3])
            .await
            .unwrap();

        let (replayed, version) = full_replay(&store, event_id).await;
        assert_eq!(service.load(event_id).await.unwrap(), (replayed, version));
    }

    #[tokio::test]
    async fn business_errors_are_not_retried() {
        let store = Arc::new(InMemoryEventStore::new());
        let service = service(store, 3);
        let event_id = EventId::new();

        let result = service
            .execute(EventCommand::CloseRegistration { event_id })
            .await;
        assert_eq!(
            result.unwrap_err(),
            RaffleError::NotFound(Resource::Event(event_id))
        );

        service.execute(create(event_id)).await.unwrap();
        service
            .execute(EventCommand::CloseRegistration { event_id })
            .await
            .unwrap();
        let result = service.execute(EventCommand::DrawRaffle { event_id }).await;
        assert!(result.is_ok());
        let again = service.execute(EventCommand::DrawRaffle { event_id }).await;
        assert_eq!(
            again.unwrap_err(),
            RaffleError::StateConflict(Conflict::AlreadyRaffled)
        );
    }

    #[tokio::test]
    async fn exhausted_conflicts_surface_as_transient() {
        let store = Arc::new(AlwaysConflicting {
            appends: AtomicUsize::new(0),
        });
        let service = service(store.clone(), 2);
        let event_id = EventId::new();

        let error = service.execute(create(event_id)).await.unwrap_err();
        assert_eq!(
            error,
            RaffleError::TransientConflict {
                event_id,
                attempts: 3
            }
        );
        assert!(error.is_transient());
        assert_eq!(store.appends.load(Ordering::SeqCst), 3);
    }
}
