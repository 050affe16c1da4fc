//! Shared setup for integration tests.

#![allow(dead_code)] // Each test binary uses a different subset

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use zone_raffle::app::{EventService, NewEvent, NewZone, RaffleApp};
use zone_raffle::aggregates::EventEnvironment;
use zone_raffle::environment::{SeededSampler, SystemClock};
use zone_raffle::event_store::InMemoryEventStore;
use zone_raffle::identity::{Identity, Role, StaticIdentityResolver};
use zone_raffle::retry::RetryPolicy;
use zone_raffle::{EventId, RegistrationScope, UserId, ZoneId};

/// Token accepted for the operator
pub const OPERATOR_TOKEN: &str = "operator-token";

/// An application over the in-memory store
pub struct Harness {
    pub app: Arc<RaffleApp>,
    pub operator: Identity,
    pub store: Arc<InMemoryEventStore>,
}

pub fn show_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 12, 19, 30, 0).unwrap()
}

/// Retry budget large enough for every concurrent test writer to get through
pub fn contention_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(64)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(10))
        .build()
}

pub fn harness() -> Harness {
    harness_with(RegistrationScope::PerZone, 17)
}

pub fn harness_with(scope: RegistrationScope, seed: u64) -> Harness {
    let operator = Identity::new(UserId::new(), Role::Operator);
    let store = Arc::new(InMemoryEventStore::new());
    let env = EventEnvironment::new(
        Arc::new(SystemClock),
        Arc::new(SeededSampler::new(seed)),
        scope,
    );
    let service = EventService::new(store.clone(), env, contention_policy());
    let resolver = StaticIdentityResolver::new().with_token(OPERATOR_TOKEN, operator);
    Harness {
        app: Arc::new(RaffleApp::new(service, Arc::new(resolver))),
        operator,
        store,
    }
}

/// A second application over the same store, as after a process restart.
///
/// Its user history starts empty until [`RaffleApp::rebuild_user_history`] runs.
pub fn restarted(h: &Harness, snapshot_interval: u64) -> RaffleApp {
    let env = EventEnvironment::new(
        Arc::new(SystemClock),
        Arc::new(SeededSampler::new(99)),
        RegistrationScope::PerZone,
    );
    let service = EventService::new(h.store.clone(), env, contention_policy())
        .with_snapshot_interval(snapshot_interval);
    let resolver = StaticIdentityResolver::new().with_token(OPERATOR_TOKEN, h.operator);
    RaffleApp::new(service, Arc::new(resolver))
}

pub fn member() -> Identity {
    Identity::new(UserId::new(), Role::Member)
}

pub fn new_event(open_registration: bool) -> NewEvent {
    NewEvent {
        name: "Autumn Concert".to_string(),
        dates: vec![show_date()],
        venue_name: "Riverside Hall".to_string(),
        venue_capacity: 1_000,
        open_registration,
    }
}

pub fn new_zone(capacity: u32) -> NewZone {
    NewZone {
        name: "Stalls".to_string(),
        capacity,
        performance_date: show_date(),
        ticket_price_cents: 7_500,
    }
}

/// Creates an open event with one zone of `capacity` seats
pub async fn event_with_zone(h: &Harness, capacity: u32) -> (EventId, ZoneId) {
    let event_id = h.app.create_event(&h.operator, new_event(true)).await.unwrap();
    let zone_id = h
        .app
        .add_zone(&h.operator, event_id, new_zone(capacity))
        .await
        .unwrap();
    (event_id, zone_id)
}

/// Registers `users`, closes registration and draws
pub async fn raffled(h: &Harness, capacity: u32, users: &[Identity]) -> (EventId, ZoneId) {
    let (event_id, zone_id) = event_with_zone(h, capacity).await;
    for user in users {
        h.app.register(user, event_id, zone_id).await.unwrap();
    }
    h.app.close_registration(&h.operator, event_id).await.unwrap();
    h.app.raffle(&h.operator, event_id).await.unwrap();
    (event_id, zone_id)
}
