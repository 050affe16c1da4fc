//! Application coordinator: the operations callers invoke.
//!
//! [`RaffleApp`] resolves callers through the identity resolver, checks roles,
//! turns requests into [`EventCommand`]s for the [`EventService`], and feeds
//! committed events to the read-side projections.
//!
//! The user history is rebuilt from the event store at startup and then kept
//! current commit by commit. A commit that reaches it ahead of an earlier one makes
//! it read the missing events from the store first, so it always follows stream
//! order.

use super::services::{CommandOutcome, EventService};
use crate::aggregates::{EventCommand, EventEnvironment, RaffleEvent};
use crate::config::{Config, ConfigError};
use crate::environment::{SeededSampler, SystemClock, ThreadRngSampler, WinnerSampler};
use crate::error::{RaffleError, Resource};
use crate::event_store::{
    EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore, Version,
};
use crate::identity::{Identity, IdentityResolver};
use crate::projections::{Projection, UserHistory, UserHistoryProjection};
use crate::types::{
    Capacity, Event, EventId, Money, Ticket, TicketId, UserId, Venue, Zone, ZoneId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Application startup errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Event store connection or migration failed
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Replaying the event store into the projections failed
    #[error("Projection rebuild failed: {0}")]
    Rebuild(#[from] RaffleError),
}

/// Request to create an event
#[derive(Clone, Debug, Deserialize)]
pub struct NewEvent {
    /// Display name
    pub name: String,
    /// Performance dates
    pub dates: Vec<DateTime<Utc>>,
    /// Venue name
    pub venue_name: String,
    /// Seats in the venue
    pub venue_capacity: u32,
    /// Whether pre-registration opens immediately
    #[serde(default = "default_open_registration")]
    pub open_registration: bool,
}

const fn default_open_registration() -> bool {
    true
}

/// Request to add a zone
#[derive(Clone, Debug, Deserialize)]
pub struct NewZone {
    /// Display name
    pub name: String,
    /// Seats in the zone
    pub capacity: u32,
    /// One of the event's dates
    pub performance_date: DateTime<Utc>,
    /// Ticket price in cents
    pub ticket_price_cents: u64,
}

/// Outcome of one zone in a raffle
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ZoneResult {
    /// The zone
    pub zone_id: ZoneId,
    /// Users drawn in this round
    pub winners: Vec<UserId>,
    /// Users left out in this round
    pub not_selected: Vec<UserId>,
}

/// Outcome of a raffle
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RaffleSummary {
    /// The event
    pub event_id: EventId,
    /// Round number, starting at 1
    pub round: u32,
    /// One entry per zone
    pub zones: Vec<ZoneResult>,
}

/// Main raffle application.
#[derive(Clone)]
pub struct RaffleApp {
    events: EventService,
    identity: Arc<dyn IdentityResolver>,
    user_history: Arc<RwLock<UserHistoryProjection>>,
}

impl RaffleApp {
    /// Creates the application from its parts
    #[must_use]
    pub fn new(events: EventService, identity: Arc<dyn IdentityResolver>) -> Self {
        Self {
            events,
            identity,
            user_history: Arc::new(RwLock::new(UserHistoryProjection::new())),
        }
    }

    /// Initialize the application from configuration.
    ///
    /// Uses `PostgreSQL` when `DATABASE_URL` is set (and applies migrations), the
    /// in-memory store otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if the database connection or a migration fails, or the
    /// identity list is malformed.
    pub async fn from_config(config: &Config) -> Result<Self, AppError> {
        let store: Arc<dyn EventStore> = match &config.postgres.url {
            Some(url) => {
                info!(
                    max_connections = config.postgres.max_connections,
                    "Connecting to PostgreSQL event store"
                );
                let store = PostgresEventStore::connect(
                    url,
                    config.postgres.max_connections,
                    config.postgres.connect_timeout(),
                )
                .await?;
                store.migrate().await?;
                Arc::new(store)
            }
            None => {
                warn!("DATABASE_URL not set, events are kept in memory only");
                Arc::new(InMemoryEventStore::new())
            }
        };

        let sampler: Arc<dyn WinnerSampler> = match config.raffle.seed {
            Some(seed) => {
                info!(seed, "Using seeded winner sampler");
                Arc::new(SeededSampler::new(seed))
            }
            None => Arc::new(ThreadRngSampler),
        };
        let env = EventEnvironment::new(
            Arc::new(SystemClock),
            sampler,
            config.raffle.registration_scope,
        );

        let resolver = config.identity.resolver()?;
        info!(
            identities = resolver.len(),
            scope = ?config.raffle.registration_scope,
            "Raffle application initialized"
        );

        let events = EventService::new(store, env, config.raffle.retry_policy())
            .with_snapshot_interval(config.raffle.snapshot_interval);
        let app = Self::new(events, Arc::new(resolver));
        let streams = app.rebuild_user_history().await?;
        info!(streams, "User history rebuilt from the event store");

        Ok(app)
    }

    /// Replays every event stream into a fresh user history.
    ///
    /// Returns the number of streams replayed.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store cannot be read.
    pub async fn rebuild_user_history(&self) -> Result<usize, RaffleError> {
        let event_ids = self.events.event_ids().await?;

        let mut projection = self.user_history.write().await;
        projection.reset();
        for event_id in &event_ids {
            self.catch_up(&mut projection, *event_id).await?;
        }
        Ok(event_ids.len())
    }

    /// Resolves a bearer credential to an identity.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` for an unknown credential, `NotFound` for a user the
    /// resolver no longer knows.
    pub async fn authenticate(&self, credential: &str) -> Result<Identity, RaffleError> {
        Ok(self.identity.resolve(credential).await?)
    }

    // ========================================================================
    // Operator commands
    // ========================================================================

    /// Creates an event and returns its id.
    ///
    /// # Errors
    ///
    /// `Forbidden` for a non-operator, `Validation` for malformed input.
    pub async fn create_event(
        &self,
        caller: &Identity,
        request: NewEvent,
    ) -> Result<EventId, RaffleError> {
        require_operator(caller)?;
        let event_id = EventId::new();
        self.dispatch(EventCommand::CreateEvent {
            id: event_id,
            name: request.name,
            dates: request.dates,
            venue: Venue::new(request.venue_name, Capacity::new(request.venue_capacity)),
            open_registration: request.open_registration,
        })
        .await?;
        Ok(event_id)
    }

    /// Adds a zone and returns its id.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound`, `Validation`, or `StateConflict` once raffled.
    pub async fn add_zone(
        &self,
        caller: &Identity,
        event_id: EventId,
        request: NewZone,
    ) -> Result<ZoneId, RaffleError> {
        require_operator(caller)?;
        let zone_id = ZoneId::new();
        self.dispatch(EventCommand::AddZone {
            event_id,
            zone_id,
            name: request.name,
            capacity: Capacity::new(request.capacity),
            performance_date: request.performance_date,
            ticket_price: Money::from_cents(request.ticket_price_cents),
        })
        .await?;
        Ok(zone_id)
    }

    /// Removes a zone that has no winners and no tickets.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound`, or `StateConflict` if the zone is in use.
    pub async fn remove_zone(
        &self,
        caller: &Identity,
        event_id: EventId,
        zone_id: ZoneId,
    ) -> Result<(), RaffleError> {
        require_operator(caller)?;
        self.dispatch(EventCommand::RemoveZone { event_id, zone_id })
            .await
            .map(drop)
    }

    /// Opens pre-registration.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound`, or `StateConflict` if already open.
    pub async fn open_registration(
        &self,
        caller: &Identity,
        event_id: EventId,
    ) -> Result<(), RaffleError> {
        require_operator(caller)?;
        self.dispatch(EventCommand::OpenRegistration { event_id })
            .await
            .map(drop)
    }

    /// Closes pre-registration.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound`, or `StateConflict` unless open.
    pub async fn close_registration(
        &self,
        caller: &Identity,
        event_id: EventId,
    ) -> Result<(), RaffleError> {
        require_operator(caller)?;
        self.dispatch(EventCommand::CloseRegistration { event_id })
            .await
            .map(drop)
    }

    /// Deletes an event with everything it owns.
    ///
    /// # Errors
    ///
    /// `Forbidden` or `NotFound`.
    pub async fn delete_event(&self, caller: &Identity, event_id: EventId) -> Result<(), RaffleError> {
        require_operator(caller)?;
        self.dispatch(EventCommand::DeleteEvent { event_id })
            .await
            .map(drop)
    }

    /// Draws the raffle for every zone of a closed event.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound`, or `StateConflict` if registration is open or the
    /// cycle was already drawn.
    pub async fn raffle(
        &self,
        caller: &Identity,
        event_id: EventId,
    ) -> Result<RaffleSummary, RaffleError> {
        require_operator(caller)?;
        let outcome = self.dispatch(EventCommand::DrawRaffle { event_id }).await?;

        outcome
            .events
            .into_iter()
            .find_map(|event| match event {
                RaffleEvent::RaffleDrawn {
                    event_id,
                    round,
                    draws,
                    ..
                } => Some(RaffleSummary {
                    event_id,
                    round,
                    zones: draws
                        .into_iter()
                        .map(|draw| ZoneResult {
                            zone_id: draw.zone_id,
                            winners: draw.winners,
                            not_selected: draw.not_selected,
                        })
                        .collect(),
                }),
                _ => None,
            })
            .ok_or_else(|| RaffleError::Storage("raffle committed without a draw".to_string()))
    }

    /// Revokes the ticket a user holds in a zone.
    ///
    /// # Errors
    ///
    /// `Forbidden`, `NotFound`, or `StateConflict` if the user holds no ticket.
    pub async fn revoke_ticket(
        &self,
        caller: &Identity,
        event_id: EventId,
        zone_id: ZoneId,
        user_id: UserId,
    ) -> Result<(), RaffleError> {
        require_operator(caller)?;
        self.dispatch(EventCommand::RevokeTicket {
            event_id,
            zone_id,
            user_id,
        })
        .await
        .map(drop)
    }

    // ========================================================================
    // Member commands
    // ========================================================================

    /// Pre-registers the caller for a zone.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event or zone; `StateConflict` if registration is
    /// closed or the caller is already registered.
    pub async fn register(
        &self,
        caller: &Identity,
        event_id: EventId,
        zone_id: ZoneId,
    ) -> Result<(), RaffleError> {
        self.dispatch(EventCommand::Register {
            event_id,
            zone_id,
            user_id: caller.user_id,
        })
        .await
        .map(drop)
    }

    /// Issues the caller's ticket for a zone they won.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown event or zone; `StateConflict` if the caller did
    /// not win, already holds a ticket, or the zone is sold out.
    pub async fn purchase_ticket(
        &self,
        caller: &Identity,
        event_id: EventId,
        zone_id: ZoneId,
    ) -> Result<Ticket, RaffleError> {
        let outcome = self
            .dispatch(EventCommand::PurchaseTicket {
                event_id,
                zone_id,
                user_id: caller.user_id,
                ticket_id: TicketId::new(),
            })
            .await?;

        outcome
            .events
            .into_iter()
            .find_map(|event| match event {
                RaffleEvent::TicketIssued { ticket } => Some(ticket),
                _ => None,
            })
            .ok_or_else(|| RaffleError::Storage("purchase committed without a ticket".to_string()))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Current state of an event.
    ///
    /// # Errors
    ///
    /// `NotFound` if the event does not exist.
    pub async fn event(&self, event_id: EventId) -> Result<Event, RaffleError> {
        self.events
            .state(event_id)
            .await?
            .event
            .ok_or(RaffleError::NotFound(Resource::Event(event_id)))
    }

    /// Zones of an event, ordered by id.
    ///
    /// # Errors
    ///
    /// `NotFound` if the event does not exist.
    pub async fn zones(&self, event_id: EventId) -> Result<Vec<Zone>, RaffleError> {
        Ok(self.event(event_id).await?.zones.into_values().collect())
    }

    /// Winners of a zone across all rounds.
    ///
    /// # Errors
    ///
    /// `NotFound` if the event or zone does not exist.
    pub async fn winners(
        &self,
        event_id: EventId,
        zone_id: ZoneId,
    ) -> Result<Vec<UserId>, RaffleError> {
        let event = self.event(event_id).await?;
        let zone = event
            .zone(&zone_id)
            .ok_or(RaffleError::NotFound(Resource::Zone(zone_id)))?;
        Ok(zone.winners.iter().copied().collect())
    }

    /// The caller's registrations, wins and tickets
    pub async fn user_history(&self, caller: &Identity) -> UserHistory {
        self.user_history.read().await.history(&caller.user_id)
    }

    /// Executes a command, then feeds its events to the projections
    async fn dispatch(&self, command: EventCommand) -> Result<CommandOutcome, RaffleError> {
        let event_id = command.event_id();
        let outcome = self.events.execute(command).await?;
        self.project(event_id, &outcome).await;
        Ok(outcome)
    }

    /// Applies a committed outcome to the user history in stream order
    async fn project(&self, event_id: EventId, outcome: &CommandOutcome) {
        let committed = u64::try_from(outcome.events.len()).unwrap_or(u64::MAX);
        let from = Version::new(outcome.version.value().saturating_sub(committed));

        let mut projection = self.user_history.write().await;
        let applied = match projection.apply_stream(event_id, from, &outcome.events) {
            Ok(true) => Ok(()),
            Ok(false) => self.catch_up(&mut projection, event_id).await,
            Err(error) => Err(RaffleError::Storage(error)),
        };
        if let Err(error) = applied {
            warn!(projection = projection.name(), %event_id, %error, "Projection update failed");
        }
    }

    /// Reads the events the projection has not seen yet from the store
    async fn catch_up(
        &self,
        projection: &mut UserHistoryProjection,
        event_id: EventId,
    ) -> Result<(), RaffleError> {
        let from = projection.position(&event_id);
        let events = self.events.events_since(event_id, from).await?;
        // Each failed pass moves the position past the offending event
        while let Err(error) = projection.apply_stream(event_id, from, &events) {
            warn!(projection = projection.name(), %event_id, %error, "Skipped unprojectable event");
        }
        Ok(())
    }
}

fn require_operator(caller: &Identity) -> Result<(), RaffleError> {
    if caller.is_operator() {
        Ok(())
    } else {
        Err(RaffleError::Forbidden(format!(
            "user {} is not an operator",
            caller.user_id
        )))
    }
}
