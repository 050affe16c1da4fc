//! Event aggregate: lifecycle, commands and domain events.
//!
//! One `Event` is one stream. Every command that touches an event or one of its
//! zones (lifecycle, registration, raffle, ticket issuance) is decided against the
//! folded state of that stream, which makes the stream version the serialization
//! point for all of them.
//!
//! Registration, the draw and issuance are decided in the sibling modules
//! [`registration`](super::registration), [`raffle`](super::raffle) and
//! [`issuance`](super::issuance); this module keeps the lifecycle commands and the
//! event fold.

use crate::environment::{Clock, WinnerSampler};
use crate::error::{Conflict, RaffleError, Resource};
use crate::event_store::DomainEvent;
use crate::reducer::{Events, Reducer};
use crate::types::{
    Capacity, Event, EventId, EventPhase, EventState, Money, RegistrationScope, Ticket, TicketId,
    UserId, Venue, Zone, ZoneId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use std::sync::Arc;

/// Maximum event name length, in characters
pub const MAX_EVENT_NAME_LEN: usize = 200;

// ============================================================================
// Commands
// ============================================================================

/// Commands accepted by the Event aggregate
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventCommand {
    /// Create a new event
    CreateEvent {
        /// Event identifier
        id: EventId,
        /// Event name
        name: String,
        /// Scheduled performance dates
        dates: Vec<DateTime<Utc>>,
        /// Venue information
        venue: Venue,
        /// Whether pre-registration starts open
        open_registration: bool,
    },

    /// Add a zone to an event
    AddZone {
        /// Owning event
        event_id: EventId,
        /// New zone identifier
        zone_id: ZoneId,
        /// Zone name
        name: String,
        /// Seats in the zone
        capacity: Capacity,
        /// One of the event's dates
        performance_date: DateTime<Utc>,
        /// Ticket price
        ticket_price: Money,
    },

    /// Remove a zone that has no winners and no tickets
    RemoveZone {
        /// Owning event
        event_id: EventId,
        /// Zone to remove
        zone_id: ZoneId,
    },

    /// Open pre-registration
    OpenRegistration {
        /// Event to open
        event_id: EventId,
    },

    /// Close pre-registration
    CloseRegistration {
        /// Event to close
        event_id: EventId,
    },

    /// Delete an event with its zones and tickets
    DeleteEvent {
        /// Event to delete
        event_id: EventId,
    },

    /// Pre-register a user for a zone
    Register {
        /// Event
        event_id: EventId,
        /// Zone
        zone_id: ZoneId,
        /// Registering user
        user_id: UserId,
    },

    /// Draw winners for every zone of the event
    DrawRaffle {
        /// Event to raffle
        event_id: EventId,
    },

    /// Issue a ticket to a winner
    PurchaseTicket {
        /// Event
        event_id: EventId,
        /// Zone
        zone_id: ZoneId,
        /// Buyer
        user_id: UserId,
        /// Identifier for the new ticket
        ticket_id: TicketId,
    },

    /// Administrative removal of an issued ticket
    RevokeTicket {
        /// Event
        event_id: EventId,
        /// Zone
        zone_id: ZoneId,
        /// Ticket holder
        user_id: UserId,
    },
}

impl EventCommand {
    /// The event the command targets
    #[must_use]
    pub const fn event_id(&self) -> EventId {
        match self {
            Self::CreateEvent { id, .. } => *id,
            Self::AddZone { event_id, .. }
            | Self::RemoveZone { event_id, .. }
            | Self::OpenRegistration { event_id }
            | Self::CloseRegistration { event_id }
            | Self::DeleteEvent { event_id }
            | Self::Register { event_id, .. }
            | Self::DrawRaffle { event_id }
            | Self::PurchaseTicket { event_id, .. }
            | Self::RevokeTicket { event_id, .. } => *event_id,
        }
    }

    /// Short name for logs and spans
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateEvent { .. } => "create_event",
            Self::AddZone { .. } => "add_zone",
            Self::RemoveZone { .. } => "remove_zone",
            Self::OpenRegistration { .. } => "open_registration",
            Self::CloseRegistration { .. } => "close_registration",
            Self::DeleteEvent { .. } => "delete_event",
            Self::Register { .. } => "register",
            Self::DrawRaffle { .. } => "raffle",
            Self::PurchaseTicket { .. } => "purchase_ticket",
            Self::RevokeTicket { .. } => "revoke_ticket",
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Outcome of the draw for one zone
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneDraw {
    /// Zone drawn
    pub zone_id: ZoneId,
    /// Users selected in this round
    pub winners: Vec<UserId>,
    /// Pool members not selected in this round
    pub not_selected: Vec<UserId>,
}

/// Domain events of the Event aggregate
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaffleEvent {
    /// Event was created
    EventCreated {
        /// Event identifier
        id: EventId,
        /// Event name
        name: String,
        /// Scheduled performance dates
        dates: Vec<DateTime<Utc>>,
        /// Venue information
        venue: Venue,
        /// Whether pre-registration started open
        open_registration: bool,
        /// When the event was created
        created_at: DateTime<Utc>,
    },

    /// Zone was added
    ZoneAdded {
        /// Owning event
        event_id: EventId,
        /// Zone identifier
        zone_id: ZoneId,
        /// Zone name
        name: String,
        /// Seats
        capacity: Capacity,
        /// Performance date
        performance_date: DateTime<Utc>,
        /// Ticket price
        ticket_price: Money,
        /// When the zone was added
        added_at: DateTime<Utc>,
    },

    /// Zone was removed
    ZoneRemoved {
        /// Owning event
        event_id: EventId,
        /// Removed zone
        zone_id: ZoneId,
        /// When removed
        removed_at: DateTime<Utc>,
    },

    /// Pre-registration opened
    RegistrationOpened {
        /// Event
        event_id: EventId,
        /// When opened
        opened_at: DateTime<Utc>,
    },

    /// Pre-registration closed
    RegistrationClosed {
        /// Event
        event_id: EventId,
        /// When closed
        closed_at: DateTime<Utc>,
    },

    /// User entered a zone's candidate pool
    UserRegistered {
        /// Event
        event_id: EventId,
        /// Zone
        zone_id: ZoneId,
        /// Registered user
        user_id: UserId,
        /// When registered
        registered_at: DateTime<Utc>,
    },

    /// Raffle drawn for every zone of the event
    RaffleDrawn {
        /// Event
        event_id: EventId,
        /// Round number after this draw (1 for the first raffle)
        round: u32,
        /// Per-zone results
        draws: Vec<ZoneDraw>,
        /// When drawn
        drawn_at: DateTime<Utc>,
    },

    /// Ticket issued to a winner; decrements the zone's remaining tickets
    TicketIssued {
        /// The new ticket
        ticket: Ticket,
    },

    /// Ticket revoked; restores one remaining ticket
    TicketRevoked {
        /// Event
        event_id: EventId,
        /// Zone
        zone_id: ZoneId,
        /// Former holder
        user_id: UserId,
        /// Revoked ticket
        ticket_id: TicketId,
        /// When revoked
        revoked_at: DateTime<Utc>,
    },

    /// Event deleted with everything it owns
    EventDeleted {
        /// Event
        event_id: EventId,
        /// When deleted
        deleted_at: DateTime<Utc>,
    },
}

impl DomainEvent for RaffleEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::EventCreated { .. } => "EventCreated.v1",
            Self::ZoneAdded { .. } => "ZoneAdded.v1",
            Self::ZoneRemoved { .. } => "ZoneRemoved.v1",
            Self::RegistrationOpened { .. } => "RegistrationOpened.v1",
            Self::RegistrationClosed { .. } => "RegistrationClosed.v1",
            Self::UserRegistered { .. } => "UserRegistered.v1",
            Self::RaffleDrawn { .. } => "RaffleDrawn.v1",
            Self::TicketIssued { .. } => "TicketIssued.v1",
            Self::TicketRevoked { .. } => "TicketRevoked.v1",
            Self::EventDeleted { .. } => "EventDeleted.v1",
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Environment dependencies for the Event aggregate
#[derive(Clone)]
pub struct EventEnvironment {
    /// Clock for timestamps
    pub clock: Arc<dyn Clock>,
    /// Uniform subset sampler for the draw
    pub sampler: Arc<dyn WinnerSampler>,
    /// Scope of the duplicate-registration check
    pub registration_scope: RegistrationScope,
}

impl EventEnvironment {
    /// Creates a new `EventEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        sampler: Arc<dyn WinnerSampler>,
        registration_scope: RegistrationScope,
    ) -> Self {
        Self {
            clock,
            sampler,
            registration_scope,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the Event aggregate
#[derive(Clone, Copy, Debug, Default)]
pub struct EventReducer;

impl EventReducer {
    /// Creates a new `EventReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// The live event with id `event_id`, or `NotFound`
    pub(super) fn require_event<'a>(
        state: &'a EventState,
        event_id: &EventId,
    ) -> Result<&'a Event, RaffleError> {
        state
            .get()
            .filter(|event| event.id == *event_id)
            .ok_or(RaffleError::NotFound(Resource::Event(*event_id)))
    }

    /// A zone owned by `event`, or `NotFound`
    pub(super) fn require_zone<'a>(
        event: &'a Event,
        zone_id: &ZoneId,
    ) -> Result<&'a Zone, RaffleError> {
        event
            .zone(zone_id)
            .ok_or(RaffleError::NotFound(Resource::Zone(*zone_id)))
    }

    /// Validates `CreateEvent`
    fn validate_create_event(
        state: &EventState,
        id: &EventId,
        name: &str,
        dates: &[DateTime<Utc>],
        venue: &Venue,
    ) -> Result<(), RaffleError> {
        if state.deleted {
            return Err(RaffleError::Validation(format!(
                "event {id} was deleted and cannot be recreated"
            )));
        }
        if state.event.is_some() {
            return Err(RaffleError::Validation(format!("event {id} already exists")));
        }

        let name_len = name.trim().chars().count();
        if name_len == 0 {
            return Err(RaffleError::Validation("event name cannot be empty".to_string()));
        }
        if name_len > MAX_EVENT_NAME_LEN {
            return Err(RaffleError::Validation(format!(
                "event name too long: {name_len} characters (max {MAX_EVENT_NAME_LEN})"
            )));
        }
        if dates.is_empty() {
            return Err(RaffleError::Validation(
                "an event needs at least one date".to_string(),
            ));
        }
        if venue.name.trim().is_empty() {
            return Err(RaffleError::Validation("venue name cannot be empty".to_string()));
        }
        if venue.capacity.value() == 0 {
            return Err(RaffleError::Validation(
                "venue capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Validates `AddZone`
    fn validate_add_zone(
        event: &Event,
        zone_id: &ZoneId,
        name: &str,
        capacity: Capacity,
        performance_date: &DateTime<Utc>,
    ) -> Result<(), RaffleError> {
        if event.phase == EventPhase::Raffled {
            return Err(RaffleError::StateConflict(Conflict::ZonesLocked));
        }
        if event.zones.contains_key(zone_id) {
            return Err(RaffleError::Validation(format!("zone {zone_id} already exists")));
        }
        if name.trim().is_empty() {
            return Err(RaffleError::Validation("zone name cannot be empty".to_string()));
        }
        if capacity.value() == 0 {
            return Err(RaffleError::Validation(
                "zone capacity must be greater than zero".to_string(),
            ));
        }
        if !event.dates.contains(performance_date) {
            return Err(RaffleError::Validation(format!(
                "performance date {performance_date} is not one of the event's dates"
            )));
        }

        let allocated = event.allocated_capacity() + u64::from(capacity.value());
        let venue_capacity = u64::from(event.venue.capacity.value());
        if allocated > venue_capacity {
            return Err(RaffleError::Validation(format!(
                "zones would hold {allocated} seats, venue holds {venue_capacity}"
            )));
        }

        Ok(())
    }

    fn decide_lifecycle(
        state: &EventState,
        command: EventCommand,
        now: DateTime<Utc>,
    ) -> Result<Events<RaffleEvent>, RaffleError> {
        let event = match command {
            EventCommand::CreateEvent {
                id,
                name,
                dates,
                venue,
                open_registration,
            } => {
                Self::validate_create_event(state, &id, &name, &dates, &venue)?;
                RaffleEvent::EventCreated {
                    id,
                    name: name.trim().to_string(),
                    dates,
                    venue,
                    open_registration,
                    created_at: now,
                }
            }

            EventCommand::AddZone {
                event_id,
                zone_id,
                name,
                capacity,
                performance_date,
                ticket_price,
            } => {
                let event = Self::require_event(state, &event_id)?;
                Self::validate_add_zone(event, &zone_id, &name, capacity, &performance_date)?;
                RaffleEvent::ZoneAdded {
                    event_id,
                    zone_id,
                    name: name.trim().to_string(),
                    capacity,
                    performance_date,
                    ticket_price,
                    added_at: now,
                }
            }

            EventCommand::RemoveZone { event_id, zone_id } => {
                let event = Self::require_event(state, &event_id)?;
                let zone = Self::require_zone(event, &zone_id)?;
                if !zone.winners.is_empty() || !zone.tickets.is_empty() {
                    return Err(RaffleError::StateConflict(Conflict::ZoneInUse));
                }
                RaffleEvent::ZoneRemoved {
                    event_id,
                    zone_id,
                    removed_at: now,
                }
            }

            EventCommand::OpenRegistration { event_id } => {
                let event = Self::require_event(state, &event_id)?;
                if event.is_open() {
                    return Err(RaffleError::StateConflict(Conflict::InvalidTransition {
                        from: event.phase,
                        to: EventPhase::Open,
                    }));
                }
                RaffleEvent::RegistrationOpened {
                    event_id,
                    opened_at: now,
                }
            }

            EventCommand::CloseRegistration { event_id } => {
                let event = Self::require_event(state, &event_id)?;
                if !event.is_open() {
                    return Err(RaffleError::StateConflict(Conflict::InvalidTransition {
                        from: event.phase,
                        to: EventPhase::Closed,
                    }));
                }
                RaffleEvent::RegistrationClosed {
                    event_id,
                    closed_at: now,
                }
            }

            EventCommand::DeleteEvent { event_id } => {
                Self::require_event(state, &event_id)?;
                RaffleEvent::EventDeleted {
                    event_id,
                    deleted_at: now,
                }
            }

            EventCommand::Register { .. }
            | EventCommand::DrawRaffle { .. }
            | EventCommand::PurchaseTicket { .. }
            | EventCommand::RevokeTicket { .. } => {
                return Err(RaffleError::Validation(format!(
                    "{} is not a lifecycle command",
                    command.name()
                )));
            }
        };

        Ok(smallvec![event])
    }

    /// Applies an event to state
    fn apply_event(state: &mut EventState, event: &RaffleEvent) {
        if let RaffleEvent::EventCreated {
            id,
            name,
            dates,
            venue,
            open_registration,
            created_at,
        } = event
        {
            state.event = Some(Event::new(
                *id,
                name.clone(),
                dates.clone(),
                venue.clone(),
                *open_registration,
                *created_at,
            ));
            state.deleted = false;
            return;
        }
        if let RaffleEvent::EventDeleted { .. } = event {
            state.event = None;
            state.deleted = true;
            return;
        }

        let Some(current) = state.event.as_mut() else {
            return;
        };

        match event {
            RaffleEvent::ZoneAdded {
                zone_id,
                name,
                capacity,
                performance_date,
                ticket_price,
                ..
            } => {
                current.zones.insert(
                    *zone_id,
                    Zone::new(*zone_id, name.clone(), *capacity, *performance_date, *ticket_price),
                );
            }
            RaffleEvent::ZoneRemoved { zone_id, .. } => {
                if let Some(zone) = current.zones.remove(zone_id) {
                    for user in zone.candidate_pool.iter().chain(&zone.not_selected) {
                        if !current.zones.values().any(|other| other.has_registrant(user)) {
                            current.registrants.remove(user);
                        }
                    }
                }
            }
            RaffleEvent::RegistrationOpened { .. } => current.phase = EventPhase::Open,
            RaffleEvent::RegistrationClosed { .. } => current.phase = EventPhase::Closed,
            RaffleEvent::UserRegistered {
                zone_id, user_id, ..
            } => {
                if let Some(zone) = current.zones.get_mut(zone_id) {
                    zone.candidate_pool.insert(*user_id);
                }
                current.registrants.insert(*user_id);
            }
            RaffleEvent::RaffleDrawn { round, draws, .. } => {
                for draw in draws {
                    if let Some(zone) = current.zones.get_mut(&draw.zone_id) {
                        for user in draw.winners.iter().chain(&draw.not_selected) {
                            zone.candidate_pool.remove(user);
                        }
                        zone.winners.extend(draw.winners.iter().copied());
                        zone.not_selected.extend(draw.not_selected.iter().copied());
                    }
                }
                current.raffle_round = *round;
                current.phase = EventPhase::Raffled;
            }
            RaffleEvent::TicketIssued { ticket } => {
                if let Some(zone) = current.zones.get_mut(&ticket.zone_id) {
                    zone.remaining_tickets = zone.remaining_tickets.saturating_sub(1);
                    zone.tickets.insert(ticket.holder, ticket.clone());
                }
            }
            RaffleEvent::TicketRevoked {
                zone_id, user_id, ..
            } => {
                if let Some(zone) = current.zones.get_mut(zone_id) {
                    if zone.tickets.remove(user_id).is_some() {
                        zone.remaining_tickets =
                            (zone.remaining_tickets + 1).min(zone.capacity.value());
                    }
                }
            }
            RaffleEvent::EventCreated { .. } | RaffleEvent::EventDeleted { .. } => {}
        }
    }
}

impl Reducer for EventReducer {
    type State = EventState;
    type Command = EventCommand;
    type Event = RaffleEvent;
    type Environment = EventEnvironment;

    fn decide(
        &self,
        state: &Self::State,
        command: Self::Command,
        env: &Self::Environment,
    ) -> Result<Events<Self::Event>, RaffleError> {
        let now = env.clock.now();
        match command {
            EventCommand::Register {
                event_id,
                zone_id,
                user_id,
            } => Self::decide_register(state, event_id, zone_id, user_id, env, now),
            EventCommand::DrawRaffle { event_id } => Self::decide_raffle(state, event_id, env, now),
            EventCommand::PurchaseTicket {
                event_id,
                zone_id,
                user_id,
                ticket_id,
            } => Self::decide_purchase(state, event_id, zone_id, user_id, ticket_id, now),
            EventCommand::RevokeTicket {
                event_id,
                zone_id,
                user_id,
            } => Self::decide_revoke(state, event_id, zone_id, user_id, now),
            lifecycle => Self::decide_lifecycle(state, lifecycle, now),
        }
    }

    fn apply(&self, state: &mut Self::State, event: &Self::Event) {
        Self::apply_event(state, event);
    }
}
