//! Error taxonomy for raffle operations.
//!
//! Every business precondition maps to exactly one variant:
//!
//! | Kind | Meaning |
//! |---|---|
//! | [`RaffleError::NotFound`] | event, zone or user absent |
//! | [`RaffleError::StateConflict`] | a business rule refused the operation |
//! | [`RaffleError::TransientConflict`] | storage contention outlasted the retry budget |
//!
//! Business-rule errors are never retried by the core. Only `TransientConflict` is
//! worth retrying by the caller.

use crate::event_store::EventStoreError;
use crate::types::{EventId, EventPhase, UserId, ZoneId};
use std::fmt;
use thiserror::Error;

/// A missing resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resource {
    /// Event that does not exist (or was deleted)
    Event(EventId),
    /// Zone absent under its event
    Zone(ZoneId),
    /// User unknown to the identity resolver
    User(UserId),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(id) => write!(f, "event {id}"),
            Self::Zone(id) => write!(f, "zone {id}"),
            Self::User(id) => write!(f, "user {id}"),
        }
    }
}

/// Reason a business rule refused an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Conflict {
    /// Registration attempted while pre-registration is closed
    EventClosed,
    /// The user is already registered in the configured scope
    AlreadyRegistered,
    /// Raffle attempted while pre-registration is still open
    RegistrationOpen,
    /// The raffle for the current registration cycle was already drawn
    AlreadyRaffled,
    /// The caller is not a winner, or already holds a ticket for the zone
    TicketUnavailable,
    /// No tickets remain in the zone
    SoldOut,
    /// Lifecycle command not allowed in the current phase
    InvalidTransition {
        /// Phase the event is in
        from: EventPhase,
        /// Phase the command tried to reach
        to: EventPhase,
    },
    /// Zones cannot be changed once the draw for the cycle happened
    ZonesLocked,
    /// The zone already has winners or issued tickets
    ZoneInUse,
    /// No ticket to revoke for this user
    NoTicket,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EventClosed => f.write_str("pre-registration is closed"),
            Self::AlreadyRegistered => f.write_str("user is already registered"),
            Self::RegistrationOpen => {
                f.write_str("pre-registration must be closed before the raffle")
            }
            Self::AlreadyRaffled => f.write_str("raffle already drawn for this registration cycle"),
            Self::TicketUnavailable => f.write_str("no ticket available for this user"),
            Self::SoldOut => f.write_str("zone is sold out"),
            Self::InvalidTransition { from, to } => {
                write!(f, "cannot move event from {from} to {to}")
            }
            Self::ZonesLocked => f.write_str("zones cannot change after the raffle"),
            Self::ZoneInUse => f.write_str("zone already has winners or tickets"),
            Self::NoTicket => f.write_str("user holds no ticket for this zone"),
        }
    }
}

/// Errors returned by raffle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RaffleError {
    /// Event, zone or user absent
    #[error("{0} not found")]
    NotFound(Resource),

    /// A business rule refused the operation
    #[error("state conflict: {0}")]
    StateConflict(Conflict),

    /// Concurrent writers kept winning the append race
    #[error("transient conflict on event {event_id} after {attempts} attempts")]
    TransientConflict {
        /// Contended aggregate
        event_id: EventId,
        /// Attempts made before giving up
        attempts: usize,
    },

    /// Malformed operator input (names, capacities, dates)
    #[error("validation failed: {0}")]
    Validation(String),

    /// The credential could not be resolved
    #[error("authentication failed: {0}")]
    Unauthenticated(String),

    /// The caller lacks the role the operation requires
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Backend failure unrelated to contention
    #[error("storage error: {0}")]
    Storage(String),
}

impl RaffleError {
    /// Short machine-readable label, used for metrics and HTTP bodies
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::StateConflict(_) => "state_conflict",
            Self::TransientConflict { .. } => "transient_conflict",
            Self::Validation(_) => "validation",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::Storage(_) => "storage",
        }
    }

    /// Whether a caller may transparently retry
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientConflict { .. })
    }
}

impl From<EventStoreError> for RaffleError {
    fn from(error: EventStoreError) -> Self {
        Self::Storage(error.to_string())
    }
}
