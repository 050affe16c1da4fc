//! Domain types for the zone raffle.
//!
//! Value objects (identifiers, money, capacity), the `Event` aggregate root with its
//! owned `Zone` entities, and issued `Ticket`s.
//!
//! Membership collections are ordered sets keyed by `UserId`: folding the same
//! stream always yields the same iteration order, and every duplicate check is a
//! set lookup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Creates a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an event
    EventId
);
uuid_id!(
    /// Unique identifier for a zone within an event
    ZoneId
);
uuid_id!(
    /// Stable identity of a user, as returned by the identity resolver
    UserId
);
uuid_id!(
    /// Unique identifier for an issued ticket
    TicketId
);

// ============================================================================
// Value Objects
// ============================================================================

/// Money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from whole currency units, `None` on overflow
    #[must_use]
    pub const fn checked_from_units(units: u64) -> Option<Self> {
        match units.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts two amounts (`None` if the result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self(self.0 - other.0))
        } else {
            None
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Seat capacity of a venue or a zone
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Capacity(u32);

impl Capacity {
    /// Creates a new `Capacity`
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the capacity value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Venue hosting an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    /// Venue name
    pub name: String,
    /// Total seats across all zones
    pub capacity: Capacity,
}

impl Venue {
    /// Creates a new `Venue`
    #[must_use]
    pub const fn new(name: String, capacity: Capacity) -> Self {
        Self { name, capacity }
    }
}

/// Position of an event in the registration/raffle state machine.
///
/// ```text
/// Open ──close──> Closed ──raffle──> Raffled
///  ^                │                   │
///  └─────open───────┴───────open────────┘
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPhase {
    /// Pre-registration is accepted
    Open,
    /// Pre-registration is closed, the raffle has not been drawn for this cycle
    Closed,
    /// The raffle for the current cycle has been drawn
    Raffled,
}

impl fmt::Display for EventPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Raffled => "raffled",
        };
        f.write_str(label)
    }
}

/// Scope of the "already registered" check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationScope {
    /// One registration per user per zone
    #[default]
    PerZone,
    /// One registration per user per event, whichever zone it targets
    PerEvent,
}

impl FromStr for RegistrationScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zone" | "per_zone" | "per-zone" => Ok(Self::PerZone),
            "event" | "per_event" | "per-event" => Ok(Self::PerEvent),
            other => Err(format!("unknown registration scope '{other}'")),
        }
    }
}

// ============================================================================
// Domain Entities
// ============================================================================

/// A ticket issued to a raffle winner. Immutable once issued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier
    pub id: TicketId,
    /// Event the zone belongs to
    pub event_id: EventId,
    /// Zone the ticket admits to
    pub zone_id: ZoneId,
    /// Ticket holder
    pub holder: UserId,
    /// Price copied from the zone at issuance time
    pub price: Money,
    /// When the ticket was issued
    pub issued_at: DateTime<Utc>,
}

/// A capacity-bounded performance slot within an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    /// Zone identifier
    pub id: ZoneId,
    /// Zone name (e.g., "Floor A")
    pub name: String,
    /// Number of seats
    pub capacity: Capacity,
    /// Performance date, one of the owning event's dates
    pub performance_date: DateTime<Utc>,
    /// Ticket price
    pub ticket_price: Money,
    /// Tickets not yet issued
    pub remaining_tickets: u32,
    /// Users waiting for the next draw
    pub candidate_pool: BTreeSet<UserId>,
    /// Users who took part in a draw and were not selected
    pub not_selected: BTreeSet<UserId>,
    /// Users selected by a draw
    pub winners: BTreeSet<UserId>,
    /// Issued tickets keyed by holder
    pub tickets: BTreeMap<UserId, Ticket>,
}

impl Zone {
    /// Creates a new zone with `remaining_tickets` initialized to capacity
    #[must_use]
    pub const fn new(
        id: ZoneId,
        name: String,
        capacity: Capacity,
        performance_date: DateTime<Utc>,
        ticket_price: Money,
    ) -> Self {
        Self {
            id,
            name,
            capacity,
            performance_date,
            ticket_price,
            remaining_tickets: capacity.value(),
            candidate_pool: BTreeSet::new(),
            not_selected: BTreeSet::new(),
            winners: BTreeSet::new(),
            tickets: BTreeMap::new(),
        }
    }

    /// Whether the user has ever registered for this zone
    #[must_use]
    pub fn has_registrant(&self, user: &UserId) -> bool {
        self.candidate_pool.contains(user)
            || self.not_selected.contains(user)
            || self.winners.contains(user)
    }

    /// Whether the user was selected by a draw
    #[must_use]
    pub fn is_winner(&self, user: &UserId) -> bool {
        self.winners.contains(user)
    }

    /// The ticket held by the user, if any
    #[must_use]
    pub fn ticket_for(&self, user: &UserId) -> Option<&Ticket> {
        self.tickets.get(user)
    }

    /// Winner slots still free: `capacity - |winners|`
    #[must_use]
    pub fn free_winner_slots(&self) -> usize {
        (self.capacity.value() as usize).saturating_sub(self.winners.len())
    }

    /// Number of tickets issued so far
    #[must_use]
    pub fn issued(&self) -> usize {
        self.tickets.len()
    }
}

/// Event aggregate root: a scheduled show with raffled zones.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier
    pub id: EventId,
    /// Event name
    pub name: String,
    /// Scheduled performance dates
    pub dates: Vec<DateTime<Utc>>,
    /// Venue information
    pub venue: Venue,
    /// Registration/raffle phase
    pub phase: EventPhase,
    /// Number of raffles drawn (0 = never raffled)
    pub raffle_round: u32,
    /// Owned zones
    pub zones: BTreeMap<ZoneId, Zone>,
    /// Users pre-registered at the event scope
    pub registrants: BTreeSet<UserId>,
    /// When the event was created
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Creates a new event without zones
    #[must_use]
    pub const fn new(
        id: EventId,
        name: String,
        dates: Vec<DateTime<Utc>>,
        venue: Venue,
        open: bool,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            dates,
            venue,
            phase: if open { EventPhase::Open } else { EventPhase::Closed },
            raffle_round: 0,
            zones: BTreeMap::new(),
            registrants: BTreeSet::new(),
            created_at,
        }
    }

    /// Whether pre-registration is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.phase == EventPhase::Open
    }

    /// Looks up an owned zone
    #[must_use]
    pub fn zone(&self, zone_id: &ZoneId) -> Option<&Zone> {
        self.zones.get(zone_id)
    }

    /// Sum of all zone capacities
    #[must_use]
    pub fn allocated_capacity(&self) -> u64 {
        self.zones
            .values()
            .map(|zone| u64::from(zone.capacity.value()))
            .sum()
    }
}

/// State of one event stream.
///
/// `event` is `None` before creation and after deletion; `deleted` keeps a deleted
/// stream from being recreated. Serializable so it can be stored as a snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventState {
    /// The aggregate, if it exists
    pub event: Option<Event>,
    /// Whether the event was deleted
    pub deleted: bool,
}

impl EventState {
    /// Creates an empty state
    #[must_use]
    pub const fn new() -> Self {
        Self {
            event: None,
            deleted: false,
        }
    }

    /// Creates a state holding an existing event
    #[must_use]
    pub const fn with_event(event: Event) -> Self {
        Self {
            event: Some(event),
            deleted: false,
        }
    }

    /// Returns the live event, if any
    #[must_use]
    pub const fn get(&self) -> Option<&Event> {
        self.event.as_ref()
    }
}
