//! Aggregates.
//!
//! A single aggregate, the [`event`] Event, owns its zones. Its commands are split by
//! concern across the submodules; all of them share one reducer and one stream.

pub mod event;
pub mod issuance;
pub mod raffle;
pub mod registration;

pub use event::{
    EventCommand, EventEnvironment, EventReducer, MAX_EVENT_NAME_LEN, RaffleEvent, ZoneDraw,
};
pub use raffle::draw_zone;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod fixtures {
    use super::{EventEnvironment, RaffleEvent};
    use crate::environment::SeededSampler;
    use crate::testing::test_clock;
    use crate::types::{Capacity, EventId, Money, RegistrationScope, UserId, Venue, ZoneId};
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;

    pub fn event_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 20, 0, 0).unwrap()
    }

    pub fn test_env() -> EventEnvironment {
        test_env_with_scope(RegistrationScope::PerZone)
    }

    pub fn test_env_with_scope(scope: RegistrationScope) -> EventEnvironment {
        EventEnvironment::new(Arc::new(test_clock()), Arc::new(SeededSampler::new(42)), scope)
    }

    pub fn created(event_id: EventId, venue_capacity: u32) -> RaffleEvent {
        RaffleEvent::EventCreated {
            id: event_id,
            name: "Summer Festival".to_string(),
            dates: vec![event_date()],
            venue: Venue::new("Arena".to_string(), Capacity::new(venue_capacity)),
            open_registration: true,
            created_at: event_date(),
        }
    }

    pub fn zone_added(event_id: EventId, zone_id: ZoneId, capacity: u32) -> RaffleEvent {
        RaffleEvent::ZoneAdded {
            event_id,
            zone_id,
            name: "Floor".to_string(),
            capacity: Capacity::new(capacity),
            performance_date: event_date(),
            ticket_price: Money::from_cents(5_000),
            added_at: event_date(),
        }
    }

    pub fn registered(event_id: EventId, zone_id: ZoneId, user_id: UserId) -> RaffleEvent {
        RaffleEvent::UserRegistered {
            event_id,
            zone_id,
            user_id,
            registered_at: event_date(),
        }
    }

    pub fn closed(event_id: EventId) -> RaffleEvent {
        RaffleEvent::RegistrationClosed {
            event_id,
            closed_at: event_date(),
        }
    }

    pub fn opened(event_id: EventId) -> RaffleEvent {
        RaffleEvent::RegistrationOpened {
            event_id,
            opened_at: event_date(),
        }
    }
}
