//! Pre-registration into a zone's candidate pool.
//!
//! No capacity check happens here: the pool may grow past the zone's capacity.
//! Capacity is enforced by the draw.

use super::event::{EventEnvironment, EventReducer, RaffleEvent};
use crate::error::{Conflict, RaffleError};
use crate::reducer::Events;
use crate::types::{Event, EventId, EventState, RegistrationScope, UserId, Zone, ZoneId};
use chrono::{DateTime, Utc};
use smallvec::smallvec;

impl EventReducer {
    /// Decides `Register`.
    ///
    /// Checks run in order: event exists, zone exists, registration open, user not
    /// yet registered in the configured scope.
    pub(super) fn decide_register(
        state: &EventState,
        event_id: EventId,
        zone_id: ZoneId,
        user_id: UserId,
        env: &EventEnvironment,
        now: DateTime<Utc>,
    ) -> Result<Events<RaffleEvent>, RaffleError> {
        let event = Self::require_event(state, &event_id)?;
        let zone = Self::require_zone(event, &zone_id)?;

        if !event.is_open() {
            return Err(RaffleError::StateConflict(Conflict::EventClosed));
        }
        if already_registered(event, zone, &user_id, env.registration_scope) {
            return Err(RaffleError::StateConflict(Conflict::AlreadyRegistered));
        }

        Ok(smallvec![RaffleEvent::UserRegistered {
            event_id,
            zone_id,
            user_id,
            registered_at: now,
        }])
    }
}

fn already_registered(event: &Event, zone: &Zone, user: &UserId, scope: RegistrationScope) -> bool {
    match scope {
        RegistrationScope::PerZone => zone.has_registrant(user),
        RegistrationScope::PerEvent => event.registrants.contains(user),
    }
}
