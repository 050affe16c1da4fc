//! The raffle draw.
//!
//! Each zone draws `min(free winner slots, |pool|)` distinct winners uniformly from
//! its candidate pool. The draw for every zone of the event lands in one
//! `RaffleDrawn` event, so a replay never samples again.
//!
//! A later round (after re-opening registration) draws only from users who joined
//! the pool since the previous draw, into `capacity - |winners|` slots. Users not
//! selected before stay out of every later draw for that zone.

use super::event::{EventEnvironment, EventReducer, RaffleEvent, ZoneDraw};
use crate::environment::WinnerSampler;
use crate::error::{Conflict, RaffleError};
use crate::reducer::Events;
use crate::types::{EventId, EventPhase, EventState, UserId, Zone};
use chrono::{DateTime, Utc};
use smallvec::smallvec;
use std::collections::BTreeSet;

/// Draws winners for one zone.
///
/// Never selects more than the zone's free winner slots, and never returns a user
/// twice, whatever the sampler yields.
#[must_use]
pub fn draw_zone(zone: &Zone, sampler: &dyn WinnerSampler) -> ZoneDraw {
    let pool: Vec<UserId> = zone.candidate_pool.iter().copied().collect();
    let seats = zone.free_winner_slots().min(pool.len());

    let mut winners = BTreeSet::new();
    for index in sampler.sample_indices(pool.len(), seats) {
        if winners.len() == seats {
            break;
        }
        if let Some(user) = pool.get(index) {
            winners.insert(*user);
        }
    }

    let not_selected = pool
        .iter()
        .filter(|user| !winners.contains(*user))
        .copied()
        .collect();

    ZoneDraw {
        zone_id: zone.id,
        winners: winners.into_iter().collect(),
        not_selected,
    }
}

impl EventReducer {
    /// Decides `DrawRaffle`: only a closed, not yet drawn cycle can be raffled
    pub(super) fn decide_raffle(
        state: &EventState,
        event_id: EventId,
        env: &EventEnvironment,
        now: DateTime<Utc>,
    ) -> Result<Events<RaffleEvent>, RaffleError> {
        let event = Self::require_event(state, &event_id)?;

        match event.phase {
            EventPhase::Open => return Err(RaffleError::StateConflict(Conflict::RegistrationOpen)),
            EventPhase::Raffled => return Err(RaffleError::StateConflict(Conflict::AlreadyRaffled)),
            EventPhase::Closed => {}
        }

        let draws = event
            .zones
            .values()
            .map(|zone| draw_zone(zone, env.sampler.as_ref()))
            .collect();

        Ok(smallvec![RaffleEvent::RaffleDrawn {
            event_id,
            round: event.raffle_round.saturating_add(1),
            draws,
            drawn_at: now,
        }])
    }
}
