//! Ticket issuance and administrative revocation.
//!
//! A winner buys at most one ticket per zone. The ticket and the decrement of
//! `remaining_tickets` are the same `TicketIssued` event, so they commit together.

use super::event::{EventReducer, RaffleEvent};
use crate::error::{Conflict, RaffleError};
use crate::reducer::Events;
use crate::types::{EventId, EventState, Ticket, TicketId, UserId, ZoneId};
use chrono::{DateTime, Utc};
use smallvec::smallvec;

impl EventReducer {
    /// Decides `PurchaseTicket`.
    ///
    /// A non-winner and a winner who already holds a ticket get the same
    /// `TicketUnavailable` refusal.
    pub(super) fn decide_purchase(
        state: &EventState,
        event_id: EventId,
        zone_id: ZoneId,
        user_id: UserId,
        ticket_id: TicketId,
        now: DateTime<Utc>,
    ) -> Result<Events<RaffleEvent>, RaffleError> {
        let event = Self::require_event(state, &event_id)?;
        let zone = Self::require_zone(event, &zone_id)?;

        if !zone.is_winner(&user_id) || zone.ticket_for(&user_id).is_some() {
            return Err(RaffleError::StateConflict(Conflict::TicketUnavailable));
        }
        if zone.remaining_tickets == 0 {
            return Err(RaffleError::StateConflict(Conflict::SoldOut));
        }

        Ok(smallvec![RaffleEvent::TicketIssued {
            ticket: Ticket {
                id: ticket_id,
                event_id,
                zone_id,
                holder: user_id,
                price: zone.ticket_price,
                issued_at: now,
            },
        }])
    }

    /// Decides `RevokeTicket`
    pub(super) fn decide_revoke(
        state: &EventState,
        event_id: EventId,
        zone_id: ZoneId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Events<RaffleEvent>, RaffleError> {
        let event = Self::require_event(state, &event_id)?;
        let zone = Self::require_zone(event, &zone_id)?;
        let ticket = zone
            .ticket_for(&user_id)
            .ok_or(RaffleError::StateConflict(Conflict::NoTicket))?;

        Ok(smallvec![RaffleEvent::TicketRevoked {
            event_id,
            zone_id,
            user_id,
            ticket_id: ticket.id,
            revoked_at: now,
        }])
    }
}
