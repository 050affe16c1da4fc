//! Per-user history: zones registered, zones won, tickets held.
//!
//! The user is an external entity; this view is the "relationship" side of it,
//! answering "which zones did I enter, win, and buy for?".
//!
//! The view records how far it has read each event stream. [`apply_stream`] only
//! applies events past that position and refuses a batch that would leave a gap, so
//! commits delivered late or twice never reorder or repeat an update.
//!
//! [`apply_stream`]: UserHistoryProjection::apply_stream

use super::Projection;
use crate::aggregates::RaffleEvent;
use crate::event_store::Version;
use crate::types::{EventId, Money, TicketId, UserId, ZoneId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// A zone, addressed through its event
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ZoneRef {
    /// Owning event
    pub event_id: EventId,
    /// Zone
    pub zone_id: ZoneId,
}

/// A ticket as seen from its holder
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TicketRecord {
    /// Ticket identifier
    pub ticket_id: TicketId,
    /// Zone the ticket admits to
    pub zone: ZoneRef,
    /// Price paid
    pub price: Money,
    /// When issued
    pub issued_at: DateTime<Utc>,
}

/// One user's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UserHistory {
    /// The user
    pub user_id: UserId,
    /// Zones the user pre-registered for
    pub registered: BTreeSet<ZoneRef>,
    /// Zones where the user won the raffle
    pub won: BTreeSet<ZoneRef>,
    /// Tickets currently held
    pub tickets: Vec<TicketRecord>,
    /// Sum of the prices of held tickets
    pub total_spent: Money,
}

impl UserHistory {
    /// Creates an empty history
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            registered: BTreeSet::new(),
            won: BTreeSet::new(),
            tickets: Vec::new(),
            total_spent: Money::from_cents(0),
        }
    }

    fn forget_zone(&mut self, zone: ZoneRef) {
        self.registered.remove(&zone);
        self.won.remove(&zone);
        self.drop_tickets(|ticket| ticket.zone == zone);
    }

    fn forget_event(&mut self, event_id: EventId) {
        self.registered.retain(|zone| zone.event_id != event_id);
        self.won.retain(|zone| zone.event_id != event_id);
        self.drop_tickets(|ticket| ticket.zone.event_id == event_id);
    }

    fn drop_tickets(&mut self, matches: impl Fn(&TicketRecord) -> bool) {
        let mut spent = self.total_spent;
        self.tickets.retain(|ticket| {
            if matches(ticket) {
                spent = spent.checked_sub(ticket.price).unwrap_or_default();
                false
            } else {
                true
            }
        });
        self.total_spent = spent;
    }

    fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.won.is_empty() && self.tickets.is_empty()
    }
}

/// Projection maintaining every user's [`UserHistory`].
#[derive(Debug, Default)]
pub struct UserHistoryProjection {
    histories: HashMap<UserId, UserHistory>,
    positions: HashMap<EventId, Version>,
}

impl UserHistoryProjection {
    /// Creates an empty projection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// History of one user; empty if the user never registered
    #[must_use]
    pub fn history(&self, user_id: &UserId) -> UserHistory {
        self.histories
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| UserHistory::new(*user_id))
    }

    /// Number of users with a non-empty history
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.histories.len()
    }

    /// Number of events of the stream already applied
    #[must_use]
    pub fn position(&self, event_id: &EventId) -> Version {
        self.positions
            .get(event_id)
            .copied()
            .unwrap_or(Version::INITIAL)
    }

    /// Applies `events`, which start at stream version `from`.
    ///
    /// Events the view already holds are skipped. Returns `Ok(false)` and applies
    /// nothing if `from` is past the view's position; the caller must first apply
    /// the missing events.
    ///
    /// # Errors
    ///
    /// Returns the first event that could not be applied. The position still moves
    /// past it.
    pub fn apply_stream(
        &mut self,
        event_id: EventId,
        from: Version,
        events: &[RaffleEvent],
    ) -> Result<bool, String> {
        let mut position = self.position(&event_id);
        if from > position {
            return Ok(false);
        }

        let seen = usize::try_from(position.value() - from.value()).unwrap_or(usize::MAX);
        let mut outcome = Ok(true);
        for event in events.iter().skip(seen) {
            position = position.advance(1);
            if let Err(error) = self.handle_event(event) {
                outcome = Err(error);
                break;
            }
        }
        self.positions.insert(event_id, position);
        outcome
    }

    fn entry(&mut self, user_id: UserId) -> &mut UserHistory {
        self.histories
            .entry(user_id)
            .or_insert_with(|| UserHistory::new(user_id))
    }

    fn prune(&mut self) {
        self.histories.retain(|_, history| !history.is_empty());
    }
}

impl Projection for UserHistoryProjection {
    fn handle_event(&mut self, event: &RaffleEvent) -> Result<(), String> {
        match event {
            RaffleEvent::UserRegistered {
                event_id,
                zone_id,
                user_id,
                ..
            } => {
                self.entry(*user_id).registered.insert(ZoneRef {
                    event_id: *event_id,
                    zone_id: *zone_id,
                });
            }
            RaffleEvent::RaffleDrawn {
                event_id, draws, ..
            } => {
                for draw in draws {
                    let zone = ZoneRef {
                        event_id: *event_id,
                        zone_id: draw.zone_id,
                    };
                    for winner in &draw.winners {
                        self.entry(*winner).won.insert(zone);
                    }
                }
            }
            RaffleEvent::TicketIssued { ticket } => {
                let history = self.entry(ticket.holder);
                history.total_spent = history
                    .total_spent
                    .checked_add(ticket.price)
                    .ok_or_else(|| format!("total spent overflow for user {}", ticket.holder))?;
                history.tickets.push(TicketRecord {
                    ticket_id: ticket.id,
                    zone: ZoneRef {
                        event_id: ticket.event_id,
                        zone_id: ticket.zone_id,
                    },
                    price: ticket.price,
                    issued_at: ticket.issued_at,
                });
            }
            RaffleEvent::TicketRevoked {
                user_id, ticket_id, ..
            } => {
                if let Some(history) = self.histories.get_mut(user_id) {
                    history.drop_tickets(|ticket| ticket.ticket_id == *ticket_id);
                }
            }
            RaffleEvent::ZoneRemoved {
                event_id, zone_id, ..
            } => {
                let zone = ZoneRef {
                    event_id: *event_id,
                    zone_id: *zone_id,
                };
                for history in self.histories.values_mut() {
                    history.forget_zone(zone);
                }
                self.prune();
            }
            RaffleEvent::EventDeleted { event_id, .. } => {
                for history in self.histories.values_mut() {
                    history.forget_event(*event_id);
                }
                self.prune();
            }
            RaffleEvent::EventCreated { .. }
            | RaffleEvent::ZoneAdded { .. }
            | RaffleEvent::RegistrationOpened { .. }
            | RaffleEvent::RegistrationClosed { .. } => {}
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "user_history"
    }

    fn reset(&mut self) {
        self.histories.clear();
        self.positions.clear();
    }
}
