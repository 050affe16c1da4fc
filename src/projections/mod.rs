//! Read-side projections.
//!
//! Projections fold committed [`RaffleEvent`]s into query-friendly views. They are
//! fed by the application after each successful append and never take part in a
//! command decision.

pub mod user_history;

pub use user_history::{TicketRecord, UserHistory, UserHistoryProjection, ZoneRef};

use crate::aggregates::RaffleEvent;

/// A read model built from raffle events.
pub trait Projection: Send + Sync {
    /// Folds one committed event into the view.
    ///
    /// # Errors
    ///
    /// Returns a description of the inconsistency if the event cannot be applied.
    fn handle_event(&mut self, event: &RaffleEvent) -> Result<(), String>;

    /// Projection name, for logs
    fn name(&self) -> &'static str;

    /// Clears the view, before a rebuild
    fn reset(&mut self);
}
