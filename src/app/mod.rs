//! Application layer.
//!
//! - [`services`]: the command handler that loads, decides, appends and retries
//! - [`coordinator`]: [`RaffleApp`], the caller-facing operations with identity
//!   and role checks, wired to the event store and the projections

pub mod coordinator;
pub mod services;

pub use coordinator::{AppError, NewEvent, NewZone, RaffleApp, RaffleSummary, ZoneResult};
pub use services::{CommandOutcome, EventService};
