//! Zone Raffle - capacity-bounded pre-registration raffles with ticket issuance
//!
//! Operators create an event with one or more zones, each a slot of fixed capacity on
//! one performance date. While pre-registration is open, users enter a zone's
//! candidate pool. Once registration closes, a raffle draws at most `capacity`
//! winners per zone, uniformly at random. Only winners can buy a ticket, one each,
//! and never more tickets than seats.
//!
//! # Architecture
//!
//! ```text
//! Write Side (Event Sourcing):
//! ┌──────────────────────────────────────────────────────────┐
//! │                     Event aggregate                      │
//! │  lifecycle │ registration │ raffle draw │ ticket issuance │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!              one stream per event, versioned appends
//!                              │
//!                              ▼
//!                  ┌──────────────────────┐
//!                  │     Event store      │
//!                  │ (memory / Postgres)  │
//!                  └──────────────────────┘
//!                              │
//!                              ▼
//! Read Side (Projections):
//!                  ┌──────────────────────┐
//!                  │     User history     │
//!                  └──────────────────────┘
//! ```
//!
//! # Key Features
//!
//! ## 1. Capacity under contention
//!
//! Every command loads the event stream, decides, and appends at the version it
//! loaded. A writer that loses the race reloads and decides again:
//!
//! ```text
//! purchase A: load v7 ─ decide ─ append@v7 ✓          (remaining 1 → 0)
//! purchase B: load v7 ─ decide ─ append@v7 ✗ conflict
//!             load v8 ─ decide ─ SoldOut
//! ```
//!
//! ## 2. Replayable draws
//!
//! The raffle records its winners in the `RaffleDrawn` event. Replaying a stream
//! never samples again, and a seeded sampler reproduces a whole run.
//!
//! # Usage
//!
//! See [`app::RaffleApp`] for the operations and [`aggregates`] for the reducer and
//! its tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregates;
pub mod app;
pub mod config;
pub mod environment;
pub mod error;
pub mod event_store;
pub mod identity;
pub mod metrics;
pub mod projections;
pub mod reducer;
pub mod retry;
pub mod server;
pub mod testing;
pub mod types;

pub use aggregates::{EventCommand, EventReducer, RaffleEvent};
pub use app::RaffleApp;
pub use config::Config;
pub use error::{Conflict, RaffleError, Resource};
pub use projections::{Projection, UserHistoryProjection};
pub use types::*;
