//! Prometheus metrics.
//!
//! Counters are recorded by the command handler after every commit or refusal. The
//! server binary installs the Prometheus exporter; without an installed recorder the
//! `metrics` macros are no-ops, so library users and tests pay nothing.

use crate::aggregates::RaffleEvent;
use crate::error::RaffleError;
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;

/// Users admitted to a candidate pool
pub const REGISTRATIONS_TOTAL: &str = "raffle_registrations_total";
/// Raffles drawn
pub const DRAWS_TOTAL: &str = "raffle_draws_total";
/// Winners selected across all zones
pub const WINNERS_TOTAL: &str = "raffle_winners_total";
/// Tickets issued
pub const TICKETS_ISSUED_TOTAL: &str = "raffle_tickets_issued_total";
/// Commands refused, labelled by error kind
pub const REJECTIONS_TOTAL: &str = "raffle_rejections_total";
/// Appends that lost the race for a stream version
pub const STORAGE_CONFLICTS_TOTAL: &str = "raffle_storage_conflicts_total";

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build or install the exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Describes every raffle metric.
pub fn register_raffle_metrics() {
    describe_counter!(REGISTRATIONS_TOTAL, "Users admitted to a zone candidate pool");
    describe_counter!(DRAWS_TOTAL, "Raffles drawn");
    describe_counter!(WINNERS_TOTAL, "Winners selected by raffles");
    describe_counter!(TICKETS_ISSUED_TOTAL, "Tickets issued to winners");
    describe_counter!(REJECTIONS_TOTAL, "Commands refused, by error kind");
    describe_counter!(
        STORAGE_CONFLICTS_TOTAL,
        "Appends rejected because the stream moved"
    );
}

/// Installs the Prometheus recorder with an HTTP listener on `addr`.
///
/// # Errors
///
/// Returns `MetricsError::Install` if a recorder is already installed or the
/// listener cannot be built.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    register_raffle_metrics();
    tracing::info!(%addr, "Metrics available at http://{addr}/metrics");
    Ok(())
}

/// Counts the effects of committed events
pub fn record_committed(events: &[RaffleEvent]) {
    for event in events {
        match event {
            RaffleEvent::UserRegistered { .. } => counter!(REGISTRATIONS_TOTAL).increment(1),
            RaffleEvent::RaffleDrawn { draws, .. } => {
                counter!(DRAWS_TOTAL).increment(1);
                let winners: usize = draws.iter().map(|draw| draw.winners.len()).sum();
                counter!(WINNERS_TOTAL).increment(u64::try_from(winners).unwrap_or(u64::MAX));
            }
            RaffleEvent::TicketIssued { .. } => counter!(TICKETS_ISSUED_TOTAL).increment(1),
            _ => {}
        }
    }
}

/// Counts a refused command
pub fn record_rejection(error: &RaffleError) {
    counter!(REJECTIONS_TOTAL, "kind" => error.kind()).increment(1);
}

/// Counts a lost append race
pub fn record_storage_conflict() {
    counter!(STORAGE_CONFLICTS_TOTAL).increment(1);
}
