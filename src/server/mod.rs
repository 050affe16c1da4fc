//! HTTP server.
//!
//! An axum router over [`RaffleApp`]. Credentials arrive as bearer tokens and are
//! resolved per request; errors map to statuses in [`error`].

pub mod error;
pub mod extract;
pub mod routes;

pub use error::ApiError;
pub use extract::Caller;

use crate::app::RaffleApp;
use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;

/// Shared handler state
pub type ServerState = Arc<RaffleApp>;

/// Build the complete Axum router.
pub fn build_router(app: ServerState) -> Router {
    let api_routes = Router::new()
        // Event lifecycle
        .route("/events", post(routes::create_event))
        .route(
            "/events/:event_id",
            get(routes::get_event).delete(routes::delete_event),
        )
        .route("/events/:event_id/open", post(routes::open_registration))
        .route("/events/:event_id/close", post(routes::close_registration))
        .route("/events/:event_id/raffle", post(routes::draw_raffle))
        // Zones
        .route(
            "/events/:event_id/zones",
            post(routes::add_zone).get(routes::list_zones),
        )
        .route(
            "/events/:event_id/zones/:zone_id",
            delete(routes::remove_zone),
        )
        .route(
            "/events/:event_id/zones/:zone_id/registrations",
            post(routes::register),
        )
        .route(
            "/events/:event_id/zones/:zone_id/winners",
            get(routes::list_winners),
        )
        .route(
            "/events/:event_id/zones/:zone_id/tickets",
            post(routes::purchase_ticket),
        )
        .route(
            "/events/:event_id/zones/:zone_id/tickets/:user_id",
            delete(routes::revoke_ticket),
        )
        // Caller
        .route("/me/history", get(routes::my_history));

    Router::new()
        .route("/health", get(routes::health_check))
        .nest("/api", api_routes)
        .with_state(app)
}
