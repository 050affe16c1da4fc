//! HTTP handlers.
//!
//! - `POST /api/events` and the other operator routes require an operator identity
//! - registration, purchase and history act for the calling member
//! - event, zone and winner reads need no credential

use super::ServerState;
use super::error::ApiError;
use super::extract::{ApiPath, Caller};
use crate::app::{NewEvent, NewZone, RaffleSummary};
use crate::projections::UserHistory;
use crate::types::{Event, EventId, EventPhase, Ticket, UserId, Zone, ZoneId};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response after creating an event.
#[derive(Debug, Serialize)]
pub struct CreateEventResponse {
    /// Created event ID
    pub event_id: EventId,
}

/// Response after adding a zone.
#[derive(Debug, Serialize)]
pub struct AddZoneResponse {
    /// Created zone ID
    pub zone_id: ZoneId,
}

/// Zone details.
#[derive(Debug, Serialize)]
pub struct ZoneSummary {
    /// Zone ID
    pub id: ZoneId,
    /// Zone name
    pub name: String,
    /// Seats in the zone
    pub capacity: u32,
    /// Performance date
    pub performance_date: DateTime<Utc>,
    /// Ticket price in cents
    pub ticket_price_cents: u64,
    /// Tickets still available
    pub remaining_tickets: u32,
    /// Candidates waiting for the next draw
    pub pending_registrations: usize,
    /// Winners across all rounds
    pub winners: usize,
    /// Tickets issued
    pub tickets_issued: usize,
}

impl From<&Zone> for ZoneSummary {
    fn from(zone: &Zone) -> Self {
        Self {
            id: zone.id,
            name: zone.name.clone(),
            capacity: zone.capacity.value(),
            performance_date: zone.performance_date,
            ticket_price_cents: zone.ticket_price.cents(),
            remaining_tickets: zone.remaining_tickets,
            pending_registrations: zone.candidate_pool.len(),
            winners: zone.winners.len(),
            tickets_issued: zone.issued(),
        }
    }
}

/// Event details.
#[derive(Debug, Serialize)]
pub struct EventSummary {
    /// Event ID
    pub id: EventId,
    /// Event name
    pub name: String,
    /// Performance dates
    pub dates: Vec<DateTime<Utc>>,
    /// Venue name
    pub venue_name: String,
    /// Seats in the venue
    pub venue_capacity: u32,
    /// Registration phase
    pub phase: EventPhase,
    /// Raffles drawn so far
    pub raffle_round: u32,
    /// Zones
    pub zones: Vec<ZoneSummary>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl From<&Event> for EventSummary {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            name: event.name.clone(),
            dates: event.dates.clone(),
            venue_name: event.venue.name.clone(),
            venue_capacity: event.venue.capacity.value(),
            phase: event.phase,
            raffle_round: event.raffle_round,
            zones: event.zones.values().map(ZoneSummary::from).collect(),
            created_at: event.created_at,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

/// Liveness check.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"ok","version":"0.1.0"}
/// ```
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create a new event (operator).
///
/// ```bash
/// curl -X POST http://localhost:8080/api/events \
///   -H "Authorization: Bearer <operator_token>" \
///   -H "Content-Type: application/json" \
///   -d '{
///     "name": "Summer Festival",
///     "dates": ["2025-06-01T20:00:00Z"],
///     "venue_name": "Arena",
///     "venue_capacity": 5000
///   }'
/// ```
pub async fn create_event(
    Caller(caller): Caller,
    State(app): State<ServerState>,
    Json(request): Json<NewEvent>,
) -> Result<(StatusCode, Json<CreateEventResponse>), ApiError> {
    let event_id = app.create_event(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(CreateEventResponse { event_id })))
}

/// Get event details.
pub async fn get_event(
    ApiPath(event_id): ApiPath<Uuid>,
    State(app): State<ServerState>,
) -> Result<Json<EventSummary>, ApiError> {
    let event = app.event(EventId::from_uuid(event_id)).await?;
    Ok(Json(EventSummary::from(&event)))
}

/// Delete an event (operator).
pub async fn delete_event(
    Caller(caller): Caller,
    ApiPath(event_id): ApiPath<Uuid>,
    State(app): State<ServerState>,
) -> Result<StatusCode, ApiError> {
    app.delete_event(&caller, EventId::from_uuid(event_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Open pre-registration (operator).
pub async fn open_registration(
    Caller(caller): Caller,
    ApiPath(event_id): ApiPath<Uuid>,
    State(app): State<ServerState>,
) -> Result<StatusCode, ApiError> {
    app.open_registration(&caller, EventId::from_uuid(event_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Close pre-registration (operator).
pub async fn close_registration(
    Caller(caller): Caller,
    ApiPath(event_id): ApiPath<Uuid>,
    State(app): State<ServerState>,
) -> Result<StatusCode, ApiError> {
    app.close_registration(&caller, EventId::from_uuid(event_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Draw the raffle (operator).
///
/// ```bash
/// curl -X POST http://localhost:8080/api/events/<event_id>/raffle \
///   -H "Authorization: Bearer <operator_token>"
/// ```
pub async fn draw_raffle(
    Caller(caller): Caller,
    ApiPath(event_id): ApiPath<Uuid>,
    State(app): State<ServerState>,
) -> Result<Json<RaffleSummary>, ApiError> {
    let summary = app.raffle(&caller, EventId::from_uuid(event_id)).await?;
    Ok(Json(summary))
}

/// Add a zone (operator).
pub async fn add_zone(
    Caller(caller): Caller,
    ApiPath(event_id): ApiPath<Uuid>,
    State(app): State<ServerState>,
    Json(request): Json<NewZone>,
) -> Result<(StatusCode, Json<AddZoneResponse>), ApiError> {
    let zone_id = app
        .add_zone(&caller, EventId::from_uuid(event_id), request)
        .await?;
    Ok((StatusCode::CREATED, Json(AddZoneResponse { zone_id })))
}

/// List the zones of an event.
pub async fn list_zones(
    ApiPath(event_id): ApiPath<Uuid>,
    State(app): State<ServerState>,
) -> Result<Json<Vec<ZoneSummary>>, ApiError> {
    let zones = app.zones(EventId::from_uuid(event_id)).await?;
    Ok(Json(zones.iter().map(ZoneSummary::from).collect()))
}

/// Remove a zone (operator).
pub async fn remove_zone(
    Caller(caller): Caller,
    ApiPath((event_id, zone_id)): ApiPath<(Uuid, Uuid)>,
    State(app): State<ServerState>,
) -> Result<StatusCode, ApiError> {
    app.remove_zone(
        &caller,
        EventId::from_uuid(event_id),
        ZoneId::from_uuid(zone_id),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Pre-register the caller for a zone.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/events/<event_id>/zones/<zone_id>/registrations \
///   -H "Authorization: Bearer <member_token>"
/// ```
pub async fn register(
    Caller(caller): Caller,
    ApiPath((event_id, zone_id)): ApiPath<(Uuid, Uuid)>,
    State(app): State<ServerState>,
) -> Result<StatusCode, ApiError> {
    app.register(
        &caller,
        EventId::from_uuid(event_id),
        ZoneId::from_uuid(zone_id),
    )
    .await?;
    Ok(StatusCode::CREATED)
}

/// List the winners of a zone.
pub async fn list_winners(
    ApiPath((event_id, zone_id)): ApiPath<(Uuid, Uuid)>,
    State(app): State<ServerState>,
) -> Result<Json<Vec<UserId>>, ApiError> {
    let winners = app
        .winners(EventId::from_uuid(event_id), ZoneId::from_uuid(zone_id))
        .await?;
    Ok(Json(winners))
}

/// Buy the caller's ticket for a zone they won.
pub async fn purchase_ticket(
    Caller(caller): Caller,
    ApiPath((event_id, zone_id)): ApiPath<(Uuid, Uuid)>,
    State(app): State<ServerState>,
) -> Result<(StatusCode, Json<Ticket>), ApiError> {
    let ticket = app
        .purchase_ticket(
            &caller,
            EventId::from_uuid(event_id),
            ZoneId::from_uuid(zone_id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// Revoke a user's ticket (operator).
pub async fn revoke_ticket(
    Caller(caller): Caller,
    ApiPath((event_id, zone_id, user_id)): ApiPath<(Uuid, Uuid, Uuid)>,
    State(app): State<ServerState>,
) -> Result<StatusCode, ApiError> {
    app.revoke_ticket(
        &caller,
        EventId::from_uuid(event_id),
        ZoneId::from_uuid(zone_id),
        UserId::from_uuid(user_id),
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The caller's registrations, wins and tickets.
pub async fn my_history(
    Caller(caller): Caller,
    State(app): State<ServerState>,
) -> Json<UserHistory> {
    Json(app.user_history(&caller).await)
}
