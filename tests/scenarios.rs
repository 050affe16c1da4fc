//! End-to-end raffle scenarios through `RaffleApp`.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

mod common;

use common::{
    event_with_zone, harness, harness_with, member, new_event, new_zone, raffled, restarted,
};
use zone_raffle::{Conflict, EventPhase, Money, RaffleError, RegistrationScope, Resource, ZoneId};

fn conflict(c: Conflict) -> RaffleError {
    RaffleError::StateConflict(c)
}

/// Capacity 1, two registrants: one winner, the loser cannot buy, the winner buys once.
#[tokio::test]
async fn single_seat_zone_has_exactly_one_buyer() {
    let h = harness();
    let (alice, bob) = (member(), member());
    let (event_id, zone_id) = raffled(&h, 1, &[alice, bob]).await;

    let winners = h.app.winners(event_id, zone_id).await.unwrap();
    assert_eq!(winners.len(), 1);
    let (winner, loser) = if winners[0] == alice.user_id {
        (alice, bob)
    } else {
        (bob, alice)
    };

    assert_eq!(
        h.app.purchase_ticket(&loser, event_id, zone_id).await,
        Err(conflict(Conflict::TicketUnavailable))
    );
    let ticket = h.app.purchase_ticket(&winner, event_id, zone_id).await.unwrap();
    assert_eq!(ticket.holder, winner.user_id);
    assert_eq!(ticket.price, Money::from_cents(7_500));
    assert_eq!(
        h.app.purchase_ticket(&winner, event_id, zone_id).await,
        Err(conflict(Conflict::TicketUnavailable))
    );

    let zone = h.app.zones(event_id).await.unwrap().remove(0);
    assert_eq!(zone.remaining_tickets, 0);
    assert_eq!(zone.issued(), 1);
}

/// A closed event refuses registration whatever the zone capacity.
#[tokio::test]
async fn closed_event_refuses_registration() {
    let h = harness();
    let event_id = h.app.create_event(&h.operator, new_event(false)).await.unwrap();
    let zone_id = h
        .app
        .add_zone(&h.operator, event_id, new_zone(500))
        .await
        .unwrap();

    assert_eq!(
        h.app.register(&member(), event_id, zone_id).await,
        Err(conflict(Conflict::EventClosed))
    );
    let zone = h.app.zones(event_id).await.unwrap().remove(0);
    assert!(zone.candidate_pool.is_empty());
}

/// Pool smaller than capacity: everyone wins, no ticket is issued by the draw.
#[tokio::test]
async fn small_pool_all_win_and_capacity_waits_for_purchases() {
    let h = harness();
    let users = [member(), member(), member()];
    let (event_id, zone_id) = raffled(&h, 5, &users).await;

    let winners = h.app.winners(event_id, zone_id).await.unwrap();
    assert_eq!(winners.len(), 3);
    assert!(users.iter().all(|u| winners.contains(&u.user_id)));
    let zone = h.app.zones(event_id).await.unwrap().remove(0);
    assert_eq!(zone.remaining_tickets, 5);

    h.app.purchase_ticket(&users[0], event_id, zone_id).await.unwrap();
    let zone = h.app.zones(event_id).await.unwrap().remove(0);
    assert_eq!(zone.remaining_tickets, 4);
}

/// Raffling while registration is open fails and changes nothing.
#[tokio::test]
async fn raffle_while_open_changes_nothing() {
    let h = harness();
    let (event_id, zone_id) = event_with_zone(&h, 2).await;
    h.app.register(&member(), event_id, zone_id).await.unwrap();
    let before = h.app.event(event_id).await.unwrap();

    assert_eq!(
        h.app.raffle(&h.operator, event_id).await,
        Err(conflict(Conflict::RegistrationOpen))
    );
    assert_eq!(h.app.event(event_id).await.unwrap(), before);
}

#[tokio::test]
async fn second_raffle_does_not_draw_again() {
    let h = harness();
    let (event_id, _) = raffled(&h, 2, &[member(), member(), member()]).await;
    let before = h.app.event(event_id).await.unwrap();

    assert_eq!(
        h.app.raffle(&h.operator, event_id).await,
        Err(conflict(Conflict::AlreadyRaffled))
    );
    let after = h.app.event(event_id).await.unwrap();
    assert_eq!(after, before);
    assert_eq!(after.raffle_round, 1);
    assert_eq!(after.phase, EventPhase::Raffled);
}

#[tokio::test]
async fn reopening_keeps_winners_and_tickets() {
    let h = harness();
    let first = [member(), member()];
    let (event_id, zone_id) = raffled(&h, 3, &first).await;
    h.app.purchase_ticket(&first[0], event_id, zone_id).await.unwrap();

    h.app.open_registration(&h.operator, event_id).await.unwrap();
    assert_eq!(
        h.app.register(&first[1], event_id, zone_id).await,
        Err(conflict(Conflict::AlreadyRegistered))
    );
    let late = [member(), member()];
    for user in &late {
        h.app.register(user, event_id, zone_id).await.unwrap();
    }
    h.app.close_registration(&h.operator, event_id).await.unwrap();
    let summary = h.app.raffle(&h.operator, event_id).await.unwrap();

    assert_eq!(summary.round, 2);
    assert_eq!(summary.zones[0].winners.len(), 1);
    assert_eq!(summary.zones[0].not_selected.len(), 1);
    let zone = h.app.zones(event_id).await.unwrap().remove(0);
    assert_eq!(zone.winners.len(), 3);
    assert_eq!(zone.issued(), 1);
    assert_eq!(zone.remaining_tickets, 2);
}

#[tokio::test]
async fn per_event_scope_allows_one_zone_per_user() {
    let h = harness_with(RegistrationScope::PerEvent, 5);
    let (event_id, floor) = event_with_zone(&h, 10).await;
    let balcony = h
        .app
        .add_zone(&h.operator, event_id, new_zone(10))
        .await
        .unwrap();
    let user = member();

    h.app.register(&user, event_id, floor).await.unwrap();
    assert_eq!(
        h.app.register(&user, event_id, balcony).await,
        Err(conflict(Conflict::AlreadyRegistered))
    );
}

#[tokio::test]
async fn unknown_zone_and_event_are_not_found() {
    let h = harness();
    let (event_id, _) = event_with_zone(&h, 1).await;
    let zone_id = ZoneId::new();

    assert_eq!(
        h.app.register(&member(), event_id, zone_id).await,
        Err(RaffleError::NotFound(Resource::Zone(zone_id)))
    );

    h.app.delete_event(&h.operator, event_id).await.unwrap();
    assert_eq!(
        h.app.event(event_id).await,
        Err(RaffleError::NotFound(Resource::Event(event_id)))
    );
}

#[tokio::test]
async fn revoked_ticket_returns_to_the_zone() {
    let h = harness();
    let winner = member();
    let (event_id, zone_id) = raffled(&h, 1, &[winner]).await;
    h.app.purchase_ticket(&winner, event_id, zone_id).await.unwrap();

    h.app
        .revoke_ticket(&h.operator, event_id, zone_id, winner.user_id)
        .await
        .unwrap();
    let zone = h.app.zones(event_id).await.unwrap().remove(0);
    assert_eq!(zone.remaining_tickets, 1);
    assert!(h.app.user_history(&winner).await.tickets.is_empty());

    h.app.purchase_ticket(&winner, event_id, zone_id).await.unwrap();
}

/// A new process over the same store sees every user's history and tickets.
#[tokio::test]
async fn user_history_is_rebuilt_after_a_restart() {
    let h = harness();
    let (winner, other) = (member(), member());
    let (event_id, zone_id) = raffled(&h, 2, &[winner, other]).await;
    h.app.purchase_ticket(&winner, event_id, zone_id).await.unwrap();
    h.app.purchase_ticket(&other, event_id, zone_id).await.unwrap();
    h.app
        .revoke_ticket(&h.operator, event_id, zone_id, other.user_id)
        .await
        .unwrap();
    let before = h.app.user_history(&winner).await;

    let app = restarted(&h, 3);
    assert!(app.user_history(&winner).await.tickets.is_empty());

    assert_eq!(app.rebuild_user_history().await.unwrap(), 1);
    assert_eq!(app.user_history(&winner).await, before);
    assert_eq!(app.user_history(&winner).await.tickets.len(), 1);
    let revoked = app.user_history(&other).await;
    assert_eq!(revoked.won.len(), 1);
    assert!(revoked.tickets.is_empty());

    // The restarted process keeps projecting new commits on top of the replay
    app.purchase_ticket(&other, event_id, zone_id).await.unwrap();
    assert_eq!(app.user_history(&other).await.tickets.len(), 1);
    assert_eq!(
        app.event(event_id).await.unwrap().zone(&zone_id).unwrap().remaining_tickets,
        0
    );
}
