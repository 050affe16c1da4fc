//! Concurrent callers racing on one event stream.
//!
//! Every command appends at the version it loaded, so these races resolve through
//! the event store: one writer commits, the others reload and decide again.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

mod common;

use common::{event_with_zone, harness, member, raffled};
use tokio::task::JoinSet;
use zone_raffle::{Conflict, RaffleError};

/// Two purchases by the same winner: one ticket, one refusal.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_purchase_issues_one_ticket() {
    let h = harness();
    let winner = member();
    let (event_id, zone_id) = raffled(&h, 1, &[winner]).await;

    let mut tasks = JoinSet::new();
    for _ in 0..2 {
        let app = h.app.clone();
        tasks.spawn(async move { app.purchase_ticket(&winner, event_id, zone_id).await });
    }

    let mut issued = 0;
    let mut refused = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => issued += 1,
            Err(RaffleError::StateConflict(
                Conflict::TicketUnavailable | Conflict::SoldOut,
            )) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((issued, refused), (1, 1));

    let zone = h.app.zones(event_id).await.unwrap().remove(0);
    assert_eq!(zone.remaining_tickets, 0);
    assert_eq!(zone.issued(), 1);
}

/// Every winner buys at once: tickets never exceed capacity, remaining never underflows.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_winners_exhaust_capacity_exactly() {
    let h = harness();
    let users: Vec<_> = (0..12).map(|_| member()).collect();
    let (event_id, zone_id) = raffled(&h, 8, &users).await;

    let mut tasks = JoinSet::new();
    for user in users.clone() {
        let app = h.app.clone();
        tasks.spawn(async move { app.purchase_ticket(&user, event_id, zone_id).await });
    }

    let mut issued = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(_) => issued += 1,
            Err(RaffleError::StateConflict(Conflict::TicketUnavailable)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(issued, 8);

    let zone = h.app.zones(event_id).await.unwrap().remove(0);
    assert_eq!(zone.remaining_tickets, 0);
    assert_eq!(zone.tickets.len(), 8);
    assert!(zone.tickets.keys().all(|holder| zone.winners.contains(holder)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_registrations_by_one_user_admit_one() {
    let h = harness();
    let (event_id, zone_id) = event_with_zone(&h, 3).await;
    let user = member();

    let mut tasks = JoinSet::new();
    for _ in 0..6 {
        let app = h.app.clone();
        tasks.spawn(async move { app.register(&user, event_id, zone_id).await });
    }

    let mut admitted = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(()) => admitted += 1,
            Err(error) => assert_eq!(
                error,
                RaffleError::StateConflict(Conflict::AlreadyRegistered)
            ),
        }
    }
    assert_eq!(admitted, 1);
    let zone = h.app.zones(event_id).await.unwrap().remove(0);
    assert_eq!(zone.candidate_pool.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_raffles_draw_once() {
    let h = harness();
    let (event_id, zone_id) = event_with_zone(&h, 2).await;
    for _ in 0..5 {
        h.app.register(&member(), event_id, zone_id).await.unwrap();
    }
    h.app.close_registration(&h.operator, event_id).await.unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let app = h.app.clone();
        let operator = h.operator;
        tasks.spawn(async move { app.raffle(&operator, event_id).await });
    }

    let mut drawn = 0;
    while let Some(result) = tasks.join_next().await {
        match result.unwrap() {
            Ok(summary) => {
                drawn += 1;
                assert_eq!(summary.round, 1);
            }
            Err(error) => {
                assert_eq!(error, RaffleError::StateConflict(Conflict::AlreadyRaffled));
            }
        }
    }
    assert_eq!(drawn, 1);

    let event = h.app.event(event_id).await.unwrap();
    assert_eq!(event.raffle_round, 1);
    assert_eq!(event.zone(&zone_id).unwrap().winners.len(), 2);
}

/// Many users registering for one zone at once all land in the pool.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_users_register_concurrently() {
    let h = harness();
    let (event_id, zone_id) = event_with_zone(&h, 2).await;

    let mut tasks = JoinSet::new();
    for _ in 0..20 {
        let app = h.app.clone();
        tasks.spawn(async move { app.register(&member(), event_id, zone_id).await });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let zone = h.app.zones(event_id).await.unwrap().remove(0);
    assert_eq!(zone.candidate_pool.len(), 20);
}
