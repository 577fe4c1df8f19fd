//! Fan-out behavior of committed mutations: per-subscriber delivery,
//! ordering, and slow-consumer eviction (scenario S6, property 4).

#![cfg(all(feature = "server", feature = "sqlite"))]

use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;

use aegis::clock::{Clock, ManualClock};
use aegis::plans::Plan;
use aegis::server::events::{BusMessage, EventBus, Topic, UpdateAction};
use aegis::server::service::{CreateLicense, LicenseService};
use aegis::server::store::Database;
use aegis::server::tokens::TokenCodec;

async fn setup(queue_capacity: usize) -> (Arc<LicenseService>, Arc<EventBus>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should connect");

    let db = Arc::new(Database::SQLite(pool));
    db.migrate().await.expect("migration should succeed");

    let codec = TokenCodec::new("bus-test-secret", 24, 365, 30);
    let bus = Arc::new(EventBus::new(queue_capacity));
    let clock = Arc::new(ManualClock::from_system());

    let service = Arc::new(LicenseService::new(
        db,
        codec,
        bus.clone(),
        clock as Arc<dyn Clock>,
    ));

    (service, bus)
}

fn request(client_id: &str) -> CreateLicense {
    CreateLicense {
        client_id: Some(client_id.to_string()),
        plan: Plan::Premium,
        company_name: None,
        contact_email: None,
        ttl_days: 30,
    }
}

fn actions(messages: &[BusMessage]) -> Vec<UpdateAction> {
    messages
        .iter()
        .filter_map(|m| match m {
            BusMessage::LicenseUpdate { action, .. } => Some(*action),
            _ => None,
        })
        .collect()
}

fn drain(rx: &mut tokio::sync::mpsc::Receiver<BusMessage>) -> Vec<BusMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

#[tokio::test]
async fn subscriber_receives_each_mutation_exactly_once() {
    let (service, bus) = setup(32).await;

    // Subscribed to both the client topic and the plan topic; every update
    // is published to both, and must still arrive once.
    let (_sub, mut rx) = bus
        .subscribe(vec![
            Topic::License("bus-once".to_string()),
            Topic::Plan(Plan::Premium),
        ])
        .await;

    service.create(request("bus-once"), "admin").await.unwrap();

    let received = drain(&mut rx);
    assert_eq!(actions(&received), vec![UpdateAction::Created]);
}

#[tokio::test]
async fn updates_arrive_in_commit_order() {
    let (service, bus) = setup(32).await;

    let (_sub, mut rx) = bus
        .subscribe(vec![Topic::License("bus-order".to_string())])
        .await;

    service.create(request("bus-order"), "admin").await.unwrap();
    service.extend("bus-order", 10, "admin").await.unwrap();
    service.toggle("bus-order", "admin").await.unwrap();
    service.toggle("bus-order", "admin").await.unwrap();
    service
        .revoke("bus-order", "policy", None, "admin")
        .await
        .unwrap();

    let received = drain(&mut rx);
    assert_eq!(
        actions(&received),
        vec![
            UpdateAction::Created,
            UpdateAction::Extended,
            UpdateAction::Toggled,
            UpdateAction::Toggled,
            UpdateAction::Revoked,
        ]
    );
}

#[tokio::test]
async fn unrelated_clients_do_not_cross_topics() {
    let (service, bus) = setup(32).await;

    let (_sub, mut rx) = bus
        .subscribe(vec![Topic::License("bus-mine".to_string())])
        .await;

    service.create(request("bus-mine"), "admin").await.unwrap();
    service.create(request("bus-other"), "admin").await.unwrap();
    service.extend("bus-other", 5, "admin").await.unwrap();

    let received = drain(&mut rx);
    assert_eq!(actions(&received), vec![UpdateAction::Created]);
}

#[tokio::test]
async fn slow_consumer_is_evicted_while_others_keep_receiving() {
    // Queue of 1: the second undrained publish overflows.
    let (service, bus) = setup(1).await;

    let (_slow, mut slow_rx) = bus
        .subscribe(vec![Topic::License("bus-slow".to_string())])
        .await;
    let (_fast, mut fast_rx) = bus
        .subscribe(vec![Topic::License("bus-slow".to_string())])
        .await;

    service.create(request("bus-slow"), "admin").await.unwrap();
    // Fast subscriber drains; slow one does not. Its queue is now full.
    assert_eq!(drain(&mut fast_rx).len(), 1);
    assert_eq!(bus.subscriber_count().await, 2);

    // This publish overflows the slow queue and evicts the subscriber.
    service.extend("bus-slow", 5, "admin").await.unwrap();
    assert_eq!(drain(&mut fast_rx).len(), 1);
    assert_eq!(bus.subscriber_count().await, 1);

    // Later publishes keep flowing to the healthy subscriber.
    service.extend("bus-slow", 5, "admin").await.unwrap();
    assert_eq!(drain(&mut fast_rx).len(), 1);

    // The slow subscriber's channel ends after the buffered message: that
    // terminal None is what the gateway turns into a `slow_consumer` close.
    let buffered = drain(&mut slow_rx);
    assert_eq!(buffered.len(), 1);
    assert!(slow_rx.recv().await.is_none());
}

#[tokio::test]
async fn recovery_replays_audit_tail_to_admin_topic() {
    let (service, bus) = setup(32).await;

    let before = {
        // Capture an instant before the mutations.
        chrono::Utc::now().naive_utc() - chrono::Duration::seconds(1)
    };

    service.create(request("bus-rec"), "admin").await.unwrap();
    service.extend("bus-rec", 10, "admin").await.unwrap();

    let (_sub, mut rx) = bus.subscribe(vec![Topic::Admin]).await;

    let replayed = service.recover_publishes(before).await.unwrap();
    assert!(replayed >= 2);

    let recovered: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|m| match m {
            BusMessage::SystemNotification { message, payload } if message == "recovered_event" => {
                Some(payload["kind"].as_str().unwrap_or_default().to_string())
            }
            _ => None,
        })
        .collect();

    assert!(recovered.contains(&"creation".to_string()));
    assert!(recovered.contains(&"extension".to_string()));
}
