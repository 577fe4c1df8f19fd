//! Integration tests for the background sweeps.
//!
//! These tests require the `background-jobs` feature to be enabled.

#![cfg(all(feature = "background-jobs", feature = "sqlite"))]

use std::sync::Arc;

use chrono::Duration;
use sqlx::sqlite::SqlitePoolOptions;

use aegis::clock::{Clock, ManualClock};
use aegis::jobs::{
    run_expire_sweep, run_garbage_collection, run_monthly_report, run_warn_sweep, WarnLevel,
};
use aegis::plans::{expired_modules, Plan};
use aegis::server::events::{BusMessage, EventBus, Topic};
use aegis::server::service::{CreateLicense, LicenseService};
use aegis::server::store::{Database, License, LicenseStatus};
use aegis::server::tokens::TokenCodec;

struct Harness {
    db: Arc<Database>,
    service: Arc<LicenseService>,
    bus: Arc<EventBus>,
    clock: Arc<ManualClock>,
}

async fn setup() -> Harness {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should connect");

    let db = Arc::new(Database::SQLite(pool));
    db.migrate().await.expect("migration should succeed");

    let codec = TokenCodec::new("jobs-test-secret", 24, 365, 30);
    let bus = Arc::new(EventBus::new(32));
    let clock = Arc::new(ManualClock::from_system());

    let service = Arc::new(LicenseService::new(
        db.clone(),
        codec,
        bus.clone(),
        clock.clone() as Arc<dyn Clock>,
    ));

    Harness {
        db,
        service,
        bus,
        clock,
    }
}

async fn create(h: &Harness, client_id: &str, ttl_days: i64) {
    h.service
        .create(
            CreateLicense {
                client_id: Some(client_id.to_string()),
                plan: Plan::Basic,
                company_name: None,
                contact_email: None,
                ttl_days,
            },
            "admin",
        )
        .await
        .expect("create should succeed");
}

/// Insert a record already sitting in `expired`, `days_past` beyond its
/// deadline.
async fn insert_expired(h: &Harness, client_id: &str, days_past: i64) {
    let now = h.clock.now();
    let license = License {
        client_id: client_id.to_string(),
        plan: Plan::Basic,
        status: LicenseStatus::Expired,
        active_modules: expired_modules(),
        expires_at: now - Duration::days(days_past),
        created_at: now - Duration::days(days_past + 30),
        updated_at: now - Duration::days(days_past),
        last_check: None,
        last_activity: None,
        company_name: None,
        contact_email: None,
        current_token_id: format!("tok-{client_id}"),
        activity_log: Vec::new(),
    };
    h.db.put(&license).await.expect("put should succeed");
}

// ============================================================================
// Expire sweep
// ============================================================================

#[tokio::test]
async fn expire_sweep_transitions_overdue_licenses() {
    let h = setup().await;

    create(&h, "job-exp-1", 10).await;
    create(&h, "job-exp-2", 50).await;

    h.clock.advance(Duration::days(11));

    let count = run_expire_sweep(&h.service, h.clock.now()).await.unwrap();
    assert_eq!(count, 1);

    let expired = h.db.get("job-exp-1").await.unwrap().unwrap();
    assert_eq!(expired.status, LicenseStatus::Expired);
    assert_eq!(expired.active_modules, expired_modules());

    let untouched = h.db.get("job-exp-2").await.unwrap().unwrap();
    assert_eq!(untouched.status, LicenseStatus::Active);
}

#[tokio::test]
async fn expire_sweep_boundary_is_strict() {
    let h = setup().await;

    create(&h, "job-edge", 10).await;
    let expires_at = h.db.get("job-edge").await.unwrap().unwrap().expires_at;

    // At the exact deadline the license is not yet a sweep candidate.
    h.clock.set(expires_at);
    assert_eq!(run_expire_sweep(&h.service, h.clock.now()).await.unwrap(), 0);
    assert_eq!(
        h.db.get("job-edge").await.unwrap().unwrap().status,
        LicenseStatus::Active
    );

    // One second past it, it is.
    h.clock.advance(Duration::seconds(1));
    assert_eq!(run_expire_sweep(&h.service, h.clock.now()).await.unwrap(), 1);
    assert_eq!(
        h.db.get("job-edge").await.unwrap().unwrap().status,
        LicenseStatus::Expired
    );
}

#[tokio::test]
async fn expire_sweep_is_idempotent() {
    let h = setup().await;

    create(&h, "job-idem", 5).await;
    h.clock.advance(Duration::days(6));

    assert_eq!(run_expire_sweep(&h.service, h.clock.now()).await.unwrap(), 1);
    assert_eq!(run_expire_sweep(&h.service, h.clock.now()).await.unwrap(), 0);
    assert_eq!(run_expire_sweep(&h.service, h.clock.now()).await.unwrap(), 0);
}

// ============================================================================
// Warn sweeps (property 9, scenario S4)
// ============================================================================

#[tokio::test]
async fn warn_sweep_publishes_at_most_once_per_window() {
    let h = setup().await;

    create(&h, "job-warn", 2).await;

    let (_sub, mut rx) = h.bus.subscribe(vec![Topic::Admin]).await;

    let count = run_warn_sweep(&h.db, &h.bus, h.clock.now(), WarnLevel::Three)
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert!(h.db.warn_flag_set("job-warn", 3).await.unwrap());

    let mut warnings = 0;
    while let Ok(message) = rx.try_recv() {
        if let BusMessage::ExpiryWarning {
            client_id,
            urgency,
            days_remaining,
        } = message
        {
            assert_eq!(client_id, "job-warn");
            assert_eq!(urgency, "warning");
            assert!(days_remaining <= 3);
            warnings += 1;
        }
    }
    assert_eq!(warnings, 1);

    // Re-sweeping the same window publishes nothing new.
    let count = run_warn_sweep(&h.db, &h.bus, h.clock.now(), WarnLevel::Three)
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn warn_windows_are_independent() {
    let h = setup().await;

    // 2 days out: inside the 3- and 7-day windows, outside none of them
    // twice.
    create(&h, "job-win", 2).await;

    assert_eq!(
        run_warn_sweep(&h.db, &h.bus, h.clock.now(), WarnLevel::Seven).await.unwrap(),
        1
    );
    assert_eq!(
        run_warn_sweep(&h.db, &h.bus, h.clock.now(), WarnLevel::Three).await.unwrap(),
        1
    );
    // 1-day window not yet entered.
    assert_eq!(
        run_warn_sweep(&h.db, &h.bus, h.clock.now(), WarnLevel::One).await.unwrap(),
        0
    );

    h.clock.advance(Duration::days(1) + Duration::hours(1));
    assert_eq!(
        run_warn_sweep(&h.db, &h.bus, h.clock.now(), WarnLevel::One).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn extend_clears_warn_flags_without_spurious_rewarn() {
    let h = setup().await;

    // License 2 days from expiry with the 3-day flag set (scenario S4).
    create(&h, "job-s4", 2).await;
    run_warn_sweep(&h.db, &h.bus, h.clock.now(), WarnLevel::Three)
        .await
        .unwrap();
    assert!(h.db.warn_flag_set("job-s4", 3).await.unwrap());

    h.service.extend("job-s4", 30, "admin").await.unwrap();

    // Flag cleared, license active, and the new window (32 days out) emits
    // nothing.
    assert!(!h.db.warn_flag_set("job-s4", 3).await.unwrap());
    let license = h.db.get("job-s4").await.unwrap().unwrap();
    assert_eq!(license.status, LicenseStatus::Active);

    for level in [WarnLevel::Seven, WarnLevel::Three, WarnLevel::One] {
        assert_eq!(
            run_warn_sweep(&h.db, &h.bus, h.clock.now(), level).await.unwrap(),
            0
        );
    }
}

#[tokio::test]
async fn warn_sweep_ignores_inactive_licenses() {
    let h = setup().await;

    create(&h, "job-off", 2).await;
    h.service.toggle("job-off", "admin").await.unwrap();

    assert_eq!(
        run_warn_sweep(&h.db, &h.bus, h.clock.now(), WarnLevel::Three).await.unwrap(),
        0
    );
}

// ============================================================================
// Garbage collection (property 10)
// ============================================================================

#[tokio::test]
async fn gc_removes_only_long_expired_records() {
    let h = setup().await;

    insert_expired(&h, "gc-old", 120).await;
    insert_expired(&h, "gc-recent", 10).await;
    create(&h, "gc-active", 30).await;

    let count = run_garbage_collection(&h.service, h.clock.now(), 90)
        .await
        .unwrap();
    assert_eq!(count, 1);

    assert!(h.db.get("gc-old").await.unwrap().is_none());
    assert!(h.db.get("gc-recent").await.unwrap().is_some());
    assert!(h.db.get("gc-active").await.unwrap().is_some());
}

#[tokio::test]
async fn gc_never_touches_active_records_past_deadline() {
    let h = setup().await;

    // Overdue but still active (expire sweep hasn't run): GC must not
    // delete it.
    create(&h, "gc-overdue", 1).await;
    h.clock.advance(Duration::days(200));

    let count = run_garbage_collection(&h.service, h.clock.now(), 90)
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert!(h.db.get("gc-overdue").await.unwrap().is_some());
}

// ============================================================================
// Monthly report
// ============================================================================

#[tokio::test]
async fn monthly_report_publishes_aggregates_to_admin_topic() {
    let h = setup().await;

    create(&h, "rep-1", 30).await;
    create(&h, "rep-2", 30).await;
    insert_expired(&h, "rep-3", 5).await;

    let (_sub, mut rx) = h.bus.subscribe(vec![Topic::Admin]).await;

    let stats = run_monthly_report(&h.db, &h.bus, h.clock.now())
        .await
        .unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.by_status.get("active"), Some(&2));
    assert_eq!(stats.by_status.get("expired"), Some(&1));
    assert_eq!(stats.by_plan.get("basic"), Some(&3));

    let mut saw_report = false;
    while let Ok(message) = rx.try_recv() {
        if let BusMessage::SystemNotification { message, payload } = message {
            if message == "monthly_report" {
                assert_eq!(payload["total"], 3);
                saw_report = true;
            }
        }
    }
    assert!(saw_report);
}
