//! In-process publish/subscribe bus.
//!
//! Topic space: `license:{client_id}`, `plan:{plan}`, `admin`. A publisher
//! writes once with the set of topics the message belongs to; every
//! subscriber whose subscription intersects that set receives the message
//! exactly once. Delivery is best-effort and ordered per topic.
//!
//! Each subscriber owns a bounded queue. When a queue is full the subscriber
//! is dropped from the bus instead of blocking the publisher; its receiver
//! ends, and the gateway closes the connection with reason `slow_consumer`.
//!
//! The bus carries notifications only. The truth lives in the store and the
//! audit log; a reconnecting client re-syncs with `check`.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::plans::{Module, Plan};
use crate::server::store::LicenseStatus;

/// Default per-subscriber queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// A logical channel of the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Events for one client
    License(String),
    /// Events for every client on a plan
    Plan(Plan),
    /// Operator-wide events
    Admin,
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::License(client_id) => write!(f, "license:{client_id}"),
            Topic::Plan(plan) => write!(f, "plan:{plan}"),
            Topic::Admin => write!(f, "admin"),
        }
    }
}

/// What happened to a license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    Created,
    Toggled,
    Extended,
    PlanChanged,
    ModulesUpdated,
    Revoked,
    Deleted,
    Expired,
}

/// A message travelling over the bus.
#[derive(Debug, Clone)]
pub enum BusMessage {
    LicenseUpdate {
        client_id: String,
        action: UpdateAction,
        plan: Plan,
        status: LicenseStatus,
        modules: Vec<Module>,
        expires_at: NaiveDateTime,
    },
    ExpiryWarning {
        client_id: String,
        urgency: String,
        days_remaining: i64,
    },
    SystemNotification {
        message: String,
        payload: serde_json::Value,
    },
}

impl BusMessage {
    /// Wire-level message kind, matching the gateway envelope `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            BusMessage::LicenseUpdate { .. } => "license_update",
            BusMessage::ExpiryWarning { .. } => "license_expiry_warning",
            BusMessage::SystemNotification { .. } => "system_notification",
        }
    }

    /// Wire-level payload.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            BusMessage::LicenseUpdate {
                client_id,
                action,
                plan,
                status,
                modules,
                expires_at,
            } => serde_json::json!({
                "client_id": client_id,
                "action": action,
                "plan": plan,
                "status": status,
                "modules": modules,
                "expires_at": format_ts(*expires_at),
            }),
            BusMessage::ExpiryWarning {
                client_id,
                urgency,
                days_remaining,
            } => serde_json::json!({
                "client_id": client_id,
                "urgency": urgency,
                "days_remaining": days_remaining,
            }),
            BusMessage::SystemNotification { message, payload } => serde_json::json!({
                "message": message,
                "details": payload,
            }),
        }
    }
}

fn format_ts(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Opaque subscriber handle.
pub type SubscriberId = Uuid;

struct Subscriber {
    topics: Vec<Topic>,
    tx: mpsc::Sender<BusMessage>,
}

impl Subscriber {
    fn wants(&self, topics: &[Topic]) -> bool {
        self.topics.iter().any(|t| topics.contains(t))
    }
}

/// The in-process event bus.
///
/// Constructed once and passed explicitly to everything that publishes or
/// subscribes; tests build their own instance.
pub struct EventBus {
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Register a subscriber for a set of topics.
    ///
    /// The returned receiver ends (`recv()` yields `None`) when the
    /// subscriber is dropped for falling behind.
    pub async fn subscribe(&self, topics: Vec<Topic>) -> (SubscriberId, mpsc::Receiver<BusMessage>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();

        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(id, Subscriber { topics, tx });
        debug!("Bus subscriber {id} registered ({} total)", subscribers.len());

        (id, rx)
    }

    /// Remove a subscriber. Idempotent.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let mut subscribers = self.subscribers.write().await;
        subscribers.remove(&id);
    }

    /// Publish one message to every subscriber of the given topics.
    ///
    /// Each matching subscriber receives the message at most once even when
    /// it subscribes to several of the topics. Subscribers whose queue is
    /// full (or whose receiver is gone) are dropped from the bus; their ids
    /// are returned so callers can observe the eviction.
    pub async fn publish(&self, topics: &[Topic], message: BusMessage) -> Vec<SubscriberId> {
        let mut evicted = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            for (id, subscriber) in subscribers.iter() {
                if !subscriber.wants(topics) {
                    continue;
                }
                match subscriber.tx.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("Bus subscriber {id} queue full, dropping subscriber");
                        evicted.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        evicted.push(*id);
                    }
                }
            }
        }

        if !evicted.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in &evicted {
                subscribers.remove(id);
            }
        }

        evicted
    }

    /// Number of live subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn update_for(client_id: &str) -> BusMessage {
        BusMessage::LicenseUpdate {
            client_id: client_id.to_string(),
            action: UpdateAction::Created,
            plan: Plan::Basic,
            status: LicenseStatus::Active,
            modules: vec![Module::BasicFeatures],
            expires_at: Utc::now().naive_utc(),
        }
    }

    #[tokio::test]
    async fn delivers_to_matching_topic_only() {
        let bus = EventBus::default();
        let (_a, mut rx_a) = bus.subscribe(vec![Topic::License("a".to_string())]).await;
        let (_b, mut rx_b) = bus.subscribe(vec![Topic::License("b".to_string())]).await;

        bus.publish(&[Topic::License("a".to_string())], update_for("a"))
            .await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn overlapping_topics_deliver_once() {
        let bus = EventBus::default();
        let (_id, mut rx) = bus
            .subscribe(vec![Topic::License("a".to_string()), Topic::Plan(Plan::Basic)])
            .await;

        // Published to both of the subscriber's topics in one write.
        bus.publish(
            &[Topic::License("a".to_string()), Topic::Plan(Plan::Basic)],
            update_for("a"),
        )
        .await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "message must arrive exactly once");
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_not_blocked() {
        let bus = EventBus::new(2);
        let (slow, _rx_kept_but_never_read) =
            bus.subscribe(vec![Topic::Admin]).await;
        let (_fast, mut rx_fast) = bus.subscribe(vec![Topic::Admin]).await;

        // Fill the slow subscriber's queue, then overflow it.
        let mut evicted = Vec::new();
        for _ in 0..3 {
            evicted = bus
                .publish(
                    &[Topic::Admin],
                    BusMessage::SystemNotification {
                        message: "tick".to_string(),
                        payload: serde_json::json!({}),
                    },
                )
                .await;
        }

        assert_eq!(evicted, vec![slow]);
        assert_eq!(bus.subscriber_count().await, 1);

        // The fast subscriber saw every message.
        for _ in 0..3 {
            assert!(rx_fast.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn dropped_receiver_is_cleaned_up_on_publish() {
        let bus = EventBus::default();
        let (id, rx) = bus.subscribe(vec![Topic::Admin]).await;
        drop(rx);

        let evicted = bus
            .publish(
                &[Topic::Admin],
                BusMessage::SystemNotification {
                    message: "hello".to_string(),
                    payload: serde_json::json!({}),
                },
            )
            .await;

        assert_eq!(evicted, vec![id]);
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::default();
        let (id, _rx) = bus.subscribe(vec![Topic::Admin]).await;
        bus.unsubscribe(id).await;
        bus.unsubscribe(id).await;
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[test]
    fn message_kinds_match_gateway_envelope_types() {
        assert_eq!(update_for("x").kind(), "license_update");
        assert_eq!(
            BusMessage::ExpiryWarning {
                client_id: "x".to_string(),
                urgency: "high".to_string(),
                days_remaining: 1,
            }
            .kind(),
            "license_expiry_warning"
        );
    }

    #[test]
    fn topic_display_forms() {
        assert_eq!(Topic::License("c1".to_string()).to_string(), "license:c1");
        assert_eq!(Topic::Plan(Plan::Premium).to_string(), "plan:premium");
        assert_eq!(Topic::Admin.to_string(), "admin");
    }
}
