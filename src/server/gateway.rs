//! Real-time gateway: one long-lived WebSocket per client.
//!
//! Connection lifecycle:
//!
//! ```text
//!   new → identified → subscribed → (alive ⇆ pinging) → closed
//! ```
//!
//! A connection must identify within the configured deadline (default 20 s)
//! or it is closed. Identification subscribes the connection to
//! `license:{client_id}` and `plan:{plan}`; administrators additionally get
//! `admin`. After that, bus messages are forwarded as they arrive.
//!
//! Messages in both directions use one envelope: `{type, payload,
//! timestamp}`. Unknown inbound kinds are ignored, not guessed. The gateway
//! never replays history — a reconnecting client re-identifies and issues a
//! `check` to re-sync.
//!
//! Heartbeat: clients ping at the configured interval; two missed intervals
//! close the connection. A subscriber evicted by the bus for falling behind
//! is closed with reason `slow_consumer`.

use std::borrow::Cow;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use serde::Deserialize;
use serde_json::json;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::server::events::Topic;
use crate::server::handlers::{AppState, LicenseView};
use crate::server::service::CheckError;

/// Close code used for protocol-level disconnects (policy violation).
const CLOSE_POLICY: u16 = 1008;
/// Close code for a subscriber that could not keep up.
const CLOSE_OVERLOAD: u16 = 1013;

/// Inbound message envelope. `payload` defaults to null for bare pings.
#[derive(Debug, Deserialize)]
struct Inbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Payload of the `identify` message.
#[derive(Debug, Deserialize)]
struct Identify {
    client_id: Option<String>,
    #[serde(default)]
    version: Option<String>,
    /// "client" (default) or "admin"
    #[serde(rename = "type", default)]
    kind: Option<String>,
    /// Admin session token, required for admin connections
    #[serde(default)]
    token: Option<String>,
}

/// Payload of the `check_license` message.
#[derive(Debug, Deserialize)]
struct CheckLicense {
    client_id: Option<String>,
    token: Option<String>,
}

/// Upgrade handler.
///
/// `GET /ws`
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn envelope(state: &AppState, kind: &str, payload: serde_json::Value) -> String {
    json!({
        "type": kind,
        "payload": payload,
        "timestamp": state.clock.now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    })
    .to_string()
}

async fn send_text(sender: &mut SplitSink<WebSocket, Message>, text: String) -> bool {
    sender.send(Message::Text(text)).await.is_ok()
}

async fn close_with(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })))
        .await;
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    if !send_text(&mut sender, envelope(&state, "welcome", json!({}))).await {
        return;
    }

    // --- identify phase ---
    let identify_deadline = Duration::from_secs(state.gateway.identify_timeout_secs);
    let identify = match timeout(identify_deadline, read_identify(&mut receiver)).await {
        Ok(Some(identify)) => identify,
        Ok(None) => return,
        Err(_) => {
            close_with(&mut sender, CLOSE_POLICY, "identify_timeout").await;
            return;
        }
    };

    let is_admin = identify.kind.as_deref() == Some("admin");
    let Some(client_id) = identify.client_id.clone() else {
        close_with(&mut sender, CLOSE_POLICY, "missing_client_id").await;
        return;
    };

    let topics = if is_admin {
        let authorized = identify
            .token
            .as_deref()
            .map(|t| state.auth.sessions.validate_token(t).is_ok())
            .unwrap_or(false);
        if !authorized {
            close_with(&mut sender, CLOSE_POLICY, "unauthorized").await;
            return;
        }
        // Admins get the operator feed on top of the per-client topics.
        // A pure dashboard identifying with an id that names no license
        // keeps the operator feed only.
        let mut topics = vec![Topic::Admin];
        match state.db.get(&client_id).await {
            Ok(Some(license)) => {
                topics.push(Topic::License(client_id.clone()));
                topics.push(Topic::Plan(license.plan));
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Gateway admin identify lookup failed: {e}");
            }
        }
        topics
    } else {
        let license = match state.db.get(&client_id).await {
            Ok(Some(license)) => license,
            Ok(None) => {
                close_with(&mut sender, CLOSE_POLICY, "unknown_client").await;
                return;
            }
            Err(e) => {
                warn!("Gateway identify lookup failed: {e}");
                close_with(&mut sender, CLOSE_POLICY, "server_error").await;
                return;
            }
        };
        vec![
            Topic::License(client_id.clone()),
            Topic::Plan(license.plan),
        ]
    };

    let (subscriber_id, mut rx) = state.bus.subscribe(topics).await;
    info!(
        "Gateway connection identified: client_id={} admin={} version={:?}",
        client_id, is_admin, identify.version
    );

    if !send_text(
        &mut sender,
        envelope(
            &state,
            "identified",
            json!({ "client_id": client_id, "admin": is_admin }),
        ),
    )
    .await
    {
        state.bus.unsubscribe(subscriber_id).await;
        return;
    }

    // --- subscribed phase ---
    let ping_every = Duration::from_secs(state.gateway.ping_interval_secs);
    let mut heartbeat = tokio::time::interval(ping_every);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await; // first tick completes immediately
    let mut last_ping = Instant::now();

    loop {
        tokio::select! {
            forwarded = rx.recv() => match forwarded {
                Some(message) => {
                    let text = envelope(&state, message.kind(), message.payload());
                    if !send_text(&mut sender, text).await {
                        break;
                    }
                }
                None => {
                    // Evicted by the bus: this connection fell behind.
                    warn!("Gateway connection for {} dropped as slow consumer", client_id);
                    close_with(&mut sender, CLOSE_OVERLOAD, "slow_consumer").await;
                    break;
                }
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if handle_inbound(&state, &mut sender, &text, &mut last_ping).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // binary and transport-level ping/pong frames are ignored
                Some(Err(_)) => break,
            },
            _ = heartbeat.tick() => {
                if last_ping.elapsed() > 2 * ping_every {
                    debug!("Gateway connection for {} missed two ping intervals", client_id);
                    close_with(&mut sender, CLOSE_POLICY, "heartbeat_timeout").await;
                    break;
                }
            },
            _ = state.shutdown.cancelled() => {
                close_with(&mut sender, CLOSE_POLICY, "server_shutdown").await;
                break;
            }
        }
    }

    state.bus.unsubscribe(subscriber_id).await;
    debug!("Gateway connection for {} closed", client_id);
}

/// Read frames until an `identify` envelope arrives. Other pre-identify
/// messages are ignored.
async fn read_identify(receiver: &mut SplitStream<WebSocket>) -> Option<Identify> {
    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => {
                let Ok(inbound) = serde_json::from_str::<Inbound>(&text) else {
                    continue;
                };
                if inbound.kind == "identify" {
                    return serde_json::from_value(inbound.payload).ok();
                }
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Dispatch one inbound envelope. Returns `Err(())` when the connection
/// should close.
async fn handle_inbound(
    state: &AppState,
    sender: &mut SplitSink<WebSocket, Message>,
    text: &str,
    last_ping: &mut Instant,
) -> Result<(), ()> {
    let Ok(inbound) = serde_json::from_str::<Inbound>(text) else {
        return Ok(()); // malformed frames are dropped, not fatal
    };

    match inbound.kind.as_str() {
        "ping" => {
            *last_ping = Instant::now();
            if !send_text(sender, envelope(state, "pong", json!({}))).await {
                return Err(());
            }
        }
        "check_license" => {
            let request: CheckLicense = match serde_json::from_value(inbound.payload) {
                Ok(request) => request,
                Err(_) => return Ok(()),
            };
            let (Some(client_id), Some(token)) = (request.client_id, request.token) else {
                return Ok(());
            };

            // Compact equivalent of the REST check: same service call, same
            // outcome, delivered over the open channel.
            let payload = match state.service.check(&client_id, &token, None).await {
                Ok(success) => {
                    let now = state.clock.now();
                    json!({
                        "action": "check_result",
                        "valid": true,
                        "license": LicenseView::from_license(&success.license, now),
                    })
                }
                Err(CheckError::Denied(denial)) => {
                    let api: crate::server::api_error::ApiError = denial.into();
                    json!({
                        "action": "check_result",
                        "valid": false,
                        "error": api.error,
                    })
                }
                Err(CheckError::Storage(e)) => {
                    warn!("Gateway check_license storage failure: {e}");
                    json!({
                        "action": "check_result",
                        "valid": false,
                        "error": { "code": "STORAGE_UNAVAILABLE" },
                    })
                }
            };

            if !send_text(sender, envelope(state, "license_update", payload)).await {
                return Err(());
            }
        }
        "identify" => {} // already identified; repeated identifies are ignored
        other => {
            debug!("Gateway ignoring unknown message type '{other}'");
        }
    }

    Ok(())
}
