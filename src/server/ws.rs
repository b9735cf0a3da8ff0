use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use super::api::SharedState;
use super::hub::Update;
use crate::snapshot::Snapshot;

/// How often to send WebSocket Ping frames.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

// ── WebSocket message types ──────────────────────────────────────────

/// Messages pushed to viewers. Viewers never send application messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum WsMessage {
    TasksUpdate(Snapshot),
}

/// Serialize-only view of [`WsMessage`] over a borrowed snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub(crate) enum WsMessageRef<'a> {
    TasksUpdate(&'a Snapshot),
}

/// Ping cadence for viewer connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub ping_interval: Duration,
    /// A viewer that has not answered a ping within this window is dropped.
    pub pong_timeout: Duration,
}

impl Keepalive {
    pub fn from_interval(ping_interval: Duration) -> Self {
        let ping_interval = ping_interval.max(Duration::from_millis(1));
        Self {
            ping_interval,
            pong_timeout: ping_interval * 2,
        }
    }
}

impl Default for Keepalive {
    fn default() -> Self {
        Self::from_interval(PING_INTERVAL)
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

/// Upgrade to a viewer connection. Plain HTTP requests get a 426 hint.
pub async fn ws_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<SharedState>,
) -> Response {
    match upgrade {
        Ok(ws) => ws
            .on_upgrade(move |socket| handle_socket(socket, state))
            .into_response(),
        Err(_) => (
            StatusCode::UPGRADE_REQUIRED,
            "taskboard sync server: open a WebSocket connection on /ws\n",
        )
            .into_response(),
    }
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let viewer = state.hub.attach();
    let id = viewer.id;
    info!(viewer = %id, viewers = state.hub.viewer_count(), "viewer connected");

    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, viewer.updates, state.keepalive).await;

    state.hub.detach(id);
    info!(viewer = %id, viewers = state.hub.viewer_count(), "viewer disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards hub updates in order, watches the client side for pongs and
/// close frames, and pings on every tick. The loop ends when the hub drops
/// the viewer, the client goes away, or a pong is overdue.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut updates: mpsc::Receiver<Update>,
    keepalive: Keepalive,
) {
    let mut ping_interval = tokio::time::interval(keepalive.ping_interval);
    // No ping on connect.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > keepalive.pong_timeout {
                    debug!("pong overdue, dropping viewer");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            update = updates.recv() => {
                let Some(json) = update else {
                    debug!("hub closed the update stream");
                    break;
                };
                if sender.send(Message::Text(json.as_str().into())).await.is_err() {
                    break;
                }
            }

            // Viewers only ever send control frames.
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Tests ────────────────────────────────────────────────────────────
