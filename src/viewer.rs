//! Viewer-side client: initial fetch plus live updates, reconnecting after
//! a fixed delay whenever the connection drops.
//!
//! The connection is an explicit state machine
//! (`Connecting → Connected → WaitingToRetry → Connecting`) driven by
//! [`ReconnectState::on`]. Every wait in the loop races the cancellation
//! token, so [`ViewerClient::stop`] ends [`ViewerClient::run`] promptly from
//! any state.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use futures::StreamExt;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::WsMessage;
use crate::snapshot::Snapshot;

/// Delay between a lost connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Upper bound on one initial-fetch request.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    Connecting,
    Connected,
    WaitingToRetry,
}

/// Inputs to the reconnect state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    ConnectFailed,
    Closed,
    RetryElapsed,
}

impl ReconnectState {
    /// Next state after `event`. Events that make no sense in the current
    /// state leave it unchanged.
    pub fn on(self, event: ConnectionEvent) -> Self {
        use ConnectionEvent::*;
        use ReconnectState::*;
        match (self, event) {
            (Connecting, Opened) => Connected,
            (Connecting, ConnectFailed) => WaitingToRetry,
            (Connected, Closed) => WaitingToRetry,
            (WaitingToRetry, RetryElapsed) => Connecting,
            (state, _) => state,
        }
    }
}

/// Why the initial fetch did not produce a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    /// HTTP status, `None` when the request never got a response.
    pub status: Option<u16>,
    pub error: String,
    /// Tasks file path the server tried to read.
    pub path: Option<String>,
    pub details: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

/// What a viewer renders.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    /// Result of the fetch made right after each (re)connect.
    Initial(Snapshot),
    FetchFailed(FetchFailure),
    /// Pushed by the server after a file change.
    Update(Snapshot),
    StateChanged(ReconnectState),
}

pub struct ViewerClient {
    ws_url: Url,
    tasks_url: Url,
    reconnect_delay: Duration,
    http: reqwest::Client,
    state_tx: watch::Sender<ReconnectState>,
    cancel: CancellationToken,
}

impl ViewerClient {
    /// `ws_url` is the server socket, e.g. `ws://127.0.0.1:5000/ws`. The
    /// initial-fetch URL is derived from it.
    pub fn new(ws_url: &str, reconnect_delay: Duration) -> Result<Self> {
        let ws_url = Url::parse(ws_url).with_context(|| format!("Invalid viewer URL '{}'", ws_url))?;
        let tasks_url = tasks_url_for(&ws_url)?;
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        let (state_tx, _) = watch::channel(ReconnectState::Connecting);
        Ok(Self {
            ws_url,
            tasks_url,
            reconnect_delay,
            http,
            state_tx,
            cancel: CancellationToken::new(),
        })
    }

    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }

    pub fn tasks_url(&self) -> &Url {
        &self.tasks_url
    }

    pub fn state(&self) -> ReconnectState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ReconnectState> {
        self.state_tx.subscribe()
    }

    /// Ends [`ViewerClient::run`], interrupting any pending retry delay.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Connect, fetch, stream updates, and reconnect until stopped.
    pub async fn run<F>(&self, mut on_event: F)
    where
        F: FnMut(ViewerEvent),
    {
        let mut state = self.state();
        while !self.cancel.is_cancelled() {
            let event = match state {
                ReconnectState::Connecting => {
                    let connected = tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        result = connect_async(self.ws_url.as_str()) => result,
                    };
                    match connected {
                        Ok((stream, _)) => {
                            info!(url = %self.ws_url, "connected");
                            state = self.transition(state, ConnectionEvent::Opened, &mut on_event);
                            let fetched = tokio::select! {
                                _ = self.cancel.cancelled() => break,
                                result = fetch_tasks(&self.http, &self.tasks_url) => result,
                            };
                            report_fetch(fetched, &mut on_event);
                            self.stream_updates(stream, &mut on_event).await;
                            ConnectionEvent::Closed
                        }
                        Err(e) => {
                            warn!(url = %self.ws_url, error = %e, "connection failed");
                            ConnectionEvent::ConnectFailed
                        }
                    }
                }
                ReconnectState::Connected => ConnectionEvent::Closed,
                ReconnectState::WaitingToRetry => {
                    debug!(delay = ?self.reconnect_delay, "waiting before reconnect");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => ConnectionEvent::RetryElapsed,
                    }
                }
            };
            state = self.transition(state, event, &mut on_event);
        }
    }

    fn transition<F: FnMut(ViewerEvent)>(
        &self,
        state: ReconnectState,
        event: ConnectionEvent,
        on_event: &mut F,
    ) -> ReconnectState {
        let next = state.on(event);
        if next != state {
            self.state_tx.send_replace(next);
            on_event(ViewerEvent::StateChanged(next));
        }
        next
    }

    async fn stream_updates<S, F>(&self, mut stream: S, on_event: &mut F)
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
        F: FnMut(ViewerEvent),
    {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return,
                frame = stream.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<WsMessage>(text.as_str()) {
                    Ok(WsMessage::TasksUpdate(snapshot)) => on_event(ViewerEvent::Update(snapshot)),
                    Err(e) => warn!(error = %e, "ignoring malformed update"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("connection closed by server");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "connection lost");
                    return;
                }
            }
        }
    }
}

fn report_fetch<F: FnMut(ViewerEvent)>(fetched: Result<Snapshot, FetchFailure>, on_event: &mut F) {
    match fetched {
        Ok(snapshot) => on_event(ViewerEvent::Initial(snapshot)),
        Err(failure) => {
            warn!(error = %failure.error, path = ?failure.path, "initial fetch failed");
            on_event(ViewerEvent::FetchFailed(failure));
        }
    }
}

/// `ws://host:port/...` → `http://host:port/api/tasks`.
fn tasks_url_for(ws_url: &Url) -> Result<Url> {
    let scheme = match ws_url.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => return Err(anyhow!("Unsupported viewer URL scheme '{}'", other)),
    };
    let mut url = ws_url.clone();
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("Cannot derive HTTP URL from '{}'", ws_url))?;
    url.set_path("/api/tasks");
    url.set_query(None);
    Ok(url)
}

/// One initial-fetch request against `/api/tasks`.
pub async fn fetch_tasks(http: &reqwest::Client, url: &Url) -> Result<Snapshot, FetchFailure> {
    let response = http.get(url.clone()).send().await.map_err(|e| FetchFailure {
        status: None,
        error: "Failed to reach server".to_string(),
        path: None,
        details: Some(e.to_string()),
    })?;

    let status = response.status();
    if status == StatusCode::OK {
        return response.json::<Snapshot>().await.map_err(|e| FetchFailure {
            status: Some(status.as_u16()),
            error: "Invalid tasks payload".to_string(),
            path: None,
            details: Some(e.to_string()),
        });
    }

    let failure = match response.json::<ErrorBody>().await {
        Ok(body) => FetchFailure {
            status: Some(status.as_u16()),
            error: body.error,
            path: body.path,
            details: body.details.map(|d| match d {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            }),
        },
        Err(_) => FetchFailure {
            status: Some(status.as_u16()),
            error: format!("Unexpected response: {}", status),
            path: None,
            details: None,
        },
    };
    Err(failure)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_cycle() {
        let state = ReconnectState::Connecting;
        let state = state.on(ConnectionEvent::Opened);
        assert_eq!(state, ReconnectState::Connected);
        let state = state.on(ConnectionEvent::Closed);
        assert_eq!(state, ReconnectState::WaitingToRetry);
        let state = state.on(ConnectionEvent::RetryElapsed);
        assert_eq!(state, ReconnectState::Connecting);
        assert_eq!(
            state.on(ConnectionEvent::ConnectFailed),
            ReconnectState::WaitingToRetry
        );
    }

    #[test]
    fn test_state_machine_ignores_out_of_order_events() {
        assert_eq!(
            ReconnectState::Connected.on(ConnectionEvent::RetryElapsed),
            ReconnectState::Connected
        );
        assert_eq!(
            ReconnectState::WaitingToRetry.on(ConnectionEvent::Opened),
            ReconnectState::WaitingToRetry
        );
        assert_eq!(
            ReconnectState::Connecting.on(ConnectionEvent::Closed),
            ReconnectState::Connecting
        );
    }

    #[test]
    fn test_tasks_url_derivation() {
        let client = ViewerClient::new("ws://127.0.0.1:5000/ws", DEFAULT_RECONNECT_DELAY).unwrap();
        assert_eq!(client.tasks_url().as_str(), "http://127.0.0.1:5000/api/tasks");

        let client = ViewerClient::new("wss://board.example:8443/?x=1", DEFAULT_RECONNECT_DELAY).unwrap();
        assert_eq!(client.tasks_url().as_str(), "https://board.example:8443/api/tasks");
    }

    #[test]
    fn test_invalid_urls_are_rejected() {
        assert!(ViewerClient::new("not a url", DEFAULT_RECONNECT_DELAY).is_err());
        let err = ViewerClient::new("ftp://host/ws", DEFAULT_RECONNECT_DELAY)
            .err()
            .unwrap();
        assert!(err.to_string().contains("ftp"));
    }

    fn unused_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_failed_connect_waits_and_stop_cancels_retry() {
        let url = format!("ws://127.0.0.1:{}/ws", unused_port());
        let client = ViewerClient::new(&url, Duration::from_secs(60)).unwrap();
        let mut states = client.subscribe_state();
        let stop = client.cancel_token();

        let run = async {
            let mut seen = Vec::new();
            client.run(|event| seen.push(event)).await;
            seen
        };
        let waiter = async {
            states
                .wait_for(|s| *s == ReconnectState::WaitingToRetry)
                .await
                .unwrap();
            stop.cancel();
        };

        let (seen, ()) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(run, waiter)
        })
        .await
        .unwrap();

        assert_eq!(
            seen,
            vec![ViewerEvent::StateChanged(ReconnectState::WaitingToRetry)]
        );
        assert_eq!(client.state(), ReconnectState::WaitingToRetry);
    }

    #[tokio::test]
    async fn test_retry_elapses_back_to_connecting() {
        let url = format!("ws://127.0.0.1:{}/ws", unused_port());
        let client = ViewerClient::new(&url, Duration::from_millis(10)).unwrap();
        let stop = client.cancel_token();

        let mut seen = Vec::new();
        tokio::time::timeout(
            Duration::from_secs(5),
            client.run(|event| {
                if event == ViewerEvent::StateChanged(ReconnectState::Connecting) {
                    stop.cancel();
                }
                seen.push(event);
            }),
        )
        .await
        .unwrap();

        assert_eq!(
            seen,
            vec![
                ViewerEvent::StateChanged(ReconnectState::WaitingToRetry),
                ViewerEvent::StateChanged(ReconnectState::Connecting),
            ]
        );
    }

    /// Upgrades `/ws` and holds the socket open; `/api/tasks` never answers.
    async fn stalling_server() -> std::net::SocketAddr {
        use axum::Router;
        use axum::extract::ws::WebSocketUpgrade;
        use axum::routing::get;

        let app = Router::new()
            .route(
                "/ws",
                get(|ws: WebSocketUpgrade| async move {
                    ws.on_upgrade(|socket| async move {
                        let _socket = socket;
                        std::future::pending::<()>().await;
                    })
                }),
            )
            .route(
                "/api/tasks",
                get(|| async { std::future::pending::<&'static str>().await }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        addr
    }

    #[tokio::test]
    async fn test_stop_during_initial_fetch_ends_run() {
        let addr = stalling_server().await;
        let client = ViewerClient::new(&format!("ws://{addr}/ws"), Duration::from_secs(60)).unwrap();
        let mut states = client.subscribe_state();
        let stop = client.cancel_token();

        let run = async {
            let mut seen = Vec::new();
            client.run(|event| seen.push(event)).await;
            seen
        };
        let stopper = async {
            states
                .wait_for(|s| *s == ReconnectState::Connected)
                .await
                .unwrap();
            // Let the fetch get in flight.
            tokio::time::sleep(Duration::from_millis(100)).await;
            stop.cancel();
        };

        let (seen, ()) = tokio::time::timeout(Duration::from_secs(3), async {
            tokio::join!(run, stopper)
        })
        .await
        .expect("run kept waiting on the initial fetch after stop");

        assert_eq!(seen, vec![ViewerEvent::StateChanged(ReconnectState::Connected)]);
    }

    #[tokio::test]
    async fn test_fetch_gives_up_after_timeout() {
        let addr = stalling_server().await;
        let url = Url::parse(&format!("http://{addr}/api/tasks")).unwrap();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();

        let failure = tokio::time::timeout(Duration::from_secs(3), fetch_tasks(&http, &url))
            .await
            .expect("fetch ignored the client timeout")
            .unwrap_err();
        assert_eq!(failure.status, None);
        assert_eq!(failure.error, "Failed to reach server");
    }

    #[tokio::test]
    async fn test_fetch_against_unreachable_server() {
        let url = Url::parse(&format!("http://127.0.0.1:{}/api/tasks", unused_port())).unwrap();
        let failure = fetch_tasks(&reqwest::Client::new(), &url).await.unwrap_err();
        assert_eq!(failure.status, None);
        assert!(failure.details.is_some());
    }
}
