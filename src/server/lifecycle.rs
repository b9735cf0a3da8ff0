//! Server lifecycle: `Starting → Listening → ShuttingDown → Stopped`.
//!
//! [`SyncServer::start`] allocates a port, binds it (re-allocating on a
//! lost race), starts the watcher with the hub as its sink, and spawns the
//! HTTP/WebSocket server. [`SyncServer::shutdown`] runs the stop sequence
//! with a grace period per step.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api::AppState;
use super::build_router;
use super::hub::BroadcastHub;
use super::ws::Keepalive;
use crate::config::TaskboardConfig;
use crate::errors::SyncError;
use crate::port::PortAllocator;
use crate::snapshot::Snapshot;
use crate::watcher::SnapshotWatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Listening,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Starting => "starting",
            ServerState::Listening => "listening",
            ServerState::ShuttingDown => "shutting-down",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// A running sync server. Dropping it without [`SyncServer::shutdown`]
/// cancels the HTTP server and stops the watcher abruptly.
pub struct SyncServer {
    addr: SocketAddr,
    tasks_path: PathBuf,
    hub: Arc<BroadcastHub>,
    watcher: Arc<SnapshotWatcher>,
    state_tx: watch::Sender<ServerState>,
    serve_cancel: CancellationToken,
    stop_requested: CancellationToken,
    server_task: Option<JoinHandle<std::io::Result<()>>>,
    grace: Duration,
}

impl SyncServer {
    /// Start serving `tasks_path` on the configured host and port range.
    pub async fn start(config: &TaskboardConfig, tasks_path: PathBuf) -> Result<Self, SyncError> {
        let allocator = PortAllocator::new(config.server.host);
        Self::start_with_allocator(config, tasks_path, allocator).await
    }

    pub async fn start_with_allocator(
        config: &TaskboardConfig,
        tasks_path: PathBuf,
        allocator: PortAllocator,
    ) -> Result<Self, SyncError> {
        let (state_tx, _) = watch::channel(ServerState::Starting);

        let listener =
            bind_listener(&allocator, config.server.port, config.server.bind_attempts).await?;
        let addr = listener.local_addr().map_err(|e| SyncError::ServerStartupFailed {
            attempts: 1,
            source: e,
        })?;

        let hub = Arc::new(BroadcastHub::new(config.server.viewer_buffer));
        let watcher = Arc::new(SnapshotWatcher::new(config.watch.debounce()));
        {
            let hub = Arc::clone(&hub);
            if let Err(e) = watcher.start(&tasks_path, move |snapshot: Snapshot| {
                hub.publish(snapshot);
            }) {
                // Serve anyway; viewers still get the initial fetch.
                warn!(error = %e, "live updates disabled");
            }
        }

        let state = Arc::new(AppState {
            hub: Arc::clone(&hub),
            tasks_path: tasks_path.clone(),
            keepalive: Keepalive::from_interval(config.server.ping_interval()),
        });
        let app = build_router(state, !config.server.host.is_loopback());

        let serve_cancel = CancellationToken::new();
        let shutdown = serve_cancel.clone();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled_owned().await })
                .await
        });

        info!(%addr, path = %tasks_path.display(), "sync server listening");
        state_tx.send_replace(ServerState::Listening);

        Ok(Self {
            addr,
            tasks_path,
            hub,
            watcher,
            state_tx,
            serve_cancel,
            stop_requested: CancellationToken::new(),
            server_task: Some(server_task),
            grace: config.server.shutdown_grace(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn tasks_path(&self) -> &std::path::Path {
        &self.tasks_path
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn state(&self) -> ServerState {
        *self.state_tx.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state_tx.subscribe()
    }

    /// Token that makes [`SyncServer::run_until_signal`] return as if
    /// interrupted.
    pub fn stop_handle(&self) -> CancellationToken {
        self.stop_requested.clone()
    }

    /// Serve until Ctrl+C or the stop handle fires, then shut down.
    pub async fn run_until_signal(mut self) -> ServerState {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for interrupt signal");
                }
                info!("interrupt received, shutting down");
            }
            _ = self.stop_requested.cancelled() => {
                info!("stop requested, shutting down");
            }
        }
        self.shutdown().await
    }

    /// Stop the watcher, close viewers, then release the port. Each step
    /// waits at most the configured grace period. Safe to call twice.
    pub async fn shutdown(&mut self) -> ServerState {
        if self.state() == ServerState::Stopped {
            return ServerState::Stopped;
        }
        self.state_tx.send_replace(ServerState::ShuttingDown);

        let watcher = Arc::clone(&self.watcher);
        let stop = tokio::task::spawn_blocking(move || watcher.stop());
        if tokio::time::timeout(self.grace, stop).await.is_err() {
            warn!(grace = ?self.grace, "watcher did not stop in time, continuing");
        }

        let closed = self.hub.close_all();
        debug!(viewers = closed, "closed viewer connections");

        self.serve_cancel.cancel();
        if let Some(mut task) = self.server_task.take() {
            match tokio::time::timeout(self.grace, &mut task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!(error = %e, "server exited with error"),
                Ok(Err(e)) => warn!(error = %e, "server task failed"),
                Err(_) => {
                    warn!(grace = ?self.grace, "server did not drain in time, aborting");
                    task.abort();
                }
            }
        }

        info!(addr = %self.addr, "sync server stopped");
        self.state_tx.send_replace(ServerState::Stopped);
        ServerState::Stopped
    }
}

impl Drop for SyncServer {
    fn drop(&mut self) {
        self.serve_cancel.cancel();
        self.hub.close_all();
    }
}

/// Allocate and bind, re-allocating when the port is taken between the
/// scan and the bind.
async fn bind_listener(
    allocator: &PortAllocator,
    preferred: u16,
    attempts: u32,
) -> Result<TcpListener, SyncError> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        // Scanning binds up to a thousand sockets; keep it off the runtime.
        let allocator = *allocator;
        let port = tokio::task::spawn_blocking(move || allocator.allocate(preferred))
            .await
            .map_err(|e| SyncError::ServerStartupFailed {
                attempts: attempt,
                source: std::io::Error::other(e),
            })??;
        match TcpListener::bind(SocketAddr::new(allocator.host(), port)).await {
            Ok(listener) => {
                if port != preferred {
                    info!(preferred, port, "preferred port unavailable, using next free port");
                }
                return Ok(listener);
            }
            Err(e) => {
                warn!(attempt, port, error = %e, "bind failed, allocating again");
                last_error = Some(e);
            }
        }
    }

    Err(SyncError::ServerStartupFailed {
        attempts,
        source: last_error.unwrap_or_else(|| std::io::Error::other("no bind attempted")),
    })
}
