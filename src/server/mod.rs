//! HTTP and WebSocket surface of the sync server.
//!
//! - `GET /ws` (and `GET /`): viewer WebSocket, receives `tasks-update` pushes
//! - `GET /api/tasks`: initial fetch of the tasks file
//! - `GET /api/board`: server-computed board of the current snapshot
//! - `GET /health`

pub mod api;
pub mod hub;
pub mod lifecycle;
pub mod ws;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

pub use api::{AppState, SharedState};
pub use hub::{BroadcastHub, ViewerId};
pub use lifecycle::{ServerState, SyncServer};
pub use ws::{Keepalive, WsMessage};

/// Build the full application router.
///
/// `cross_origin` adds a permissive CORS layer, used when the server is
/// reachable from other hosts.
pub fn build_router(state: Arc<AppState>, cross_origin: bool) -> Router {
    let app = api::api_router()
        .route("/ws", get(ws::ws_handler))
        .route("/", get(ws::ws_handler))
        .with_state(state);

    if cross_origin {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
