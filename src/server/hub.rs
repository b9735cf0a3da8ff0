//! Snapshot fan-out to attached viewers.
//!
//! Every viewer owns a bounded queue. `publish` serializes the update once
//! and `try_send`s it to each queue, so a stalled viewer never blocks the
//! publisher or its peers. A viewer whose queue is closed or full is
//! detached on the spot; it reconnects and refetches on its own.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

use super::ws::WsMessageRef;
use crate::errors::SyncError;
use crate::snapshot::Snapshot;

pub type ViewerId = Uuid;

/// A serialized `tasks-update` envelope, shared by all recipients.
pub type Update = Arc<String>;

/// Registration returned by [`BroadcastHub::attach`].
pub struct AttachedViewer {
    pub id: ViewerId,
    pub updates: mpsc::Receiver<Update>,
}

/// Outcome of one [`BroadcastHub::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub detached: usize,
}

#[derive(Default)]
struct HubState {
    viewers: HashMap<ViewerId, mpsc::Sender<Update>>,
    current: Option<Arc<Snapshot>>,
}

pub struct BroadcastHub {
    buffer: usize,
    state: Mutex<HubState>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl BroadcastHub {
    /// `buffer` is the number of updates a viewer may lag behind.
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            state: Mutex::new(HubState::default()),
        }
    }

    /// Register a viewer. It receives every update published from now on;
    /// earlier updates are not replayed.
    pub fn attach(&self) -> AttachedViewer {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        let mut state = self.state.lock();
        state.viewers.insert(id, tx);
        debug!(viewer = %id, viewers = state.viewers.len(), "viewer attached");
        AttachedViewer { id, updates: rx }
    }

    /// Remove a viewer. Returns whether it was still attached.
    pub fn detach(&self, id: ViewerId) -> bool {
        let mut state = self.state.lock();
        let removed = state.viewers.remove(&id).is_some();
        if removed {
            debug!(viewer = %id, viewers = state.viewers.len(), "viewer detached");
        }
        removed
    }

    /// Make `snapshot` current and queue it for every attached viewer.
    ///
    /// The lock is held for the whole fan-out, so concurrent publishes
    /// reach each viewer in call order.
    pub fn publish(&self, snapshot: Snapshot) -> PublishReport {
        let message = match serde_json::to_string(&WsMessageRef::TasksUpdate(&snapshot)) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(error = %e, "failed to serialize tasks update");
                return PublishReport::default();
            }
        };

        let mut state = self.state.lock();
        state.current = Some(Arc::new(snapshot));

        let mut report = PublishReport::default();
        let mut failed = Vec::new();
        for (id, tx) in &state.viewers {
            match tx.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    let reason = match e {
                        TrySendError::Full(_) => "queue full",
                        TrySendError::Closed(_) => "connection closed",
                    };
                    let err = SyncError::ViewerSendFailed {
                        viewer: id.to_string(),
                    };
                    warn!(error = %err, reason, "detaching viewer");
                    failed.push(*id);
                }
            }
        }
        for id in failed {
            state.viewers.remove(&id);
            report.detached += 1;
        }

        debug!(
            recipients = report.delivered,
            detached = report.detached,
            "published tasks update"
        );
        report
    }

    /// The most recently published snapshot.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.state.lock().current.clone()
    }

    pub fn viewer_count(&self) -> usize {
        self.state.lock().viewers.len()
    }

    pub fn is_attached(&self, id: ViewerId) -> bool {
        self.state.lock().viewers.contains_key(&id)
    }

    /// Detach everyone. Each viewer's queue closes once drained, which ends
    /// its connection loop.
    pub fn close_all(&self) -> usize {
        let mut state = self.state.lock();
        let count = state.viewers.len();
        state.viewers.clear();
        count
    }
}
