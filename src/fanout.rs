// =============================================================================
// Broadcast Fanout — explicit viewer channel registry
// =============================================================================
//
// Every connected viewer owns one unbounded mpsc channel. The fanout holds the
// sender half; the viewer's WebSocket task drains the receiver half into the
// socket. Pushing a snapshot therefore never does network I/O and never blocks
// on a slow viewer — delivery is best-effort and unordered across channels.
//
// A sender whose receiver has gone away (the connection task exited) fails the
// send; such handles are pruned lazily during the next broadcast. Disconnect
// races are expected and normal, not errors.
// =============================================================================

use std::collections::HashMap;

use axum::extract::ws::Message;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app_state::SignalsUpdate;

/// Identifier of one connected viewer.
pub type ViewerId = Uuid;

/// Registry of active viewer output handles.
pub struct ViewerFanout {
    viewers: RwLock<HashMap<ViewerId, mpsc::UnboundedSender<Message>>>,
}

impl ViewerFanout {
    pub fn new() -> Self {
        Self {
            viewers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new viewer. Returns its id and the receiver half the
    /// connection task must drain into the socket.
    pub fn register(&self) -> (ViewerId, mpsc::UnboundedReceiver<Message>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.viewers.write().insert(id, tx);
        (id, rx)
    }

    /// Drop a viewer's handle. Safe to call for an already-pruned id.
    pub fn unregister(&self, id: ViewerId) {
        self.viewers.write().remove(&id);
    }

    /// Number of currently registered viewers.
    pub fn viewer_count(&self) -> usize {
        self.viewers.read().len()
    }

    /// Push `update` to every registered viewer, pruning dead handles.
    pub fn broadcast(&self, update: &SignalsUpdate) {
        let json = match serde_json::to_string(update) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize snapshot — broadcast skipped");
                return;
            }
        };

        let mut viewers = self.viewers.write();
        let before = viewers.len();
        viewers.retain(|id, tx| {
            let ok = tx.send(Message::Text(json.clone())).is_ok();
            if !ok {
                debug!(viewer = %id, "viewer channel closed — pruned");
            }
            ok
        });

        debug!(
            viewers = viewers.len(),
            pruned = before - viewers.len(),
            count = update.count,
            "snapshot broadcast"
        );
    }

    /// Push `update` to a single viewer. Returns false if the viewer is gone.
    pub fn send_to(&self, id: ViewerId, update: &SignalsUpdate) -> bool {
        let json = match serde_json::to_string(update) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize snapshot — send skipped");
                return false;
            }
        };

        let viewers = self.viewers.read();
        match viewers.get(&id) {
            Some(tx) => tx.send(Message::Text(json)).is_ok(),
            None => false,
        }
    }

    /// Send a Close frame to every viewer and clear the registry. Used during
    /// graceful shutdown so connection tasks can finish their close handshake.
    pub fn close_all(&self) {
        let mut viewers = self.viewers.write();
        for (id, tx) in viewers.drain() {
            if tx.send(Message::Close(None)).is_err() {
                debug!(viewer = %id, "viewer already gone during shutdown");
            }
        }
    }
}

impl Default for ViewerFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ViewerFanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerFanout")
            .field("viewers", &self.viewers.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
