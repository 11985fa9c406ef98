// =============================================================================
// WebSocket Handler — viewer channels
// =============================================================================
//
// Viewers connect to `/ws` and receive:
//   1. An immediate full snapshot on connect.
//   2. A full snapshot on every registry change and on expiry evictions,
//      pushed through the fanout.
//
// The handler also:
//   - Services `{ "type": "get_signals" }` refresh requests with a snapshot
//     sent to that viewer only.
//   - Responds to Ping frames with Pong frames.
//   - Unregisters from the fanout on every exit path.
//
// The socket's send half is driven from this task alone: pushed snapshots
// arrive over the viewer's fanout channel and are forwarded here, so a stalled
// peer only ever backs up its own channel.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::app_state::AppState;

// =============================================================================
// Viewer requests
// =============================================================================

/// Messages a viewer may send, dispatched on the `type` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ViewerRequest {
    GetSignals,
}

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single viewer connection lifecycle.
///
/// Runs a `tokio::select!` loop over two sources:
///   1. **Outbound** — snapshots pushed into this viewer's fanout channel.
///   2. **Inbound** — frames from the viewer (refresh requests, Ping, Close).
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (viewer_id, mut outbound) = state.fanout.register();
    info!(viewer = %viewer_id, viewers = state.fanout.viewer_count(), "viewer connected");

    // Send the current signal set immediately to the new viewer.
    state.send_snapshot_to(viewer_id);

    loop {
        tokio::select! {
            // ── Outbound: drain pushed snapshots into the socket ────────
            pushed = outbound.recv() => {
                match pushed {
                    Some(msg) => {
                        let closing = matches!(msg, Message::Close(_));
                        if let Err(e) = sink.send(msg).await {
                            debug!(viewer = %viewer_id, error = %e, "send failed — disconnecting");
                            break;
                        }
                        if closing {
                            info!(viewer = %viewer_id, "close frame sent — shutting viewer down");
                            break;
                        }
                    }
                    // Fanout dropped our handle (shutdown or prune).
                    None => break,
                }
            }

            // ── Inbound: process viewer frames ──────────────────────────
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ViewerRequest>(&text) {
                            Ok(ViewerRequest::GetSignals) => {
                                debug!(viewer = %viewer_id, "refresh requested");
                                state.send_snapshot_to(viewer_id);
                            }
                            Err(e) => {
                                // Not a protocol error worth dropping the viewer for.
                                debug!(viewer = %viewer_id, error = %e, "unrecognised viewer message ignored");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = sink.send(Message::Pong(data)).await {
                            debug!(viewer = %viewer_id, error = %e, "pong failed — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!(viewer = %viewer_id, "pong received");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(viewer = %viewer_id, "viewer closed the connection");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(viewer = %viewer_id, "binary frame ignored");
                    }
                    Some(Err(e)) => {
                        warn!(viewer = %viewer_id, error = %e, "receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!(viewer = %viewer_id, "viewer stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.fanout.unregister(viewer_id);
    info!(viewer = %viewer_id, viewers = state.fanout.viewer_count(), "viewer disconnected");
}

// =============================================================================
// Tests
// =============================================================================
