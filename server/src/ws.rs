//! # Control Connection Handlers
//!
//! Contains the WebSocket side of the relay:
//! - Upgrading HTTP connections to WebSocket control connections
//! - Connection admission: claiming (or generating) a subdomain and
//!   registering the tunnel
//! - Dispatching incoming `response` frames to their pending exchanges
//! - Deregistering the tunnel on disconnect

use crate::state::{generate_subdomain, AppState, TunnelRegistration, TunnelResponse};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tunnel_protocol::ControlMessage;
use uuid::Uuid;

/// Handshake parameters carried in the upgrade request's query string.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// Subdomain requested by the agent; generated when absent.
    pub subdomain: Option<String>,
}

/// `GET /ws` — Upgrades the HTTP connection to a WebSocket control
/// connection. After the upgrade, the connection is handled by
/// [`handle_connection`].
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, params.subdomain, state))
}

// ─── Connection Lifecycle ───────────────────────────────────────

/// Manages the full lifecycle of a single control connection.
///
/// ## Flow:
/// 1. Resolve the subdomain (requested, or a generated token)
/// 2. Atomically claim the routing slot; on conflict send an `error`
///    frame and close without registering
/// 3. Send `connected` with the public tunnel URL
/// 4. Spawn an outbound task that serializes and sends queued messages
/// 5. Process incoming frames until the channel closes
/// 6. On disconnect: remove the registration owned by this connection
async fn handle_connection(socket: WebSocket, requested: Option<String>, state: AppState) {
    let subdomain = match requested {
        Some(name) if !name.is_empty() => name,
        _ => generate_subdomain(),
    };
    let connection_id = Uuid::new_v4().to_string();

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Create an unbounded channel for queueing outbound messages. The
    // proxy sends `request` frames to this tunnel via `tx`.
    let (tx, mut rx) = mpsc::unbounded_channel::<ControlMessage>();

    // Atomically claim the routing slot. Requested and generated names
    // get the same collision treatment: occupied means rejection, the
    // holder is untouched.
    let registered = match state.tunnels.entry(subdomain.clone()) {
        Entry::Vacant(slot) => {
            slot.insert(TunnelRegistration {
                connection_id: connection_id.clone(),
                subdomain: subdomain.clone(),
                tx: tx.clone(),
                connected_at: Utc::now(),
            });
            true
        }
        Entry::Occupied(_) => false,
    };

    if !registered {
        warn!("Rejected connection {}: subdomain {} already in use", connection_id, subdomain);
        let reply = ControlMessage::Error { message: "Subdomain already in use".to_string() };
        if let Ok(text) = serde_json::to_string(&reply) {
            let _ = ws_sink.send(Message::Text(text.into())).await;
        }
        let _ = ws_sink.close().await;
        return;
    }

    info!(
        "Tunnel registered: {}.{} (conn={})",
        subdomain, state.config.domain, connection_id
    );

    // Handshake confirmation goes through the same outbound queue so it
    // is the first frame the agent sees.
    let _ = tx.send(ControlMessage::Connected {
        subdomain: subdomain.clone(),
        url: state.public_url(&subdomain),
    });

    // ── Outbound Task ──
    // Drains the message queue and sends each message as a JSON text
    // frame over the WebSocket.
    let outbound_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    error!("Serialize error: {}", e);
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break; // WebSocket closed; stop sending
            }
        }
    });

    // ── Inbound Loop ──
    // Only text frames are meaningful; binary frames and pings are
    // ignored. A transport error ends the loop like a close does.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Text(text) => handle_client_message(&state, &connection_id, &text),
            Message::Close(_) => break,
            _ => {}
        }
    }

    // ── Cleanup on Disconnect ──
    info!("Control connection closed: {} ({})", connection_id, subdomain);
    outbound_task.abort();

    // Remove the registration owned by this connection. Pending
    // exchanges still addressed to it are left to expire through their
    // own timeouts.
    state
        .tunnels
        .retain(|_, reg| reg.connection_id != connection_id);
}

// ─── Message Dispatcher ─────────────────────────────────────────

/// Handles a single incoming frame from an agent.
///
/// Only the `response` variant is meaningful here; it resolves the
/// matching pending exchange. Malformed frames and unknown request IDs
/// are logged and dropped, never fatal to the connection.
fn handle_client_message(state: &AppState, connection_id: &str, text: &str) {
    let msg: ControlMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("Malformed frame from {}: {}", connection_id, e);
            return;
        }
    };

    match msg {
        ControlMessage::Response { request_id, status, headers, body } => {
            debug!("Response for request {} from {}", request_id, connection_id);
            state.resolve_pending(&request_id, TunnelResponse { status, headers, body });
        }
        other => {
            debug!("Ignoring unexpected frame from {}: {:?}", connection_id, other);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{RelayConfig, DEFAULT_REQUEST_TIMEOUT};
    use tokio::sync::oneshot;
    use tunnel_protocol::HeaderMap;

    fn test_state() -> AppState {
        AppState::new(RelayConfig {
            port: 0,
            domain: "localhost:8000".into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    #[tokio::test]
    async fn response_frame_resolves_pending_exchange() {
        let state = test_state();
        let (tx, rx) = oneshot::channel();
        state.pending.insert("r1".into(), tx);

        let frame = serde_json::to_string(&ControlMessage::Response {
            request_id: "r1".into(),
            status: 201,
            headers: HeaderMap::new(),
            body: "created".into(),
        })
        .unwrap();
        handle_client_message(&state, "conn", &frame);

        let resolved = rx.await.unwrap();
        assert_eq!(resolved.status, 201);
        assert_eq!(resolved.body, "created");
    }

    #[test]
    fn malformed_and_unexpected_frames_are_dropped() {
        let state = test_state();
        handle_client_message(&state, "conn", "not json");
        handle_client_message(&state, "conn", r#"{"type":"ping"}"#);
        handle_client_message(
            &state,
            "conn",
            r#"{"type":"connected","subdomain":"x","url":"http://x"}"#,
        );
        assert!(state.pending.is_empty());
    }
}
