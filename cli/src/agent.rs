//! # Tunnel Agent
//!
//! Owns the single WebSocket control connection to the relay:
//! - `connect()` performs the handshake and resolves with the public
//!   tunnel URL (or the relay's rejection)
//! - `serve()` answers forwarded requests until the channel closes
//! - `run()` drives the reconnect state machine
//!   (Disconnected → Connecting → Connected) with exponential backoff

use crate::error::{Result, TunnelError};
use crate::forward::Forwarder;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tunnel_protocol::ControlMessage;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Automatic reconnection stops for good after this many failed attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Backoff before reconnect attempt `n` (0-indexed): 1s, 2s, 4s, ...
/// capped at 30s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let ms = 1000u64.saturating_mul(1u64 << attempt.min(16));
    Duration::from_millis(ms.min(30_000))
}

/// Everything the agent needs from its environment.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay control endpoint, e.g. "ws://localhost:8000/ws".
    pub server_url: String,

    /// Local service to replay forwarded requests against.
    pub local_host: String,
    pub local_port: u16,

    /// Subdomain to request; the relay generates one when absent.
    pub subdomain: Option<String>,
}

impl AgentConfig {
    fn ws_url(&self) -> String {
        match &self.subdomain {
            Some(name) => format!("{}?subdomain={}", self.server_url, name),
            None => self.server_url.clone(),
        }
    }
}

pub struct TunnelAgent {
    config: AgentConfig,
    forwarder: Forwarder,
}

impl TunnelAgent {
    pub fn new(config: AgentConfig) -> Self {
        let forwarder = Forwarder::new(config.local_host.clone(), config.local_port);
        Self { config, forwarder }
    }

    /// Opens the control connection and completes the handshake.
    ///
    /// Resolves with the established stream and the public tunnel URL on
    /// the relay's `connected` frame; fails on an `error` frame, a
    /// transport error, or the channel closing mid-handshake.
    pub async fn connect(&self) -> Result<(WsStream, String)> {
        let (mut ws, _) = connect_async(self.config.ws_url()).await?;

        while let Some(frame) = ws.next().await {
            match frame? {
                Message::Text(text) => match serde_json::from_str::<ControlMessage>(&text) {
                    Ok(ControlMessage::Connected { subdomain, url }) => {
                        info!("Tunnel established: {} ({})", url, subdomain);
                        return Ok((ws, url));
                    }
                    Ok(ControlMessage::Error { message }) => {
                        return Err(TunnelError::Handshake(message));
                    }
                    Ok(other) => {
                        warn!("Unexpected frame during handshake: {:?}", other);
                    }
                    Err(e) => {
                        warn!("Malformed frame during handshake: {}", e);
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }

        Err(TunnelError::Handshake(
            "connection closed during handshake".to_string(),
        ))
    }

    /// Serves one established session until the channel closes.
    pub async fn serve(&self, ws: WsStream) {
        let (mut ws_sink, mut ws_stream) = ws.split();

        // Outbound queue: forwarding tasks finish in any order; the
        // writer serializes their responses onto the channel.
        let (tx, mut rx) = mpsc::unbounded_channel::<ControlMessage>();
        let outbound_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let text = match serde_json::to_string(&msg) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Serialize error: {}", e);
                        continue;
                    }
                };
                if ws_sink.send(Message::Text(text.into())).await.is_err() {
                    break; // Connection lost
                }
            }
        });

        while let Some(Ok(msg)) = ws_stream.next().await {
            match msg {
                Message::Text(text) => self.handle_message(&tx, &text),
                Message::Close(_) => break,
                _ => {}
            }
        }

        outbound_task.abort();
        warn!("Disconnected from relay");
    }

    /// Handles one frame from the relay while connected.
    fn handle_message(&self, tx: &mpsc::UnboundedSender<ControlMessage>, text: &str) {
        let msg: ControlMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Malformed frame from relay: {}", e);
                return;
            }
        };

        match msg {
            ControlMessage::Request { request_id, method, path, headers, body } => {
                // Forward concurrently; exchanges are correlated by id,
                // not by arrival order.
                let forwarder = self.forwarder.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let response = forwarder.forward(&method, &path, headers, body).await;
                    let _ = tx.send(response.into_message(request_id));
                });
            }
            other => debug!("Ignoring frame after handshake: {:?}", other),
        }
    }

    /// Serves the given session, then keeps the tunnel alive across
    /// disconnects. Each reconnect attempt `n` waits
    /// `min(1000 * 2^n, 30000)` ms; a successful handshake resets the
    /// counter, and after [`MAX_RECONNECT_ATTEMPTS`] consecutive
    /// failures the agent gives up for good.
    pub async fn run(&self, session: WsStream) -> Result<()> {
        self.serve(session).await;

        let mut attempts: u32 = 0;
        loop {
            if attempts >= MAX_RECONNECT_ATTEMPTS {
                return Err(TunnelError::ReconnectExhausted(attempts));
            }

            let delay = backoff_delay(attempts);
            info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay,
                attempts + 1,
                MAX_RECONNECT_ATTEMPTS
            );
            attempts += 1;
            sleep(delay).await;

            match self.connect().await {
                Ok((ws, url)) => {
                    attempts = 0;
                    info!("Tunnel re-established: {}", url);
                    self.serve(ws).await;
                }
                Err(e) => warn!("Reconnection failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps_at_thirty_seconds() {
        assert_eq!(backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(4), Duration::from_millis(16000));
        assert_eq!(backoff_delay(5), Duration::from_millis(30000));
        assert_eq!(backoff_delay(10), Duration::from_millis(30000));
        assert_eq!(backoff_delay(u32::MAX), Duration::from_millis(30000));
    }

    #[test]
    fn ws_url_appends_requested_subdomain() {
        let base = AgentConfig {
            server_url: "ws://localhost:8000/ws".to_string(),
            local_host: "localhost".to_string(),
            local_port: 3000,
            subdomain: None,
        };
        assert_eq!(base.ws_url(), "ws://localhost:8000/ws");

        let named = AgentConfig { subdomain: Some("demo".to_string()), ..base };
        assert_eq!(named.ws_url(), "ws://localhost:8000/ws?subdomain=demo");
    }
}
