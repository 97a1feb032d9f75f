//! # Relay State
//!
//! Holds the shared application state for the relay server, including:
//! - **Tunnel registry**: maps subdomains to their control connections;
//!   a registration's existence *is* the routing entry
//! - **Pending exchanges**: maps request IDs to the resolver of the HTTP
//!   handler waiting for the agent's response
//!
//! Both registries use [`DashMap`] for lock-free concurrent access,
//! since WebSocket connections and proxied requests are handled
//! concurrently.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use tunnel_protocol::{ControlMessage, HeaderMap};

/// Type alias for the unbounded sender used to push messages to an
/// agent's outbound WebSocket queue. Each control connection gets one.
pub type ClientTx = mpsc::UnboundedSender<ControlMessage>;

/// Length of generated subdomain tokens.
const SUBDOMAIN_LEN: usize = 6;

/// Generates a random lowercase alphanumeric subdomain token.
///
/// Example: "a3f9k2". Collisions with an existing registration are
/// handled at registration time, not here.
pub fn generate_subdomain() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..SUBDOMAIN_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// One active tunnel: a subdomain bound 1:1 to a control connection.
#[derive(Debug, Clone)]
pub struct TunnelRegistration {
    /// Opaque identifier for the owning control connection.
    pub connection_id: String,

    /// The routing key: first DNS label of the public `Host` header.
    pub subdomain: String,

    /// Channel to send messages down this tunnel's control connection.
    pub tx: ClientTx,

    /// When the control connection completed its handshake.
    pub connected_at: DateTime<Utc>,
}

/// Resolved outcome of one forwarded request, as reported by the agent.
#[derive(Debug)]
pub struct TunnelResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// How long a proxied request waits for the agent before giving up.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Relay configuration, supplied by the CLI at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Port the relay listens on for both the public HTTP surface and
    /// the WebSocket control endpoint.
    pub port: u16,

    /// Externally visible domain suffix used to build tunnel URLs
    /// (e.g. "localhost:8000" or "tunnel.example.com").
    pub domain: String,

    /// How long a proxied request may wait for the agent's response.
    pub request_timeout: Duration,
}

/// Shared application state, cloned and passed to each request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,

    /// Registry of active tunnels, keyed by subdomain. There is no
    /// separate routing table; membership here is what routes requests.
    pub tunnels: Arc<DashMap<String, TunnelRegistration>>,

    /// In-flight exchanges, keyed by request ID. The sender resumes the
    /// HTTP handler that dispatched the request.
    pub pending: Arc<DashMap<String, oneshot::Sender<TunnelResponse>>>,
}

impl AppState {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config: Arc::new(config),
            tunnels: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// The public URL for a subdomain on this relay.
    pub fn public_url(&self, subdomain: &str) -> String {
        format!("http://{}.{}", subdomain, self.config.domain)
    }

    /// Hands a response to the HTTP handler waiting on `request_id`.
    ///
    /// `DashMap::remove` is the atomic check-and-remove that guarantees
    /// single resolution: whichever of this and the timeout path removes
    /// the entry wins, and the other becomes a no-op. Unknown or
    /// already-resolved IDs are ignored.
    pub fn resolve_pending(&self, request_id: &str, response: TunnelResponse) {
        match self.pending.remove(request_id) {
            Some((_, resolver)) => {
                // The receiver may have timed out between the remove and
                // the send; a failed send is equally a no-op.
                let _ = resolver.send(response);
            }
            None => debug!("No pending exchange for request {}", request_id),
        }
    }
}
