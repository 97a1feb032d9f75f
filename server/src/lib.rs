//! # Tunnel Relay
//!
//! The publicly reachable half of the tunnel: accepts long-lived
//! WebSocket control connections from agents on `/ws`, assigns each a
//! subdomain, and proxies inbound HTTP for that subdomain down the
//! matching control connection.

pub mod api;
pub mod proxy;
pub mod state;
pub mod ws;

use axum::{routing::get, Router};
use state::AppState;
use tower_http::trace::TraceLayer;

/// Builds the relay router: the control endpoint and status API take
/// precedence; everything else falls through to the subdomain proxy.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/tunnels", get(api::list_tunnels))
        .fallback(proxy::proxy_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
