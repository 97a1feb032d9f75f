//! # Status API
//!
//! HTTP endpoint for querying relay state. Exposes the list of active
//! tunnels for external tools or dashboards.

use crate::state::AppState;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Response item describing a single active tunnel.
#[derive(Serialize)]
pub struct TunnelListItem {
    /// The tunnel's routing key.
    pub subdomain: String,

    /// Opaque identifier of the owning control connection.
    pub connection_id: String,

    /// The public URL this tunnel is reachable at.
    pub url: String,

    /// When the control connection completed its handshake.
    pub connected_at: DateTime<Utc>,
}

/// `GET /api/tunnels` — Returns a JSON array of all active tunnels.
pub async fn list_tunnels(State(state): State<AppState>) -> Json<Vec<TunnelListItem>> {
    let tunnels: Vec<TunnelListItem> = state
        .tunnels
        .iter()
        .map(|entry| TunnelListItem {
            subdomain: entry.subdomain.clone(),
            connection_id: entry.connection_id.clone(),
            url: state.public_url(&entry.subdomain),
            connected_at: entry.connected_at,
        })
        .collect();
    Json(tunnels)
}
