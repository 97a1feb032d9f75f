//! # Public Proxy Surface
//!
//! The router fallback that serves every inbound request not aimed at
//! the control or status endpoints. The first DNS label of the `Host`
//! header selects the tunnel; the request is buffered, correlated with
//! a fresh request ID, sent down the tunnel's control connection, and
//! the handler suspends until the agent's response arrives or the
//! request timeout fires.

use crate::state::{AppState, TunnelResponse};
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use tunnel_protocol::{ControlMessage, HeaderMap};
use uuid::Uuid;

/// Extracts the routing key from a `Host` header value: the first DNS
/// label, with any port suffix stripped.
fn extract_subdomain(host: &str) -> Option<&str> {
    let host = host.split(':').next()?;
    let label = host.split('.').next()?;
    if label.is_empty() {
        None
    } else {
        Some(label)
    }
}

fn tunnel_not_found() -> Response {
    (StatusCode::NOT_FOUND, "Tunnel not found").into_response()
}

fn bad_gateway() -> Response {
    (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
}

/// Translates the agent's response into the outbound HTTP reply:
/// status, headers, and body pass through verbatim.
fn into_http_response(resolved: TunnelResponse) -> Response {
    let status = StatusCode::from_u16(resolved.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in &resolved.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            builder = builder.header(name, value);
        }
    }
    builder.body(Body::from(resolved.body)).unwrap_or_else(|e| {
        error!("Failed to build proxied response: {}", e);
        bad_gateway()
    })
}

/// Handles one inbound public request end to end.
///
/// Guarantees exactly one terminal outcome per dispatched request: the
/// agent's response, a send failure turned into a 502, or a timeout
/// that removes the pending entry so a late response becomes a no-op.
/// The deadline runs in a detached task, so the entry is removed even
/// when the caller hangs up early and this handler future is dropped.
pub async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let subdomain = match extract_subdomain(host) {
        Some(s) => s.to_string(),
        None => return tunnel_not_found(),
    };

    // Clone the sender out of the registry so the shard guard is not
    // held across any await point.
    let tunnel_tx = match state.tunnels.get(&subdomain) {
        Some(reg) => reg.tx.clone(),
        None => {
            debug!("No tunnel for subdomain {}", subdomain);
            return tunnel_not_found();
        }
    };

    let request_id = Uuid::new_v4().to_string();
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let mut headers = HeaderMap::new();
    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }

    // Bodies are fully buffered; there is no streaming on the wire.
    let body = match to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!("Failed to read request body for {}: {}", subdomain, e);
            return bad_gateway();
        }
    };

    let (resolver, resolution) = oneshot::channel();
    state.pending.insert(request_id.clone(), resolver);

    // Detached deadline: this task outlives the handler, so the entry
    // is removed at the deadline even if hyper drops the handler future
    // because the caller disconnected. Removing the entry drops the
    // resolver, which wakes a still-waiting handler with a recv error.
    let deadline_task = {
        let pending = state.pending.clone();
        let request_id = request_id.clone();
        let deadline = state.config.request_timeout;
        tokio::spawn(async move {
            sleep(deadline).await;
            if pending.remove(&request_id).is_some() {
                warn!("Request {} expired unresolved", request_id);
            }
        })
    };

    debug!("Dispatching {} {} to {} as {}", method, path, subdomain, request_id);
    let message = ControlMessage::Request { request_id: request_id.clone(), method, path, headers, body };
    if tunnel_tx.send(message).is_err() {
        // The control connection went away between lookup and send.
        state.pending.remove(&request_id);
        deadline_task.abort();
        warn!("Tunnel {} dropped before dispatch of {}", subdomain, request_id);
        return bad_gateway();
    }

    match resolution.await {
        Ok(resolved) => {
            deadline_task.abort();
            into_http_response(resolved)
        }
        Err(_) => {
            // The deadline task removed the entry before a response
            // arrived; a late arrival from here on is a no-op.
            warn!("Request {} to {} timed out", request_id, subdomain);
            bad_gateway()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_subdomain_takes_first_label_without_port() {
        assert_eq!(extract_subdomain("a3f9k2.localhost:8000"), Some("a3f9k2"));
        assert_eq!(extract_subdomain("demo.tunnel.example.com"), Some("demo"));
        assert_eq!(extract_subdomain("localhost:8000"), Some("localhost"));
        assert_eq!(extract_subdomain(""), None);
    }

    #[test]
    fn into_http_response_passes_status_headers_body_through() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type".into(), "application/json".into());
        let response = into_http_response(TunnelResponse {
            status: 418,
            headers,
            body: r#"{"ok":true}"#.into(),
        });
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn into_http_response_rejects_invalid_status() {
        let response = into_http_response(TunnelResponse {
            status: 0,
            headers: HeaderMap::new(),
            body: String::new(),
        });
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
