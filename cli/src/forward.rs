//! # Local Request Forwarding
//!
//! Replays a forwarded `request` frame against the configured local
//! service and shapes the outcome into the `response` frame the relay
//! is waiting on. The agent guarantees exactly one response per
//! request: any transport failure toward the local service becomes a
//! synthesized 502.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{redirect, Client, Method};
use std::str::FromStr;
use tracing::{debug, error};
use tunnel_protocol::{self, ControlMessage};

/// Headers that would conflict with the outgoing call's own framing.
const STRIPPED_HEADERS: [&str; 3] = ["host", "connection", "content-length"];

/// Body sent with the synthesized 502 when the local service is
/// unreachable.
const UNREACHABLE_BODY: &str = "Bad Gateway: Could not connect to local service";

/// Outcome of one replayed request against the local service.
#[derive(Debug)]
pub struct LocalResponse {
    pub status: u16,
    pub headers: tunnel_protocol::HeaderMap,
    pub body: String,
}

impl LocalResponse {
    pub fn into_message(self, request_id: String) -> ControlMessage {
        ControlMessage::Response {
            request_id,
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

/// Builds the outgoing header map, dropping the conflicting entries and
/// anything that is not a valid header name/value pair.
fn build_headers(headers: tunnel_protocol::HeaderMap) -> HeaderMap {
    let mut header_map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if STRIPPED_HEADERS.contains(&name.to_lowercase().as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(&name), HeaderValue::from_str(&value))
        {
            header_map.insert(name, value);
        }
    }
    header_map
}

#[derive(Clone)]
pub struct Forwarder {
    client: Client,
    local_host: String,
    local_port: u16,
}

impl Forwarder {
    pub fn new(local_host: String, local_port: u16) -> Self {
        // Redirects are relayed as-is, never followed here.
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .expect("failed to create HTTP client");
        Self { client, local_host, local_port }
    }

    /// Replays one forwarded request. Never fails: a local transport
    /// error is turned into the synthesized 502 response.
    pub async fn forward(
        &self,
        method: &str,
        path: &str,
        headers: tunnel_protocol::HeaderMap,
        body: String,
    ) -> LocalResponse {
        match self.try_forward(method, path, headers, body).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error forwarding request: {}", e);
                LocalResponse {
                    status: 502,
                    headers: tunnel_protocol::HeaderMap::new(),
                    body: UNREACHABLE_BODY.to_string(),
                }
            }
        }
    }

    async fn try_forward(
        &self,
        method: &str,
        path: &str,
        headers: tunnel_protocol::HeaderMap,
        body: String,
    ) -> reqwest::Result<LocalResponse> {
        let url = format!("http://{}:{}{}", self.local_host, self.local_port, path);
        // Methods arrive in whatever case the caller used; default GET.
        let method = Method::from_str(&method.to_uppercase()).unwrap_or(Method::GET);
        debug!("Forwarding {} {}", method, url);

        let response = self
            .client
            .request(method, &url)
            .headers(build_headers(headers))
            .body(body)
            .send()
            .await?;

        // Any status from the local service, 4xx/5xx included, is a
        // normal exchange and relays as-is.
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(LocalResponse { status, headers, body })
    }
}
