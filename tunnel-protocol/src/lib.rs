//! # Control Protocol Messages
//!
//! Defines the messages exchanged between the tunnel agent and the relay
//! server over the WebSocket control connection. Messages are serialized
//! as JSON text frames using serde's internally-tagged representation
//! (`"type": "..."` field).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header map as carried on the wire: plain string pairs, one value per
/// name. Both directions use lowercase `headers` as the JSON key.
///
/// Repeated headers (e.g. multiple `Set-Cookie`) collapse to the last
/// value written, in both directions.
pub type HeaderMap = HashMap<String, String>;

/// All messages in the tunnel control protocol.
///
/// The `#[serde(tag = "type")]` attribute means each variant is serialized
/// as a JSON object with a `"type"` field whose value is the lowercase
/// variant name. Field names are camelCase on the wire, so
/// `ControlMessage::Request { request_id, .. }` serializes with a
/// `"requestId"` key.
///
/// Unknown fields in an incoming frame are ignored; a frame with an
/// unrecognized `"type"` fails to parse and is dropped by the receiver,
/// never treated as fatal.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    // ── Handshake ─────────────────────────────────────────────────

    /// Sent by the relay once the agent's subdomain is registered.
    /// `url` is the public address the tunnel is reachable at.
    Connected { subdomain: String, url: String },

    /// Sent by the relay when the handshake fails (for example when the
    /// requested subdomain is already held by another connection). The
    /// relay closes the channel after sending this.
    Error { message: String },

    // ── Request / Response Correlation ────────────────────────────

    /// A forwarded inbound HTTP request, relay → agent. `path` includes
    /// the query string; `body` is the fully buffered request body.
    #[serde(rename_all = "camelCase")]
    Request {
        request_id: String,
        method: String,
        path: String,
        headers: HeaderMap,
        body: String,
    },

    /// The agent's answer to a `Request` with the same `request_id`,
    /// agent → relay. The agent sends exactly one of these for every
    /// request it receives, synthesizing a 502 when the local service
    /// is unreachable.
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: String,
        status: u16,
        headers: HeaderMap,
        body: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape_is_tagged_and_camel_case() {
        let msg = ControlMessage::Request {
            request_id: "abc".into(),
            method: "GET".into(),
            path: "/status?x=1".into(),
            headers: HeaderMap::from([("x-probe".to_string(), "42".to_string())]),
            body: String::new(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();

        assert_eq!(value["type"], "request");
        assert_eq!(value["requestId"], "abc");
        assert_eq!(value["path"], "/status?x=1");
        assert_eq!(value["headers"]["x-probe"], "42");
    }

    #[test]
    fn response_parses_with_unknown_fields() {
        let text = r#"{
            "type": "response",
            "requestId": "abc",
            "status": 200,
            "headers": {"content-type": "application/json"},
            "body": "{\"ok\":true}",
            "futureField": 1
        }"#;

        match serde_json::from_str::<ControlMessage>(text).unwrap() {
            ControlMessage::Response { request_id, status, headers, body } => {
                assert_eq!(request_id, "abc");
                assert_eq!(status, 200);
                assert_eq!(headers["content-type"], "application/json");
                assert_eq!(body, r#"{"ok":true}"#);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unrecognized_type_fails_to_parse() {
        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"ping"}"#).is_err());
    }
}
