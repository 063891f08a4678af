//! Demo protocol engine for exercising the transport end to end.

use async_trait::async_trait;
use bootmcp_transport::{Outbound, ProtocolEngine, SessionId, TransportResult};
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{debug, info};

/// Answers pings and echoes everything else.
///
/// - `{"op":"ping"}` → `{"op":"pong"}`
/// - JSON-RPC request `ping` → empty result with the same id
/// - JSON-RPC notifications → no reply
/// - anything else is sent back unchanged
#[derive(Debug, Clone)]
pub struct DemoEngine {
    name: String,
}

impl DemoEngine {
    /// Create an engine reporting `name` in its logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Compute the reply for one inbound message, if any.
    pub fn reply(message: &[u8]) -> Option<Bytes> {
        let Ok(value) = serde_json::from_slice::<Value>(message) else {
            return Some(Bytes::copy_from_slice(message));
        };

        if value.get("op").and_then(Value::as_str) == Some("ping") {
            return Some(Bytes::from_static(br#"{"op":"pong"}"#));
        }

        if value.get("jsonrpc").and_then(Value::as_str) == Some("2.0") {
            let id = value.get("id")?;
            if value.get("method").and_then(Value::as_str) == Some("ping") {
                let response = json!({ "jsonrpc": "2.0", "id": id, "result": {} });
                return Some(Bytes::from(response.to_string()));
            }
        }

        Some(Bytes::copy_from_slice(message))
    }
}

#[async_trait]
impl ProtocolEngine for DemoEngine {
    async fn on_open(&self, session: &SessionId) {
        info!(server = %self.name, session_id = %session, "client connected");
    }

    async fn handle(&self, session: &SessionId, message: Bytes, outbound: Outbound) -> TransportResult<()> {
        debug!(session_id = %session, bytes = message.len(), "handling message");
        match Self::reply(&message) {
            Some(reply) => outbound.send(reply).await,
            None => Ok(()),
        }
    }

    async fn on_close(&self, session: &SessionId) {
        info!(server = %self.name, session_id = %session, "client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn reply_text(message: &str) -> Option<String> {
        DemoEngine::reply(message.as_bytes()).map(|b| String::from_utf8(b.to_vec()).unwrap())
    }

    #[test]
    fn test_op_ping() {
        assert_eq!(reply_text(r#"{"op":"ping"}"#).unwrap(), r#"{"op":"pong"}"#);
    }

    #[test]
    fn test_jsonrpc_ping() {
        let reply: Value =
            serde_json::from_str(&reply_text(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#).unwrap())
                .unwrap();
        assert_eq!(reply, json!({ "jsonrpc": "2.0", "id": 7, "result": {} }));
    }

    #[test]
    fn test_jsonrpc_notification_gets_no_reply() {
        assert_eq!(
            reply_text(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#),
            None
        );
    }

    #[test]
    fn test_echo() {
        assert_eq!(reply_text("plain text").unwrap(), "plain text");
        assert_eq!(reply_text(r#"{"op":"other"}"#).unwrap(), r#"{"op":"other"}"#);
    }
}
