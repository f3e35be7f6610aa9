//! JSON-RPC 2.0 wire types for tool servers.
//!
//! Streamable HTTP servers answer either with a plain JSON body or with a
//! `text/event-stream` body whose `data:` lines carry the response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BrokerError, Result};

pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Response header carrying the protocol session token
pub const SESSION_HEADER: &str = "mcp-session-id";

pub const ACCEPT: &str = "application/json, text/event-stream";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    /// Absent for notifications
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub const fn call(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params: Some(params),
        }
    }

    pub const fn notification(method: &'a str) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// The `result` member, or the remote error object as `Rpc`
    pub fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(BrokerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        self.result
            .ok_or_else(|| BrokerError::Connection("response has neither result nor error".into()))
    }
}

/// Decode a response body, JSON or SSE framed.
///
/// For event streams the last event whose data parses as a JSON-RPC response
/// wins; multi-line `data:` fields are joined with newlines.
pub fn decode_body(content_type: Option<&str>, body: &str) -> Result<JsonRpcResponse> {
    let is_stream = content_type.is_some_and(|ct| ct.starts_with("text/event-stream"))
        || body.trim_start().starts_with("event:")
        || body.trim_start().starts_with("data:");

    if !is_stream {
        return serde_json::from_str(body)
            .map_err(|e| BrokerError::Connection(format!("malformed JSON-RPC response: {e}")));
    }

    let mut found = None;
    for event in body.split("\n\n") {
        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(str::trim_start)
            .collect();
        if data.is_empty() {
            continue;
        }
        if let Ok(response) = serde_json::from_str::<JsonRpcResponse>(&data.join("\n")) {
            found = Some(response);
        }
    }
    found.ok_or_else(|| BrokerError::Connection("event stream carried no JSON-RPC response".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_has_no_id() {
        let wire = serde_json::to_value(JsonRpcRequest::notification("notifications/initialized")).unwrap();
        assert_eq!(wire, json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
    }

    #[test]
    fn test_decode_plain_json() {
        let response = decode_body(Some("application/json"), r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#).unwrap();
        assert_eq!(response.into_result().unwrap(), json!({"tools": []}));
    }

    #[test]
    fn test_decode_event_stream() {
        let body = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"ok\":true}}\n\n";
        let response = decode_body(Some("text/event-stream"), body).unwrap();
        assert_eq!(response.into_result().unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_remote_error_becomes_rpc() {
        let response = decode_body(None, r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"Method not found"}}"#).unwrap();
        assert!(matches!(response.into_result(), Err(BrokerError::Rpc { code: -32601, .. })));
    }

    #[test]
    fn test_garbage_is_connection_error() {
        assert!(matches!(decode_body(None, "<html>bad gateway</html>"), Err(BrokerError::Connection(_))));
    }
}
