//! Broker Protocol Clients
//!
//! One client instance per (session, broker). Two transports share the
//! [`BrokerClient`] contract:
//!
//! - [`McpBrokerClient`]: JSON-RPC tool server with a session handshake
//! - [`RestBrokerClient`]: bearer-token REST API described by a route table
//!
//! Handshake failures are returned as errors. Individual tool calls never
//! fail: transport errors, remote errors and timeouts all come back as a
//! [`ToolResult`] carrying the error text.

pub mod jsonrpc;
mod mcp;
mod rest;

pub use mcp::McpBrokerClient;
pub use rest::RestBrokerClient;

use std::sync::Arc;

use agent_core::{ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broker::{BrokerSpec, Transport};
use crate::config::ClientOptions;
use crate::error::{BrokerError, Result};

/// A tool as the broker describes it, before normalization
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NativeTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

impl NativeTool {
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::from_native(&self.name, self.description.as_deref(), self.input_schema.as_ref())
    }
}

/// Protocol client for one broker connection
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Broker name this client talks to
    fn broker(&self) -> &str;

    /// Whether the handshake has completed
    fn is_initialized(&self) -> bool;

    /// Perform the handshake. Idempotent; concurrent callers share one handshake.
    async fn connect(&self) -> Result<()>;

    /// Tools the broker exposes. Empty on any failure.
    async fn list_tools(&self) -> Vec<NativeTool>;

    /// Invoke a tool after applying the broker's argument rules
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult;

    /// Obtain the URL the user must open to log in
    async fn begin_login(&self) -> Result<String>;

    /// Attach an access token obtained out of band
    async fn attach_credentials(&self, _token: &str) -> Result<()> {
        Err(BrokerError::Unsupported(format!(
            "{} does not accept access tokens directly",
            self.broker()
        )))
    }

    /// Forget connection state, tokens and cached tools
    async fn cleanup(&self);
}

/// Build the client matching the broker's transport
pub fn build_client(
    spec: Arc<BrokerSpec>,
    http: reqwest::Client,
    options: ClientOptions,
) -> Arc<dyn BrokerClient> {
    match spec.transport.clone() {
        Transport::Mcp { endpoint } => Arc::new(McpBrokerClient::new(spec, endpoint, http, options)),
        Transport::Rest {
            base_url,
            authorize,
            routes,
        } => Arc::new(RestBrokerClient::new(spec, base_url, authorize, routes, http, options)),
    }
}

/// Normalize a `tools/call` result.
///
/// Text parts are concatenated in order. For `isError` results the text
/// becomes the error message.
pub fn tool_result_from_call(result: Value) -> ToolResult {
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
    let raw = result
        .get("structuredContent")
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or(result);

    if is_error {
        let message = if text.is_empty() { "tool reported an error".to_string() } else { text };
        return ToolResult::failure(message).with_raw(raw);
    }
    ToolResult::success(raw, text)
}

/// Find the login URL in a login tool's output.
///
/// Looks for `login_url`/`url` fields first, then for the first http(s) link
/// in the text, including markdown links.
pub fn extract_login_url(result: &ToolResult) -> Option<String> {
    const FIELDS: [&str; 4] = ["/login_url", "/url", "/data/login_url", "/data/url"];

    let from_json = |value: &Value| {
        FIELDS
            .iter()
            .filter_map(|pointer| value.pointer(pointer))
            .filter_map(Value::as_str)
            .find(|url| url.starts_with("http"))
            .map(ToString::to_string)
    };

    if let Some(url) = result.structured().ok().as_ref().and_then(from_json) {
        return Some(url);
    }
    if let Some(url) = from_json(&result.raw_payload) {
        return Some(url);
    }

    let start = result.text.find("https://").or_else(|| result.text.find("http://"))?;
    let url: String = result.text[start..]
        .chars()
        .take_while(|c| !c.is_whitespace() && !matches!(c, ')' | ']' | '"' | '\'' | '<' | '>'))
        .collect();
    let url = url.trim_end_matches(['.', ',', ';']);
    (url.len() > "https://".len()).then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_parts_concatenate_in_order() {
        let result = tool_result_from_call(json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image", "data": "..."},
                {"type": "text", "text": "second"}
            ]
        }));
        assert!(!result.is_error());
        assert_eq!(result.text, "first\nsecond");
    }

    #[test]
    fn test_is_error_becomes_failure() {
        let result = tool_result_from_call(json!({
            "content": [{"type": "text", "text": "Invalid instrument"}],
            "isError": true
        }));
        assert_eq!(result.error.as_deref(), Some("Invalid instrument"));
        assert_eq!(result.observation(), "Error: Invalid instrument");
    }

    #[test]
    fn test_structured_content_is_raw_payload() {
        let result = tool_result_from_call(json!({
            "content": [{"type": "text", "text": "ok"}],
            "structuredContent": {"user_id": "AB1234"}
        }));
        assert_eq!(result.raw_payload, json!({"user_id": "AB1234"}));
    }

    #[test]
    fn test_login_url_from_markdown() {
        let result = ToolResult::success(
            Value::Null,
            "Please [log in](https://kite.zerodha.com/connect/login?api_key=abc&v=3) to continue.",
        );
        assert_eq!(
            extract_login_url(&result).as_deref(),
            Some("https://kite.zerodha.com/connect/login?api_key=abc&v=3")
        );
    }

    #[test]
    fn test_login_url_from_json() {
        let result = ToolResult::success(Value::Null, r#"{"login_url": "https://broker.example/login?s=1"}"#);
        assert_eq!(extract_login_url(&result).as_deref(), Some("https://broker.example/login?s=1"));
        assert_eq!(extract_login_url(&ToolResult::success(Value::Null, "no link here")), None);
    }

    #[test]
    fn test_native_tool_normalizes() {
        let tool: NativeTool = serde_json::from_value(json!({
            "name": "get_quotes",
            "description": "Quotes",
            "inputSchema": {"type": "object", "properties": {"instruments": {"type": "array"}}}
        }))
        .unwrap();
        let definition = tool.to_definition();
        assert_eq!(definition.name, "get_quotes");
        assert!(definition.parameters.required().is_empty());
    }
}
