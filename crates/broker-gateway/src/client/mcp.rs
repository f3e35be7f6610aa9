//! JSON-RPC tool-server client with the two-phase handshake.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_core::{with_deadline, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use super::jsonrpc::{decode_body, JsonRpcRequest, ACCEPT, PROTOCOL_VERSION, SESSION_HEADER};
use super::{extract_login_url, tool_result_from_call, BrokerClient, NativeTool};
use crate::broker::{remap_arguments, BrokerSpec};
use crate::config::ClientOptions;
use crate::error::{BrokerError, Result};

#[derive(Deserialize)]
struct ToolList {
    #[serde(default)]
    tools: Vec<NativeTool>,
}

pub struct McpBrokerClient {
    spec: Arc<BrokerSpec>,
    endpoint: String,
    http: reqwest::Client,
    options: ClientOptions,
    next_request_id: AtomicU64,
    initialized: AtomicBool,
    /// Serializes handshakes
    handshake: Mutex<()>,
    session_token: RwLock<Option<String>>,
    tools: RwLock<Option<Vec<NativeTool>>>,
}

impl McpBrokerClient {
    pub fn new(spec: Arc<BrokerSpec>, endpoint: String, http: reqwest::Client, options: ClientOptions) -> Self {
        Self {
            spec,
            endpoint,
            http,
            options,
            next_request_id: AtomicU64::new(1),
            initialized: AtomicBool::new(false),
            handshake: Mutex::new(()),
            session_token: RwLock::new(None),
            tools: RwLock::new(None),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn send(&self, request: &JsonRpcRequest<'_>) -> Result<reqwest::Response> {
        let mut builder = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, ACCEPT)
            .json(request);

        if let Some(token) = self.session_token.read().await.as_deref() {
            builder = builder.header(SESSION_HEADER, token);
        }

        Ok(builder.send().await?)
    }

    async fn read_response(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Connection(format!("HTTP {status}: {body}")));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = response.text().await?;

        decode_body(content_type.as_deref(), &body)?.into_result()
    }

    /// Send one request and wait for its result under `limit`
    async fn rpc(&self, method: &str, params: Value, limit: Duration) -> Result<Value> {
        let request = JsonRpcRequest::call(self.next_id(), method, params);
        tracing::debug!(broker = %self.spec.name, method, request_id = ?request.id, "JSON-RPC request");

        with_deadline(method, limit, async {
            let response = self.send(&request).await?;
            Self::read_response(response).await
        })
        .await
    }

    async fn handshake(&self) -> Result<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": self.options.client_name,
                "version": self.options.client_version,
            }
        });
        let request = JsonRpcRequest::call(self.next_id(), "initialize", params);
        let response = self.send(&request).await?;

        let token = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let result = Self::read_response(response).await.map_err(|e| match e {
            BrokerError::Rpc { code, message } => {
                BrokerError::Connection(format!("initialize rejected ({code}): {message}"))
            }
            other => other,
        })?;
        if !result.is_object() {
            return Err(BrokerError::Connection("initialize returned a non-object result".into()));
        }
        *self.session_token.write().await = token;

        // Fire and forget; servers may answer 202 with no body
        match self.send(&JsonRpcRequest::notification("notifications/initialized")).await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(broker = %self.spec.name, status = %response.status(), "initialized notification rejected");
            }
            Err(e) => tracing::warn!(broker = %self.spec.name, error = %e, "initialized notification failed"),
            Ok(_) => {}
        }

        self.initialized.store(true, Ordering::SeqCst);
        let has_session_token = self.session_token.read().await.is_some();
        tracing::info!(
            broker = %self.spec.name,
            server = %result.pointer("/serverInfo/name").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            session_token = has_session_token,
            "Broker handshake complete"
        );
        Ok(())
    }

    async fn forget(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        *self.session_token.write().await = None;
        *self.tools.write().await = None;
    }
}

#[async_trait]
impl BrokerClient for McpBrokerClient {
    fn broker(&self) -> &str {
        &self.spec.name
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let _guard = self.handshake.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        let outcome = with_deadline("initialize", self.options.timeouts.handshake, self.handshake()).await;
        if let Err(e) = &outcome {
            tracing::warn!(broker = %self.spec.name, error = %e, "Broker handshake failed");
            self.forget().await;
        }
        outcome
    }

    async fn list_tools(&self) -> Vec<NativeTool> {
        if let Some(cached) = self.tools.read().await.clone() {
            return cached;
        }

        let listed = self
            .rpc("tools/list", json!({}), self.options.timeouts.list)
            .await
            .and_then(|result| Ok(serde_json::from_value::<ToolList>(result)?));

        match listed {
            Ok(list) => {
                tracing::debug!(broker = %self.spec.name, count = list.tools.len(), "Listed broker tools");
                *self.tools.write().await = Some(list.tools.clone());
                list.tools
            }
            Err(e) => {
                tracing::warn!(broker = %self.spec.name, error = %e, "tools/list failed, treating as empty");
                Vec::new()
            }
        }
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        let arguments = remap_arguments(&self.spec.argument_rules, name, arguments);
        let params = json!({"name": name, "arguments": arguments});

        match self.rpc("tools/call", params, self.options.timeouts.tool).await {
            Ok(result) => tool_result_from_call(result),
            Err(e) => {
                tracing::warn!(broker = %self.spec.name, tool = name, error = %e, "Tool call failed");
                ToolResult::failure(e.to_string())
            }
        }
    }

    async fn begin_login(&self) -> Result<String> {
        let tool = self
            .spec
            .login_tool
            .as_deref()
            .ok_or_else(|| BrokerError::Unsupported(format!("{} has no login tool", self.spec.name)))?;

        let result = self.call_tool(tool, json!({})).await;
        if let Some(error) = result.error {
            return Err(BrokerError::Login(error));
        }
        extract_login_url(&result).ok_or_else(|| BrokerError::Login("login tool returned no URL".into()))
    }

    async fn cleanup(&self) {
        self.forget().await;
        tracing::debug!(broker = %self.spec.name, "Broker client cleaned up");
    }
}
