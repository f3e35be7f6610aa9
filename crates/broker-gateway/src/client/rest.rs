//! Bearer-token REST broker client.
//!
//! There is no handshake: the access token arrives from the OAuth callback
//! via [`BrokerClient::attach_credentials`], and each route in the broker's
//! table is exposed as a tool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agent_core::{with_deadline, ToolResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{BrokerClient, NativeTool};
use crate::broker::{remap_arguments, AuthorizeConfig, BrokerSpec, HttpMethod, RestRoute};
use crate::config::ClientOptions;
use crate::error::{BrokerError, Result};

pub struct RestBrokerClient {
    spec: Arc<BrokerSpec>,
    base_url: String,
    authorize: AuthorizeConfig,
    routes: Vec<RestRoute>,
    http: reqwest::Client,
    options: ClientOptions,
    initialized: AtomicBool,
    access_token: RwLock<Option<String>>,
}

impl RestBrokerClient {
    pub fn new(
        spec: Arc<BrokerSpec>,
        base_url: String,
        authorize: AuthorizeConfig,
        routes: Vec<RestRoute>,
        http: reqwest::Client,
        options: ClientOptions,
    ) -> Self {
        Self {
            spec,
            base_url: base_url.trim_end_matches('/').to_string(),
            authorize,
            routes,
            http,
            options,
            initialized: AtomicBool::new(false),
            access_token: RwLock::new(None),
        }
    }

    async fn request(&self, route: &RestRoute, token: &str, arguments: Value) -> Result<ToolResult> {
        let url = format!("{}{}", self.base_url, route.path);
        let Value::Object(mut args) = arguments else {
            return Err(BrokerError::ToolExecution {
                tool: route.tool.clone(),
                message: "arguments must be an object".into(),
            });
        };

        let query: Vec<(String, String)> = match route.method {
            HttpMethod::Get => std::mem::take(&mut args).into_iter().map(|(k, v)| (k, query_value(&v))).collect(),
            HttpMethod::Post => route
                .query
                .iter()
                .filter_map(|name| args.remove(name).map(|v| (name.clone(), query_value(&v))))
                .collect(),
        };

        let builder = match route.method {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self.http.post(&url).json(&Value::Object(args)),
        };
        let response = builder
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        let payload: Value = serde_json::from_str(&body).unwrap_or_else(|_| Value::String(body.clone()));

        if !status.is_success() || payload.get("status").and_then(Value::as_str) == Some("error") {
            let message = payload
                .pointer("/errors/0/message")
                .and_then(Value::as_str)
                .map_or_else(|| format!("HTTP {status}: {body}"), |m| format!("HTTP {status}: {m}"));
            return Ok(ToolResult::failure(message).with_raw(payload));
        }

        Ok(ToolResult::success(payload, body))
    }
}

/// Arrays become comma-separated lists, strings pass through unquoted
fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(query_value).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

#[async_trait]
impl BrokerClient for RestBrokerClient {
    fn broker(&self) -> &str {
        &self.spec.name
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tools(&self) -> Vec<NativeTool> {
        self.routes
            .iter()
            .map(|route| NativeTool {
                name: route.tool.clone(),
                description: Some(route.description.clone()),
                input_schema: Some(route.input_schema.clone()),
            })
            .collect()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        let Some(route) = self.routes.iter().find(|r| r.tool == name) else {
            return ToolResult::failure(format!("Unknown tool: {name}"));
        };
        let Some(token) = self.access_token.read().await.clone() else {
            return ToolResult::failure(format!("No access token for {}; complete the login first", self.spec.name));
        };

        let arguments = remap_arguments(&self.spec.argument_rules, name, arguments);
        let arguments = if arguments.is_null() { Value::Object(Map::new()) } else { arguments };

        match with_deadline(name, self.options.timeouts.tool, self.request(route, &token, arguments)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(broker = %self.spec.name, tool = name, error = %e, "REST call failed");
                ToolResult::failure(e.to_string())
            }
        }
    }

    async fn begin_login(&self) -> Result<String> {
        if self.authorize.client_id.is_empty() {
            return Err(BrokerError::Config(format!("no OAuth client id configured for {}", self.spec.name)));
        }
        let url = reqwest::Url::parse_with_params(
            &self.authorize.url,
            &[
                ("response_type", "code"),
                ("client_id", self.authorize.client_id.as_str()),
                ("redirect_uri", self.authorize.redirect_uri.as_str()),
            ],
        )
        .map_err(|e| BrokerError::Config(format!("invalid authorize URL: {e}")))?;
        Ok(url.into())
    }

    async fn attach_credentials(&self, token: &str) -> Result<()> {
        let token = token.trim();
        if token.is_empty() {
            return Err(BrokerError::Login("empty access token".into()));
        }
        *self.access_token.write().await = Some(token.to_string());
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(broker = %self.spec.name, "Access token attached");
        Ok(())
    }

    async fn cleanup(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        *self.access_token.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Transport;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> RestBrokerClient {
        let spec = Arc::new(BrokerSpec::upstox(
            server.uri(),
            AuthorizeConfig {
                url: "https://api.upstox.com/v2/login/authorization/dialog".into(),
                client_id: "client-1".into(),
                redirect_uri: "http://localhost:3000/callback".into(),
            },
        ));
        let Transport::Rest { base_url, authorize, routes } = spec.transport.clone() else {
            panic!("upstox is a REST broker");
        };
        RestBrokerClient::new(spec, base_url, authorize, routes, reqwest::Client::new(), ClientOptions::default())
    }

    #[tokio::test]
    async fn test_authorize_url() {
        let server = MockServer::start().await;
        let url = client_for(&server).begin_login().await.unwrap();
        assert!(url.starts_with("https://api.upstox.com/v2/login/authorization/dialog?response_type=code"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fcallback"));
    }

    #[tokio::test]
    async fn test_calls_need_a_token() {
        let server = MockServer::start().await;
        let result = client_for(&server).call_tool("get_profile", json!({})).await;
        assert!(result.is_error());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bearer_get_with_remapped_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/market-quote/ltp"))
            .and(header("authorization", "Bearer tok-1"))
            .and(query_param("instrument_key", "NSE_EQ|SBIN,NSE_EQ|INFY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"NSE_EQ:SBIN": {"last_price": 812.5}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.attach_credentials("tok-1").await.unwrap();
        let result = client.call_tool("get_ltp", json!({"instruments": ["SBIN", "INFY"]})).await;

        assert!(!result.is_error(), "{:?}", result.error);
        assert_eq!(result.raw_payload["data"]["NSE_EQ:SBIN"]["last_price"], 812.5);
    }

    #[tokio::test]
    async fn test_error_status_is_failure_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/user/profile"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "status": "error",
                "errors": [{"errorCode": "UDAPI100050", "message": "Invalid token used to access API"}]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        client.attach_credentials("stale").await.unwrap();
        let result = client.call_tool("get_profile", json!({})).await;
        assert_eq!(result.error.as_deref(), Some("HTTP 401 Unauthorized: Invalid token used to access API"));
    }

    #[tokio::test]
    async fn test_routes_are_listed_as_tools() {
        let server = MockServer::start().await;
        let tools = client_for(&server).list_tools().await;
        assert!(tools.iter().any(|t| t.name == "get_holdings"));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_forgets_token() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        client.attach_credentials("tok-1").await.unwrap();
        assert!(client.is_initialized());

        client.cleanup().await;
        assert!(!client.is_initialized());
        assert!(client.call_tool("get_profile", json!({})).await.is_error());
    }
}
