//! In-memory fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_core::provider::{ModelInfo, ProviderInfo};
use agent_core::{Completion, GenerationOptions, LlmProvider, Message, ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::broker::BrokerSpec;
use crate::client::{BrokerClient, NativeTool};
use crate::error::{BrokerError, Result};
use crate::handle::{AgentTemplate, BrokerHandle, HandleKey};

/// Broker client that counts every would-be network call
pub struct FakeClient {
    name: String,
    pub network_calls: AtomicUsize,
    pub cleanups: AtomicUsize,
    initialized: AtomicBool,
    fail_connect: AtomicBool,
    profile: Mutex<ToolResult>,
    profile_delay: Mutex<Option<Duration>>,
    pub tool_error: Mutex<Option<String>>,
}

impl FakeClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            network_calls: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
            initialized: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            profile: Mutex::new(ToolResult::success(Value::Null, "Please log in using the login tool.")),
            profile_delay: Mutex::new(None),
            tool_error: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.network_calls.load(Ordering::SeqCst)
    }

    pub fn set_profile(&self, text: &str) {
        *self.profile.lock().unwrap() = ToolResult::success(Value::Null, text);
    }

    /// Make every profile call take `delay` (`None` restores instant replies)
    pub fn slow_profile(&self, delay: Option<Duration>) {
        *self.profile_delay.lock().unwrap() = delay;
    }

    pub fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerClient for FakeClient {
    fn broker(&self) -> &str {
        &self.name
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(BrokerError::Connection("refused".into()));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tools(&self) -> Vec<NativeTool> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        ["get_profile", "get_holdings", "get_quotes"]
            .into_iter()
            .map(|name| NativeTool {
                name: name.into(),
                description: Some(format!("{name} tool")),
                input_schema: Some(json!({"type": "object", "properties": {}})),
            })
            .collect()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> ToolResult {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.tool_error.lock().unwrap().clone() {
            return ToolResult::failure(error);
        }
        match name {
            "get_profile" => {
                let delay = *self.profile_delay.lock().unwrap();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                self.profile.lock().unwrap().clone()
            }
            "get_holdings" => ToolResult::success(
                Value::Null,
                r#"[{"tradingsymbol": "SBIN", "quantity": 10, "average_price": 500.25, "last_price": 812.5}]"#,
            ),
            _ => ToolResult::success(arguments, format!("{name} ok")),
        }
    }

    async fn begin_login(&self) -> Result<String> {
        self.network_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://{}.test/login", self.name))
    }

    async fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
    }
}

/// Provider that always answers with the same text
pub struct CannedProvider {
    reply: String,
    pub calls: AtomicUsize,
}

impl CannedProvider {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.into(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl LlmProvider for CannedProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "canned".into(),
            endpoint: String::new(),
            default_model: "test".into(),
            supports_tools: true,
        }
    }

    async fn health_check(&self) -> agent_core::Result<bool> {
        Ok(true)
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
        _options: &GenerationOptions,
    ) -> agent_core::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Completion::text(&self.reply))
    }

    async fn list_models(&self) -> agent_core::Result<Vec<ModelInfo>> {
        Ok(Vec::new())
    }
}

pub fn template(reply: &str) -> AgentTemplate {
    AgentTemplate::new(Arc::new(CannedProvider::new(reply)), agent_core::AgentConfig::default())
}

/// A Kite-flavoured handle over a fake client
pub fn fake_handle(session: &str, broker: &str) -> (Arc<BrokerHandle>, Arc<FakeClient>) {
    let client = Arc::new(FakeClient::new(broker));
    let mut spec = BrokerSpec::kite("http://unused");
    spec.name = broker.into();
    let handle = BrokerHandle::new(
        HandleKey::new(agent_core::SessionId::from_string(session), broker),
        Arc::new(spec),
        Arc::clone(&client) as Arc<dyn BrokerClient>,
    );
    (Arc::new(handle), client)
}
