//! Broker Handle
//!
//! Everything one session holds for one broker: the protocol client, the
//! auth state, the tool catalog and the agent. Connect, login and verify are
//! serialized per handle; chat and tool requests are gated on the auth state
//! and refused without any network traffic unless it is `Authenticated`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use agent_core::{Agent, AgentConfig, AgentReply, LlmProvider, SessionId, ToolCall, ToolCatalog, ToolExecutor, ToolResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use crate::auth::{AuthEvent, AuthState};
use crate::broker::BrokerSpec;
use crate::client::{BrokerClient, NativeTool};
use crate::error::{BrokerError, Result};

/// Registry key: one handle per broker per session
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleKey {
    pub session: SessionId,
    pub broker: String,
}

impl HandleKey {
    pub fn new(session: SessionId, broker: &str) -> Self {
        Self {
            session,
            broker: broker.to_lowercase(),
        }
    }
}

impl std::fmt::Display for HandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.session, self.broker)
    }
}

/// What a handle needs to build its agent once authenticated
#[derive(Clone)]
pub struct AgentTemplate {
    pub provider: Arc<dyn LlmProvider>,
    pub config: AgentConfig,
}

impl AgentTemplate {
    pub fn new(provider: Arc<dyn LlmProvider>, config: AgentConfig) -> Self {
        Self { provider, config }
    }
}

/// Outcome of a verify request
#[derive(Clone, Debug, Serialize)]
pub struct Verification {
    pub authenticated: bool,
    pub tool_count: usize,
    #[serde(flatten)]
    pub state: AuthState,
}

/// Caller-facing view of a handle
#[derive(Clone, Debug, Serialize)]
pub struct HandleStatus {
    pub broker: String,
    pub display_name: String,
    #[serde(flatten)]
    pub state: AuthState,
    pub authenticated: bool,
    pub active: bool,
    pub tool_count: usize,
}

impl HandleStatus {
    /// Status of a broker the session has not touched
    pub fn disconnected(spec: &BrokerSpec) -> Self {
        Self {
            broker: spec.name.clone(),
            display_name: spec.display_name.clone(),
            state: AuthState::Disconnected,
            authenticated: false,
            active: false,
            tool_count: 0,
        }
    }
}

pub struct BrokerHandle {
    key: HandleKey,
    spec: Arc<BrokerSpec>,
    client: Arc<dyn BrokerClient>,
    state: Arc<RwLock<AuthState>>,
    /// Serializes connect, login and verify
    flow: Mutex<()>,
    catalog: RwLock<ToolCatalog>,
    agent: Mutex<Option<Agent>>,
    retired: Arc<AtomicBool>,
}

impl BrokerHandle {
    pub fn new(key: HandleKey, spec: Arc<BrokerSpec>, client: Arc<dyn BrokerClient>) -> Self {
        Self {
            key,
            spec,
            client,
            state: Arc::new(RwLock::new(AuthState::Disconnected)),
            flow: Mutex::new(()),
            catalog: RwLock::new(ToolCatalog::new()),
            agent: Mutex::new(None),
            retired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub const fn key(&self) -> &HandleKey {
        &self.key
    }

    pub fn spec(&self) -> &BrokerSpec {
        &self.spec
    }

    pub async fn state(&self) -> AuthState {
        self.state.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.state.read().await.is_authenticated()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_retired() {
            return Err(BrokerError::SessionClosed);
        }
        Ok(())
    }

    async fn transition(&self, event: AuthEvent) -> AuthState {
        transition(&self.state, &self.key, &event).await
    }

    fn not_authenticated(&self, state: &AuthState) -> BrokerError {
        BrokerError::NotAuthenticated {
            broker: self.spec.name.clone(),
            next_step: state.next_step().into(),
        }
    }

    /// Handshake with the broker. A no-op when already connected.
    pub async fn connect(&self) -> Result<AuthState> {
        self.ensure_live()?;
        let _flow = self.flow.lock().await;
        self.connect_locked().await
    }

    async fn connect_locked(&self) -> Result<AuthState> {
        let state = self.state().await;
        if !matches!(state, AuthState::Disconnected | AuthState::Expired) {
            self.client.connect().await?;
            return Ok(state);
        }

        self.transition(AuthEvent::Connect).await;
        if let Err(e) = self.client.connect().await {
            self.transition(AuthEvent::ConnectFailed).await;
            self.client.cleanup().await;
            return Err(e);
        }
        Ok(self.state().await)
    }

    /// Start the browser login and return the URL the user must open
    pub async fn login(&self) -> Result<String> {
        self.ensure_live()?;
        let _flow = self.flow.lock().await;

        if self.state().await.is_authenticated() {
            return Err(BrokerError::AlreadyAuthenticated {
                broker: self.spec.name.clone(),
            });
        }
        self.connect_locked().await?;

        let login_url = self.client.begin_login().await?;
        self.transition(AuthEvent::LoginIssued {
            login_url: login_url.clone(),
        })
        .await;
        tracing::info!(key = %self.key, "Login URL issued");
        Ok(login_url)
    }

    /// Attach an access token from an OAuth callback.
    ///
    /// Only valid while a login is pending; verify afterwards.
    pub async fn attach_credentials(&self, token: &str) -> Result<()> {
        self.ensure_live()?;
        let _flow = self.flow.lock().await;

        let state = self.state().await;
        if !matches!(state, AuthState::AwaitingUserLogin { .. }) {
            return Err(self.not_authenticated(&state));
        }
        self.client.attach_credentials(token).await
    }

    /// Check whether the user has completed the login.
    ///
    /// A placeholder profile or a failed profile call sends the handle back
    /// to `AwaitingUserLogin` and reports `authenticated: false`. On success
    /// the tool catalog is fetched and a fresh agent is built.
    pub async fn verify(&self, template: &AgentTemplate) -> Result<Verification> {
        self.ensure_live()?;
        let _flow = self.flow.lock().await;

        let state = self.state().await;
        if state.is_authenticated() {
            return Ok(Verification {
                authenticated: true,
                tool_count: self.catalog.read().await.len(),
                state,
            });
        }
        // Holding the flow lock, a `Verifying` state can only be left over
        // from a verification whose caller gave up
        if !matches!(state, AuthState::AwaitingUserLogin { .. } | AuthState::Verifying { .. }) {
            return Err(self.not_authenticated(&state));
        }

        self.transition(AuthEvent::Verify).await;
        let _pending = PendingVerification { state: &self.state };
        let profile = self.client.call_tool(&self.spec.profile_tool, json!({})).await;

        if let Some(error) = &profile.error {
            tracing::info!(key = %self.key, %error, "Verification call failed");
            return Ok(self.verification_failed().await);
        }
        if self.spec.placeholder.is_placeholder_response(&profile) {
            tracing::info!(key = %self.key, "Placeholder profile, login not completed yet");
            return Ok(self.verification_failed().await);
        }

        let tools = self.client.list_tools().await;
        let catalog: ToolCatalog = tools.iter().map(NativeTool::to_definition).collect();
        let tool_count = catalog.len();
        let agent = Agent::new(
            Arc::clone(&template.provider),
            Arc::new(self.executor()),
            catalog.clone(),
            template.config.clone(),
        );

        *self.catalog.write().await = catalog;
        *self.agent.lock().await = Some(agent);
        let state = self.transition(AuthEvent::Verified).await;
        self.ensure_live()?;

        tracing::info!(key = %self.key, tool_count, "Broker authenticated");
        Ok(Verification {
            authenticated: true,
            tool_count,
            state,
        })
    }

    async fn verification_failed(&self) -> Verification {
        let state = self.transition(AuthEvent::VerificationFailed).await;
        Verification {
            authenticated: false,
            tool_count: 0,
            state,
        }
    }

    fn executor(&self) -> HandleExecutor {
        HandleExecutor {
            key: self.key.clone(),
            spec: Arc::clone(&self.spec),
            client: Arc::clone(&self.client),
            state: Arc::clone(&self.state),
            retired: Arc::clone(&self.retired),
        }
    }

    /// Run one agent exchange
    pub async fn chat(&self, message: &str) -> Result<AgentReply> {
        self.ensure_live()?;
        let state = self.state().await;
        if !state.is_authenticated() {
            return Err(self.not_authenticated(&state));
        }

        let mut agent = self.agent.lock().await;
        let agent = agent.as_mut().ok_or_else(|| self.not_authenticated(&state))?;
        let reply = agent.chat(message).await?;

        // Torn down mid-exchange: the reply belongs to nobody
        self.ensure_live()?;
        Ok(reply)
    }

    /// Invoke one catalog tool directly
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolResult> {
        self.ensure_live()?;
        let state = self.state().await;
        if !state.is_authenticated() {
            return Err(self.not_authenticated(&state));
        }
        if !self.catalog.read().await.contains(name) {
            return Ok(ToolResult::failure(format!("Unknown tool: {name}")));
        }

        let call = ToolCall::new(format!("direct-{name}"), name, arguments);
        Ok(self.executor().execute(&call).await)
    }

    /// Clear the conversation, keeping the connection and catalog
    pub async fn reset(&self) -> Result<()> {
        self.ensure_live()?;
        if let Some(agent) = self.agent.lock().await.as_mut() {
            agent.reset();
        }
        Ok(())
    }

    /// Retire the handle and release its broker connection.
    ///
    /// An exchange still in flight keeps the agent locked; it sees the
    /// retired flag when it finishes and discards its reply.
    pub async fn cleanup(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.client.cleanup().await;
        self.transition(AuthEvent::Disconnect).await;
        *self.catalog.write().await = ToolCatalog::new();
        if let Ok(mut agent) = self.agent.try_lock() {
            agent.take();
        }
        tracing::info!(key = %self.key, "Broker handle cleaned up");
    }

    pub async fn status(&self, active: bool) -> HandleStatus {
        let state = self.state().await;
        HandleStatus {
            broker: self.spec.name.clone(),
            display_name: self.spec.display_name.clone(),
            authenticated: state.is_authenticated(),
            state,
            active,
            tool_count: self.catalog.read().await.len(),
        }
    }
}

/// Returns an abandoned verification to `AwaitingUserLogin` when the verify
/// future is dropped before it settles
struct PendingVerification<'a> {
    state: &'a RwLock<AuthState>,
}

impl Drop for PendingVerification<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_write() {
            if matches!(*state, AuthState::Verifying { .. }) {
                if let Some(next) = state.on(&AuthEvent::VerificationFailed) {
                    *state = next;
                }
            }
        }
    }
}

async fn transition(state: &RwLock<AuthState>, key: &HandleKey, event: &AuthEvent) -> AuthState {
    let mut current = state.write().await;
    match current.on(event) {
        Some(next) => {
            tracing::debug!(%key, from = %*current, to = %next, "Auth transition");
            *current = next;
        }
        None => tracing::debug!(%key, state = %*current, ?event, "Ignoring auth event"),
    }
    current.clone()
}

/// Runs the agent's tool calls against the broker, watching for token expiry
struct HandleExecutor {
    key: HandleKey,
    spec: Arc<BrokerSpec>,
    client: Arc<dyn BrokerClient>,
    state: Arc<RwLock<AuthState>>,
    retired: Arc<AtomicBool>,
}

#[async_trait]
impl ToolExecutor for HandleExecutor {
    async fn execute(&self, call: &ToolCall) -> ToolResult {
        if self.retired.load(Ordering::SeqCst) {
            return ToolResult::failure("Broker session closed");
        }
        let state = self.state.read().await.clone();
        if !state.is_authenticated() {
            return ToolResult::failure(format!("Not authenticated with {}: {}", self.spec.name, state.next_step()));
        }

        let result = self.client.call_tool(&call.name, call.arguments.clone()).await;
        if self.spec.is_token_expiry(&result) {
            tracing::warn!(key = %self.key, tool = %call.name, "Broker token expired");
            transition(&self.state, &self.key, &AuthEvent::Expire).await;
        }
        result
    }
}
