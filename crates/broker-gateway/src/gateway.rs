//! Broker Gateway
//!
//! The caller-facing operations: connect, login, verify, chat, reset,
//! logout and status. Every operation names a session; handles are looked up
//! or created in the injected [`SessionRegistry`].

use std::sync::Arc;
use std::time::Duration;

use agent_core::{poll_until, AgentReply, LlmProvider, SessionId, SessionStore, ToolResult};
use serde::Serialize;
use serde_json::Value;

use crate::auth::AuthState;
use crate::broker::{BrokerCatalog, BrokerSpec};
use crate::client::{build_client, BrokerClient};
use crate::config::GatewayConfig;
use crate::error::{BrokerError, Result};
use crate::handle::{AgentTemplate, BrokerHandle, HandleKey, HandleStatus, Verification};
use crate::registry::SessionRegistry;
use crate::selector::ActiveBrokerSelector;
use crate::snapshot::{capture, snapshot_key, PortfolioSnapshot, SnapshotStore};

/// Builds the protocol client for a new handle
pub type ClientFactory = Arc<dyn Fn(Arc<BrokerSpec>) -> Arc<dyn BrokerClient> + Send + Sync>;

/// Reply to a chat request
#[derive(Clone, Debug, Serialize)]
pub struct ChatOutcome {
    pub broker: String,
    pub content: String,
    pub iterations: usize,
    pub tool_calls_made: usize,
    pub hit_iteration_limit: bool,
}

impl ChatOutcome {
    fn new(broker: &str, reply: AgentReply) -> Self {
        Self {
            broker: broker.into(),
            content: reply.content,
            iterations: reply.iterations,
            tool_calls_made: reply.tool_calls_made,
            hit_iteration_limit: reply.hit_iteration_limit,
        }
    }
}

/// Per-session overview
#[derive(Clone, Debug, Serialize)]
pub struct GatewayStatus {
    pub session: SessionId,
    pub active_broker: Option<String>,
    pub brokers: Vec<HandleStatus>,
}

pub struct BrokerGateway {
    catalog: BrokerCatalog,
    registry: Arc<SessionRegistry>,
    selector: ActiveBrokerSelector,
    template: AgentTemplate,
    client_factory: ClientFactory,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    verify_poll_interval: Duration,
}

impl BrokerGateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    pub const fn catalog(&self) -> &BrokerCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn key(&self, session: &SessionId, broker: &str) -> Result<(HandleKey, Arc<BrokerSpec>)> {
        let spec = self.catalog.get(broker)?;
        Ok((HandleKey::new(session.clone(), &spec.name), spec))
    }

    async fn handle_for(&self, session: &SessionId, broker: &str) -> Result<Arc<BrokerHandle>> {
        let (key, spec) = self.key(session, broker)?;
        let factory = &self.client_factory;
        let handle_key = key.clone();
        self.registry
            .get_or_create(&key, move || async move {
                let client = factory(Arc::clone(&spec));
                Ok(BrokerHandle::new(handle_key, spec, client))
            })
            .await
    }

    /// An existing handle; reads never create one
    async fn existing(&self, session: &SessionId, broker: &str) -> Result<Arc<BrokerHandle>> {
        let (key, _) = self.key(session, broker)?;
        self.registry
            .get(&key)
            .await
            .ok_or_else(|| BrokerError::NotAuthenticated {
                broker: key.broker.clone(),
                next_step: AuthState::Disconnected.next_step().into(),
            })
    }

    async fn active_handle(&self, session: &SessionId) -> Result<Arc<BrokerHandle>> {
        let broker = self.selector.active(session).await?.ok_or(BrokerError::NoActiveBroker)?;
        match self.existing(session, &broker).await {
            Ok(handle) => Ok(handle),
            Err(_) => {
                self.selector.clear_if(session, &broker).await?;
                Err(BrokerError::NoActiveBroker)
            }
        }
    }

    pub async fn connect(&self, session: &SessionId, broker: &str) -> Result<AuthState> {
        self.handle_for(session, broker).await?.connect().await
    }

    /// Start a login and return the URL the user must open
    pub async fn login(&self, session: &SessionId, broker: &str) -> Result<String> {
        self.handle_for(session, broker).await?.login().await
    }

    /// Check whether the user finished logging in.
    ///
    /// On success the broker becomes active if the session has none, and a
    /// portfolio snapshot is recorded when a store is configured.
    pub async fn verify(&self, session: &SessionId, broker: &str) -> Result<Verification> {
        let handle = self.existing(session, broker).await?;
        let verification = handle.verify(&self.template).await?;

        if verification.authenticated {
            if self.selector.active(session).await?.is_none() {
                self.selector.select(session, &handle).await?;
            }
            self.record_snapshot(&handle).await;
        }
        Ok(verification)
    }

    /// Verify repeatedly until the login completes or `limit` elapses
    pub async fn verify_until(&self, session: &SessionId, broker: &str, limit: Duration) -> Result<Verification> {
        poll_until("login verification", limit, self.verify_poll_interval, move || async move {
            let verification = self.verify(session, broker).await?;
            Ok(verification.authenticated.then_some(verification))
        })
        .await
    }

    /// Attach an OAuth access token, then verify
    pub async fn attach_token(&self, session: &SessionId, broker: &str, token: &str) -> Result<Verification> {
        self.existing(session, broker).await?.attach_credentials(token).await?;
        self.verify(session, broker).await
    }

    /// Route the session's chat to `broker`
    pub async fn activate(&self, session: &SessionId, broker: &str) -> Result<()> {
        let handle = self.existing(session, broker).await?;
        self.selector.select(session, &handle).await
    }

    /// One agent exchange against the active broker
    pub async fn chat(&self, session: &SessionId, message: &str) -> Result<ChatOutcome> {
        let handle = self.active_handle(session).await?;
        let reply = handle.chat(message).await?;
        Ok(ChatOutcome::new(&handle.key().broker, reply))
    }

    /// Invoke a tool on the active broker directly
    pub async fn call_tool(&self, session: &SessionId, tool: &str, arguments: Value) -> Result<ToolResult> {
        self.active_handle(session).await?.call_tool(tool, arguments).await
    }

    /// Clear the broker's conversation history
    pub async fn reset(&self, session: &SessionId, broker: &str) -> Result<()> {
        self.existing(session, broker).await?.reset().await
    }

    /// Tear down one broker for the session. Returns whether it existed.
    pub async fn logout(&self, session: &SessionId, broker: &str) -> Result<bool> {
        let (key, _) = self.key(session, broker)?;
        let removed = self.registry.remove(&key).await;
        self.selector.clear_if(session, &key.broker).await?;
        tracing::info!(%key, removed, "Broker logout");
        Ok(removed)
    }

    /// Tear down every broker for the session
    pub async fn logout_all(&self, session: &SessionId) -> Result<usize> {
        let removed = self.registry.remove_all_for_session(session).await;
        self.selector.forget(session).await?;
        tracing::info!(%session, removed, "Full logout");
        Ok(removed)
    }

    /// Every catalog broker with its state for this session
    pub async fn status(&self, session: &SessionId) -> Result<GatewayStatus> {
        let active = self.selector.active(session).await?;
        let mut brokers = Vec::with_capacity(self.catalog.len());

        for spec in self.catalog.specs() {
            let key = HandleKey::new(session.clone(), &spec.name);
            let is_active = active.as_deref() == Some(spec.name.as_str());
            let status = match self.registry.get(&key).await {
                Some(handle) => handle.status(is_active).await,
                None => HandleStatus::disconnected(spec),
            };
            brokers.push(status);
        }

        Ok(GatewayStatus {
            session: session.clone(),
            active_broker: active,
            brokers,
        })
    }

    /// Most recent portfolio snapshot for the broker
    pub async fn snapshot(&self, session: &SessionId, broker: &str) -> Result<Option<PortfolioSnapshot>> {
        let Some(store) = &self.snapshots else {
            return Ok(None);
        };
        let (key, _) = self.key(session, broker)?;
        match store.get(&snapshot_key(session, &key.broker)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn record_snapshot(&self, handle: &BrokerHandle) {
        let Some(store) = &self.snapshots else {
            return;
        };
        let key = snapshot_key(&handle.key().session, &handle.key().broker);
        let stored = match capture(handle).await {
            Ok(snapshot) => match serde_json::to_value(&snapshot) {
                Ok(value) => store.put(&key, value).await,
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            tracing::warn!(key = %handle.key(), error = %e, "Portfolio snapshot skipped");
        }
    }

    /// Release every handle; run on process shutdown
    pub async fn shutdown(&self) -> usize {
        self.registry.remove_all().await
    }
}

/// Builder for [`BrokerGateway`]
#[derive(Default)]
pub struct GatewayBuilder {
    catalog: Option<BrokerCatalog>,
    registry: Option<Arc<SessionRegistry>>,
    sessions: Option<Arc<dyn SessionStore>>,
    provider: Option<Arc<dyn LlmProvider>>,
    config: Option<GatewayConfig>,
    http: Option<reqwest::Client>,
    client_factory: Option<ClientFactory>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
}

impl GatewayBuilder {
    pub fn catalog(mut self, catalog: BrokerCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Replace how protocol clients are built
    pub fn client_factory(mut self, factory: ClientFactory) -> Self {
        self.client_factory = Some(factory);
        self
    }

    pub fn snapshots(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    pub fn build(self) -> Result<BrokerGateway> {
        let provider = self
            .provider
            .ok_or_else(|| BrokerError::Config("an LLM provider is required".into()))?;
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(agent_core::MemorySessionStore::new()));
        let config = self.config.unwrap_or_default();
        config.agent.validate()?;
        let catalog = self.catalog.unwrap_or_else(BrokerCatalog::from_env);
        if catalog.is_empty() {
            return Err(BrokerError::Config("no brokers configured".into()));
        }

        let client_factory = self.client_factory.unwrap_or_else(|| {
            let http = self.http.unwrap_or_default();
            let options = config.client.clone();
            let factory: ClientFactory =
                Arc::new(move |spec: Arc<BrokerSpec>| build_client(spec, http.clone(), options.clone()));
            factory
        });

        Ok(BrokerGateway {
            catalog,
            registry: self.registry.unwrap_or_default(),
            selector: ActiveBrokerSelector::new(sessions),
            template: AgentTemplate::new(provider, config.agent),
            client_factory,
            snapshots: self.snapshots,
            verify_poll_interval: config.client.timeouts.verify_poll_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemorySnapshotStore;
    use crate::test_support::{CannedProvider, FakeClient};
    use agent_core::{AgentError, MemorySessionStore};
    use std::sync::Mutex;

    struct Harness {
        gateway: BrokerGateway,
        clients: Arc<Mutex<Vec<Arc<FakeClient>>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_sessions(Arc::new(MemorySessionStore::new()))
        }

        fn with_sessions(sessions: Arc<dyn SessionStore>) -> Self {
            let clients: Arc<Mutex<Vec<Arc<FakeClient>>>> = Arc::default();
            let created = Arc::clone(&clients);
            let factory: ClientFactory = Arc::new(move |spec: Arc<BrokerSpec>| {
                let client = Arc::new(FakeClient::new(&spec.name));
                created.lock().unwrap().push(Arc::clone(&client));
                client as Arc<dyn BrokerClient>
            });

            let gateway = BrokerGateway::builder()
                .catalog(BrokerCatalog::new([
                    BrokerSpec::kite("http://unused"),
                    BrokerSpec::fyers("http://unused"),
                ]))
                .provider(Arc::new(CannedProvider::new("You hold 10 SBIN.")))
                .client_factory(factory)
                .sessions(sessions)
                .snapshots(Arc::new(MemorySnapshotStore::new()))
                .build()
                .unwrap();
            Self { gateway, clients }
        }

        fn client(&self, index: usize) -> Arc<FakeClient> {
            Arc::clone(&self.clients.lock().unwrap()[index])
        }

        async fn authenticate(&self, session: &SessionId, broker: &str) -> Arc<FakeClient> {
            self.gateway.login(session, broker).await.unwrap();
            let last = self.clients.lock().unwrap().len() - 1;
            let client = self.client(last);
            client.set_profile(r#"{"user_id": "AB1234", "fy_id": "XA0001", "user_name": "Asha Rao"}"#);
            assert!(self.gateway.verify(session, broker).await.unwrap().authenticated);
            client
        }
    }

    #[tokio::test]
    async fn test_chat_without_active_broker() {
        let harness = Harness::new();
        let session = SessionId::from_string("s1");
        let err = harness.gateway.chat(&session, "hi").await.unwrap_err();
        assert!(matches!(err, BrokerError::NoActiveBroker));
    }

    #[tokio::test]
    async fn test_unknown_broker() {
        let harness = Harness::new();
        let err = harness.gateway.connect(&SessionId::from_string("s1"), "robinhood").await.unwrap_err();
        assert!(matches!(err, BrokerError::UnknownBroker(_)));
        assert!(harness.gateway.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_verify_auto_selects_and_snapshots() {
        let harness = Harness::new();
        let session = SessionId::from_string("s1");
        harness.authenticate(&session, "kite").await;

        let reply = harness.gateway.chat(&session, "what do I hold?").await.unwrap();
        assert_eq!(reply.broker, "kite");
        assert_eq!(reply.content, "You hold 10 SBIN.");

        let snapshot = harness.gateway.snapshot(&session, "kite").await.unwrap().unwrap();
        assert_eq!(snapshot.holdings[0].symbol, "SBIN");
    }

    #[tokio::test]
    async fn test_second_broker_does_not_steal_selection() {
        let harness = Harness::new();
        let session = SessionId::from_string("s1");
        harness.authenticate(&session, "kite").await;
        harness.authenticate(&session, "fyers").await;

        let status = harness.gateway.status(&session).await.unwrap();
        assert_eq!(status.active_broker.as_deref(), Some("kite"));
        assert!(status.brokers.iter().all(|b| b.authenticated));

        harness.gateway.activate(&session, "fyers").await.unwrap();
        assert_eq!(harness.gateway.chat(&session, "hi").await.unwrap().broker, "fyers");
    }

    #[tokio::test]
    async fn test_logout_clears_selection() {
        let harness = Harness::new();
        let session = SessionId::from_string("s1");
        let client = harness.authenticate(&session, "kite").await;

        assert!(harness.gateway.logout(&session, "kite").await.unwrap());
        assert_eq!(client.cleanups.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(matches!(harness.gateway.chat(&session, "hi").await, Err(BrokerError::NoActiveBroker)));

        let status = harness.gateway.status(&session).await.unwrap();
        assert!(status.brokers.iter().all(|b| !b.authenticated && !b.active));
    }

    #[tokio::test]
    async fn test_logout_all_is_per_session() {
        let harness = Harness::new();
        let alice = SessionId::from_string("alice");
        let bob = SessionId::from_string("bob");
        harness.authenticate(&alice, "kite").await;
        harness.authenticate(&alice, "fyers").await;
        harness.authenticate(&bob, "kite").await;

        assert_eq!(harness.gateway.logout_all(&alice).await.unwrap(), 2);
        assert!(harness.gateway.chat(&bob, "hi").await.is_ok());
        assert_eq!(harness.gateway.shutdown().await, 1);
    }

    #[test]
    fn test_build_rejects_zero_iterations() {
        let mut config = GatewayConfig::default();
        config.agent.max_iterations = 0;
        let result = BrokerGateway::builder()
            .catalog(BrokerCatalog::new([BrokerSpec::kite("http://unused")]))
            .provider(Arc::new(CannedProvider::new("unused")))
            .config(config)
            .build();
        assert!(matches!(result, Err(BrokerError::Agent(AgentError::Config(_)))));
    }

    #[tokio::test]
    async fn test_logout_all_deletes_session_record() {
        let sessions = Arc::new(MemorySessionStore::new());
        let harness = Harness::with_sessions(sessions.clone());
        let alice = SessionId::from_string("alice");
        harness.authenticate(&alice, "kite").await;
        assert!(sessions.load(&alice).await.unwrap().is_some());

        harness.gateway.logout_all(&alice).await.unwrap();
        assert!(sessions.load(&alice).await.unwrap().is_none());
        assert!(harness.gateway.status(&alice).await.unwrap().active_broker.is_none());
    }

    #[tokio::test]
    async fn test_verify_until_times_out_on_placeholder() {
        let harness = Harness::new();
        let session = SessionId::from_string("s1");
        harness.gateway.login(&session, "kite").await.unwrap();

        let err = harness
            .gateway
            .verify_until(&session, "kite", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_abandoned_verify_can_be_retried() {
        let harness = Harness::new();
        let session = SessionId::from_string("s1");
        harness.gateway.login(&session, "kite").await.unwrap();
        let client = harness.client(0);
        client.set_profile(r#"{"user_id": "AB1234", "user_name": "Asha Rao"}"#);
        client.slow_profile(Some(Duration::from_millis(200)));

        let err = harness
            .gateway
            .verify_until(&session, "kite", Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Timeout { .. }));
        let status = harness.gateway.status(&session).await.unwrap();
        let kite = status.brokers.iter().find(|b| b.broker == "kite").unwrap();
        assert_eq!(kite.state.label(), "awaiting_user_login");

        client.slow_profile(None);
        let verification = harness.gateway.verify(&session, "kite").await.unwrap();
        assert!(verification.authenticated);
        assert_eq!(verification.tool_count, 3);
    }

    #[tokio::test]
    async fn test_reset_requires_handle() {
        let harness = Harness::new();
        let session = SessionId::from_string("s1");
        assert!(harness.gateway.reset(&session, "kite").await.is_err());
        harness.authenticate(&session, "kite").await;
        harness.gateway.reset(&session, "kite").await.unwrap();
    }
}
