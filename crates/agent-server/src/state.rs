//! Application State

use std::sync::Arc;

use agent_core::LlmProvider;
use broker_gateway::BrokerGateway;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Per-session broker handles and chat routing
    pub gateway: Arc<BrokerGateway>,

    /// Chat-completion backend, kept for health reporting
    pub provider: Arc<dyn LlmProvider>,
}
