//! Gateway Configuration
//!
//! Everything is read from the environment; unset or unparseable values fall
//! back to defaults.

use std::time::Duration;

use agent_core::AgentConfig;

/// Deadlines for broker operations
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// `initialize` and `notifications/initialized`
    pub handshake: Duration,
    /// `tools/list`
    pub list: Duration,
    /// `tools/call` and REST endpoints
    pub tool: Duration,
    /// Delay between verification attempts when waiting for a login
    pub verify_poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            list: Duration::from_secs(10),
            tool: Duration::from_secs(60),
            verify_poll_interval: Duration::from_secs(2),
        }
    }
}

impl Timeouts {
    pub fn from_env() -> Self {
        Self::from_vars(env_var)
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |name| parse::<u64>(&var, name).filter(|s| *s > 0).map(Duration::from_secs);
        Self {
            handshake: secs("BROKER_HANDSHAKE_TIMEOUT_SECS").unwrap_or(defaults.handshake),
            list: secs("BROKER_LIST_TIMEOUT_SECS").unwrap_or(defaults.list),
            tool: secs("BROKER_TOOL_TIMEOUT_SECS").unwrap_or(defaults.tool),
            verify_poll_interval: secs("VERIFY_POLL_INTERVAL_SECS").unwrap_or(defaults.verify_poll_interval),
        }
    }
}

/// Settings shared by every protocol client
#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub timeouts: Timeouts,
    /// Identity announced during the handshake
    pub client_name: String,
    pub client_version: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            client_name: "broker-agent".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// Top-level gateway configuration
#[derive(Clone, Debug, Default)]
pub struct GatewayConfig {
    pub client: ClientOptions,
    pub agent: AgentConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self::from_vars(env_var)
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut agent = AgentConfig::default();
        if let Some(max) = positive(&var, "AGENT_MAX_ITERATIONS") {
            agent.max_iterations = max;
        }
        if let Some(limit) = positive(&var, "AGENT_HISTORY_LIMIT") {
            agent.history_limit = limit;
        }
        if let Some(timeout) = parse::<u64>(&var, "LLM_TIMEOUT_SECS").filter(|s| *s > 0) {
            agent.model_timeout = Duration::from_secs(timeout);
        }
        if let Some(prompt) = var("AGENT_SYSTEM_PROMPT") {
            agent.system_prompt = prompt;
        }
        if let Some(model) = var("OPENAI_MODEL").or_else(|| var("OLLAMA_MODEL")) {
            agent.generation.model = model;
        }

        Self {
            client: ClientOptions {
                timeouts: Timeouts::from_vars(&var),
                ..ClientOptions::default()
            },
            agent,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse<T: std::str::FromStr>(var: impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    var(name).and_then(|v| v.trim().parse().ok())
}

/// A count that must be at least 1; anything else keeps the default
fn positive(var: impl Fn(&str) -> Option<String>, name: &str) -> Option<usize> {
    let value = var(name)?;
    match value.trim().parse::<usize>() {
        Ok(n) if n >= 1 => Some(n),
        _ => {
            tracing::warn!(name, value = %value, "Ignoring invalid setting; it must be a whole number of at least 1");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.handshake, Duration::from_secs(10));
        assert_eq!(timeouts.tool, Duration::from_secs(60));
        assert!(timeouts.handshake < timeouts.tool);
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let pairs: Vec<(String, String)> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |name| pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
    }

    #[test]
    fn test_zero_iterations_keeps_default() {
        let config = GatewayConfig::from_vars(vars(&[("AGENT_MAX_ITERATIONS", "0"), ("AGENT_HISTORY_LIMIT", "-3")]));
        assert_eq!(config.agent.max_iterations, AgentConfig::default().max_iterations);
        assert_eq!(config.agent.history_limit, AgentConfig::default().history_limit);
        assert!(config.agent.validate().is_ok());
    }

    #[test]
    fn test_settings_from_vars() {
        let config = GatewayConfig::from_vars(vars(&[
            ("AGENT_MAX_ITERATIONS", " 3 "),
            ("BROKER_TOOL_TIMEOUT_SECS", "5"),
            ("BROKER_LIST_TIMEOUT_SECS", "0"),
        ]));
        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.client.timeouts.tool, Duration::from_secs(5));
        assert_eq!(config.client.timeouts.list, Timeouts::default().list);
    }

    #[test]
    fn test_client_identity() {
        let options = ClientOptions::default();
        assert_eq!(options.client_name, "broker-agent");
        assert!(!options.client_version.is_empty());
    }
}
