//! Error Types for the Broker Gateway

use std::time::Duration;

use agent_core::{AgentError, DeadlineExceeded};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// Transport failure or malformed handshake
    #[error("Connection error: {0}")]
    Connection(String),

    /// The broker's auth state does not permit the request
    #[error("Not authenticated with {broker}: {next_step}")]
    NotAuthenticated { broker: String, next_step: String },

    #[error("{broker} is already authenticated; log out first")]
    AlreadyAuthenticated { broker: String },

    #[error("Login failed: {0}")]
    Login(String),

    /// A tool failed in a context that needs its data
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Malformed tool output: {0}")]
    MalformedToolOutput(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// JSON-RPC error object returned by the broker
    #[error("Remote error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Unknown broker: {0}")]
    UnknownBroker(String),

    #[error("No active broker selected")]
    NoActiveBroker,

    /// The handle was torn down while the request was in flight
    #[error("Broker session closed")]
    SessionClosed,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Agent(AgentError),
}

impl BrokerError {
    /// Stable machine-readable code for API responses
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection_error",
            Self::NotAuthenticated { .. } => "not_authenticated",
            Self::AlreadyAuthenticated { .. } => "already_authenticated",
            Self::Login(_) => "login_failed",
            Self::ToolExecution { .. } => "tool_execution_error",
            Self::MalformedToolOutput(_) => "malformed_tool_output",
            Self::Timeout { .. } => "timeout",
            Self::Rpc { .. } => "remote_error",
            Self::UnknownBroker(_) => "unknown_broker",
            Self::NoActiveBroker => "no_active_broker",
            Self::SessionClosed => "session_closed",
            Self::Unsupported(_) => "unsupported",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Agent(_) => "agent_error",
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection(_) => "Could not reach the broker. Please try connecting again.".into(),
            Self::NotAuthenticated { broker, next_step } => {
                format!("You are not logged in to {broker}. Next step: {next_step}.")
            }
            Self::Timeout { operation, .. } => format!("The broker took too long to respond ({operation})."),
            Self::NoActiveBroker => "Connect and verify a broker before chatting.".into(),
            Self::Agent(inner) => inner.user_message(),
            other => other.to_string(),
        }
    }
}

impl From<AgentError> for BrokerError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Timeout { operation, after } => Self::Timeout { operation, after },
            AgentError::MalformedToolOutput(text) => Self::MalformedToolOutput(text),
            other => Self::Agent(other),
        }
    }
}

impl From<DeadlineExceeded> for BrokerError {
    fn from(err: DeadlineExceeded) -> Self {
        Self::Timeout {
            operation: err.operation,
            after: err.after,
        }
    }
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_errors_keep_their_kind() {
        let timeout: BrokerError = AgentError::Timeout {
            operation: "model completion".into(),
            after: Duration::from_secs(120),
        }
        .into();
        assert_eq!(timeout.code(), "timeout");

        let malformed: BrokerError = AgentError::MalformedToolOutput("prose".into()).into();
        assert_eq!(malformed.code(), "malformed_tool_output");

        let other: BrokerError = AgentError::Provider("500".into()).into();
        assert_eq!(other.code(), "agent_error");
    }

    #[test]
    fn test_not_authenticated_names_next_step() {
        let err = BrokerError::NotAuthenticated {
            broker: "kite".into(),
            next_step: "verify your login".into(),
        };
        assert!(err.user_message().contains("verify your login"));
    }
}
