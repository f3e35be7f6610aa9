//! Error Types

use std::time::Duration;

use thiserror::Error;

use crate::deadline::DeadlineExceeded;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Agent error types
#[derive(Error, Debug)]
pub enum AgentError {
    /// LLM provider error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// An operation lost the race against its deadline
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Tool output could not be turned into structured data by any salvage strategy
    #[error("Malformed tool output: {0}")]
    MalformedToolOutput(String),

    /// Parse error (e.g., completion payload parsing)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Session error
    #[error("Session error: {0}")]
    Session(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rate limited
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Check if error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::RateLimited(_) | Self::Timeout { .. }
        )
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(msg) => format!("The AI service encountered an error: {msg}"),
            Self::ProviderUnavailable(_) => {
                "The AI service is currently unavailable. Please try again.".into()
            }
            Self::Timeout { operation, .. } => {
                format!("The {operation} took too long. Please try again.")
            }
            Self::MalformedToolOutput(_) => {
                "The broker returned data that could not be understood.".into()
            }
            Self::RateLimited(_) => "You've made too many requests. Please wait a moment.".into(),
            Self::Auth(_) => "Authentication failed. Please check your credentials.".into(),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<DeadlineExceeded> for AgentError {
    fn from(err: DeadlineExceeded) -> Self {
        Self::Timeout {
            operation: err.operation,
            after: err.after,
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_maps_to_timeout() {
        let err: AgentError = DeadlineExceeded {
            operation: "model completion".into(),
            after: Duration::from_secs(3),
        }
        .into();

        assert!(matches!(err, AgentError::Timeout { ref operation, .. } if operation == "model completion"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }
}
