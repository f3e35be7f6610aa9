//! Conversation Messages
//!
//! Standard message format used across the agent system, plus the bounded
//! FIFO history each agent keeps between exchanges.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// Default number of turns retained between exchanges
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Role of a message sender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt/instructions
    System,
    /// User input
    User,
    /// Assistant (LLM) response
    Assistant,
    /// Tool result fed back to the model
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A single conversation turn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    /// Message role
    pub role: Role,

    /// Text content
    pub content: String,

    /// Call id this tool turn answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool invocations requested by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create an assistant turn that requests tool invocations
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a tool result message answering `tool_call_id`
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Whether this is an assistant turn carrying tool calls
    pub fn requests_tools(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// Bounded FIFO conversation history.
///
/// Holds at most `limit` turns; appending beyond the cap evicts the oldest
/// turns first. The system prompt is not stored here, the agent prepends it
/// on every request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: VecDeque<Message>,
    limit: usize,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a history retaining at most `limit` turns (minimum 1)
    pub fn with_limit(limit: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Append a turn, evicting the oldest turns past the cap
    pub fn push(&mut self, message: Message) {
        self.turns.push_back(message);
        self.trim();
    }

    /// Append every turn of a completed exchange
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.turns.extend(messages);
        self.trim();
    }

    fn trim(&mut self) {
        while self.turns.len() > self.limit {
            self.turns.pop_front();
        }
        // A tool turn whose assistant request was evicted is meaningless to the model
        while self.turns.front().is_some_and(|m| m.role == Role::Tool) {
            self.turns.pop_front();
        }
    }

    /// Iterate over retained turns, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.turns.iter()
    }

    /// Get the last message
    pub fn last(&self) -> Option<&Message> {
        self.turns.back()
    }

    /// Drop every retained turn
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Maximum number of retained turns
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Number of retained turns
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello");
        assert!(msg.tool_call_id.is_none());
    }

    #[test]
    fn test_history_never_exceeds_limit() {
        let mut history = ConversationHistory::with_limit(4);
        for i in 0..9 {
            history.push(Message::user(format!("turn {i}")));
        }

        assert_eq!(history.len(), 4);
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["turn 5", "turn 6", "turn 7", "turn 8"]);
    }

    #[test]
    fn test_history_drops_orphaned_tool_turns() {
        let mut history = ConversationHistory::with_limit(2);
        let call = ToolCall::new("call_1", "get_holdings", json!({}));
        history.extend([
            Message::user("show holdings"),
            Message::assistant_with_tools("", vec![call]),
            Message::tool("[]", "call_1"),
            Message::assistant("You hold nothing."),
        ]);

        // Evicting the assistant request would leave the tool turn at the head
        assert_eq!(history.len(), 1);
        assert_ne!(history.iter().next().map(|m| m.role), Some(Role::Tool));
        assert_eq!(history.last().map(|m| m.content.as_str()), Some("You hold nothing."));
    }

    #[test]
    fn test_clear() {
        let mut history = ConversationHistory::new();
        history.push(Message::user("Hi"));
        history.push(Message::assistant("Hello!"));
        assert_eq!(history.len(), 2);

        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.limit(), DEFAULT_HISTORY_LIMIT);
    }
}
