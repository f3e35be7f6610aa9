//! # agent-core
//!
//! Provider-agnostic tool-calling agent plus the data plumbing shared by
//! every broker integration.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Agent                              │
//! │  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐  │
//! │  │  Reasoning  │  │ ToolCatalog  │  │   LlmProvider       │  │
//! │  │    Loop     │──│ ToolExecutor │──│   (Strategy)        │  │
//! │  └─────────────┘  └──────────────┘  └─────────────────────┘  │
//! │   bounded history    normalized schemas   native tool calls  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Supporting modules:
//! - [`schema`]: converts loose broker JSON Schemas into function-calling schemas
//! - [`salvage`]: recovers JSON from prose-wrapped tool output
//! - [`deadline`]: races remote operations against timers

pub mod deadline;
pub mod error;
pub mod message;
pub mod provider;
pub mod reasoning;
pub mod salvage;
pub mod schema;
pub mod session;
pub mod tool;

pub use deadline::{poll_until, with_deadline, DeadlineExceeded};
pub use error::{AgentError, Result};
pub use message::{ConversationHistory, Message, Role};
pub use provider::{Completion, GenerationOptions, LlmProvider, ToolChoice};
pub use reasoning::{Agent, AgentBuilder, AgentConfig, AgentReply};
pub use salvage::salvage_json;
pub use session::{MemorySessionStore, Session, SessionId, SessionStore};
pub use tool::{ToolCall, ToolCatalog, ToolDefinition, ToolExecutor, ToolResult};
