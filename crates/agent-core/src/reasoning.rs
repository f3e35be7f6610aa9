//! Reasoning Loop
//!
//! Drives the "ask model, execute tools, feed results back" cycle using the
//! provider's native tool calling. Each exchange is bounded by an iteration
//! cap, and the conversation carried between exchanges is a bounded FIFO.

use std::sync::Arc;
use std::time::Duration;

use crate::deadline::with_deadline;
use crate::error::{AgentError, Result};
use crate::message::{ConversationHistory, Message, DEFAULT_HISTORY_LIMIT};
use crate::provider::{Completion, GenerationOptions, LlmProvider, TokenUsage};
use crate::tool::{ToolCall, ToolCatalog, ToolDefinition, ToolExecutor, ToolResult};

/// Reply returned once the iteration cap is hit
pub const MAX_ITERATIONS_MESSAGE: &str =
    "I reached the maximum number of tool iterations for this request. \
     Please narrow the question or ask again.";

/// Agent configuration
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// System prompt sent ahead of the history on every request
    pub system_prompt: String,

    /// Maximum model calls per exchange
    pub max_iterations: usize,

    /// Turns retained between exchanges
    pub history_limit: usize,

    /// Deadline for each model completion
    pub model_timeout: Duration,

    /// Generation options
    pub generation: GenerationOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            max_iterations: 8,
            history_limit: DEFAULT_HISTORY_LIMIT,
            model_timeout: Duration::from_secs(120),
            generation: GenerationOptions::default(),
        }
    }
}

impl AgentConfig {
    /// Reject settings the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(AgentError::Config("max_iterations must be at least 1".into()));
        }
        if self.history_limit == 0 {
            return Err(AgentError::Config("history_limit must be at least 1".into()));
        }
        Ok(())
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a trading assistant connected to the user's brokerage account.

Use the available tools to look up holdings, positions, funds, quotes and orders instead of guessing.
Exchange-qualified symbols are handled for you; pass plain trading symbols such as SBIN or INFY.
Never place, modify or cancel an order unless the user explicitly asked for it in this conversation.
Summarize tool results clearly and concisely, with amounts in the account currency.";

/// Outcome of one exchange
#[derive(Clone, Debug)]
pub struct AgentReply {
    /// Final assistant text
    pub content: String,

    /// Model calls made during the exchange
    pub iterations: usize,

    /// Tool calls executed during the exchange
    pub tool_calls_made: usize,

    /// Summed token usage, when the provider reports it
    pub usage: Option<TokenUsage>,

    /// Whether the exchange stopped at the iteration cap
    pub hit_iteration_limit: bool,
}

/// A tool-calling agent bound to one tool catalog and executor.
///
/// The agent exclusively owns its history; callers serialize access.
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    executor: Arc<dyn ToolExecutor>,
    catalog: ToolCatalog,
    definitions: Vec<ToolDefinition>,
    config: AgentConfig,
    history: ConversationHistory,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn ToolExecutor>,
        catalog: ToolCatalog,
        config: AgentConfig,
    ) -> Self {
        let definitions = catalog.definitions().cloned().collect();
        Self {
            provider,
            executor,
            catalog,
            definitions,
            history: ConversationHistory::with_limit(config.history_limit),
            config,
        }
    }

    /// Run one exchange for `user_message`.
    ///
    /// Provider failures abort the exchange and leave the history untouched.
    /// Hitting the iteration cap is not an error: the reply carries
    /// [`MAX_ITERATIONS_MESSAGE`] and `hit_iteration_limit` is set.
    pub async fn chat(&mut self, user_message: &str) -> Result<AgentReply> {
        let mut exchange = vec![Message::user(user_message)];
        let mut usage: Option<TokenUsage> = None;
        let mut tool_calls_made = 0;

        for iteration in 1..=self.config.max_iterations {
            let completion = self.complete(&exchange).await?;
            if let Some(u) = completion.usage {
                *usage.get_or_insert_with(TokenUsage::default) += u;
            }

            if !completion.has_tool_calls() {
                exchange.push(Message::assistant(&completion.content));
                self.history.extend(exchange);
                return Ok(AgentReply {
                    content: completion.content,
                    iterations: iteration,
                    tool_calls_made,
                    usage,
                    hit_iteration_limit: false,
                });
            }

            let Completion { content, tool_calls, .. } = completion;
            exchange.push(Message::assistant_with_tools(content, tool_calls.clone()));

            for call in &tool_calls {
                tracing::debug!(tool = %call.name, call_id = %call.id, iteration, "Executing tool");
                let result = self.execute_tool(call).await;
                if let Some(error) = &result.error {
                    tracing::warn!(tool = %call.name, %error, "Tool call failed");
                }
                exchange.push(Message::tool(result.observation(), call.id.clone()));
                tool_calls_made += 1;
            }
        }

        tracing::warn!(max_iterations = self.config.max_iterations, "Maximum iterations reached");
        exchange.push(Message::assistant(MAX_ITERATIONS_MESSAGE));
        self.history.extend(exchange);

        Ok(AgentReply {
            content: MAX_ITERATIONS_MESSAGE.into(),
            iterations: self.config.max_iterations,
            tool_calls_made,
            usage,
            hit_iteration_limit: true,
        })
    }

    async fn complete(&self, exchange: &[Message]) -> Result<Completion> {
        let mut messages = Vec::with_capacity(self.history.len() + exchange.len() + 1);
        messages.push(Message::system(&self.config.system_prompt));
        messages.extend(self.history.iter().cloned());
        messages.extend_from_slice(exchange);

        with_deadline(
            "model completion",
            self.config.model_timeout,
            self.provider.complete(&messages, &self.definitions, &self.config.generation),
        )
        .await
    }

    /// Execute a tool call, refusing names the model invented
    async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        if !self.catalog.contains(&call.name) {
            return ToolResult::failure(format!("Unknown tool: {}", call.name));
        }
        self.executor.execute(call).await
    }

    /// Forget the conversation, keeping the tool catalog
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Conversation carried between exchanges
    pub const fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Get the tool catalog
    pub const fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Get configuration
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }
}

/// Builder for Agent configuration
pub struct AgentBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    executor: Option<Arc<dyn ToolExecutor>>,
    catalog: ToolCatalog,
    config: AgentConfig,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            executor: None,
            catalog: ToolCatalog::new(),
            config: AgentConfig::default(),
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.generation.model = model.into();
        self
    }

    pub const fn max_iterations(mut self, max: usize) -> Self {
        self.config.max_iterations = max;
        self
    }

    pub const fn history_limit(mut self, limit: usize) -> Self {
        self.config.history_limit = limit;
        self
    }

    pub fn build(self) -> Result<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::Config("Provider is required".into()))?;
        let executor = self
            .executor
            .ok_or_else(|| AgentError::Config("Tool executor is required".into()))?;

        self.config.validate()?;

        Ok(Agent::new(provider, executor, self.catalog, self.config))
    }
}
