//! Pluggable LLM provider trait.
//!
//! Implementations translate provider-agnostic [`ChatRequest`]/[`ChatResponse`]
//! into provider-specific calls. Callers branch only on [`Capabilities`],
//! never on the concrete backend.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;

use super::message::{ChatRequest, ChatResponse, TokenUsage};
use super::tool::{ToolCall, ToolDefinition};
use super::usage;
use crate::error::ProviderError;

/// Stream of text chunks produced by a provider.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// Optional features a provider supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Incremental text streaming.
    pub streaming: bool,
    /// Structured function/tool calling.
    pub function_calling: bool,
}

/// Outcome of a function-calling request.
#[derive(Debug, Clone)]
pub enum ToolDecision {
    /// The model asked for one or more tool invocations.
    Calls {
        /// Requested calls, arguments already parsed.
        calls: Vec<ToolCall>,
        /// Token usage of the decision.
        usage: TokenUsage,
    },
    /// The model answered in plain text.
    Text(ChatResponse),
}

/// Trait for LLM provider backends.
///
/// Implementations handle the transport layer (HTTP, SDK calls) for a
/// specific provider while presenting a uniform interface to the engine.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g., `"openai"`, `"anthropic"`).
    fn name(&self) -> &'static str;

    /// Model identifier requests are sent to.
    fn model(&self) -> &str;

    /// Features this provider supports.
    fn capabilities(&self) -> Capabilities;

    /// Estimated cost in USD for the given usage.
    fn estimate_cost(&self, usage: &TokenUsage) -> f64 {
        usage::estimate_cost(self.model(), usage)
    }

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API failures, rate limits, or parse errors.
    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Executes a streaming chat completion request.
    ///
    /// Dropping the returned stream cancels the underlying request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the stream cannot be opened.
    async fn generate_stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError>;

    /// Asks the model to either call one of `tools` or answer in text.
    ///
    /// The default implementation, used by providers without function
    /// calling, always answers in text.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::ResponseInvalid`] when the model emits
    /// unparseable call arguments.
    async fn generate_with_tools(
        &self,
        request: &ChatRequest,
        _tools: &[ToolDefinition],
    ) -> Result<ToolDecision, ProviderError> {
        self.generate(request).await.map(ToolDecision::Text)
    }
}

/// Parses raw function-call arguments emitted by a model.
///
/// Empty argument strings parse as an empty object.
pub(crate) fn parse_call_arguments(
    provider: &'static str,
    tool: &str,
    raw: &str,
) -> Result<serde_json::Value, ProviderError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| ProviderError::ResponseInvalid {
        provider,
        message: format!("unparseable arguments for {tool}: {e}"),
    })
}
