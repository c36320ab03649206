//! Anthropic Messages API provider over `reqwest`.
//!
//! Streaming reads server-sent events with `eventsource-stream` and yields
//! `text_delta` payloads; tool calls map to `tool_use` content blocks.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::agent::client::unavailable;
use crate::agent::message::{ChatRequest, ChatResponse, Role, TokenUsage};
use crate::agent::provider::{Capabilities, ChatStream, LlmProvider, ToolDecision};
use crate::agent::tool::{ToolCall, ToolDefinition};
use crate::error::ProviderError;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";
/// The Messages API requires `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 4096;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Anthropic Claude provider.
#[derive(Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_url: String,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl AnthropicProvider {
    /// Creates a provider for `model`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(api_key: &str, model: &str) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| unavailable(PROVIDER, e))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            api_url: API_URL.to_string(),
        })
    }

    /// Overrides the endpoint (proxies, test servers).
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    fn body<'a>(
        &'a self,
        request: &'a ChatRequest,
        tools: &'a [ToolDefinition],
        stream: bool,
    ) -> RequestBody<'a> {
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| ApiMessage {
                role: if m.role == Role::Assistant {
                    "assistant"
                } else {
                    "user"
                },
                content: &m.content,
            })
            .collect();

        let mut system = request.system_prompt();
        if request.json_mode {
            let suffix = "Respond with a single JSON value and nothing else.";
            system = Some(system.map_or_else(|| suffix.to_string(), |s| format!("{s}\n\n{suffix}")));
        }

        RequestBody {
            model: &self.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            messages,
            temperature: request.temperature,
            stream,
            tools: tools
                .iter()
                .map(|t| AnthropicTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.parameters,
                })
                .collect(),
        }
    }

    async fn send(&self, body: &RequestBody<'_>) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Request {
                provider: PROVIDER,
                message: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        tracing::warn!(%status, "anthropic request failed");
        Err(status_error(status.as_u16(), &text))
    }

    async fn complete(&self, body: &RequestBody<'_>) -> Result<ApiResponse, ProviderError> {
        let response = self.send(body).await?;
        response
            .json::<ApiResponse>()
            .await
            .map_err(|e| ProviderError::ResponseInvalid {
                provider: PROVIDER,
                message: e.to_string(),
            })
    }
}

fn status_error(status: u16, body: &str) -> ProviderError {
    let message: String = body.chars().take(300).collect();
    match status {
        429 => ProviderError::RateLimited {
            provider: PROVIDER,
            message,
        },
        401 | 403 => ProviderError::Unavailable {
            provider: PROVIDER,
            reason: message,
        },
        _ => ProviderError::Request {
            provider: PROVIDER,
            message,
            status: Some(status),
        },
    }
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl ApiResponse {
    fn usage(&self) -> TokenUsage {
        self.usage
            .as_ref()
            .map_or_else(TokenUsage::default, |u| {
                TokenUsage::new(u.input_tokens, u.output_tokens)
            })
    }

    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamDelta {
    #[serde(rename = "type")]
    delta_type: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct StreamError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

fn parse_stream_event(event_type: &str, data: &str) -> Option<Result<String, ProviderError>> {
    let stream_error = |message: String| {
        Some(Err(ProviderError::Stream {
            provider: PROVIDER,
            message,
        }))
    };

    match event_type {
        "content_block_delta" => match serde_json::from_str::<StreamEvent>(data) {
            Ok(event) => event
                .delta
                .filter(|d| d.delta_type == "text_delta" && !d.text.is_empty())
                .map(|d| Ok(d.text)),
            Err(e) => stream_error(format!("unparseable event: {e}")),
        },
        "error" => match serde_json::from_str::<StreamEvent>(data) {
            Ok(StreamEvent {
                error: Some(err), ..
            }) => {
                if err.error_type == "rate_limit_error" {
                    Some(Err(ProviderError::RateLimited {
                        provider: PROVIDER,
                        message: err.message,
                    }))
                } else {
                    stream_error(format!("{}: {}", err.error_type, err.message))
                }
            }
            _ => stream_error(data.to_string()),
        },
        _ => None,
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: true,
            function_calling: true,
        }
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let response = self.complete(&self.body(request, &[], false)).await?;
        Ok(ChatResponse {
            content: response.text(),
            usage: response.usage(),
            finish_reason: response.stop_reason.clone(),
        })
    }

    async fn generate_stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError> {
        let response = self.send(&self.body(request, &[], true)).await?;
        let events = response.bytes_stream().eventsource();
        let mapped = events.filter_map(|event| match event {
            Ok(event) => parse_stream_event(&event.event, &event.data),
            Err(e) => Some(Err(ProviderError::Stream {
                provider: PROVIDER,
                message: e.to_string(),
            })),
        });
        Ok(Box::pin(mapped))
    }

    async fn generate_with_tools(
        &self,
        request: &ChatRequest,
        tools: &[ToolDefinition],
    ) -> Result<ToolDecision, ProviderError> {
        let response = self.complete(&self.body(request, tools, false)).await?;
        let usage = response.usage();

        let calls: Vec<ToolCall> = response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => {
                    Some(ToolCall::new(id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect();

        if let Some(bad) = calls.iter().find(|c| !c.arguments.is_object()) {
            return Err(ProviderError::ResponseInvalid {
                provider: PROVIDER,
                message: format!("tool_use input for {} is not an object", bad.name),
            });
        }

        if calls.is_empty() {
            Ok(ToolDecision::Text(ChatResponse {
                content: response.text(),
                usage,
                finish_reason: response.stop_reason.clone(),
            }))
        } else {
            Ok(ToolDecision::Calls { calls, usage })
        }
    }
}
