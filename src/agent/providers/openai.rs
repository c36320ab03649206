//! `OpenAI`-compatible provider implementation using the `async-openai` crate.
//!
//! Serves `OpenAI` itself plus Groq and Gemini through their
//! `OpenAI`-compatible endpoints; the [`ProviderKind`] picks the base URL.

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionTool, ChatCompletionToolType,
    CreateChatCompletionRequest, CreateChatCompletionResponse, FunctionObject, ResponseFormat,
};
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::agent::client::ProviderKind;
use crate::agent::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::agent::provider::{
    Capabilities, ChatStream, LlmProvider, ToolDecision, parse_call_arguments,
};
use crate::agent::tool::{ToolCall, ToolDefinition};
use crate::error::ProviderError;

/// `OpenAI`-compatible LLM provider.
///
/// Wraps the `async-openai` client for chat completions. Compatible
/// with any API that follows the `OpenAI` chat completions API.
pub struct OpenAiCompatProvider {
    kind: ProviderKind,
    model: String,
    client: Client<OpenAIConfig>,
}

impl OpenAiCompatProvider {
    /// Creates a provider for `kind` with an optional base URL override.
    #[must_use]
    pub fn new(
        kind: ProviderKind,
        api_key: &str,
        base_url: Option<&str>,
        model: impl Into<String>,
    ) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);

        if let Some(base_url) = base_url {
            openai_config = openai_config.with_api_base(base_url.trim_end_matches('/'));
        }

        Self {
            kind,
            model: model.into(),
            client: Client::with_config(openai_config),
        }
    }

    /// Converts our message type to the `OpenAI` SDK type.
    fn convert_message(msg: &ChatMessage) -> ChatCompletionRequestMessage {
        match msg.role {
            Role::System => {
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
                    name: None,
                })
            }
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
                name: None,
            }),
            Role::Assistant => {
                #[allow(deprecated)]
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                        msg.content.clone(),
                    )),
                    name: None,
                    tool_calls: None,
                    refusal: None,
                    audio: None,
                    function_call: None,
                })
            }
        }
    }

    /// Builds an `OpenAI` chat completion request from our generic request.
    fn build_request(
        &self,
        request: &ChatRequest,
        tools: &[ToolDefinition],
        stream: bool,
    ) -> CreateChatCompletionRequest {
        let messages: Vec<_> = request.messages.iter().map(Self::convert_message).collect();

        let response_format = request.json_mode.then_some(ResponseFormat::JsonObject);

        let tools = if tools.is_empty() {
            None
        } else {
            Some(
                tools
                    .iter()
                    .map(|td| ChatCompletionTool {
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionObject {
                            name: td.name.clone(),
                            description: Some(td.description.clone()),
                            parameters: Some(td.parameters.clone()),
                            strict: None,
                        },
                    })
                    .collect(),
            )
        };

        CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: request.temperature,
            max_completion_tokens: request.max_tokens,
            stream: stream.then_some(true),
            response_format,
            tools,
            ..Default::default()
        }
    }

    fn classify(&self, error: &OpenAIError) -> ProviderError {
        classify_error(self.kind.as_str(), &error.to_string())
    }

    async fn create(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<CreateChatCompletionResponse, ProviderError> {
        self.client
            .chat()
            .create(request)
            .await
            .map_err(|e| self.classify(&e))
    }
}

/// Maps an SDK error message to a [`ProviderError`].
fn classify_error(provider: &'static str, message: &str) -> ProviderError {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("rate limit") || lowered.contains("rate_limit") || lowered.contains("429")
    {
        ProviderError::RateLimited {
            provider,
            message: message.to_string(),
        }
    } else if lowered.contains("api key")
        || lowered.contains("401")
        || lowered.contains("unauthorized")
    {
        ProviderError::Unavailable {
            provider,
            reason: message.to_string(),
        }
    } else {
        ProviderError::Request {
            provider,
            message: message.to_string(),
            status: None,
        }
    }
}

fn convert_usage(response: &CreateChatCompletionResponse) -> TokenUsage {
    response
        .usage
        .as_ref()
        .map_or_else(TokenUsage::default, |u| {
            TokenUsage::new(u.prompt_tokens, u.completion_tokens)
        })
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("client", &"<async-openai::Client>")
            .finish()
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        self.kind.as_str()
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
        let response = self.create(self.build_request(request, &[], false)).await?;
        let choice = response.choices.first();

        let content = choice
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        let finish_reason = choice.and_then(|c| {
            c.finish_reason
                .as_ref()
                .map(|fr| format!("{fr:?}").to_lowercase())
        });

        Ok(ChatResponse {
            content,
            usage: convert_usage(&response),
            finish_reason,
        })
    }

    async fn generate_stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError> {
        let provider = self.name();
        let stream = self
            .client
            .chat()
            .create_stream(self.build_request(request, &[], true))
            .await
            .map_err(|e| self.classify(&e))?;

        let mapped = stream.filter_map(move |result| async move {
            match result {
                Ok(response) => response
                    .choices
                    .first()
                    .and_then(|c| c.delta.content.clone())
                    .filter(|text| !text.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(ProviderError::Stream {
                    provider,
                    message: e.to_string(),
                })),
            }
        });

        Ok(Box::pin(mapped))
    }

    async fn generate_with_tools(
        &self,
        request: &ChatRequest,
        tools: &[ToolDefinition],
    ) -> Result<ToolDecision, ProviderError> {
        let response = self.create(self.build_request(request, tools, false)).await?;
        let usage = convert_usage(&response);
        let Some(choice) = response.choices.first() else {
            return Err(ProviderError::ResponseInvalid {
                provider: self.name(),
                message: "response contained no choices".to_string(),
            });
        };

        if let Some(raw_calls) = choice.message.tool_calls.as_ref().filter(|c| !c.is_empty()) {
            let calls = raw_calls
                .iter()
                .map(|tc| {
                    let arguments =
                        parse_call_arguments(self.name(), &tc.function.name, &tc.function.arguments)?;
                    Ok(ToolCall::new(tc.id.clone(), tc.function.name.clone(), arguments))
                })
                .collect::<Result<Vec<_>, ProviderError>>()?;
            return Ok(ToolDecision::Calls { calls, usage });
        }

        Ok(ToolDecision::Text(ChatResponse {
            content: choice.message.content.clone().unwrap_or_default(),
            usage,
            finish_reason: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message;

    fn provider(kind: ProviderKind) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(kind, "test", kind.base_url(), kind.default_model())
    }

    #[test]
    fn test_convert_system_message() {
        let msg = message::system_message("test");
        let converted = OpenAiCompatProvider::convert_message(&msg);
        assert!(matches!(converted, ChatCompletionRequestMessage::System(_)));
    }

    #[test]
    fn test_convert_assistant_message() {
        let msg = message::assistant_message("earlier answer");
        let converted = OpenAiCompatProvider::convert_message(&msg);
        assert!(matches!(converted, ChatCompletionRequestMessage::Assistant(_)));
    }

    #[test]
    fn test_build_request_uses_own_model_and_json_mode() {
        let groq = provider(ProviderKind::Groq);
        let request = ChatRequest::new("sys", "test").with_max_tokens(100).json();
        let built = groq.build_request(&request, &[], false);
        assert_eq!(built.model, "llama-3.3-70b-versatile");
        assert!(built.response_format.is_some());
        assert!(built.tools.is_none());
        assert_eq!(built.stream, None);
        assert_eq!(groq.name(), "groq");
    }

    #[test]
    fn test_build_request_with_tools() {
        let openai = provider(ProviderKind::OpenAi);
        let tools = vec![ToolDefinition {
            name: "calculator".to_string(),
            description: "Evaluate arithmetic".to_string(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
        }];
        let built = openai.build_request(&ChatRequest::new("sys", "2+2"), &tools, true);
        assert_eq!(built.tools.as_ref().map_or(0, Vec::len), 1);
        assert_eq!(built.stream, Some(true));
    }

    #[test]
    fn test_classify_error() {
        assert!(classify_error("groq", "HTTP 429 Too Many Requests").is_rate_limited());
        assert!(matches!(
            classify_error("openai", "Incorrect API key provided"),
            ProviderError::Unavailable { .. }
        ));
        assert!(matches!(
            classify_error("openai", "connection reset"),
            ProviderError::Request { .. }
        ));
    }
}
