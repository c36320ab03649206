//! Shared doubles for the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};

use ragstudy::agent::{
    AgenticEngine, Capabilities, ChatMessage, ChatRequest, ChatResponse, ChatStream,
    ContextBuffer, EngineBuilder, EngineConfig, FixedProviders, LlmProvider, TokenUsage,
    ToolCall, ToolDecision, ToolDefinition, Verdict, Verifier,
};
use ragstudy::error::{ProviderError, StoreError, ToolError};
use ragstudy::store::{SearchFilter, StoreHit, StoredChunk, VectorStore};
use ragstudy::tools::web_search::SearchCache;
use ragstudy::tools::{CalculatorTool, SearchBackend, ToolRegistry, WebHit, WebSearchTool};

/// What a [`ScriptedProvider`] does on every call.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Answers with this text.
    Answer(String),
    /// Fails with a transport error.
    Fail,
    /// Fails with a rate limit.
    RateLimited,
}

/// Provider with fixed behavior that records the prompts it receives.
pub struct ScriptedProvider {
    name: &'static str,
    behavior: Behavior,
    streaming: bool,
    chunk_delay: Option<Duration>,
    tool_calls: Option<Vec<ToolCall>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    fn build(name: &'static str, behavior: Behavior) -> Self {
        Self {
            name,
            behavior,
            streaming: false,
            chunk_delay: None,
            tool_calls: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self::build(name, behavior))
    }

    pub fn answering(name: &'static str, text: &str) -> Arc<Self> {
        Self::new(name, Behavior::Answer(text.to_string()))
    }

    pub fn streaming(name: &'static str, text: &str) -> Arc<Self> {
        Arc::new(Self {
            streaming: true,
            ..Self::build(name, Behavior::Answer(text.to_string()))
        })
    }

    /// Streams one word every `delay`.
    pub fn slow_streaming(name: &'static str, text: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            streaming: true,
            chunk_delay: Some(delay),
            ..Self::build(name, Behavior::Answer(text.to_string()))
        })
    }

    /// Supports function calling and answers every tool request with `calls`.
    pub fn calling_tools(name: &'static str, text: &str, calls: Vec<ToolCall>) -> Arc<Self> {
        Arc::new(Self {
            tool_calls: Some(calls),
            ..Self::build(name, Behavior::Answer(text.to_string()))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Last user message of every request, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|messages| messages.last().map(|m| m.content.clone()))
            .collect()
    }

    /// Full message list of every request, in call order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }

    fn respond(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.messages.clone());
        match &self.behavior {
            Behavior::Answer(text) => Ok(text.clone()),
            Behavior::Fail => Err(ProviderError::Request {
                provider: self.name,
                message: "connection refused".to_string(),
                status: None,
            }),
            Behavior::RateLimited => Err(ProviderError::RateLimited {
                provider: self.name,
                message: "slow down".to_string(),
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: self.streaming,
            function_calling: self.tool_calls.is_some(),
        }
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let content = self.respond(request)?;
        Ok(ChatResponse {
            content,
            usage: TokenUsage::new(100, 20),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn generate_stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError> {
        let content = self.respond(request)?;
        let pieces: Vec<Result<String, ProviderError>> = content
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        let chunks: ChatStream = match self.chunk_delay {
            Some(delay) => Box::pin(stream::iter(pieces).then(move |piece| async move {
                tokio::time::sleep(delay).await;
                piece
            })),
            None => Box::pin(stream::iter(pieces)),
        };
        Ok(chunks)
    }

    async fn generate_with_tools(
        &self,
        request: &ChatRequest,
        _tools: &[ToolDefinition],
    ) -> Result<ToolDecision, ProviderError> {
        match &self.tool_calls {
            Some(calls) => {
                self.respond(request)?;
                Ok(ToolDecision::Calls {
                    calls: calls.clone(),
                    usage: TokenUsage::new(50, 10),
                })
            }
            None => self.generate(request).await.map(ToolDecision::Text),
        }
    }
}

/// Store returning fixed chunks, honoring the source filter.
pub struct FixedStore {
    hits: Vec<StoreHit>,
}

impl FixedStore {
    pub fn new(chunks: &[(&str, &str, &str)]) -> Arc<Self> {
        let hits = chunks
            .iter()
            .enumerate()
            .map(|(i, (source, name, content))| StoreHit {
                chunk: StoredChunk {
                    source_id: (*source).to_string(),
                    source_name: Some((*name).to_string()),
                    offset: u32::try_from(i).unwrap(),
                    content: (*content).to_string(),
                    line: Some(1),
                    page: None,
                    session_id: None,
                },
                score: 0.9,
            })
            .collect();
        Arc::new(Self { hits })
    }

    fn visible(&self, filter: &SearchFilter) -> Vec<StoreHit> {
        self.hits
            .iter()
            .filter(|h| {
                filter
                    .sources
                    .as_ref()
                    .is_none_or(|s| s.contains(&h.chunk.source_id))
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl VectorStore for FixedStore {
    fn dimensions(&self) -> usize {
        384
    }

    async fn search(
        &self,
        _embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let mut hits = self.visible(filter);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn count(&self, filter: &SearchFilter) -> Result<usize, StoreError> {
        Ok(self.visible(filter).len())
    }
}

/// Store whose every call fails.
pub struct FailingStore;

#[async_trait]
impl VectorStore for FailingStore {
    fn dimensions(&self) -> usize {
        384
    }

    async fn search(
        &self,
        _embedding: &[f32],
        _limit: usize,
        _filter: &SearchFilter,
    ) -> Result<Vec<StoreHit>, StoreError> {
        Err(StoreError::Poisoned)
    }

    async fn count(&self, _filter: &SearchFilter) -> Result<usize, StoreError> {
        Err(StoreError::Poisoned)
    }
}

/// Search backend returning three fixed hits.
pub struct FixedSearch;

#[async_trait]
impl SearchBackend for FixedSearch {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>, ToolError> {
        Ok((1..=3)
            .take(max_results)
            .map(|i| WebHit {
                title: format!("Result {i} for {query}"),
                url: format!("https://example.com/{i}"),
                snippet: format!("Rust 1.{i}0 was released with new features"),
                score: 0.0,
            })
            .collect())
    }
}

/// Verifier that rejects every draft.
pub struct RejectingVerifier;

#[async_trait]
impl Verifier for RejectingVerifier {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    async fn verify(
        &self,
        _question: &str,
        _draft: &str,
        _context: &ContextBuffer,
        _provider: &dyn LlmProvider,
    ) -> Result<Verdict, ProviderError> {
        Ok(Verdict {
            supported: false,
            confidence: 0.1,
            notes: vec!["Answer does not mention the source".to_string()],
        })
    }
}

pub fn calculator_only() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CalculatorTool)).unwrap();
    registry
}

pub fn with_web_search() -> ToolRegistry {
    let mut registry = calculator_only();
    let search = WebSearchTool::new(
        Arc::new(FixedSearch),
        None,
        SearchCache::new(Duration::from_secs(60), 8),
    );
    registry.register(Arc::new(search)).unwrap();
    registry
}

pub fn config() -> EngineConfig {
    EngineConfig::builder()
        .tool_timeout(Duration::from_secs(5))
        .provider_timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Builder over scripted providers, highest priority first, with the
/// calculator as the only tool.
pub fn builder(providers: Vec<Arc<ScriptedProvider>>) -> EngineBuilder {
    builder_with(config(), providers)
}

pub fn builder_with(config: EngineConfig, providers: Vec<Arc<ScriptedProvider>>) -> EngineBuilder {
    let providers: Vec<Arc<dyn LlmProvider>> = providers
        .into_iter()
        .map(|p| p as Arc<dyn LlmProvider>)
        .collect();
    AgenticEngine::builder(config)
        .providers(Arc::new(FixedProviders::new(providers)))
        .tools(calculator_only())
}
