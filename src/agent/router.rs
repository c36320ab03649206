//! Timeout, ledger and rate-limit failover around a provider.
//!
//! [`ProviderRouter`] is itself an [`LlmProvider`], so the engine never
//! sees which backend served a call. A rate-limited call is retried once on
//! the first alternate provider.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::message::{ChatRequest, ChatResponse, TokenUsage};
use super::provider::{Capabilities, ChatStream, LlmProvider, ToolDecision};
use super::tool::ToolDefinition;
use super::usage::{UsageLedger, UsageRecord};
use crate::error::ProviderError;

/// Provider wrapper adding deadlines, usage accounting and failover.
pub struct ProviderRouter {
    primary: Arc<dyn LlmProvider>,
    alternates: Vec<Arc<dyn LlmProvider>>,
    ledger: Arc<UsageLedger>,
    timeout: Duration,
    spent: Mutex<TokenUsage>,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let alternates: Vec<&str> = self.alternates.iter().map(|p| p.name()).collect();
        f.debug_struct("ProviderRouter")
            .field("primary", &self.primary.name())
            .field("alternates", &alternates)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ProviderRouter {
    /// Routes calls to `primary`, failing over to `alternates[0]` on rate limits.
    #[must_use]
    pub fn new(
        primary: Arc<dyn LlmProvider>,
        alternates: Vec<Arc<dyn LlmProvider>>,
        ledger: Arc<UsageLedger>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            alternates,
            ledger,
            timeout,
            spent: Mutex::new(TokenUsage::default()),
        }
    }

    /// Tokens used by every call routed through this instance.
    #[must_use]
    pub fn spent(&self) -> TokenUsage {
        *self
            .spent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Runs one call with a deadline and records it in the ledger.
    async fn timed<T, F>(
        &self,
        provider: &dyn LlmProvider,
        operation: &'static str,
        call: F,
        usage_of: fn(&T) -> TokenUsage,
    ) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>> + Send,
    {
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(ProviderError::Timeout {
                    provider: provider.name(),
                    after: self.timeout,
                })
            });
        let elapsed = started.elapsed();

        let usage = result.as_ref().map(usage_of).unwrap_or_default();
        self.spent
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .accumulate(&usage);
        self.ledger.record(UsageRecord {
            provider: provider.name().to_string(),
            model: provider.model().to_string(),
            operation,
            usage,
            cost: provider.estimate_cost(&usage),
            elapsed,
            success: result.is_ok(),
        });

        match &result {
            Ok(_) => debug!(
                provider = provider.name(),
                operation,
                tokens = usage.total_tokens,
                elapsed_ms = elapsed.as_millis(),
                "provider call completed"
            ),
            Err(e) => debug!(provider = provider.name(), operation, error = %e, "provider call failed"),
        }
        result
    }

    fn failover_target(&self, error: &ProviderError) -> Option<&Arc<dyn LlmProvider>> {
        if !error.is_rate_limited() {
            return None;
        }
        let target = self.alternates.first()?;
        warn!(
            from = self.primary.name(),
            to = target.name(),
            "rate limited, failing over"
        );
        Some(target)
    }

    fn stream_with_deadline(&self, provider: &'static str, stream: ChatStream) -> ChatStream {
        let after = self.timeout;
        let guarded = stream.timeout(after).map(move |item| {
            item.unwrap_or(Err(ProviderError::Timeout { provider, after }))
        });
        Box::pin(guarded)
    }

    async fn open_stream(
        &self,
        provider: &dyn LlmProvider,
        request: &ChatRequest,
    ) -> Result<ChatStream, ProviderError> {
        let stream = self
            .timed(provider, "stream", provider.generate_stream(request), no_usage)
            .await?;
        Ok(self.stream_with_deadline(provider.name(), stream))
    }
}

fn no_usage(_: &ChatStream) -> TokenUsage {
    TokenUsage::default()
}

fn response_usage(response: &ChatResponse) -> TokenUsage {
    response.usage
}

fn decision_usage(decision: &ToolDecision) -> TokenUsage {
    match decision {
        ToolDecision::Calls { usage, .. } => *usage,
        ToolDecision::Text(response) => response.usage,
    }
}

#[async_trait]
impl LlmProvider for ProviderRouter {
    fn name(&self) -> &'static str {
        self.primary.name()
    }

    fn model(&self) -> &str {
        self.primary.model()
    }

    fn capabilities(&self) -> Capabilities {
        self.primary.capabilities()
    }

    fn estimate_cost(&self, usage: &TokenUsage) -> f64 {
        self.primary.estimate_cost(usage)
    }

    async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let primary = self.primary.as_ref();
        match self
            .timed(primary, "generate", primary.generate(request), response_usage)
            .await
        {
            Err(e) => match self.failover_target(&e) {
                Some(alt) => {
                    self.timed(alt.as_ref(), "generate", alt.generate(request), response_usage)
                        .await
                }
                None => Err(e),
            },
            ok => ok,
        }
    }

    async fn generate_stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError> {
        match self.open_stream(self.primary.as_ref(), request).await {
            Err(e) => match self.failover_target(&e) {
                Some(alt) => self.open_stream(alt.as_ref(), request).await,
                None => Err(e),
            },
            ok => ok,
        }
    }

    async fn generate_with_tools(
        &self,
        request: &ChatRequest,
        tools: &[ToolDefinition],
    ) -> Result<ToolDecision, ProviderError> {
        let primary = self.primary.as_ref();
        match self
            .timed(
                primary,
                "tools",
                primary.generate_with_tools(request, tools),
                decision_usage,
            )
            .await
        {
            Err(e) => match self.failover_target(&e) {
                Some(alt) => {
                    self.timed(
                        alt.as_ref(),
                        "tools",
                        alt.generate_with_tools(request, tools),
                        decision_usage,
                    )
                    .await
                }
                None => Err(e),
            },
            ok => ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Scripted {
        name: &'static str,
        fail_with_rate_limit: bool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, fail_with_rate_limit: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail_with_rate_limit,
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn model(&self) -> &str {
            "gpt-4o-mini"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                streaming: true,
                function_calling: false,
            }
        }

        async fn generate(&self, _request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_with_rate_limit {
                return Err(ProviderError::RateLimited {
                    provider: self.name,
                    message: "429".to_string(),
                });
            }
            Ok(ChatResponse {
                content: format!("from {}", self.name),
                usage: TokenUsage::new(10, 5),
                finish_reason: None,
            })
        }

        async fn generate_stream(
            &self,
            _request: &ChatRequest,
        ) -> Result<ChatStream, ProviderError> {
            let chunks = vec![Ok("a".to_string()), Ok("b".to_string())];
            Ok(Box::pin(tokio_stream::iter(chunks)))
        }
    }

    fn router(primary: Arc<Scripted>, alternates: Vec<Arc<dyn LlmProvider>>) -> ProviderRouter {
        ProviderRouter::new(
            primary,
            alternates,
            Arc::new(UsageLedger::new()),
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn test_failover_on_rate_limit() {
        let primary = Scripted::new("openai", true, Duration::ZERO);
        let backup = Scripted::new("groq", false, Duration::ZERO);
        let r = router(primary.clone(), vec![backup.clone() as Arc<dyn LlmProvider>]);

        let response = r
            .generate(&ChatRequest::new("s", "q"))
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(response.content, "from groq");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backup.calls.load(Ordering::SeqCst), 1);

        let totals = r.ledger.totals();
        assert_eq!(totals.calls, 2);
        assert!((totals.success_rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rate_limit_without_alternate_is_returned() {
        let r = router(Scripted::new("openai", true, Duration::ZERO), Vec::new());
        let result = r.generate(&ChatRequest::new("s", "q")).await;
        assert!(matches!(result, Err(ProviderError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let r = router(
            Scripted::new("openai", false, Duration::from_secs(5)),
            Vec::new(),
        );
        let result = r.generate(&ChatRequest::new("s", "q")).await;
        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_stream_passes_chunks() {
        let r = router(Scripted::new("openai", false, Duration::ZERO), Vec::new());
        let stream = r
            .generate_stream(&ChatRequest::new("s", "q"))
            .await
            .unwrap_or_else(|_| unreachable!());
        let chunks: Vec<String> = stream.filter_map(Result::ok).collect().await;
        assert_eq!(chunks, vec!["a".to_string(), "b".to_string()]);
    }
}
