//! Engine configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::AgentError;

/// Default passages returned per query.
pub const DEFAULT_TOP_K: usize = 5;
/// Default bound on concurrent steps and variant searches.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
/// Default re-drafts after an unsupported verdict.
pub const DEFAULT_MAX_REDRAFTS: usize = 1;
/// Default query variants, original question included.
pub const DEFAULT_EXPANSION_VARIANTS: usize = 3;
/// Default hits per variant as a multiple of `top_k`.
pub const DEFAULT_EXPANSION_FACTOR: usize = 2;
/// Default minimum blended relevance kept after re-ranking.
pub const DEFAULT_MIN_RELEVANCE: f32 = 0.1;
/// Default weight of the re-rank score in the blend.
pub const DEFAULT_RERANK_WEIGHT: f32 = 0.5;
/// Default provider call timeout in seconds.
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;
/// Default tool call timeout in seconds.
const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 15;
/// Default per-variant search timeout in seconds.
const DEFAULT_RETRIEVAL_TIMEOUT_SECS: u64 = 20;
/// Default code execution timeout in seconds.
const DEFAULT_CODE_TIMEOUT_SECS: u64 = 10;
/// Default cap on captured code output, in characters.
const DEFAULT_CODE_OUTPUT_LIMIT: usize = 10_000;
/// Default web-search cache TTL in seconds.
const DEFAULT_WEB_CACHE_TTL_SECS: u64 = 3_600;
/// Default web-search cache capacity.
const DEFAULT_WEB_CACHE_CAPACITY: usize = 100;
/// Default conversation messages kept per session.
const DEFAULT_HISTORY_LIMIT: usize = 20;
/// Default number of sessions kept in memory.
const DEFAULT_MAX_SESSIONS: usize = 1_000;
/// Default drafting max tokens.
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Default drafting temperature.
const DEFAULT_DRAFT_TEMPERATURE: f32 = 0.7;
/// Default retention for ingested chunks, in hours.
const DEFAULT_RETENTION_HOURS: u64 = 24;

const DB_FILENAME: &str = "ragstudy.db";

/// Configuration for the agentic engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Preferred provider name; `None` picks by priority.
    pub provider: Option<String>,
    /// Preferred model; `None` uses the provider default.
    pub model: Option<String>,
    /// Anthropic API key.
    pub anthropic_api_key: Option<String>,
    /// `OpenAI` API key.
    pub openai_api_key: Option<String>,
    /// `OpenAI` base URL override (proxies or compatible APIs).
    pub openai_base_url: Option<String>,
    /// Groq API key.
    pub groq_api_key: Option<String>,
    /// Gemini API key.
    pub gemini_api_key: Option<String>,
    /// Tavily search API key.
    pub tavily_api_key: Option<String>,
    /// Google Custom Search API key.
    pub google_search_api_key: Option<String>,
    /// Google Custom Search engine id.
    pub google_search_engine_id: Option<String>,
    /// Vector store database path; `None` keeps the store in memory.
    pub db_path: Option<PathBuf>,
    /// Directory containing prompt template files.
    pub prompt_dir: Option<PathBuf>,
    /// Passages returned per query when the query sets no `top_k`.
    pub default_top_k: usize,
    /// Bound on concurrent steps and variant searches.
    pub max_concurrency: usize,
    /// Re-drafts allowed after an unsupported verdict.
    pub max_redrafts: usize,
    /// Query variants, original question included.
    pub expansion_variants: usize,
    /// Hits per variant as a multiple of `top_k`.
    pub expansion_factor: usize,
    /// Minimum blended relevance kept after re-ranking.
    pub min_relevance: f32,
    /// Weight of the re-rank score in the blend, in `[0, 1]`.
    pub rerank_weight: f32,
    /// Timeout for one provider call (per chunk when streaming).
    pub provider_timeout: Duration,
    /// Timeout for one tool call.
    pub tool_timeout: Duration,
    /// Timeout for one variant search.
    pub retrieval_timeout: Duration,
    /// Timeout for one code execution.
    pub code_timeout: Duration,
    /// Cap on captured stdout/stderr, in characters.
    pub code_output_limit: usize,
    /// Whether `execute_code` is registered as enabled.
    pub code_execution_enabled: bool,
    /// Web-search cache TTL.
    pub web_cache_ttl: Duration,
    /// Web-search cache capacity.
    pub web_cache_capacity: usize,
    /// Conversation messages kept per session.
    pub history_limit: usize,
    /// Sessions kept in memory; the least recently used is evicted beyond it.
    pub max_sessions: usize,
    /// Drafting max tokens.
    pub max_tokens: u32,
    /// Drafting temperature.
    pub draft_temperature: f32,
    /// Retention for ingested chunks; `None` keeps them forever.
    pub retention: Option<Duration>,
    /// Use the provider-backed planner.
    pub llm_planning: bool,
    /// Use provider-backed query expansion.
    pub llm_expansion: bool,
    /// Use provider yes/no re-ranking.
    pub llm_rerank: bool,
    /// Use the provider-backed verifier.
    pub llm_verification: bool,
}

impl EngineConfig {
    /// Creates a new builder for `EngineConfig`.
    #[must_use]
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if a value is out of range.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::builder().from_env().build()
    }

    /// Default database path under the user's data directory.
    #[must_use]
    pub fn default_db_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("ragstudy").join(DB_FILENAME))
    }

    /// Whether any web-search backend is configured.
    #[must_use]
    pub const fn web_search_configured(&self) -> bool {
        self.tavily_api_key.is_some()
            || (self.google_search_api_key.is_some() && self.google_search_engine_id.is_some())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfigBuilder::default().assemble()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    provider: Option<String>,
    model: Option<String>,
    anthropic_api_key: Option<String>,
    openai_api_key: Option<String>,
    openai_base_url: Option<String>,
    groq_api_key: Option<String>,
    gemini_api_key: Option<String>,
    tavily_api_key: Option<String>,
    google_search_api_key: Option<String>,
    google_search_engine_id: Option<String>,
    db_path: Option<PathBuf>,
    prompt_dir: Option<PathBuf>,
    default_top_k: Option<usize>,
    max_concurrency: Option<usize>,
    max_redrafts: Option<usize>,
    expansion_variants: Option<usize>,
    expansion_factor: Option<usize>,
    min_relevance: Option<f32>,
    rerank_weight: Option<f32>,
    provider_timeout: Option<Duration>,
    tool_timeout: Option<Duration>,
    retrieval_timeout: Option<Duration>,
    code_timeout: Option<Duration>,
    code_output_limit: Option<usize>,
    code_execution_enabled: Option<bool>,
    web_cache_ttl: Option<Duration>,
    web_cache_capacity: Option<usize>,
    history_limit: Option<usize>,
    max_sessions: Option<usize>,
    max_tokens: Option<u32>,
    draft_temperature: Option<f32>,
    retention: Option<Option<Duration>>,
    llm_planning: bool,
    llm_expansion: bool,
    llm_rerank: bool,
    llm_verification: bool,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> bool {
    env_string(name).is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
}

impl EngineConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        macro_rules! fill {
            ($field:ident, $value:expr) => {
                if self.$field.is_none() {
                    self.$field = $value;
                }
            };
        }

        fill!(provider, env_string("RAGSTUDY_PROVIDER"));
        fill!(model, env_string("RAGSTUDY_MODEL"));
        fill!(anthropic_api_key, env_string("ANTHROPIC_API_KEY"));
        fill!(openai_api_key, env_string("OPENAI_API_KEY"));
        fill!(openai_base_url, env_string("OPENAI_BASE_URL"));
        fill!(groq_api_key, env_string("GROQ_API_KEY"));
        fill!(gemini_api_key, env_string("GEMINI_API_KEY"));
        fill!(tavily_api_key, env_string("TAVILY_API_KEY"));
        fill!(google_search_api_key, env_string("GOOGLE_SEARCH_API_KEY"));
        fill!(google_search_engine_id, env_string("GOOGLE_SEARCH_ENGINE_ID"));
        fill!(db_path, env_string("RAGSTUDY_DB_PATH").map(PathBuf::from));
        fill!(prompt_dir, env_string("RAGSTUDY_PROMPT_DIR").map(PathBuf::from));
        fill!(default_top_k, env_parse("RAGSTUDY_TOP_K"));
        fill!(max_concurrency, env_parse("RAGSTUDY_MAX_CONCURRENCY"));
        fill!(max_redrafts, env_parse("RAGSTUDY_MAX_REDRAFTS"));
        fill!(max_sessions, env_parse("RAGSTUDY_MAX_SESSIONS"));
        fill!(
            web_cache_ttl,
            env_parse("WEB_SEARCH_CACHE_TTL_SECONDS").map(Duration::from_secs)
        );

        if self.code_execution_enabled.is_none()
            && (env_flag("RAGSTUDY_DISABLE_CODE_EXECUTION")
                || env_string("ENVIRONMENT").is_some_and(|v| v.eq_ignore_ascii_case("production")))
        {
            self.code_execution_enabled = Some(false);
        }
        self
    }

    /// Sets the preferred provider.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the preferred model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the Anthropic API key.
    #[must_use]
    pub fn anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(key.into());
        self
    }

    /// Sets the `OpenAI` API key.
    #[must_use]
    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    /// Sets the `OpenAI` base URL override.
    #[must_use]
    pub fn openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.openai_base_url = Some(url.into());
        self
    }

    /// Sets the Groq API key.
    #[must_use]
    pub fn groq_api_key(mut self, key: impl Into<String>) -> Self {
        self.groq_api_key = Some(key.into());
        self
    }

    /// Sets the Gemini API key.
    #[must_use]
    pub fn gemini_api_key(mut self, key: impl Into<String>) -> Self {
        self.gemini_api_key = Some(key.into());
        self
    }

    /// Sets the Tavily API key.
    #[must_use]
    pub fn tavily_api_key(mut self, key: impl Into<String>) -> Self {
        self.tavily_api_key = Some(key.into());
        self
    }

    /// Sets the Google Custom Search key and engine id.
    #[must_use]
    pub fn google_search(mut self, key: impl Into<String>, engine_id: impl Into<String>) -> Self {
        self.google_search_api_key = Some(key.into());
        self.google_search_engine_id = Some(engine_id.into());
        self
    }

    /// Sets the vector store database path.
    #[must_use]
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Sets the default `top_k`.
    #[must_use]
    pub const fn default_top_k(mut self, n: usize) -> Self {
        self.default_top_k = Some(n);
        self
    }

    /// Sets the maximum concurrency.
    #[must_use]
    pub const fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    /// Sets the maximum number of re-drafts.
    #[must_use]
    pub const fn max_redrafts(mut self, n: usize) -> Self {
        self.max_redrafts = Some(n);
        self
    }

    /// Sets the number of query variants.
    #[must_use]
    pub const fn expansion_variants(mut self, n: usize) -> Self {
        self.expansion_variants = Some(n);
        self
    }

    /// Sets the per-variant hit multiplier.
    #[must_use]
    pub const fn expansion_factor(mut self, n: usize) -> Self {
        self.expansion_factor = Some(n);
        self
    }

    /// Sets the minimum relevance threshold.
    #[must_use]
    pub const fn min_relevance(mut self, threshold: f32) -> Self {
        self.min_relevance = Some(threshold);
        self
    }

    /// Sets the re-rank blend weight.
    #[must_use]
    pub const fn rerank_weight(mut self, weight: f32) -> Self {
        self.rerank_weight = Some(weight);
        self
    }

    /// Sets the provider call timeout.
    #[must_use]
    pub const fn provider_timeout(mut self, duration: Duration) -> Self {
        self.provider_timeout = Some(duration);
        self
    }

    /// Sets the tool call timeout.
    #[must_use]
    pub const fn tool_timeout(mut self, duration: Duration) -> Self {
        self.tool_timeout = Some(duration);
        self
    }

    /// Sets the per-variant search timeout.
    #[must_use]
    pub const fn retrieval_timeout(mut self, duration: Duration) -> Self {
        self.retrieval_timeout = Some(duration);
        self
    }

    /// Sets the code execution timeout.
    #[must_use]
    pub const fn code_timeout(mut self, duration: Duration) -> Self {
        self.code_timeout = Some(duration);
        self
    }

    /// Sets the code output cap.
    #[must_use]
    pub const fn code_output_limit(mut self, chars: usize) -> Self {
        self.code_output_limit = Some(chars);
        self
    }

    /// Enables or disables code execution.
    #[must_use]
    pub const fn code_execution(mut self, enabled: bool) -> Self {
        self.code_execution_enabled = Some(enabled);
        self
    }

    /// Sets the web-search cache TTL.
    #[must_use]
    pub const fn web_cache_ttl(mut self, ttl: Duration) -> Self {
        self.web_cache_ttl = Some(ttl);
        self
    }

    /// Sets the web-search cache capacity.
    #[must_use]
    pub const fn web_cache_capacity(mut self, n: usize) -> Self {
        self.web_cache_capacity = Some(n);
        self
    }

    /// Sets the conversation history limit.
    #[must_use]
    pub const fn history_limit(mut self, n: usize) -> Self {
        self.history_limit = Some(n);
        self
    }

    /// Sets how many sessions are kept in memory.
    #[must_use]
    pub const fn max_sessions(mut self, n: usize) -> Self {
        self.max_sessions = Some(n);
        self
    }

    /// Sets the drafting max tokens.
    #[must_use]
    pub const fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    /// Sets the drafting temperature.
    #[must_use]
    pub const fn draft_temperature(mut self, t: f32) -> Self {
        self.draft_temperature = Some(t);
        self
    }

    /// Sets chunk retention; `None` keeps chunks forever.
    #[must_use]
    pub const fn retention(mut self, retention: Option<Duration>) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Enables the provider-backed planner.
    #[must_use]
    pub const fn llm_planning(mut self, enabled: bool) -> Self {
        self.llm_planning = enabled;
        self
    }

    /// Enables provider-backed query expansion.
    #[must_use]
    pub const fn llm_expansion(mut self, enabled: bool) -> Self {
        self.llm_expansion = enabled;
        self
    }

    /// Enables provider yes/no re-ranking.
    #[must_use]
    pub const fn llm_rerank(mut self, enabled: bool) -> Self {
        self.llm_rerank = enabled;
        self
    }

    /// Enables the provider-backed verifier.
    #[must_use]
    pub const fn llm_verification(mut self, enabled: bool) -> Self {
        self.llm_verification = enabled;
        self
    }

    /// Builds the [`EngineConfig`].
    ///
    /// No API key is required here; a missing provider surfaces per query.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if concurrency, `top_k` or the
    /// expansion settings are zero, or a weight is outside `[0, 1]`.
    pub fn build(self) -> Result<EngineConfig, AgentError> {
        let config = self.assemble();

        if config.max_concurrency == 0 {
            return Err(config_error("max_concurrency must be at least 1"));
        }
        if config.default_top_k == 0 {
            return Err(config_error("default_top_k must be at least 1"));
        }
        if config.expansion_variants == 0 || config.expansion_factor == 0 {
            return Err(config_error("expansion settings must be at least 1"));
        }
        if !(0.0..=1.0).contains(&config.rerank_weight) {
            return Err(config_error("rerank_weight must be within [0, 1]"));
        }
        if !config.min_relevance.is_finite() {
            return Err(config_error("min_relevance must be finite"));
        }
        Ok(config)
    }

    fn assemble(self) -> EngineConfig {
        EngineConfig {
            provider: self.provider,
            model: self.model,
            anthropic_api_key: self.anthropic_api_key,
            openai_api_key: self.openai_api_key,
            openai_base_url: self.openai_base_url,
            groq_api_key: self.groq_api_key,
            gemini_api_key: self.gemini_api_key,
            tavily_api_key: self.tavily_api_key,
            google_search_api_key: self.google_search_api_key,
            google_search_engine_id: self.google_search_engine_id,
            db_path: self.db_path,
            prompt_dir: self.prompt_dir,
            default_top_k: self.default_top_k.unwrap_or(DEFAULT_TOP_K),
            max_concurrency: self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
            max_redrafts: self.max_redrafts.unwrap_or(DEFAULT_MAX_REDRAFTS),
            expansion_variants: self
                .expansion_variants
                .unwrap_or(DEFAULT_EXPANSION_VARIANTS),
            expansion_factor: self.expansion_factor.unwrap_or(DEFAULT_EXPANSION_FACTOR),
            min_relevance: self.min_relevance.unwrap_or(DEFAULT_MIN_RELEVANCE),
            rerank_weight: self.rerank_weight.unwrap_or(DEFAULT_RERANK_WEIGHT),
            provider_timeout: self
                .provider_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS)),
            tool_timeout: self
                .tool_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS)),
            retrieval_timeout: self
                .retrieval_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_RETRIEVAL_TIMEOUT_SECS)),
            code_timeout: self
                .code_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_CODE_TIMEOUT_SECS)),
            code_output_limit: self.code_output_limit.unwrap_or(DEFAULT_CODE_OUTPUT_LIMIT),
            code_execution_enabled: self.code_execution_enabled.unwrap_or(true),
            web_cache_ttl: self
                .web_cache_ttl
                .unwrap_or(Duration::from_secs(DEFAULT_WEB_CACHE_TTL_SECS)),
            web_cache_capacity: self
                .web_cache_capacity
                .unwrap_or(DEFAULT_WEB_CACHE_CAPACITY),
            history_limit: self.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            max_sessions: self.max_sessions.unwrap_or(DEFAULT_MAX_SESSIONS),
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            draft_temperature: self.draft_temperature.unwrap_or(DEFAULT_DRAFT_TEMPERATURE),
            retention: self
                .retention
                .unwrap_or(Some(Duration::from_secs(DEFAULT_RETENTION_HOURS * 3_600))),
            llm_planning: self.llm_planning,
            llm_expansion: self.llm_expansion,
            llm_rerank: self.llm_rerank,
            llm_verification: self.llm_verification,
        }
    }
}

fn config_error(message: &str) -> AgentError {
    AgentError::Config {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = EngineConfig::builder()
            .build()
            .unwrap_or_else(|_| unreachable!());
        assert!(config.provider.is_none());
        assert_eq!(config.default_top_k, DEFAULT_TOP_K);
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.max_redrafts, DEFAULT_MAX_REDRAFTS);
        assert_eq!(config.code_timeout, Duration::from_secs(10));
        assert_eq!(config.code_output_limit, 10_000);
        assert_eq!(config.web_cache_ttl, Duration::from_secs(3_600));
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.max_sessions, DEFAULT_MAX_SESSIONS);
        assert_eq!(config.retention, Some(Duration::from_secs(86_400)));
        assert!(config.code_execution_enabled);
        assert!(!config.llm_planning);
    }

    #[test]
    fn test_builder_no_api_key_required() {
        assert!(EngineConfig::builder().build().is_ok());
    }

    #[test]
    fn test_builder_rejects_zero_concurrency() {
        let result = EngineConfig::builder().max_concurrency(0).build();
        assert!(matches!(result, Err(AgentError::Config { .. })));
    }

    #[test]
    fn test_builder_rejects_weight_out_of_range() {
        let result = EngineConfig::builder().rerank_weight(1.5).build();
        assert!(matches!(result, Err(AgentError::Config { .. })));
    }

    #[test]
    fn test_builder_custom_values() {
        let config = EngineConfig::builder()
            .provider("groq")
            .model("llama-3.1-8b-instant")
            .max_redrafts(2)
            .code_execution(false)
            .retention(None)
            .google_search("key", "cx")
            .build()
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(config.provider.as_deref(), Some("groq"));
        assert_eq!(config.model.as_deref(), Some("llama-3.1-8b-instant"));
        assert_eq!(config.max_redrafts, 2);
        assert!(!config.code_execution_enabled);
        assert!(config.retention.is_none());
        assert!(config.web_search_configured());
    }
}
