//! Web search tool with backend fallback and a TTL/LRU result cache.
//!
//! The tool delegates to a primary [`SearchBackend`]; when the primary
//! fails it retries an optional fallback backend exactly once. Successful
//! result lists are cached per normalized query.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::backends::{GoogleBackend, TavilyBackend};
use super::{Tool, ToolOutput, parse_args};
use crate::agent::config::EngineConfig;
use crate::agent::tool::ToolDefinition;
use crate::error::ToolError;

/// Registry name of the web search tool.
pub const TOOL_NAME: &str = "web_search";
/// Results returned when the caller does not ask for a count.
pub const DEFAULT_MAX_RESULTS: usize = 5;
/// Upper bound on requested results.
pub const MAX_RESULTS_LIMIT: usize = 10;

/// One web search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebHit {
    /// Page title.
    pub title: String,
    /// Page URL.
    pub url: String,
    /// Text snippet.
    pub snippet: String,
    /// Backend relevance score (0 when the backend gives none).
    #[serde(default)]
    pub score: f32,
}

/// A web search provider.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Backend name for logs and payloads.
    fn name(&self) -> &'static str;

    /// Runs a search.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Execution`] on transport or API failures.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>, ToolError>;
}

struct CacheEntry {
    key: String,
    hits: Vec<WebHit>,
    stored_at: Instant,
}

/// Time-bounded LRU cache of search results.
pub struct SearchCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<VecDeque<CacheEntry>>,
}

impl SearchCache {
    /// Creates a cache holding at most `capacity` entries for `ttl` each.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Cache key: lowercased, trimmed query plus the result count.
    #[must_use]
    pub fn key(query: &str, max_results: usize) -> String {
        format!("{}:{max_results}", query.trim().to_lowercase())
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Returns cached hits, refreshing the entry's recency.
    pub fn get(&self, key: &str) -> Option<Vec<WebHit>> {
        let mut entries = self.lock();
        let index = entries.iter().position(|e| e.key == key)?;
        let entry = entries.remove(index)?;
        if entry.stored_at.elapsed() > self.ttl {
            return None;
        }
        let hits = entry.hits.clone();
        entries.push_back(entry);
        drop(entries);
        Some(hits)
    }

    /// Stores hits, evicting the least recently used entry when full.
    pub fn put(&self, key: String, hits: Vec<WebHit>) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.lock();
        entries.retain(|e| e.key != key);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(CacheEntry {
            key,
            hits,
            stored_at: Instant::now(),
        });
    }

    /// Number of cached entries (including expired ones not yet evicted).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl std::fmt::Debug for SearchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCache")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct Args {
    query: String,
    #[serde(default)]
    max_results: Option<usize>,
}

/// Web search tool.
pub struct WebSearchTool {
    primary: Arc<dyn SearchBackend>,
    fallback: Option<Arc<dyn SearchBackend>>,
    cache: SearchCache,
}

impl WebSearchTool {
    /// Creates the tool with explicit backends and cache.
    #[must_use]
    pub fn new(
        primary: Arc<dyn SearchBackend>,
        fallback: Option<Arc<dyn SearchBackend>>,
        cache: SearchCache,
    ) -> Self {
        Self {
            primary,
            fallback,
            cache,
        }
    }

    /// Builds the tool from configured credentials.
    ///
    /// Tavily is primary when both backends are configured. Returns
    /// `Ok(None)` when neither has credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] if an HTTP client cannot be built.
    pub fn from_config(config: &EngineConfig) -> Result<Option<Self>, ToolError> {
        let mut backends: Vec<Arc<dyn SearchBackend>> = Vec::new();
        if let Some(key) = &config.tavily_api_key {
            backends.push(Arc::new(TavilyBackend::new(key, config.tool_timeout)?));
        }
        if let (Some(key), Some(cx)) = (&config.google_search_api_key, &config.google_search_engine_id)
        {
            backends.push(Arc::new(GoogleBackend::new(key, cx, config.tool_timeout)?));
        }

        let mut backends = backends.into_iter();
        let Some(primary) = backends.next() else {
            return Ok(None);
        };
        let cache = SearchCache::new(config.web_cache_ttl, config.web_cache_capacity);
        Ok(Some(Self::new(primary, backends.next(), cache)))
    }

    /// Runs the primary backend, then the fallback once on failure.
    async fn search_with_fallback(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<(Vec<WebHit>, &'static str), ToolError> {
        let primary_err = match self.primary.search(query, max_results).await {
            Ok(hits) => return Ok((hits, self.primary.name())),
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };

        warn!(
            primary = self.primary.name(),
            fallback = fallback.name(),
            error = %primary_err,
            "web search fallback"
        );
        match fallback.search(query, max_results).await {
            Ok(hits) => Ok((hits, fallback.name())),
            Err(fallback_err) => Err(ToolError::execution(
                TOOL_NAME,
                format!("{}: {primary_err}; {}: {fallback_err}", self.primary.name(), fallback.name()),
            )),
        }
    }
}

impl std::fmt::Debug for WebSearchTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSearchTool")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.as_ref().map(|b| b.name()))
            .field("cache", &self.cache)
            .finish()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: TOOL_NAME.to_string(),
            description: "Search the web for current information. Returns a list of results \
                          with title, url, snippet and score."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query."
                    },
                    "max_results": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": MAX_RESULTS_LIMIT,
                        "description": "Number of results (default 5)."
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let args: Args = parse_args(TOOL_NAME, arguments)?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err(ToolError::argument(TOOL_NAME, "query must not be empty"));
        }
        let max_results = args
            .max_results
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .clamp(1, MAX_RESULTS_LIMIT);

        let key = SearchCache::key(query, max_results);
        if let Some(hits) = self.cache.get(&key) {
            debug!(query, results = hits.len(), "web search cache hit");
            return Ok(ToolOutput::ok(json!({
                "query": query,
                "backend": "cache",
                "cached": true,
                "results": hits,
            })));
        }

        let (mut hits, backend) = self.search_with_fallback(query, max_results).await?;
        hits.truncate(max_results);
        debug!(query, backend, results = hits.len(), "web search completed");
        self.cache.put(key, hits.clone());

        Ok(ToolOutput::ok(json!({
            "query": query,
            "backend": backend,
            "cached": false,
            "results": hits,
        })))
    }
}

/// Extracts hits from a `web_search` payload.
#[must_use]
pub fn hits_from_payload(payload: &Value) -> Vec<WebHit> {
    payload
        .get("results")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}
