//! HTTP web search backends: Tavily and Google Custom Search.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::web_search::{SearchBackend, TOOL_NAME, WebHit};
use crate::error::ToolError;

const TAVILY_URL: &str = "https://api.tavily.com/search";
const GOOGLE_URL: &str = "https://www.googleapis.com/customsearch/v1";
/// Google Custom Search returns at most 10 results per request.
const GOOGLE_MAX_NUM: usize = 10;

fn http_client(timeout: Duration) -> Result<reqwest::Client, ToolError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ToolError::execution(TOOL_NAME, format!("http client: {e}")))
}

async fn check_status(
    backend: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ToolError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ToolError::execution(TOOL_NAME, format!("{backend} rate limited")));
    }
    let body = response.text().await.unwrap_or_default();
    let (body, _) = crate::core::truncate_chars(&body, 200);
    Err(ToolError::execution(
        TOOL_NAME,
        format!("{backend} returned {status}: {body}"),
    ))
}

/// Tavily search API backend.
pub struct TavilyBackend {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl TavilyBackend {
    /// Creates a backend with the given key.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] if the HTTP client cannot be built.
    pub fn new(api_key: &str, timeout: Duration) -> Result<Self, ToolError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.to_string(),
            endpoint: TAVILY_URL.to_string(),
        })
    }
}

impl std::fmt::Debug for TavilyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilyBackend")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f32,
}

#[async_trait]
impl SearchBackend for TavilyBackend {
    fn name(&self) -> &'static str {
        "tavily"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>, ToolError> {
        let body = json!({
            "api_key": self.api_key,
            "query": query,
            "max_results": max_results,
            "search_depth": "basic",
            "include_answer": false,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ToolError::execution(TOOL_NAME, format!("tavily: {e}")))?;
        let response = check_status("tavily", response).await?;
        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| ToolError::execution(TOOL_NAME, format!("tavily response: {e}")))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| WebHit {
                title: r.title,
                url: r.url,
                snippet: r.content,
                score: r.score,
            })
            .collect())
    }
}

/// Google Custom Search JSON API backend.
pub struct GoogleBackend {
    client: reqwest::Client,
    api_key: String,
    engine_id: String,
    endpoint: String,
}

impl GoogleBackend {
    /// Creates a backend with the given key and search engine id.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] if the HTTP client cannot be built.
    pub fn new(api_key: &str, engine_id: &str, timeout: Duration) -> Result<Self, ToolError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
            endpoint: GOOGLE_URL.to_string(),
        })
    }
}

impl std::fmt::Debug for GoogleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleBackend")
            .field("endpoint", &self.endpoint)
            .field("engine_id", &self.engine_id)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct GoogleResponse {
    #[serde(default)]
    items: Vec<GoogleItem>,
}

#[derive(Deserialize)]
struct GoogleItem {
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
}

/// Google returns no score; rank order is mapped to a descending score.
#[allow(clippy::cast_precision_loss)]
fn rank_score(rank: usize, total: usize) -> f32 {
    if total == 0 {
        return 0.0;
    }
    1.0 - (rank as f32 / total as f32)
}

#[async_trait]
impl SearchBackend for GoogleBackend {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebHit>, ToolError> {
        let num = max_results.clamp(1, GOOGLE_MAX_NUM).to_string();
        let url = reqwest::Url::parse_with_params(
            &self.endpoint,
            &[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
                ("num", num.as_str()),
            ],
        )
        .map_err(|e| ToolError::execution(TOOL_NAME, format!("google url: {e}")))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::execution(TOOL_NAME, format!("google: {e}")))?;
        let response = check_status("google", response).await?;
        let parsed: GoogleResponse = response
            .json()
            .await
            .map_err(|e| ToolError::execution(TOOL_NAME, format!("google response: {e}")))?;

        let total = parsed.items.len();
        Ok(parsed
            .items
            .into_iter()
            .enumerate()
            .map(|(rank, item)| WebHit {
                title: item.title,
                url: item.link,
                snippet: item.snippet,
                score: rank_score(rank, total),
            })
            .collect())
    }
}
