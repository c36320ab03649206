//! Query expansion.
//!
//! Expanders return at most `max_variants` distinct queries with the
//! original question always first.

use async_trait::async_trait;

use crate::agent::message::ChatRequest;
use crate::agent::prompt::build_expander_prompt;
use crate::agent::provider::LlmProvider;
use crate::core::keywords;
use crate::error::ProviderError;

/// Rewrites a question into search variants.
#[async_trait]
pub trait QueryExpander: Send + Sync {
    /// Expander name for logs.
    fn name(&self) -> &'static str;

    /// Returns variants, original first.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when a provider-backed expander fails; the
    /// retriever then searches with the original question only.
    async fn expand(
        &self,
        question: &str,
        max_variants: usize,
        provider: &dyn LlmProvider,
    ) -> Result<Vec<String>, ProviderError>;
}

/// Rule-based expansion: sub-questions, rephrasings and a keyword query.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicExpander;

impl HeuristicExpander {
    /// Expands without a provider.
    #[must_use]
    pub fn variants(question: &str, max_variants: usize) -> Vec<String> {
        let trimmed = question.trim();
        let mut candidates = Vec::new();

        // Compound questions: "What is X? How does Y work?"
        let parts: Vec<&str> = trimmed
            .split('?')
            .map(str::trim)
            .filter(|p| p.split_whitespace().count() >= 3)
            .collect();
        if parts.len() > 1 {
            candidates.extend(parts.iter().map(|p| format!("{p}?")));
        }

        let lower = trimmed.to_lowercase();
        if let Some(rest) = lower.strip_prefix("what ") {
            let rest = rest.strip_prefix("is ").or_else(|| rest.strip_prefix("are ")).unwrap_or(rest);
            let subject = rest.trim_end_matches('?');
            candidates.push(format!("how does {subject} work"));
            candidates.push(format!("why is {subject} important"));
        }

        let keyword_query = keywords(trimmed, 8).join(" ");
        if !keyword_query.is_empty() {
            candidates.push(keyword_query);
        }

        finalize(trimmed, candidates, max_variants)
    }
}

#[async_trait]
impl QueryExpander for HeuristicExpander {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn expand(
        &self,
        question: &str,
        max_variants: usize,
        _provider: &dyn LlmProvider,
    ) -> Result<Vec<String>, ProviderError> {
        Ok(Self::variants(question, max_variants))
    }
}

/// Provider-backed expansion returning a JSON array of rewrites.
#[derive(Debug, Clone)]
pub struct LlmExpander {
    system_prompt: String,
}

impl LlmExpander {
    /// Creates an expander with the given system prompt.
    #[must_use]
    pub const fn new(system_prompt: String) -> Self {
        Self { system_prompt }
    }

    fn parse_variants(provider: &'static str, content: &str) -> Result<Vec<String>, ProviderError> {
        let invalid = |message: String| ProviderError::ResponseInvalid { provider, message };
        let start = content
            .find('[')
            .ok_or_else(|| invalid("no JSON array in expansion".to_string()))?;
        let end = content
            .rfind(']')
            .filter(|&end| end > start)
            .ok_or_else(|| invalid("unterminated JSON array in expansion".to_string()))?;
        serde_json::from_str::<Vec<String>>(&content[start..=end])
            .map_err(|e| invalid(format!("failed to parse expansion: {e}")))
    }
}

#[async_trait]
impl QueryExpander for LlmExpander {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn expand(
        &self,
        question: &str,
        max_variants: usize,
        provider: &dyn LlmProvider,
    ) -> Result<Vec<String>, ProviderError> {
        if max_variants <= 1 {
            return Ok(vec![question.trim().to_string()]);
        }
        let request = ChatRequest::new(
            &self.system_prompt,
            &build_expander_prompt(question, max_variants - 1),
        )
        .with_temperature(0.3)
        .with_max_tokens(256);

        let response = provider.generate(&request).await?;
        let variants = Self::parse_variants(provider.name(), &response.content)?;
        Ok(finalize(question.trim(), variants, max_variants))
    }
}

/// Original first, blanks and case-insensitive duplicates dropped, capped.
fn finalize(original: &str, candidates: Vec<String>, max_variants: usize) -> Vec<String> {
    let mut out = vec![original.to_string()];
    let mut seen = vec![original.to_lowercase()];
    for candidate in candidates {
        if out.len() >= max_variants.max(1) {
            break;
        }
        let candidate = candidate.trim().to_string();
        let key = candidate.to_lowercase();
        if candidate.is_empty() || seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(candidate);
    }
    out
}
