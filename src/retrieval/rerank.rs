//! Question–passage re-ranking.
//!
//! Scores are in `[0, 1]`, one per passage, in input order.

use std::collections::HashSet;

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use serde::Deserialize;

use crate::agent::message::ChatRequest;
use crate::agent::prompt::{build_rerank_prompt, strip_code_fence};
use crate::agent::provider::LlmProvider;
use crate::core::terms;
use crate::error::ProviderError;

/// Concurrent provider judgments.
const LLM_RERANK_CONCURRENCY: usize = 4;
/// Passage characters sent to the provider.
const LLM_RERANK_PASSAGE_CHARS: usize = 1_500;

/// Scores passages against a question.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Re-ranker name for logs.
    fn name(&self) -> &'static str;

    /// One score per passage.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when scoring fails; the retriever then
    /// keeps the merged order.
    async fn score(
        &self,
        question: &str,
        passages: &[String],
        provider: &dyn LlmProvider,
    ) -> Result<Vec<f32>, ProviderError>;
}

/// IDF-weighted question-term coverage.
///
/// Terms rare among the candidates weigh more than terms every candidate
/// shares.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReranker;

impl LexicalReranker {
    /// Scores without a provider.
    #[must_use]
    pub fn scores(question: &str, passages: &[String]) -> Vec<f32> {
        let query: HashSet<String> = terms(question).into_iter().collect();
        if query.is_empty() {
            return vec![0.0; passages.len()];
        }
        let docs: Vec<HashSet<String>> = passages
            .iter()
            .map(|p| terms(p).into_iter().collect())
            .collect();

        #[allow(clippy::cast_precision_loss)]
        let n = docs.len() as f32;
        let weight = |term: &String| {
            #[allow(clippy::cast_precision_loss)]
            let df = docs.iter().filter(|d| d.contains(term)).count() as f32;
            (1.0 + n / (1.0 + df)).ln()
        };
        let weights: Vec<(&String, f32)> = query.iter().map(|t| (t, weight(t))).collect();
        let total: f32 = weights.iter().map(|(_, w)| w).sum();

        docs.iter()
            .map(|doc| {
                if total <= f32::EPSILON {
                    return 0.0;
                }
                let covered: f32 = weights
                    .iter()
                    .filter(|(t, _)| doc.contains(*t))
                    .map(|(_, w)| w)
                    .sum();
                (covered / total).clamp(0.0, 1.0)
            })
            .collect()
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn score(
        &self,
        question: &str,
        passages: &[String],
        _provider: &dyn LlmProvider,
    ) -> Result<Vec<f32>, ProviderError> {
        Ok(Self::scores(question, passages))
    }
}

/// Provider yes/no relevance judgments.
#[derive(Debug, Clone)]
pub struct LlmReranker {
    system_prompt: String,
}

#[derive(Deserialize)]
struct Judgment {
    relevant: bool,
    #[serde(default)]
    confidence: Option<f32>,
}

impl LlmReranker {
    /// Creates a re-ranker with the given system prompt.
    #[must_use]
    pub const fn new(system_prompt: String) -> Self {
        Self { system_prompt }
    }

    fn parse_judgment(content: &str) -> Option<f32> {
        let judgment: Judgment = serde_json::from_str(strip_code_fence(content)).ok()?;
        let confidence = judgment.confidence.unwrap_or(1.0).clamp(0.0, 1.0);
        Some(if judgment.relevant { confidence } else { 0.0 })
    }

    async fn judge(
        &self,
        question: &str,
        passage: &str,
        provider: &dyn LlmProvider,
    ) -> Option<f32> {
        let (passage, _) = crate::core::truncate_chars(passage, LLM_RERANK_PASSAGE_CHARS);
        let request = ChatRequest::new(&self.system_prompt, &build_rerank_prompt(question, &passage))
            .with_temperature(0.0)
            .with_max_tokens(64)
            .json();
        let response = provider.generate(&request).await.ok()?;
        Self::parse_judgment(&response.content)
    }
}

#[async_trait]
impl Reranker for LlmReranker {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn score(
        &self,
        question: &str,
        passages: &[String],
        provider: &dyn LlmProvider,
    ) -> Result<Vec<f32>, ProviderError> {
        let pending: Vec<_> = passages
            .iter()
            .map(|p| self.judge(question, p, provider))
            .collect();
        let judgments: Vec<Option<f32>> = stream::iter(pending)
            .buffered(LLM_RERANK_CONCURRENCY)
            .collect()
            .await;

        if !passages.is_empty() && judgments.iter().all(Option::is_none) {
            return Err(ProviderError::ResponseInvalid {
                provider: provider.name(),
                message: "no usable relevance judgments".to_string(),
            });
        }
        Ok(judgments.into_iter().map(|j| j.unwrap_or(0.0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::{ChatResponse, TokenUsage};
    use crate::agent::provider::{Capabilities, ChatStream};

    /// Judges a passage relevant when it mentions chloroplasts.
    struct Judge;

    #[async_trait]
    impl LlmProvider for Judge {
        fn name(&self) -> &'static str {
            "judge"
        }

        fn model(&self) -> &str {
            "judge-1"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                streaming: false,
                function_calling: false,
            }
        }

        async fn generate(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let relevant = request
                .messages
                .last()
                .is_some_and(|m| m.content.contains("chloroplasts"));
            Ok(ChatResponse {
                content: format!(r#"{{"relevant": {relevant}, "confidence": 0.9}}"#),
                usage: TokenUsage::new(20, 5),
                finish_reason: None,
            })
        }

        async fn generate_stream(
            &self,
            _request: &ChatRequest,
        ) -> Result<ChatStream, ProviderError> {
            Err(ProviderError::Unavailable {
                provider: "judge",
                reason: "no streaming".to_string(),
            })
        }
    }

    #[test]
    fn test_lexical_prefers_covering_passage() {
        let passages = vec![
            "Photosynthesis converts light energy into chemical energy in chloroplasts."
                .to_string(),
            "The French revolution began in 1789.".to_string(),
        ];
        let scores = LexicalReranker::scores("How does photosynthesis use light?", &passages);
        assert!(scores[0] > scores[1]);
        assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!(scores[1].abs() < f32::EPSILON);
    }

    #[test]
    fn test_lexical_empty_question() {
        let scores = LexicalReranker::scores("?", &["anything".to_string()]);
        assert_eq!(scores, vec![0.0]);
    }

    #[test]
    fn test_parse_judgment() {
        assert_eq!(
            LlmReranker::parse_judgment(r#"{"relevant": true, "confidence": 0.8}"#),
            Some(0.8)
        );
        assert_eq!(
            LlmReranker::parse_judgment(r#"{"relevant": false, "confidence": 0.9}"#),
            Some(0.0)
        );
        assert_eq!(LlmReranker::parse_judgment("maybe"), None);
    }

    #[tokio::test]
    async fn test_llm_scores_on_a_spawned_task() {
        let task = tokio::spawn(async {
            let passages = vec![
                "Light is absorbed by chlorophyll in chloroplasts.".to_string(),
                "The French revolution began in 1789.".to_string(),
            ];
            LlmReranker::new("judge".to_string())
                .score("How does photosynthesis use light?", &passages, &Judge)
                .await
        });
        let scores = task
            .await
            .unwrap_or_else(|_| unreachable!())
            .unwrap_or_default();
        assert_eq!(scores.len(), 2);
        assert!((scores[0] - 0.9).abs() < 1e-6);
        assert!(scores[1].abs() < f32::EPSILON);
    }
}
