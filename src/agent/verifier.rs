//! Draft verification and reflection.
//!
//! A verifier only judges; the engine decides whether to re-draft.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::context::ContextBuffer;
use super::message::ChatRequest;
use super::prompt::{build_verifier_prompt, strip_code_fence};
use super::provider::LlmProvider;
use crate::core::{keywords, terms, truncate_chars};
use crate::error::ProviderError;
use crate::tools::calculator;

/// Keywords taken from each evidence item.
const KEYWORDS_PER_ITEM: usize = 20;
/// Keywords taken from the draft.
const DRAFT_KEYWORDS: usize = 60;
/// Overlap needed for a draft to count as supported.
const SUPPORT_THRESHOLD: f32 = 0.5;
/// Drafts shorter than this get a completeness note.
const MIN_ANSWER_CHARS: usize = 50;
/// Question-term coverage below this gets a relevance note.
const MIN_QUESTION_COVERAGE: f32 = 0.3;
/// Evidence characters sent to a provider-backed verifier.
const LLM_EVIDENCE_CHARS: usize = 12_000;

/// Signed decimal numbers, optionally with thousands separators.
static NUMBER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").ok());

/// Whether `text` states the number `formatted` as a whole number rather
/// than merely containing its digits.
fn states_number(text: &str, formatted: &str) -> bool {
    let (Ok(expected), Some(number)) = (formatted.parse::<f64>(), NUMBER.as_ref()) else {
        return text.contains(formatted);
    };
    let tolerance = 1e-9 * expected.abs().max(1.0);
    number.find_iter(text).any(|m| {
        let mut token = m.as_str();
        // "2-4" is a range, not a negative four.
        if token.starts_with('-')
            && text[..m.start()]
                .chars()
                .next_back()
                .is_some_and(char::is_alphanumeric)
        {
            token = &token[1..];
        }
        token
            .replace(',', "")
            .parse::<f64>()
            .is_ok_and(|value| (value - expected).abs() <= tolerance)
    })
}

/// Outcome of verifying one draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the draft is supported by the evidence.
    pub supported: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Problems found, fed back into a re-draft.
    #[serde(default)]
    pub notes: Vec<String>,
}

impl Verdict {
    /// Verdict used when verification itself failed.
    #[must_use]
    pub fn unchecked(reason: impl Into<String>) -> Self {
        Self {
            supported: true,
            confidence: 0.0,
            notes: vec![reason.into()],
        }
    }
}

/// Judges a draft against the gathered context.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Verifier name for traces and logs.
    fn name(&self) -> &'static str;

    /// Returns a verdict for `draft`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when a provider-backed verifier fails; the
    /// engine then accepts the draft.
    async fn verify(
        &self,
        question: &str,
        draft: &str,
        context: &ContextBuffer,
        provider: &dyn LlmProvider,
    ) -> Result<Verdict, ProviderError>;
}

fn no_evidence() -> Verdict {
    Verdict {
        supported: true,
        confidence: 0.5,
        notes: vec![
            "No materials or tool results were available to check the answer against"
                .to_string(),
        ],
    }
}

/// Keyword-overlap verifier with length and relevance reflection.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicVerifier;

impl HeuristicVerifier {
    /// Verifies without a provider.
    #[must_use]
    pub fn check(question: &str, draft: &str, context: &ContextBuffer) -> Verdict {
        if context.is_empty() {
            return no_evidence();
        }

        let evidence: HashSet<String> = context
            .evidence_texts()
            .iter()
            .flat_map(|t| keywords(t, KEYWORDS_PER_ITEM))
            .collect();
        let answer: HashSet<String> = keywords(draft, DRAFT_KEYWORDS).into_iter().collect();
        let mut notes = Vec::new();

        // Either the draft covers the evidence or the evidence grounds the draft.
        #[allow(clippy::cast_precision_loss)]
        let overlap = evidence.intersection(&answer).count() as f32;
        #[allow(clippy::cast_precision_loss)]
        let ratio = |n: usize| if n == 0 { 0.0 } else { overlap / n as f32 };
        let mut confidence = ratio(evidence.len()).max(ratio(answer.len()));

        // Keyword overlap says nothing about numbers.
        let mut computed = 0;
        let mut computed_ok = true;
        for result in context.tool_results(calculator::TOOL_NAME) {
            computed += 1;
            if let Some(formatted) = result.payload.get("formatted").and_then(|v| v.as_str())
                && !states_number(draft, formatted)
            {
                computed_ok = false;
                notes.push(format!(
                    "The calculated result {formatted} is missing from the answer"
                ));
            }
        }
        if !computed_ok {
            confidence = confidence.min(0.3);
        } else if computed == context.len() {
            // Only calculator output: quoting it is the whole check.
            confidence = confidence.max(SUPPORT_THRESHOLD);
        }

        let evidence_ok = confidence >= SUPPORT_THRESHOLD;
        if !evidence_ok && computed_ok {
            notes.push("Answer may not align with the provided sources".to_string());
        }

        if draft.trim().chars().count() < MIN_ANSWER_CHARS {
            notes.push("Answer is very short; consider explaining more".to_string());
            confidence *= 0.9;
        }
        let question_terms: HashSet<String> = terms(question).into_iter().collect();
        if !question_terms.is_empty() {
            let draft_terms: HashSet<String> = terms(draft).into_iter().collect();
            #[allow(clippy::cast_precision_loss)]
            let coverage = question_terms.intersection(&draft_terms).count() as f32
                / question_terms.len() as f32;
            if coverage < MIN_QUESTION_COVERAGE {
                notes.push("Answer does not seem to address the question directly".to_string());
                confidence *= 0.9;
            }
        }

        Verdict {
            supported: evidence_ok && computed_ok,
            confidence: confidence.clamp(0.0, 1.0),
            notes,
        }
    }
}

#[async_trait]
impl Verifier for HeuristicVerifier {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn verify(
        &self,
        question: &str,
        draft: &str,
        context: &ContextBuffer,
        _provider: &dyn LlmProvider,
    ) -> Result<Verdict, ProviderError> {
        Ok(Self::check(question, draft, context))
    }
}

/// Provider-backed verifier returning a JSON verdict.
#[derive(Debug, Clone)]
pub struct LlmVerifier {
    system_prompt: String,
}

#[derive(Deserialize)]
struct RawVerdict {
    supported: bool,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default)]
    notes: RawNotes,
}

#[derive(Deserialize, Default)]
#[serde(untagged)]
enum RawNotes {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl LlmVerifier {
    /// Creates a verifier with the given system prompt.
    #[must_use]
    pub const fn new(system_prompt: String) -> Self {
        Self { system_prompt }
    }

    fn parse_verdict(provider: &'static str, content: &str) -> Result<Verdict, ProviderError> {
        let raw: RawVerdict = serde_json::from_str(strip_code_fence(content)).map_err(|e| {
            ProviderError::ResponseInvalid {
                provider,
                message: format!("failed to parse verdict: {e}"),
            }
        })?;
        let notes = match raw.notes {
            RawNotes::None => Vec::new(),
            RawNotes::One(note) if note.trim().is_empty() => Vec::new(),
            RawNotes::One(note) => vec![note],
            RawNotes::Many(notes) => notes,
        };
        Ok(Verdict {
            supported: raw.supported,
            confidence: raw
                .confidence
                .unwrap_or(if raw.supported { 1.0 } else { 0.0 })
                .clamp(0.0, 1.0),
            notes,
        })
    }
}

#[async_trait]
impl Verifier for LlmVerifier {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn verify(
        &self,
        question: &str,
        draft: &str,
        context: &ContextBuffer,
        provider: &dyn LlmProvider,
    ) -> Result<Verdict, ProviderError> {
        if context.is_empty() {
            return Ok(no_evidence());
        }
        let (evidence, _) = truncate_chars(&context.render(), LLM_EVIDENCE_CHARS);
        let request = ChatRequest::new(
            &self.system_prompt,
            &build_verifier_prompt(question, draft, &evidence),
        )
        .with_temperature(0.0)
        .with_max_tokens(512)
        .json();
        let response = provider.generate(&request).await?;
        Self::parse_verdict(provider.name(), &response.content)
    }
}
