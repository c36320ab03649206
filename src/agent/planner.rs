//! Query planners.
//!
//! A planner only decides which steps a query needs; it never executes
//! them. [`HeuristicPlanner`] is keyword-driven and needs no provider.
//! [`LlmPlanner`] asks the provider for a JSON plan and sanitizes it
//! against what is actually available.

use async_trait::async_trait;
use serde::Deserialize;

use super::message::ChatRequest;
use super::plan::{Plan, Step, StepKind};
use super::prompt::{build_planner_prompt, strip_code_fence};
use super::provider::LlmProvider;
use crate::core::terms;
use crate::error::ProviderError;
use crate::tools::calculator::extract_expression;

const TIME_SENSITIVE: &[&str] = &[
    "current", "recent", "latest", "today", "now", "news", "2024", "2025", "2026",
];

const CALCULATION_WORDS: &[&str] = &["calculate", "compute", "math", "equation", "solve"];

const CONVERSATIONAL: &[&str] = &[
    "hi",
    "hello",
    "hey",
    "thanks",
    "thank you",
    "thanks a lot",
    "good morning",
    "good afternoon",
    "good evening",
    "bye",
    "goodbye",
    "ok",
    "okay",
    "cool",
    "great",
    "how are you",
];

/// Inputs to planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRequest {
    /// User question.
    pub question: String,
    /// Whether any documents are visible to the query.
    pub has_sources: bool,
    /// Whether the caller enabled web search.
    pub web_search_enabled: bool,
}

/// Decomposes a question into a [`Plan`].
#[async_trait]
pub trait Planner: Send + Sync {
    /// Planner name for traces and logs.
    fn name(&self) -> &'static str;

    /// Produces a plan.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when a provider-backed planner fails; the
    /// engine then uses [`Plan::fallback`].
    async fn plan(
        &self,
        request: &PlanRequest,
        provider: &dyn LlmProvider,
    ) -> Result<Plan, ProviderError>;
}

/// Keyword-driven planner.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicPlanner;

impl HeuristicPlanner {
    /// Plans without a provider.
    #[must_use]
    pub fn plan_question(request: &PlanRequest) -> Plan {
        if is_conversational(&request.question) {
            return Plan::new(vec![Step::new(
                StepKind::DirectAnswer,
                "Conversational message, no lookup needed",
            )]);
        }

        let words = terms(&request.question);
        let has_word = |list: &[&str]| words.iter().any(|w| list.contains(&w.as_str()));
        let mut steps = Vec::new();

        if request.has_sources {
            steps.push(Step::new(
                StepKind::Retrieve,
                "Search the uploaded materials for relevant passages",
            ));
        }

        if request.web_search_enabled {
            let reason = if has_word(TIME_SENSITIVE) {
                "Question looks time-sensitive, check the web"
            } else {
                "Web search was requested"
            };
            steps.push(Step::new(StepKind::WebSearch, reason).with_input(request.question.trim()));
        }

        if let Some(expression) = extract_expression(&request.question) {
            steps.push(
                Step::new(StepKind::Compute, "Question contains arithmetic").with_input(expression),
            );
        } else if has_word(CALCULATION_WORDS) {
            steps.push(Step::new(StepKind::Compute, "Question asks for a calculation"));
        }

        Plan::new(steps)
    }
}

#[async_trait]
impl Planner for HeuristicPlanner {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn plan(
        &self,
        request: &PlanRequest,
        _provider: &dyn LlmProvider,
    ) -> Result<Plan, ProviderError> {
        Ok(Self::plan_question(request))
    }
}

fn is_conversational(question: &str) -> bool {
    let normalized: String = question
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let words: Vec<&str> = normalized.split_whitespace().collect();
    let Some(first) = words.first() else {
        return true;
    };
    if CONVERSATIONAL.contains(&words.join(" ").as_str()) {
        return true;
    }
    // "hello there", "thanks so much"
    words.len() <= 3
        && matches!(*first, "hi" | "hello" | "hey" | "thanks")
        && !words
            .iter()
            .any(|w| matches!(*w, "what" | "how" | "why" | "who" | "when" | "where"))
}

/// Provider-backed planner returning a JSON plan.
#[derive(Debug, Clone)]
pub struct LlmPlanner {
    system_prompt: String,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    steps: Vec<RawStep>,
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(alias = "type", alias = "action")]
    kind: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    input: Option<String>,
}

impl LlmPlanner {
    /// Creates a planner with the given system prompt.
    #[must_use]
    pub const fn new(system_prompt: String) -> Self {
        Self {
            system_prompt,
            max_tokens: 512,
        }
    }

    /// Parses and sanitizes the provider's JSON plan.
    ///
    /// Unknown step kinds and steps the query cannot run are dropped; a
    /// `direct_answer` is appended when missing.
    fn parse_plan(
        provider: &'static str,
        content: &str,
        request: &PlanRequest,
    ) -> Result<Plan, ProviderError> {
        let raw: RawPlan = serde_json::from_str(strip_code_fence(content)).map_err(|e| {
            ProviderError::ResponseInvalid {
                provider,
                message: format!("failed to parse plan: {e}"),
            }
        })?;

        let steps: Vec<Step> = raw
            .steps
            .into_iter()
            .filter_map(|s| {
                let kind = StepKind::parse(&s.kind)?;
                let allowed = match kind {
                    StepKind::Retrieve => request.has_sources,
                    StepKind::WebSearch => request.web_search_enabled,
                    StepKind::Compute | StepKind::DirectAnswer => true,
                };
                allowed.then(|| {
                    let step = Step::new(kind, s.reason.unwrap_or_default());
                    match s.input.filter(|i| !i.trim().is_empty()) {
                        Some(input) => step.with_input(input),
                        None => step,
                    }
                })
            })
            .collect();

        if steps.is_empty() {
            return Err(ProviderError::ResponseInvalid {
                provider,
                message: "plan contained no usable steps".to_string(),
            });
        }
        Ok(Plan::new(steps))
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn plan(
        &self,
        request: &PlanRequest,
        provider: &dyn LlmProvider,
    ) -> Result<Plan, ProviderError> {
        let chat = ChatRequest::new(
            &self.system_prompt,
            &build_planner_prompt(
                &request.question,
                request.has_sources,
                request.web_search_enabled,
            ),
        )
        .with_temperature(0.0)
        .with_max_tokens(self.max_tokens)
        .json();

        let response = provider.generate(&chat).await?;
        Self::parse_plan(provider.name(), &response.content, request)
    }
}
