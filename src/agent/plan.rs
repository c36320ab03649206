//! Query plans.

use serde::{Deserialize, Serialize};

/// What a plan step does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Search the uploaded materials.
    Retrieve,
    /// Search the web.
    WebSearch,
    /// Evaluate a calculation.
    Compute,
    /// Write the answer.
    DirectAnswer,
}

impl StepKind {
    /// Whether the step runs through the tool executor.
    #[must_use]
    pub const fn requires_tool(self) -> bool {
        matches!(self, Self::WebSearch | Self::Compute)
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retrieve => "retrieve",
            Self::WebSearch => "web_search",
            Self::Compute => "compute",
            Self::DirectAnswer => "direct_answer",
        }
    }

    /// Parses a wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "retrieve" | "retrieval" => Some(Self::Retrieve),
            "web_search" | "websearch" | "search_web" => Some(Self::WebSearch),
            "compute" | "calculate" => Some(Self::Compute),
            "direct_answer" | "answer" => Some(Self::DirectAnswer),
            _ => None,
        }
    }
}

/// One planned step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Step kind.
    pub kind: StepKind,
    /// Why the step is needed.
    pub reason: String,
    /// Whether the step runs through the tool executor.
    pub requires_tool: bool,
    /// Search query or arithmetic expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

impl Step {
    /// Creates a step without input.
    pub fn new(kind: StepKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            requires_tool: kind.requires_tool(),
            input: None,
        }
    }

    /// Attaches a step input.
    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Ordered steps for one query. The last step is always `direct_answer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Steps in execution order.
    pub steps: Vec<Step>,
    /// Whether this is the default plan used after a planning failure.
    #[serde(default)]
    pub fallback: bool,
}

impl Plan {
    /// Creates a plan, enforcing a single trailing `direct_answer`.
    #[must_use]
    pub fn new(steps: Vec<Step>) -> Self {
        let mut answer = None;
        let mut kept = Vec::with_capacity(steps.len() + 1);
        for mut step in steps {
            step.requires_tool = step.kind.requires_tool();
            if step.kind == StepKind::DirectAnswer {
                answer.get_or_insert(step);
            } else {
                kept.push(step);
            }
        }
        kept.push(answer.unwrap_or_else(|| {
            Step::new(StepKind::DirectAnswer, "Answer using the gathered context")
        }));
        Self {
            steps: kept,
            fallback: false,
        }
    }

    /// Default plan used when planning fails.
    #[must_use]
    pub fn fallback(has_sources: bool) -> Self {
        let mut steps = Vec::new();
        if has_sources {
            steps.push(Step::new(StepKind::Retrieve, "Search the uploaded materials"));
        }
        let mut plan = Self::new(steps);
        plan.fallback = true;
        plan
    }

    /// Fixed plan for non-agentic queries.
    #[must_use]
    pub fn single_pass(web_search: bool) -> Self {
        let mut steps = vec![Step::new(StepKind::Retrieve, "Single-hop retrieval")];
        if web_search {
            steps.push(Step::new(StepKind::WebSearch, "Web search requested"));
        }
        Self::new(steps)
    }

    /// Step kinds in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(|s| s.kind).collect()
    }

    /// Whether any step has `kind`.
    #[must_use]
    pub fn has(&self, kind: StepKind) -> bool {
        self.steps.iter().any(|s| s.kind == kind)
    }

    /// Steps other than the trailing `direct_answer`.
    #[must_use]
    pub fn work_steps(&self) -> &[Step] {
        self.steps.split_last().map_or(&[], |(_, rest)| rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_moves_answer_last() {
        let plan = Plan::new(vec![
            Step::new(StepKind::DirectAnswer, "first"),
            Step::new(StepKind::Retrieve, "look"),
            Step::new(StepKind::DirectAnswer, "dup"),
        ]);
        assert_eq!(plan.kinds(), vec![StepKind::Retrieve, StepKind::DirectAnswer]);
        assert_eq!(plan.steps[1].reason, "first");
        assert_eq!(plan.work_steps().len(), 1);
    }

    #[test]
    fn test_fallback_plans() {
        assert_eq!(
            Plan::fallback(true).kinds(),
            vec![StepKind::Retrieve, StepKind::DirectAnswer]
        );
        let bare = Plan::fallback(false);
        assert_eq!(bare.kinds(), vec![StepKind::DirectAnswer]);
        assert!(bare.fallback);
    }

    #[test]
    fn test_step_serialization() {
        let step = Step::new(StepKind::WebSearch, "news").with_input("rust 2026");
        let json = serde_json::to_value(&step).unwrap_or_default();
        assert_eq!(json["kind"], "web_search");
        assert_eq!(json["requires_tool"], true);
        assert_eq!(json["input"], "rust 2026");
    }

    #[test]
    fn test_single_pass_honors_web() {
        assert!(Plan::single_pass(true).has(StepKind::WebSearch));
        assert!(!Plan::single_pass(false).has(StepKind::WebSearch));
    }
}
