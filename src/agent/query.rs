//! Query input, final response, trace and stream event types.

use serde::{Deserialize, Serialize};

use super::context::Citation;
use super::message::TokenUsage;
use super::plan::{Plan, StepKind};
use super::tool::ToolResult;
use super::verifier::Verdict;
use crate::tools::WebHit;

const fn default_true() -> bool {
    true
}

/// One user question with its options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// The question.
    pub question: String,
    /// Conversation to continue; a new one is created when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Passages to retrieve; the engine default when absent.
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Restrict retrieval to these source ids.
    #[serde(default, alias = "source_ids")]
    pub source_filter: Option<Vec<String>>,
    /// Plan, verify and re-draft; otherwise a single retrieval and draft.
    #[serde(default = "default_true")]
    pub use_agentic: bool,
    /// Allow web search.
    #[serde(default)]
    pub use_web_search: bool,
    /// Provider override for this query.
    #[serde(default)]
    pub provider: Option<String>,
    /// Model override for this query.
    #[serde(default)]
    pub model: Option<String>,
}

impl Query {
    /// Agentic query with no web search.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            session_id: None,
            top_k: None,
            source_filter: None,
            use_agentic: true,
            use_web_search: false,
            provider: None,
            model: None,
        }
    }

    /// Continues an existing session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the passage count.
    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Restricts retrieval to `sources`.
    #[must_use]
    pub fn with_sources(mut self, sources: Vec<String>) -> Self {
        self.source_filter = Some(sources);
        self
    }

    /// Toggles the agentic pipeline.
    #[must_use]
    pub const fn agentic(mut self, enabled: bool) -> Self {
        self.use_agentic = enabled;
        self
    }

    /// Toggles web search.
    #[must_use]
    pub const fn web_search(mut self, enabled: bool) -> Self {
        self.use_web_search = enabled;
        self
    }

    /// Overrides provider and optionally model.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>, model: Option<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = model;
        self
    }
}

/// Engine state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Choosing steps.
    Planning,
    /// Running retrieval and tools.
    ExecutingSteps,
    /// Writing a draft.
    Drafting,
    /// Checking a draft.
    Verifying,
    /// Writing another draft after a rejection.
    Redrafting,
    /// Answer produced.
    Done,
    /// No working provider.
    Failed,
}

/// What happened to one plan step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// Step kind.
    pub kind: StepKind,
    /// Whether the step produced usable output.
    pub success: bool,
    /// Context items the step added.
    pub items: usize,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time in milliseconds.
    pub elapsed_ms: u64,
}

/// How an answer was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTrace {
    /// Executed plan.
    pub plan: Plan,
    /// Final state.
    pub state: EngineState,
    /// States visited, in order.
    pub states: Vec<EngineState>,
    /// Drafts written.
    pub drafts: usize,
    /// Verdict on the accepted draft, when verification ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    /// Per-step outcomes in plan order.
    pub steps: Vec<StepOutcome>,
    /// Every tool invocation, failed ones included.
    pub tool_calls: Vec<ToolResult>,
    /// Provider that drafted the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model that drafted the answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tokens used across all provider calls of this query.
    pub usage: TokenUsage,
    /// Wall time in milliseconds.
    pub elapsed_ms: u64,
}

impl QueryTrace {
    /// Empty trace for `plan`.
    #[must_use]
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            state: EngineState::Planning,
            states: vec![EngineState::Planning],
            drafts: 0,
            verdict: None,
            steps: Vec::new(),
            tool_calls: Vec::new(),
            provider: None,
            model: None,
            usage: TokenUsage::default(),
            elapsed_ms: 0,
        }
    }

    /// Records a transition.
    pub fn enter(&mut self, state: EngineState) {
        self.state = state;
        self.states.push(state);
    }

    /// Steps that failed.
    pub fn failed_steps(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| !s.success)
    }
}

/// Answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    /// Answer text.
    pub answer: String,
    /// Evidence references, in context order.
    pub citations: Vec<Citation>,
    /// Session the exchange was recorded under.
    pub session_id: String,
    /// Web results given to the provider.
    pub web_results: Vec<WebHit>,
    /// Execution trace.
    pub trace: QueryTrace,
}

/// Event emitted by a streaming query.
///
/// `error` is terminal; otherwise `done` is the last event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// The plan about to run.
    Thinking {
        /// Planned steps.
        plan: Plan,
    },
    /// Web search results.
    WebSearch {
        /// Hits given to the provider.
        results: Vec<WebHit>,
    },
    /// A non-search tool ran.
    Tool {
        /// Tool name.
        name: String,
        /// Its result.
        result: ToolResult,
    },
    /// A piece of the answer.
    Chunk {
        /// Text to append.
        content: String,
    },
    /// The answer is complete.
    Done {
        /// Evidence references.
        citations: Vec<Citation>,
        /// Session id.
        session_id: String,
    },
    /// The query failed.
    Error {
        /// What went wrong.
        message: String,
    },
}

impl StreamEvent {
    /// SSE event name.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::WebSearch { .. } => "web_search",
            Self::Tool { .. } => "tool",
            Self::Chunk { .. } => "chunk",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    /// Whether no event follows this one.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_defaults_from_json() {
        let query: Query = serde_json::from_str(r#"{"question": "why?"}"#)
            .unwrap_or_else(|_| unreachable!());
        assert!(query.use_agentic);
        assert!(!query.use_web_search);
        assert!(query.session_id.is_none());
    }

    #[test]
    fn test_stream_event_tagging() {
        let event = StreamEvent::Chunk {
            content: "hi".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(json["type"], "chunk");
        assert_eq!(json["content"], "hi");
        assert_eq!(event.event_name(), "chunk");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_trace_records_transitions() {
        let mut trace = QueryTrace::new(Plan::fallback(false));
        trace.enter(EngineState::Drafting);
        trace.enter(EngineState::Done);
        assert_eq!(trace.state, EngineState::Done);
        assert_eq!(
            trace.states,
            vec![EngineState::Planning, EngineState::Drafting, EngineState::Done]
        );
    }
}
