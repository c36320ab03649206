//! Agentic query engine.
//!
//! Runs one query through the state machine
//!
//! ```text
//! Planning ─▶ ExecutingSteps ─▶ Drafting ─▶ Verifying ─▶ Done
//!                                  ▲            │
//!                                  └─Redrafting─┘   (at most max_redrafts)
//! ```
//!
//! with `Failed` reached only when no provider can draft. Planning, step,
//! verification and re-draft failures degrade and are recorded in the
//! [`QueryTrace`] instead of aborting the query.

use std::sync::Arc;
use std::time::Instant;

use futures_util::{StreamExt, stream};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{ConfiguredProviders, ProviderFactory, ProviderInfo, ProviderKind};
use super::config::EngineConfig;
use super::context::ContextBuffer;
use super::executor::ToolExecutor;
use super::message::{ChatMessage, ChatRequest, system_message, user_message};
use super::plan::{Plan, Step, StepKind};
use super::planner::{HeuristicPlanner, LlmPlanner, PlanRequest, Planner};
use super::prompt::{PromptSet, build_draft_prompt};
use super::provider::{LlmProvider, ToolDecision};
use super::query::{EngineState, FinalResponse, Query, QueryTrace, StepOutcome, StreamEvent};
use super::router::ProviderRouter;
use super::selection::{ProviderSelection, Selection};
use super::session::{ConversationStore, InMemoryConversations};
use super::tool::{ToolCall, ToolResult};
use super::usage::UsageLedger;
use super::verifier::{HeuristicVerifier, LlmVerifier, Verdict, Verifier};
use crate::error::AgentError;
use crate::retrieval::{
    HeuristicExpander, LexicalReranker, LlmExpander, LlmReranker, QueryExpander, Reranker,
    RetrievalSettings, RetrievedPassage, Retriever,
};
use crate::store::{Embedder, HashEmbedder, SearchFilter, SqliteVectorStore, VectorStore};
use crate::tools::calculator::{self, extract_expression};
use crate::tools::{ToolRegistry, code, web_search};

/// Longest accepted question, in characters.
pub const MAX_QUESTION_CHARS: usize = 10_000;
/// Upper bound on per-query `top_k`.
pub const MAX_TOP_K: usize = 50;
/// Buffered events between a streaming query and its consumer.
const STREAM_BUFFER: usize = 64;
/// Tool calls accepted from one function-calling decision.
const MAX_COMPUTE_CALLS: usize = 2;

/// Output of one executed step, applied to the context in plan order.
struct StepRun {
    outcome: StepOutcome,
    passages: Vec<RetrievedPassage>,
    tools: Vec<ToolResult>,
}

/// What a query resolved to before any step ran.
struct Prepared {
    session_id: String,
    provider: ProviderRouter,
    filter: SearchFilter,
    top_k: usize,
}

/// The agentic question-answering engine.
pub struct AgenticEngine {
    config: EngineConfig,
    prompts: PromptSet,
    selection: ProviderSelection,
    retriever: Retriever,
    executor: ToolExecutor,
    planner: Arc<dyn Planner>,
    verifier: Arc<dyn Verifier>,
    conversations: Arc<dyn ConversationStore>,
    ledger: Arc<UsageLedger>,
}

impl std::fmt::Debug for AgenticEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgenticEngine")
            .field("selection", &self.selection)
            .field("retriever", &self.retriever)
            .field("tools", &self.executor.registry().names())
            .field("planner", &self.planner.name())
            .field("verifier", &self.verifier.name())
            .finish_non_exhaustive()
    }
}

impl AgenticEngine {
    /// Starts a builder over `config`.
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Every known provider with availability and tool-calling support.
    #[must_use]
    pub fn providers(&self) -> Vec<ProviderInfo> {
        self.selection.list()
    }

    /// Current default provider and model.
    #[must_use]
    pub fn current_provider(&self) -> Option<Selection> {
        self.selection.current()
    }

    /// Changes the default provider and model.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnsupportedProvider`] or
    /// [`AgentError::NoProvider`] when `provider` cannot be used.
    pub fn set_provider(&self, provider: &str, model: Option<&str>) -> Result<Selection, AgentError> {
        self.selection.set(provider, model)
    }

    /// Forgets a conversation; returns whether it existed.
    pub fn clear_session(&self, session_id: &str) -> bool {
        self.conversations.clear(session_id)
    }

    /// Usage ledger shared by every query.
    #[must_use]
    pub fn usage(&self) -> &UsageLedger {
        &self.ledger
    }

    /// Registered tool names.
    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        self.executor.registry().names()
    }

    /// Answers a query.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidQuery`] for empty or oversized
    /// questions, [`AgentError::NoProvider`] when nothing is configured, and
    /// [`AgentError::Provider`] when drafting fails on every provider.
    pub async fn query(&self, query: &Query) -> Result<FinalResponse, AgentError> {
        let started = Instant::now();
        let prepared = self.prepare(query)?;
        let provider = &prepared.provider;

        let plan = self.plan(query, &prepared).await;
        let mut trace = QueryTrace::new(plan);
        let mut context = ContextBuffer::new();

        trace.enter(EngineState::ExecutingSteps);
        let runs = self.execute_steps(query, &trace.plan, &prepared).await;
        for run in runs {
            apply_step(run, &mut trace, &mut context);
        }

        let history = self.conversations.history(&prepared.session_id);
        let answer = match self
            .draft_and_verify(query, &history, &context, provider, &mut trace)
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                trace.enter(EngineState::Failed);
                warn!(error = %e, states = ?trace.states, "query failed");
                return Err(e);
            }
        };

        trace.enter(EngineState::Done);
        trace.provider = Some(provider.name().to_string());
        trace.model = Some(provider.model().to_string());
        trace.usage = provider.spent();
        trace.elapsed_ms = elapsed_ms(started);

        self.conversations
            .append(&prepared.session_id, &query.question, &answer);
        info!(
            session = %prepared.session_id,
            drafts = trace.drafts,
            failed_steps = trace.failed_steps().count(),
            elapsed_ms = trace.elapsed_ms,
            "query answered"
        );

        Ok(FinalResponse {
            answer,
            citations: context.citations(),
            session_id: prepared.session_id,
            web_results: context.web_hits(),
            trace,
        })
    }

    /// Answers a query as a stream of events.
    ///
    /// The query runs on its own task. Dropping the returned stream or
    /// cancelling `cancel` stops the provider stream and every in-flight
    /// step; nothing is recorded in the conversation history then.
    pub fn query_stream(
        self: &Arc<Self>,
        query: Query,
        cancel: CancellationToken,
    ) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("stream query cancelled");
                    let _ = tx.try_send(StreamEvent::Error {
                        message: AgentError::Cancelled.to_string(),
                    });
                }
                () = tx.closed() => debug!("stream consumer went away, query dropped"),
                () = engine.run_stream(&query, &tx) => {}
            }
        });
        ReceiverStream::new(rx)
    }

    async fn run_stream(&self, query: &Query, tx: &mpsc::Sender<StreamEvent>) {
        let prepared = match self.prepare(query) {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                return;
            }
        };
        let provider = &prepared.provider;

        let plan = self.plan(query, &prepared).await;
        if !emit(tx, StreamEvent::Thinking { plan: plan.clone() }).await {
            return;
        }

        let mut trace = QueryTrace::new(plan);
        let mut context = ContextBuffer::new();
        trace.enter(EngineState::ExecutingSteps);
        let runs = self.execute_steps(query, &trace.plan, &prepared).await;
        for run in runs {
            for event in step_events(&run) {
                if !emit(tx, event).await {
                    return;
                }
            }
            apply_step(run, &mut trace, &mut context);
        }

        trace.enter(EngineState::Drafting);
        let history = self.conversations.history(&prepared.session_id);
        let request = self.draft_request(&query.question, &history, &context, &[]);
        let answer = match stream_draft(provider, &request, tx).await {
            Ok(Some(answer)) => answer,
            Ok(None) => return,
            Err(e) => {
                trace.enter(EngineState::Failed);
                warn!(error = %e, "streaming draft failed");
                let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                return;
            }
        };

        // Already streamed: the verdict is logged, never acted on.
        if query.use_agentic {
            trace.enter(EngineState::Verifying);
            match self
                .verifier
                .verify(&query.question, &answer, &context, provider)
                .await
            {
                Ok(verdict) => debug!(
                    supported = verdict.supported,
                    confidence = verdict.confidence,
                    "streamed draft verified"
                ),
                Err(e) => debug!(error = %e, "verification of streamed draft failed"),
            }
        }

        trace.enter(EngineState::Done);
        let done = StreamEvent::Done {
            citations: context.citations(),
            session_id: prepared.session_id.clone(),
        };
        if emit(tx, done).await {
            self.conversations
                .append(&prepared.session_id, &query.question, &answer);
        }
    }

    fn prepare(&self, query: &Query) -> Result<Prepared, AgentError> {
        let question = query.question.trim();
        if question.is_empty() {
            return Err(AgentError::InvalidQuery {
                message: "question cannot be empty".to_string(),
            });
        }
        let chars = question.chars().count();
        if chars > MAX_QUESTION_CHARS {
            return Err(AgentError::InvalidQuery {
                message: format!("question too long ({chars} chars, max {MAX_QUESTION_CHARS})"),
            });
        }

        let primary = self
            .selection
            .resolve(query.provider.as_deref(), query.model.as_deref())?;
        let alternates = self.selection.alternates(primary.name());
        let provider = ProviderRouter::new(
            primary,
            alternates,
            Arc::clone(&self.ledger),
            self.config.provider_timeout,
        );

        let session_id = query
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let filter = SearchFilter::now()
            .with_sources(query.source_filter.clone())
            .with_session(Some(session_id.clone()));
        let top_k = query
            .top_k
            .unwrap_or(self.config.default_top_k)
            .clamp(1, MAX_TOP_K);

        debug!(
            session = %session_id,
            provider = provider.name(),
            model = provider.model(),
            agentic = query.use_agentic,
            web = query.use_web_search,
            "query prepared"
        );
        Ok(Prepared {
            session_id,
            provider,
            filter,
            top_k,
        })
    }

    async fn plan(&self, query: &Query, prepared: &Prepared) -> Plan {
        if !query.use_agentic {
            return Plan::single_pass(query.use_web_search);
        }

        let has_sources = match self.retriever.visible_chunks(&prepared.filter).await {
            Ok(n) => n > 0,
            Err(e) => {
                warn!(error = %e, "could not count visible chunks, planning without sources");
                false
            }
        };
        let request = PlanRequest {
            question: query.question.trim().to_string(),
            has_sources,
            web_search_enabled: query.use_web_search,
        };
        match self.planner.plan(&request, &prepared.provider).await {
            Ok(plan) => {
                debug!(planner = self.planner.name(), steps = ?plan.kinds(), "planned");
                plan
            }
            Err(e) => {
                warn!(planner = self.planner.name(), error = %e, "planning failed, using default plan");
                Plan::fallback(has_sources)
            }
        }
    }

    /// Runs the work steps with bounded concurrency; results keep plan order.
    async fn execute_steps(&self, query: &Query, plan: &Plan, prepared: &Prepared) -> Vec<StepRun> {
        let runs: Vec<_> = plan
            .work_steps()
            .iter()
            .enumerate()
            .map(|(index, step)| self.run_step(index, step, query, prepared))
            .collect();
        stream::iter(runs)
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await
    }

    async fn run_step(&self, index: usize, step: &Step, query: &Query, prepared: &Prepared) -> StepRun {
        let started = Instant::now();
        let (passages, tools, error) = match step.kind {
            StepKind::Retrieve => match self.retrieve(query, prepared).await {
                Ok(passages) => (passages, Vec::new(), None),
                Err(e) => (Vec::new(), Vec::new(), Some(e.to_string())),
            },
            StepKind::WebSearch => {
                let search = step
                    .input
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or(&query.question);
                let call = ToolCall::new(
                    format!("step-{index}"),
                    web_search::TOOL_NAME,
                    json!({ "query": search, "max_results": web_search::DEFAULT_MAX_RESULTS }),
                );
                let result = self.executor.execute(&call).await;
                let error = result.error.clone().filter(|_| !result.success);
                (Vec::new(), vec![result], error)
            }
            StepKind::Compute => {
                let results = self.compute(index, step, query, &prepared.provider).await;
                match results {
                    Ok(results) => {
                        let error = (!results.iter().any(|r| r.success)).then(|| {
                            results
                                .iter()
                                .find_map(|r| r.error.clone())
                                .unwrap_or_else(|| "no tool succeeded".to_string())
                        });
                        (Vec::new(), results, error)
                    }
                    Err(message) => (Vec::new(), Vec::new(), Some(message)),
                }
            }
            StepKind::DirectAnswer => (Vec::new(), Vec::new(), None),
        };

        let items = passages.len() + tools.iter().filter(|t| t.success).count();
        if let Some(error) = &error {
            warn!(step = step.kind.as_str(), error = %error, "step failed, continuing");
        } else {
            debug!(step = step.kind.as_str(), items, "step completed");
        }
        StepRun {
            outcome: StepOutcome {
                kind: step.kind,
                success: error.is_none(),
                items,
                error,
                elapsed_ms: elapsed_ms(started),
            },
            passages,
            tools,
        }
    }

    async fn retrieve(
        &self,
        query: &Query,
        prepared: &Prepared,
    ) -> Result<Vec<RetrievedPassage>, crate::error::StoreError> {
        if query.use_agentic {
            self.retriever
                .retrieve(&query.question, prepared.top_k, &prepared.filter, &prepared.provider)
                .await
        } else {
            self.retriever
                .single_hop(&query.question, prepared.top_k, &prepared.filter)
                .await
        }
    }

    /// Evaluates a compute step: the planned expression when there is one,
    /// else one function-calling round over the calculation tools.
    async fn compute(
        &self,
        index: usize,
        step: &Step,
        query: &Query,
        provider: &ProviderRouter,
    ) -> Result<Vec<ToolResult>, String> {
        let expression = step
            .input
            .clone()
            .or_else(|| extract_expression(&query.question));
        if let Some(expression) = expression {
            let call = ToolCall::new(
                format!("step-{index}"),
                calculator::TOOL_NAME,
                json!({ "expression": expression }),
            );
            return Ok(vec![self.executor.execute(&call).await]);
        }

        if !provider.capabilities().function_calling {
            return Err("no arithmetic expression found".to_string());
        }
        let tools = self
            .executor
            .registry()
            .definitions_for(&[calculator::TOOL_NAME, code::TOOL_NAME]);
        if tools.is_empty() {
            return Err("no calculation tools registered".to_string());
        }
        let request = ChatRequest::new(&self.prompts.compute, &query.question)
            .with_temperature(0.0)
            .with_max_tokens(512);
        match provider.generate_with_tools(&request, &tools).await {
            Ok(ToolDecision::Calls { calls, .. }) => {
                let requested = calls.len();
                let calls: Vec<ToolCall> = calls
                    .into_iter()
                    .filter(|call| tools.iter().any(|t| t.name == call.name))
                    .take(MAX_COMPUTE_CALLS)
                    .collect();
                if calls.is_empty() {
                    return Err(if requested == 0 {
                        "provider returned no tool call".to_string()
                    } else {
                        format!("provider called {requested} tool(s) that were not offered")
                    });
                }
                Ok(self
                    .executor
                    .execute_all(&calls, self.config.max_concurrency)
                    .await)
            }
            Ok(ToolDecision::Text(_)) => Err("provider answered without calling a tool".to_string()),
            Err(e) => Err(format!("no tool call: {e}")),
        }
    }

    fn draft_request(
        &self,
        question: &str,
        history: &[ChatMessage],
        context: &ContextBuffer,
        notes: &[String],
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(system_message(&self.prompts.draft));
        messages.extend_from_slice(history);
        messages.push(user_message(&build_draft_prompt(
            question.trim(),
            &context.render(),
            notes,
        )));
        ChatRequest {
            messages,
            temperature: Some(self.config.draft_temperature),
            max_tokens: Some(self.config.max_tokens),
            json_mode: false,
        }
    }

    /// Drafts, verifies and re-drafts up to `max_redrafts` times.
    ///
    /// Only a failure of the first draft is an error; later failures keep
    /// the best draft so far.
    async fn draft_and_verify(
        &self,
        query: &Query,
        history: &[ChatMessage],
        context: &ContextBuffer,
        provider: &ProviderRouter,
        trace: &mut QueryTrace,
    ) -> Result<String, AgentError> {
        let attempts = if query.use_agentic {
            self.config.max_redrafts + 1
        } else {
            1
        };
        let mut best: Option<(String, Verdict)> = None;
        let mut notes: Vec<String> = Vec::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                trace.enter(EngineState::Redrafting);
            }
            trace.enter(EngineState::Drafting);
            let request = self.draft_request(&query.question, history, context, &notes);
            let draft = match provider.generate(&request).await {
                Ok(response) => response.content,
                Err(e) if best.is_some() => {
                    warn!(attempt, error = %e, "re-draft failed, keeping best draft");
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            trace.drafts += 1;

            if !query.use_agentic {
                return Ok(draft);
            }

            trace.enter(EngineState::Verifying);
            let verdict = match self
                .verifier
                .verify(&query.question, &draft, context, provider)
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    debug!(error = %e, "verification failed, accepting draft");
                    Verdict::unchecked(format!("verification unavailable: {e}"))
                }
            };
            debug!(
                attempt,
                supported = verdict.supported,
                confidence = verdict.confidence,
                "draft verified"
            );

            let supported = verdict.supported;
            notes.clone_from(&verdict.notes);
            if best
                .as_ref()
                .is_none_or(|(_, current)| is_better(&verdict, current))
            {
                best = Some((draft, verdict));
            }
            if supported {
                break;
            }
        }

        let (answer, verdict) = best.ok_or_else(|| AgentError::Orchestration {
            message: "no draft produced".to_string(),
        })?;
        trace.verdict = Some(verdict);
        Ok(answer)
    }
}

fn is_better(candidate: &Verdict, current: &Verdict) -> bool {
    match (candidate.supported, current.supported) {
        (true, false) => true,
        (false, true) => false,
        _ => candidate.confidence > current.confidence,
    }
}

fn apply_step(run: StepRun, trace: &mut QueryTrace, context: &mut ContextBuffer) {
    context.push_passages(run.passages);
    for result in run.tools {
        context.push_tool(result.clone());
        trace.tool_calls.push(result);
    }
    trace.steps.push(run.outcome);
}

fn step_events(run: &StepRun) -> Vec<StreamEvent> {
    run.tools
        .iter()
        .map(|result| {
            if result.name == web_search::TOOL_NAME && result.success {
                StreamEvent::WebSearch {
                    results: web_search::hits_from_payload(&result.payload),
                }
            } else {
                StreamEvent::Tool {
                    name: result.name.clone(),
                    result: result.clone(),
                }
            }
        })
        .collect()
}

/// Streams one draft as chunk events. `Ok(None)` means the consumer left.
async fn stream_draft(
    provider: &ProviderRouter,
    request: &ChatRequest,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<Option<String>, AgentError> {
    if !provider.capabilities().streaming {
        let response = provider.generate(request).await?;
        let content = response.content;
        let sent = emit(tx, StreamEvent::Chunk { content: content.clone() }).await;
        return Ok(sent.then_some(content));
    }

    let mut chunks = provider.generate_stream(request).await?;
    let mut answer = String::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        answer.push_str(&chunk);
        if !emit(tx, StreamEvent::Chunk { content: chunk }).await {
            return Ok(None);
        }
    }
    Ok(Some(answer))
}

/// Sends an event; `false` once the consumer is gone.
async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Builder for [`AgenticEngine`]; every collaborator has a default.
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn VectorStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    providers: Option<Arc<dyn ProviderFactory>>,
    tools: Option<ToolRegistry>,
    planner: Option<Arc<dyn Planner>>,
    verifier: Option<Arc<dyn Verifier>>,
    expander: Option<Arc<dyn QueryExpander>>,
    reranker: Option<Arc<dyn Reranker>>,
    conversations: Option<Arc<dyn ConversationStore>>,
    ledger: Option<Arc<UsageLedger>>,
}

impl EngineBuilder {
    /// Builder with no collaborators set.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: None,
            embedder: None,
            providers: None,
            tools: None,
            planner: None,
            verifier: None,
            expander: None,
            reranker: None,
            conversations: None,
            ledger: None,
        }
    }

    /// Vector store (default: in-memory `SQLite`).
    #[must_use]
    pub fn store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Query embedder (default: [`HashEmbedder`]).
    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Provider factory (default: keys from the configuration).
    #[must_use]
    pub fn providers(mut self, providers: Arc<dyn ProviderFactory>) -> Self {
        self.providers = Some(providers);
        self
    }

    /// Tool registry (default: built-in tools).
    #[must_use]
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Planner (default per `llm_planning`).
    #[must_use]
    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    /// Verifier (default per `llm_verification`).
    #[must_use]
    pub fn verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Query expander (default per `llm_expansion`).
    #[must_use]
    pub fn expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    /// Re-ranker (default per `llm_rerank`).
    #[must_use]
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Conversation store (default: in memory).
    #[must_use]
    pub fn conversations(mut self, conversations: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(conversations);
        self
    }

    /// Usage ledger (default: a fresh one).
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<UsageLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] if the default store or tools cannot be
    /// created.
    pub fn build(self) -> Result<AgenticEngine, AgentError> {
        let config = self.config;
        let prompts = PromptSet::load(config.prompt_dir.as_deref());

        let embedder = self
            .embedder
            .unwrap_or_else(|| Arc::new(HashEmbedder::default()));
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(SqliteVectorStore::in_memory(embedder.dimensions())?),
        };
        let tools = match self.tools {
            Some(tools) => tools,
            None => ToolRegistry::builtin(&config)?,
        };
        let providers = self
            .providers
            .unwrap_or_else(|| Arc::new(ConfiguredProviders::new(&config)));

        let planner = self.planner.unwrap_or_else(|| {
            if config.llm_planning {
                Arc::new(LlmPlanner::new(prompts.planner.clone()))
            } else {
                Arc::new(HeuristicPlanner)
            }
        });
        let verifier = self.verifier.unwrap_or_else(|| {
            if config.llm_verification {
                Arc::new(LlmVerifier::new(prompts.verifier.clone()))
            } else {
                Arc::new(HeuristicVerifier)
            }
        });
        let expander = self.expander.unwrap_or_else(|| {
            if config.llm_expansion {
                Arc::new(LlmExpander::new(prompts.expander.clone()))
            } else {
                Arc::new(HeuristicExpander)
            }
        });
        let reranker = self.reranker.unwrap_or_else(|| {
            if config.llm_rerank {
                Arc::new(LlmReranker::new(prompts.rerank.clone()))
            } else {
                Arc::new(LexicalReranker)
            }
        });

        let preferred = config.provider.as_deref().map(|name| Selection {
            provider: name.to_string(),
            model: config
                .model
                .clone()
                .or_else(|| ProviderKind::parse(name).map(|k| k.default_model().to_string()))
                .unwrap_or_default(),
        });
        let selection = ProviderSelection::new(providers, preferred);
        if selection.current().is_none() {
            warn!("no LLM provider configured; queries will fail until one is");
        }

        let retriever = Retriever::new(
            store,
            embedder,
            expander,
            reranker,
            RetrievalSettings::from_config(&config),
        );
        let executor = ToolExecutor::new(Arc::new(tools), config.tool_timeout);
        let conversations = self.conversations.unwrap_or_else(|| {
            Arc::new(InMemoryConversations::new(
                config.history_limit,
                config.max_sessions,
            ))
        });

        Ok(AgenticEngine {
            prompts,
            selection,
            retriever,
            executor,
            planner,
            verifier,
            conversations,
            ledger: self.ledger.unwrap_or_default(),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_better_verdict_prefers_support_then_confidence() {
        let v = |supported, confidence| Verdict {
            supported,
            confidence,
            notes: Vec::new(),
        };
        assert!(is_better(&v(true, 0.1), &v(false, 0.9)));
        assert!(!is_better(&v(false, 0.9), &v(true, 0.1)));
        assert!(is_better(&v(false, 0.4), &v(false, 0.2)));
        assert!(!is_better(&v(false, 0.2), &v(false, 0.2)));
    }

    #[tokio::test]
    async fn test_invalid_questions_rejected() {
        let engine = AgenticEngine::builder(EngineConfig::default())
            .tools(ToolRegistry::new())
            .build()
            .unwrap_or_else(|_| unreachable!());
        let empty = engine.query(&Query::new("   ")).await;
        assert!(matches!(empty, Err(AgentError::InvalidQuery { .. })));
        let long = engine.query(&Query::new("x".repeat(MAX_QUESTION_CHARS + 1))).await;
        assert!(matches!(long, Err(AgentError::InvalidQuery { .. })));
    }
}
