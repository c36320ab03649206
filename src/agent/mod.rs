//! Agentic question answering.
//!
//! Turns a question into a cited answer through a pluggable provider
//! abstraction, a planner, a tool executor, the multi-hop retriever and a
//! verifier.
//!
//! # Architecture
//!
//! ```text
//! Query → AgenticEngine
//!   ├── Planner (retrieve / web_search / compute / direct_answer)
//!   ├── Steps, bounded concurrency
//!   │   ├── Retriever (expand → search × n → merge → re-rank)
//!   │   └── ToolExecutor (calculator, execute_code, web_search)
//!   ├── ContextBuffer → draft via ProviderRouter (timeout, ledger, failover)
//!   ├── Verifier → bounded re-drafts
//!   └── FinalResponse with citations, or a stream of events
//! ```

pub mod client;
pub mod config;
pub mod context;
pub mod engine;
pub mod executor;
pub mod message;
pub mod plan;
pub mod planner;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod query;
pub mod router;
pub mod selection;
pub mod session;
pub mod tool;
pub mod usage;
pub mod verifier;

// Re-export key types
pub use client::{ConfiguredProviders, FixedProviders, ProviderFactory, ProviderInfo, ProviderKind};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use context::{Citation, CitationKind, ContextBuffer, ContextItem};
pub use engine::{AgenticEngine, EngineBuilder};
pub use executor::ToolExecutor;
pub use message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
pub use plan::{Plan, Step, StepKind};
pub use planner::{HeuristicPlanner, LlmPlanner, PlanRequest, Planner};
pub use prompt::PromptSet;
pub use provider::{Capabilities, ChatStream, LlmProvider, ToolDecision};
pub use query::{EngineState, FinalResponse, Query, QueryTrace, StepOutcome, StreamEvent};
pub use router::ProviderRouter;
pub use selection::{ProviderSelection, Selection};
pub use session::{ConversationStore, InMemoryConversations};
pub use tool::{ToolCall, ToolDefinition, ToolResult};
pub use usage::{UsageLedger, UsageRecord, UsageTotals};
pub use verifier::{HeuristicVerifier, LlmVerifier, Verdict, Verifier};
