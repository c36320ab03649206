//! # ragstudy
//!
//! Agentic retrieval-augmented question answering. A question is planned
//! into steps (document retrieval, web search, computation), the steps run
//! with bounded concurrency, and an LLM drafts an answer from the collected
//! evidence. A verifier checks the draft against that evidence and asks for
//! a bounded number of re-drafts. Answers carry citations to the passages
//! and pages they were drawn from.
//!
//! ## Layout
//!
//! - [`agent`]: engine, planner, providers, verifier, sessions
//! - [`retrieval`]: query expansion, multi-hop search, re-ranking
//! - [`store`]: embeddings and the `SQLite` vector store
//! - [`tools`]: calculator, code execution, web search
//! - [`server`]: HTTP API with server-sent events
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```no_run
//! use ragstudy::agent::{AgenticEngine, EngineConfig, Query};
//!
//! # async fn run() -> Result<(), ragstudy::error::AgentError> {
//! let engine = AgenticEngine::builder(EngineConfig::from_env()?).build()?;
//! let response = engine.query(&Query::new("What is 15% of 240?")).await?;
//! println!("{}", response.answer);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod cli;
pub mod core;
pub mod error;
pub mod retrieval;
pub mod server;
pub mod store;
pub mod tools;

pub use agent::{AgenticEngine, EngineConfig, FinalResponse, Query, StreamEvent};
pub use error::{AgentError, CommandError, ProviderError, StoreError, ToolError};
