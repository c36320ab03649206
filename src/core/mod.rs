//! Shared, dependency-free helpers used across the engine.
//!
//! These live outside `agent` so the retriever, the verifier and the
//! tools can share one tokenizer without depending on each other.

pub mod text;

pub use text::{keywords, terms, truncate_chars};
