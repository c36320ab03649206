//! Error types for ragstudy.
//!
//! Each layer owns an error enum: providers ([`ProviderError`]), tools
//! ([`ToolError`]), the vector store ([`StoreError`]), the query engine
//! ([`AgentError`]) and the CLI surface ([`CommandError`]). Lower-level
//! errors convert upward with `#[from]`.

use std::time::Duration;

use thiserror::Error;

/// Result alias for engine operations.
pub type Result<T, E = AgentError> = std::result::Result<T, E>;

/// Errors raised by LLM provider backends.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider is not configured or cannot be reached.
    #[error("provider {provider} unavailable: {reason}")]
    Unavailable {
        /// Provider name.
        provider: &'static str,
        /// Why the provider cannot be used.
        reason: String,
    },

    /// Provider rejected the call because of rate limits.
    #[error("provider {provider} rate limited: {message}")]
    RateLimited {
        /// Provider name.
        provider: &'static str,
        /// Message returned by the backend.
        message: String,
    },

    /// Provider answered with output that could not be interpreted.
    #[error("invalid response from {provider}: {message}")]
    ResponseInvalid {
        /// Provider name.
        provider: &'static str,
        /// What was wrong with the response.
        message: String,
    },

    /// Transport or API failure.
    #[error("request to {provider} failed: {message}")]
    Request {
        /// Provider name.
        provider: &'static str,
        /// Error message.
        message: String,
        /// HTTP status code, if any.
        status: Option<u16>,
    },

    /// Streaming response broke mid-way.
    #[error("stream from {provider} failed: {message}")]
    Stream {
        /// Provider name.
        provider: &'static str,
        /// Error message.
        message: String,
    },

    /// Call exceeded its deadline.
    #[error("provider {provider} timed out after {after:?}")]
    Timeout {
        /// Provider name.
        provider: &'static str,
        /// Deadline that was exceeded.
        after: Duration,
    },
}

impl ProviderError {
    /// Returns the name of the provider that produced this error.
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        match self {
            Self::Unavailable { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::ResponseInvalid { provider, .. }
            | Self::Request { provider, .. }
            | Self::Stream { provider, .. }
            | Self::Timeout { provider, .. } => provider,
        }
    }

    /// Returns `true` for rate-limit errors, which trigger provider failover.
    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Errors raised while dispatching or running a tool.
#[derive(Error, Debug)]
pub enum ToolError {
    /// No tool is registered under the requested name.
    #[error("tool not found: {name}")]
    NotFound {
        /// Requested tool name.
        name: String,
    },

    /// Arguments failed validation.
    #[error("invalid arguments for {name}: {message}")]
    Argument {
        /// Tool name.
        name: String,
        /// Validation failure.
        message: String,
    },

    /// Tool ran and failed.
    #[error("{name} failed: {message}")]
    Execution {
        /// Tool name.
        name: String,
        /// Failure message.
        message: String,
    },

    /// Tool exceeded its deadline.
    #[error("{name} timed out after {after:?}")]
    Timeout {
        /// Tool name.
        name: String,
        /// Deadline that was exceeded.
        after: Duration,
    },

    /// Tool is switched off by configuration.
    #[error("{name} is disabled")]
    Disabled {
        /// Tool name.
        name: String,
    },

    /// A tool with the same name is already registered.
    #[error("tool already registered: {name}")]
    Duplicate {
        /// Tool name.
        name: String,
    },
}

impl ToolError {
    /// Builds an argument error for `name`.
    pub fn argument(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Argument {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Builds an execution error for `name`.
    pub fn execution(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Execution {
            name: name.into(),
            message: message.to_string(),
        }
    }
}

/// Errors raised by the vector store and embedders.
#[derive(Error, Debug)]
pub enum StoreError {
    /// `SQLite` failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Embedding generation failed.
    #[error("embedding failed: {message}")]
    Embedding {
        /// Error message.
        message: String,
    },

    /// Query embedding does not match the stored dimensions.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensions of stored vectors.
        expected: usize,
        /// Dimensions of the query vector.
        actual: usize,
    },

    /// Stored row could not be decoded.
    #[error("corrupt stored row: {message}")]
    Corrupt {
        /// Error message.
        message: String,
    },

    /// Search exceeded its deadline.
    #[error("vector search timed out after {after:?}")]
    Timeout {
        /// Deadline that was exceeded.
        after: Duration,
    },

    /// Store lock was poisoned by a panicking writer.
    #[error("store lock poisoned")]
    Poisoned,

    /// I/O failure (database directory, ingest files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the query engine.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Provider failure that could not be recovered.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// No provider is configured or reachable.
    #[error("no LLM provider available: {hint}")]
    NoProvider {
        /// How to configure one.
        hint: String,
    },

    /// Unknown provider name.
    #[error("unsupported provider: {name}")]
    UnsupportedProvider {
        /// Requested provider.
        name: String,
    },

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Query failed validation.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Error message.
        message: String,
    },

    /// Vector store failure outside the degradable retrieval path.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Tool registry failure (registration, not execution).
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// The query was cancelled by the caller.
    #[error("query cancelled")]
    Cancelled,

    /// Internal orchestration failure.
    #[error("orchestration error: {message}")]
    Orchestration {
        /// Error message.
        message: String,
    },
}

impl AgentError {
    /// Returns `true` when retrying the same query later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(
                ProviderError::RateLimited { .. } | ProviderError::Timeout { .. }
            )
        )
    }
}

/// Errors raised by CLI commands.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Engine failure.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Command-level failure.
    #[error("{0}")]
    ExecutionFailed(String),

    /// Output could not be rendered.
    #[error("output error: {0}")]
    Output(String),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
