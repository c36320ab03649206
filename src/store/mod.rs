//! Vector store contract and its `SQLite` implementation.
//!
//! The engine sees stored documents only as embedded chunks with a source
//! locator. Search is by embedding similarity, filterable by source set and
//! session, and skips chunks whose retention has expired.

pub mod embedding;
pub mod loader;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use embedding::{Embedder, HashEmbedder, create_embedder};
pub use loader::{TextChunk, chunk_text};
pub use sqlite::SqliteVectorStore;

/// A chunk as stored, without its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Source identifier (file path, URL, document id).
    pub source_id: String,
    /// Human-readable source name.
    pub source_name: Option<String>,
    /// Chunk position within the source.
    pub offset: u32,
    /// Chunk text.
    pub content: String,
    /// First line of the chunk in the source, if known.
    pub line: Option<u32>,
    /// Page of the chunk in the source, if known.
    pub page: Option<u32>,
    /// Owning session; `None` means visible to every session.
    pub session_id: Option<String>,
}

/// A chunk to insert, with its embedding.
#[derive(Debug, Clone)]
pub struct NewChunk {
    /// Chunk metadata and text.
    pub chunk: StoredChunk,
    /// Embedding vector.
    pub embedding: Vec<f32>,
}

/// A similarity search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    /// Matched chunk.
    pub chunk: StoredChunk,
    /// Cosine similarity to the query embedding.
    pub score: f32,
}

/// Restrictions applied to a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    /// Only these sources; `None` means all.
    pub sources: Option<Vec<String>>,
    /// Also include chunks owned by this session.
    pub session_id: Option<String>,
    /// Unix timestamp (seconds) used for TTL filtering.
    pub now: i64,
}

impl SearchFilter {
    /// Filter with the current time and no restrictions.
    #[must_use]
    pub fn now() -> Self {
        Self {
            now: unix_now(),
            ..Self::default()
        }
    }

    /// Restricts the search to `sources` (an empty list means no restriction).
    #[must_use]
    pub fn with_sources(mut self, sources: Option<Vec<String>>) -> Self {
        self.sources = sources.filter(|s| !s.is_empty());
        self
    }

    /// Includes chunks owned by `session_id`.
    #[must_use]
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

/// Summary of one ingested source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Source identifier.
    pub source_id: String,
    /// Human-readable source name.
    pub source_name: Option<String>,
    /// Number of stored chunks.
    pub chunks: usize,
    /// Expiry timestamp (unix seconds); `None` means kept forever.
    pub expires_at: Option<i64>,
}

/// Similarity search over embedded chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Dimensions of stored embeddings.
    fn dimensions(&self) -> usize;

    /// Returns up to `limit` chunks most similar to `embedding`, best first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database or decoding failures.
    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<StoreHit>, StoreError>;

    /// Number of live chunks visible under `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failures.
    async fn count(&self, filter: &SearchFilter) -> Result<usize, StoreError>;
}

/// Current unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Cosine similarity of two equal-length vectors (0 for zero vectors).
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
