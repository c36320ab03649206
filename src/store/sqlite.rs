//! `SQLite`-backed vector store.
//!
//! Embeddings are stored as little-endian `f32` blobs next to their chunk.
//! Search loads the candidate rows that pass the source, session and TTL
//! filters and scores them with cosine similarity in parallel (rayon).

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rayon::prelude::*;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use tracing::{debug, info};

use super::embedding::Embedder;
use super::loader::TextChunk;
use super::{
    NewChunk, SearchFilter, SourceSummary, StoreHit, StoredChunk, VectorStore, cosine_similarity,
    unix_now,
};
use crate::error::StoreError;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS store_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS chunks (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id    TEXT NOT NULL,
    source_name  TEXT,
    chunk_offset INTEGER NOT NULL,
    content      TEXT NOT NULL,
    line         INTEGER,
    page         INTEGER,
    session_id   TEXT,
    embedding    BLOB NOT NULL,
    created_at   INTEGER NOT NULL,
    expires_at   INTEGER,
    UNIQUE (source_id, chunk_offset)
);
CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks (source_id);
CREATE INDEX IF NOT EXISTS idx_chunks_expires ON chunks (expires_at);
";

/// Vector store persisted in a single `SQLite` database.
#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
    dimensions: usize,
}

impl SqliteVectorStore {
    /// Opens (or creates) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened or was
    /// created with different embedding dimensions.
    pub fn open(path: &Path, dimensions: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        Self::init(conn, dimensions)
    }

    /// Creates an in-memory store (tests, ephemeral sessions).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the schema cannot be created.
    pub fn in_memory(dimensions: usize) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, dimensions)
    }

    fn init(conn: Connection, dimensions: usize) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM store_meta WHERE key = 'dimensions'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match stored.and_then(|v| v.parse::<usize>().ok()) {
            Some(existing) if existing != dimensions => {
                return Err(StoreError::DimensionMismatch {
                    expected: existing,
                    actual: dimensions,
                });
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT OR REPLACE INTO store_meta (key, value) VALUES ('dimensions', ?1)",
                    params![dimensions.to_string()],
                )?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimensions,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Inserts chunks, replacing any existing chunk at the same
    /// source and offset. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failures or dimension mismatch.
    pub fn insert(&self, chunks: &[NewChunk], ttl: Option<Duration>) -> Result<usize, StoreError> {
        let now = unix_now();
        let expires_at = ttl.map(|t| now.saturating_add(i64::try_from(t.as_secs()).unwrap_or(i64::MAX)));

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO chunks
                 (source_id, source_name, chunk_offset, content, line, page, session_id,
                  embedding, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for new in chunks {
                if new.embedding.len() != self.dimensions {
                    return Err(StoreError::DimensionMismatch {
                        expected: self.dimensions,
                        actual: new.embedding.len(),
                    });
                }
                let c = &new.chunk;
                written += stmt.execute(params![
                    c.source_id,
                    c.source_name,
                    c.offset,
                    c.content,
                    c.line,
                    c.page,
                    c.session_id,
                    encode_embedding(&new.embedding),
                    now,
                    expires_at,
                ])?;
            }
        }
        tx.commit()?;
        debug!(rows = written, "stored chunks");
        Ok(written)
    }

    /// Embeds and stores a chunked document.
    ///
    /// Existing chunks of `source_id` are replaced.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on embedding or database failures.
    pub fn add_document(
        &self,
        source_id: &str,
        source_name: Option<&str>,
        chunks: &[TextChunk],
        embedder: &dyn Embedder,
        ttl: Option<Duration>,
    ) -> Result<usize, StoreError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = embedder.embed_batch(&texts)?;

        let new_chunks: Vec<NewChunk> = chunks
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (chunk, embedding))| NewChunk {
                chunk: StoredChunk {
                    source_id: source_id.to_string(),
                    source_name: source_name.map(str::to_string),
                    offset: u32::try_from(i).unwrap_or(u32::MAX),
                    content: chunk.content.clone(),
                    line: Some(chunk.line),
                    page: None,
                    session_id: None,
                },
                embedding,
            })
            .collect();

        self.delete_source(source_id)?;
        let written = self.insert(&new_chunks, ttl)?;
        info!(source_id, chunks = written, "ingested document");
        Ok(written)
    }

    /// Lists sources with live chunks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failures.
    pub fn list_sources(&self, now: i64) -> Result<Vec<SourceSummary>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT source_id, MAX(source_name), COUNT(*), MAX(expires_at)
             FROM chunks
             WHERE expires_at IS NULL OR expires_at > ?1
             GROUP BY source_id
             ORDER BY source_id",
        )?;
        let rows = stmt.query_map(params![now], |row| {
            Ok(SourceSummary {
                source_id: row.get(0)?,
                source_name: row.get(1)?,
                chunks: usize::try_from(row.get::<_, i64>(2)?).unwrap_or(0),
                expires_at: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Deletes every chunk of a source. Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failures.
    pub fn delete_source(&self, source_id: &str) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM chunks WHERE source_id = ?1", params![source_id])?)
    }

    /// Deletes chunks whose retention ended before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failures.
    pub fn purge_expired(&self, now: i64) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM chunks WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        if removed > 0 {
            info!(removed, "purged expired chunks");
        }
        Ok(removed)
    }

    fn search_blocking(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<StoreHit>, StoreError> {
        if embedding.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let (clause, values) = filter_clause(filter);
        let sql = format!(
            "SELECT source_id, source_name, chunk_offset, content, line, page, session_id, embedding
             FROM chunks WHERE {clause} ORDER BY id"
        );

        let rows: Vec<(StoredChunk, Vec<u8>)> = {
            let conn = self.lock()?;
            let mut stmt = conn.prepare(&sql)?;
            let mapped = stmt.query_map(params_from_iter(values), |row| {
                Ok((
                    StoredChunk {
                        source_id: row.get(0)?,
                        source_name: row.get(1)?,
                        offset: row.get(2)?,
                        content: row.get(3)?,
                        line: row.get(4)?,
                        page: row.get(5)?,
                        session_id: row.get(6)?,
                    },
                    row.get::<_, Vec<u8>>(7)?,
                ))
            })?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };

        let mut hits = rows
            .into_par_iter()
            .map(|(chunk, blob)| {
                let stored = decode_embedding(&blob)?;
                Ok(StoreHit {
                    score: cosine_similarity(embedding, &stored),
                    chunk,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.source_id.cmp(&b.chunk.source_id))
                .then_with(|| a.chunk.offset.cmp(&b.chunk.offset))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    fn count_blocking(&self, filter: &SearchFilter) -> Result<usize, StoreError> {
        let (clause, values) = filter_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM chunks WHERE {clause}");
        let conn = self.lock()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore")
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let store = self.clone();
        let embedding = embedding.to_vec();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || store.search_blocking(&embedding, limit, &filter))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }

    async fn count(&self, filter: &SearchFilter) -> Result<usize, StoreError> {
        let store = self.clone();
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || store.count_blocking(&filter))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

/// Builds the WHERE clause and positional parameters for a filter.
fn filter_clause(filter: &SearchFilter) -> (String, Vec<SqlValue>) {
    let mut conditions = vec!["(expires_at IS NULL OR expires_at > ?)".to_string()];
    let mut values = vec![SqlValue::Integer(filter.now)];

    match &filter.session_id {
        Some(session) => {
            conditions.push("(session_id IS NULL OR session_id = ?)".to_string());
            values.push(SqlValue::Text(session.clone()));
        }
        None => conditions.push("session_id IS NULL".to_string()),
    }

    if let Some(sources) = &filter.sources {
        let placeholders = vec!["?"; sources.len()].join(", ");
        conditions.push(format!("source_id IN ({placeholders})"));
        values.extend(sources.iter().cloned().map(SqlValue::Text));
    }

    (conditions.join(" AND "), values)
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::Corrupt {
            message: format!("embedding blob of {} bytes", blob.len()),
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
