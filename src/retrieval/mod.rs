//! Multi-hop retrieval.
//!
//! # Pipeline
//!
//! ```text
//! question ─▶ expand ─▶ [variant₁ … variantₙ]
//!                          │  (bounded concurrency, per-variant timeout)
//!                          ▼
//!                    vector search × n  ──▶ merge by (source, offset)
//!                                               │
//!                                               ▼
//!                                  re-rank + blend ─▶ threshold ─▶ top_k
//! ```
//!
//! Every stage degrades instead of failing: an expansion error falls back
//! to a single-hop search, a failing variant is skipped, and a re-rank
//! error keeps the merged order. Only when every variant search fails is
//! an error returned.

pub mod expand;
pub mod rerank;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::config::EngineConfig;
use crate::agent::provider::LlmProvider;
use crate::error::StoreError;
use crate::store::{Embedder, SearchFilter, StoreHit, VectorStore};

pub use expand::{HeuristicExpander, LlmExpander, QueryExpander};
pub use rerank::{LexicalReranker, LlmReranker, Reranker};

/// Score bonus per additional variant that found the same chunk.
pub const MULTI_VARIANT_BONUS: f32 = 0.05;

/// A ranked passage with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    /// Passage text.
    pub text: String,
    /// Source identifier.
    pub source_id: String,
    /// Human-readable source name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
    /// First line in the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Page in the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Chunk position within the source.
    pub offset: u32,
    /// Relevance, higher is better.
    pub score: f32,
}

impl RetrievedPassage {
    /// Converts a store hit.
    #[must_use]
    pub fn from_hit(hit: StoreHit) -> Self {
        Self {
            text: hit.chunk.content,
            source_id: hit.chunk.source_id,
            source_name: hit.chunk.source_name,
            line: hit.chunk.line,
            page: hit.chunk.page,
            offset: hit.chunk.offset,
            score: hit.score,
        }
    }

    /// Display name: source name when known, else the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.source_name.as_deref().unwrap_or(&self.source_id)
    }
}

/// Tunables for [`Retriever`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalSettings {
    /// Query variants, original included.
    pub expansion_variants: usize,
    /// Hits per variant as a multiple of `top_k`.
    pub expansion_factor: usize,
    /// Minimum blended score kept.
    pub min_relevance: f32,
    /// Weight of the re-rank score in the blend.
    pub rerank_weight: f32,
    /// Concurrent variant searches.
    pub max_concurrency: usize,
    /// Timeout for one variant search.
    pub timeout: Duration,
}

impl RetrievalSettings {
    /// Settings from engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            expansion_variants: config.expansion_variants.max(1),
            expansion_factor: config.expansion_factor.max(1),
            min_relevance: config.min_relevance,
            rerank_weight: config.rerank_weight.clamp(0.0, 1.0),
            max_concurrency: config.max_concurrency.max(1),
            timeout: config.retrieval_timeout,
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Multi-hop retriever over a [`VectorStore`].
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    expander: Arc<dyn QueryExpander>,
    reranker: Arc<dyn Reranker>,
    settings: RetrievalSettings,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("embedder", &self.embedder.name())
            .field("expander", &self.expander.name())
            .field("reranker", &self.reranker.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Retriever {
    /// Creates a retriever.
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        expander: Arc<dyn QueryExpander>,
        reranker: Arc<dyn Reranker>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            expander,
            reranker,
            settings,
        }
    }

    /// Number of live chunks visible under `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on database failures.
    pub async fn visible_chunks(&self, filter: &SearchFilter) -> Result<usize, StoreError> {
        self.store.count(filter).await
    }

    /// Multi-hop retrieval: expand, search each variant, merge, re-rank.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only when every variant search fails.
    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
        filter: &SearchFilter,
        provider: &dyn LlmProvider,
    ) -> Result<Vec<RetrievedPassage>, StoreError> {
        let top_k = top_k.max(1);
        let variants = match self
            .expander
            .expand(question, self.settings.expansion_variants, provider)
            .await
        {
            Ok(variants) if !variants.is_empty() => variants,
            Ok(_) => vec![question.to_string()],
            Err(e) => {
                debug!(error = %e, "query expansion failed, using single-hop search");
                return self.single_hop(question, top_k, filter).await;
            }
        };
        debug!(variants = variants.len(), "expanded query");

        let per_variant = top_k.saturating_mul(self.settings.expansion_factor);
        let searches: Vec<_> = variants
            .iter()
            .map(|variant| self.search_variant(variant, per_variant, filter))
            .collect();
        let results: Vec<Result<Vec<StoreHit>, StoreError>> = stream::iter(searches)
            .buffered(self.settings.max_concurrency.max(1))
            .collect()
            .await;

        let mut lists = Vec::with_capacity(results.len());
        let mut last_error = None;
        for (variant, result) in variants.iter().zip(results) {
            match result {
                Ok(hits) => lists.push(hits),
                Err(e) => {
                    warn!(variant = %variant, error = %e, "variant search failed, skipping");
                    last_error = Some(e);
                }
            }
        }
        if lists.is_empty()
            && let Some(e) = last_error
        {
            return Err(e);
        }

        let merged = merge_hits(lists);
        let ranked = self.rerank(question, merged, provider).await;
        Ok(self.finish(ranked, top_k))
    }

    /// Single search with the original question; no expansion or re-rank.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the search fails.
    pub async fn single_hop(
        &self,
        question: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<RetrievedPassage>, StoreError> {
        let hits = self.search_variant(question, top_k.max(1), filter).await?;
        let passages = hits.into_iter().map(RetrievedPassage::from_hit).collect();
        Ok(self.finish(passages, top_k.max(1)))
    }

    async fn search_variant(
        &self,
        variant: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let embedder = Arc::clone(&self.embedder);
        let text = variant.to_string();
        let embedding = tokio::task::spawn_blocking(move || embedder.embed(&text))
            .await
            .map_err(|e| StoreError::Embedding {
                message: e.to_string(),
            })??;

        tokio::time::timeout(
            self.settings.timeout,
            self.store.search(&embedding, limit, filter),
        )
        .await
        .map_err(|_| StoreError::Timeout {
            after: self.settings.timeout,
        })?
    }

    async fn rerank(
        &self,
        question: &str,
        mut passages: Vec<RetrievedPassage>,
        provider: &dyn LlmProvider,
    ) -> Vec<RetrievedPassage> {
        if passages.is_empty() {
            return passages;
        }
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        match self.reranker.score(question, &texts, provider).await {
            Ok(scores) if scores.len() == passages.len() => {
                let w = self.settings.rerank_weight;
                for (passage, rerank) in passages.iter_mut().zip(scores) {
                    passage.score = (1.0 - w).mul_add(passage.score, w * rerank.clamp(0.0, 1.0));
                }
                sort_passages(&mut passages);
            }
            Ok(scores) => {
                warn!(
                    expected = passages.len(),
                    got = scores.len(),
                    "re-ranker returned wrong score count, keeping merged order"
                );
            }
            Err(e) => debug!(error = %e, "re-rank failed, keeping merged order"),
        }
        passages
    }

    fn finish(&self, mut passages: Vec<RetrievedPassage>, top_k: usize) -> Vec<RetrievedPassage> {
        passages.retain(|p| p.score >= self.settings.min_relevance);
        passages.truncate(top_k);
        debug!(passages = passages.len(), "retrieval finished");
        passages
    }
}

/// Merges per-variant hit lists by `(source_id, offset)`.
///
/// The merged score is the best score across variants plus
/// [`MULTI_VARIANT_BONUS`] per additional variant that found the chunk.
/// Output is sorted best first, ties by source and offset.
#[must_use]
pub fn merge_hits(lists: Vec<Vec<StoreHit>>) -> Vec<RetrievedPassage> {
    let mut merged: HashMap<(String, u32), (RetrievedPassage, usize)> = HashMap::new();
    for hits in lists {
        // Best hit per chunk within one variant.
        let mut best: HashMap<(String, u32), StoreHit> = HashMap::new();
        for hit in hits {
            let key = (hit.chunk.source_id.clone(), hit.chunk.offset);
            match best.get(&key) {
                Some(existing) if existing.score >= hit.score => {}
                _ => {
                    best.insert(key, hit);
                }
            }
        }
        for (key, hit) in best {
            let score = hit.score;
            merged
                .entry(key)
                .and_modify(|(passage, count)| {
                    passage.score = passage.score.max(score);
                    *count += 1;
                })
                .or_insert_with(|| (RetrievedPassage::from_hit(hit), 1));
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let mut passages: Vec<RetrievedPassage> = merged
        .into_values()
        .map(|(mut passage, count)| {
            passage.score += MULTI_VARIANT_BONUS * (count - 1) as f32;
            passage
        })
        .collect();
    sort_passages(&mut passages);
    passages
}

fn sort_passages(passages: &mut [RetrievedPassage]) {
    passages.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.source_id.cmp(&b.source_id))
            .then_with(|| a.offset.cmp(&b.offset))
    });
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::store::StoredChunk;

    fn hit(source: &str, offset: u32, score: f32) -> StoreHit {
        StoreHit {
            chunk: StoredChunk {
                source_id: source.to_string(),
                source_name: None,
                offset,
                content: format!("{source}#{offset}"),
                line: Some(1),
                page: None,
                session_id: None,
            },
            score,
        }
    }

    #[test]
    fn test_merge_dedups_and_rewards_agreement() {
        let merged = merge_hits(vec![
            vec![hit("a", 0, 0.5), hit("b", 0, 0.55)],
            vec![hit("a", 0, 0.4)],
            vec![hit("a", 0, 0.3), hit("c", 1, 0.2)],
        ]);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].source_id, "a");
        assert!((merged[0].score - 0.6).abs() < 1e-6);
        assert_eq!(merged[1].source_id, "b");
    }

    #[test]
    fn test_merge_breaks_ties_deterministically() {
        let merged = merge_hits(vec![vec![hit("z", 0, 0.5), hit("a", 3, 0.5), hit("a", 1, 0.5)]]);
        let order: Vec<(&str, u32)> = merged
            .iter()
            .map(|p| (p.source_id.as_str(), p.offset))
            .collect();
        assert_eq!(order, vec![("a", 1), ("a", 3), ("z", 0)]);
    }

    proptest! {
        #[test]
        fn prop_merge_keys_unique_and_scores_not_lowered(
            lists in prop::collection::vec(
                prop::collection::vec((0u8..4, 0u32..4, 0.0f32..1.0), 0..6),
                0..4,
            )
        ) {
            let input: Vec<Vec<StoreHit>> = lists
                .iter()
                .map(|l| l.iter().map(|(s, o, sc)| hit(&s.to_string(), *o, *sc)).collect())
                .collect();
            let merged = merge_hits(input.clone());

            let mut keys: Vec<(String, u32)> =
                merged.iter().map(|p| (p.source_id.clone(), p.offset)).collect();
            let total = keys.len();
            keys.sort();
            keys.dedup();
            prop_assert_eq!(keys.len(), total);

            for passage in &merged {
                let best = input
                    .iter()
                    .flatten()
                    .filter(|h| h.chunk.source_id == passage.source_id && h.chunk.offset == passage.offset)
                    .map(|h| h.score)
                    .fold(f32::MIN, f32::max);
                prop_assert!(passage.score >= best);
            }
            prop_assert!(merged.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }
}
