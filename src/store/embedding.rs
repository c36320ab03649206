//! Text embedders.
//!
//! [`HashEmbedder`] hashes word unigrams and bigrams into fixed buckets; it
//! needs no model files and is deterministic across runs. With the
//! `fastembed-embeddings` feature, [`create_embedder`] returns a BGE-small
//! ONNX model instead.

use crate::core::terms;
use crate::error::StoreError;

/// Dimensions shared by both embedders (BGE-small is 384-d).
pub const DEFAULT_DIMENSIONS: usize = 384;

/// Converts text into dense vectors.
pub trait Embedder: Send + Sync {
    /// Embedder name, stored alongside vectors.
    fn name(&self) -> &'static str;

    /// Output dimensions.
    fn dimensions(&self) -> usize;

    /// Embeds one text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Embedding`] if the model fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError>;

    /// Embeds many texts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Embedding`] if the model fails.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Feature-hashing embedder over content-word unigrams and bigrams.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Creates an embedder with `dimensions` buckets (minimum 1).
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// FNV-1a bucket index.
    #[allow(clippy::cast_possible_truncation)]
    fn bucket(feature: &str, dims: usize) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in feature.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % dims as u64) as usize
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl Embedder for HashEmbedder {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let words = terms(text);
        let mut vector = vec![0.0f32; self.dimensions];

        for word in &words {
            vector[Self::bucket(word, self.dimensions)] += 1.0;
        }
        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            vector[Self::bucket(&bigram, self.dimensions)] += 0.5;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}

/// BGE-small ONNX embedder.
#[cfg(feature = "fastembed-embeddings")]
pub struct FastEmbedder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
}

#[cfg(feature = "fastembed-embeddings")]
impl FastEmbedder {
    /// Loads the default model, downloading it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Embedding`] if the model cannot be loaded.
    pub fn new() -> Result<Self, StoreError> {
        let model = fastembed::TextEmbedding::try_new(Default::default()).map_err(|e| {
            StoreError::Embedding {
                message: format!("loading model: {e}"),
            }
        })?;
        Ok(Self {
            model: std::sync::Mutex::new(model),
        })
    }
}

#[cfg(feature = "fastembed-embeddings")]
impl Embedder for FastEmbedder {
    fn name(&self) -> &'static str {
        "bge-small-en-v1.5"
    }

    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| StoreError::Embedding {
                message: "model returned no vectors".to_string(),
            })
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        let mut model = self.model.lock().map_err(|_| StoreError::Poisoned)?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| StoreError::Embedding {
                message: e.to_string(),
            })
    }
}

/// Creates the embedder selected at compile time.
///
/// # Errors
///
/// Returns [`StoreError::Embedding`] if the model cannot be loaded.
pub fn create_embedder() -> Result<Box<dyn Embedder>, StoreError> {
    #[cfg(feature = "fastembed-embeddings")]
    {
        Ok(Box::new(FastEmbedder::new()?))
    }
    #[cfg(not(feature = "fastembed-embeddings"))]
    {
        Ok(Box::new(HashEmbedder::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::cosine_similarity;

    #[test]
    fn test_hash_embedder_deterministic_and_normalized() {
        let embedder = HashEmbedder::default();
        let a = embedder.embed("photosynthesis converts light").unwrap_or_default();
        let b = embedder.embed("photosynthesis converts light").unwrap_or_default();
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_DIMENSIONS);
        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_similarity_ordering() {
        let embedder = HashEmbedder::default();
        let query = embedder.embed("how does photosynthesis work").unwrap_or_default();
        let related = embedder
            .embed("photosynthesis lets plants turn light into sugar")
            .unwrap_or_default();
        let unrelated = embedder
            .embed("the stock market closed higher on friday")
            .unwrap_or_default();
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_hash_embedder_empty_text() {
        let v = HashEmbedder::new(8).embed("").unwrap_or_default();
        assert_eq!(v, vec![0.0; 8]);
    }
}
