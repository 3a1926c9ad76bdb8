use async_trait::async_trait;

use crate::error::Result;

/// Embedding service seam.
///
/// The store treats embeddings as an external capability: entries are stored
/// with an empty vector (and vector search degrades to fulltext) whenever no
/// embedder is wired in or a call fails.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Whether the backing service can currently produce embeddings.
    fn is_available(&self) -> bool;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Default implementation embeds sequentially; backends with a batch
    /// endpoint should override.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Cosine similarity between two vectors of equal dimension.
///
/// Returns 0.0 for mismatched or zero-magnitude inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Fixed-vector embedder for tests.
#[cfg(any(test, feature = "test-support"))]
pub struct StaticEmbedder {
    pub vector: Vec<f32>,
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl Embedder for StaticEmbedder {
    fn is_available(&self) -> bool {
        true
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.vector.clone())
    }
}

/// Embedder that always fails, for degradation tests.
#[cfg(any(test, feature = "test-support"))]
pub struct FailingEmbedder;

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl Embedder for FailingEmbedder {
    fn is_available(&self) -> bool {
        true
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(crate::error::MemoryError::Embedding(
            "embedding backend down".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_vectors_is_one() {
        let v = vec![0.5, 0.5, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn cosine_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
