//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] interface every embedding backend implements,
//! plus pure helpers for vector serialization and similarity.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `kontext`
//! app crate. The core treats local and remote backends identically and
//! makes no assumption about latency or failure modes.

use async_trait::async_trait;

/// An embedding backend with a fixed output dimensionality.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Provider/model identifier (e.g. `"openai:text-embedding-3-small"`).
    fn name(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    /// Embed a batch of texts, one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_single(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        match vectors.pop() {
            Some(v) if vectors.is_empty() => Ok(v),
            _ => anyhow::bail!("embedder {} returned an unexpected batch size", self.name()),
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use kontext_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`]. Trailing partial words are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Map cosine similarity from `[-1, 1]` onto a `[0, 1]` score.
pub fn similarity_to_score(cosine: f32) -> f64 {
    ((1.0 + cosine as f64) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }

        fn dimensions(&self) -> usize {
            2
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_single_uses_batch() {
        let v = FixedEmbedder.embed_single("abc").await.unwrap();
        assert_eq!(v, vec![3.0, 1.0]);
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_similarity_to_score_bounds() {
        assert!((similarity_to_score(1.0) - 1.0).abs() < 1e-9);
        assert!((similarity_to_score(-1.0)).abs() < 1e-9);
        assert!((similarity_to_score(0.0) - 0.5).abs() < 1e-9);
        assert_eq!(similarity_to_score(1.5), 1.0);
    }
}
