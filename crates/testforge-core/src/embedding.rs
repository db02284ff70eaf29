//! The [`Embedder`] trait and the vector helpers shared by every index.
//!
//! HTTP providers live in the `testforge` app crate.

use async_trait::async_trait;

use crate::error::Result;

/// Maps text to a fixed-length vector.
///
/// Failures are reported as [`Error::Embedding`](crate::error::Error::Embedding),
/// which callers treat as transient.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    /// Length of every vector this embedder returns.
    fn dims(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, preserving input order.
    ///
    /// Defaults to one [`embed`](Embedder::embed) call per text; providers
    /// with a batch endpoint override it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Storage form of a vector: consecutive little-endian `f32`s.
///
/// ```rust
/// use testforge_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.5f32, -1.0, 8.0];
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .filter_map(|b| b.try_into().ok().map(f32::from_le_bytes))
        .collect()
}

/// Cosine similarity, the one metric used by every index in testforge.
///
/// Lies in `[-1.0, 1.0]`. Mismatched lengths, empty input and zero-norm
/// vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, sq_a, sq_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, sq_a, sq_b), (x, y)| {
            (dot + x * y, sq_a + x * x, sq_b + y * y)
        });

    let norm = (sq_a * sq_b).sqrt();
    if norm < f32::EPSILON {
        0.0
    } else {
        dot / norm
    }
}
