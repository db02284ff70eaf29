//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait wraps whatever vector store backs retrieval.
//! The similarity metric is fixed to cosine similarity
//! ([`cosine_similarity`](crate::embedding::cosine_similarity)) for every
//! implementation, so scores from different backends are comparable.
//!
//! # Consistency
//!
//! [`upsert`](VectorIndex::upsert) replaces every vector previously stored
//! for a document in one step: a concurrent [`query`](VectorIndex::query)
//! sees either the complete old chunk set or the complete new one, never a
//! mix.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{IndexedChunk, ScoredChunk};

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace all chunks stored for `document_id` with `chunks`.
    ///
    /// Every chunk must belong to `document_id`. An empty slice removes the
    /// document from the index.
    async fn upsert(&self, document_id: &str, chunks: &[IndexedChunk]) -> Result<()>;

    /// Return the `k` chunks nearest to `vector`, best first.
    ///
    /// `filter` restricts candidates to the given document ids; `None`
    /// searches everything. Ties are broken by document id, then chunk index.
    ///
    /// # Errors
    ///
    /// [`Error::IndexUnavailable`](crate::error::Error::IndexUnavailable)
    /// when the backing store cannot be reached.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&[String]>,
    ) -> Result<Vec<ScoredChunk>>;

    /// Number of chunks stored for a document.
    async fn chunk_count(&self, document_id: &str) -> Result<usize>;
}

/// Sort candidates best-first with a deterministic tie-break and keep `k`.
pub fn rank_and_truncate(mut candidates: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
    candidates.truncate(k);
    candidates
}
