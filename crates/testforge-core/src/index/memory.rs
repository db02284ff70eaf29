//! In-memory [`VectorIndex`] implementation for tests and embedded use.
//!
//! Each document's chunks live behind an `Arc` that is swapped as a whole
//! on upsert, which gives readers the all-old-or-all-new guarantee without
//! holding the write lock during a query. Search is brute-force cosine.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{IndexedChunk, ScoredChunk};

use super::{rank_and_truncate, VectorIndex};

#[derive(Default)]
pub struct InMemoryIndex {
    docs: RwLock<HashMap<String, Arc<Vec<IndexedChunk>>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self, filter: Option<&[String]>) -> Result<Vec<Arc<Vec<IndexedChunk>>>> {
        let docs = self
            .docs
            .read()
            .map_err(|_| Error::IndexUnavailable("index lock poisoned".to_string()))?;
        Ok(match filter {
            Some(ids) => ids.iter().filter_map(|id| docs.get(id).cloned()).collect(),
            None => docs.values().cloned().collect(),
        })
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, document_id: &str, chunks: &[IndexedChunk]) -> Result<()> {
        if let Some(stray) = chunks.iter().find(|c| c.chunk.document_id != document_id) {
            return Err(Error::InvalidInput(format!(
                "chunk {} belongs to {}, not {}",
                stray.chunk.id, stray.chunk.document_id, document_id
            )));
        }
        let replacement = Arc::new(chunks.to_vec());
        let mut docs = self
            .docs
            .write()
            .map_err(|_| Error::IndexUnavailable("index lock poisoned".to_string()))?;
        if replacement.is_empty() {
            docs.remove(document_id);
        } else {
            docs.insert(document_id.to_string(), replacement);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&[String]>,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates = self
            .snapshot(filter)?
            .iter()
            .flat_map(|doc| doc.iter())
            .map(|ic| ScoredChunk {
                chunk: ic.chunk.clone(),
                score: cosine_similarity(vector, &ic.vector),
            })
            .collect();
        Ok(rank_and_truncate(candidates, k))
    }

    async fn chunk_count(&self, document_id: &str) -> Result<usize> {
        let docs = self
            .docs
            .read()
            .map_err(|_| Error::IndexUnavailable("index lock poisoned".to_string()))?;
        Ok(docs.get(document_id).map_or(0, |d| d.len()))
    }
}
