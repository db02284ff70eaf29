//! Similarity retrieval over the vector index.
//!
//! # Algorithm
//!
//! 1. Empty scope or blank query → empty result (not an error).
//! 2. Embed the query with the configured [`Embedder`].
//! 3. Ask the [`VectorIndex`] for `top_k` nearest chunks within the scope.
//! 4. Drop candidates scoring below `min_score`.
//! 5. Walk the survivors best-first. Neighbouring chunks of one document
//!    share `overlap_chars` characters, so each candidate is first trimmed
//!    to the span not already covered by a selected chunk of the same
//!    document; a fully covered candidate is skipped.
//! 6. Include each trimmed chunk while the running total stays within
//!    `max_context_chars`; the first chunk that would overflow the budget
//!    ends the walk. Chunks are only ever trimmed at covered edges.

use std::collections::HashMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::VectorIndex;
use crate::models::ScoredChunk;

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalParams {
    /// Number of nearest neighbours requested from the index.
    pub top_k: usize,
    /// Upper bound on the summed length of returned chunks, in characters.
    pub max_context_chars: usize,
    /// Similarity floor; weaker matches are not returned.
    #[serde(default)]
    pub min_score: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 8,
            max_context_chars: 4000,
            min_score: 0.0,
        }
    }
}

pub struct Retriever<'a> {
    embedder: &'a dyn Embedder,
    index: &'a dyn VectorIndex,
    params: RetrievalParams,
}

impl<'a> Retriever<'a> {
    pub fn new(
        embedder: &'a dyn Embedder,
        index: &'a dyn VectorIndex,
        params: RetrievalParams,
    ) -> Self {
        Self {
            embedder,
            index,
            params,
        }
    }

    /// Return ranked, deduplicated chunks relevant to `query`.
    ///
    /// `scope` of `None` searches all indexed documents; `Some(&[])` is an
    /// empty scope and returns nothing without touching the embedder.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::Embedding`](crate::error::Error::Embedding) and
    /// [`Error::IndexUnavailable`](crate::error::Error::IndexUnavailable);
    /// both are transient for the caller.
    pub async fn retrieve(&self, query: &str, scope: Option<&[String]>) -> Result<Vec<ScoredChunk>> {
        if query.trim().is_empty() || scope.is_some_and(|s| s.is_empty()) {
            return Ok(Vec::new());
        }
        if self.params.top_k == 0 || self.params.max_context_chars == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed(query).await?;
        let mut candidates = self
            .index
            .query(&query_vec, self.params.top_k, scope)
            .await?;
        candidates.retain(|c| c.score >= self.params.min_score);

        Ok(select_within_budget(
            candidates,
            self.params.max_context_chars,
        ))
    }
}

/// Trim overlap between same-document chunks and greedily pack best-first
/// candidates into `budget` characters.
pub fn select_within_budget(candidates: Vec<ScoredChunk>, budget: usize) -> Vec<ScoredChunk> {
    let mut covered: HashMap<String, Vec<Range<usize>>> = HashMap::new();
    let mut used = 0usize;
    let mut selected = Vec::new();

    for mut cand in candidates {
        let spans = covered.entry(cand.chunk.document_id.clone()).or_default();
        let Some(novel) = uncovered_span(&cand, spans) else {
            continue;
        };
        if used + novel.len() > budget {
            break;
        }
        trim_to(&mut cand, novel.clone());
        used += cand.chunk.char_len;
        spans.push(novel);
        selected.push(cand);
    }

    selected
}

/// The part of `cand` left after cutting covered characters off either end.
/// `None` when nothing new remains.
fn uncovered_span(cand: &ScoredChunk, covered: &[Range<usize>]) -> Option<Range<usize>> {
    let mut start = cand.chunk.start_char;
    let mut end = start + cand.chunk.char_len;

    // Each pass can expose another covered range, e.g. a later neighbour.
    loop {
        let before = (start, end);
        for span in covered {
            if span.start <= start && start < span.end {
                start = span.end;
            }
            if start < end && span.start < end && end <= span.end {
                end = span.start;
            }
        }
        if start >= end {
            return None;
        }
        if (start, end) == before {
            return Some(start..end);
        }
    }
}

/// `id` and `hash` keep naming the stored chunk.
fn trim_to(cand: &mut ScoredChunk, span: Range<usize>) {
    let chunk = &mut cand.chunk;
    if span.start == chunk.start_char && span.len() == chunk.char_len {
        return;
    }
    chunk.text = chunk
        .text
        .chars()
        .skip(span.start - chunk.start_char)
        .take(span.len())
        .collect();
    chunk.start_char = span.start;
    chunk.char_len = span.len();
}
