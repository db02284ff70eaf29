//! Sliding-window text chunker.
//!
//! Splits extracted document text into overlapping [`Chunk`]s measured in
//! characters (Unicode scalar values, never bytes, so multi-byte text is
//! never split inside a code point).
//!
//! # Algorithm
//!
//! 1. Let `step = chunk_chars - overlap_chars`.
//! 2. Chunk `i` covers `[i × step, min(i × step + chunk_chars, len))`.
//! 3. Stop after the chunk that reaches the end of the text.
//!
//! Every chunk except the last is exactly `chunk_chars` long, so
//! consecutive chunks always share exactly `overlap_chars` characters and
//! the original text is recovered by dropping the first `overlap_chars`
//! characters of every chunk after the first.
//!
//! Each chunk receives a deterministic UUID (v5) derived from its document
//! ID, index and content hash: re-chunking identical text yields an
//! identical chunk list.
//!
//! # Example
//!
//! ```rust
//! use testforge_core::chunk::{chunk_text, ChunkParams};
//!
//! let text = "a".repeat(1200);
//! let chunks = chunk_text("doc-1", &text, &ChunkParams::new(500, 50)).unwrap();
//! assert_eq!(chunks.len(), 3);
//! assert_eq!(chunks[1].start_char, 450);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Chunk;

/// Window size and overlap, both in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkParams {
    pub chunk_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkParams {
    pub fn new(chunk_chars: usize, overlap_chars: usize) -> Self {
        Self {
            chunk_chars,
            overlap_chars,
        }
    }

    /// The window must advance on every step or chunking would not terminate.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_chars == 0 {
            return Err(Error::InvalidInput("chunk size must be > 0".to_string()));
        }
        if self.overlap_chars >= self.chunk_chars {
            return Err(Error::InvalidInput(format!(
                "overlap ({}) must be smaller than chunk size ({})",
                self.overlap_chars, self.chunk_chars
            )));
        }
        Ok(())
    }
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self::new(500, 50)
    }
}

/// Split `text` into overlapping chunks.
///
/// # Errors
///
/// [`Error::InvalidInput`] when `text` is empty or the parameters are
/// invalid (see [`ChunkParams::validate`]).
///
/// # Guarantees
///
/// - Chunk indices are contiguous: `0, 1, …, N-1`.
/// - Every chunk is at most `chunk_chars` characters; only the last may be shorter.
/// - Identical inputs produce identical output, ids included.
pub fn chunk_text(document_id: &str, text: &str, params: &ChunkParams) -> Result<Vec<Chunk>> {
    params.validate()?;
    if text.is_empty() {
        return Err(Error::InvalidInput(format!(
            "document {} has no text to chunk",
            document_id
        )));
    }

    // Byte offset of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let total_chars = boundaries.len() - 1;
    let step = params.chunk_chars - params.overlap_chars;

    let mut chunks = Vec::with_capacity(total_chars / step + 1);
    let mut start = 0usize;
    loop {
        let end = (start + params.chunk_chars).min(total_chars);
        let span = &text[boundaries[start]..boundaries[end]];
        chunks.push(make_chunk(document_id, chunks.len() as i64, start, end - start, span));
        if end == total_chars {
            break;
        }
        start += step;
    }

    Ok(chunks)
}

fn make_chunk(document_id: &str, index: i64, start_char: usize, char_len: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let name = format!("{}:{}:{}", document_id, index, hash);
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string();

    Chunk {
        id,
        document_id: document_id.to_string(),
        chunk_index: index,
        start_char,
        char_len,
        text: text.to_string(),
        hash,
    }
}
