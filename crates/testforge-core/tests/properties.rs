//! Property-based tests for chunking and retrieval packing.

use proptest::prelude::*;

use testforge_core::chunk::{chunk_text, ChunkParams};
use testforge_core::models::{Chunk, ScoredChunk};
use testforge_core::retrieve::select_within_budget;

fn params() -> impl Strategy<Value = ChunkParams> {
    (1usize..64).prop_flat_map(|size| (Just(size), 0..size).prop_map(|(s, o)| ChunkParams::new(s, o)))
}

fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, c) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&c.text);
        } else {
            out.extend(c.text.chars().skip(overlap));
        }
    }
    out
}

proptest! {
    #[test]
    fn chunks_reconstruct_original(text in "\\PC{1,400}", p in params()) {
        let chunks = chunk_text("doc", &text, &p).unwrap();
        prop_assert_eq!(reconstruct(&chunks, p.overlap_chars), text);
    }

    #[test]
    fn chunk_indices_are_contiguous(text in "[a-z ]{1,300}", p in params()) {
        let chunks = chunk_text("doc", &text, &p).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            prop_assert_eq!(c.chunk_index, i as i64);
            prop_assert!(c.char_len <= p.chunk_chars);
            prop_assert!(c.char_len > 0);
        }
    }

    #[test]
    fn chunking_is_deterministic(text in "\\PC{1,200}", p in params()) {
        prop_assert_eq!(chunk_text("doc", &text, &p).unwrap(), chunk_text("doc", &text, &p).unwrap());
    }

    #[test]
    fn packing_respects_budget(lens in proptest::collection::vec(1usize..200, 0..30), budget in 0usize..2000) {
        let candidates: Vec<ScoredChunk> = lens
            .iter()
            .enumerate()
            .map(|(i, &len)| ScoredChunk {
                chunk: Chunk {
                    id: i.to_string(),
                    document_id: format!("d{}", i % 3),
                    chunk_index: (i / 3) as i64,
                    start_char: 0,
                    char_len: len,
                    text: "x".repeat(len),
                    hash: String::new(),
                },
                score: 1.0 - i as f32 / 100.0,
            })
            .collect();
        let picked = select_within_budget(candidates, budget);
        let total: usize = picked.iter().map(|c| c.chunk.char_len).sum();
        prop_assert!(total <= budget);
        for c in &picked {
            prop_assert_eq!(c.chunk.text.chars().count(), c.chunk.char_len);
        }
    }
}
