//! Document ingestion pipeline.
//!
//! `text → chunk → embed (batched) → index`, tracked on the document's
//! status: `uploaded → processing → completed | failed`. Reprocessing runs
//! the same pipeline and replaces every chunk of the document; there is no
//! incremental diffing. Deleting a document empties its index entry first,
//! so its chunks stop being retrievable before the record disappears.

use tracing::{info, warn};
use uuid::Uuid;

use testforge_core::chunk::{chunk_text, ChunkParams};
use testforge_core::embedding::Embedder;
use testforge_core::index::VectorIndex;
use testforge_core::models::{Document, DocumentStatus, IndexedChunk};
use testforge_core::store::Store;
use testforge_core::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct IngestParams {
    pub chunk: ChunkParams,
    pub batch_size: usize,
}

impl Default for IngestParams {
    fn default() -> Self {
        Self {
            chunk: ChunkParams::default(),
            batch_size: 64,
        }
    }
}

/// Register a new document from already-extracted text.
pub async fn create_document(
    store: &dyn Store,
    title: Option<String>,
    text: String,
) -> Result<Document> {
    if text.trim().is_empty() {
        return Err(Error::InvalidInput("document text is empty".to_string()));
    }
    let doc = Document::new(Uuid::new_v4().to_string(), title, text);
    store.insert_document(&doc).await?;
    Ok(doc)
}

/// Chunk, embed and index one document. Returns the number of chunks.
///
/// On failure the document is marked `failed` with the error message and
/// the error is returned; chunks from an earlier successful run remain in
/// the index untouched.
pub async fn process_document(
    store: &dyn Store,
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    document_id: &str,
    params: &IngestParams,
) -> Result<usize> {
    let text = store.extracted_text(document_id).await?;
    store
        .set_document_status(document_id, DocumentStatus::Processing, None)
        .await?;

    match index_text(index, embedder, document_id, &text, params).await {
        Ok(count) => {
            store
                .set_document_status(document_id, DocumentStatus::Completed, None)
                .await?;
            info!(document_id, chunks = count, "document processed");
            Ok(count)
        }
        Err(e) => {
            warn!(document_id, error = %e, "document processing failed");
            store
                .set_document_status(document_id, DocumentStatus::Failed, Some(&e.to_string()))
                .await?;
            Err(e)
        }
    }
}

/// Remove a document and every chunk indexed for it.
pub async fn delete_document(
    store: &dyn Store,
    index: &dyn VectorIndex,
    document_id: &str,
) -> Result<()> {
    if store.get_document(document_id).await?.is_none() {
        return Err(Error::NotFound(format!("document {}", document_id)));
    }
    index.upsert(document_id, &[]).await?;
    store.delete_document(document_id).await?;
    info!(document_id, "document deleted");
    Ok(())
}

async fn index_text(
    index: &dyn VectorIndex,
    embedder: &dyn Embedder,
    document_id: &str,
    text: &str,
    params: &IngestParams,
) -> Result<usize> {
    let chunks = chunk_text(document_id, text, &params.chunk)?;
    let batch_size = params.batch_size.max(1);

    let mut indexed = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        indexed.extend(
            batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, vector)| IndexedChunk { chunk, vector }),
        );
    }

    index.upsert(document_id, &indexed).await?;
    Ok(indexed.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use testforge_core::index::memory::InMemoryIndex;
    use testforge_core::store::memory::InMemoryStore;

    struct LenEmbedder;

    #[async_trait]
    impl Embedder for LenEmbedder {
        fn model_name(&self) -> &str {
            "len"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_process_then_reprocess_replaces_chunks() {
        let store = InMemoryStore::new();
        let index = InMemoryIndex::new();
        let doc = create_document(&store, None, "x".repeat(1200)).await.unwrap();
        let params = IngestParams {
            chunk: ChunkParams::new(500, 50),
            batch_size: 2,
        };

        let n = process_document(&store, &index, &LenEmbedder, &doc.id, &params)
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(index.chunk_count(&doc.id).await.unwrap(), 3);
        let stored = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Completed);

        let bigger = IngestParams {
            chunk: ChunkParams::new(1000, 0),
            batch_size: 2,
        };
        let n = process_document(&store, &index, &LenEmbedder, &doc.id, &bigger)
            .await
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(index.chunk_count(&doc.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_marks_document_failed() {
        let store = InMemoryStore::new();
        let index = InMemoryIndex::new();
        let doc = create_document(&store, Some("notes".into()), "some text".into())
            .await
            .unwrap();
        let err = process_document(&store, &index, &BrokenEmbedder, &doc.id, &IngestParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
        let stored = store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored.error.unwrap().contains("offline"));
    }

    #[tokio::test]
    async fn test_delete_removes_record_and_chunks() {
        let store = InMemoryStore::new();
        let index = InMemoryIndex::new();
        let doc = create_document(&store, None, "y".repeat(800)).await.unwrap();
        process_document(&store, &index, &LenEmbedder, &doc.id, &IngestParams::default())
            .await
            .unwrap();
        assert!(index.chunk_count(&doc.id).await.unwrap() > 0);

        delete_document(&store, &index, &doc.id).await.unwrap();
        assert_eq!(index.chunk_count(&doc.id).await.unwrap(), 0);
        assert!(store.get_document(&doc.id).await.unwrap().is_none());

        let err = delete_document(&store, &index, &doc.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_document_is_not_found() {
        let store = InMemoryStore::new();
        let index = InMemoryIndex::new();
        let err = process_document(&store, &index, &LenEmbedder, "ghost", &IngestParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
