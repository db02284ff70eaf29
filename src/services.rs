//! Wiring: one place that turns a [`Config`] into live collaborators.
//!
//! Both the CLI and the HTTP server go through [`Services`], so a document
//! ingested from the command line and one posted over HTTP follow exactly
//! the same path.

use std::sync::Arc;

use testforge_core::embedding::Embedder;
use testforge_core::index::VectorIndex;
use testforge_core::models::Document;
use testforge_core::store::Store;
use testforge_core::Result;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::ingest::{self, IngestParams};
use crate::llm::create_backend;
use crate::orchestrator::{Collaborators, GenerationOrchestrator, OrchestratorOptions};
use crate::sqlite_store::{SqliteIndex, SqliteStore};
use crate::{db, migrate};

#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn Store>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub orchestrator: GenerationOrchestrator,
    pub ingest: IngestParams,
}

impl Services {
    /// Connect to the configured database (applying migrations) and build
    /// the configured providers.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let deps = Collaborators {
            store: Arc::new(SqliteStore::new(pool.clone())),
            index: Arc::new(SqliteIndex::new(pool)),
            embedder: create_embedder(&config.embedding)?,
            backend: create_backend(&config.generation)?,
        };
        let ingest = IngestParams {
            chunk: config.chunking.params(),
            batch_size: config.embedding.batch_size,
        };
        let options =
            OrchestratorOptions::from_settings(&config.generation, config.retrieval.params());
        Ok(Self::from_parts(deps, options, ingest))
    }

    pub fn from_parts(
        deps: Collaborators,
        options: OrchestratorOptions,
        ingest: IngestParams,
    ) -> Self {
        Self {
            store: Arc::clone(&deps.store),
            index: Arc::clone(&deps.index),
            embedder: Arc::clone(&deps.embedder),
            orchestrator: GenerationOrchestrator::new(deps, options),
            ingest,
        }
    }

    pub async fn create_document(&self, title: Option<String>, text: String) -> Result<Document> {
        ingest::create_document(self.store.as_ref(), title, text).await
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        ingest::delete_document(self.store.as_ref(), self.index.as_ref(), document_id).await
    }

    pub async fn process_document(&self, document_id: &str) -> Result<usize> {
        ingest::process_document(
            self.store.as_ref(),
            self.index.as_ref(),
            self.embedder.as_ref(),
            document_id,
            &self.ingest,
        )
        .await
    }
}
