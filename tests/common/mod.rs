//! Shared fixtures for integration tests: a deterministic embedder, a
//! scripted generative backend and a temp-dir SQLite setup.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use testforge::config::{parse_config, Config};
use testforge::ingest::IngestParams;
use testforge::orchestrator::{Collaborators, OrchestratorOptions, RetryPolicy};
use testforge::services::Services;
use testforge::sqlite_store::{SqliteIndex, SqliteStore};
use testforge::{db, migrate};
use testforge_core::backend::{CompletionOptions, GenerativeBackend};
use testforge_core::chunk::ChunkParams;
use testforge_core::embedding::Embedder;
use testforge_core::index::VectorIndex;
use testforge_core::models::{IndexedChunk, ScoredChunk};
use testforge_core::retrieve::RetrievalParams;
use testforge_core::{Error, Result};

// ─── Embedder ───────────────────────────────────────────────────────

/// Letter-frequency vectors: texts sharing vocabulary score close together.
pub struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    fn model_name(&self) -> &str {
        "letters"
    }
    fn dims(&self) -> usize {
        26
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0; 26];
        for c in text.chars().filter(char::is_ascii_alphabetic) {
            v[(c.to_ascii_lowercase() as u8 - b'a') as usize] += 1.0;
        }
        Ok(v)
    }
}

// ─── Index ──────────────────────────────────────────────────────────

/// Passes everything through, but the first `failures` queries report
/// the index as unavailable.
pub struct FlakyIndex {
    inner: Arc<dyn VectorIndex>,
    failures: AtomicUsize,
    queries: AtomicUsize,
}

impl FlakyIndex {
    pub fn new(inner: Arc<dyn VectorIndex>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    async fn upsert(&self, document_id: &str, chunks: &[IndexedChunk]) -> Result<()> {
        self.inner.upsert(document_id, chunks).await
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&[String]>,
    ) -> Result<Vec<ScoredChunk>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::IndexUnavailable("database is locked".into()));
        }
        self.inner.query(vector, k, filter).await
    }

    async fn chunk_count(&self, document_id: &str) -> Result<usize> {
        self.inner.chunk_count(document_id).await
    }
}

// ─── Backend ────────────────────────────────────────────────────────

/// Replays a script of replies, then repeats `fallback` forever.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String>>>,
    fallback: Result<String>,
    delay: Duration,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<Result<String>>, fallback: Result<String>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: Result<String>) -> Self {
        Self::new(Vec::new(), reply)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str, _options: &CompletionOptions) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// A JSON array of `n` well-formed test cases.
pub fn cases_json(n: usize) -> String {
    let items: Vec<String> = (1..=n)
        .map(|i| {
            format!(
                r#"{{"title":"Case {i}","description":"checks behaviour {i}","steps":["open the page","submit the form"],"expected_result":"form accepted","priority":"high","tags":["smoke"]}}"#
            )
        })
        .collect();
    format!("[{}]", items.join(","))
}

pub fn transient() -> Result<String> {
    Err(Error::Transient("503 Service Unavailable".into()))
}

// ─── Environment ────────────────────────────────────────────────────

pub fn test_config(tmp: &TempDir) -> Config {
    let content = format!(
        r#"
[db]
path = "{}"

[chunking]
chunk_chars = 200
overlap_chars = 20

[retrieval]
top_k = 4
max_context_chars = 1000
"#,
        tmp.path().join("tf.sqlite").display()
    );
    parse_config(&content).unwrap()
}

/// Fast retries so failure paths finish in milliseconds.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        attempt_timeout: Duration::from_secs(5),
        job_budget: Duration::from_secs(30),
    }
}

pub struct Harness {
    pub _tmp: TempDir,
    pub services: Services,
    pub backend: Arc<ScriptedBackend>,
    pub index: Arc<FlakyIndex>,
}

/// Knobs beyond the retry policy.
#[derive(Debug, Clone, Copy)]
pub struct HarnessOptions {
    pub workers: usize,
    /// Index queries that fail before the index behaves.
    pub index_failures: usize,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            index_failures: 0,
        }
    }
}

pub async fn harness(backend: ScriptedBackend, policy: RetryPolicy) -> Harness {
    harness_with(backend, policy, HarnessOptions::default()).await
}

pub async fn harness_with(
    backend: ScriptedBackend,
    policy: RetryPolicy,
    opts: HarnessOptions,
) -> Harness {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    let backend = Arc::new(backend);
    let index = Arc::new(FlakyIndex::new(
        Arc::new(SqliteIndex::new(pool.clone())),
        opts.index_failures,
    ));
    let deps = Collaborators {
        store: Arc::new(SqliteStore::new(pool)),
        index: index.clone(),
        embedder: Arc::new(LetterEmbedder),
        backend: backend.clone(),
    };
    let options = OrchestratorOptions {
        retrieval: RetrievalParams {
            top_k: 4,
            max_context_chars: 1000,
            min_score: 0.0,
        },
        policy,
        completion: CompletionOptions::default(),
        workers: opts.workers,
    };
    let ingest = IngestParams {
        chunk: ChunkParams::new(200, 20),
        batch_size: 8,
    };
    Harness {
        _tmp: tmp,
        services: Services::from_parts(deps, options, ingest),
        backend,
        index,
    }
}

pub const REQUIREMENTS: &str = "The checkout page lets a guest enter a shipping address. \
The postcode field is mandatory and must match the country format. \
Payment by card requires a CVV of three digits. \
After payment the order confirmation email is sent within one minute. \
Guests may apply one discount code per order; expired codes are rejected with a message.";

/// Create and process a document; returns its id.
pub async fn ingest_requirements(services: &Services) -> String {
    let doc = services
        .create_document(Some("Checkout".into()), REQUIREMENTS.to_string())
        .await
        .unwrap();
    services.process_document(&doc.id).await.unwrap();
    doc.id
}
