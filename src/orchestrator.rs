//! Generation job orchestration.
//!
//! Each submitted job runs as its own tokio task:
//!
//! ```text
//! queued ──▶ running ──▶ succeeded
//!   │          │ ▲
//!   │          │ └── transient error, attempts left: backoff, retry
//!   │          ├──▶ failed      (permanent error, attempts or budget exhausted)
//!   └──────────┴──▶ cancelled   (checked between attempts)
//! ```
//!
//! One attempt is `retrieve → assemble prompt → backend call → parse`.
//! Retrieved passages are kept once obtained, so a retry repeats only the
//! backend call and parsing. After a `MalformedResponse` the next prompt
//! carries a stricter formatting reminder.
//!
//! # Invariants
//!
//! - At most one non-terminal job per [`JobScope::key`]. The registry is
//!   the only shared mutable state; its check-and-insert runs under one
//!   lock, so concurrent identical submissions observe the same job id.
//! - Cancellation is cooperative: it is honoured while queued, before an
//!   attempt, during backoff, and right after a backend call returns (the
//!   reply is then discarded). An in-flight call is never aborted.
//! - Each backend call is bounded by `attempt_timeout`; the whole job is
//!   bounded by `job_budget`, measured from submission so time spent
//!   queued for a worker counts. An exhausted budget fails the job with a
//!   timeout even if attempts remain, including while it is still queued.
//! - Every state change is published on the job's watch channel and
//!   persisted through the [`Store`]. The terminal write is retried; until
//!   it lands the job stays in the registry, so [`status`] never reports a
//!   finished job as running. Its key is freed either way.
//!
//! [`status`]: GenerationOrchestrator::status

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use testforge_core::backend::{CompletionOptions, GenerativeBackend};
use testforge_core::embedding::Embedder;
use testforge_core::index::VectorIndex;
use testforge_core::models::{
    GenerationConfig, GenerationJob, JobError, JobScope, JobStatus, Provenance, ScoredChunk,
};
use testforge_core::parse::{parse_response, ParsedCases};
use testforge_core::prompt::{assemble_prompt, PromptInput};
use testforge_core::retrieve::{RetrievalParams, Retriever};
use testforge_core::store::Store;
use testforge_core::{Error, Result};

use crate::config::GenerationSettings;

const TERMINAL_WRITE_ATTEMPTS: u32 = 3;
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Attempt, backoff and time limits for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
    pub job_budget: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &GenerationSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_backoff: settings.base_backoff(),
            max_backoff: settings.max_backoff(),
            attempt_timeout: settings.attempt_timeout(),
            job_budget: settings.job_budget(),
        }
    }

    /// Delay after failed attempt `attempt` (1-based): `base × 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let pow = attempt.saturating_sub(1).min(20);
        self.base_backoff
            .saturating_mul(1u32 << pow)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&GenerationSettings::default())
    }
}

/// Everything a job needs from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn Store>,
    pub index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub backend: Arc<dyn GenerativeBackend>,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorOptions {
    pub retrieval: RetrievalParams,
    pub policy: RetryPolicy,
    pub completion: CompletionOptions,
    /// Jobs allowed to run at once; the rest wait in `queued`.
    pub workers: usize,
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &GenerationSettings, retrieval: RetrievalParams) -> Self {
        Self {
            retrieval,
            policy: RetryPolicy::from_settings(settings),
            completion: CompletionOptions {
                temperature: settings.temperature,
                max_output_tokens: None,
            },
            workers: settings.workers,
        }
    }
}

/// Result of [`GenerationOrchestrator::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: String,
    /// `true` when an in-flight job for the same key was returned.
    pub existing: bool,
}

struct JobHandle {
    state: watch::Sender<GenerationJob>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Registry {
    /// key → id of the non-terminal job holding it.
    active: HashMap<String, String>,
    /// id → live handle, for non-terminal jobs only.
    handles: HashMap<String, JobHandle>,
}

struct Inner {
    deps: Collaborators,
    options: OrchestratorOptions,
    workers: Arc<Semaphore>,
    registry: Mutex<Registry>,
}

/// Owns the job registry and runs generation jobs.
#[derive(Clone)]
pub struct GenerationOrchestrator {
    inner: Arc<Inner>,
}

impl GenerationOrchestrator {
    pub fn new(deps: Collaborators, options: OrchestratorOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                workers: Arc::new(Semaphore::new(options.workers.max(1))),
                deps,
                options,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Submit a job, or return the in-flight job for the same key.
    ///
    /// # Errors
    ///
    /// `InvalidInput` / `InvalidConfig` for a bad request, `NotFound` for an
    /// unknown document id. Nothing external is called in those cases.
    pub async fn submit(&self, mut scope: JobScope, config: GenerationConfig) -> Result<Submission> {
        let deadline = Instant::now() + self.inner.options.policy.job_budget;
        scope.normalize();
        scope.validate()?;
        config.validate()?;
        for doc_id in &scope.document_ids {
            if self.inner.deps.store.get_document(doc_id).await?.is_none() {
                return Err(Error::NotFound(format!("document {}", doc_id)));
            }
        }

        let job = GenerationJob::new(Uuid::new_v4().to_string(), scope, config);
        let cancel = CancellationToken::new();
        {
            let mut reg = self.inner.lock_registry()?;
            if let Some(existing) = reg.active.get(&job.key) {
                debug!(job_id = %existing, "returning in-flight job for identical request");
                return Ok(Submission {
                    job_id: existing.clone(),
                    existing: true,
                });
            }
            let (state, _) = watch::channel(job.clone());
            reg.active.insert(job.key.clone(), job.id.clone());
            reg.handles.insert(
                job.id.clone(),
                JobHandle {
                    state,
                    cancel: cancel.clone(),
                },
            );
        }

        if let Err(e) = self.inner.deps.store.save_job(&job).await {
            self.inner.release(&job, true);
            return Err(e);
        }

        info!(job_id = %job.id, documents = job.scope.document_ids.len(), "generation job queued");
        let job_id = job.id.clone();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(job, cancel, deadline).await });

        Ok(Submission {
            job_id,
            existing: false,
        })
    }

    /// Current snapshot of a job.
    pub async fn status(&self, job_id: &str) -> Result<GenerationJob> {
        if let Some(job) = self.inner.live_snapshot(job_id)? {
            return Ok(job);
        }
        self.inner
            .deps
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    /// Request cancellation. Takes effect at the job's next suspension point.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown job, `Conflict` if it already finished.
    pub async fn cancel(&self, job_id: &str) -> Result<GenerationJob> {
        {
            let reg = self.inner.lock_registry()?;
            if let Some(handle) = reg.handles.get(job_id) {
                let current = handle.state.borrow().clone();
                if !current.status.is_terminal() {
                    handle.cancel.cancel();
                    info!(job_id, "cancellation requested");
                    return Ok(current);
                }
            }
        }
        let job = self.status(job_id).await?;
        Err(Error::Conflict(format!(
            "job {} already finished as {}",
            job_id, job.status
        )))
    }

    /// Watch a job's state. A finished job yields a receiver holding its final state.
    pub async fn subscribe(&self, job_id: &str) -> Result<watch::Receiver<GenerationJob>> {
        {
            let reg = self.inner.lock_registry()?;
            if let Some(handle) = reg.handles.get(job_id) {
                return Ok(handle.state.subscribe());
            }
        }
        let job = self.status(job_id).await?;
        let (_, rx) = watch::channel(job);
        Ok(rx)
    }

    /// Resolve once the job reaches a terminal state.
    pub async fn wait(&self, job_id: &str) -> Result<GenerationJob> {
        let mut rx = self.subscribe(job_id).await?;
        loop {
            let current = rx.borrow_and_update().clone();
            if current.status.is_terminal() {
                return Ok(current);
            }
            if rx.changed().await.is_err() {
                // Sender dropped after the final publish; the store has the record.
                return self.status(job_id).await;
            }
        }
    }
}

impl Inner {
    fn lock_registry(&self) -> Result<std::sync::MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| Error::Storage("job registry lock poisoned".to_string()))
    }

    fn live_snapshot(&self, job_id: &str) -> Result<Option<GenerationJob>> {
        Ok(self
            .lock_registry()?
            .handles
            .get(job_id)
            .map(|h| h.state.borrow().clone()))
    }

    /// Free the job's key; with `drop_handle` also forget its live state.
    fn release(&self, job: &GenerationJob, drop_handle: bool) {
        if let Ok(mut reg) = self.registry.lock() {
            if reg.active.get(&job.key) == Some(&job.id) {
                reg.active.remove(&job.key);
            }
            if drop_handle {
                reg.handles.remove(&job.id);
            }
        }
    }

    fn publish(&self, job: &GenerationJob) {
        if let Ok(reg) = self.registry.lock() {
            if let Some(handle) = reg.handles.get(&job.id) {
                handle.state.send_replace(job.clone());
            }
        }
    }

    /// Persist, then publish to subscribers. A failed write is only logged:
    /// the live handle still answers [`GenerationOrchestrator::status`].
    async fn record(&self, job: &GenerationJob) {
        if let Err(e) = self.deps.store.save_job(job).await {
            warn!(job_id = %job.id, error = %e, "failed to persist job state");
        }
        self.publish(job);
    }

    async fn move_to(&self, job: &mut GenerationJob, next: JobStatus) {
        if let Err(e) = job.transition(next) {
            warn!(job_id = %job.id, error = %e, "illegal job transition ignored");
            return;
        }
        self.record(job).await;
    }

    /// Write the terminal record, retrying with a short linear backoff.
    async fn persist_terminal(&self, job: &GenerationJob) -> bool {
        for attempt in 1..=TERMINAL_WRITE_ATTEMPTS {
            match self.deps.store.save_job(job).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(job_id = %job.id, attempt, error = %e, "failed to persist final job state");
                    if attempt < TERMINAL_WRITE_ATTEMPTS {
                        tokio::time::sleep(TERMINAL_WRITE_BACKOFF * attempt).await;
                    }
                }
            }
        }
        false
    }

    async fn finish(&self, mut job: GenerationJob, next: JobStatus) {
        if let Err(e) = job.transition(next) {
            warn!(job_id = %job.id, error = %e, "illegal job transition ignored");
        }
        self.publish(&job);
        let persisted = self.persist_terminal(&job).await;
        if !persisted {
            warn!(job_id = %job.id, status = %job.status, "final job state kept in memory only");
        }
        self.release(&job, persisted);
        match job.status {
            JobStatus::Succeeded => info!(
                job_id = %job.id,
                attempts = job.attempts,
                cases = job.result_ids.len(),
                dropped = job.warnings.len(),
                "generation job succeeded"
            ),
            JobStatus::Failed => warn!(
                job_id = %job.id,
                attempts = job.attempts,
                error = job.last_error.as_ref().map_or("", |e| e.message.as_str()),
                "generation job failed"
            ),
            other => info!(job_id = %job.id, status = %other, "generation job finished"),
        }
    }

    async fn fail(&self, mut job: GenerationJob, err: &Error) {
        job.last_error = Some(JobError::from(err));
        self.finish(job, JobStatus::Failed).await;
    }

    async fn run(self: Arc<Self>, mut job: GenerationJob, cancel: CancellationToken, deadline: Instant) {
        let policy = self.options.policy;
        let _permit = tokio::select! {
            () = cancel.cancelled() => {
                self.finish(job, JobStatus::Cancelled).await;
                return;
            }
            () = tokio::time::sleep_until(deadline) => {
                let budget = Error::Timeout(format!(
                    "job budget of {}ms exhausted while queued",
                    policy.job_budget.as_millis()
                ));
                self.fail(job, &budget).await;
                return;
            }
            permit = Arc::clone(&self.workers).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => {
                    self.fail(job, &Error::Storage("worker pool closed".to_string())).await;
                    return;
                }
            },
        };

        let mut passages: Option<Vec<ScoredChunk>> = None;
        let mut strict = false;

        loop {
            if cancel.is_cancelled() {
                self.finish(job, JobStatus::Cancelled).await;
                return;
            }
            if Instant::now() >= deadline {
                let budget = Error::Timeout(format!(
                    "job budget of {}ms exhausted after {} attempts",
                    policy.job_budget.as_millis(),
                    job.attempts
                ));
                self.fail(job, &budget).await;
                return;
            }

            job.attempts += 1;
            self.move_to(&mut job, JobStatus::Running).await;
            debug!(job_id = %job.id, attempt = job.attempts, strict, "attempt started");

            let outcome = self.attempt(&job, &mut passages, strict, deadline).await;

            if cancel.is_cancelled() {
                self.finish(job, JobStatus::Cancelled).await;
                return;
            }

            let err = match outcome {
                Ok(parsed) => match self.store_results(&mut job, parsed).await {
                    Ok(()) => {
                        self.finish(job, JobStatus::Succeeded).await;
                        return;
                    }
                    Err(e) => e,
                },
                Err(e) => e,
            };

            job.last_error = Some(JobError::from(&err));
            if !err.is_transient() || job.attempts >= policy.max_attempts {
                self.finish(job, JobStatus::Failed).await;
                return;
            }
            strict = matches!(err, Error::MalformedResponse(_));

            let delay = policy.backoff(job.attempts);
            if Instant::now() + delay >= deadline {
                let budget = Error::Timeout(format!(
                    "job budget of {}ms exhausted after {} attempts; last error: {}",
                    policy.job_budget.as_millis(),
                    job.attempts,
                    err
                ));
                self.fail(job, &budget).await;
                return;
            }

            warn!(
                job_id = %job.id,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );
            self.record(&job).await;

            tokio::select! {
                () = cancel.cancelled() => {
                    self.finish(job, JobStatus::Cancelled).await;
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(
        &self,
        job: &GenerationJob,
        passages: &mut Option<Vec<ScoredChunk>>,
        strict: bool,
        deadline: Instant,
    ) -> Result<ParsedCases> {
        if passages.is_none() {
            *passages = Some(self.retrieve(job).await?);
        }
        let context = passages.as_deref().unwrap_or(&[]);

        let prompt = assemble_prompt(&PromptInput {
            scenario: job.scope.scenario.as_deref(),
            requirement: job.scope.free_text.as_deref(),
            passages: context,
            config: &job.config,
            strict,
        })?;

        let limit = self
            .options
            .policy
            .attempt_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let raw = match tokio::time::timeout(
            limit,
            self.deps.backend.complete(&prompt, &self.options.completion),
        )
        .await
        {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "{} call exceeded {}ms",
                    self.deps.backend.name(),
                    limit.as_millis()
                )))
            }
        };

        parse_response(&raw, job.config.default_priority).into_result()
    }

    /// Free-text-only jobs skip retrieval entirely.
    async fn retrieve(&self, job: &GenerationJob) -> Result<Vec<ScoredChunk>> {
        if job.scope.document_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = job.scope.retrieval_query();
        if query.is_empty() {
            query = format!(
                "{} test scenarios, requirements and expected behaviour",
                job.config.test_type
            );
        }
        let retriever = Retriever::new(
            self.deps.embedder.as_ref(),
            self.deps.index.as_ref(),
            self.options.retrieval,
        );
        let found = retriever
            .retrieve(&query, Some(job.scope.document_ids.as_slice()))
            .await?;
        debug!(job_id = %job.id, passages = found.len(), "context retrieved");
        Ok(found)
    }

    async fn store_results(&self, job: &mut GenerationJob, parsed: ParsedCases) -> Result<()> {
        for w in &parsed.warnings {
            warn!(job_id = %job.id, warning = %w, "dropped generated item");
        }

        let now = chrono::Utc::now().timestamp();
        let mut document_ids = job.scope.document_ids.clone();
        document_ids.sort();
        document_ids.dedup();
        let provenance = Provenance {
            document_ids,
            free_text: job.scope.free_text.clone(),
            job_id: Some(job.id.clone()),
        };
        let cases: Vec<_> = parsed
            .items
            .into_iter()
            .map(|draft| draft.into_test_case(Uuid::new_v4().to_string(), provenance.clone(), now))
            .collect();

        self.deps.store.insert_test_cases(&cases).await?;
        job.result_ids = cases.into_iter().map(|c| c.id).collect();
        job.warnings = parsed.warnings;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use testforge_core::index::memory::InMemoryIndex;
    use testforge_core::models::{
        Document, DocumentStatus, MindMap, MindMapStatus, TestCase, TestCaseFilter,
    };
    use testforge_core::store::memory::InMemoryStore;

    /// Fails terminal job writes until `terminal_failures` runs out.
    struct FlakyJobStore {
        inner: InMemoryStore,
        terminal_failures: AtomicUsize,
    }

    #[async_trait]
    impl Store for FlakyJobStore {
        async fn insert_document(&self, doc: &Document) -> Result<()> {
            self.inner.insert_document(doc).await
        }
        async fn get_document(&self, id: &str) -> Result<Option<Document>> {
            self.inner.get_document(id).await
        }
        async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
            self.inner.list_documents(status).await
        }
        async fn delete_document(&self, id: &str) -> Result<()> {
            self.inner.delete_document(id).await
        }
        async fn set_document_status(
            &self,
            id: &str,
            status: DocumentStatus,
            error: Option<&str>,
        ) -> Result<()> {
            self.inner.set_document_status(id, status, error).await
        }
        async fn insert_test_cases(&self, cases: &[TestCase]) -> Result<()> {
            self.inner.insert_test_cases(cases).await
        }
        async fn get_test_case(&self, id: &str) -> Result<Option<TestCase>> {
            self.inner.get_test_case(id).await
        }
        async fn list_test_cases(&self, filter: &TestCaseFilter) -> Result<Vec<TestCase>> {
            self.inner.list_test_cases(filter).await
        }
        async fn update_test_case(&self, tc: &TestCase) -> Result<()> {
            self.inner.update_test_case(tc).await
        }
        async fn save_job(&self, job: &GenerationJob) -> Result<()> {
            if job.status.is_terminal()
                && self
                    .terminal_failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(Error::Storage("database is locked".into()));
            }
            self.inner.save_job(job).await
        }
        async fn get_job(&self, id: &str) -> Result<Option<GenerationJob>> {
            self.inner.get_job(id).await
        }
        async fn save_mind_map(&self, map: &MindMap) -> Result<()> {
            self.inner.save_mind_map(map).await
        }
        async fn get_mind_map(&self, id: &str) -> Result<Option<MindMap>> {
            self.inner.get_mind_map(id).await
        }
        async fn list_mind_maps(&self, status: Option<MindMapStatus>) -> Result<Vec<MindMap>> {
            self.inner.list_mind_maps(status).await
        }
    }

    struct OneCase;

    #[async_trait]
    impl GenerativeBackend for OneCase {
        fn name(&self) -> &str {
            "one-case"
        }
        async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> Result<String> {
            Ok(r#"[{"title":"t","description":"d","steps":["a"],"expected_result":"ok"}]"#.into())
        }
    }

    struct NoEmbedder;

    #[async_trait]
    impl Embedder for NoEmbedder {
        fn model_name(&self) -> &str {
            "none"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("not used".into()))
        }
    }

    fn orchestrator(terminal_failures: usize) -> (GenerationOrchestrator, Arc<FlakyJobStore>) {
        let store = Arc::new(FlakyJobStore {
            inner: InMemoryStore::new(),
            terminal_failures: AtomicUsize::new(terminal_failures),
        });
        let deps = Collaborators {
            store: store.clone(),
            index: Arc::new(InMemoryIndex::new()),
            embedder: Arc::new(NoEmbedder),
            backend: Arc::new(OneCase),
        };
        let options = OrchestratorOptions {
            retrieval: RetrievalParams::default(),
            policy: RetryPolicy {
                max_attempts: 2,
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                attempt_timeout: Duration::from_secs(5),
                job_budget: Duration::from_secs(30),
            },
            completion: CompletionOptions::default(),
            workers: 1,
        };
        (GenerationOrchestrator::new(deps, options), store)
    }

    fn one() -> GenerationConfig {
        GenerationConfig {
            count: 1,
            ..GenerationConfig::default()
        }
    }

    fn free_text() -> JobScope {
        JobScope {
            free_text: Some("Users can export invoices as PDF.".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_final_state_write_is_retried() {
        let (orch, store) = orchestrator(2);
        let sub = orch.submit(free_text(), one()).await.unwrap();
        let job = orch.wait(&sub.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);

        // Registry entry is dropped only after the write lands, so poll for it.
        for _ in 0..100 {
            if orch.inner.live_snapshot(&sub.job_id).unwrap().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(orch.inner.live_snapshot(&sub.job_id).unwrap().is_none());
        let stored = store.get_job(&sub.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_unpersisted_final_state_is_still_reported() {
        let (orch, store) = orchestrator(usize::MAX);
        let sub = orch.submit(free_text(), one()).await.unwrap();
        let job = orch.wait(&sub.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);

        // Let the write retries run out.
        tokio::time::sleep(TERMINAL_WRITE_BACKOFF * 4).await;
        let stored = store.get_job(&sub.job_id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Running);
        assert_eq!(orch.status(&sub.job_id).await.unwrap().status, JobStatus::Succeeded);
        assert!(matches!(
            orch.cancel(&sub.job_id).await,
            Err(Error::Conflict(_))
        ));

        // The key is free again.
        let again = orch.submit(free_text(), one()).await.unwrap();
        assert!(!again.existing);
        assert_ne!(again.job_id, sub.job_id);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(1),
            job_budget: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_default_policy_matches_settings() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(120));
    }
}
