//! Core data models used throughout testforge.
//!
//! These types represent the documents, chunks, generation jobs, test cases,
//! and mind maps that flow through the generation pipeline. All timestamps
//! are Unix seconds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Declares a closed string enumeration with `as_str`, `Display` and `FromStr`.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

// ═══════════════════════════════════════════════════════════════════════
// Documents and chunks
// ═══════════════════════════════════════════════════════════════════════

string_enum!(
    /// Processing state of an uploaded document.
    DocumentStatus {
        Uploaded => "uploaded",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
    }
);

/// A document whose text has already been extracted.
///
/// The text is immutable once the document reaches
/// [`DocumentStatus::Completed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: Option<String>,
    pub text: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    pub fn new(id: impl Into<String>, title: Option<String>, text: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: id.into(),
            title,
            text: text.into(),
            status: DocumentStatus::Uploaded,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A contiguous span of a document's text; the unit of retrieval.
///
/// `chunk_index` values are contiguous per document starting at 0.
/// `start_char` and `char_len` are measured in Unicode scalar values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub start_char: usize,
    pub char_len: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

/// A chunk paired with its embedding vector, as handed to the index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity in `[-1.0, 1.0]`.
    pub score: f32,
}

// ═══════════════════════════════════════════════════════════════════════
// Test cases
// ═══════════════════════════════════════════════════════════════════════

string_enum!(
    Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Critical => "critical",
    }
);

string_enum!(
    /// Review state of a test case. Transitions are user-driven.
    TestCaseStatus {
        Draft => "draft",
        Approved => "approved",
        Deprecated => "deprecated",
    }
);

/// Where a test case came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub document_ids: Vec<String>,
    pub free_text: Option<String>,
    pub job_id: Option<String>,
}

impl Provenance {
    /// A test case must trace back to a document or an explicit free-text origin.
    pub fn has_origin(&self) -> bool {
        !self.document_ids.is_empty()
            || self
                .free_text
                .as_deref()
                .is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub title: String,
    pub description: String,
    pub preconditions: Option<String>,
    pub steps: Vec<String>,
    pub expected_result: String,
    pub priority: Priority,
    pub status: TestCaseStatus,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub provenance: Provenance,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A user edit to a stored test case. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestCasePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub preconditions: Option<String>,
    pub steps: Option<Vec<String>>,
    pub expected_result: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<TestCaseStatus>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl TestCase {
    /// Apply a user edit. Step lists may never become empty.
    pub fn apply(&mut self, patch: TestCasePatch) -> Result<()> {
        if let Some(steps) = &patch.steps {
            if steps.iter().all(|s| s.trim().is_empty()) {
                return Err(Error::InvalidInput(
                    "a test case needs at least one step".to_string(),
                ));
            }
        }
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(Error::InvalidInput("title must not be empty".to_string()));
            }
        }

        if let Some(v) = patch.title {
            self.title = v;
        }
        if let Some(v) = patch.description {
            self.description = v;
        }
        if let Some(v) = patch.preconditions {
            self.preconditions = Some(v);
        }
        if let Some(v) = patch.steps {
            self.steps = v.into_iter().filter(|s| !s.trim().is_empty()).collect();
        }
        if let Some(v) = patch.expected_result {
            self.expected_result = v;
        }
        if let Some(v) = patch.priority {
            self.priority = v;
        }
        if let Some(v) = patch.status {
            self.status = v;
        }
        if let Some(v) = patch.category {
            self.category = Some(v);
        }
        if let Some(v) = patch.tags {
            self.tags = v;
        }
        self.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }
}

/// Filter for listing stored test cases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TestCaseFilter {
    pub document_id: Option<String>,
    pub status: Option<TestCaseStatus>,
    pub priority: Option<Priority>,
}

impl TestCaseFilter {
    pub fn matches(&self, tc: &TestCase) -> bool {
        self.document_id
            .as_ref()
            .map_or(true, |d| tc.provenance.document_ids.contains(d))
            && self.status.map_or(true, |s| tc.status == s)
            && self.priority.map_or(true, |p| tc.priority == p)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Generation jobs
// ═══════════════════════════════════════════════════════════════════════

string_enum!(
    TestType {
        Functional => "functional",
        Performance => "performance",
        Security => "security",
    }
);

string_enum!(
    Complexity {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

/// Smallest and largest number of test cases one job may request.
pub const MIN_CASE_COUNT: u32 = 1;
pub const MAX_CASE_COUNT: u32 = 50;

/// User-chosen generation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub test_type: TestType,
    pub count: u32,
    pub complexity: Complexity,
    pub default_priority: Priority,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            test_type: TestType::Functional,
            count: 10,
            complexity: Complexity::Medium,
            default_priority: Priority::Medium,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(MIN_CASE_COUNT..=MAX_CASE_COUNT).contains(&self.count) {
            return Err(Error::InvalidConfig(format!(
                "count must be between {} and {}, got {}",
                MIN_CASE_COUNT, MAX_CASE_COUNT, self.count
            )));
        }
        Ok(())
    }
}

/// What a job generates test cases about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobScope {
    #[serde(default)]
    pub document_ids: Vec<String>,
    /// Free-text requirement supplied instead of (or alongside) documents.
    #[serde(default)]
    pub free_text: Option<String>,
    #[serde(default)]
    pub scenario: Option<String>,
}

impl JobScope {
    /// Trim document ids and drop repeats, keeping first-seen order.
    pub fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        let ids = std::mem::take(&mut self.document_ids);
        self.document_ids = ids
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| seen.insert(d.clone()))
            .collect();
    }

    pub fn validate(&self) -> Result<()> {
        let has_text = self
            .free_text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if self.document_ids.is_empty() && !has_text {
            return Err(Error::InvalidInput(
                "a generation needs at least one document id or a free-text requirement"
                    .to_string(),
            ));
        }
        if self.document_ids.iter().any(|d| d.trim().is_empty()) {
            return Err(Error::InvalidInput("document ids must not be blank".to_string()));
        }
        Ok(())
    }

    /// Canonical key identifying "the same request" for deduplication.
    ///
    /// Document order and duplicates do not matter; surrounding whitespace
    /// in the scenario and free text is ignored.
    pub fn key(&self) -> String {
        let mut docs: Vec<&str> = self.document_ids.iter().map(|d| d.trim()).collect();
        docs.sort_unstable();
        docs.dedup();

        let mut hasher = Sha256::new();
        hasher.update(docs.join("\u{1f}").as_bytes());
        hasher.update([0x1e]);
        hasher.update(self.free_text.as_deref().unwrap_or("").trim().as_bytes());
        hasher.update([0x1e]);
        hasher.update(self.scenario.as_deref().unwrap_or("").trim().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Text used to query the retriever.
    pub fn retrieval_query(&self) -> String {
        [self.scenario.as_deref(), self.free_text.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

string_enum!(
    JobStatus {
        Queued => "queued",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Cancelled => "cancelled",
    }
);

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Legal edges of the job state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

/// The last concrete error a job saw, kept for callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for JobError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: String,
    pub key: String,
    pub scope: JobScope,
    pub config: GenerationConfig,
    pub status: JobStatus,
    pub attempts: u32,
    pub last_error: Option<JobError>,
    /// Items dropped by the parser on the successful attempt.
    pub warnings: Vec<String>,
    /// Ids of the produced test cases. Empty unless `Succeeded`.
    pub result_ids: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl GenerationJob {
    pub fn new(id: impl Into<String>, scope: JobScope, config: GenerationConfig) -> Self {
        let now = chrono::Utc::now().timestamp();
        let key = scope.key();
        Self {
            id: id.into(),
            key,
            scope,
            config,
            status: JobStatus::Queued,
            attempts: 0,
            last_error: None,
            warnings: Vec::new(),
            result_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing illegal edges and anything out of a terminal state.
    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        if next != JobStatus::Succeeded {
            self.result_ids.clear();
        }
        self.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Mind maps
// ═══════════════════════════════════════════════════════════════════════

string_enum!(
    NodeKind {
        Root => "root",
        TestCase => "test_case",
        Step => "step",
        ExpectedResult => "expected_result",
    }
);

string_enum!(
    /// Presentation hint only; never affects the graph structure.
    LayoutHint {
        Hierarchical => "hierarchical",
        Radial => "radial",
        Force => "force",
    }
);

string_enum!(
    MindMapStatus {
        Active => "active",
        Archived => "archived",
    }
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMapNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMapEdge {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MindMap {
    pub id: String,
    pub title: String,
    pub nodes: Vec<MindMapNode>,
    pub edges: Vec<MindMapEdge>,
    pub test_case_ids: Vec<String>,
    pub layout: LayoutHint,
    pub version: u32,
    pub status: MindMapStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A manual edit to a mind map. `None` leaves the field untouched; `nodes`
/// and `edges` replace the whole list when given.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MindMapPatch {
    pub title: Option<String>,
    pub nodes: Option<Vec<MindMapNode>>,
    pub edges: Option<Vec<MindMapEdge>>,
    pub layout: Option<LayoutHint>,
}

impl MindMapPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.nodes.is_none() && self.edges.is_none() && self.layout.is_none()
    }
}
