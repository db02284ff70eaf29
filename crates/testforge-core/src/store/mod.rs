//! Entity storage abstraction.
//!
//! The [`Store`] trait persists documents, test cases, generation jobs and
//! mind maps. Vectors live behind [`VectorIndex`](crate::index::VectorIndex),
//! not here.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert_document`](Store::insert_document) | Register extracted document text |
//! | [`list_documents`](Store::list_documents) | Newest first, optionally by status |
//! | [`delete_document`](Store::delete_document) | Remove a document record |
//! | [`extracted_text`](Store::extracted_text) | Fetch a document's text, or `NotFound` |
//! | [`set_document_status`](Store::set_document_status) | Record processing progress |
//! | [`insert_test_cases`](Store::insert_test_cases) | Persist parser output |
//! | [`list_test_cases`](Store::list_test_cases) | Filtered listing in insertion order |
//! | [`save_job`](Store::save_job) | Upsert a job record |
//! | [`save_mind_map`](Store::save_mind_map) | Upsert a mind map |
//! | [`list_mind_maps`](Store::list_mind_maps) | Newest first, optionally by status |

pub mod memory;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{
    Document, DocumentStatus, GenerationJob, MindMap, MindMapStatus, TestCase, TestCaseFilter,
    TestCasePatch,
};

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a document.
    ///
    /// Re-inserting an id whose document already reached
    /// [`DocumentStatus::Completed`] fails with [`Error::Conflict`]; any
    /// other existing record is replaced.
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Documents by descending creation time.
    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>>;

    /// Remove a document record, or [`Error::NotFound`]. Test cases that
    /// cite it keep their provenance.
    async fn delete_document(&self, id: &str) -> Result<()>;

    /// Text of a document, or [`Error::NotFound`].
    async fn extracted_text(&self, id: &str) -> Result<String> {
        self.get_document(id)
            .await?
            .map(|d| d.text)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))
    }

    async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()>;

    async fn insert_test_cases(&self, cases: &[TestCase]) -> Result<()>;

    async fn get_test_case(&self, id: &str) -> Result<Option<TestCase>>;

    async fn list_test_cases(&self, filter: &TestCaseFilter) -> Result<Vec<TestCase>>;

    /// Overwrite an existing test case, or [`Error::NotFound`].
    async fn update_test_case(&self, tc: &TestCase) -> Result<()>;

    async fn save_job(&self, job: &GenerationJob) -> Result<()>;

    async fn get_job(&self, id: &str) -> Result<Option<GenerationJob>>;

    async fn save_mind_map(&self, map: &MindMap) -> Result<()>;

    async fn get_mind_map(&self, id: &str) -> Result<Option<MindMap>>;

    /// Mind maps by descending creation time.
    async fn list_mind_maps(&self, status: Option<MindMapStatus>) -> Result<Vec<MindMap>>;
}

/// Apply a user edit to a stored test case and persist it.
pub async fn edit_test_case<S: Store + ?Sized>(
    store: &S,
    id: &str,
    patch: TestCasePatch,
) -> Result<TestCase> {
    let mut tc = store
        .get_test_case(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("test case {}", id)))?;
    tc.apply(patch)?;
    store.update_test_case(&tc).await?;
    Ok(tc)
}

/// Fetch test cases by id, preserving the requested order.
pub async fn load_test_cases<S: Store + ?Sized>(store: &S, ids: &[String]) -> Result<Vec<TestCase>> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let tc = store
            .get_test_case(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("test case {}", id)))?;
        out.push(tc);
    }
    Ok(out)
}
