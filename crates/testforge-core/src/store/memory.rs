//! In-memory [`Store`] implementation for tests and embedded use.
//!
//! Uses `HashMap` and `Vec` behind a single `std::sync::RwLock`.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{
    Document, DocumentStatus, GenerationJob, MindMap, MindMapStatus, TestCase, TestCaseFilter,
};

use super::Store;

#[derive(Default)]
struct Tables {
    documents: HashMap<String, Document>,
    /// Insertion order is the listing order.
    test_cases: Vec<TestCase>,
    jobs: HashMap<String, GenerationJob>,
    mind_maps: HashMap<String, MindMap>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| Error::Storage("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| Error::Storage("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut t = self.write()?;
        if let Some(existing) = t.documents.get(&doc.id) {
            if existing.status == DocumentStatus::Completed {
                return Err(Error::Conflict(format!(
                    "document {} is already processed",
                    doc.id
                )));
            }
        }
        t.documents.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self
            .read()?
            .documents
            .values()
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        self.write()?
            .documents
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))
    }

    async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut t = self.write()?;
        let doc = t
            .documents
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        doc.status = status;
        doc.error = error.map(str::to_string);
        doc.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }

    async fn insert_test_cases(&self, cases: &[TestCase]) -> Result<()> {
        let mut t = self.write()?;
        if let Some(dup) = cases
            .iter()
            .find(|c| t.test_cases.iter().any(|e| e.id == c.id))
        {
            return Err(Error::Conflict(format!("test case {} already exists", dup.id)));
        }
        t.test_cases.extend_from_slice(cases);
        Ok(())
    }

    async fn get_test_case(&self, id: &str) -> Result<Option<TestCase>> {
        Ok(self.read()?.test_cases.iter().find(|c| c.id == id).cloned())
    }

    async fn list_test_cases(&self, filter: &TestCaseFilter) -> Result<Vec<TestCase>> {
        Ok(self
            .read()?
            .test_cases
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect())
    }

    async fn update_test_case(&self, tc: &TestCase) -> Result<()> {
        let mut t = self.write()?;
        let slot = t
            .test_cases
            .iter_mut()
            .find(|c| c.id == tc.id)
            .ok_or_else(|| Error::NotFound(format!("test case {}", tc.id)))?;
        *slot = tc.clone();
        Ok(())
    }

    async fn save_job(&self, job: &GenerationJob) -> Result<()> {
        self.write()?.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<GenerationJob>> {
        Ok(self.read()?.jobs.get(id).cloned())
    }

    async fn save_mind_map(&self, map: &MindMap) -> Result<()> {
        self.write()?.mind_maps.insert(map.id.clone(), map.clone());
        Ok(())
    }

    async fn get_mind_map(&self, id: &str) -> Result<Option<MindMap>> {
        Ok(self.read()?.mind_maps.get(id).cloned())
    }

    async fn list_mind_maps(&self, status: Option<MindMapStatus>) -> Result<Vec<MindMap>> {
        let mut maps: Vec<MindMap> = self
            .read()?
            .mind_maps
            .values()
            .filter(|m| status.map_or(true, |s| m.status == s))
            .cloned()
            .collect();
        maps.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(maps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, Provenance, TestCasePatch, TestCaseStatus};
    use crate::store::edit_test_case;

    fn case(id: &str, doc: &str) -> TestCase {
        TestCase {
            id: id.into(),
            title: format!("case {}", id),
            description: String::new(),
            preconditions: None,
            steps: vec!["step".into()],
            expected_result: "ok".into(),
            priority: Priority::Medium,
            status: TestCaseStatus::Draft,
            category: None,
            tags: Vec::new(),
            provenance: Provenance {
                document_ids: vec![doc.into()],
                free_text: None,
                job_id: None,
            },
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn test_completed_document_text_is_immutable() {
        let store = InMemoryStore::new();
        let doc = Document::new("d1", None, "first");
        store.insert_document(&doc).await.unwrap();
        store
            .set_document_status("d1", DocumentStatus::Completed, None)
            .await
            .unwrap();
        let err = store
            .insert_document(&Document::new("d1", None, "second"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(store.extracted_text("d1").await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_document_listing_and_delete() {
        let store = InMemoryStore::new();
        let mut old = Document::new("old", None, "a");
        old.created_at -= 10;
        store.insert_document(&old).await.unwrap();
        store.insert_document(&Document::new("new", None, "b")).await.unwrap();
        store
            .set_document_status("old", DocumentStatus::Completed, None)
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list_documents(None)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
        let done = store
            .list_documents(Some(DocumentStatus::Completed))
            .await
            .unwrap();
        assert_eq!(done.len(), 1);

        store.delete_document("old").await.unwrap();
        assert!(store.get_document("old").await.unwrap().is_none());
        assert!(matches!(
            store.delete_document("old").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_document_text_is_not_found() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.extracted_text("nope").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_and_keeps_order() {
        let store = InMemoryStore::new();
        store
            .insert_test_cases(&[case("a", "d1"), case("b", "d2"), case("c", "d1")])
            .await
            .unwrap();
        let filter = TestCaseFilter {
            document_id: Some("d1".into()),
            ..Default::default()
        };
        let ids: Vec<_> = store
            .list_test_cases(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_edit_persists_patch() {
        let store = InMemoryStore::new();
        store.insert_test_cases(&[case("a", "d1")]).await.unwrap();
        let edited = edit_test_case(
            &store,
            "a",
            TestCasePatch {
                priority: Some(Priority::Critical),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(edited.priority, Priority::Critical);
        let stored = store.get_test_case("a").await.unwrap().unwrap();
        assert_eq!(stored.priority, Priority::Critical);

        assert!(matches!(
            edit_test_case(&store, "zzz", TestCasePatch::default()).await,
            Err(Error::NotFound(_))
        ));
    }
}
