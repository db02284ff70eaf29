//! SQLite-backed [`Store`] and [`VectorIndex`] implementations.
//!
//! Both wrap the same [`SqlitePool`]. Entity records with nested fields
//! (test cases, jobs, mind maps) are stored as JSON next to the columns
//! used for filtering. Vector search is brute-force cosine similarity over
//! `chunk_vectors`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use testforge_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use testforge_core::index::{rank_and_truncate, VectorIndex};
use testforge_core::models::{
    Chunk, Document, DocumentStatus, GenerationJob, IndexedChunk, MindMap, MindMapStatus,
    ScoredChunk, TestCase, TestCaseFilter,
};
use testforge_core::store::Store;
use testforge_core::{Error, Result};

fn storage(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

fn unavailable(e: sqlx::Error) -> Error {
    Error::IndexUnavailable(e.to_string())
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Storage(format!("encode record: {}", e)))
}

fn from_json<T: DeserializeOwned>(row: &SqliteRow) -> Result<T> {
    let raw: String = row.try_get("record_json").map_err(storage)?;
    serde_json::from_str(&raw).map_err(|e| Error::Storage(format!("decode record: {}", e)))
}

/// SQLite implementation of the entity [`Store`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.try_get("status").map_err(storage)?;
    Ok(Document {
        id: row.try_get("id").map_err(storage)?,
        title: row.try_get("title").map_err(storage)?,
        text: row.try_get("text").map_err(storage)?,
        status: status.parse()?,
        error: row.try_get("error").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let existing: Option<String> = sqlx::query_scalar("SELECT status FROM documents WHERE id = ?")
            .bind(&doc.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?;
        if existing.as_deref() == Some(DocumentStatus::Completed.as_str()) {
            return Err(Error::Conflict(format!(
                "document {} is already processed",
                doc.id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, text, status, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                text = excluded.text,
                status = excluded.status,
                error = excluded.error,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.text)
        .bind(doc.status.as_str())
        .bind(&doc.error)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, title, text, status, error, created_at, updated_at FROM documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn list_documents(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, title, text, status, error, created_at, updated_at FROM documents",
        );
        if let Some(status) = status {
            qb.push(" WHERE status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at DESC, id");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(storage)?;
        rows.iter().map(document_from_row).collect()
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE documents SET status = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    async fn insert_test_cases(&self, cases: &[TestCase]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage)?;
        for tc in cases {
            sqlx::query(
                r#"
                INSERT INTO test_cases (id, job_id, priority, status, record_json, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&tc.id)
            .bind(&tc.provenance.job_id)
            .bind(tc.priority.as_str())
            .bind(tc.status.as_str())
            .bind(to_json(tc)?)
            .bind(tc.created_at)
            .bind(tc.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    Error::Conflict(format!("test case {} already exists", tc.id))
                }
                other => storage(other),
            })?;
        }
        tx.commit().await.map_err(storage)?;
        Ok(())
    }

    async fn get_test_case(&self, id: &str) -> Result<Option<TestCase>> {
        let row = sqlx::query("SELECT record_json FROM test_cases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(from_json).transpose()
    }

    async fn list_test_cases(&self, filter: &TestCaseFilter) -> Result<Vec<TestCase>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT record_json FROM test_cases WHERE 1 = 1");
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(priority) = filter.priority {
            qb.push(" AND priority = ").push_bind(priority.as_str());
        }
        qb.push(" ORDER BY created_at, rowid");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(storage)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let tc: TestCase = from_json(row)?;
            // Document scope lives inside the JSON provenance.
            if filter.matches(&tc) {
                out.push(tc);
            }
        }
        Ok(out)
    }

    async fn update_test_case(&self, tc: &TestCase) -> Result<()> {
        let result = sqlx::query(
            "UPDATE test_cases SET priority = ?, status = ?, record_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(tc.priority.as_str())
        .bind(tc.status.as_str())
        .bind(to_json(tc)?)
        .bind(tc.updated_at)
        .bind(&tc.id)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("test case {}", tc.id)));
        }
        Ok(())
    }

    async fn save_job(&self, job: &GenerationJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO generation_jobs (id, job_key, status, record_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                record_json = excluded.record_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&job.id)
        .bind(&job.key)
        .bind(job.status.as_str())
        .bind(to_json(job)?)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<GenerationJob>> {
        let row = sqlx::query("SELECT record_json FROM generation_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(from_json).transpose()
    }

    async fn save_mind_map(&self, map: &MindMap) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mind_maps (id, status, version, record_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                version = excluded.version,
                record_json = excluded.record_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&map.id)
        .bind(map.status.as_str())
        .bind(map.version as i64)
        .bind(to_json(map)?)
        .bind(map.created_at)
        .bind(map.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn get_mind_map(&self, id: &str) -> Result<Option<MindMap>> {
        let row = sqlx::query("SELECT record_json FROM mind_maps WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        row.as_ref().map(from_json).transpose()
    }

    async fn list_mind_maps(&self, status: Option<MindMapStatus>) -> Result<Vec<MindMap>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT record_json FROM mind_maps");
        if let Some(status) = status {
            qb.push(" WHERE status = ").push_bind(status.as_str());
        }
        qb.push(" ORDER BY created_at DESC, id");

        let rows = qb.build().fetch_all(&self.pool).await.map_err(storage)?;
        rows.iter().map(from_json).collect()
    }
}

/// SQLite implementation of [`VectorIndex`] over `chunks` + `chunk_vectors`.
#[derive(Clone)]
pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn upsert(&self, document_id: &str, chunks: &[IndexedChunk]) -> Result<()> {
        if let Some(stray) = chunks.iter().find(|c| c.chunk.document_id != document_id) {
            return Err(Error::InvalidInput(format!(
                "chunk {} belongs to {}, not {}",
                stray.chunk.id, stray.chunk.document_id, document_id
            )));
        }

        // One transaction: readers see the old set or the new one.
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        for ic in chunks {
            let chunk = &ic.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, start_char, char_len, text, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(chunk.start_char as i64)
            .bind(chunk.char_len as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, document_id, dims, embedding) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(document_id)
            .bind(ic.vector.len() as i64)
            .bind(vec_to_blob(&ic.vector))
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&[String]>,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 || filter.is_some_and(|ids| ids.is_empty()) {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.start_char, c.char_len, c.text, c.hash,
                   v.embedding
            FROM chunks c
            JOIN chunk_vectors v ON v.chunk_id = c.id
            "#,
        );
        if let Some(ids) = filter {
            qb.push(" WHERE c.document_id IN (");
            let mut sep = qb.separated(", ");
            for id in ids {
                sep.push_bind(id.as_str());
            }
            sep.push_unseparated(")");
        }

        let rows = qb.build().fetch_all(&self.pool).await.map_err(unavailable)?;
        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding").map_err(unavailable)?;
            let start_char: i64 = row.try_get("start_char").map_err(unavailable)?;
            let char_len: i64 = row.try_get("char_len").map_err(unavailable)?;
            candidates.push(ScoredChunk {
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
                chunk: Chunk {
                    id: row.try_get("id").map_err(unavailable)?,
                    document_id: row.try_get("document_id").map_err(unavailable)?,
                    chunk_index: row.try_get("chunk_index").map_err(unavailable)?,
                    start_char: start_char as usize,
                    char_len: char_len as usize,
                    text: row.try_get("text").map_err(unavailable)?,
                    hash: row.try_get("hash").map_err(unavailable)?,
                },
            });
        }

        Ok(rank_and_truncate(candidates, k))
    }

    async fn chunk_count(&self, document_id: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(n as usize)
    }
}
