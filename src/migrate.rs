//! Idempotent schema creation.
//!
//! Test cases, jobs and mind maps keep their nested fields as JSON text;
//! the columns that listing filters on are stored alongside.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        title TEXT,
        text TEXT NOT NULL,
        status TEXT NOT NULL,
        error TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        start_char INTEGER NOT NULL,
        char_len INTEGER NOT NULL,
        text TEXT NOT NULL,
        hash TEXT NOT NULL,
        UNIQUE (document_id, chunk_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_vectors (
        chunk_id TEXT PRIMARY KEY REFERENCES chunks(id) ON DELETE CASCADE,
        document_id TEXT NOT NULL,
        dims INTEGER NOT NULL,
        embedding BLOB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS test_cases (
        id TEXT PRIMARY KEY,
        job_id TEXT,
        priority TEXT NOT NULL,
        status TEXT NOT NULL,
        record_json TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS generation_jobs (
        id TEXT PRIMARY KEY,
        job_key TEXT NOT NULL,
        status TEXT NOT NULL,
        record_json TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mind_maps (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        version INTEGER NOT NULL,
        record_json TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document ON chunk_vectors(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_test_cases_job ON test_cases(job_id)",
    "CREATE INDEX IF NOT EXISTS idx_generation_jobs_key ON generation_jobs(job_key)",
    "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)",
    "CREATE INDEX IF NOT EXISTS idx_mind_maps_status ON mind_maps(status)",
];

/// `tforge init`: open (creating if needed) and migrate the configured database.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index that is missing, in one transaction.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;
    for &statement in SCHEMA {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Migration failed: {}", statement.trim()))?;
    }
    tx.commit().await?;
    Ok(())
}
