//! HTTP API.
//!
//! A thin JSON front over [`Services`]; every handler delegates to the same
//! operations the CLI uses.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/documents` | List documents (`status` filter) |
//! | `POST` | `/documents` | Register extracted text and process it in the background |
//! | `GET`  | `/documents/{id}` | Document and processing status |
//! | `DELETE` | `/documents/{id}` | Delete a document and its indexed chunks |
//! | `POST` | `/documents/{id}/reprocess` | Re-chunk and re-embed a document |
//! | `POST` | `/generations` | Submit a generation job |
//! | `GET`  | `/generations/{id}` | Job status |
//! | `POST` | `/generations/{id}/cancel` | Request cancellation |
//! | `GET`  | `/test-cases` | List test cases (`document_id`, `status`, `priority` filters) |
//! | `GET`  | `/test-cases/{id}` | Fetch one test case |
//! | `PATCH`| `/test-cases/{id}` | Edit a test case |
//! | `GET`  | `/mind-maps` | List mind maps (`status` filter) |
//! | `POST` | `/mind-maps` | Build a mind map |
//! | `GET`  | `/mind-maps/{id}` | Fetch a mind map |
//! | `PATCH`| `/mind-maps/{id}` | Edit title, layout, nodes or edges |
//! | `POST` | `/mind-maps/{id}/rebuild` | Rebuild from current test cases |
//! | `POST` | `/mind-maps/{id}/archive` | Archive a mind map |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "not found: job 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `unavailable` (503, retryable), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use testforge_core::mindmap::{
    archive_mind_map, build_mind_map, rebuild_mind_map, update_mind_map,
};
use testforge_core::models::{
    Document, DocumentStatus, GenerationConfig, GenerationJob, JobScope, LayoutHint, MindMap,
    MindMapPatch, MindMapStatus, TestCase, TestCaseFilter, TestCasePatch,
};
use testforge_core::store::edit_test_case;
use testforge_core::Error;

use crate::config::Config;
use crate::services::Services;

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::open(config).await?;
    let app = router(services);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "testforge server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// All routes, with permissive CORS.
pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/documents",
            get(handle_list_documents).post(handle_create_document),
        )
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/documents/{id}/reprocess", post(handle_reprocess))
        .route("/generations", post(handle_submit))
        .route("/generations/{id}", get(handle_job_status))
        .route("/generations/{id}/cancel", post(handle_cancel))
        .route("/test-cases", get(handle_list_cases))
        .route(
            "/test-cases/{id}",
            get(handle_get_case).patch(handle_edit_case),
        )
        .route("/mind-maps", get(handle_list_maps).post(handle_build_map))
        .route("/mind-maps/{id}", get(handle_get_map).patch(handle_edit_map))
        .route("/mind-maps/{id}/rebuild", post(handle_rebuild_map))
        .route("/mind-maps/{id}/archive", post(handle_archive_map))
        .layer(cors)
        .with_state(services)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::InvalidInput(_) | Error::InvalidConfig(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            e if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            warn!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

type ApiResult<T> = Result<T, AppError>;

fn not_found(what: &str, id: &str) -> AppError {
    Error::NotFound(format!("{} {}", what, id)).into()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Deserialize)]
struct CreateDocumentRequest {
    #[serde(default)]
    title: Option<String>,
    text: String,
}

#[derive(Deserialize)]
struct DocumentQuery {
    #[serde(default)]
    status: Option<DocumentStatus>,
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<Document>,
}

/// Processing runs in the background; poll `GET /documents/{id}` for the outcome.
fn spawn_processing(services: Services, document_id: String) {
    tokio::spawn(async move { process_in_background(&services, &document_id).await });
}

/// Failures after processing starts are also recorded on the document;
/// earlier ones (unknown id, status write) only reach the log.
async fn process_in_background(services: &Services, document_id: &str) -> Option<usize> {
    match services.process_document(document_id).await {
        Ok(chunks) => Some(chunks),
        Err(e) => {
            warn!(document_id, error = %e, code = e.code(), "background processing failed");
            None
        }
    }
}

async fn handle_list_documents(
    State(services): State<Services>,
    Query(query): Query<DocumentQuery>,
) -> ApiResult<Json<DocumentList>> {
    let documents = services.store.list_documents(query.status).await?;
    Ok(Json(DocumentList { documents }))
}

async fn handle_create_document(
    State(services): State<Services>,
    Json(req): Json<CreateDocumentRequest>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    let doc = services.create_document(req.title, req.text).await?;
    spawn_processing(services, doc.id.clone());
    Ok((StatusCode::ACCEPTED, Json(doc)))
}

async fn handle_get_document(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Json<Document>> {
    let doc = services
        .store
        .get_document(&id)
        .await?
        .ok_or_else(|| not_found("document", &id))?;
    Ok(Json(doc))
}

async fn handle_delete_document(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    services.delete_document(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_reprocess(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Document>)> {
    let doc = services
        .store
        .get_document(&id)
        .await?
        .ok_or_else(|| not_found("document", &id))?;
    spawn_processing(services, doc.id.clone());
    Ok((StatusCode::ACCEPTED, Json(doc)))
}

// ============ Generations ============

#[derive(Deserialize)]
struct SubmitRequest {
    #[serde(flatten)]
    scope: JobScope,
    #[serde(default)]
    config: GenerationConfig,
}

#[derive(Serialize)]
struct SubmitResponse {
    job_id: String,
    /// `true` when an identical in-flight job was returned instead of a new one.
    existing: bool,
}

async fn handle_submit(
    State(services): State<Services>,
    Json(req): Json<SubmitRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let submission = services.orchestrator.submit(req.scope, req.config).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: submission.job_id,
            existing: submission.existing,
        }),
    ))
}

async fn handle_job_status(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Json<GenerationJob>> {
    Ok(Json(services.orchestrator.status(&id).await?))
}

async fn handle_cancel(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Json<GenerationJob>> {
    Ok(Json(services.orchestrator.cancel(&id).await?))
}

// ============ Test cases ============

#[derive(Serialize)]
struct TestCaseList {
    test_cases: Vec<TestCase>,
}

async fn handle_list_cases(
    State(services): State<Services>,
    Query(filter): Query<TestCaseFilter>,
) -> ApiResult<Json<TestCaseList>> {
    let test_cases = services.store.list_test_cases(&filter).await?;
    Ok(Json(TestCaseList { test_cases }))
}

async fn handle_get_case(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Json<TestCase>> {
    let tc = services
        .store
        .get_test_case(&id)
        .await?
        .ok_or_else(|| not_found("test case", &id))?;
    Ok(Json(tc))
}

async fn handle_edit_case(
    State(services): State<Services>,
    Path(id): Path<String>,
    Json(patch): Json<TestCasePatch>,
) -> ApiResult<Json<TestCase>> {
    Ok(Json(
        edit_test_case(services.store.as_ref(), &id, patch).await?,
    ))
}

// ============ Mind maps ============

#[derive(Deserialize)]
struct BuildMapRequest {
    test_case_ids: Vec<String>,
    #[serde(default)]
    layout: Option<LayoutHint>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Deserialize)]
struct MindMapQuery {
    #[serde(default)]
    status: Option<MindMapStatus>,
}

#[derive(Serialize)]
struct MindMapList {
    mind_maps: Vec<MindMap>,
}

async fn handle_list_maps(
    State(services): State<Services>,
    Query(query): Query<MindMapQuery>,
) -> ApiResult<Json<MindMapList>> {
    let mind_maps = services.store.list_mind_maps(query.status).await?;
    Ok(Json(MindMapList { mind_maps }))
}

async fn handle_build_map(
    State(services): State<Services>,
    Json(req): Json<BuildMapRequest>,
) -> ApiResult<(StatusCode, Json<MindMap>)> {
    let map = build_mind_map(
        services.store.as_ref(),
        &req.test_case_ids,
        req.layout.unwrap_or(LayoutHint::Hierarchical),
        req.title.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(map)))
}

async fn handle_get_map(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Json<MindMap>> {
    let map = services
        .store
        .get_mind_map(&id)
        .await?
        .ok_or_else(|| not_found("mind map", &id))?;
    Ok(Json(map))
}

async fn handle_edit_map(
    State(services): State<Services>,
    Path(id): Path<String>,
    Json(patch): Json<MindMapPatch>,
) -> ApiResult<Json<MindMap>> {
    Ok(Json(
        update_mind_map(services.store.as_ref(), &id, patch).await?,
    ))
}

async fn handle_rebuild_map(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Json<MindMap>> {
    Ok(Json(rebuild_mind_map(services.store.as_ref(), &id).await?))
}

async fn handle_archive_map(
    State(services): State<Services>,
    Path(id): Path<String>,
) -> ApiResult<Json<MindMap>> {
    Ok(Json(archive_mind_map(services.store.as_ref(), &id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use testforge_core::index::memory::InMemoryIndex;
    use testforge_core::retrieve::RetrievalParams;
    use testforge_core::store::memory::InMemoryStore;

    use crate::config::{EmbeddingConfig, GenerationSettings};
    use crate::embedding::create_embedder;
    use crate::ingest::IngestParams;
    use crate::llm::create_backend;
    use crate::orchestrator::{Collaborators, OrchestratorOptions};

    fn memory_services() -> Services {
        let settings = GenerationSettings::default();
        let deps = Collaborators {
            store: Arc::new(InMemoryStore::new()),
            index: Arc::new(InMemoryIndex::new()),
            embedder: create_embedder(&EmbeddingConfig::default()).unwrap(),
            backend: create_backend(&settings).unwrap(),
        };
        let options = OrchestratorOptions::from_settings(&settings, RetrievalParams::default());
        Services::from_parts(deps, options, IngestParams::default())
    }

    #[tokio::test]
    async fn test_background_processing_failures_are_reported() {
        let services = memory_services();
        assert_eq!(process_in_background(&services, "ghost").await, None);

        // The disabled embedder fails after processing has started.
        let doc = services
            .create_document(None, "postcode is mandatory".into())
            .await
            .unwrap();
        assert_eq!(process_in_background(&services, &doc.id).await, None);
        let stored = services.store.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST, "bad_request"),
            (Error::InvalidConfig("x".into()), StatusCode::BAD_REQUEST, "bad_request"),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND, "not_found"),
            (Error::Conflict("x".into()), StatusCode::CONFLICT, "conflict"),
            (Error::Transient("x".into()), StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            (Error::Permanent("x".into()), StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            (Error::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        ];
        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status, status);
            assert_eq!(app.code, code);
        }
    }

    #[test]
    fn test_submit_request_defaults_config() {
        let req: SubmitRequest =
            serde_json::from_str(r#"{"document_ids":["d1"],"scenario":"login"}"#).unwrap();
        assert_eq!(req.scope.document_ids, vec!["d1".to_string()]);
        assert_eq!(req.scope.scenario.as_deref(), Some("login"));
        assert_eq!(req.config, GenerationConfig::default());
    }
}
