mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use sheetqc_core::{
    build_feedback_request, calculate_score, classify_batch, fingerprint_rows, needs_feedback,
    score_summary, BatchReport, Category, CatalogSource, IngestPolicy, IssueDetail, Marking,
    QcError, ScoreResult,
};
use sheetqc_llm::{generate_feedback, FeedbackClient, FeedbackSummary, LlmProvider, RequestGate};
use sheetqc_store::{CatalogStore, FingerprintScope, FingerprintStore};

use config::ServiceConfig;

struct AppState {
    fingerprints: FingerprintStore,
    catalog: CatalogStore,
    feedback: FeedbackClient,
    gate: RequestGate,
    config: ServiceConfig,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let config = ServiceConfig::from_env()?;
    let fingerprints = FingerprintStore::open(&config.db_path)?;
    let catalog = CatalogStore::open(&config.db_path)?;
    let feedback = FeedbackClient::new(config.provider, config.model.as_str(), config.limits.clone())
        .unwrap_or_else(|err| {
            warn!("falling back to local text generation: {err}");
            FeedbackClient::new(LlmProvider::Local, "local", config.limits.clone())
                .expect("local provider needs no configuration")
        });
    let gate = RequestGate::new(&config.limits);
    let state = Arc::new(AppState {
        fingerprints,
        catalog,
        feedback,
        gate,
        config: config.clone(),
    });

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/catalog/:project_type_id", get(handle_catalog))
        .route("/batches/check", post(handle_batch_check))
        .route("/batches/ingest", post(handle_batch_ingest))
        .route("/evaluations", post(handle_evaluation))
        .with_state(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Error)]
enum ServiceError {
    #[error(transparent)]
    Qc(#[from] QcError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ServiceError::Qc(QcError::InvalidMarkings(violations)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": "invalid markings", "violations": violations }),
            ),
            ServiceError::Qc(QcError::UnknownProjectType(id)) => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("no categories defined for project type {id}") }),
            ),
            ServiceError::Qc(QcError::CatalogUnavailable(reason)) => (
                StatusCode::BAD_GATEWAY,
                json!({ "error": format!("catalog unavailable: {reason}") }),
            ),
            ServiceError::Qc(err) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": err.to_string() }),
            ),
            ServiceError::Other(err) => {
                error!("internal error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn handle_catalog(
    State(state): State<Arc<AppState>>,
    AxumPath(project_type_id): AxumPath<i64>,
) -> Result<Json<Vec<Category>>, ServiceError> {
    let categories = state.catalog.categories_for(project_type_id)?;
    Ok(Json(categories))
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    rows: Vec<Value>,
    #[serde(default)]
    important_columns: Vec<String>,
    #[serde(default)]
    project_id: Option<i64>,
    #[serde(default)]
    task_id: Option<i64>,
    /// Position of the first data row in the source sheet; row 1 is
    /// normally the header.
    #[serde(default = "default_first_row")]
    first_row: usize,
}

fn default_first_row() -> usize {
    2
}

impl BatchRequest {
    fn scope(&self) -> FingerprintScope {
        match (self.project_id, self.task_id) {
            (Some(project_id), Some(task_id)) => FingerprintScope::Task {
                project_id,
                task_id,
            },
            _ => FingerprintScope::Global,
        }
    }
}

#[derive(Debug, Serialize)]
struct BatchCheckResponse {
    total_rows: usize,
    duplicate_count: usize,
    #[serde(flatten)]
    report: BatchReport,
}

async fn handle_batch_check(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchCheckResponse>, ServiceError> {
    let report = classify_rows(&state, &request)?;
    Ok(Json(BatchCheckResponse {
        total_rows: request.rows.len(),
        duplicate_count: report.duplicate_count(),
        report,
    }))
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    rows: Vec<Value>,
    #[serde(default)]
    important_columns: Vec<String>,
    project_id: i64,
    task_id: i64,
    #[serde(default = "default_first_row")]
    first_row: usize,
    #[serde(default)]
    mode: IngestPolicy,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    accepted: bool,
    inserted: usize,
    duplicates_skipped: usize,
    #[serde(flatten)]
    report: BatchReport,
}

async fn handle_batch_ingest(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IngestRequest>,
) -> Result<Response, ServiceError> {
    let scope = FingerprintScope::Task {
        project_id: request.project_id,
        task_id: request.task_id,
    };
    let persisted = state.fingerprints.load(scope).map_err(ServiceError::Other)?;
    let batch = fingerprint_rows(&request.rows, &request.important_columns, request.first_row);
    let report = classify_batch(batch, &persisted);

    if request.mode == IngestPolicy::Strict && report.has_duplicates() {
        // strict ingestion refuses the whole batch; the report says why
        let body = IngestResponse {
            accepted: false,
            inserted: 0,
            duplicates_skipped: report.duplicate_count(),
            report,
        };
        return Ok((StatusCode::CONFLICT, Json(body)).into_response());
    }

    let unique: Vec<(usize, String)> = report
        .unique_rows()
        .map(|row| (row.row, row.fingerprint.clone()))
        .collect();
    let inserted = state
        .fingerprints
        .insert_batch(request.project_id, request.task_id, &unique)
        .map_err(ServiceError::Other)?;
    info!(
        inserted,
        skipped = report.duplicate_count(),
        "batch ingested"
    );

    let body = IngestResponse {
        accepted: true,
        inserted,
        duplicates_skipped: report.duplicate_count(),
        report,
    };
    Ok((StatusCode::OK, Json(body)).into_response())
}

fn classify_rows(state: &AppState, request: &BatchRequest) -> Result<BatchReport, ServiceError> {
    let persisted = state
        .fingerprints
        .load(request.scope())
        .map_err(ServiceError::Other)?;
    let batch = fingerprint_rows(&request.rows, &request.important_columns, request.first_row);
    Ok(classify_batch(batch, &persisted))
}

#[derive(Debug, Deserialize)]
struct EvaluationRequest {
    project_type_id: i64,
    markings: Vec<Marking>,
    #[serde(default)]
    issues: Vec<IssueDetail>,
    #[serde(default)]
    total_records: usize,
    #[serde(default)]
    feedback_threshold: Option<f64>,
}

#[derive(Debug, Serialize)]
struct EvaluationResponse {
    score: ScoreResult,
    summary: String,
    /// Present when feedback was requested and the collaborator answered;
    /// feedback being unavailable never blocks the score itself.
    feedback: Option<FeedbackSummary>,
    feedback_error: Option<String>,
}

async fn handle_evaluation(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EvaluationRequest>,
) -> Result<Json<EvaluationResponse>, ServiceError> {
    let score = calculate_score(&state.catalog, request.project_type_id, &request.markings)?;
    let summary = score_summary(&score);

    let threshold = request
        .feedback_threshold
        .unwrap_or(state.config.feedback_threshold);
    let (feedback, feedback_error) = if needs_feedback(&score, threshold) {
        let payload = build_feedback_request(
            &score,
            &request.issues,
            request.total_records,
            3,
        );
        match generate_feedback(&state.feedback, &state.gate, &payload).await {
            Ok(summary) => (Some(summary), None),
            Err(err) => {
                warn!("feedback generation failed: {err:#}");
                (None, Some(err.to_string()))
            }
        }
    } else {
        (None, None)
    };

    Ok(Json(EvaluationResponse {
        score,
        summary,
        feedback,
        feedback_error,
    }))
}
