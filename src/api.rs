use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::dataset::Dataset;
use crate::engine::{ClusterEngine, ScoredBatch, ScoredRecords};
use crate::features::{CoercionPolicy, ExtractError, FEATURE_COUNT, REQUIRED_COLUMNS};
use crate::model::LinearModel;
use crate::report::{
    aggregate, branch_detail, cluster_distribution, compute_kpis, filter_options, top_past_due,
    BranchDetail, BranchFilter, FilterOptions, Level, PastDueEntry, PortfolioKpis, SegmentRow,
    DEFAULT_TOP_N,
};
use crate::segment::{guidance, ClusterLabel, Guidance};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ClusterEngine>,
}

impl AppState {
    pub fn new(engine: ClusterEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/score", post(score))
        .route("/score/csv", post(score_csv))
        .route("/report", post(report))
        .route("/model", get(model_info))
        .route("/segments/{label}", get(segment_guidance))
        .route("/branches/{name}", post(branch))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Handler errors mapped onto HTTP status codes.
#[derive(Debug)]
pub enum ApiError {
    Extract(ExtractError),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<ExtractError> for ApiError {
    fn from(e: ExtractError) -> Self {
        Self::Extract(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Extract(ExtractError::MissingColumns(e)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": e.to_string(), "missing": e.missing }),
            ),
            ApiError::Extract(e @ ExtractError::NonNumericCell { .. }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": e.to_string() }),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Internal(msg) => {
                error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg }))
            }
        };
        (status, Json(body)).into_response()
    }
}

/// Scoring is CPU-bound; keep it off the async workers.
async fn run_scoring(state: &AppState, dataset: Dataset) -> Result<ScoredBatch, ApiError> {
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || engine.score_dataset(dataset))
        .await
        .map_err(|e| ApiError::Internal(format!("scoring task failed: {e}")))?
        .map_err(ApiError::from)
}

async fn score(
    State(state): State<AppState>,
    Json(records): Json<Vec<Map<String, Value>>>,
) -> Result<Json<ScoredRecords>, ApiError> {
    let batch = run_scoring(&state, Dataset::from_records(records)).await?;
    Ok(Json(batch.to_records()))
}

async fn score_csv(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    let dataset = Dataset::from_csv_reader(body.as_bytes())
        .map_err(|e| ApiError::BadRequest(format!("{e:#}")))?;
    let batch = run_scoring(&state, dataset).await?;

    let mut out = Vec::new();
    batch
        .write_csv(&mut out)
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], out).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct ReportQuery {
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    zone: Option<String>,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    level: Level,
    #[serde(default)]
    top: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ReportResponse {
    model: String,
    filter: BranchFilter,
    options: FilterOptions,
    kpis: Option<PortfolioKpis>,
    table: Vec<SegmentRow>,
    top_past_due: Vec<PastDueEntry>,
    clusters: BTreeMap<ClusterLabel, usize>,
}

async fn report(
    State(state): State<AppState>,
    Query(q): Query<ReportQuery>,
    Json(records): Json<Vec<Map<String, Value>>>,
) -> Result<Json<ReportResponse>, ApiError> {
    let batch = run_scoring(&state, Dataset::from_records(records)).await?;

    // "" from a cleared select box means "all"
    let pick = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let filter = BranchFilter {
        region: pick(q.region),
        zone: pick(q.zone),
        branch: pick(q.branch),
    };
    let selected = filter.apply(&batch.rows);

    Ok(Json(ReportResponse {
        options: filter_options(&batch.rows, &filter),
        kpis: compute_kpis(selected.iter().copied()),
        table: aggregate(selected.iter().copied(), q.level),
        top_past_due: top_past_due(selected.iter().copied(), q.top.unwrap_or(DEFAULT_TOP_N)),
        clusters: cluster_distribution(selected.iter().copied()),
        model: batch.model,
        filter,
    }))
}

async fn branch(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(records): Json<Vec<Map<String, Value>>>,
) -> Result<Json<BranchDetail>, ApiError> {
    let batch = run_scoring(&state, Dataset::from_records(records)).await?;
    branch_detail(&batch.rows, &name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("branch `{name}` not in dataset")))
}

#[derive(Debug, Serialize)]
struct SegmentInfo {
    label: ClusterLabel,
    intercept: f64,
    weights: BTreeMap<&'static str, f64>,
}

#[derive(Debug, Serialize)]
struct ModelInfo {
    fingerprint: String,
    coercion: CoercionPolicy,
    features: [&'static str; FEATURE_COUNT],
    segments: Vec<SegmentInfo>,
}

async fn model_info(State(state): State<AppState>) -> Json<ModelInfo> {
    let model = state.engine.model();
    let segments = ClusterLabel::ALL
        .into_iter()
        .map(|label| {
            let LinearModel { intercept, weights } = *model.segment(label);
            SegmentInfo {
                label,
                intercept,
                weights: REQUIRED_COLUMNS.into_iter().zip(weights).collect(),
            }
        })
        .collect();
    Json(ModelInfo {
        fingerprint: model.fingerprint(),
        coercion: state.engine.policy(),
        features: REQUIRED_COLUMNS,
        segments,
    })
}

async fn segment_guidance(Path(label): Path<String>) -> Result<Json<Guidance>, ApiError> {
    let label: ClusterLabel = label
        .parse()
        .map_err(|e: anyhow::Error| ApiError::NotFound(e.to_string()))?;
    Ok(Json(guidance(label)))
}
