//! Survey API routes
//!
//! Reads are computed from the current snapshot on every request; nothing
//! derived is cached. Writes go through the repository, which applies the
//! mutation to a fresh snapshot and retries on version conflicts.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    routing::{get, patch},
    Json, Router,
};
use epi_belts::{BeltClassifier, Classification, Overlap};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use survey_rollup::aggregate::{BeltRollup, Breakdown};
use survey_rollup::{
    aggregate, annotate, belt_rollup, breakdown, AnnotatedSurvey, Mutation, MutationContext, MutationOutcome,
    FilterParams, NewSurvey, Repository, RollupResult, SnapshotStore, SurveyError, SurveyPatch,
};

use crate::error::ApiResult;

pub const ACTOR_HEADER: &str = "x-actor";

pub type SharedStore = Arc<dyn SnapshotStore>;

/// Shared gateway state
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository<SharedStore>>,
    pub classifier: Arc<BeltClassifier>,
}

impl AppState {
    pub fn new(store: SharedStore, classifier: BeltClassifier, commit_attempts: usize) -> Self {
        Self {
            repo: Arc::new(Repository::new(store).with_max_attempts(commit_attempts)),
            classifier: Arc::new(classifier),
        }
    }
}

// ========== Response Types ==========

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorateSummary {
    pub id: String,
    pub name_ar: String,
    pub name_en: String,
    pub survey_count: usize,
    pub belt: Classification,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSummary {
    pub id: String,
    pub name_ar: String,
    pub name_en: String,
    pub governorates: Vec<GovernorateSummary>,
}

fn actor(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn commit(state: &AppState, headers: &HeaderMap, mutation: Mutation) -> ApiResult<MutationOutcome> {
    let ctx = MutationContext::now(actor(headers));
    let applied = state.repo.commit(mutation, &ctx)?;
    Ok(applied.outcome)
}

// ========== Route Handlers ==========

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot_version = state.repo.snapshot().ok().map(|s| s.version);
    let status = if snapshot_version.is_some() { "healthy" } else { "degraded" };

    Json(serde_json::json!({
        "status": status,
        "service": "survey-gateway",
        "snapshotVersion": snapshot_version,
        "beltTablesVersion": state.classifier.tables_version(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Classify one governorate name
pub async fn classify_belt(State(state): State<AppState>, Path(name): Path<String>) -> Json<Classification> {
    Json(state.classifier.classify(&name))
}

pub async fn belt_overlaps(State(state): State<AppState>) -> Json<Vec<Overlap>> {
    Json(state.classifier.overlaps())
}

pub async fn list_regions(State(state): State<AppState>) -> ApiResult<Json<Vec<RegionSummary>>> {
    let snapshot = state.repo.snapshot()?;

    let regions = snapshot
        .regions
        .iter()
        .map(|r| RegionSummary {
            id: r.id.clone(),
            name_ar: r.name_ar.clone(),
            name_en: r.name_en.clone(),
            governorates: r
                .governorates
                .iter()
                .map(|g| GovernorateSummary {
                    id: g.id.clone(),
                    name_ar: g.name_ar.clone(),
                    name_en: g.name_en.clone(),
                    survey_count: g.surveys.len(),
                    belt: g.belt(&state.classifier),
                })
                .collect(),
        })
        .collect();

    Ok(Json(regions))
}

pub async fn rollup(
    State(state): State<AppState>,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> ApiResult<Json<RollupResult>> {
    let Query(params) = params?;
    let filter = params.parse()?;
    let snapshot = state.repo.snapshot()?;
    Ok(Json(aggregate(&snapshot, &filter)?))
}

pub async fn get_breakdown(
    State(state): State<AppState>,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> ApiResult<Json<Breakdown>> {
    let Query(params) = params?;
    let filter = params.parse()?;
    let snapshot = state.repo.snapshot()?;
    Ok(Json(breakdown(&snapshot, &filter, &state.classifier)?))
}

pub async fn get_belt_rollup(
    State(state): State<AppState>,
    params: Result<Query<FilterParams>, QueryRejection>,
) -> ApiResult<Json<Vec<BeltRollup>>> {
    let Query(params) = params?;
    let filter = params.parse()?;
    let snapshot = state.repo.snapshot()?;
    Ok(Json(belt_rollup(&snapshot, &filter, &state.classifier)?))
}

pub async fn region_rollup(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<RollupResult>> {
    let snapshot = state.repo.snapshot()?;
    if snapshot.region(&id).is_none() {
        return Err(SurveyError::RegionNotFound(id).into());
    }
    Ok(Json(survey_rollup::rollup_region(&snapshot, &id)))
}

pub async fn governorate_rollup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RollupResult>> {
    let snapshot = state.repo.snapshot()?;
    if snapshot.governorate(&id).is_none() {
        return Err(SurveyError::GovernorateNotFound(id).into());
    }
    Ok(Json(survey_rollup::rollup_governorate(&snapshot, &id)))
}

/// Surveys of one governorate with derived fields attached
pub async fn list_surveys(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<AnnotatedSurvey>>> {
    let snapshot = state.repo.snapshot()?;
    let gov = snapshot
        .governorate(&id)
        .ok_or_else(|| SurveyError::GovernorateNotFound(id.clone()))?;

    let surveys = gov.surveys.iter().map(annotate).collect::<Result<Vec<_>, _>>()?;
    Ok(Json(surveys))
}

pub async fn create_survey(
    State(state): State<AppState>,
    Path(governorate_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<NewSurvey>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<MutationOutcome>)> {
    let Json(survey) = payload?;
    let outcome = commit(&state, &headers, Mutation::Create { governorate_id, survey })?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn update_survey(
    State(state): State<AppState>,
    Path(survey_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<SurveyPatch>, JsonRejection>,
) -> ApiResult<Json<MutationOutcome>> {
    let Json(patch) = payload?;
    let outcome = commit(&state, &headers, Mutation::Update { survey_id, patch })?;
    Ok(Json(outcome))
}

pub async fn delete_survey(
    State(state): State<AppState>,
    Path(survey_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<MutationOutcome>> {
    let outcome = commit(&state, &headers, Mutation::Delete { survey_id })?;
    Ok(Json(outcome))
}

// ========== Router ==========

pub fn survey_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/belts/overlaps", get(belt_overlaps))
        .route("/belts/:name", get(classify_belt))
        .route("/regions", get(list_regions))
        .route("/regions/:id/rollup", get(region_rollup))
        .route("/governorates/:id/rollup", get(governorate_rollup))
        .route("/governorates/:id/surveys", get(list_surveys).post(create_survey))
        .route("/surveys/:id", patch(update_survey).delete(delete_survey))
        .route("/rollup", get(rollup))
        .route("/breakdown", get(get_breakdown))
        .route("/belts-rollup", get(get_belt_rollup))
        .with_state(state)
}

/// Full application: API under `/api/v1` with tracing and CORS
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", survey_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
