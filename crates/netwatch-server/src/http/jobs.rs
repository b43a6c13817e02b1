//! Job management endpoints under `/api/jobs`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use netwatch_results::StoredResult;
use netwatch_scheduler::{InFlightInfo, Job, NewJob};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ApiResult};
use super::results::{clamp_limit, LimitQuery};
use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct EnabledBody {
    pub enabled: bool,
}

fn validate(new: &NewJob) -> ApiResult<()> {
    if new.name.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "name must not be empty"));
    }
    Ok(())
}

/// GET /api/jobs
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Job>>> {
    Ok(Json(state.jobs.list_jobs()?))
}

/// POST /api/jobs: validates the interval and schedules the first run.
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(new): Json<NewJob>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    validate(&new)?;
    let job = state.jobs.add_job(new)?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.get_job(&id)?))
}

/// PUT /api/jobs/{id}
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<NewJob>,
) -> ApiResult<Json<Job>> {
    validate(&update)?;
    Ok(Json(state.jobs.update_job(&id, update)?))
}

/// DELETE /api/jobs/{id}: also cancels a running execution of the job.
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.jobs.remove_job(&id)?;
    if state.engine.cancel(&id) {
        info!(job_id = %id, "cancelled execution of deleted job");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/jobs/{id}/enabled
pub async fn set_enabled(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<EnabledBody>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.jobs.set_enabled(&id, body.enabled)?))
}

/// GET /api/jobs/running
pub async fn running_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<InFlightInfo>> {
    Json(state.engine.in_flight().snapshot())
}

/// POST /api/jobs/{id}/cancel
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !state.engine.cancel(&id) {
        return Err(ApiError::not_found(format!("job {id} is not running")));
    }
    Ok((StatusCode::ACCEPTED, Json(json!({ "cancelled": id }))))
}

/// GET /api/jobs/{id}/results?limit=
pub async fn job_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<StoredResult>>> {
    // 404 for unknown jobs rather than an empty list.
    state.jobs.get_job(&id)?;
    Ok(Json(state.results.list_for_job(&id, clamp_limit(query.limit))?))
}
