use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use netwatch_core::TestKind;
use netwatch_results::StoredResult;
use serde::Deserialize;
use std::sync::Arc;

use super::error::{ApiError, ApiResult};
use crate::app::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub kind: Option<String>,
    pub limit: Option<usize>,
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// GET /api/results?kind=speed_test|packet_loss&limit=
pub async fn list_results(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResultsQuery>,
) -> ApiResult<Json<Vec<StoredResult>>> {
    let kind = match query.kind.as_deref().filter(|k| !k.is_empty()) {
        Some(k) => Some(
            k.parse::<TestKind>()
                .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))?,
        ),
        None => None,
    };
    Ok(Json(state.results.list_recent(clamp_limit(query.limit), kind)?))
}
