//! Manual reconciliation trigger and run history

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use rollcall_common::time::{local_now, parse_date};
use serde::Deserialize;
use tracing::info;

use crate::db::runs::{self, RunHistoryEntry, RunMarker};
use crate::db::RunTrigger;
use crate::reconcile::RunReport;
use crate::{ApiError, ApiResult, AppState};

/// Body of a manual or backfill run; `date` defaults to today
#[derive(Debug, Default, Deserialize)]
pub struct ManualRunRequest {
    pub date: Option<String>,
}

/// An empty body means "today"; anything else must be a valid JSON request
fn parse_request(headers: &HeaderMap, body: &Bytes) -> ApiResult<ManualRunRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ManualRunRequest::default());
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    if !is_json {
        return Err(ApiError::BadRequest(
            "Expected Content-Type: application/json".to_string(),
        ));
    }

    let Json(request) = Json::<ManualRunRequest>::from_bytes(body)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    Ok(request)
}

/// POST /api/reconcile/run
///
/// **Errors:**
/// - 400 Bad Request: unparseable body, malformed or future date
/// - 409 Conflict: a run for the date is already in progress
pub async fn trigger_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<RunReport>> {
    let request = parse_request(&headers, &body)?;
    let today = local_now().date();
    let date = match request.date {
        Some(raw) => parse_date(&raw)
            .ok_or_else(|| ApiError::BadRequest(format!("Invalid date: {}", raw)))?,
        None => today,
    };

    if date > today {
        return Err(ApiError::BadRequest(format!(
            "Cannot reconcile future date {}",
            date
        )));
    }

    info!(date = %date, "Manual reconciliation requested");

    let report = state.reconciler.run_for_date(date, RunTrigger::Manual).await?;
    Ok(Json(report))
}

/// GET /api/reconcile/runs/:date
pub async fn get_run(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> ApiResult<Json<RunMarker>> {
    let date = parse_date(&date)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid date: {}", date)))?;

    runs::get_run(&state.db, date)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No reconciliation run for {}", date)))
}

/// GET /api/reconcile/runs/:date/history
pub async fn get_run_history(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> ApiResult<Json<Vec<RunHistoryEntry>>> {
    let date = parse_date(&date)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid date: {}", date)))?;

    Ok(Json(runs::list_history(&state.db, date).await?))
}

pub fn reconcile_routes() -> Router<AppState> {
    Router::new()
        .route("/api/reconcile/run", post(trigger_run))
        .route("/api/reconcile/runs/:date", get(get_run))
        .route("/api/reconcile/runs/:date/history", get(get_run_history))
}
