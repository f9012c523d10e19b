//! Ledger and per-student presence reads

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use rollcall_common::db::models::AttendanceRecord;
use rollcall_common::time::parse_date;

use crate::db::ledger;
use crate::reconcile::PresenceView;
use crate::{ApiError, ApiResult, AppState};

fn path_date(raw: &str) -> ApiResult<NaiveDate> {
    parse_date(raw).ok_or_else(|| ApiError::BadRequest(format!("Invalid date: {}", raw)))
}

/// GET /api/attendance/:date
pub async fn list_attendance(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> ApiResult<Json<Vec<AttendanceRecord>>> {
    let date = path_date(&date)?;
    Ok(Json(ledger::list_for_date(&state.db, date).await?))
}

/// GET /api/presence/:student/:date
pub async fn presence(
    State(state): State<AppState>,
    Path((student, date)): Path<(String, String)>,
) -> ApiResult<Json<PresenceView>> {
    let date = path_date(&date)?;
    Ok(Json(state.reconciler.presence_state(&student, date).await?))
}

pub fn attendance_routes() -> Router<AppState> {
    Router::new()
        .route("/api/attendance/:date", get(list_attendance))
        .route("/api/presence/:student/:date", get(presence))
}
