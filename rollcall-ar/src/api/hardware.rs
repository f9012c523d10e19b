//! Scan ingestion endpoints used by fingerprint terminals and RFID readers
//!
//! Always answers 200 with a [`HardwareResponse`]; a body that does not
//! parse is rejected as MALFORMED_PAYLOAD rather than with an HTTP error.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use rollcall_common::api::{HardwareResponse, RejectReason};
use tracing::debug;

use crate::ingest::{BiometricScan, CardScan};
use crate::AppState;

/// POST /api/attendance/log/fingerprint
pub async fn log_fingerprint(
    State(state): State<AppState>,
    payload: Result<Json<BiometricScan>, JsonRejection>,
) -> Json<HardwareResponse> {
    let Json(scan) = match payload {
        Ok(scan) => scan,
        Err(rejection) => {
            debug!(error = %rejection, "Unparseable fingerprint payload");
            return Json(HardwareResponse::rejected(RejectReason::MalformedPayload));
        }
    };

    Json(state.gateway.ingest_biometric(&scan).await.into_response())
}

/// POST /api/attendance/log/rfid
pub async fn log_rfid(
    State(state): State<AppState>,
    payload: Result<Json<CardScan>, JsonRejection>,
) -> Json<HardwareResponse> {
    let Json(scan) = match payload {
        Ok(scan) => scan,
        Err(rejection) => {
            debug!(error = %rejection, "Unparseable card payload");
            return Json(HardwareResponse::rejected(RejectReason::MalformedPayload));
        }
    };

    Json(state.gateway.ingest_card(&scan).await.into_response())
}

pub fn hardware_routes() -> Router<AppState> {
    Router::new()
        .route("/api/attendance/log/fingerprint", post(log_fingerprint))
        .route("/api/attendance/log/rfid", post(log_rfid))
}
