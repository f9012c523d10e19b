//! Scanner device registration and heartbeat

use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use rollcall_common::db::models::Device;
use serde::Deserialize;
use tracing::info;

use crate::db::devices;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub device_id: String,
    pub device_name: String,
    pub room_number: String,
}

/// POST /api/hardware/devices
pub async fn register_device(
    State(state): State<AppState>,
    Json(request): Json<RegisterDeviceRequest>,
) -> ApiResult<Json<Device>> {
    let device_id = request.device_id.trim();
    if device_id.is_empty() || request.device_name.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "deviceId and deviceName are required".to_string(),
        ));
    }

    let device = devices::register_device(
        &state.db,
        device_id,
        request.device_name.trim(),
        request.room_number.trim(),
    )
    .await?;

    info!(device_id = %device.device_id, room = %device.room_number, "Device registered");

    Ok(Json(device))
}

/// POST /api/hardware/devices/:device_id/ping
pub async fn ping_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Device>> {
    if !devices::record_ping(&state.db, &device_id).await? {
        return Err(ApiError::NotFound(format!("Device {}", device_id)));
    }

    devices::get_device(&state.db, &device_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Device {}", device_id)))
}

pub fn device_routes() -> Router<AppState> {
    Router::new()
        .route("/api/hardware/devices", post(register_device))
        .route("/api/hardware/devices/:device_id/ping", post(ping_device))
}
