//! rollcall-ar (Attendance Reconciliation) library interface
//!
//! Ingests biometric check-ins and classroom card swipes into transient
//! presence logs, and folds them nightly into the attendance ledger.

pub mod api;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod ingest;
pub mod reconcile;

pub use crate::error::{ApiError, ApiResult, AttendanceError};

use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use crate::config::AttendanceSettings;
use crate::directory::StudentDirectory;
use crate::ingest::IngestionGateway;
use crate::reconcile::Reconciler;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub settings: Arc<AttendanceSettings>,
    pub gateway: Arc<IngestionGateway>,
    pub reconciler: Arc<Reconciler>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        directory: Arc<dyn StudentDirectory>,
        settings: AttendanceSettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let gateway = IngestionGateway::new(db.clone(), directory.clone(), settings.clone());
        let reconciler = Reconciler::new(db.clone(), directory, settings.clone());

        Self {
            db,
            settings,
            gateway: Arc::new(gateway),
            reconciler: Arc::new(reconciler),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::hardware_routes())
        .merge(api::device_routes())
        .merge(api::reconcile_routes())
        .merge(api::attendance_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
