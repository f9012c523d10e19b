//! Tests for database initialization
//!
//! Covers first-run creation, reopening an existing database, default
//! settings seeding and the uniqueness constraints the engine depends on.

use rollcall_common::db::init::init_database;
use rollcall_common::db::{get_schema_version, get_setting, set_setting, CURRENT_SCHEMA_VERSION};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("rollcall.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("rollcall.db");

    let pool1 = init_database(&db_path).await.unwrap();
    set_setting(&pool1, "threshold_present_periods", 6).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    // Edited settings survive re-initialization
    let value: Option<i64> = get_setting(&pool2.unwrap(), "threshold_present_periods")
        .await
        .unwrap();
    assert_eq!(value, Some(6));
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("rollcall.db")).await.unwrap();

    let present: Option<i64> = get_setting(&pool, "threshold_present_periods").await.unwrap();
    let half_day: Option<i64> = get_setting(&pool, "threshold_half_day_periods").await.unwrap();
    let trigger: Option<String> = get_setting(&pool, "reconcile_trigger_time").await.unwrap();

    assert_eq!(present, Some(7));
    assert_eq!(half_day, Some(4));
    assert_eq!(trigger.as_deref(), Some("20:00"));
}

#[tokio::test]
async fn test_null_setting_is_reset_to_default() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("rollcall.db");

    let pool = init_database(&db_path).await.unwrap();
    sqlx::query("UPDATE settings SET value = NULL WHERE key = 'reconcile_parallelism'")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let pool = init_database(&db_path).await.unwrap();
    let value: Option<i64> = get_setting(&pool, "reconcile_parallelism").await.unwrap();
    assert_eq!(value, Some(4));
}

#[tokio::test]
async fn test_migrations_recorded() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("rollcall.db")).await.unwrap();

    let version = get_schema_version(&pool).await.unwrap();
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_morning_presence_unique_per_student_and_date() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("rollcall.db")).await.unwrap();

    let insert = "INSERT INTO morning_presence (student_ref, scan_date, scan_time, confidence, arrival)
                  VALUES ('21CS001', '2024-03-04', '09:01:00', 120, 'ON_TIME')";
    sqlx::query(insert).execute(&pool).await.unwrap();
    let second = sqlx::query(insert).execute(&pool).await;

    assert!(second.is_err(), "Second morning row for the same day must violate UNIQUE");
}

#[tokio::test]
async fn test_ledger_rejects_unknown_status() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("rollcall.db")).await.unwrap();

    let result = sqlx::query(
        "INSERT INTO attendance_ledger (student_ref, attendance_date, status, created_at, updated_at)
         VALUES ('21CS001', '2024-03-04', 'LATE', CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)",
    )
    .execute(&pool)
    .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_invalid_setting_value_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("rollcall.db")).await.unwrap();

    set_setting(&pool, "reconcile_lease_secs", "soon").await.unwrap();
    let result: rollcall_common::Result<Option<u64>> =
        get_setting(&pool, "reconcile_lease_secs").await;

    assert!(matches!(result, Err(rollcall_common::Error::Config(_))));
}
