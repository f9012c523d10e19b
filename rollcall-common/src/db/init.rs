//! Database initialization
//!
//! Opens (or creates) the SQLite database, creates every table the
//! attendance engine relies on, applies migrations and seeds default
//! runtime settings. Safe to call on every startup.

use crate::db::settings::{ensure_setting, DEFAULT_SETTINGS};
use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    // WAL lets ingestion readers proceed while a reconciliation unit commits
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema_version_table(&pool).await?;
    create_settings_table(&pool).await?;

    // Directory reference data (maintained by the administration service)
    create_students_table(&pool).await?;
    create_biometric_templates_table(&pool).await?;
    create_rfid_cards_table(&pool).await?;
    create_devices_table(&pool).await?;

    // Transient presence logs
    create_morning_presence_table(&pool).await?;
    create_period_presence_table(&pool).await?;

    // System of record
    create_attendance_ledger_table(&pool).await?;
    create_reconciliation_runs_table(&pool).await?;
    create_reconciliation_run_reports_table(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    init_default_settings(&pool).await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores runtime configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_students_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS students (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            registration_number TEXT NOT NULL UNIQUE,
            name TEXT,
            section_id TEXT,
            branch TEXT,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_biometric_templates_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS biometric_templates (
            match_id INTEGER PRIMARY KEY,
            registration_number TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            enrolled_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_rfid_cards_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rfid_cards (
            card_uid TEXT PRIMARY KEY,
            registration_number TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            issued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_devices_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            device_id TEXT PRIMARY KEY,
            device_name TEXT NOT NULL,
            room_number TEXT NOT NULL,
            last_ping TIMESTAMP,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One biometric check-in per student per day
async fn create_morning_presence_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS morning_presence (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_ref TEXT NOT NULL,
            scan_date TEXT NOT NULL,
            scan_time TEXT NOT NULL,
            confidence INTEGER NOT NULL,
            arrival TEXT NOT NULL CHECK (arrival IN ('ON_TIME', 'LATE')),
            device_id TEXT,
            scan_count INTEGER NOT NULL DEFAULT 1,
            processed INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (student_ref, scan_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-period card swipes; one countable row per distinct period
async fn create_period_presence_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS period_presence (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_ref TEXT NOT NULL,
            scan_date TEXT NOT NULL,
            period_token TEXT NOT NULL,
            scan_time TEXT NOT NULL,
            room_number TEXT,
            device_id TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (student_ref, scan_date, period_token)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_attendance_ledger_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attendance_ledger (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_ref TEXT NOT NULL,
            student_id INTEGER,
            attendance_date TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('PRESENT', 'HALF_DAY', 'ABSENT')),
            section_id TEXT,
            branch TEXT,
            remarks TEXT NOT NULL DEFAULT '',
            period_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            UNIQUE (student_ref, attendance_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-date run marker and report
async fn create_reconciliation_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconciliation_runs (
            run_date TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            state TEXT NOT NULL CHECK (state IN ('RUNNING', 'COMPLETED')),
            trigger TEXT NOT NULL,
            started_at TIMESTAMP NOT NULL,
            finished_at TIMESTAMP,
            lease_expires_at_ms INTEGER NOT NULL,
            working_set INTEGER NOT NULL DEFAULT 0,
            present INTEGER NOT NULL DEFAULT 0,
            half_day INTEGER NOT NULL DEFAULT 0,
            absent INTEGER NOT NULL DEFAULT 0,
            deferred INTEGER NOT NULL DEFAULT 0,
            failures TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Append-only history, one row per finished run
async fn create_reconciliation_run_reports_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconciliation_run_reports (
            run_id TEXT PRIMARY KEY,
            run_date TEXT NOT NULL,
            trigger TEXT NOT NULL,
            started_at TIMESTAMP NOT NULL,
            finished_at TIMESTAMP NOT NULL,
            working_set INTEGER NOT NULL,
            present INTEGER NOT NULL,
            half_day INTEGER NOT NULL,
            absent INTEGER NOT NULL,
            deferred INTEGER NOT NULL,
            failures TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or repair default settings
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    for (key, default_value) in DEFAULT_SETTINGS {
        ensure_setting(pool, key, default_value).await?;
    }

    Ok(())
}
