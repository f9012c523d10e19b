//! Settings table access
//!
//! Runtime configuration is database-first: every key below is seeded with
//! its default on first start and can be edited in place afterwards.

use crate::{Error, Result};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Default class period schedule (label = period token)
pub const DEFAULT_PERIOD_SLOTS: &str = r#"[{"label":"09:00-10:00","start":"09:00","end":"10:00"},{"label":"10:00-11:00","start":"10:00","end":"11:00"},{"label":"11:00-12:00","start":"11:00","end":"12:00"},{"label":"12:00-13:00","start":"12:00","end":"13:00"},{"label":"13:30-14:30","start":"13:30","end":"14:30"},{"label":"14:30-15:30","start":"14:30","end":"15:30"},{"label":"15:30-16:30","start":"15:30","end":"16:30"}]"#;

/// Runtime settings and their built-in defaults
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    // Classification thresholds
    ("threshold_present_periods", "7"),
    ("threshold_half_day_periods", "4"),
    // Reconciliation scheduling
    ("reconcile_trigger_time", "20:00"),
    ("reconcile_lease_secs", "3600"),
    ("reconcile_parallelism", "4"),
    ("reconcile_catchup_days", "0"),
    ("period_retention_days", "7"),
    // Ingestion validation
    ("ingest_future_tolerance_secs", "120"),
    ("morning_late_after", "09:10"),
    ("confidence_high_min", "100"),
    ("confidence_medium_min", "50"),
    ("period_slots", DEFAULT_PERIOD_SLOTS),
    // Database
    ("db_max_lock_wait_ms", "5000"),
];

/// Generic setting getter
///
/// Returns `None` when the key is absent or NULL.
pub async fn get_setting<T: FromStr>(db: &SqlitePool, key: &str) -> Result<Option<T>> {
    let value: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await?;

    match value.flatten() {
        Some(s) => match s.trim().parse::<T>() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::Config(format!(
                "Failed to parse setting '{}' value: {}",
                key, s
            ))),
        },
        None => Ok(None),
    }
}

/// Generic setting setter
pub async fn set_setting<T: ToString>(db: &SqlitePool, key: &str, value: T) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

/// Insert a default for `key` if it is missing, or reset it if NULL
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let existing: Option<Option<String>> =
        sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

    match existing {
        Some(Some(_)) => Ok(()),
        Some(None) => {
            sqlx::query("UPDATE settings SET value = ?, updated_at = CURRENT_TIMESTAMP WHERE key = ?")
                .bind(default_value)
                .bind(key)
                .execute(pool)
                .await?;
            info!("Setting '{}' was NULL, reset to default: {}", key, default_value);
            Ok(())
        }
        None => {
            // INSERT OR IGNORE: concurrent initializers may race past the lookup
            sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(default_value)
                .execute(pool)
                .await?;
            info!("Initialized setting '{}' with default value: {}", key, default_value);
            Ok(())
        }
    }
}
