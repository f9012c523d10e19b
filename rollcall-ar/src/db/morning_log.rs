//! Morning presence log
//!
//! At most one entry per (student, date). Repeat biometric scans fold into
//! the existing row: the earliest scan time and the highest confidence win.
//! Writes are refused once a reconciliation run marker exists for the date.

use chrono::{NaiveDate, NaiveTime};
use rollcall_common::db::models::{ArrivalStatus, MorningPresenceEntry};
use rollcall_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Validated biometric scan ready to be logged
#[derive(Debug, Clone)]
pub struct NewMorningScan<'a> {
    pub student_ref: &'a str,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub confidence: i64,
    pub arrival: ArrivalStatus,
    pub device_id: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorningUpsert {
    /// First scan of the day for this student
    Recorded,
    /// Folded into an existing entry
    Updated,
    /// Reconciliation already started for the date
    DateClosed,
}

pub(crate) fn format_time(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

/// Insert or fold a morning scan
pub async fn upsert_morning_scan(pool: &SqlitePool, scan: &NewMorningScan<'_>) -> Result<MorningUpsert> {
    let scan_count: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO morning_presence (student_ref, scan_date, scan_time, confidence, arrival, device_id)
        SELECT ?, ?, ?, ?, ?, ?
        WHERE NOT EXISTS (SELECT 1 FROM reconciliation_runs WHERE run_date = ?)
        ON CONFLICT (student_ref, scan_date) DO UPDATE SET
            arrival = CASE
                WHEN excluded.scan_time < morning_presence.scan_time THEN excluded.arrival
                ELSE morning_presence.arrival
            END,
            scan_time = MIN(morning_presence.scan_time, excluded.scan_time),
            confidence = MAX(morning_presence.confidence, excluded.confidence),
            device_id = COALESCE(excluded.device_id, morning_presence.device_id),
            scan_count = morning_presence.scan_count + 1,
            updated_at = CURRENT_TIMESTAMP
        RETURNING scan_count
        "#,
    )
    .bind(scan.student_ref)
    .bind(scan.date)
    .bind(format_time(scan.time))
    .bind(scan.confidence)
    .bind(scan.arrival.as_str())
    .bind(scan.device_id)
    .bind(scan.date)
    .fetch_optional(pool)
    .await?;

    Ok(match scan_count {
        None => MorningUpsert::DateClosed,
        Some(1) => MorningUpsert::Recorded,
        Some(_) => MorningUpsert::Updated,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<MorningPresenceEntry> {
    let arrival: String = row.try_get("arrival")?;

    Ok(MorningPresenceEntry {
        id: row.try_get("id")?,
        student_ref: row.try_get("student_ref")?,
        scan_date: row.try_get("scan_date")?,
        scan_time: row.try_get("scan_time")?,
        confidence: row.try_get("confidence")?,
        arrival: arrival.parse()?,
        device_id: row.try_get("device_id")?,
        scan_count: row.try_get("scan_count")?,
        processed: row.try_get("processed")?,
    })
}

const ENTRY_COLUMNS: &str =
    "id, student_ref, scan_date, scan_time, confidence, arrival, device_id, scan_count, processed";

/// Unprocessed entries for a date: the reconciliation working set
pub async fn pending_for_date(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<MorningPresenceEntry>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM morning_presence WHERE scan_date = ? AND processed = 0 ORDER BY student_ref",
        ENTRY_COLUMNS
    ))
    .bind(date)
    .fetch_all(pool)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

pub async fn get_entry(
    pool: &SqlitePool,
    student_ref: &str,
    date: NaiveDate,
) -> Result<Option<MorningPresenceEntry>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM morning_presence WHERE student_ref = ? AND scan_date = ?",
        ENTRY_COLUMNS
    ))
    .bind(student_ref)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(entry_from_row).transpose()
}

/// Dates in `[from, until)` that still have unprocessed entries
pub async fn pending_dates(pool: &SqlitePool, from: NaiveDate, until: NaiveDate) -> Result<Vec<NaiveDate>> {
    let dates: Vec<NaiveDate> = sqlx::query_scalar(
        r#"
        SELECT DISTINCT scan_date FROM morning_presence
        WHERE processed = 0 AND scan_date >= ? AND scan_date < ?
        ORDER BY scan_date
        "#,
    )
    .bind(from)
    .bind(until)
    .fetch_all(pool)
    .await?;

    Ok(dates)
}

/// Flag an entry as reconciled (part of the per-student unit)
pub async fn mark_processed(conn: &mut SqliteConnection, entry_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE morning_presence SET processed = 1, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(entry_id)
    .execute(conn)
    .await?;

    Ok(())
}
