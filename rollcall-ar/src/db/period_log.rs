//! Period presence log
//!
//! One row per (student, date, period token). Duplicate swipes for the same
//! period are absorbed by the unique key, so the row count is the distinct
//! period count used for classification.

use chrono::{NaiveDate, NaiveTime};
use rollcall_common::db::models::PeriodPresenceEntry;
use rollcall_common::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::morning_log::format_time;
use super::runs;

#[derive(Debug, Clone)]
pub struct NewPeriodScan<'a> {
    pub student_ref: &'a str,
    pub date: NaiveDate,
    pub period_token: &'a str,
    pub time: NaiveTime,
    pub room_number: Option<&'a str>,
    pub device_id: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodInsert {
    Recorded,
    /// Period already on file for this student and date
    Duplicate,
    DateClosed,
}

pub async fn insert_period_scan(pool: &SqlitePool, scan: &NewPeriodScan<'_>) -> Result<PeriodInsert> {
    let result = sqlx::query(
        r#"
        INSERT INTO period_presence (student_ref, scan_date, period_token, scan_time, room_number, device_id)
        SELECT ?, ?, ?, ?, ?, ?
        WHERE NOT EXISTS (SELECT 1 FROM reconciliation_runs WHERE run_date = ?)
        ON CONFLICT (student_ref, scan_date, period_token) DO NOTHING
        "#,
    )
    .bind(scan.student_ref)
    .bind(scan.date)
    .bind(scan.period_token)
    .bind(format_time(scan.time))
    .bind(scan.room_number)
    .bind(scan.device_id)
    .bind(scan.date)
    .execute(pool)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(PeriodInsert::Recorded);
    }

    if runs::is_date_open(pool, scan.date).await? {
        Ok(PeriodInsert::Duplicate)
    } else {
        Ok(PeriodInsert::DateClosed)
    }
}

pub async fn count_distinct_periods(pool: &SqlitePool, student_ref: &str, date: NaiveDate) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT period_token) FROM period_presence WHERE student_ref = ? AND scan_date = ?",
    )
    .bind(student_ref)
    .bind(date)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

pub async fn list_for_student(
    pool: &SqlitePool,
    student_ref: &str,
    date: NaiveDate,
) -> Result<Vec<PeriodPresenceEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, student_ref, scan_date, period_token, scan_time, room_number, device_id
        FROM period_presence
        WHERE student_ref = ? AND scan_date = ?
        ORDER BY scan_time
        "#,
    )
    .bind(student_ref)
    .bind(date)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<PeriodPresenceEntry> {
            Ok(PeriodPresenceEntry {
                id: row.try_get("id")?,
                student_ref: row.try_get("student_ref")?,
                scan_date: row.try_get("scan_date")?,
                period_token: row.try_get("period_token")?,
                scan_time: row.try_get("scan_time")?,
                room_number: row.try_get("room_number")?,
                device_id: row.try_get("device_id")?,
            })
        })
        .collect()
}

/// Drop a student's period rows for a date once they are folded into the ledger
pub async fn purge_for_student(
    conn: &mut SqliteConnection,
    student_ref: &str,
    date: NaiveDate,
) -> Result<u64> {
    let result = sqlx::query("DELETE FROM period_presence WHERE student_ref = ? AND scan_date = ?")
        .bind(student_ref)
        .bind(date)
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}

/// Drop period rows on closed dates before `before` that no run will ever read
///
/// A row is kept while its student still has an unprocessed morning entry for
/// the date, so deferred students are not stripped of their swipes.
pub async fn purge_stale(pool: &SqlitePool, before: NaiveDate) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM period_presence
        WHERE scan_date < ?
          AND EXISTS (
              SELECT 1 FROM reconciliation_runs r
              WHERE r.run_date = period_presence.scan_date AND r.state = 'COMPLETED'
          )
          AND NOT EXISTS (
              SELECT 1 FROM morning_presence m
              WHERE m.student_ref = period_presence.student_ref
                AND m.scan_date = period_presence.scan_date
                AND m.processed = 0
          )
        "#,
    )
    .bind(before)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
