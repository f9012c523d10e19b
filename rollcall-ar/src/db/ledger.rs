//! Attendance ledger, the permanent system of record
//!
//! Exactly one row per (student, date). Re-running reconciliation replaces
//! status, references and remarks but keeps the original `created_at`.

use chrono::NaiveDate;
use rollcall_common::db::models::{AttendanceRecord, AttendanceStatus};
use rollcall_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Classified day for one student
#[derive(Debug, Clone)]
pub struct LedgerWrite<'a> {
    pub student_ref: &'a str,
    pub student_id: Option<i64>,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub section_id: Option<&'a str>,
    pub branch: Option<&'a str>,
    pub remarks: &'a str,
    pub period_count: i64,
}

/// Insert or replace the record keyed by (student, date)
pub async fn upsert_attendance(conn: &mut SqliteConnection, write: &LedgerWrite<'_>) -> Result<()> {
    let now = rollcall_common::time::now();

    sqlx::query(
        r#"
        INSERT INTO attendance_ledger
            (student_ref, student_id, attendance_date, status, section_id, branch, remarks,
             period_count, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (student_ref, attendance_date) DO UPDATE SET
            student_id = excluded.student_id,
            status = excluded.status,
            section_id = excluded.section_id,
            branch = excluded.branch,
            remarks = excluded.remarks,
            period_count = excluded.period_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(write.student_ref)
    .bind(write.student_id)
    .bind(write.date)
    .bind(write.status.as_str())
    .bind(write.section_id)
    .bind(write.branch)
    .bind(write.remarks)
    .bind(write.period_count)
    .bind(now)
    .bind(now)
    .execute(conn)
    .await?;

    Ok(())
}

fn record_from_row(row: &SqliteRow) -> Result<AttendanceRecord> {
    let status: String = row.try_get("status")?;

    Ok(AttendanceRecord {
        student_ref: row.try_get("student_ref")?,
        student_id: row.try_get("student_id")?,
        date: row.try_get("attendance_date")?,
        status: status.parse()?,
        section_id: row.try_get("section_id")?,
        branch: row.try_get("branch")?,
        remarks: row.try_get("remarks")?,
        period_count: row.try_get("period_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const RECORD_COLUMNS: &str = "student_ref, student_id, attendance_date, status, section_id, branch, \
                              remarks, period_count, created_at, updated_at";

pub async fn get_attendance(
    pool: &SqlitePool,
    student_ref: &str,
    date: NaiveDate,
) -> Result<Option<AttendanceRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM attendance_ledger WHERE student_ref = ? AND attendance_date = ?",
        RECORD_COLUMNS
    ))
    .bind(student_ref)
    .bind(date)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(record_from_row).transpose()
}

pub async fn list_for_date(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<AttendanceRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM attendance_ledger WHERE attendance_date = ? ORDER BY student_ref",
        RECORD_COLUMNS
    ))
    .bind(date)
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}
