//! Reconciliation run markers
//!
//! One row per date. Inserting the row closes the date to ingestion and
//! claims it for a single run; a RUNNING row with an unexpired lease blocks
//! any other run for the same date. The row carries the latest run's tallies.
//! Every completed run also appends its own report to
//! `reconciliation_run_reports`, so re-runs never erase earlier history.

use chrono::{DateTime, NaiveDate, Utc};
use rollcall_common::time::{epoch_millis, now};
use rollcall_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunTrigger {
    Scheduled,
    Manual,
    CatchUp,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "SCHEDULED",
            RunTrigger::Manual => "MANUAL",
            RunTrigger::CatchUp => "CATCH_UP",
        }
    }
}

impl std::str::FromStr for RunTrigger {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SCHEDULED" => Ok(RunTrigger::Scheduled),
            "MANUAL" => Ok(RunTrigger::Manual),
            "CATCH_UP" => Ok(RunTrigger::CatchUp),
            other => Err(Error::Internal(format!("Unknown run trigger: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Running,
    Completed,
}

/// Why a student was left for a later run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Lookup,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitFailure {
    pub student: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Final tallies written back onto the marker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTally {
    pub working_set: i64,
    pub present: i64,
    pub half_day: i64,
    pub absent: i64,
    pub failures: Vec<UnitFailure>,
}

/// Stored marker and report for one date
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMarker {
    pub run_date: NaiveDate,
    pub run_id: String,
    pub state: RunState,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lease_expires_at_ms: i64,
    pub working_set: i64,
    pub present: i64,
    pub half_day: i64,
    pub absent: i64,
    pub deferred: i64,
    pub failures: Vec<UnitFailure>,
}

/// Report of one finished run, as kept in the history table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHistoryEntry {
    pub run_id: String,
    pub run_date: NaiveDate,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub working_set: i64,
    pub present: i64,
    pub half_day: i64,
    pub absent: i64,
    pub deferred: i64,
    pub failures: Vec<UnitFailure>,
}

fn decode_failures(row: &SqliteRow) -> Result<Vec<UnitFailure>> {
    let failures: String = row.try_get("failures")?;
    serde_json::from_str(&failures)
        .map_err(|e| Error::Internal(format!("Corrupt run failures: {}", e)))
}

/// Claim `date` for a run
///
/// Returns false when another run holds an unexpired RUNNING marker.
/// A COMPLETED marker is reclaimed so deferred students can be retried.
pub async fn try_acquire(
    pool: &SqlitePool,
    date: NaiveDate,
    run_id: &str,
    trigger: RunTrigger,
    lease_secs: i64,
) -> Result<bool> {
    let now_ms = epoch_millis();
    let lease_expires_at_ms = now_ms + lease_secs * 1000;

    let result = sqlx::query(
        r#"
        INSERT INTO reconciliation_runs
            (run_date, run_id, state, trigger, started_at, lease_expires_at_ms)
        VALUES (?, ?, 'RUNNING', ?, ?, ?)
        ON CONFLICT (run_date) DO UPDATE SET
            run_id = excluded.run_id,
            state = 'RUNNING',
            trigger = excluded.trigger,
            started_at = excluded.started_at,
            finished_at = NULL,
            lease_expires_at_ms = excluded.lease_expires_at_ms,
            working_set = 0,
            present = 0,
            half_day = 0,
            absent = 0,
            deferred = 0,
            failures = '[]'
        WHERE reconciliation_runs.state <> 'RUNNING'
           OR reconciliation_runs.lease_expires_at_ms < ?
        "#,
    )
    .bind(date)
    .bind(run_id)
    .bind(trigger.as_str())
    .bind(now())
    .bind(lease_expires_at_ms)
    .bind(now_ms)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark the run finished, store its tallies and append it to the history
///
/// Returns false if the marker was taken over by another run in the meantime;
/// nothing is written in that case.
pub async fn complete(pool: &SqlitePool, date: NaiveDate, run_id: &str, tally: &RunTally) -> Result<bool> {
    let failures = serde_json::to_string(&tally.failures)
        .map_err(|e| Error::Internal(format!("Failed to encode run failures: {}", e)))?;

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE reconciliation_runs SET
            state = 'COMPLETED',
            finished_at = ?,
            working_set = ?,
            present = ?,
            half_day = ?,
            absent = ?,
            deferred = ?,
            failures = ?
        WHERE run_date = ? AND run_id = ?
        "#,
    )
    .bind(now())
    .bind(tally.working_set)
    .bind(tally.present)
    .bind(tally.half_day)
    .bind(tally.absent)
    .bind(tally.failures.len() as i64)
    .bind(failures)
    .bind(date)
    .bind(run_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() != 1 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO reconciliation_run_reports
            (run_id, run_date, trigger, started_at, finished_at,
             working_set, present, half_day, absent, deferred, failures)
        SELECT run_id, run_date, trigger, started_at, finished_at,
               working_set, present, half_day, absent, deferred, failures
        FROM reconciliation_runs
        WHERE run_date = ? AND run_id = ?
        "#,
    )
    .bind(date)
    .bind(run_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Every finished run for `date`, oldest first
pub async fn list_history(pool: &SqlitePool, date: NaiveDate) -> Result<Vec<RunHistoryEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT run_id, run_date, trigger, started_at, finished_at,
               working_set, present, half_day, absent, deferred, failures
        FROM reconciliation_run_reports
        WHERE run_date = ?
        ORDER BY started_at, finished_at
        "#,
    )
    .bind(date)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<RunHistoryEntry> {
            let trigger: String = row.try_get("trigger")?;
            Ok(RunHistoryEntry {
                run_id: row.try_get("run_id")?,
                run_date: row.try_get("run_date")?,
                trigger: trigger.parse()?,
                started_at: row.try_get("started_at")?,
                finished_at: row.try_get("finished_at")?,
                working_set: row.try_get("working_set")?,
                present: row.try_get("present")?,
                half_day: row.try_get("half_day")?,
                absent: row.try_get("absent")?,
                deferred: row.try_get("deferred")?,
                failures: decode_failures(row)?,
            })
        })
        .collect()
}

pub async fn get_run(pool: &SqlitePool, date: NaiveDate) -> Result<Option<RunMarker>> {
    let row = sqlx::query(
        r#"
        SELECT run_date, run_id, state, trigger, started_at, finished_at, lease_expires_at_ms,
               working_set, present, half_day, absent, deferred, failures
        FROM reconciliation_runs
        WHERE run_date = ?
        "#,
    )
    .bind(date)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let state: String = row.try_get("state")?;
    let trigger: String = row.try_get("trigger")?;

    Ok(Some(RunMarker {
        run_date: row.try_get("run_date")?,
        run_id: row.try_get("run_id")?,
        state: match state.as_str() {
            "RUNNING" => RunState::Running,
            _ => RunState::Completed,
        },
        trigger: trigger.parse()?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        lease_expires_at_ms: row.try_get("lease_expires_at_ms")?,
        working_set: row.try_get("working_set")?,
        present: row.try_get("present")?,
        half_day: row.try_get("half_day")?,
        absent: row.try_get("absent")?,
        deferred: row.try_get("deferred")?,
        failures: decode_failures(&row)?,
    }))
}

/// A date accepts scans until its first run marker is written
pub async fn is_date_open(pool: &SqlitePool, date: NaiveDate) -> Result<bool> {
    let exists: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM reconciliation_runs WHERE run_date = ?")
            .bind(date)
            .fetch_optional(pool)
            .await?;

    Ok(exists.is_none())
}
