//! Nightly reconciliation
//!
//! Folds the transient presence logs for one date into the attendance
//! ledger. The working set is every unprocessed morning entry for the date.
//! Each student is an independent unit: count distinct periods, classify,
//! resolve directory references, then in a single transaction upsert the
//! ledger record, purge the student's period rows and flag the morning
//! entry processed. A unit that fails is left untouched for a later run and
//! never affects the other students.

pub mod scheduler;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use rollcall_common::db::models::{
    ArrivalStatus, AttendanceStatus, MorningPresenceEntry, StudentRecord,
};
use rollcall_common::db::retry_on_lock;
use rollcall_common::time::now;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{AttendanceSettings, ConfidenceBuckets, Thresholds};
use crate::db::ledger::{self, LedgerWrite};
use crate::db::runs::{self, FailureKind, RunTally, RunTrigger, UnitFailure};
use crate::db::{morning_log, period_log};
use crate::directory::StudentDirectory;
use crate::error::AttendanceError;

pub use scheduler::{next_fire_after, ReconciliationScheduler};

/// Map a distinct period count to a daily status
pub fn classify(period_count: i64, thresholds: &Thresholds) -> AttendanceStatus {
    thresholds.classify(period_count)
}

/// Outcome of one reconciliation run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub run_date: NaiveDate,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub working_set: usize,
    pub present: usize,
    pub half_day: usize,
    pub absent: usize,
    /// Students left pending, retried by the next run for the date
    pub deferred: Vec<UnitFailure>,
}

impl RunReport {
    pub fn committed(&self) -> usize {
        self.present + self.half_day + self.absent
    }
}

enum UnitOutcome {
    Committed(AttendanceStatus),
    Deferred(UnitFailure),
}

fn deferred(student: &str, kind: FailureKind, message: impl Into<String>) -> UnitOutcome {
    UnitOutcome::Deferred(UnitFailure {
        student: student.to_string(),
        kind,
        message: message.into(),
    })
}

/// Human-readable remarks stored on the ledger record
pub fn build_remarks(
    entry: &MorningPresenceEntry,
    period_count: i64,
    buckets: &ConfidenceBuckets,
) -> String {
    format!(
        "Morning: {} at {}; periods: {}; confidence: {}",
        entry.arrival.as_str(),
        entry.scan_time.format("%H:%M:%S"),
        period_count,
        buckets.level(entry.confidence).as_str()
    )
}

/// Position of a student's day in the ingestion/reconciliation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceState {
    Unscanned,
    MorningScanned,
    Cleaned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceView {
    pub student: String,
    pub date: NaiveDate,
    pub state: PresenceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arrival: Option<ArrivalStatus>,
    /// Logged periods while pending, ledger count once cleaned
    pub period_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,
}

pub struct Reconciler {
    db: SqlitePool,
    directory: Arc<dyn StudentDirectory>,
    settings: Arc<AttendanceSettings>,
}

impl Reconciler {
    pub fn new(
        db: SqlitePool,
        directory: Arc<dyn StudentDirectory>,
        settings: Arc<AttendanceSettings>,
    ) -> Self {
        Self {
            db,
            directory,
            settings,
        }
    }

    pub fn settings(&self) -> &AttendanceSettings {
        &self.settings
    }

    /// Reconcile one date
    ///
    /// Fails with [`AttendanceError::SchedulingOverlap`] when another run holds
    /// the date. Per-student failures do not fail the run; they are listed in
    /// the report and the affected entries stay pending.
    pub async fn run_for_date(
        &self,
        date: NaiveDate,
        trigger: RunTrigger,
    ) -> Result<RunReport, AttendanceError> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = now();
        let max_wait = self.settings.max_lock_wait_ms;

        let acquired = retry_on_lock("run marker acquire", max_wait, || {
            runs::try_acquire(&self.db, date, &run_id, trigger, self.settings.lease_secs)
        })
        .await?;

        if !acquired {
            warn!(date = %date, trigger = trigger.as_str(), "Reconciliation already running, skipping");
            return Err(AttendanceError::SchedulingOverlap(date));
        }

        info!(run_id = %run_id, date = %date, trigger = trigger.as_str(), "Reconciliation started");

        let entries = match morning_log::pending_for_date(&self.db, date).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(run_id = %run_id, date = %date, error = %e, "Failed to load working set");
                if let Err(release_err) =
                    runs::complete(&self.db, date, &run_id, &RunTally::default()).await
                {
                    error!(run_id = %run_id, error = %release_err, "Failed to release run marker");
                }
                return Err(e.into());
            }
        };

        let working_set = entries.len();
        let outcomes: Vec<UnitOutcome> = stream::iter(entries)
            .map(|entry| async move { self.reconcile_student(&entry).await })
            .buffer_unordered(self.settings.parallelism.max(1))
            .collect()
            .await;

        let mut report = RunReport {
            run_id: run_id.clone(),
            run_date: date,
            trigger,
            started_at,
            finished_at: started_at,
            working_set,
            present: 0,
            half_day: 0,
            absent: 0,
            deferred: Vec::new(),
        };

        for outcome in outcomes {
            match outcome {
                UnitOutcome::Committed(AttendanceStatus::Present) => report.present += 1,
                UnitOutcome::Committed(AttendanceStatus::HalfDay) => report.half_day += 1,
                UnitOutcome::Committed(AttendanceStatus::Absent) => report.absent += 1,
                UnitOutcome::Deferred(failure) => report.deferred.push(failure),
            }
        }
        report.deferred.sort_by(|a, b| a.student.cmp(&b.student));

        let tally = RunTally {
            working_set: working_set as i64,
            present: report.present as i64,
            half_day: report.half_day as i64,
            absent: report.absent as i64,
            failures: report.deferred.clone(),
        };

        let completed = retry_on_lock("run marker complete", max_wait, || {
            runs::complete(&self.db, date, &run_id, &tally)
        })
        .await?;

        if !completed {
            warn!(run_id = %run_id, date = %date, "Run marker was taken over before completion");
        }

        report.finished_at = now();

        info!(
            run_id = %run_id,
            date = %date,
            working_set,
            present = report.present,
            half_day = report.half_day,
            absent = report.absent,
            deferred = report.deferred.len(),
            "Reconciliation finished"
        );

        Ok(report)
    }

    async fn reconcile_student(&self, entry: &MorningPresenceEntry) -> UnitOutcome {
        let student_ref = entry.student_ref.as_str();
        let date = entry.scan_date;

        let period_count =
            match period_log::count_distinct_periods(&self.db, student_ref, date).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(student = student_ref, date = %date, error = %e, "Period count failed");
                    return deferred(student_ref, FailureKind::Persistence, e.to_string());
                }
            };

        let status = classify(period_count, &self.settings.thresholds);

        let student = match self.directory.resolve_student(student_ref).await {
            Ok(Some(student)) => student,
            Ok(None) => {
                warn!(student = student_ref, date = %date, "Student missing from directory");
                return deferred(student_ref, FailureKind::Lookup, "student not found in directory");
            }
            Err(e) => {
                warn!(student = student_ref, date = %date, error = %e, "Directory lookup failed");
                return deferred(student_ref, FailureKind::Lookup, e.to_string());
            }
        };

        let remarks = build_remarks(entry, period_count, &self.settings.confidence);

        let committed = retry_on_lock("reconcile student", self.settings.max_lock_wait_ms, || {
            self.commit_unit(entry, &student, status, period_count, &remarks)
        })
        .await;

        match committed {
            Ok(()) => UnitOutcome::Committed(status),
            Err(e) => {
                error!(student = student_ref, date = %date, error = %e, "Ledger commit failed");
                deferred(student_ref, FailureKind::Persistence, e.to_string())
            }
        }
    }

    async fn commit_unit(
        &self,
        entry: &MorningPresenceEntry,
        student: &StudentRecord,
        status: AttendanceStatus,
        period_count: i64,
        remarks: &str,
    ) -> rollcall_common::Result<()> {
        let write = LedgerWrite {
            student_ref: &entry.student_ref,
            student_id: Some(student.id),
            date: entry.scan_date,
            status,
            section_id: student.section_id.as_deref(),
            branch: student.branch.as_deref(),
            remarks,
            period_count,
        };

        let mut tx = self.db.begin().await?;
        ledger::upsert_attendance(&mut *tx, &write).await?;
        period_log::purge_for_student(&mut *tx, &entry.student_ref, entry.scan_date).await?;
        morning_log::mark_processed(&mut *tx, entry.id).await?;
        tx.commit().await?;

        Ok(())
    }

    /// Drop leftover period rows on closed dates older than the retention window
    pub async fn purge_stale_periods(&self, today: NaiveDate) -> Result<u64, AttendanceError> {
        let days = self.settings.period_retention_days;
        if days == 0 {
            return Ok(0);
        }

        let before = today - chrono::Duration::days(days);
        let purged = retry_on_lock("stale period purge", self.settings.max_lock_wait_ms, || {
            period_log::purge_stale(&self.db, before)
        })
        .await?;

        if purged > 0 {
            info!(before = %before, purged, "Purged period rows with no morning entry");
        }
        Ok(purged)
    }

    /// Earlier dates in `[from, until)` that still have pending morning entries
    pub async fn pending_dates(
        &self,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<NaiveDate>, AttendanceError> {
        Ok(morning_log::pending_dates(&self.db, from, until).await?)
    }

    pub async fn presence_state(
        &self,
        student_ref: &str,
        date: NaiveDate,
    ) -> Result<PresenceView, AttendanceError> {
        let morning = morning_log::get_entry(&self.db, student_ref, date).await?;
        let record = ledger::get_attendance(&self.db, student_ref, date).await?;

        let view = match (morning, record) {
            (Some(entry), _) if !entry.processed => PresenceView {
                student: student_ref.to_string(),
                date,
                state: PresenceState::MorningScanned,
                arrival: Some(entry.arrival),
                period_count: period_log::count_distinct_periods(&self.db, student_ref, date)
                    .await?,
                status: None,
            },
            (morning, Some(record)) => PresenceView {
                student: student_ref.to_string(),
                date,
                state: PresenceState::Cleaned,
                arrival: morning.map(|m| m.arrival),
                period_count: record.period_count,
                status: Some(record.status),
            },
            (_, None) => PresenceView {
                student: student_ref.to_string(),
                date,
                state: PresenceState::Unscanned,
                arrival: None,
                period_count: 0,
                status: None,
            },
        };

        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn test_classify_with_custom_thresholds() {
        let thresholds = Thresholds::new(5, 2).unwrap();
        assert_eq!(classify(5, &thresholds), AttendanceStatus::Present);
        assert_eq!(classify(2, &thresholds), AttendanceStatus::HalfDay);
        assert_eq!(classify(1, &thresholds), AttendanceStatus::Absent);
    }

    #[test]
    fn test_remarks_format() {
        let entry = MorningPresenceEntry {
            id: 1,
            student_ref: "21BCE1001".to_string(),
            scan_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            scan_time: NaiveTime::from_hms_opt(9, 12, 30).unwrap(),
            confidence: 72,
            arrival: ArrivalStatus::Late,
            device_id: None,
            scan_count: 1,
            processed: false,
        };

        assert_eq!(
            build_remarks(&entry, 5, &ConfidenceBuckets::default()),
            "Morning: LATE at 09:12:30; periods: 5; confidence: MEDIUM"
        );
    }
}
