//! Nightly trigger for reconciliation
//!
//! Sleeps until the configured local trigger time, reconciles that day and,
//! when `reconcile_catchup_days` is set, any earlier dates still holding
//! pending entries. Each trigger ends with the stale period row sweep.
//! Stops when the cancellation token fires.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rollcall_common::time::local_now;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{Reconciler, RunReport};
use crate::db::RunTrigger;
use crate::error::AttendanceError;

/// First occurrence of `at` strictly after `now`
pub fn next_fire_after(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + Duration::days(1)
    }
}

pub struct ReconciliationScheduler {
    reconciler: Arc<Reconciler>,
}

impl ReconciliationScheduler {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(&self, cancel: CancellationToken) {
        let trigger_time = self.reconciler.settings().trigger_time;

        loop {
            let now = local_now();
            let fire_at = next_fire_after(now, trigger_time);
            let wait = (fire_at - now).to_std().unwrap_or_default();

            info!(next_run = %fire_at, wait_secs = wait.as_secs(), "Next reconciliation scheduled");

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Reconciliation scheduler stopping");
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            self.fire(fire_at.date()).await;
        }
    }

    /// One scheduled trigger: catch-up dates oldest first, then `date`
    pub async fn fire(&self, date: NaiveDate) -> Vec<(NaiveDate, Result<RunReport, AttendanceError>)> {
        let mut results = Vec::new();

        let catchup_days = self.reconciler.settings().catchup_days;
        if catchup_days > 0 {
            let from = date - Duration::days(catchup_days);
            match self.reconciler.pending_dates(from, date).await {
                Ok(dates) => {
                    for earlier in dates {
                        let result = self.reconciler.run_for_date(earlier, RunTrigger::CatchUp).await;
                        results.push((earlier, result));
                    }
                }
                Err(e) => warn!(error = %e, "Catch-up sweep skipped"),
            }
        }

        let result = self.reconciler.run_for_date(date, RunTrigger::Scheduled).await;
        results.push((date, result));

        for (run_date, result) in &results {
            match result {
                Ok(report) if !report.deferred.is_empty() => warn!(
                    date = %run_date,
                    deferred = report.deferred.len(),
                    "Reconciliation left students pending"
                ),
                Ok(_) => {}
                Err(AttendanceError::SchedulingOverlap(_)) => {
                    info!(date = %run_date, "Trigger skipped, run already in progress")
                }
                Err(e) => error!(date = %run_date, error = %e, "Scheduled reconciliation failed"),
            }
        }

        if let Err(e) = self.reconciler.purge_stale_periods(date).await {
            warn!(error = %e, "Stale period sweep failed");
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(date: (i32, u32, u32), hms: (u32, u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(hms.0, hms.1, hms.2)
            .unwrap()
    }

    #[test]
    fn test_next_fire_same_day() {
        let trigger = NaiveTime::from_hms_opt(20, 0, 0).unwrap();
        assert_eq!(
            next_fire_after(at((2024, 3, 4), (8, 0, 0)), trigger),
            at((2024, 3, 4), (20, 0, 0))
        );
    }

    #[test]
    fn test_next_fire_rolls_to_tomorrow() {
        let trigger = NaiveTime::from_hms_opt(20, 0, 0).unwrap();
        assert_eq!(
            next_fire_after(at((2024, 3, 4), (20, 0, 0)), trigger),
            at((2024, 3, 5), (20, 0, 0))
        );
        assert_eq!(
            next_fire_after(at((2024, 12, 31), (23, 59, 59)), trigger),
            at((2025, 1, 1), (20, 0, 0))
        );
    }
}
