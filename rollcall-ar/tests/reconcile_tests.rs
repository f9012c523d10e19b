//! Nightly reconciliation: classification, cleanup, idempotence and isolation

mod helpers;

use chrono::Duration;
use helpers::*;
use rollcall_ar::config::AttendanceSettings;
use rollcall_ar::db::ledger::LedgerWrite;
use rollcall_ar::db::{ledger, morning_log, period_log, runs, RunState, RunTrigger};
use rollcall_ar::reconcile::{PresenceState, ReconciliationScheduler};
use rollcall_ar::AttendanceError;
use rollcall_common::db::models::AttendanceStatus;
use rollcall_common::time::epoch_millis;

#[tokio::test]
async fn test_end_to_end_classification() {
    let env = setup().await;

    // S1 full day, S2 partial, S3 mostly absent
    for (student, periods) in [("S1", 7), ("S2", 5), ("S3", 2)] {
        check_in(&env, student).await;
        attend_periods(&env, student, periods).await;
    }
    // S4 swiped into classes without a morning check-in
    attend_periods(&env, "S4", 3).await;

    let report = env
        .state
        .reconciler
        .run_for_date(day(), RunTrigger::Manual)
        .await
        .unwrap();

    assert_eq!(report.working_set, 3);
    assert_eq!((report.present, report.half_day, report.absent), (1, 1, 1));
    assert!(report.deferred.is_empty());

    let expected = [
        ("S1", AttendanceStatus::Present, 7),
        ("S2", AttendanceStatus::HalfDay, 5),
        ("S3", AttendanceStatus::Absent, 2),
    ];
    for (student, status, periods) in expected {
        let record = ledger::get_attendance(&env.pool, student, day())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, status, "{}", student);
        assert_eq!(record.period_count, periods);
        assert_eq!(record.section_id.as_deref(), Some("CSE-A"));
        assert_eq!(record.branch.as_deref(), Some("CSE"));
        assert!(record.student_id.is_some());
        assert_eq!(period_rows(&env.pool, student).await, 0);
        assert!(is_processed(&env.pool, student).await);
    }

    let s1 = ledger::get_attendance(&env.pool, "S1", day()).await.unwrap().unwrap();
    assert_eq!(s1.remarks, "Morning: ON_TIME at 08:55:00; periods: 7; confidence: HIGH");

    // No morning scan, no ledger record; swipes stay in the log
    assert_eq!(ledger_rows(&env.pool, "S4").await, 0);
    assert_eq!(period_rows(&env.pool, "S4").await, 3);
}

#[tokio::test]
async fn test_threshold_boundaries() {
    let env = setup().await;
    let day = day();

    let cases = [
        (0, AttendanceStatus::Absent),
        (3, AttendanceStatus::Absent),
        (4, AttendanceStatus::HalfDay),
        (6, AttendanceStatus::HalfDay),
        (7, AttendanceStatus::Present),
    ];

    for (i, (periods, _)) in cases.iter().enumerate() {
        let student = format!("B{}", i);
        sqlx::query("INSERT INTO students (registration_number, section_id) VALUES (?, 'CSE-B')")
            .bind(&student)
            .execute(&env.pool)
            .await
            .unwrap();
        check_in(&env, &student).await;
        attend_periods(&env, &student, *periods).await;
    }

    env.state
        .reconciler
        .run_for_date(day, RunTrigger::Manual)
        .await
        .unwrap();

    for (i, (_, status)) in cases.iter().enumerate() {
        let record = ledger::get_attendance(&env.pool, &format!("B{}", i), day)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, *status);
    }
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let env = setup().await;
    check_in(&env, "S1").await;
    attend_periods(&env, "S1", 4).await;

    let first = env
        .state
        .reconciler
        .run_for_date(day(), RunTrigger::Scheduled)
        .await
        .unwrap();
    assert_eq!(first.half_day, 1);
    let before = ledger::get_attendance(&env.pool, "S1", day()).await.unwrap().unwrap();

    let second = env
        .state
        .reconciler
        .run_for_date(day(), RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(second.working_set, 0);
    assert_eq!(second.committed(), 0);

    let after = ledger::get_attendance(&env.pool, "S1", day()).await.unwrap().unwrap();
    assert_eq!(ledger_rows(&env.pool, "S1").await, 1);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_failed_student_does_not_block_others() {
    let env = setup_with(AttendanceSettings::default(), Some(&["S2"])).await;

    for student in ["S1", "S2", "S3"] {
        check_in(&env, student).await;
        attend_periods(&env, student, 7).await;
    }
    env.break_directory();

    let report = env
        .state
        .reconciler
        .run_for_date(day(), RunTrigger::Manual)
        .await
        .unwrap();

    assert_eq!(report.working_set, 3);
    assert_eq!(report.present, 2);
    assert_eq!(report.deferred.len(), 1);
    assert_eq!(report.deferred[0].student, "S2");

    assert_eq!(ledger_rows(&env.pool, "S1").await, 1);
    assert_eq!(ledger_rows(&env.pool, "S3").await, 1);

    // S2 left exactly as it was
    assert_eq!(ledger_rows(&env.pool, "S2").await, 0);
    assert_eq!(period_rows(&env.pool, "S2").await, 7);
    assert!(!is_processed(&env.pool, "S2").await);

    let marker = runs::get_run(&env.pool, day()).await.unwrap().unwrap();
    assert_eq!(marker.state, RunState::Completed);
    assert_eq!(marker.deferred, 1);
    assert_eq!(marker.failures[0].student, "S2");
}

#[tokio::test]
async fn test_deferred_student_completed_by_later_run() {
    let env = setup_with(AttendanceSettings::default(), Some(&["S2"])).await;
    check_in(&env, "S2").await;
    attend_periods(&env, "S2", 5).await;
    env.break_directory();

    let report = env
        .state
        .reconciler
        .run_for_date(day(), RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(report.deferred.len(), 1);

    // Directory recovers; a fresh state over the same database finishes the job
    let healthy = rollcall_ar::AppState::new(
        env.pool.clone(),
        std::sync::Arc::new(rollcall_ar::directory::SqliteDirectory::new(env.pool.clone())),
        AttendanceSettings::default(),
    );
    let retry = healthy
        .reconciler
        .run_for_date(day(), RunTrigger::Manual)
        .await
        .unwrap();

    assert_eq!(retry.half_day, 1);
    assert_eq!(period_rows(&env.pool, "S2").await, 0);
    assert!(is_processed(&env.pool, "S2").await);
}

#[tokio::test]
async fn test_overlapping_run_refused() {
    let env = setup().await;
    check_in(&env, "S1").await;

    let held = runs::try_acquire(&env.pool, day(), "other-run", RunTrigger::Scheduled, 600)
        .await
        .unwrap();
    assert!(held);

    let result = env
        .state
        .reconciler
        .run_for_date(day(), RunTrigger::Manual)
        .await;
    assert!(matches!(result, Err(AttendanceError::SchedulingOverlap(d)) if d == day()));

    // Nothing was processed by the refused run
    assert!(!is_processed(&env.pool, "S1").await);
    assert_eq!(ledger_rows(&env.pool, "S1").await, 0);
}

#[tokio::test]
async fn test_expired_lease_is_taken_over() {
    let env = setup().await;
    check_in(&env, "S1").await;

    runs::try_acquire(&env.pool, day(), "crashed-run", RunTrigger::Scheduled, 600)
        .await
        .unwrap();
    sqlx::query("UPDATE reconciliation_runs SET lease_expires_at_ms = ? WHERE run_date = ?")
        .bind(epoch_millis() - 1_000)
        .bind(day())
        .execute(&env.pool)
        .await
        .unwrap();

    let report = env
        .state
        .reconciler
        .run_for_date(day(), RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(report.working_set, 1);

    let marker = runs::get_run(&env.pool, day()).await.unwrap().unwrap();
    assert_eq!(marker.run_id, report.run_id);
    assert_eq!(marker.trigger, RunTrigger::Manual);
}

#[tokio::test]
async fn test_concurrent_runs_single_flight() {
    let env = setup().await;
    for student in ["S1", "S2", "S3", "S4"] {
        check_in(&env, student).await;
        attend_periods(&env, student, 4).await;
    }

    let reconciler = env.state.reconciler.clone();
    let (a, b) = tokio::join!(
        reconciler.run_for_date(day(), RunTrigger::Scheduled),
        reconciler.run_for_date(day(), RunTrigger::Manual)
    );

    let committed: usize = [a, b]
        .into_iter()
        .filter_map(Result::ok)
        .map(|report| report.committed())
        .sum();
    assert_eq!(committed, 4);

    for student in ["S1", "S2", "S3", "S4"] {
        assert_eq!(ledger_rows(&env.pool, student).await, 1);
    }
}

#[tokio::test]
async fn test_scheduler_fire_sweeps_earlier_dates() {
    let settings = AttendanceSettings {
        catchup_days: 3,
        ..AttendanceSettings::default()
    };
    let env = setup_with(settings, None).await;

    let yesterday = day() - Duration::days(1);
    log_morning(&env.pool, "S1", &yesterday.to_string(), "08:30:00").await;
    check_in(&env, "S2").await;

    let scheduler = ReconciliationScheduler::new(env.state.reconciler.clone());
    let results = scheduler.fire(day()).await;

    let dates: Vec<_> = results.iter().map(|(d, _)| *d).collect();
    assert_eq!(dates, vec![yesterday, day()]);
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    let catch_up = runs::get_run(&env.pool, yesterday).await.unwrap().unwrap();
    assert_eq!(catch_up.trigger, RunTrigger::CatchUp);
    assert!(ledger::get_attendance(&env.pool, "S1", yesterday).await.unwrap().is_some());
    assert!(ledger::get_attendance(&env.pool, "S2", day()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_presence_state_transitions() {
    let env = setup().await;
    let reconciler = &env.state.reconciler;

    let view = reconciler.presence_state("S1", day()).await.unwrap();
    assert_eq!(view.state, PresenceState::Unscanned);

    check_in(&env, "S1").await;
    attend_periods(&env, "S1", 2).await;
    let view = reconciler.presence_state("S1", day()).await.unwrap();
    assert_eq!(view.state, PresenceState::MorningScanned);
    assert_eq!(view.period_count, 2);

    reconciler.run_for_date(day(), RunTrigger::Manual).await.unwrap();
    let view = reconciler.presence_state("S1", day()).await.unwrap();
    assert_eq!(view.state, PresenceState::Cleaned);
    assert_eq!(view.status, Some(AttendanceStatus::Absent));
    assert_eq!(view.period_count, 2);

    assert!(morning_log::pending_for_date(&env.pool, day()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rerun_keeps_earlier_report() {
    let env = setup().await;
    for student in ["S1", "S2", "S3"] {
        check_in(&env, student).await;
        attend_periods(&env, student, 7).await;
    }

    let first = env
        .state
        .reconciler
        .run_for_date(day(), RunTrigger::Scheduled)
        .await
        .unwrap();
    let second = env
        .state
        .reconciler
        .run_for_date(day(), RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(second.working_set, 0);

    let history = runs::list_history(&env.pool, day()).await.unwrap();
    assert_eq!(history.len(), 2);

    assert_eq!(history[0].run_id, first.run_id);
    assert_eq!(history[0].trigger, RunTrigger::Scheduled);
    assert_eq!(history[0].working_set, 3);
    assert_eq!(history[0].present, 3);

    assert_eq!(history[1].run_id, second.run_id);
    assert_eq!(history[1].trigger, RunTrigger::Manual);
    assert_eq!(history[1].working_set, 0);

    // The marker itself reflects the latest run
    let marker = runs::get_run(&env.pool, day()).await.unwrap().unwrap();
    assert_eq!(marker.run_id, second.run_id);
}

#[tokio::test]
async fn test_taken_over_run_writes_no_history() {
    let env = setup().await;

    runs::try_acquire(&env.pool, day(), "stale-run", RunTrigger::Scheduled, 600)
        .await
        .unwrap();
    sqlx::query("UPDATE reconciliation_runs SET run_id = 'newer-run' WHERE run_date = ?")
        .bind(day())
        .execute(&env.pool)
        .await
        .unwrap();

    let completed = runs::complete(&env.pool, day(), "stale-run", &Default::default())
        .await
        .unwrap();
    assert!(!completed);
    assert!(runs::list_history(&env.pool, day()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ledger_upsert_replaces_record() {
    let env = setup().await;
    let mut conn = env.pool.acquire().await.unwrap();

    let mut write = LedgerWrite {
        student_ref: "S1",
        student_id: Some(1),
        date: day(),
        status: AttendanceStatus::HalfDay,
        section_id: Some("CSE-A"),
        branch: Some("CSE"),
        remarks: "first pass",
        period_count: 4,
    };
    ledger::upsert_attendance(&mut *conn, &write).await.unwrap();
    let original = ledger::get_attendance(&env.pool, "S1", day()).await.unwrap().unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    write.status = AttendanceStatus::Present;
    write.remarks = "second pass";
    write.period_count = 7;
    write.section_id = Some("CSE-B");
    ledger::upsert_attendance(&mut *conn, &write).await.unwrap();
    drop(conn);

    let replaced = ledger::get_attendance(&env.pool, "S1", day()).await.unwrap().unwrap();
    assert_eq!(ledger_rows(&env.pool, "S1").await, 1);
    assert_eq!(replaced.status, AttendanceStatus::Present);
    assert_eq!(replaced.remarks, "second pass");
    assert_eq!(replaced.period_count, 7);
    assert_eq!(replaced.section_id.as_deref(), Some("CSE-B"));
    assert_eq!(replaced.created_at, original.created_at);
    assert!(replaced.updated_at > original.updated_at);
}

#[tokio::test]
async fn test_stale_period_rows_purged_after_retention() {
    let settings = AttendanceSettings {
        period_retention_days: 7,
        ..AttendanceSettings::default()
    };
    let env = setup_with(settings, Some(&["S2"])).await;

    // S4 swiped without a morning scan; S2 has a morning scan but is deferred
    attend_periods(&env, "S4", 3).await;
    check_in(&env, "S2").await;
    attend_periods(&env, "S2", 2).await;
    env.break_directory();

    let report = env
        .state
        .reconciler
        .run_for_date(day(), RunTrigger::Manual)
        .await
        .unwrap();
    assert_eq!(report.deferred.len(), 1);

    // Inside the window nothing is touched
    let purged = env
        .state
        .reconciler
        .purge_stale_periods(day() + Duration::days(7))
        .await
        .unwrap();
    assert_eq!(purged, 0);
    assert_eq!(period_rows(&env.pool, "S4").await, 3);

    let purged = env
        .state
        .reconciler
        .purge_stale_periods(day() + Duration::days(8))
        .await
        .unwrap();
    assert_eq!(purged, 3);
    assert_eq!(period_rows(&env.pool, "S4").await, 0);
    assert_eq!(period_rows(&env.pool, "S2").await, 2);
}

#[tokio::test]
async fn test_open_dates_keep_period_rows() {
    let env = setup().await;
    attend_periods(&env, "S4", 2).await;

    let purged = period_log::purge_stale(&env.pool, day() + Duration::days(30))
        .await
        .unwrap();
    assert_eq!(purged, 0);
    assert_eq!(period_rows(&env.pool, "S4").await, 2);

    let disabled = rollcall_ar::AppState::new(
        env.pool.clone(),
        std::sync::Arc::new(rollcall_ar::directory::SqliteDirectory::new(env.pool.clone())),
        AttendanceSettings {
            period_retention_days: 0,
            ..AttendanceSettings::default()
        },
    );
    disabled
        .reconciler
        .run_for_date(day(), RunTrigger::Manual)
        .await
        .unwrap();
    let purged = disabled
        .reconciler
        .purge_stale_periods(day() + Duration::days(365))
        .await
        .unwrap();
    assert_eq!(purged, 0);
    assert_eq!(period_rows(&env.pool, "S4").await, 2);
}
