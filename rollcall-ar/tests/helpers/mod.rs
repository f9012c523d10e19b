//! Shared fixtures: a temp-file database seeded with a small student directory

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use rollcall_ar::config::AttendanceSettings;
use rollcall_ar::directory::{SqliteDirectory, StudentDirectory};
use rollcall_ar::AppState;
use rollcall_common::db::init_database;
use rollcall_common::db::models::StudentRecord;
use rollcall_common::{Error, Result};
use sqlx::SqlitePool;
use tempfile::TempDir;

pub const DAY: &str = "2024-03-04";

/// Start of a time inside each default period slot, in slot order
pub const PERIOD_SLOTS: [(&str, &str); 7] = [
    ("09:00-10:00", "09:05:00"),
    ("10:00-11:00", "10:05:00"),
    ("11:00-12:00", "11:05:00"),
    ("12:00-13:00", "12:05:00"),
    ("13:30-14:30", "13:35:00"),
    ("14:30-15:30", "14:35:00"),
    ("15:30-16:30", "15:35:00"),
];

pub struct TestEnv {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub state: AppState,
    pub directory_down: Arc<AtomicBool>,
}

impl TestEnv {
    /// Start failing student lookups for the students passed to `setup_with`
    pub fn break_directory(&self) {
        self.directory_down.store(true, Ordering::SeqCst);
    }
}

pub fn day() -> NaiveDate {
    NaiveDate::parse_from_str(DAY, "%Y-%m-%d").unwrap()
}

pub async fn seeded_pool() -> (TempDir, SqlitePool) {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("rollcall.db")).await.unwrap();

    for (i, reg) in ["S1", "S2", "S3", "S4"].iter().enumerate() {
        sqlx::query(
            "INSERT INTO students (registration_number, name, section_id, branch) VALUES (?, ?, ?, ?)",
        )
        .bind(reg)
        .bind(format!("Student {}", reg))
        .bind("CSE-A")
        .bind("CSE")
        .execute(&pool)
        .await
        .unwrap();

        sqlx::query("INSERT INTO biometric_templates (match_id, registration_number) VALUES (?, ?)")
            .bind(100 + i as i64)
            .bind(reg)
            .execute(&pool)
            .await
            .unwrap();

        sqlx::query("INSERT INTO rfid_cards (card_uid, registration_number) VALUES (?, ?)")
            .bind(format!("CARD{}", i + 1))
            .bind(reg)
            .execute(&pool)
            .await
            .unwrap();
    }

    (dir, pool)
}

pub async fn setup() -> TestEnv {
    setup_with(AttendanceSettings::default(), None).await
}

/// Build state with custom settings, optionally failing directory lookups for some students
pub async fn setup_with(settings: AttendanceSettings, failing: Option<&[&str]>) -> TestEnv {
    let (dir, pool) = seeded_pool().await;

    let sqlite = SqliteDirectory::new(pool.clone());
    let directory_down = Arc::new(AtomicBool::new(false));
    let directory: Arc<dyn StudentDirectory> = match failing {
        Some(students) => Arc::new(FlakyDirectory {
            inner: sqlite,
            failing: students.iter().map(|s| s.to_string()).collect(),
            down: directory_down.clone(),
        }),
        None => Arc::new(sqlite),
    };

    let state = AppState::new(pool.clone(), directory, settings);
    TestEnv {
        dir,
        pool,
        state,
        directory_down,
    }
}

/// Directory that errors on student lookups for selected registration numbers
///
/// Healthy until `down` is set, so scans can be ingested first. Lookups by
/// match id and card always work.
pub struct FlakyDirectory {
    pub inner: SqliteDirectory,
    pub failing: HashSet<String>,
    pub down: Arc<AtomicBool>,
}

#[async_trait]
impl StudentDirectory for FlakyDirectory {
    async fn resolve_student(&self, registration_number: &str) -> Result<Option<StudentRecord>> {
        if self.down.load(Ordering::SeqCst) && self.failing.contains(registration_number) {
            return Err(Error::Internal("directory unavailable".to_string()));
        }
        self.inner.resolve_student(registration_number).await
    }

    async fn resolve_biometric(&self, match_id: i64) -> Result<Option<String>> {
        self.inner.resolve_biometric(match_id).await
    }

    async fn resolve_card(&self, card_uid: &str) -> Result<Option<String>> {
        self.inner.resolve_card(card_uid).await
    }
}

/// Morning check-in straight into the log, bypassing the gateway
pub async fn log_morning(pool: &SqlitePool, student: &str, date: &str, time: &str) {
    sqlx::query(
        "INSERT INTO morning_presence (student_ref, scan_date, scan_time, confidence, arrival) VALUES (?, ?, ?, 120, 'ON_TIME')",
    )
    .bind(student)
    .bind(date)
    .bind(time)
    .execute(pool)
    .await
    .unwrap();
}

pub async fn check_in(env: &TestEnv, student: &str) {
    let outcome = env
        .state
        .gateway
        .ingest_morning_scan(student, DAY, "08:55:00", Some(120), Some("BIO-1"))
        .await;
    assert!(outcome.is_accepted(), "check-in rejected: {:?}", outcome);
}

/// Swipe into the first `n` periods of the day
pub async fn attend_periods(env: &TestEnv, student: &str, n: usize) {
    for (token, time) in PERIOD_SLOTS.iter().take(n) {
        let outcome = env
            .state
            .gateway
            .ingest_period_scan(student, DAY, token, time, Some("101"), Some("RFID-101"))
            .await;
        assert!(outcome.is_accepted(), "swipe rejected: {:?}", outcome);
    }
}

pub async fn count(pool: &SqlitePool, sql: &str, student: &str) -> i64 {
    sqlx::query_scalar(sql).bind(student).fetch_one(pool).await.unwrap()
}

pub async fn period_rows(pool: &SqlitePool, student: &str) -> i64 {
    count(pool, "SELECT COUNT(*) FROM period_presence WHERE student_ref = ?", student).await
}

pub async fn ledger_rows(pool: &SqlitePool, student: &str) -> i64 {
    count(pool, "SELECT COUNT(*) FROM attendance_ledger WHERE student_ref = ?", student).await
}

pub async fn is_processed(pool: &SqlitePool, student: &str) -> bool {
    count(pool, "SELECT processed FROM morning_presence WHERE student_ref = ?", student).await == 1
}
