//! Runtime attendance settings
//!
//! Loaded once from the `settings` table at startup and handed to the
//! ingestion gateway and the reconciler as an explicit, validated object.
//!
//! **Error Handling:**
//! - Missing parameters: use compiled defaults
//! - Invalid values: return error (fail-fast on misconfiguration)

use chrono::{Duration, NaiveTime};
use rollcall_common::db::get_setting;
use rollcall_common::db::models::AttendanceStatus;
use rollcall_common::time::parse_time;
use rollcall_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

/// Period-count thresholds for daily classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    /// Minimum distinct periods for PRESENT
    pub present: i64,
    /// Minimum distinct periods for HALF_DAY
    pub half_day: i64,
}

impl Thresholds {
    pub fn new(present: i64, half_day: i64) -> Result<Self> {
        if half_day < 0 || present < 0 {
            return Err(Error::Config(format!(
                "Thresholds must be non-negative (present={}, half_day={})",
                present, half_day
            )));
        }
        if half_day > present {
            return Err(Error::Config(format!(
                "threshold_half_day_periods ({}) exceeds threshold_present_periods ({})",
                half_day, present
            )));
        }
        Ok(Self { present, half_day })
    }

    /// Map a distinct period count to a status
    pub fn classify(&self, period_count: i64) -> AttendanceStatus {
        if period_count >= self.present {
            AttendanceStatus::Present
        } else if period_count >= self.half_day {
            AttendanceStatus::HalfDay
        } else {
            AttendanceStatus::Absent
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            present: 7,
            half_day: 4,
        }
    }
}

/// One class period; `label` is the period token stored in the period log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodSlot {
    pub label: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl PeriodSlot {
    /// Half-open containment: `start <= time < end`
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }
}

#[derive(Deserialize)]
struct RawSlot {
    label: String,
    start: String,
    end: String,
}

/// Ordered, non-overlapping class period schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodSchedule {
    slots: Vec<PeriodSlot>,
}

impl PeriodSchedule {
    pub fn new(mut slots: Vec<PeriodSlot>) -> Result<Self> {
        slots.sort_by_key(|slot| slot.start);

        for slot in &slots {
            if slot.label.trim().is_empty() {
                return Err(Error::Config("Period slot with empty label".to_string()));
            }
            if slot.start >= slot.end {
                return Err(Error::Config(format!(
                    "Period slot {} ends before it starts",
                    slot.label
                )));
            }
        }

        for pair in slots.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(Error::Config(format!(
                    "Period slots {} and {} overlap",
                    pair[0].label, pair[1].label
                )));
            }
        }

        let mut labels: Vec<&str> = slots.iter().map(|s| s.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        if labels.len() != slots.len() {
            return Err(Error::Config("Duplicate period slot label".to_string()));
        }

        Ok(Self { slots })
    }

    /// Parse the `period_slots` JSON setting
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: Vec<RawSlot> = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Invalid period_slots: {}", e)))?;

        let slots = raw
            .into_iter()
            .map(|r| {
                let start = parse_time(&r.start).ok_or_else(|| {
                    Error::Config(format!("Invalid start time for slot {}: {}", r.label, r.start))
                })?;
                let end = parse_time(&r.end).ok_or_else(|| {
                    Error::Config(format!("Invalid end time for slot {}: {}", r.label, r.end))
                })?;
                Ok(PeriodSlot {
                    label: r.label,
                    start,
                    end,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(slots)
    }

    /// Period covering `time`, if any
    pub fn slot_for(&self, time: NaiveTime) -> Option<&PeriodSlot> {
        self.slots.iter().find(|slot| slot.contains(time))
    }

    pub fn slots(&self) -> &[PeriodSlot] {
        &self.slots
    }
}

impl Default for PeriodSchedule {
    fn default() -> Self {
        let slot = |label: &str, start: NaiveTime, end: NaiveTime| PeriodSlot {
            label: label.to_string(),
            start,
            end,
        };
        Self {
            slots: vec![
                slot("09:00-10:00", hm(9, 0), hm(10, 0)),
                slot("10:00-11:00", hm(10, 0), hm(11, 0)),
                slot("11:00-12:00", hm(11, 0), hm(12, 0)),
                slot("12:00-13:00", hm(12, 0), hm(13, 0)),
                slot("13:30-14:30", hm(13, 30), hm(14, 30)),
                slot("14:30-15:30", hm(14, 30), hm(15, 30)),
                slot("15:30-16:30", hm(15, 30), hm(16, 30)),
            ],
        }
    }
}

/// Biometric confidence bucket written into ledger remarks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "HIGH",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfidenceBuckets {
    pub high_min: i64,
    pub medium_min: i64,
}

impl ConfidenceBuckets {
    pub fn level(&self, confidence: i64) -> ConfidenceLevel {
        if confidence >= self.high_min {
            ConfidenceLevel::High
        } else if confidence >= self.medium_min {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

impl Default for ConfidenceBuckets {
    fn default() -> Self {
        Self {
            high_min: 100,
            medium_min: 50,
        }
    }
}

/// Everything the gateway and reconciler need at runtime
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceSettings {
    pub thresholds: Thresholds,
    pub periods: PeriodSchedule,
    /// Local wall-clock time of the nightly run
    pub trigger_time: NaiveTime,
    /// Run marker lease; an expired RUNNING marker may be taken over
    pub lease_secs: i64,
    /// Per-student units in flight at once
    pub parallelism: usize,
    /// Earlier dates swept for leftover entries on each scheduled run
    pub catchup_days: i64,
    /// Period rows left on closed dates are dropped after this many days; 0 keeps them
    pub period_retention_days: i64,
    pub future_tolerance_secs: i64,
    /// Morning scans at or after this time are LATE
    pub late_after: NaiveTime,
    pub confidence: ConfidenceBuckets,
    pub max_lock_wait_ms: u64,
}

impl Default for AttendanceSettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            periods: PeriodSchedule::default(),
            trigger_time: hm(20, 0),
            lease_secs: 3600,
            parallelism: 4,
            catchup_days: 0,
            period_retention_days: 7,
            future_tolerance_secs: 120,
            late_after: hm(9, 10),
            confidence: ConfidenceBuckets::default(),
            max_lock_wait_ms: 5000,
        }
    }
}

async fn time_setting(db: &SqlitePool, key: &str, default: NaiveTime) -> Result<NaiveTime> {
    match get_setting::<String>(db, key).await? {
        Some(raw) => parse_time(&raw)
            .ok_or_else(|| Error::Config(format!("Invalid time for setting {}: {}", key, raw))),
        None => Ok(default),
    }
}

impl AttendanceSettings {
    /// Load from the settings table, falling back to defaults per key
    pub async fn from_database(db: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();

        let present = get_setting::<i64>(db, "threshold_present_periods")
            .await?
            .unwrap_or(defaults.thresholds.present);
        let half_day = get_setting::<i64>(db, "threshold_half_day_periods")
            .await?
            .unwrap_or(defaults.thresholds.half_day);

        let periods = match get_setting::<String>(db, "period_slots").await? {
            Some(json) => PeriodSchedule::from_json(&json)?,
            None => defaults.periods.clone(),
        };

        let confidence = ConfidenceBuckets {
            high_min: get_setting(db, "confidence_high_min")
                .await?
                .unwrap_or(defaults.confidence.high_min),
            medium_min: get_setting(db, "confidence_medium_min")
                .await?
                .unwrap_or(defaults.confidence.medium_min),
        };

        let settings = Self {
            thresholds: Thresholds::new(present, half_day)?,
            periods,
            trigger_time: time_setting(db, "reconcile_trigger_time", defaults.trigger_time)
                .await?,
            lease_secs: get_setting(db, "reconcile_lease_secs")
                .await?
                .unwrap_or(defaults.lease_secs),
            parallelism: get_setting(db, "reconcile_parallelism")
                .await?
                .unwrap_or(defaults.parallelism),
            catchup_days: get_setting(db, "reconcile_catchup_days")
                .await?
                .unwrap_or(defaults.catchup_days),
            period_retention_days: get_setting(db, "period_retention_days")
                .await?
                .unwrap_or(defaults.period_retention_days),
            future_tolerance_secs: get_setting(db, "ingest_future_tolerance_secs")
                .await?
                .unwrap_or(defaults.future_tolerance_secs),
            late_after: time_setting(db, "morning_late_after", defaults.late_after).await?,
            confidence,
            max_lock_wait_ms: get_setting(db, "db_max_lock_wait_ms")
                .await?
                .unwrap_or(defaults.max_lock_wait_ms),
        };

        settings.validate()?;

        tracing::info!(
            present = settings.thresholds.present,
            half_day = settings.thresholds.half_day,
            periods = settings.periods.slots().len(),
            trigger_time = %settings.trigger_time,
            "Loaded attendance settings"
        );

        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        Thresholds::new(self.thresholds.present, self.thresholds.half_day)?;

        if self.lease_secs <= 0 {
            return Err(Error::Config("reconcile_lease_secs must be positive".to_string()));
        }
        if self.parallelism == 0 {
            return Err(Error::Config("reconcile_parallelism must be at least 1".to_string()));
        }
        if self.catchup_days < 0 || self.future_tolerance_secs < 0 || self.period_retention_days < 0 {
            return Err(Error::Config(
                "reconcile_catchup_days, ingest_future_tolerance_secs and period_retention_days \
                 must be non-negative"
                    .to_string(),
            ));
        }
        if self.confidence.medium_min > self.confidence.high_min {
            return Err(Error::Config(
                "confidence_medium_min exceeds confidence_high_min".to_string(),
            ));
        }

        Ok(())
    }

    pub fn future_tolerance(&self) -> Duration {
        Duration::seconds(self.future_tolerance_secs)
    }
}
