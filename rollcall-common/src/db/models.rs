//! Persisted models shared by Rollcall services

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// Final daily attendance classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Present,
    HalfDay,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::HalfDay => "HALF_DAY",
            AttendanceStatus::Absent => "ABSENT",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRESENT" => Ok(AttendanceStatus::Present),
            "HALF_DAY" => Ok(AttendanceStatus::HalfDay),
            "ABSENT" => Ok(AttendanceStatus::Absent),
            other => Err(Error::Internal(format!("Unknown attendance status: {}", other))),
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the morning check-in happened before the late cutoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArrivalStatus {
    OnTime,
    Late,
}

impl ArrivalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrivalStatus::OnTime => "ON_TIME",
            ArrivalStatus::Late => "LATE",
        }
    }
}

impl FromStr for ArrivalStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ON_TIME" => Ok(ArrivalStatus::OnTime),
            "LATE" => Ok(ArrivalStatus::Late),
            other => Err(Error::Internal(format!("Unknown arrival status: {}", other))),
        }
    }
}

/// Student directory entry (reference data, read-only for the engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StudentRecord {
    pub id: i64,
    pub registration_number: String,
    pub name: Option<String>,
    pub section_id: Option<String>,
    pub branch: Option<String>,
}

/// Biometric check-in, at most one per (student, date)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MorningPresenceEntry {
    pub id: i64,
    pub student_ref: String,
    pub scan_date: NaiveDate,
    pub scan_time: NaiveTime,
    pub confidence: i64,
    pub arrival: ArrivalStatus,
    pub device_id: Option<String>,
    /// Number of biometric scans folded into this entry
    pub scan_count: i64,
    pub processed: bool,
}

/// Card swipe for one class period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodPresenceEntry {
    pub id: i64,
    pub student_ref: String,
    pub scan_date: NaiveDate,
    pub period_token: String,
    pub scan_time: NaiveTime,
    pub room_number: Option<String>,
    pub device_id: Option<String>,
}

/// Committed ledger entry, exactly one per (student, date)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub student_ref: String,
    pub student_id: Option<i64>,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub section_id: Option<String>,
    pub branch: Option<String>,
    pub remarks: String,
    pub period_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registered scanning device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Device {
    pub device_id: String,
    pub device_name: String,
    pub room_number: String,
    pub last_ping: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_matches_serde() {
        for status in [
            AttendanceStatus::Present,
            AttendanceStatus::HalfDay,
            AttendanceStatus::Absent,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<AttendanceStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_is_error() {
        assert!("LATE".parse::<AttendanceStatus>().is_err());
        assert!("present".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn test_arrival_parse() {
        assert_eq!("ON_TIME".parse::<ArrivalStatus>().unwrap(), ArrivalStatus::OnTime);
        assert_eq!("LATE".parse::<ArrivalStatus>().unwrap(), ArrivalStatus::Late);
        assert!("EARLY".parse::<ArrivalStatus>().is_err());
    }
}
