//! Scan ingestion gateway
//!
//! Validates device scans and writes them to the transient presence logs.
//! Every scan ends in exactly one [`IngestOutcome`]: accepted, or rejected
//! with a [`RejectReason`]. Failures never escape to the device as errors.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rollcall_common::api::{HardwareResponse, RejectReason};
use rollcall_common::db::models::{ArrivalStatus, StudentRecord};
use rollcall_common::db::retry_on_lock;
use rollcall_common::time::{local_now, parse_date, parse_time};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::AttendanceSettings;
use crate::db::morning_log::{self, MorningUpsert, NewMorningScan};
use crate::db::period_log::{self, NewPeriodScan, PeriodInsert};
use crate::directory::StudentDirectory;
use crate::error::AttendanceError;

const MAX_IDENTIFIER_LEN: usize = 64;

/// Biometric event as posted by a fingerprint terminal
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiometricScan {
    #[serde(alias = "fingerprintId")]
    pub match_id: Option<i64>,
    pub device_id: Option<String>,
    pub scan_date: Option<String>,
    pub scan_time: Option<String>,
    pub confidence: Option<i64>,
}

/// Card swipe as posted by a classroom RFID reader
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardScan {
    pub card_uid: Option<String>,
    pub device_id: Option<String>,
    pub scan_date: Option<String>,
    pub scan_time: Option<String>,
    pub room_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Recorded,
    Updated,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Acceptance {
    pub student: String,
    pub disposition: Disposition,
    pub arrival: Option<ArrivalStatus>,
    pub period_token: Option<String>,
    pub period_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted(Acceptance),
    Rejected(RejectReason),
}

impl IngestOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestOutcome::Accepted(_))
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            IngestOutcome::Rejected(reason) => Some(*reason),
            IngestOutcome::Accepted(_) => None,
        }
    }

    pub fn into_response(self) -> HardwareResponse {
        match self {
            IngestOutcome::Rejected(reason) => HardwareResponse::rejected(reason),
            IngestOutcome::Accepted(acceptance) => {
                let message = match (&acceptance.period_token, acceptance.disposition) {
                    (Some(token), Disposition::Duplicate) => {
                        format!("Period {} already recorded", token)
                    }
                    (Some(token), _) => format!("Period {} recorded", token),
                    (None, Disposition::Updated) => "Morning check-in updated".to_string(),
                    (None, _) => match acceptance.arrival {
                        Some(ArrivalStatus::Late) => "Morning check-in recorded (late)".to_string(),
                        _ => "Morning check-in recorded".to_string(),
                    },
                };

                let mut response = HardwareResponse::accepted(message).with_student(acceptance.student);
                if let Some(count) = acceptance.period_count {
                    response = response.with_period_count(count);
                }
                response
            }
        }
    }
}

impl From<Result<Acceptance, AttendanceError>> for IngestOutcome {
    fn from(result: Result<Acceptance, AttendanceError>) -> Self {
        match result {
            Ok(acceptance) => IngestOutcome::Accepted(acceptance),
            Err(AttendanceError::Validation(reason)) => IngestOutcome::Rejected(reason),
            Err(err) => {
                warn!(error = %err, "Scan could not be stored");
                IngestOutcome::Rejected(err.reject_reason())
            }
        }
    }
}

fn well_formed(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier.len() <= MAX_IDENTIFIER_LEN
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.' | '/'))
}

fn identifier(raw: &str) -> Result<&str, AttendanceError> {
    let trimmed = raw.trim();
    if well_formed(trimmed) {
        Ok(trimmed)
    } else {
        Err(RejectReason::MalformedIdentifier.into())
    }
}

fn scan_date(raw: Option<&str>) -> Result<NaiveDate, AttendanceError> {
    raw.and_then(parse_date)
        .ok_or(AttendanceError::Validation(RejectReason::MalformedDate))
}

fn scan_time(raw: Option<&str>) -> Result<NaiveTime, AttendanceError> {
    raw.and_then(parse_time)
        .ok_or(AttendanceError::Validation(RejectReason::MalformedTime))
}

pub struct IngestionGateway {
    db: SqlitePool,
    directory: Arc<dyn StudentDirectory>,
    settings: Arc<AttendanceSettings>,
}

impl IngestionGateway {
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

    /// Record a morning biometric check-in for a known student
    pub async fn ingest_morning_scan(
        &self,
        student_ref: &str,
        date: &str,
        time: &str,
        confidence: Option<i64>,
        device_id: Option<&str>,
    ) -> IngestOutcome {
        self.try_morning_scan(student_ref, Some(date), Some(time), confidence, device_id)
            .await
            .into()
    }

    /// Record a period swipe under an explicit period token
    pub async fn ingest_period_scan(
        &self,
        student_ref: &str,
        date: &str,
        period_token: &str,
        time: &str,
        room_number: Option<&str>,
        device_id: Option<&str>,
    ) -> IngestOutcome {
        self.try_period_scan(
            student_ref,
            Some(date),
            Some(period_token),
            Some(time),
            room_number,
            device_id,
        )
        .await
        .into()
    }

    /// Fingerprint terminal entry point: resolve the match id, then log the morning scan
    pub async fn ingest_biometric(&self, scan: &BiometricScan) -> IngestOutcome {
        let outcome = IngestOutcome::from(self.try_biometric(scan).await);
        debug!(match_id = ?scan.match_id, accepted = outcome.is_accepted(), "Biometric scan handled");
        outcome
    }

    /// Classroom reader entry point: resolve the card, derive the period from the scan time
    pub async fn ingest_card(&self, scan: &CardScan) -> IngestOutcome {
        let outcome = IngestOutcome::from(self.try_card(scan).await);
        debug!(card_uid = ?scan.card_uid, accepted = outcome.is_accepted(), "Card scan handled");
        outcome
    }

    async fn try_biometric(&self, scan: &BiometricScan) -> Result<Acceptance, AttendanceError> {
        let match_id = scan
            .match_id
            .filter(|id| *id >= 0)
            .ok_or(AttendanceError::Validation(RejectReason::MalformedIdentifier))?;

        let student_ref = self
            .directory
            .resolve_biometric(match_id)
            .await
            .map_err(|e| AttendanceError::Lookup(e.to_string()))?
            .ok_or(AttendanceError::Validation(RejectReason::UnknownStudent))?;

        self.try_morning_scan(
            &student_ref,
            scan.scan_date.as_deref(),
            scan.scan_time.as_deref(),
            scan.confidence,
            scan.device_id.as_deref(),
        )
        .await
    }

    async fn try_card(&self, scan: &CardScan) -> Result<Acceptance, AttendanceError> {
        let card_uid = identifier(scan.card_uid.as_deref().unwrap_or_default())?.to_ascii_uppercase();
        scan_date(scan.scan_date.as_deref())?;
        let time = scan_time(scan.scan_time.as_deref())?;
        let token = self
            .settings
            .periods
            .slot_for(time)
            .map(|slot| slot.label.clone())
            .ok_or(AttendanceError::Validation(RejectReason::NoActivePeriod))?;

        let student_ref = self
            .directory
            .resolve_card(&card_uid)
            .await
            .map_err(|e| AttendanceError::Lookup(e.to_string()))?
            .ok_or(AttendanceError::Validation(RejectReason::UnknownStudent))?;

        self.try_period_scan(
            &student_ref,
            scan.scan_date.as_deref(),
            Some(token.as_str()),
            scan.scan_time.as_deref(),
            scan.room_number.as_deref(),
            scan.device_id.as_deref(),
        )
        .await
    }

    fn check_not_future(&self, date: NaiveDate, time: NaiveTime) -> Result<(), AttendanceError> {
        let scanned_at = NaiveDateTime::new(date, time);
        if scanned_at > local_now() + self.settings.future_tolerance() {
            return Err(RejectReason::FutureTimestamp.into());
        }
        Ok(())
    }

    async fn resolve(&self, student_ref: &str) -> Result<StudentRecord, AttendanceError> {
        self.directory
            .resolve_student(student_ref)
            .await
            .map_err(|e| AttendanceError::Lookup(e.to_string()))?
            .ok_or(AttendanceError::Validation(RejectReason::UnknownStudent))
    }

    async fn try_morning_scan(
        &self,
        student_ref: &str,
        date: Option<&str>,
        time: Option<&str>,
        confidence: Option<i64>,
        device_id: Option<&str>,
    ) -> Result<Acceptance, AttendanceError> {
        let student_ref = identifier(student_ref)?;
        let date = scan_date(date)?;
        let time = scan_time(time)?;
        let confidence = confidence
            .filter(|c| *c >= 0)
            .ok_or(AttendanceError::Validation(RejectReason::InvalidConfidence))?;
        self.check_not_future(date, time)?;

        let student = self.resolve(student_ref).await?;

        let arrival = if time < self.settings.late_after {
            ArrivalStatus::OnTime
        } else {
            ArrivalStatus::Late
        };

        let scan = NewMorningScan {
            student_ref: &student.registration_number,
            date,
            time,
            confidence,
            arrival,
            device_id,
        };

        let upsert = retry_on_lock("morning scan upsert", self.settings.max_lock_wait_ms, || {
            morning_log::upsert_morning_scan(&self.db, &scan)
        })
        .await?;

        let disposition = match upsert {
            MorningUpsert::Recorded => Disposition::Recorded,
            MorningUpsert::Updated => Disposition::Updated,
            MorningUpsert::DateClosed => return Err(RejectReason::DateClosed.into()),
        };

        info!(
            student = %student.registration_number,
            date = %date,
            time = %time,
            arrival = arrival.as_str(),
            ?disposition,
            "Morning scan accepted"
        );

        Ok(Acceptance {
            student: student.registration_number,
            disposition,
            arrival: Some(arrival),
            period_token: None,
            period_count: None,
        })
    }

    async fn try_period_scan(
        &self,
        student_ref: &str,
        date: Option<&str>,
        period_token: Option<&str>,
        time: Option<&str>,
        room_number: Option<&str>,
        device_id: Option<&str>,
    ) -> Result<Acceptance, AttendanceError> {
        let student_ref = identifier(student_ref)?;
        let date = scan_date(date)?;
        let period_token = identifier(period_token.unwrap_or_default())?;
        let time = scan_time(time)?;
        self.check_not_future(date, time)?;

        let student = self.resolve(student_ref).await?;

        let scan = NewPeriodScan {
            student_ref: &student.registration_number,
            date,
            period_token,
            time,
            room_number,
            device_id,
        };

        let insert = retry_on_lock("period scan insert", self.settings.max_lock_wait_ms, || {
            period_log::insert_period_scan(&self.db, &scan)
        })
        .await?;

        let disposition = match insert {
            PeriodInsert::Recorded => Disposition::Recorded,
            PeriodInsert::Duplicate => Disposition::Duplicate,
            PeriodInsert::DateClosed => return Err(RejectReason::DateClosed.into()),
        };

        let period_count =
            period_log::count_distinct_periods(&self.db, &student.registration_number, date).await?;

        info!(
            student = %student.registration_number,
            date = %date,
            period = period_token,
            period_count,
            ?disposition,
            "Period scan accepted"
        );

        Ok(Acceptance {
            student: student.registration_number,
            disposition,
            arrival: None,
            period_token: Some(period_token.to_string()),
            period_count: Some(period_count),
        })
    }
}
