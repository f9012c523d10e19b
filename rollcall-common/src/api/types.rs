//! Hardware-facing response envelope
//!
//! Every scan a device submits gets exactly one of two answers, ACCEPTED or
//! REJECTED, with a machine-readable reason code on rejection. The set of
//! statuses and reasons is closed so firmware can switch on them.

use serde::{Deserialize, Serialize};

/// Accept/reject signal returned to a scanning device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Accepted,
    Rejected,
}

/// Why a scan was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    /// Request body was not valid JSON for the endpoint
    MalformedPayload,
    /// Empty or syntactically invalid student/card/match identifier
    MalformedIdentifier,
    /// Scan date is not `YYYY-MM-DD`
    MalformedDate,
    /// Scan time is not `HH:MM[:SS]`
    MalformedTime,
    /// Scan timestamp lies in the future relative to ingestion time
    FutureTimestamp,
    /// Biometric confidence is missing or negative
    InvalidConfidence,
    /// Identifier does not resolve to an enrolled student
    UnknownStudent,
    /// Card swipe outside every configured class period
    NoActivePeriod,
    /// Reconciliation for the date has already started
    DateClosed,
    /// Transient log could not be written
    StorageUnavailable,
}

impl RejectReason {
    /// Wire code, identical to the serialized form
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MalformedPayload => "MALFORMED_PAYLOAD",
            RejectReason::MalformedIdentifier => "MALFORMED_IDENTIFIER",
            RejectReason::MalformedDate => "MALFORMED_DATE",
            RejectReason::MalformedTime => "MALFORMED_TIME",
            RejectReason::FutureTimestamp => "FUTURE_TIMESTAMP",
            RejectReason::InvalidConfidence => "INVALID_CONFIDENCE",
            RejectReason::UnknownStudent => "UNKNOWN_STUDENT",
            RejectReason::NoActivePeriod => "NO_ACTIVE_PERIOD",
            RejectReason::DateClosed => "DATE_CLOSED",
            RejectReason::StorageUnavailable => "STORAGE_UNAVAILABLE",
        }
    }

    /// Human-readable description shown on device displays
    pub fn describe(&self) -> &'static str {
        match self {
            RejectReason::MalformedPayload => "Request body could not be parsed",
            RejectReason::MalformedIdentifier => "Identifier is missing or malformed",
            RejectReason::MalformedDate => "Scan date must be YYYY-MM-DD",
            RejectReason::MalformedTime => "Scan time must be HH:MM:SS",
            RejectReason::FutureTimestamp => "Scan timestamp is in the future",
            RejectReason::InvalidConfidence => "Biometric confidence is invalid",
            RejectReason::UnknownStudent => "Identifier is not enrolled",
            RejectReason::NoActivePeriod => "No class period at this time",
            RejectReason::DateClosed => "Attendance for this date is already closed",
            RejectReason::StorageUnavailable => "Scan could not be stored, retry later",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Response body for hardware ingestion endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareResponse {
    pub status: ScanStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    pub message: String,
    /// Registration number of the resolved student
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student: Option<String>,
    /// Distinct periods recorded so far today (card scans only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_count: Option<i64>,
    /// Server time in Unix epoch milliseconds
    pub timestamp: i64,
}

impl HardwareResponse {
    /// Create an ACCEPTED response
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            status: ScanStatus::Accepted,
            reason: None,
            message: message.into(),
            student: None,
            period_count: None,
            timestamp: crate::time::epoch_millis(),
        }
    }

    /// Create a REJECTED response carrying the reason's description
    pub fn rejected(reason: RejectReason) -> Self {
        Self {
            status: ScanStatus::Rejected,
            reason: Some(reason),
            message: reason.describe().to_string(),
            student: None,
            period_count: None,
            timestamp: crate::time::epoch_millis(),
        }
    }

    pub fn with_student(mut self, student: impl Into<String>) -> Self {
        self.student = Some(student.into());
        self
    }

    pub fn with_period_count(mut self, count: i64) -> Self {
        self.period_count = Some(count);
        self
    }
}
