//! Timestamp and operational-calendar utilities
//!
//! Hardware devices report dates as `YYYY-MM-DD` and times as `HH:MM:SS`
//! (older firmware sends `HH:MM`). All attendance bookkeeping happens on a
//! single local operational calendar.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current wall-clock time on the operational calendar
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Milliseconds since the Unix epoch
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse an operational date (`YYYY-MM-DD`)
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

/// Parse a wall-clock time (`HH:MM:SS` or `HH:MM`)
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_parse_date_accepts_iso_dates() {
        assert_eq!(
            parse_date("2024-03-04"),
            NaiveDate::from_ymd_opt(2024, 3, 4)
        );
        assert_eq!(
            parse_date(" 2024-03-04 "),
            NaiveDate::from_ymd_opt(2024, 3, 4)
        );
    }

    #[test]
    fn test_parse_date_rejects_garbage() {
        assert!(parse_date("04/03/2024").is_none());
        assert!(parse_date("2024-02-30").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_parse_time_with_and_without_seconds() {
        assert_eq!(parse_time("09:05:30"), NaiveTime::from_hms_opt(9, 5, 30));
        assert_eq!(parse_time("13:30"), NaiveTime::from_hms_opt(13, 30, 0));
    }

    #[test]
    fn test_parse_time_rejects_out_of_range() {
        assert!(parse_time("25:00:00").is_none());
        assert!(parse_time("9am").is_none());
    }

    #[test]
    fn test_epoch_millis_is_after_2020() {
        assert!(epoch_millis() > 1_577_836_800_000);
    }
}
