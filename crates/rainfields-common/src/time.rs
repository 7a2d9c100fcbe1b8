//! Time handling for grid keys.
//!
//! All key timestamps are UTC with whole-second precision.

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Parse an ISO 8601 timestamp into UTC.
///
/// Accepts RFC 3339 with any offset, a naive `YYYY-MM-DDTHH:MM:SS` (taken as
/// UTC) and a bare date (midnight UTC).
pub fn parse_utc(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // Naive timestamps are stored as UTC
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(&format!("{}T00:00:00", s), "%Y-%m-%dT%H:%M:%S")
    {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

/// Drop sub-second precision so that keys and artifact names agree.
pub fn canonical(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(0)
}

/// An inclusive time range for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Parse "start/end" with either side in any format `parse_utc` accepts.
    pub fn parse(s: &str) -> Result<Self, TimeParseError> {
        let (start, end) = s
            .split_once('/')
            .ok_or_else(|| TimeParseError::InvalidFormat(s.to_string()))?;
        let range = Self::new(parse_utc(start)?, parse_utc(end)?);
        if range.start > range.end {
            return Err(TimeParseError::ReversedRange(s.to_string()));
        }
        Ok(range)
    }

    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt >= &self.start && dt <= &self.end
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Time range ends before it starts: {0}")]
    ReversedRange(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let dt = parse_utc("2024-01-01T12:00:00+13:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2023, 12, 31, 23, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_is_utc() {
        let dt = parse_utc("2024-01-15T12:30:00").unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.hour(), 12);
        assert_eq!(dt.minute(), 30);
    }

    #[test]
    fn test_parse_date_only() {
        let dt = parse_utc("2024-01-15").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_utc("yesterday").is_err());
        assert!(parse_utc("2024-13-01T00:00:00Z").is_err());
    }

    #[test]
    fn test_canonical_truncates_subseconds() {
        let dt = parse_utc("2024-01-01T00:00:00.750Z").unwrap();
        assert_eq!(canonical(dt), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange::parse("2024-01-15T00:00:00Z/2024-01-16T00:00:00Z").unwrap();
        assert!(range.contains(&Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap()));
        assert!(range.contains(&range.end));
        assert!(!range.contains(&Utc.with_ymd_and_hms(2024, 1, 17, 0, 0, 0).unwrap()));

        assert!(matches!(
            TimeRange::parse("2024-01-16/2024-01-15"),
            Err(TimeParseError::ReversedRange(_))
        ));
    }
}
