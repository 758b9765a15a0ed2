//! Civil-time window handling.
//!
//! User-facing bounds are calendar dates (`YYYY-MM-DD`) or date-times
//! (`YYYY-MM-DDTHH:MM:SS`) in civil time (UTC+5:30). They are converted once to
//! a half-open UTC interval `[start, end)` before any retrieval happens:
//!
//! - a start date `D` maps to `D 00:00:00.000` civil, i.e. `D-1 18:30:00Z`
//! - an end date `D` maps to `D 23:59:59.999` civil, i.e. `D 18:29:59.999Z`
//! - a date-time bound keeps its second; an end date-time is extended to the
//!   last millisecond of that second

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;

use crate::error::{ReportError, Result};
use crate::timestamp_parser::TimestampParser;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Start,
    End,
}

/// A validated window over creation timestamps, stored in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Exclusive upper bound.
    pub end: DateTime<Utc>,
    /// Bounds as the user supplied them, echoed in reports.
    pub requested_start: String,
    pub requested_end: String,
}

impl TimeRange {
    /// Parse civil-time bounds. Fails before any retrieval on malformed input
    /// or when start is after end.
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let start_utc = parse_bound(start, Bound::Start)
            .ok_or_else(|| ReportError::invalid_range(start, end, format!("cannot parse start '{start}' (expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)")))?;
        let end_utc = parse_bound(end, Bound::End)
            .ok_or_else(|| ReportError::invalid_range(start, end, format!("cannot parse end '{end}' (expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)")))?;

        if start_utc >= end_utc {
            return Err(ReportError::invalid_range(start, end, "start is after end"));
        }

        Ok(Self {
            start: start_utc,
            end: end_utc,
            requested_start: start.trim().to_string(),
            requested_end: end.trim().to_string(),
        })
    }

    /// Build from optional CLI/API arguments: both or neither must be given.
    pub fn from_optional(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>> {
        match (start, end) {
            (Some(start), Some(end)) => Self::parse(start, end).map(Some),
            (None, None) => Ok(None),
            (start, end) => Err(ReportError::invalid_range(
                start.unwrap_or(""),
                end.unwrap_or(""),
                "both start and end are required for a filtered scan",
            )),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

fn parse_bound(value: &str, bound: Bound) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
        let civil = match bound {
            Bound::Start => date.and_time(NaiveTime::MIN),
            Bound::End => date.and_hms_milli_opt(23, 59, 59, 999)?,
        };
        return Some(TimestampParser::civil_to_utc(civil));
    }

    DATETIME_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(value, format).ok().map(|civil| {
            let civil = match bound {
                Bound::Start => civil,
                Bound::End => civil + Duration::milliseconds(999),
            };
            TimestampParser::civil_to_utc(civil)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_single_civil_day_maps_to_utc_window() {
        let range = TimeRange::parse("2025-10-08", "2025-10-08").unwrap();
        assert_eq!(range.start, utc("2025-10-07T18:30:00Z"));
        assert_eq!(range.end, utc("2025-10-08T18:29:59.999Z"));
    }

    #[test]
    fn test_contains_is_half_open() {
        let range = TimeRange::parse("2025-10-08", "2025-10-08").unwrap();
        assert!(range.contains(utc("2025-10-07T18:30:00Z")));
        assert!(range.contains(utc("2025-10-08T18:29:59.998Z")));
        assert!(!range.contains(utc("2025-10-08T18:29:59.999Z")));
        assert!(!range.contains(utc("2025-10-07T18:29:59.999Z")));
        assert!(!range.contains(utc("2025-10-08T18:30:00Z")));
    }

    #[test]
    fn test_datetime_bounds() {
        let range = TimeRange::parse("2025-10-08T10:00:00", "2025-10-08T12:00:00").unwrap();
        assert_eq!(range.start, utc("2025-10-08T04:30:00Z"));
        assert_eq!(range.end, utc("2025-10-08T06:30:00.999Z"));
    }

    #[test]
    fn test_start_after_end_is_rejected() {
        let err = TimeRange::parse("2025-10-09", "2025-10-08").unwrap_err();
        assert!(matches!(err, ReportError::InvalidTimeRange { .. }));
    }

    #[test]
    fn test_unparseable_bounds_are_rejected() {
        assert!(TimeRange::parse("08-10-2025", "2025-10-08").is_err());
        assert!(TimeRange::parse("2025-10-08", "tomorrow").is_err());
        assert!(TimeRange::parse("2025-02-30", "2025-03-01").is_err());
    }

    #[test]
    fn test_from_optional_requires_both_bounds() {
        assert_eq!(TimeRange::from_optional(None, None).unwrap(), None);
        assert!(TimeRange::from_optional(Some("2025-10-08"), None).is_err());
        assert!(TimeRange::from_optional(Some("2025-10-08"), Some("2025-10-09"))
            .unwrap()
            .is_some());
    }
}
