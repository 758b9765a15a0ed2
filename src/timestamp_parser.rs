use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

/// Minutes east of UTC for the civil time used in every user-facing date
/// boundary (UTC+5:30).
pub const CIVIL_OFFSET_MINUTES: i64 = 5 * 60 + 30;

pub fn civil_offset() -> Duration {
    Duration::minutes(CIVIL_OFFSET_MINUTES)
}

/// Handles parsing creation timestamps from the formats seen upstream
pub struct TimestampParser;

impl TimestampParser {
    /// Parse a timestamp string into a DateTime<Utc>
    ///
    /// Accepted forms: RFC 3339 (`Z` or `+05:30`), compact offsets
    /// (`2025-10-07T16:37:17.918342+0000`), naive date-times (assumed UTC) and
    /// bare dates (UTC midnight).
    pub fn parse(timestamp_str: &str) -> Result<DateTime<Utc>> {
        let timestamp = timestamp_str.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(timestamp) {
            return Ok(dt.with_timezone(&Utc));
        }

        if let Ok(dt) = DateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f%z") {
            return Ok(dt.with_timezone(&Utc));
        }

        if let Ok(naive) = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(naive.and_utc());
        }

        if let Ok(naive) = NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S%.f") {
            return Ok(naive.and_utc());
        }

        if let Ok(date) = NaiveDate::parse_from_str(timestamp, "%Y-%m-%d") {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(midnight.and_utc());
            }
        }

        anyhow::bail!("Failed to parse timestamp: {}", timestamp_str)
    }

    /// Calendar date of an instant in civil time.
    pub fn civil_date(instant: DateTime<Utc>) -> NaiveDate {
        (instant.naive_utc() + civil_offset()).date()
    }

    /// Interpret a civil wall-clock time as an instant.
    pub fn civil_to_utc(civil: NaiveDateTime) -> DateTime<Utc> {
        (civil - civil_offset()).and_utc()
    }

    /// Civil `YYYY-MM-DD` key for a raw timestamp, `None` when unparseable.
    pub fn civil_date_key(timestamp_str: &str) -> Option<String> {
        Self::parse(timestamp_str)
            .ok()
            .map(|instant| Self::civil_date(instant).format("%Y-%m-%d").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_z_suffix() {
        let result = TimestampParser::parse("2024-01-01T12:00:00.000Z");
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_timezone() {
        let result = TimestampParser::parse("2024-01-01T12:00:00.000+00:00");
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_compact_offset() {
        let dt = TimestampParser::parse("2025-10-07T16:37:17.918342+0000").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-07T16:37:17.918342+00:00");

        let dt = TimestampParser::parse("2025-10-08T05:30:00+0530").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-08T00:00:00+00:00");
    }

    #[test]
    fn test_parse_naive() {
        let result = TimestampParser::parse("2024-01-01T12:00:00.000");
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_date_only() {
        let dt = TimestampParser::parse("2025-10-08").unwrap();
        assert_eq!(dt.to_rfc3339(), "2025-10-08T00:00:00+00:00");
    }

    #[test]
    fn test_parse_invalid() {
        let result = TimestampParser::parse("invalid");
        assert!(result.is_err());
    }

    #[test]
    fn test_civil_date_crosses_midnight() {
        // 18:30 UTC is midnight the next day in civil time
        let dt = TimestampParser::parse("2025-10-07T18:30:00Z").unwrap();
        assert_eq!(TimestampParser::civil_date(dt).to_string(), "2025-10-08");

        let dt = TimestampParser::parse("2025-10-07T18:29:59Z").unwrap();
        assert_eq!(TimestampParser::civil_date(dt).to_string(), "2025-10-07");
    }

    #[test]
    fn test_civil_date_key() {
        assert_eq!(
            TimestampParser::civil_date_key("2025-10-08T10:00:00+0000").as_deref(),
            Some("2025-10-08")
        );
        assert_eq!(TimestampParser::civil_date_key("garbage"), None);
    }
}
