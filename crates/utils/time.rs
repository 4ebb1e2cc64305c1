use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeError {
    #[error("invalid date `{0}`, expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid time `{0}`, expected HH:MM or HH:MM:SS")]
    InvalidTime(String),
    #[error("unknown timezone `{0}`")]
    UnknownTimezone(String),
    #[error("{0} does not exist in {1} (daylight saving gap)")]
    NonexistentLocalTime(NaiveDateTime, Tz),
}

pub fn parse_timezone(name: &str) -> Result<Tz, TimeError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TimeError::UnknownTimezone(name.to_string()))
}

pub fn parse_date(value: &str) -> Result<NaiveDate, TimeError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| TimeError::InvalidDate(value.to_string()))
}

pub fn parse_time(value: &str) -> Result<NaiveTime, TimeError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
        .map_err(|_| TimeError::InvalidTime(value.to_string()))
}

/// Resolves a wall-clock date and time in `timezone` to a UTC instant.
///
/// Times that fall in a DST gap are rejected. Times that occur twice (DST
/// fall-back) resolve to the earlier instant.
pub fn parse_local_datetime(
    date: &str,
    time: &str,
    timezone: &str,
) -> Result<DateTime<Utc>, TimeError> {
    let tz = parse_timezone(timezone)?;
    let naive = parse_date(date)?.and_time(parse_time(time)?);

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or(TimeError::NonexistentLocalTime(naive, tz))
}

/// Renders an instant in the booking's display timezone, falling back to UTC
/// for names that no longer parse.
pub fn format_local(instant: DateTime<Utc>, timezone: &str) -> String {
    match parse_timezone(timezone) {
        Ok(tz) => instant
            .with_timezone(&tz)
            .format("%Y-%m-%d %H:%M %Z")
            .to_string(),
        Err(_) => instant.format("%Y-%m-%d %H:%M UTC").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_time_is_normalised_to_utc() {
        let instant = parse_local_datetime("2026-03-01", "18:30", "Asia/Bangkok").unwrap();
        assert_eq!(
            instant,
            Utc.with_ymd_and_hms(2026, 3, 1, 11, 30, 0).unwrap()
        );
    }

    #[test]
    fn spring_forward_gap_is_rejected() {
        let err = parse_local_datetime("2026-03-08", "02:30", "America/New_York").unwrap_err();
        assert!(matches!(err, TimeError::NonexistentLocalTime(_, _)));
    }

    #[test]
    fn fall_back_ambiguity_takes_earlier_instant() {
        let instant = parse_local_datetime("2026-11-01", "01:30", "America/New_York").unwrap();
        // 01:30 EDT (UTC-4), not 01:30 EST.
        assert_eq!(instant, Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap());
    }

    #[test]
    fn malformed_inputs_are_reported_precisely() {
        assert_eq!(
            parse_local_datetime("01/03/2026", "10:00", "UTC").unwrap_err(),
            TimeError::InvalidDate("01/03/2026".to_string())
        );
        assert_eq!(
            parse_local_datetime("2026-03-01", "25:00", "UTC").unwrap_err(),
            TimeError::InvalidTime("25:00".to_string())
        );
        assert_eq!(
            parse_local_datetime("2026-03-01", "10:00", "Mars/Olympus").unwrap_err(),
            TimeError::UnknownTimezone("Mars/Olympus".to_string())
        );
    }

    #[test]
    fn formats_in_display_timezone() {
        let instant = Utc.with_ymd_and_hms(2026, 3, 1, 11, 30, 0).unwrap();
        assert_eq!(format_local(instant, "Asia/Bangkok"), "2026-03-01 18:30 +07");
        assert_eq!(format_local(instant, "nowhere"), "2026-03-01 11:30 UTC");
    }
}
