//! Retention arithmetic: duration parsing, timestamp labels, snapshot naming
//!
//! Retention periods are written Go-style (`"30m"`, `"12h"`, `"1h30m"`) with
//! one extension: a `d` unit for days, expanded as `N*24h`. Timestamps live in
//! labels, so they use a label-safe format without colons.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::Error;

/// Timestamp format used in the savedAt/retentionUntil labels (UTC)
///
/// Label values may not contain `:`, hence the compact time-of-day.
pub const LABEL_TIME_FORMAT: &str = "%Y-%m-%dT%H%M%S";

/// Timestamp format used in generated Snapshot names (UTC)
pub const NAME_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Parse a retention period string into a duration
///
/// Accepts a sequence of `<integer><unit>` components with units `s`, `m`,
/// `h` and `d` (days expand to 24 hours). The total must be positive: empty,
/// zero and signed inputs are rejected.
pub fn parse_retention_period(input: &str) -> Result<Duration, Error> {
    if input.is_empty() {
        return Err(Error::invalid_duration(input, "empty duration"));
    }

    let mut total = Duration::zero();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if !c.is_ascii_digit() {
            return Err(Error::invalid_duration(
                input,
                format!("expected digit at offset {start}"),
            ));
        }

        // Consume the integer value
        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if c.is_ascii_digit() {
                end = i + c.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let value: i64 = input[start..end]
            .parse()
            .map_err(|_| Error::invalid_duration(input, "value out of range"))?;

        // Consume the unit
        let unit_secs = match chars.next() {
            Some((_, 's')) => 1,
            Some((_, 'm')) => 60,
            Some((_, 'h')) => 3600,
            // Days are not a standard duration unit; expand to 24h
            Some((_, 'd')) => 86_400,
            Some((_, other)) => {
                return Err(Error::invalid_duration(
                    input,
                    format!("unknown unit {other:?}"),
                ))
            }
            None => return Err(Error::invalid_duration(input, "missing unit")),
        };

        let seconds = value
            .checked_mul(unit_secs)
            .ok_or_else(|| Error::invalid_duration(input, "duration overflow"))?;
        total = total
            .checked_add(&Duration::seconds(seconds))
            .ok_or_else(|| Error::invalid_duration(input, "duration overflow"))?;
    }

    if total <= Duration::zero() {
        return Err(Error::invalid_duration(input, "duration must be positive"));
    }
    Ok(total)
}

/// Format a UTC timestamp for the savedAt/retentionUntil labels
pub fn format_label_time(t: DateTime<Utc>) -> String {
    t.format(LABEL_TIME_FORMAT).to_string()
}

/// Parse a savedAt/retentionUntil label value back into a UTC timestamp
pub fn parse_label_time(value: &str) -> Result<DateTime<Utc>, Error> {
    NaiveDateTime::parse_from_str(value, LABEL_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::invalid_timestamp(value, e.to_string()))
}

/// Build the deterministic Snapshot name for a captured object
///
/// `<policy>-<kindLower>-<objectName>-<yyyymmddhhmmss>`, UTC. Two deletions
/// of the same object within the same second collide by construction; the
/// capture pipeline treats the resulting AlreadyExists as a dropped duplicate.
pub fn snapshot_name(policy: &str, kind: &str, object: &str, now: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}-{}",
        policy,
        kind.to_lowercase(),
        object,
        now.format(NAME_TIME_FORMAT)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_retention_period("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_retention_period("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_retention_period("12h").unwrap(), Duration::hours(12));
    }

    #[test]
    fn days_expand_to_24_hours() {
        assert_eq!(parse_retention_period("1d").unwrap(), Duration::hours(24));
        // "7d" must parse to 168h
        assert_eq!(parse_retention_period("7d").unwrap(), Duration::hours(168));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(
            parse_retention_period("1h30m").unwrap(),
            Duration::minutes(90)
        );
        assert_eq!(
            parse_retention_period("1d12h").unwrap(),
            Duration::hours(36)
        );
        assert_eq!(
            parse_retention_period("2m30s").unwrap(),
            Duration::seconds(150)
        );
    }

    #[test]
    fn rejects_zero_and_empty() {
        assert!(parse_retention_period("").is_err());
        assert!(parse_retention_period("0s").is_err());
        assert!(parse_retention_period("0h0m").is_err());
    }

    #[test]
    fn rejects_signed_and_malformed() {
        assert!(parse_retention_period("-5m").is_err());
        assert!(parse_retention_period("+5m").is_err());
        assert!(parse_retention_period("5").is_err());
        assert!(parse_retention_period("5x").is_err());
        assert!(parse_retention_period("h").is_err());
        assert!(parse_retention_period("5m3").is_err());
    }

    #[test]
    fn label_time_round_trips() {
        let t = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        let formatted = format_label_time(t);
        assert_eq!(formatted, "2025-03-14T092653");
        assert_eq!(parse_label_time(&formatted).unwrap(), t);
    }

    #[test]
    fn label_time_rejects_garbage() {
        assert!(parse_label_time("").is_err());
        assert!(parse_label_time("2025-03-14").is_err());
        assert!(parse_label_time("2025-03-14T09:26:53").is_err());
        assert!(parse_label_time("yesterday").is_err());
    }

    #[test]
    fn snapshot_names_are_deterministic() {
        let t = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(
            snapshot_name("policy1", "ConfigMap", "foo", t),
            "policy1-configmap-foo-20250314092653"
        );
    }

    #[test]
    fn retain_until_is_saved_at_plus_period() {
        let saved_at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 0, 0).unwrap();
        let period = parse_retention_period("1h").unwrap();
        let retain_until = saved_at + period;
        assert_eq!(format_label_time(retain_until), "2025-03-14T100000");
    }
}
