//! Shared normalizer helpers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Parses a provider timestamp: ISO-8601 with or without a zone, epoch
/// seconds, or a bare date. Zoneless values are assumed UTC.
pub(crate) fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    // WHOIS-style "2024-01-02T03:04:05+0000" (no colon in the offset)
    if let Ok(ts) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    None
}

/// Converts epoch seconds to a UTC timestamp.
pub(crate) fn from_epoch(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Strips the trailing dot DNS answers carry on absolute names.
pub(crate) fn strip_trailing_dot(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}

/// Strips one layer of surrounding double quotes (TXT record payloads).
pub(crate) fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let expected: DateTime<Utc> = "1995-08-14T04:00:00Z".parse().unwrap();
        assert_eq!(parse_timestamp("1995-08-14T04:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("1995-08-14T04:00:00+0000"), Some(expected));
        assert_eq!(parse_timestamp("1995-08-14T04:00:00"), Some(expected));
        assert_eq!(parse_timestamp("1995-08-14 04:00:00"), Some(expected));

        let midnight: DateTime<Utc> = "1995-08-14T00:00:00Z".parse().unwrap();
        assert_eq!(parse_timestamp("1995-08-14"), Some(midnight));

        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("not a date"), None);
    }

    #[test]
    fn test_parse_timestamp_with_offset() {
        let ts = parse_timestamp("2024-01-02T03:04:05+02:00").unwrap();
        assert_eq!(ts, "2024-01-02T01:04:05Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn test_strip_helpers() {
        assert_eq!(strip_trailing_dot("mail.example.com."), "mail.example.com");
        assert_eq!(strip_trailing_dot("mail.example.com"), "mail.example.com");
        assert_eq!(strip_quotes("\"v=spf1 -all\""), "v=spf1 -all");
        assert_eq!(strip_quotes("v=spf1 -all"), "v=spf1 -all");
    }
}
