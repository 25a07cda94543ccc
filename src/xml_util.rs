//! Shared XML escaping and HTTP/ISO date formatting helpers.
//!
//! Response bodies are hand-built string templates; `quick-xml` is reserved
//! for parsing inbound bodies, where a real parser earns its keep.

use chrono::{DateTime, Utc};

pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Millisecond-precision ISO-8601 UTC, the storage representation used for
/// every timestamp column.
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

pub fn to_iso(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
                .ok()
                .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        })
}

/// RFC-1123 formatting for the `Date`/`Last-Modified` HTTP headers.
pub fn to_rfc1123(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an HTTP date in any of the three historical formats (RFC 1123,
/// RFC 850, asctime) that `If-Modified-Since`/`If-Unmodified-Since` clients
/// may send.
pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // RFC 850: "Sunday, 06-Nov-94 08:49:37 GMT"
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%A, %d-%b-%y %H:%M:%S GMT") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    // asctime: "Sun Nov  6 08:49:37 1994"
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%a %b %e %H:%M:%S %Y") {
        return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(escape("<a & b>\"'"), "&lt;a &amp; b&gt;&quot;&apos;");
    }

    #[test]
    fn iso_round_trip_has_millisecond_precision() {
        let now = Utc::now();
        let s = to_iso(now);
        assert!(s.ends_with('Z'));
        let parsed = parse_iso(&s).unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn parses_rfc1123_date() {
        let dt = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(dt.timestamp(), 784111777);
    }
}
