//! Conditional-request evaluation, shared by GetObject, HeadObject and the
//! `x-amz-copy-source-if-*` family on CopyObject.

use crate::etag;
use crate::xml_util;
use actix_web::http::header::HeaderMap;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionalOutcome {
    Proceed,
    NotModified,
    PreconditionFailed,
}

/// Evaluate the four conditional-request headers against an object's
/// current ETag and last-modified time, short-circuiting as soon as one
/// header settles the outcome.
///
/// `is_get_or_head` controls whether a matching `If-None-Match`/
/// `If-Modified-Since` yields 304 (GET/HEAD) or 412 (everything else, e.g.
/// the `x-amz-copy-source-if-*` headers on CopyObject).
pub fn evaluate(
    headers: &HeaderMap,
    current_etag: &str,
    last_modified: DateTime<Utc>,
    is_get_or_head: bool,
) -> ConditionalOutcome {
    evaluate_named(
        headers,
        current_etag,
        last_modified,
        is_get_or_head,
        "if-match",
        "if-unmodified-since",
        "if-none-match",
        "if-modified-since",
    )
}

/// Same evaluation, but reading the `x-amz-copy-source-if-*` header family
/// instead of the plain conditional headers.
pub fn evaluate_copy_source(
    headers: &HeaderMap,
    current_etag: &str,
    last_modified: DateTime<Utc>,
) -> ConditionalOutcome {
    evaluate_named(
        headers,
        current_etag,
        last_modified,
        false,
        "x-amz-copy-source-if-match",
        "x-amz-copy-source-if-unmodified-since",
        "x-amz-copy-source-if-none-match",
        "x-amz-copy-source-if-modified-since",
    )
}

#[allow(clippy::too_many_arguments)]
fn evaluate_named(
    headers: &HeaderMap,
    current_etag: &str,
    last_modified: DateTime<Utc>,
    is_get_or_head: bool,
    if_match_name: &str,
    if_unmodified_since_name: &str,
    if_none_match_name: &str,
    if_modified_since_name: &str,
) -> ConditionalOutcome {
    let obj_etag = etag::strip(current_etag);
    let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let if_match = header_str(if_match_name);
    if let Some(val) = if_match {
        if val.trim() != "*" {
            let tags = etag::split_list(val);
            if !tags.iter().any(|t| t == &obj_etag) {
                return ConditionalOutcome::PreconditionFailed;
            }
        }
    }

    if if_match.is_none() {
        if let Some(val) = header_str(if_unmodified_since_name) {
            if let Some(date) = xml_util::parse_http_date(val) {
                if last_modified > date {
                    return ConditionalOutcome::PreconditionFailed;
                }
            }
        }
    }

    let if_none_match = header_str(if_none_match_name);
    if let Some(val) = if_none_match {
        let matched = if val.trim() == "*" {
            true
        } else {
            etag::split_list(val).iter().any(|t| t == &obj_etag)
        };
        if matched {
            return if is_get_or_head {
                ConditionalOutcome::NotModified
            } else {
                ConditionalOutcome::PreconditionFailed
            };
        }
    }

    if if_none_match.is_none() && is_get_or_head {
        if let Some(val) = header_str(if_modified_since_name) {
            if let Some(date) = xml_util::parse_http_date(val) {
                if last_modified <= date {
                    return ConditionalOutcome::NotModified;
                }
            }
        }
    }

    ConditionalOutcome::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};
    use chrono::TimeZone;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn if_none_match_star_yields_304_for_get() {
        let h = headers(&[("if-none-match", "*")]);
        let lm = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            evaluate(&h, "\"e\"", lm, true),
            ConditionalOutcome::NotModified
        );
    }

    #[test]
    fn if_none_match_star_yields_412_for_non_get() {
        let h = headers(&[("if-none-match", "*")]);
        let lm = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            evaluate(&h, "\"e\"", lm, false),
            ConditionalOutcome::PreconditionFailed
        );
    }

    #[test]
    fn if_match_mismatch_is_412() {
        let h = headers(&[("if-match", "\"other\"")]);
        let lm = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            evaluate(&h, "\"e\"", lm, true),
            ConditionalOutcome::PreconditionFailed
        );
    }

    #[test]
    fn no_conditions_proceeds() {
        let h = headers(&[]);
        let lm = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(evaluate(&h, "\"e\"", lm, true), ConditionalOutcome::Proceed);
    }
}
