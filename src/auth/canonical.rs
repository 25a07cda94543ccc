//! Canonical-request construction: URI encoding, canonical query-string
//! building, and header-value trimming for the AWS SigV4 signing process.

use actix_web::http::header::HeaderMap;
use sha2::{Digest, Sha256};

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
pub const EMPTY_BODY_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// S3-compatible percent-encoding: unreserved characters (`A-Za-z0-9-_.~`)
/// pass through unencoded, everything else becomes uppercase-hex
/// `%XX`. `encode_slash` controls whether `/` itself is encoded.
fn uri_encode(s: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        let c = byte as char;
        let is_unreserved =
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~');
        if is_unreserved || (c == '/' && !encode_slash) {
            out.push(c);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// URI-encode a path, segment by segment, preserving `/` separators.
fn uri_encode_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    let encoded = path
        .split('/')
        .map(|segment| uri_encode(segment, false))
        .collect::<Vec<_>>()
        .join("/");
    if encoded.starts_with('/') {
        encoded
    } else {
        format!("/{encoded}")
    }
}

fn decode_query_component(s: &str) -> String {
    urlencoding::decode(&s.replace('+', " "))
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// Build the canonical query string from a raw (already-URL-encoded) query
/// string: decode, sort by (name, value) byte order, re-encode with the
/// S3-compatible rules, excluding any parameter named `exclude`.
fn canonicalize_query(query_string: &str, exclude: Option<&str>) -> String {
    if query_string.is_empty() {
        return String::new();
    }
    let mut params: Vec<(String, String)> = query_string
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode_query_component(k), decode_query_component(v)),
            None => (decode_query_component(pair), String::new()),
        })
        .filter(|(name, _)| exclude != Some(name.as_str()))
        .collect();
    params.sort();
    params
        .into_iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                uri_encode(&name, true),
                uri_encode(&value, true)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

pub fn build_canonical_query_string(query_string: &str) -> String {
    canonicalize_query(query_string, None)
}

pub fn build_canonical_query_string_for_presigned(query_string: &str) -> String {
    canonicalize_query(query_string, Some("X-Amz-Signature"))
}

fn trim_header_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_space = false;
    for c in value.trim().chars() {
        if c == ' ' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
pub fn build_canonical_request(
    method: &str,
    uri_path: &str,
    canonical_query: &str,
    headers: &HeaderMap,
    signed_headers: &[String],
    payload_hash: &str,
) -> String {
    let canonical_uri = uri_encode_path(uri_path);

    let mut lower_headers: std::collections::HashMap<String, String> =
        std::collections::HashMap::new();
    for (name, value) in headers.iter() {
        let lower = name.as_str().to_lowercase();
        let value = value.to_str().unwrap_or("");
        lower_headers
            .entry(lower)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&trim_header_value(value));
            })
            .or_insert_with(|| trim_header_value(value));
    }

    let mut sorted_signed = signed_headers.to_vec();
    sorted_signed.sort();

    let mut canonical_headers = String::new();
    for name in &sorted_signed {
        let value = lower_headers.get(name).map(String::as_str).unwrap_or("");
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(value);
        canonical_headers.push('\n');
    }

    let signed_headers_str = sorted_signed.join(";");

    [
        method,
        &canonical_uri,
        canonical_query,
        &canonical_headers,
        &signed_headers_str,
        payload_hash,
    ]
    .join("\n")
}

pub fn build_string_to_sign(timestamp: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{ALGORITHM}\n{timestamp}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreserved_characters_pass_through() {
        assert_eq!(uri_encode("abc-._~123", true), "abc-._~123");
    }

    #[test]
    fn space_becomes_percent_20() {
        assert_eq!(uri_encode("a b", true), "a%20b");
    }

    #[test]
    fn path_preserves_slashes() {
        assert_eq!(uri_encode_path("/a b/c"), "/a%20b/c");
    }

    #[test]
    fn query_params_sorted_by_name_then_value() {
        let q = build_canonical_query_string("b=2&a=2&a=1");
        assert_eq!(q, "a=1&a=2&b=2");
    }

    #[test]
    fn presigned_query_excludes_signature() {
        let q = build_canonical_query_string_for_presigned(
            "X-Amz-Signature=deadbeef&X-Amz-Expires=900",
        );
        assert_eq!(q, "X-Amz-Expires=900");
    }

    #[test]
    fn header_values_trim_and_collapse_spaces() {
        assert_eq!(trim_header_value("  a   b  "), "a b");
    }
}
