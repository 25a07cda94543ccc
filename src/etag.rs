//! ETag quoting, comparison, and multipart composite-ETag computation.

/// Quote a raw MD5 hex digest as S3 does: `"<hex>"`.
pub fn quote(md5_hex: &str) -> String {
    format!("\"{md5_hex}\"")
}

/// Strip surrounding quotes and an optional leading `W/` weak marker, so
/// conditional-header comparisons ignore both.
pub fn strip(etag: &str) -> String {
    let mut s = etag.trim();
    if let Some(rest) = s.strip_prefix("W/") {
        s = rest.trim();
    }
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s = &s[1..s.len() - 1];
    }
    s.to_string()
}

/// Parse a comma-separated `If-Match`/`If-None-Match` header value into its
/// individual (unquoted) ETags.
pub fn split_list(header_value: &str) -> Vec<String> {
    header_value.split(',').map(|t| strip(t.trim())).collect()
}

/// Compute the composite ETag for a completed multipart upload: MD5 of the
/// concatenation of each part's raw 16-byte MD5 digest, formatted
/// `"<hex>-<N>"`.
pub fn composite(part_etags_quoted: &[String]) -> Result<String, String> {
    let mut concatenated = Vec::with_capacity(part_etags_quoted.len() * 16);
    for etag in part_etags_quoted {
        let clean = strip(etag);
        let bytes = hex::decode(&clean).map_err(|e| format!("invalid part ETag hex: {e}"))?;
        if bytes.len() != 16 {
            return Err(format!("part ETag {clean} is not a 16-byte MD5 digest"));
        }
        concatenated.extend_from_slice(&bytes);
    }
    let digest = md5::compute(&concatenated);
    Ok(format!("\"{:x}-{}\"", digest, part_etags_quoted.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_quotes_and_weak_marker() {
        assert_eq!(strip("\"abc\""), "abc");
        assert_eq!(strip("W/\"abc\""), "abc");
        assert_eq!(strip("abc"), "abc");
    }

    #[test]
    fn composite_etag_has_expected_shape() {
        let part1 = format!("\"{:x}\"", md5::compute(b"A".repeat(5 * 1024 * 1024)));
        let part2 = format!("\"{:x}\"", md5::compute(b"tail"));
        let composite = composite(&[part1, part2]).unwrap();
        assert!(composite.ends_with("-2\""));
        assert_eq!(composite.len(), 2 + 32 + 2);
    }
}
