//! HTTP `Range` header parsing. A single `bytes=...` range is supported;
//! multi-range requests are treated as "no range" (full body).

use crate::error::S3Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive end offset.
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range_header(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

/// Parse a `Range` header against a resource of `total` bytes.
///
/// Returns `Ok(None)` when there is no range to apply (header absent,
/// unparseable, or a multi-range request we don't support — all three fall
/// back to "serve the full body"). Returns `Err` only for a single
/// well-formed-but-unsatisfiable range, which must become a 416.
pub fn parse(header: Option<&str>, total: u64) -> Result<Option<ByteRange>, S3Error> {
    let Some(header) = header else {
        return Ok(None);
    };
    let Some(spec) = header.strip_prefix("bytes=") else {
        return Ok(None);
    };
    if spec.contains(',') {
        // Multi-range: treated as no range.
        return Ok(None);
    }
    let Some((start_str, end_str)) = spec.split_once('-') else {
        return Ok(None);
    };

    if start_str.is_empty() && end_str.is_empty() {
        return Err(S3Error::invalid_range());
    }

    if start_str.is_empty() {
        // Suffix range: bytes=-N -> last N bytes.
        let n: u64 = end_str.parse().map_err(|_| S3Error::invalid_range())?;
        if n == 0 {
            return Err(S3Error::invalid_range());
        }
        let n = n.min(total);
        if total == 0 {
            return Err(S3Error::invalid_range());
        }
        return Ok(Some(ByteRange {
            start: total - n,
            end: total - 1,
        }));
    }

    let start: u64 = start_str.parse().map_err(|_| S3Error::invalid_range())?;

    if end_str.is_empty() {
        // Open-ended: bytes=N-
        if start >= total {
            return Err(S3Error::invalid_range());
        }
        return Ok(Some(ByteRange {
            start,
            end: total - 1,
        }));
    }

    // Closed range: bytes=N-M
    let end: u64 = end_str.parse().map_err(|_| S3Error::invalid_range())?;
    if start > end || start >= total {
        return Err(S3Error::invalid_range());
    }
    let end = end.min(total - 1);
    Ok(Some(ByteRange { start, end }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_byte_range() {
        let r = parse(Some("bytes=0-0"), 16).unwrap().unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 0);
        assert_eq!(r.content_range_header(16), "bytes 0-0/16");
    }

    #[test]
    fn suffix_range_clamped_to_total() {
        let r = parse(Some("bytes=-5"), 3).unwrap().unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 2);
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn closed_range_beyond_total_is_unsatisfiable() {
        let err = parse(Some("bytes=100-200"), 100).unwrap_err();
        assert_eq!(err.code, "InvalidRange");
    }

    #[test]
    fn open_ended_range() {
        let r = parse(Some("bytes=5-"), 16).unwrap().unwrap();
        assert_eq!(r.start, 5);
        assert_eq!(r.end, 15);
    }

    #[test]
    fn multi_range_falls_back_to_no_range() {
        assert!(parse(Some("bytes=0-1,2-3"), 16).unwrap().is_none());
    }

    #[test]
    fn suffix_zero_is_invalid() {
        assert!(parse(Some("bytes=-0"), 16).is_err());
    }

    #[test]
    fn no_header_means_no_range() {
        assert!(parse(None, 16).unwrap().is_none());
    }
}
