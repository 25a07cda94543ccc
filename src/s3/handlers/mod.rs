//! S3 operation handlers, one module per entity family. Every routed
//! handler follows the same shape: an outer `async fn`
//! with the actix extractor signature that catches an inner `S3Result` and
//! renders failures via `middleware::render_error`, so auth/body errors and
//! business-logic errors go through one XML translation path.

pub mod bucket;
pub mod multipart;
pub mod nonstandard;
pub mod object;

use crate::app_state::AppState;
use crate::error::{S3Error, S3Result};
use crate::model::ObjectHeaders;
use crate::storage::{Chunk, ChunkIter};
use actix_web::{web, HttpRequest};
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};

/// Buffer an entire request body off its raw payload stream, the teacher's
/// own `web::Payload` + `futures::StreamExt` idiom (see
/// `s3_put_object_handler` in the teacher's `handlers.rs`). Used for bodies
/// too small to bother streaming (ACL/XML bodies) and as the fallback path
/// when SigV4 needs the full body to hash (see `can_stream_body`).
pub async fn buffer_payload(mut payload: web::Payload) -> S3Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| S3Error::internal_error(format!("error reading request body: {e}")))?;
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Whether a request's body can be streamed straight into storage without
/// buffering it first. SigV4 only needs the raw body when
/// `x-amz-content-sha256` is absent (see `auth::verify_header_auth`); every
/// S3-native client sets that header on every signed request (even
/// `UNSIGNED-PAYLOAD` is a value, not an omission), and presigned URLs never
/// cover the body at all. Auth disabled entirely is the same as always
/// being able to stream.
pub fn can_stream_body(req: &HttpRequest, state: &AppState) -> bool {
    !state.config.auth.enabled
        || req.headers().contains_key("x-amz-content-sha256")
        || req.query_string().contains("X-Amz-Signature=")
}

/// Drain a request's raw payload into `f` chunk by chunk instead of
/// buffering the whole body first, so PUT/UploadPart never hold an entire
/// object in memory (spec.md's Design Note "Streaming"). `f` runs on
/// `web::block`'s thread pool; a bounded channel carries chunks from the
/// async payload read to the blocking writer, so a slow disk applies
/// backpressure to the client instead of letting the body queue up in
/// memory.
pub async fn stream_body_into<F, T>(mut payload: web::Payload, f: F) -> S3Result<T>
where
    F: FnOnce(ChunkIter) -> S3Result<T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel::<S3Result<Chunk>>(4);

    struct BlockingChunks(tokio::sync::mpsc::Receiver<S3Result<Chunk>>);
    impl Iterator for BlockingChunks {
        type Item = S3Result<Chunk>;
        fn next(&mut self) -> Option<Self::Item> {
            self.0.blocking_recv()
        }
    }

    let blocking = web::block(move || f(Box::new(BlockingChunks(rx))));

    let send_fut = async move {
        while let Some(chunk) = payload.next().await {
            let chunk = chunk.map_err(|e| S3Error::internal_error(format!("error reading request body: {e}")))?;
            if tx.send(Ok(chunk.to_vec())).await.is_err() {
                break;
            }
        }
        Ok::<(), S3Error>(())
    };

    let (send_res, block_res) = tokio::join!(send_fut, blocking);
    send_res?;
    block_res.map_err(|e| S3Error::internal_error(e.to_string()))?
}

/// Parse a request's raw query string into a name → value map, URL-decoded.
/// Flags with no `=value` (e.g. `?acl`, `?uploads`) map to the empty string,
/// which is enough to test for presence with `.contains_key`.
pub fn query_map(req: &HttpRequest) -> HashMap<String, String> {
    req.query_string()
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (
                urlencoding::decode(k).map(|c| c.into_owned()).unwrap_or_else(|_| k.to_string()),
                urlencoding::decode(v).map(|c| c.into_owned()).unwrap_or_else(|_| v.to_string()),
            ),
            None => (
                urlencoding::decode(pair).map(|c| c.into_owned()).unwrap_or_else(|_| pair.to_string()),
                String::new(),
            ),
        })
        .collect()
}

/// DNS-compatible S3 bucket name rules: 3-63 chars, lowercase
/// alphanumerics/hyphens/dots, no leading/trailing hyphen, not IP-shaped, no
/// consecutive dots.
pub fn validate_bucket_name(name: &str) -> S3Result<()> {
    let len = name.len();
    if !(3..=63).contains(&len) {
        return Err(S3Error::invalid_bucket_name(
            "The specified bucket is not valid. Bucket names must be between 3 and 63 characters.",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(S3Error::invalid_bucket_name(
            "The specified bucket is not valid. Bucket names may only contain lowercase letters, numbers, periods, and hyphens.",
        ));
    }
    if name.starts_with('-') || name.ends_with('-') || name.starts_with('.') || name.ends_with('.') {
        return Err(S3Error::invalid_bucket_name(
            "The specified bucket is not valid. Bucket names must not start or end with a hyphen or period.",
        ));
    }
    if name.contains("..") {
        return Err(S3Error::invalid_bucket_name(
            "The specified bucket is not valid. Bucket names must not contain consecutive periods.",
        ));
    }
    if name.split('.').all(|octet| !octet.is_empty() && octet.chars().all(|c| c.is_ascii_digit()))
        && name.split('.').count() == 4
    {
        return Err(S3Error::invalid_bucket_name(
            "The specified bucket is not valid. Bucket names must not be formatted as an IP address.",
        ));
    }
    Ok(())
}

/// Object key rules: nonempty, ≤ 1024 UTF-8 bytes, no reserved
/// control characters.
pub fn validate_object_key(key: &str) -> S3Result<()> {
    if key.is_empty() {
        return Err(S3Error::invalid_argument("Object key must not be empty."));
    }
    if key.len() > 1024 {
        return Err(S3Error::invalid_argument("Object key must be 1024 bytes or fewer."));
    }
    if key.chars().any(|c| c.is_control()) {
        return Err(S3Error::invalid_argument(
            "Object key must not contain control characters.",
        ));
    }
    Ok(())
}

/// Build an `ObjectHeaders` snapshot from the request's `Content-*` headers,
/// captured at PutObject/CreateMultipartUpload time and replayed verbatim on
/// every subsequent GET/HEAD.
pub fn object_headers_from_request(req: &HttpRequest) -> ObjectHeaders {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    ObjectHeaders {
        content_type: header("content-type"),
        content_encoding: header("content-encoding"),
        content_language: header("content-language"),
        content_disposition: header("content-disposition"),
        cache_control: header("cache-control"),
        expires: header("expires"),
    }
}

/// Collect `x-amz-meta-*` request headers into the user-metadata map, keyed
/// by the suffix after the prefix.
pub fn user_metadata_from_request(req: &HttpRequest) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in req.headers() {
        if let Some(suffix) = name.as_str().strip_prefix("x-amz-meta-") {
            if let Ok(v) = value.to_str() {
                out.insert(suffix.to_string(), v.to_string());
            }
        }
    }
    out
}

/// Storage class from `x-amz-storage-class`, defaulting to `STANDARD`.
pub fn storage_class_from_request(req: &HttpRequest) -> String {
    req.headers()
        .get("x-amz-storage-class")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("STANDARD")
        .to_string()
}

/// Resolve the ACL to store for a newly created/overwritten bucket or
/// object: an explicit XML body wins, then the `x-amz-acl` canned header,
/// then private-to-owner.
pub fn resolve_acl(
    req: &HttpRequest,
    body: &[u8],
    owner_id: &str,
    owner_display: &str,
) -> S3Result<crate::acl::AccessControlPolicy> {
    if !body.is_empty() {
        let text = std::str::from_utf8(body).map_err(|e| S3Error::malformed_xml(e.to_string()))?;
        return crate::acl::AccessControlPolicy::from_xml(text).map_err(S3Error::malformed_xml);
    }
    if let Some(canned) = req.headers().get("x-amz-acl").and_then(|v| v.to_str().ok()) {
        return crate::acl::AccessControlPolicy::from_canned(canned, owner_id, owner_display)
            .ok_or_else(|| S3Error::invalid_argument(format!("Invalid canned ACL: {canned}")));
    }
    Ok(crate::acl::AccessControlPolicy::private(owner_id, owner_display))
}

/// Split an `x-amz-copy-source` value (URL-decoded, optionally
/// `/bucket/key...` or `bucket/key...`, optionally carrying a
/// `?versionId=...` we ignore) into `(bucket, key)`.
pub fn parse_copy_source(raw: &str) -> S3Result<(String, String)> {
    let decoded = urlencoding::decode(raw)
        .map(|c| c.into_owned())
        .unwrap_or_else(|_| raw.to_string());
    let trimmed = decoded.strip_prefix('/').unwrap_or(&decoded);
    let trimmed = trimmed.split('?').next().unwrap_or(trimmed);
    let (bucket, key) = trimmed
        .split_once('/')
        .ok_or_else(|| S3Error::invalid_argument("Invalid x-amz-copy-source."))?;
    if bucket.is_empty() || key.is_empty() {
        return Err(S3Error::invalid_argument("Invalid x-amz-copy-source."));
    }
    Ok((bucket.to_string(), key.to_string()))
}

/// Minimal inbound-XML scanner shared by CreateBucketConfiguration, Delete,
/// and CompleteMultipartUpload bodies: walks the quick-xml event stream and
/// hands the caller `(local_name_path, text)` for every text node, letting
/// each parser match on the handful of element names it cares about without
/// caring about namespaces or prefixes.
pub mod xmlreq {
    use crate::error::{S3Error, S3Result};
    use quick_xml::events::Event;
    use quick_xml::Reader;

    pub fn location_constraint(body: &[u8]) -> S3Result<Option<String>> {
        if body.is_empty() {
            return Ok(None);
        }
        let mut reader = Reader::from_reader(body);
        reader.config_mut().trim_text = true;
        let mut buf = Vec::new();
        let mut in_location = false;
        let mut result = None;
        loop {
            match reader.read_event_into(&mut buf).map_err(|e| S3Error::malformed_xml(e.to_string()))? {
                Event::Start(e) if e.local_name().as_ref() == b"LocationConstraint" => in_location = true,
                Event::End(e) if e.local_name().as_ref() == b"LocationConstraint" => in_location = false,
                Event::Text(t) if in_location => {
                    result = Some(t.unescape().map_err(|e| S3Error::malformed_xml(e.to_string()))?.into_owned());
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        Ok(result)
    }

    /// Returns `(quiet, keys)`.
    pub fn delete_request(body: &[u8]) -> S3Result<(bool, Vec<String>)> {
        let mut reader = Reader::from_reader(body);
        reader.config_mut().trim_text = true;
        let mut buf = Vec::new();
        let mut quiet = false;
        let mut keys = Vec::new();
        let mut in_key = false;
        let mut in_quiet = false;
        loop {
            match reader.read_event_into(&mut buf).map_err(|e| S3Error::malformed_xml(e.to_string()))? {
                Event::Start(e) if e.local_name().as_ref() == b"Key" => in_key = true,
                Event::End(e) if e.local_name().as_ref() == b"Key" => in_key = false,
                Event::Start(e) if e.local_name().as_ref() == b"Quiet" => in_quiet = true,
                Event::End(e) if e.local_name().as_ref() == b"Quiet" => in_quiet = false,
                Event::Text(t) if in_key => {
                    keys.push(t.unescape().map_err(|e| S3Error::malformed_xml(e.to_string()))?.into_owned());
                }
                Event::Text(t) if in_quiet => {
                    let text = t.unescape().map_err(|e| S3Error::malformed_xml(e.to_string()))?;
                    quiet = text.trim() == "true";
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        if keys.is_empty() {
            return Err(S3Error::malformed_xml("Delete request must contain at least one Object."));
        }
        Ok((quiet, keys))
    }

    /// Returns the `(PartNumber, ETag)` pairs in document order — callers
    /// check ascending order themselves.
    pub fn complete_multipart_parts(body: &[u8]) -> S3Result<Vec<(u32, String)>> {
        let mut reader = Reader::from_reader(body);
        reader.config_mut().trim_text = true;
        let mut buf = Vec::new();
        let mut parts = Vec::new();
        let mut current_number: Option<u32> = None;
        let mut current_etag: Option<String> = None;
        let mut in_part_number = false;
        let mut in_etag = false;
        loop {
            match reader.read_event_into(&mut buf).map_err(|e| S3Error::malformed_xml(e.to_string()))? {
                Event::Start(e) if e.local_name().as_ref() == b"Part" => {
                    current_number = None;
                    current_etag = None;
                }
                Event::End(e) if e.local_name().as_ref() == b"Part" => {
                    let (Some(n), Some(tag)) = (current_number.take(), current_etag.take()) else {
                        return Err(S3Error::malformed_xml("Part element missing PartNumber or ETag."));
                    };
                    parts.push((n, tag));
                }
                Event::Start(e) if e.local_name().as_ref() == b"PartNumber" => in_part_number = true,
                Event::End(e) if e.local_name().as_ref() == b"PartNumber" => in_part_number = false,
                Event::Start(e) if e.local_name().as_ref() == b"ETag" => in_etag = true,
                Event::End(e) if e.local_name().as_ref() == b"ETag" => in_etag = false,
                Event::Text(t) if in_part_number => {
                    let text = t.unescape().map_err(|e| S3Error::malformed_xml(e.to_string()))?;
                    current_number =
                        Some(text.trim().parse().map_err(|_| S3Error::malformed_xml("Invalid PartNumber."))?);
                }
                Event::Text(t) if in_etag => {
                    current_etag = Some(t.unescape().map_err(|e| S3Error::malformed_xml(e.to_string()))?.into_owned());
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }
        if parts.is_empty() {
            return Err(S3Error::malformed_xml(
                "CompleteMultipartUpload must list at least one Part.",
            ));
        }
        Ok(parts)
    }
}
