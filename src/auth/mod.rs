//! SigV4 authentication: header-flavor and presigned-URL-flavor request
//! verification, dispatched from the auth middleware.

pub mod canonical;
pub mod signing;

use crate::context::Principal;
use crate::error::S3Error;
use crate::metadata::MetadataStore;
use actix_web::http::header::HeaderMap;
use chrono::{TimeZone, Utc};
use std::sync::Arc;

const SCOPE_TERMINATOR: &str = "aws4_request";
const SERVICE_NAME: &str = "s3";
const CLOCK_SKEW_TOLERANCE_SECS: i64 = 900;
const MAX_PRESIGNED_EXPIRES_SECS: i64 = 604_800;

struct Credential {
    access_key: String,
    date: String,
    region: String,
    service: String,
}

fn parse_credential(raw: &str) -> Result<Credential, S3Error> {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != 5 {
        return Err(S3Error::access_denied("Invalid Credential format."));
    }
    if parts[4] != SCOPE_TERMINATOR {
        return Err(S3Error::access_denied(format!(
            "Invalid credential scope terminator: {}",
            parts[4]
        )));
    }
    if parts[3] != SERVICE_NAME {
        return Err(S3Error::access_denied(format!(
            "Invalid credential service: {}",
            parts[3]
        )));
    }
    Ok(Credential {
        access_key: parts[0].to_string(),
        date: parts[1].to_string(),
        region: parts[2].to_string(),
        service: parts[3].to_string(),
    })
}

fn check_clock_skew(amz_date: &str) -> Result<chrono::DateTime<Utc>, S3Error> {
    let request_time = parse_amz_date(amz_date)
        .ok_or_else(|| S3Error::access_denied("Invalid x-amz-date format."))?;
    let diff = (Utc::now() - request_time).num_seconds().abs();
    if diff > CLOCK_SKEW_TOLERANCE_SECS {
        return Err(S3Error::request_time_too_skewed());
    }
    Ok(request_time)
}

fn parse_amz_date(s: &str) -> Option<chrono::DateTime<Utc>> {
    let naive = chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%SZ").ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

/// Parsed `Authorization: AWS4-HMAC-SHA256 Credential=..., SignedHeaders=...,
/// Signature=...` header.
struct AuthHeaderParts {
    credential: String,
    signed_headers: String,
    signature: String,
}

fn parse_authorization_header(header: &str) -> Result<AuthHeaderParts, S3Error> {
    let rest = header
        .strip_prefix("AWS4-HMAC-SHA256 ")
        .ok_or_else(|| S3Error::access_denied("Invalid Authorization header format."))?;

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;
    for part in rest.split(',') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("Credential=") {
            credential = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(v.to_string());
        } else if let Some(v) = part.strip_prefix("Signature=") {
            signature = Some(v.to_string());
        }
    }
    let (credential, signed_headers, signature) = match (credential, signed_headers, signature) {
        (Some(c), Some(sh), Some(sig)) => (c, sh, sig),
        _ => return Err(S3Error::access_denied("Invalid Authorization header format.")),
    };
    if signature.len() != 64 || !signature.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(S3Error::access_denied("Invalid Authorization header format."));
    }
    Ok(AuthHeaderParts {
        credential,
        signed_headers,
        signature,
    })
}

/// Verifies SigV4-signed requests against the credential store, caching
/// derived signing keys across requests.
pub struct SigV4Authenticator {
    metadata: Arc<dyn MetadataStore>,
    signing_key_cache: signing::SigningKeyCache,
}

impl SigV4Authenticator {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            metadata,
            signing_key_cache: signing::SigningKeyCache::new(),
        }
    }

    /// Verify a request carrying header-based SigV4 authentication. `body`
    /// is the raw request body, needed only when `x-amz-content-sha256` is
    /// absent, which non-S3-native SigV4 clients may omit.
    ///
    /// Synchronous and CPU-bound (metadata lookup + HMAC chain); the auth
    /// middleware offloads the call with `web::block`.
    pub fn verify_header_auth(
        &self,
        method: &str,
        path: &str,
        query_string: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Principal, S3Error> {
        let auth_header = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let parsed = parse_authorization_header(auth_header)?;
        let credential = parse_credential(&parsed.credential)?;

        let amz_date = headers
            .get("x-amz-date")
            .or_else(|| headers.get("date"))
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| S3Error::access_denied("Missing date header."))?
            .to_string();

        let date_part = &amz_date[..amz_date.len().min(8)];
        if date_part != credential.date {
            return Err(S3Error::access_denied(format!(
                "Date in Credential scope ({}) does not match date in x-amz-date header ({date_part}).",
                credential.date
            )));
        }

        check_clock_skew(&amz_date)?;

        let cred_row = self
            .metadata
            .get_credential(&credential.access_key)?
            .filter(|c| c.active)
            .ok_or_else(S3Error::invalid_access_key_id)?;

        let signed_headers: Vec<String> =
            parsed.signed_headers.split(';').map(str::to_string).collect();

        let payload_hash = match headers.get("x-amz-content-sha256").and_then(|v| v.to_str().ok()) {
            Some(h) => h.to_string(),
            None => canonical::sha256_hex(body),
        };

        let canonical_query = canonical::build_canonical_query_string(query_string);
        let canonical_request = canonical::build_canonical_request(
            method,
            path,
            &canonical_query,
            headers,
            &signed_headers,
            &payload_hash,
        );

        let scope = format!(
            "{}/{}/{}/{SCOPE_TERMINATOR}",
            credential.date, credential.region, credential.service
        );
        let string_to_sign = canonical::build_string_to_sign(&amz_date, &scope, &canonical_request);

        let signing_key = self.signing_key_cache.derive(
            &cred_row.secret_key,
            &credential.date,
            &credential.region,
            &credential.access_key,
        );
        let expected = signing::compute_signature(&signing_key, &string_to_sign);

        if !constant_time_eq(expected.as_bytes(), parsed.signature.as_bytes()) {
            return Err(S3Error::signature_does_not_match());
        }

        Ok(Principal {
            access_key: credential.access_key,
            owner_id: cred_row.owner_id,
            display_name: cred_row.display_name,
        })
    }

    /// Verify a presigned-URL request. `query_string` is the raw, still
    /// URL-encoded query string (including `X-Amz-Signature`).
    pub fn verify_presigned(
        &self,
        method: &str,
        path: &str,
        query_string: &str,
        headers: &HeaderMap,
    ) -> Result<Principal, S3Error> {
        let params = parse_query_params(query_string);
        let get = |name: &str| params.get(name).cloned();

        for required in [
            "X-Amz-Algorithm",
            "X-Amz-Credential",
            "X-Amz-Date",
            "X-Amz-Expires",
            "X-Amz-SignedHeaders",
            "X-Amz-Signature",
        ] {
            if !params.contains_key(required) {
                return Err(S3Error::authorization_query_parameters_error());
            }
        }

        let algorithm = get("X-Amz-Algorithm").unwrap();
        if algorithm != canonical::ALGORITHM {
            return Err(S3Error::access_denied(format!(
                "Unsupported algorithm: {algorithm}"
            )));
        }

        let credential = parse_credential(&get("X-Amz-Credential").unwrap())?;
        let amz_date = get("X-Amz-Date").unwrap();
        let amz_expires = get("X-Amz-Expires").unwrap();
        let signed_headers_str = get("X-Amz-SignedHeaders").unwrap();
        let provided_signature = get("X-Amz-Signature").unwrap();

        let date_part = &amz_date[..amz_date.len().min(8)];
        if date_part != credential.date {
            return Err(S3Error::access_denied(format!(
                "Date in Credential scope ({}) does not match X-Amz-Date ({date_part}).",
                credential.date
            )));
        }

        let expires_seconds: i64 = amz_expires
            .parse()
            .map_err(|_| S3Error::authorization_query_parameters_error())?;
        if !(1..=MAX_PRESIGNED_EXPIRES_SECS).contains(&expires_seconds) {
            return Err(S3Error::authorization_query_parameters_error());
        }

        let request_time = check_clock_skew(&amz_date)?;
        let now = Utc::now();
        if now.timestamp() > request_time.timestamp() + expires_seconds {
            return Err(S3Error::expired_presigned_url());
        }

        let cred_row = self
            .metadata
            .get_credential(&credential.access_key)?
            .filter(|c| c.active)
            .ok_or_else(S3Error::invalid_access_key_id)?;

        let signed_headers: Vec<String> =
            signed_headers_str.split(';').map(str::to_string).collect();

        let canonical_query = canonical::build_canonical_query_string_for_presigned(query_string);
        let canonical_request = canonical::build_canonical_request(
            method,
            path,
            &canonical_query,
            headers,
            &signed_headers,
            canonical::UNSIGNED_PAYLOAD,
        );

        let scope = format!(
            "{}/{}/{}/{SCOPE_TERMINATOR}",
            credential.date, credential.region, credential.service
        );
        let string_to_sign = canonical::build_string_to_sign(&amz_date, &scope, &canonical_request);

        let signing_key = self.signing_key_cache.derive(
            &cred_row.secret_key,
            &credential.date,
            &credential.region,
            &credential.access_key,
        );
        let expected = signing::compute_signature(&signing_key, &string_to_sign);

        if !constant_time_eq(expected.as_bytes(), provided_signature.as_bytes()) {
            return Err(S3Error::signature_does_not_match());
        }

        Ok(Principal {
            access_key: credential.access_key,
            owner_id: cred_row.owner_id,
            display_name: cred_row.display_name,
        })
    }
}

fn parse_query_params(query_string: &str) -> std::collections::HashMap<String, String> {
    query_string
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

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Checks whether the request carries header auth, presigned auth, both
/// (an error), or neither (also an error). Requests with both header and
/// presigned parameters present are rejected early.
pub fn classify(headers: &HeaderMap, query_string: &str) -> Result<AuthFlavor, S3Error> {
    let has_header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with(canonical::ALGORITHM))
        .unwrap_or(false);
    let has_presigned = query_string.contains("X-Amz-Algorithm=");

    match (has_header, has_presigned) {
        (true, true) => Err(S3Error::access_denied(
            "Both Authorization header and presigned URL parameters present.",
        )),
        (true, false) => Ok(AuthFlavor::Header),
        (false, true) => Ok(AuthFlavor::Presigned),
        (false, false) => Ok(AuthFlavor::Anonymous),
    }
}

pub enum AuthFlavor {
    Header,
    Presigned,
    Anonymous,
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderName, HeaderValue};

    #[test]
    fn classify_detects_both_present_as_error() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("authorization"),
            HeaderValue::from_static("AWS4-HMAC-SHA256 Credential=x"),
        );
        let err = classify(&headers, "X-Amz-Algorithm=AWS4-HMAC-SHA256").unwrap_err();
        assert_eq!(err.code, "AccessDenied");
    }

    #[test]
    fn classify_anonymous_when_neither_present() {
        let headers = HeaderMap::new();
        assert!(matches!(classify(&headers, "").unwrap(), AuthFlavor::Anonymous));
    }

    #[test]
    fn parse_authorization_header_extracts_parts() {
        let header = "AWS4-HMAC-SHA256 Credential=AKID/20260101/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature=0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcd";
        let parsed = parse_authorization_header(header).unwrap();
        assert_eq!(parsed.signed_headers, "host;x-amz-date");
    }

    #[test]
    fn credential_with_wrong_service_is_rejected() {
        let err = parse_credential("AKID/20260101/us-east-1/ec2/aws4_request").unwrap_err();
        assert_eq!(err.code, "AccessDenied");
    }
}
