//! The S3 error taxonomy as a single typed struct with per-code constructors.
//!
//! Every recognized failure carries its own HTTP status and S3 error code;
//! `actix_web::ResponseError` is the one translation site that turns an
//! `S3Error` into an XML body. Handlers never catch and downgrade a variant
//! — they raise the right one and let this impl render it.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::fmt;

#[derive(Debug)]
pub struct S3Error {
    pub code: &'static str,
    pub status: StatusCode,
    pub message: String,
    pub resource: String,
    pub extra_fields: Vec<(&'static str, String)>,
}

impl S3Error {
    fn new(code: &'static str, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            status,
            message: message.into(),
            resource: String::new(),
            extra_fields: Vec::new(),
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    pub fn with_extra(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.extra_fields.push((name, value.into()));
        self
    }

    // -- Request-shape errors ------------------------------------------------

    pub fn invalid_bucket_name(msg: impl Into<String>) -> Self {
        Self::new("InvalidBucketName", StatusCode::BAD_REQUEST, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new("InvalidArgument", StatusCode::BAD_REQUEST, msg)
    }

    pub fn malformed_xml(msg: impl Into<String>) -> Self {
        Self::new("MalformedXML", StatusCode::BAD_REQUEST, msg)
    }

    pub fn authorization_query_parameters_error() -> Self {
        Self::new(
            "AuthorizationQueryParametersError",
            StatusCode::BAD_REQUEST,
            "Error parsing the X-Amz-Credential/X-Amz-Signature query parameters.",
        )
    }

    pub fn invalid_range() -> Self {
        Self::new(
            "InvalidRange",
            StatusCode::RANGE_NOT_SATISFIABLE,
            "The requested range is not satisfiable.",
        )
    }

    // -- Auth errors ----------------------------------------------------------

    pub fn access_denied(msg: impl Into<String>) -> Self {
        Self::new("AccessDenied", StatusCode::FORBIDDEN, msg)
    }

    pub fn signature_does_not_match() -> Self {
        Self::new(
            "SignatureDoesNotMatch",
            StatusCode::FORBIDDEN,
            "The request signature we calculated does not match the signature you provided.",
        )
    }

    pub fn invalid_access_key_id() -> Self {
        Self::new(
            "InvalidAccessKeyId",
            StatusCode::FORBIDDEN,
            "The access key ID you provided does not exist in our records.",
        )
    }

    pub fn request_time_too_skewed() -> Self {
        Self::new(
            "RequestTimeTooSkewed",
            StatusCode::FORBIDDEN,
            "The difference between the request time and the current time is too large.",
        )
    }

    pub fn expired_presigned_url() -> Self {
        Self::new(
            "ExpiredPresignedUrl",
            StatusCode::BAD_REQUEST,
            "The presigned URL has expired.",
        )
    }

    // -- Resource errors --------------------------------------------------------

    pub fn no_such_bucket(bucket: &str) -> Self {
        Self::new(
            "NoSuchBucket",
            StatusCode::NOT_FOUND,
            "The specified bucket does not exist.",
        )
        .with_resource(format!("/{bucket}"))
    }

    pub fn no_such_key(bucket: &str, key: &str) -> Self {
        Self::new(
            "NoSuchKey",
            StatusCode::NOT_FOUND,
            "The specified key does not exist.",
        )
        .with_resource(format!("/{bucket}/{key}"))
    }

    pub fn no_such_upload(upload_id: &str) -> Self {
        Self::new(
            "NoSuchUpload",
            StatusCode::NOT_FOUND,
            format!(
                "The specified upload does not exist. The upload ID may be invalid, or the \
                 upload may have been aborted or completed: {upload_id}"
            ),
        )
    }

    pub fn bucket_not_empty(bucket: &str) -> Self {
        Self::new(
            "BucketNotEmpty",
            StatusCode::CONFLICT,
            "The bucket you tried to delete is not empty.",
        )
        .with_resource(format!("/{bucket}"))
    }

    pub fn precondition_failed() -> Self {
        Self::new(
            "PreconditionFailed",
            StatusCode::PRECONDITION_FAILED,
            "At least one of the preconditions you specified did not hold.",
        )
    }

    // -- Multipart errors ---------------------------------------------------

    pub fn invalid_part(msg: impl Into<String>) -> Self {
        Self::new("InvalidPart", StatusCode::BAD_REQUEST, msg)
    }

    pub fn invalid_part_order() -> Self {
        Self::new(
            "InvalidPartOrder",
            StatusCode::BAD_REQUEST,
            "The list of parts was not in ascending order. Parts must be ordered by part number.",
        )
    }

    pub fn entity_too_small(msg: impl Into<String>) -> Self {
        Self::new("EntityTooSmall", StatusCode::BAD_REQUEST, msg)
    }

    // -- Server errors --------------------------------------------------------

    pub fn internal_error(msg: impl Into<String>) -> Self {
        Self::new("InternalError", StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn not_implemented(msg: impl Into<String>) -> Self {
        Self::new("NotImplemented", StatusCode::NOT_IMPLEMENTED, msg)
    }

    /// Render this error as an S3 XML error body. Callers that know the
    /// request was HEAD should suppress the body entirely instead of
    /// calling this.
    pub fn to_xml(&self, request_id: &str) -> String {
        let mut body = String::new();
        body.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error>\n");
        body.push_str(&format!("<Code>{}</Code>\n", crate::xml_util::escape(self.code)));
        body.push_str(&format!(
            "<Message>{}</Message>\n",
            crate::xml_util::escape(&self.message)
        ));
        if !self.resource.is_empty() {
            body.push_str(&format!(
                "<Resource>{}</Resource>\n",
                crate::xml_util::escape(&self.resource)
            ));
        }
        body.push_str(&format!(
            "<RequestId>{}</RequestId>\n",
            crate::xml_util::escape(request_id)
        ));
        for (name, value) in &self.extra_fields {
            body.push_str(&format!(
                "<{name}>{}</{name}>\n",
                crate::xml_util::escape(value)
            ));
        }
        body.push_str("</Error>");
        body
    }
}

impl fmt::Display for S3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.status, self.message)
    }
}

impl std::error::Error for S3Error {}

impl ResponseError for S3Error {
    fn status_code(&self) -> StatusCode {
        self.status
    }

    fn error_response(&self) -> HttpResponse {
        if matches!(self.status, StatusCode::INTERNAL_SERVER_ERROR) {
            log::error!("internal error: {}", self.message);
        }
        // The request-id headers are attached by the common-headers
        // middleware regardless of success/failure; here we only need a
        // request id for the XML body itself, which the auth middleware
        // stashes in extensions before this ever fires. Fall back to an
        // empty id if the error happened before that middleware ran.
        HttpResponse::build(self.status)
            .content_type("application/xml")
            .body(self.to_xml(""))
    }
}

/// Convert lower-layer failures (I/O, SQLite, etc.) that a handler did not
/// anticipate into `InternalError`. Unrecognized errors from lower layers
/// always render this way rather than leaking implementation detail.
impl From<std::io::Error> for S3Error {
    fn from(e: std::io::Error) -> Self {
        S3Error::internal_error(e.to_string())
    }
}

impl From<rusqlite::Error> for S3Error {
    fn from(e: rusqlite::Error) -> Self {
        S3Error::internal_error(e.to_string())
    }
}

impl From<quick_xml::Error> for S3Error {
    fn from(e: quick_xml::Error) -> Self {
        S3Error::malformed_xml(e.to_string())
    }
}

pub type S3Result<T> = Result<T, S3Error>;
