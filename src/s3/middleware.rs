//! Request-pipeline cross-cutting concerns.
//!
//! Common-headers is real actix middleware (`common_headers`, wired with
//! `actix_web::middleware::from_fn`) since it never needs to see the
//! request body. SigV4 auth and exception-to-XML rendering are deliberately
//! *not* expressed as middleware: auth needs the raw body to hash when
//! `x-amz-content-sha256` is absent, and actix's `Service` chain has no way
//! to hand a buffered body to both the auth layer and the handler without
//! the handler re-reading a reconstructed payload stream. Instead every
//! routed handler reads its body once, calls [`authenticate`] with it, and
//! on failure renders the XML error itself via [`render_error`] — a single
//! small helper, so this stays one translation site, just invoked rather
//! than layered.

use crate::app_state::AppState;
use crate::auth::AuthFlavor;
use crate::context::{Principal, RequestIds};
use crate::error::S3Error;
use crate::xml_util;
use actix_web::dev::ServiceResponse;
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::middleware::Next;
use actix_web::{body::MessageBody, web, Error as ActixError, HttpMessage, HttpRequest, HttpResponse};
use chrono::Utc;

fn content_length(headers: &actix_web::http::header::HeaderMap) -> Option<u64> {
    headers
        .get(actix_web::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

pub async fn common_headers(
    mut req: actix_web::dev::ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, ActixError> {
    let ids = RequestIds::generate();
    req.extensions_mut().insert(ids.clone());
    log_mdc::insert("request_id", &ids.request_id);
    let state = req.app_data::<web::Data<AppState>>().cloned();
    if let Some(state) = &state {
        state.metrics.record_request();
        if let Some(len) = content_length(req.headers()) {
            state.metrics.record_bytes_received(len);
        }
    }

    let mut res = next.call(req).await?;

    if res.status().is_client_error() || res.status().is_server_error() {
        if let Some(state) = &state {
            state.metrics.record_error();
        }
    }
    if let Some(state) = &state {
        if let Some(len) = content_length(res.headers()) {
            state.metrics.record_bytes_sent(len);
        }
    }

    let headers = res.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&ids.request_id) {
        headers.insert(HeaderName::from_static("x-amz-request-id"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&ids.id2) {
        headers.insert(HeaderName::from_static("x-amz-id-2"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&xml_util::to_rfc1123(Utc::now())) {
        headers.insert(actix_web::http::header::DATE, v);
    }
    headers.insert(
        actix_web::http::header::SERVER,
        HeaderValue::from_static("BleepStore"),
    );
    Ok(res)
}

/// Authenticate a routed S3 request. `body` is the already-buffered request
/// body (handlers read it once, before any metadata/storage work, so this
/// can hash it without re-reading the stream).
///
/// On success, attaches the resolved `Principal` to the request extensions
/// (so downstream code — or tests — can recover it via
/// `context::principal`) and returns it. On failure, no extensions are
/// touched and no blob/metadata operation has run yet — nothing is
/// inserted or modified on an auth failure.
pub async fn authenticate(req: &HttpRequest, body: &[u8], state: &AppState) -> Result<Principal, S3Error> {
    if !state.config.auth.enabled {
        let anonymous = Principal {
            access_key: state.config.auth.access_key.clone(),
            owner_id: "bleepstore".to_string(),
            display_name: "BleepStore Administrator".to_string(),
        };
        req.extensions_mut().insert(anonymous.clone());
        return Ok(anonymous);
    }

    let query_string = req.query_string().to_string();
    let flavor = crate::auth::classify(req.headers(), &query_string)?;

    let method = req.method().as_str().to_string();
    let path = req.path().to_string();
    let headers = req.headers().clone();
    let body = body.to_vec();
    let authenticator = state.authenticator.clone();

    let principal = match flavor {
        AuthFlavor::Anonymous => {
            return Err(S3Error::access_denied(
                "Requests must be signed with AWS Signature Version 4.",
            ))
        }
        AuthFlavor::Header => {
            web::block(move || authenticator.verify_header_auth(&method, &path, &query_string, &headers, &body))
                .await
                .map_err(|e| S3Error::internal_error(e.to_string()))??
        }
        AuthFlavor::Presigned => {
            web::block(move || authenticator.verify_presigned(&method, &path, &query_string, &headers))
                .await
                .map_err(|e| S3Error::internal_error(e.to_string()))??
        }
    };

    req.extensions_mut().insert(principal.clone());
    Ok(principal)
}

/// Render an `S3Error` as an XML error body, suppressing the body entirely
/// for HEAD requests — HEAD responses carry no body under any
/// circumstance, including errors.
pub fn render_error(req: &HttpRequest, err: S3Error) -> HttpResponse {
    if matches!(err.status, actix_web::http::StatusCode::INTERNAL_SERVER_ERROR) {
        log::error!("internal error on {} {}: {}", req.method(), req.path(), err.message);
    } else {
        log::warn!(
            "{} {} -> {} {}",
            req.method(),
            req.path(),
            err.status.as_u16(),
            err.code
        );
    }
    let request_id = crate::context::request_ids(req).request_id;
    let mut builder = HttpResponse::build(err.status);
    if req.method() == actix_web::http::Method::HEAD {
        return builder.finish();
    }
    builder
        .content_type("application/xml")
        .body(err.to_xml(&request_id))
}
