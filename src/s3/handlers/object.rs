//! Single-object operation handlers: Put/Get/Head/Delete/Copy
//! plus Get/PutObjectAcl.

use crate::acl::AccessControlPolicy;
use crate::app_state::AppState;
use crate::context::Principal;
use crate::error::{S3Error, S3Result};
use crate::model::ObjectHeaders;
use crate::s3::handlers::{
    object_headers_from_request, parse_copy_source, resolve_acl, storage_class_from_request,
    user_metadata_from_request, validate_object_key,
};
use crate::s3::{middleware, xml};
use crate::{conditional, etag, range, xml_util};
use actix_web::{web, HttpRequest, HttpResponse};
use std::collections::BTreeMap;

fn apply_user_metadata_headers(mut builder: actix_web::HttpResponseBuilder, meta: &BTreeMap<String, String>) -> actix_web::HttpResponseBuilder {
    for (k, v) in meta {
        builder.insert_header((format!("x-amz-meta-{k}"), v.clone()));
    }
    builder
}

fn apply_object_headers(mut builder: actix_web::HttpResponseBuilder, headers: &ObjectHeaders) -> actix_web::HttpResponseBuilder {
    if let Some(v) = &headers.content_type {
        builder.content_type(v.clone());
    }
    if let Some(v) = &headers.content_encoding {
        builder.insert_header(("Content-Encoding", v.clone()));
    }
    if let Some(v) = &headers.content_language {
        builder.insert_header(("Content-Language", v.clone()));
    }
    if let Some(v) = &headers.content_disposition {
        builder.insert_header(("Content-Disposition", v.clone()));
    }
    if let Some(v) = &headers.cache_control {
        builder.insert_header(("Cache-Control", v.clone()));
    }
    if let Some(v) = &headers.expires {
        builder.insert_header(("Expires", v.clone()));
    }
    builder
}

/// `response-*` query overrides win over the stored
/// headers.
fn apply_response_overrides(mut builder: actix_web::HttpResponseBuilder, query: &std::collections::HashMap<String, String>) -> actix_web::HttpResponseBuilder {
    let over = |name: &str| query.get(name).cloned();
    if let Some(v) = over("response-content-type") {
        builder.content_type(v);
    }
    if let Some(v) = over("response-cache-control") {
        builder.insert_header(("Cache-Control", v));
    }
    if let Some(v) = over("response-content-disposition") {
        builder.insert_header(("Content-Disposition", v));
    }
    if let Some(v) = over("response-content-encoding") {
        builder.insert_header(("Content-Encoding", v));
    }
    if let Some(v) = over("response-content-language") {
        builder.insert_header(("Content-Language", v));
    }
    if let Some(v) = over("response-expires") {
        builder.insert_header(("Expires", v));
    }
    builder
}

pub async fn head_object(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(e) = middleware::authenticate(&req, &body, &state).await {
        return middleware::render_error(&req, e);
    }
    let (bucket, key) = path.into_inner();
    match get_or_head(&state, &req, &bucket, &key, true).await {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

pub async fn get_object(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(e) = middleware::authenticate(&req, &body, &state).await {
        return middleware::render_error(&req, e);
    }
    let (bucket, key) = path.into_inner();
    match get_or_head(&state, &req, &bucket, &key, false).await {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

async fn get_or_head(state: &AppState, req: &HttpRequest, bucket: &str, key: &str, head_only: bool) -> S3Result<HttpResponse> {
    log_mdc::insert("bucket", bucket);
    log_mdc::insert("key", key);
    let row = state
        .metadata
        .get_object(bucket, key)?
        .ok_or_else(|| S3Error::no_such_key(bucket, key))?;
    let last_modified = xml_util::parse_iso(&row.last_modified).unwrap_or_else(chrono::Utc::now);

    match conditional::evaluate(req.headers(), &row.etag, last_modified, true) {
        conditional::ConditionalOutcome::PreconditionFailed => return Err(S3Error::precondition_failed()),
        conditional::ConditionalOutcome::NotModified => {
            return Ok(HttpResponse::build(actix_web::http::StatusCode::NOT_MODIFIED)
                .insert_header(("ETag", row.etag.clone()))
                .insert_header(("Last-Modified", xml_util::to_rfc1123(last_modified)))
                .finish());
        }
        conditional::ConditionalOutcome::Proceed => {}
    }

    let byte_range = range::parse(req.headers().get("range").and_then(|v| v.to_str().ok()), row.size)?;

    let query = crate::s3::handlers::query_map(req);
    let mut builder = match byte_range {
        Some(_) => HttpResponse::build(actix_web::http::StatusCode::PARTIAL_CONTENT),
        None => HttpResponse::Ok(),
    };
    builder.insert_header(("Accept-Ranges", "bytes"));
    builder.insert_header(("Last-Modified", xml_util::to_rfc1123(last_modified)));
    builder.insert_header(("ETag", row.etag.clone()));
    builder = apply_object_headers(builder, &row.headers);
    builder = apply_user_metadata_headers(builder, &row.user_metadata);
    builder = apply_response_overrides(builder, &query);

    if let Some(r) = byte_range {
        builder.insert_header(("Content-Range", r.content_range_header(row.size)));
        builder.insert_header(("Content-Length", r.len().to_string()));
        if head_only {
            return Ok(builder.finish());
        }
        let stream = stream_object(state.storage.clone(), bucket.to_string(), key.to_string(), Some(r.start), Some(r.len()));
        return Ok(builder.streaming(stream));
    }

    builder.insert_header(("Content-Length", row.size.to_string()));
    if head_only {
        return Ok(builder.finish());
    }
    let stream = stream_object(state.storage.clone(), bucket.to_string(), key.to_string(), None, None);
    Ok(builder.streaming(stream))
}

/// A `Stream` of response-body chunks backed by `Storage::get_stream`. The
/// blocking iterator runs on `web::block`'s thread pool, feeding a bounded
/// channel the response body polls from, so GET never holds the whole
/// object in memory the way a single `storage.get` call would.
struct ChunkStream {
    rx: tokio::sync::mpsc::Receiver<S3Result<crate::storage::Chunk>>,
}

impl futures::Stream for ChunkStream {
    type Item = Result<web::Bytes, actix_web::Error>;

    fn poll_next(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            std::task::Poll::Ready(Some(Ok(chunk))) => std::task::Poll::Ready(Some(Ok(web::Bytes::from(chunk)))),
            std::task::Poll::Ready(Some(Err(e))) => {
                std::task::Poll::Ready(Some(Err(actix_web::error::ErrorInternalServerError(e.to_string()))))
            }
            std::task::Poll::Ready(None) => std::task::Poll::Ready(None),
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}

fn stream_object(
    storage: std::sync::Arc<dyn crate::storage::Storage>,
    bucket: String,
    key: String,
    offset: Option<u64>,
    length: Option<u64>,
) -> ChunkStream {
    let (tx, rx) = tokio::sync::mpsc::channel::<S3Result<crate::storage::Chunk>>(4);
    tokio::spawn(web::block(move || -> S3Result<()> {
        let iter = storage.get_stream(&bucket, &key, offset, length)?;
        for chunk in iter {
            if tx.blocking_send(chunk).is_err() {
                break;
            }
        }
        Ok(())
    }));
    ChunkStream { rx }
}

pub async fn delete_object(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(e) = middleware::authenticate(&req, &body, &state).await {
        return middleware::render_error(&req, e);
    }
    let (bucket, key) = path.into_inner();
    if let Err(e) = state.storage.delete(&bucket, &key) {
        log::warn!("best-effort blob delete failed for {bucket}/{key}, queuing for retry: {e}");
        if let Err(e) = state.metadata.enqueue_pending_delete(
            crate::metadata::PendingDeleteKind::Object,
            &bucket,
            &key,
            None,
        ) {
            log::error!("failed to queue retry delete for {bucket}/{key}: {e}");
        }
    }
    match state.metadata.delete_object(&bucket, &key) {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(e) => middleware::render_error(&req, e),
    }
}

pub async fn get_object_acl(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    if let Err(e) = middleware::authenticate(&req, &body, &state).await {
        return middleware::render_error(&req, e);
    }
    let (bucket, key) = path.into_inner();
    match get_object_acl_inner(&state, &bucket, &key) {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

fn get_object_acl_inner(state: &AppState, bucket: &str, key: &str) -> S3Result<HttpResponse> {
    let row = state
        .metadata
        .get_object(bucket, key)?
        .ok_or_else(|| S3Error::no_such_key(bucket, key))?;
    let bucket_row = state.metadata.get_bucket(bucket)?.ok_or_else(|| S3Error::no_such_bucket(bucket))?;
    let policy = crate::metadata::policy_from_json(&row.acl, &bucket_row.owner_id, &bucket_row.owner_display);
    Ok(HttpResponse::Ok().content_type("application/xml").body(policy.to_xml()))
}

/// PUT /{bucket}/{key}: dispatches PutObject, CopyObject, and PutObjectAcl
/// per the query-flag/header predicates in the dispatch table
/// (UploadPart/UploadPartCopy are handled one level up in `s3::router`,
/// which never calls this function when `uploadId`+`partNumber` are set).
///
/// CopyObject and PutObjectAcl bodies are small (XML, or absent) and are
/// buffered up front like every other handler. PutObject is the one path
/// worth streaming — its body can be an arbitrarily large object — so it is
/// only buffered when SigV4 needs the whole thing to compute a missing
/// `x-amz-content-sha256` (see `can_stream_body`).
pub async fn put_dispatch(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    payload: web::Payload,
) -> HttpResponse {
    let (bucket, key) = path.into_inner();
    let query = crate::s3::handlers::query_map(&req);
    let result = if query.contains_key("acl") || req.headers().contains_key("x-amz-copy-source") {
        put_acl_or_copy(&state, &req, &bucket, &key, &query, payload).await
    } else {
        put_object_entry(&state, &req, &bucket, &key, payload).await
    };
    match result {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

async fn put_acl_or_copy(
    state: &AppState,
    req: &HttpRequest,
    bucket: &str,
    key: &str,
    query: &std::collections::HashMap<String, String>,
    payload: web::Payload,
) -> S3Result<HttpResponse> {
    let body = crate::s3::handlers::buffer_payload(payload).await?;
    let principal = middleware::authenticate(req, &body, state).await?;
    if query.contains_key("acl") {
        put_object_acl(state, req, &body, bucket, key, &principal).await
    } else {
        copy_object(state, req, bucket, key, &principal).await
    }
}

async fn put_object_entry(
    state: &AppState,
    req: &HttpRequest,
    bucket: &str,
    key: &str,
    payload: web::Payload,
) -> S3Result<HttpResponse> {
    if crate::s3::handlers::can_stream_body(req, state) {
        let principal = middleware::authenticate(req, &[], state).await?;
        put_object_streaming(state, req, bucket, key, payload, &principal).await
    } else {
        let body = crate::s3::handlers::buffer_payload(payload).await?;
        let principal = middleware::authenticate(req, &body, state).await?;
        put_object(state, req, bucket, key, web::Bytes::from(body), &principal).await
    }
}

async fn put_object(
    state: &AppState,
    req: &HttpRequest,
    bucket: &str,
    key: &str,
    body: web::Bytes,
    principal: &Principal,
) -> S3Result<HttpResponse> {
    log_mdc::insert("bucket", bucket);
    log_mdc::insert("key", key);
    state.metadata.get_bucket(bucket)?.ok_or_else(|| S3Error::no_such_bucket(bucket))?;
    validate_object_key(key)?;

    let headers = object_headers_from_request(req);
    let user_metadata = user_metadata_from_request(req);
    let storage_class = storage_class_from_request(req);
    let acl = resolve_acl(req, &[], &principal.owner_id, &principal.display_name)?;

    let size = body.len() as u64;
    let storage = state.storage.clone();
    let (b, k) = (bucket.to_string(), key.to_string());
    let md5_hex = web::block(move || storage.put(&b, &k, &body))
        .await
        .map_err(|e| S3Error::internal_error(e.to_string()))??;
    let quoted_etag = etag::quote(&md5_hex);

    state.metadata.put_object(
        bucket,
        key,
        size,
        &quoted_etag,
        &headers,
        &storage_class,
        &crate::metadata::policy_to_json(&acl),
        &user_metadata,
    )?;

    Ok(HttpResponse::Ok().insert_header(("ETag", quoted_etag)).finish())
}

/// Streamed counterpart to `put_object`: the request body is drained
/// straight into `storage.put_stream` chunk by chunk instead of being
/// buffered into one `Vec<u8>` first.
async fn put_object_streaming(
    state: &AppState,
    req: &HttpRequest,
    bucket: &str,
    key: &str,
    payload: web::Payload,
    principal: &Principal,
) -> S3Result<HttpResponse> {
    log_mdc::insert("bucket", bucket);
    log_mdc::insert("key", key);
    state.metadata.get_bucket(bucket)?.ok_or_else(|| S3Error::no_such_bucket(bucket))?;
    validate_object_key(key)?;

    let headers = object_headers_from_request(req);
    let user_metadata = user_metadata_from_request(req);
    let storage_class = storage_class_from_request(req);
    let acl = resolve_acl(req, &[], &principal.owner_id, &principal.display_name)?;

    let storage = state.storage.clone();
    let (b, k) = (bucket.to_string(), key.to_string());
    let (md5_hex, size) =
        crate::s3::handlers::stream_body_into(payload, move |chunks| storage.put_stream(&b, &k, chunks)).await?;
    let quoted_etag = etag::quote(&md5_hex);

    state.metadata.put_object(
        bucket,
        key,
        size,
        &quoted_etag,
        &headers,
        &storage_class,
        &crate::metadata::policy_to_json(&acl),
        &user_metadata,
    )?;

    Ok(HttpResponse::Ok().insert_header(("ETag", quoted_etag)).finish())
}

async fn copy_object(
    state: &AppState,
    req: &HttpRequest,
    dst_bucket: &str,
    dst_key: &str,
    principal: &Principal,
) -> S3Result<HttpResponse> {
    state.metadata.get_bucket(dst_bucket)?.ok_or_else(|| S3Error::no_such_bucket(dst_bucket))?;
    validate_object_key(dst_key)?;

    let copy_source = req
        .headers()
        .get("x-amz-copy-source")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| S3Error::invalid_argument("Missing x-amz-copy-source."))?;
    let (src_bucket, src_key) = parse_copy_source(copy_source)?;

    let src_row = state
        .metadata
        .get_object(&src_bucket, &src_key)?
        .ok_or_else(|| S3Error::no_such_key(&src_bucket, &src_key))?;
    let src_last_modified = xml_util::parse_iso(&src_row.last_modified).unwrap_or_else(chrono::Utc::now);

    if conditional::evaluate_copy_source(req.headers(), &src_row.etag, src_last_modified)
        == conditional::ConditionalOutcome::PreconditionFailed
    {
        return Err(S3Error::precondition_failed());
    }

    let storage = state.storage.clone();
    let (sb, sk, db, dk) = (src_bucket.clone(), src_key.clone(), dst_bucket.to_string(), dst_key.to_string());
    let md5_hex = web::block(move || storage.copy_object(&sb, &sk, &db, &dk))
        .await
        .map_err(|e| S3Error::internal_error(e.to_string()))??;
    let new_etag = etag::quote(&md5_hex);

    let directive = req
        .headers()
        .get("x-amz-metadata-directive")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("COPY");
    let (headers, user_metadata) = if directive == "REPLACE" {
        (object_headers_from_request(req), user_metadata_from_request(req))
    } else {
        (src_row.headers.clone(), src_row.user_metadata.clone())
    };
    let acl = AccessControlPolicy::private(&principal.owner_id, &principal.display_name);

    state.metadata.put_object(
        dst_bucket,
        dst_key,
        src_row.size,
        &new_etag,
        &headers,
        &src_row.storage_class,
        &crate::metadata::policy_to_json(&acl),
        &user_metadata,
    )?;

    let last_modified = xml_util::now_iso();
    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .body(xml::copy_object_result(&new_etag, &last_modified)))
}

async fn put_object_acl(
    state: &AppState,
    req: &HttpRequest,
    body: &[u8],
    bucket: &str,
    key: &str,
    principal: &Principal,
) -> S3Result<HttpResponse> {
    state.metadata.get_object(bucket, key)?.ok_or_else(|| S3Error::no_such_key(bucket, key))?;
    let acl = resolve_acl(req, body, &principal.owner_id, &principal.display_name)?;
    state.metadata.update_object_acl(bucket, key, &crate::metadata::policy_to_json(&acl))?;
    Ok(HttpResponse::Ok().finish())
}
