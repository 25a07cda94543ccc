//! Multipart upload handlers: Create/Upload/UploadCopy/Complete/
//! Abort/ListParts plus ListMultipartUploads (reached from the bucket-GET
//! dispatch in `handlers::bucket`).

use crate::app_state::AppState;
use crate::context::Principal;
use crate::error::{S3Error, S3Result};
use crate::model::{MAX_PART_NUMBER, MIN_PART_NUMBER, MIN_PART_SIZE};
use crate::s3::handlers::{
    object_headers_from_request, parse_copy_source, query_map, resolve_acl, storage_class_from_request,
    user_metadata_from_request, validate_object_key, xmlreq,
};
use crate::s3::{middleware, xml};
use crate::{conditional, etag, range, xml_util};
use actix_web::{web, HttpRequest, HttpResponse};
use std::collections::HashMap;

pub async fn create_multipart_upload(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    let (bucket, key) = path.into_inner();
    let principal = match middleware::authenticate(&req, &body, &state).await {
        Ok(p) => p,
        Err(e) => return middleware::render_error(&req, e),
    };
    match create_multipart_upload_inner(&state, &req, &bucket, &key, &principal) {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

fn create_multipart_upload_inner(
    state: &AppState,
    req: &HttpRequest,
    bucket: &str,
    key: &str,
    principal: &Principal,
) -> S3Result<HttpResponse> {
    state.metadata.get_bucket(bucket)?.ok_or_else(|| S3Error::no_such_bucket(bucket))?;
    validate_object_key(key)?;

    let headers = object_headers_from_request(req);
    let user_metadata = user_metadata_from_request(req);
    let storage_class = storage_class_from_request(req);
    let acl = resolve_acl(req, &[], &principal.owner_id, &principal.display_name)?;
    let upload_id = uuid::Uuid::new_v4().to_string();

    state.metadata.create_multipart_upload(
        bucket,
        key,
        &upload_id,
        &headers,
        &storage_class,
        &crate::metadata::policy_to_json(&acl),
        &user_metadata,
        &principal.owner_id,
        &principal.display_name,
    )?;

    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .body(xml::initiate_multipart_upload_result(bucket, key, &upload_id)))
}

/// PUT /{bucket}/{key}?partNumber=N&uploadId=U, dispatching on
/// `x-amz-copy-source` between UploadPart and UploadPartCopy.
///
/// UploadPartCopy never reads a request body (the part's bytes come from
/// the source object), so it's buffered up front like every other small
/// body. UploadPart streams its body straight into storage unless SigV4
/// needs the whole thing buffered first (see `can_stream_body`).
pub async fn upload_part_dispatch(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    payload: web::Payload,
) -> HttpResponse {
    let (bucket, key) = path.into_inner();
    let query = query_map(&req);
    let result = if req.headers().contains_key("x-amz-copy-source") {
        upload_part_copy_entry(&state, &req, &bucket, &key, &query, payload).await
    } else {
        upload_part_entry(&state, &req, &bucket, &key, &query, payload).await
    };
    match result {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

async fn upload_part_copy_entry(
    state: &AppState,
    req: &HttpRequest,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    payload: web::Payload,
) -> S3Result<HttpResponse> {
    let body = crate::s3::handlers::buffer_payload(payload).await?;
    middleware::authenticate(req, &body, state).await?;
    upload_part_copy(state, req, bucket, key, query).await
}

async fn upload_part_entry(
    state: &AppState,
    req: &HttpRequest,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    payload: web::Payload,
) -> S3Result<HttpResponse> {
    if crate::s3::handlers::can_stream_body(req, state) {
        middleware::authenticate(req, &[], state).await?;
        upload_part_streaming(state, bucket, key, query, payload).await
    } else {
        let body = crate::s3::handlers::buffer_payload(payload).await?;
        middleware::authenticate(req, &body, state).await?;
        upload_part(state, bucket, key, query, web::Bytes::from(body)).await
    }
}

fn part_params(query: &HashMap<String, String>) -> S3Result<(u32, String)> {
    let part_number: u32 = query
        .get("partNumber")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| S3Error::invalid_argument("Missing or invalid partNumber."))?;
    if !(MIN_PART_NUMBER..=MAX_PART_NUMBER).contains(&part_number) {
        return Err(S3Error::invalid_argument(format!(
            "Part number must be between {MIN_PART_NUMBER} and {MAX_PART_NUMBER}."
        )));
    }
    let upload_id = query
        .get("uploadId")
        .cloned()
        .ok_or_else(|| S3Error::invalid_argument("Missing uploadId."))?;
    Ok((part_number, upload_id))
}

async fn upload_part(
    state: &AppState,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    body: web::Bytes,
) -> S3Result<HttpResponse> {
    let (part_number, upload_id) = part_params(query)?;
    state
        .metadata
        .get_multipart_upload(bucket, key, &upload_id)?
        .ok_or_else(|| S3Error::no_such_upload(&upload_id))?;

    let size = body.len() as u64;
    let storage = state.storage.clone();
    let (b, k, u) = (bucket.to_string(), key.to_string(), upload_id.clone());
    let md5_hex = web::block(move || storage.put_part(&b, &k, &u, part_number, &body))
        .await
        .map_err(|e| S3Error::internal_error(e.to_string()))??;
    let quoted_etag = etag::quote(&md5_hex);

    state.metadata.put_part(&upload_id, part_number, size, &quoted_etag)?;

    Ok(HttpResponse::Ok().insert_header(("ETag", quoted_etag)).finish())
}

/// Streamed counterpart to `upload_part`: drains the request body straight
/// into `storage.put_part_stream` chunk by chunk instead of buffering it
/// into one `Vec<u8>` first.
async fn upload_part_streaming(
    state: &AppState,
    bucket: &str,
    key: &str,
    query: &HashMap<String, String>,
    payload: web::Payload,
) -> S3Result<HttpResponse> {
    let (part_number, upload_id) = part_params(query)?;
    state
        .metadata
        .get_multipart_upload(bucket, key, &upload_id)?
        .ok_or_else(|| S3Error::no_such_upload(&upload_id))?;

    let storage = state.storage.clone();
    let (b, k, u) = (bucket.to_string(), key.to_string(), upload_id.clone());
    let (md5_hex, size) = crate::s3::handlers::stream_body_into(payload, move |chunks| {
        storage.put_part_stream(&b, &k, &u, part_number, chunks)
    })
    .await?;
    let quoted_etag = etag::quote(&md5_hex);

    state.metadata.put_part(&upload_id, part_number, size, &quoted_etag)?;

    Ok(HttpResponse::Ok().insert_header(("ETag", quoted_etag)).finish())
}

async fn upload_part_copy(
    state: &AppState,
    req: &HttpRequest,
    dst_bucket: &str,
    dst_key: &str,
    query: &HashMap<String, String>,
) -> S3Result<HttpResponse> {
    let (part_number, upload_id) = part_params(query)?;
    state
        .metadata
        .get_multipart_upload(dst_bucket, dst_key, &upload_id)?
        .ok_or_else(|| S3Error::no_such_upload(&upload_id))?;

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

    let copy_range = range::parse(
        req.headers().get("x-amz-copy-source-range").and_then(|v| v.to_str().ok()),
        src_row.size,
    )?;

    let storage = state.storage.clone();
    let (sb, sk) = (src_bucket.clone(), src_key.clone());
    let (offset, length) = match copy_range {
        Some(r) => (Some(r.start), Some(r.len())),
        None => (None, None),
    };
    let bytes = web::block(move || storage.get_range(&sb, &sk, offset, length))
        .await
        .map_err(|e| S3Error::internal_error(e.to_string()))??;
    let part_size = bytes.len() as u64;

    let storage = state.storage.clone();
    let (b, k, u) = (dst_bucket.to_string(), dst_key.to_string(), upload_id.clone());
    let md5_hex = web::block(move || storage.put_part(&b, &k, &u, part_number, &bytes))
        .await
        .map_err(|e| S3Error::internal_error(e.to_string()))??;
    let quoted_etag = etag::quote(&md5_hex);

    state.metadata.put_part(&upload_id, part_number, part_size, &quoted_etag)?;

    let last_modified = xml_util::now_iso();
    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .body(xml::copy_part_result(&quoted_etag, &last_modified)))
}

pub async fn complete_multipart_upload(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    let (bucket, key) = path.into_inner();
    if let Err(e) = middleware::authenticate(&req, &body, &state).await {
        return middleware::render_error(&req, e);
    }
    let query = query_map(&req);
    let Some(upload_id) = query.get("uploadId").cloned() else {
        return middleware::render_error(&req, S3Error::invalid_argument("Missing uploadId."));
    };
    match complete_multipart_upload_inner(&state, &req, &bucket, &key, &upload_id, &body).await {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

async fn complete_multipart_upload_inner(
    state: &AppState,
    req: &HttpRequest,
    bucket: &str,
    key: &str,
    upload_id: &str,
    body: &[u8],
) -> S3Result<HttpResponse> {
    let upload = state
        .metadata
        .get_multipart_upload(bucket, key, upload_id)?
        .ok_or_else(|| S3Error::no_such_upload(upload_id))?;

    let requested = xmlreq::complete_multipart_parts(body)?;
    let mut last_number = 0u32;
    for (number, _) in &requested {
        if *number <= last_number {
            return Err(S3Error::invalid_part_order());
        }
        last_number = *number;
    }

    let stored_parts = state.metadata.get_parts_for_completion(upload_id)?;
    let stored: std::collections::HashMap<u32, &crate::metadata::MultipartPartRow> =
        stored_parts.iter().map(|p| (p.part_number, p)).collect();

    let mut ordered_etags = Vec::with_capacity(requested.len());
    let mut part_numbers = Vec::with_capacity(requested.len());
    let mut total_size = 0u64;
    let part_count = requested.len();
    for (idx, (number, client_etag)) in requested.iter().enumerate() {
        let Some(part) = stored.get(number) else {
            return Err(S3Error::invalid_part(format!("Part {number} was not uploaded.")));
        };
        if etag::strip(&part.etag) != etag::strip(client_etag) {
            return Err(S3Error::invalid_part(format!("ETag for part {number} does not match.")));
        }
        if idx + 1 < part_count && part.size < MIN_PART_SIZE {
            return Err(S3Error::entity_too_small(format!(
                "Part {number} is smaller than the minimum part size."
            )));
        }
        ordered_etags.push(part.etag.clone());
        part_numbers.push(*number);
        total_size += part.size;
    }

    let storage = state.storage.clone();
    let (b, k, u, nums) = (bucket.to_string(), key.to_string(), upload_id.to_string(), part_numbers.clone());
    web::block(move || storage.assemble_parts(&b, &k, &u, &nums))
        .await
        .map_err(|e| S3Error::internal_error(e.to_string()))??;

    let composite_etag = etag::composite(&ordered_etags).map_err(S3Error::invalid_part)?;

    state.metadata.complete_multipart_upload(crate::metadata::CompleteMultipartParams {
        bucket,
        key,
        upload_id,
        size: total_size,
        etag: &composite_etag,
        headers: &upload.headers,
        storage_class: &upload.storage_class,
        acl: &upload.acl,
        user_metadata: &upload.user_metadata,
    })?;

    if let Err(e) = state.storage.delete_parts(bucket, upload_id) {
        log::warn!("best-effort part-blob cleanup failed for upload {upload_id}, queuing for retry: {e}");
        if let Err(e) = state.metadata.enqueue_pending_delete(
            crate::metadata::PendingDeleteKind::Parts,
            bucket,
            key,
            Some(upload_id),
        ) {
            log::error!("failed to queue retry part-blob cleanup for upload {upload_id}: {e}");
        }
    }

    let location = format!("{}/{}/{}", req.connection_info().scheme(), req.connection_info().host(), key);
    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .body(xml::complete_multipart_upload_result(bucket, key, &location, &composite_etag)))
}

pub async fn abort_multipart_upload(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    let (bucket, key) = path.into_inner();
    if let Err(e) = middleware::authenticate(&req, &body, &state).await {
        return middleware::render_error(&req, e);
    }
    let query = query_map(&req);
    let Some(upload_id) = query.get("uploadId").cloned() else {
        return middleware::render_error(&req, S3Error::invalid_argument("Missing uploadId."));
    };
    match abort_multipart_upload_inner(&state, &bucket, &key, &upload_id) {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

fn abort_multipart_upload_inner(state: &AppState, bucket: &str, key: &str, upload_id: &str) -> S3Result<HttpResponse> {
    state
        .metadata
        .get_multipart_upload(bucket, key, upload_id)?
        .ok_or_else(|| S3Error::no_such_upload(upload_id))?;
    state.metadata.abort_multipart_upload(bucket, key, upload_id)?;
    if let Err(e) = state.storage.delete_parts(bucket, upload_id) {
        log::warn!("best-effort part-blob cleanup failed for upload {upload_id}, queuing for retry: {e}");
        if let Err(e) = state.metadata.enqueue_pending_delete(
            crate::metadata::PendingDeleteKind::Parts,
            bucket,
            key,
            Some(upload_id),
        ) {
            log::error!("failed to queue retry part-blob cleanup for upload {upload_id}: {e}");
        }
    }
    Ok(HttpResponse::NoContent().finish())
}

pub async fn list_parts(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    let (bucket, key) = path.into_inner();
    if let Err(e) = middleware::authenticate(&req, &body, &state).await {
        return middleware::render_error(&req, e);
    }
    let query = query_map(&req);
    match list_parts_inner(&state, &bucket, &key, &query) {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

fn list_parts_inner(state: &AppState, bucket: &str, key: &str, query: &HashMap<String, String>) -> S3Result<HttpResponse> {
    let upload_id = query.get("uploadId").cloned().ok_or_else(|| S3Error::invalid_argument("Missing uploadId."))?;
    let upload = state
        .metadata
        .get_multipart_upload(bucket, key, &upload_id)?
        .ok_or_else(|| S3Error::no_such_upload(&upload_id))?;

    let part_number_marker: u32 = query.get("part-number-marker").and_then(|v| v.parse().ok()).unwrap_or(0);
    let max_parts: u32 = query.get("max-parts").and_then(|v| v.parse().ok()).unwrap_or(1000).min(1000);

    let result = state.metadata.list_parts(&upload_id, part_number_marker, max_parts)?;
    Ok(HttpResponse::Ok().content_type("application/xml").body(xml::list_parts_result(
        bucket,
        key,
        &upload_id,
        &upload.owner_id,
        &upload.owner_display,
        &upload.storage_class,
        part_number_marker,
        max_parts,
        &result,
    )))
}

/// Reached from `handlers::bucket::bucket_get_dispatch` for `GET /{bucket}?uploads`.
pub fn list_multipart_uploads(state: &AppState, bucket: &str, query: &HashMap<String, String>) -> S3Result<HttpResponse> {
    state.metadata.get_bucket(bucket)?.ok_or_else(|| S3Error::no_such_bucket(bucket))?;

    let prefix = query.get("prefix").cloned().unwrap_or_default();
    let delimiter = query.get("delimiter").cloned().unwrap_or_default();
    let key_marker = query.get("key-marker").cloned().unwrap_or_default();
    let upload_id_marker = query.get("upload-id-marker").cloned().unwrap_or_default();
    let max_uploads: u32 = query.get("max-uploads").and_then(|v| v.parse().ok()).unwrap_or(1000).min(1000);

    let result = state
        .metadata
        .list_multipart_uploads(bucket, &prefix, &delimiter, max_uploads, &key_marker, &upload_id_marker)?;

    Ok(HttpResponse::Ok().content_type("application/xml").body(xml::list_multipart_uploads_result(
        bucket,
        &prefix,
        &delimiter,
        &key_marker,
        &upload_id_marker,
        max_uploads,
        &result,
    )))
}
