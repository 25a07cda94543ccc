//! Bucket operation handlers.

use crate::app_state::AppState;
use crate::error::{S3Error, S3Result};
use crate::s3::handlers::{query_map, resolve_acl, validate_bucket_name};
use crate::s3::{middleware, xml};
use actix_web::{web, HttpRequest, HttpResponse};

pub async fn create_or_put_acl(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let bucket = path.into_inner();
    let query = query_map(&req);
    let principal = match middleware::authenticate(&req, &body, &state).await {
        Ok(p) => p,
        Err(e) => return middleware::render_error(&req, e),
    };
    let result = if query.contains_key("acl") {
        put_bucket_acl(&state, &bucket, &req, &body, &principal).await
    } else {
        create_bucket(&state, &bucket, &req, &body, &principal).await
    };
    match result {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

async fn create_bucket(
    state: &AppState,
    bucket: &str,
    req: &HttpRequest,
    body: &[u8],
    principal: &crate::context::Principal,
) -> S3Result<HttpResponse> {
    validate_bucket_name(bucket)?;

    if let Some(existing) = state.metadata.get_bucket(bucket)? {
        if existing.owner_id == principal.owner_id {
            return Ok(HttpResponse::Ok()
                .insert_header(("Location", format!("/{bucket}")))
                .finish());
        }
        return Err(S3Error::invalid_bucket_name(
            "The requested bucket name is not available.",
        ));
    }

    let region = crate::s3::handlers::xmlreq::location_constraint(body)?
        .unwrap_or_else(|| state.config.server.region.clone());
    let acl = resolve_acl(req, &[], &principal.owner_id, &principal.display_name)?;

    state.metadata.create_bucket(
        bucket,
        &region,
        &principal.owner_id,
        &principal.display_name,
        &crate::metadata::policy_to_json(&acl),
    )?;

    Ok(HttpResponse::Ok()
        .insert_header(("Location", format!("/{bucket}")))
        .finish())
}

async fn put_bucket_acl(
    state: &AppState,
    bucket: &str,
    req: &HttpRequest,
    body: &[u8],
    principal: &crate::context::Principal,
) -> S3Result<HttpResponse> {
    state
        .metadata
        .get_bucket(bucket)?
        .ok_or_else(|| S3Error::no_such_bucket(bucket))?;
    let acl = resolve_acl(req, body, &principal.owner_id, &principal.display_name)?;
    state.metadata.update_bucket_acl(bucket, &crate::metadata::policy_to_json(&acl))?;
    Ok(HttpResponse::Ok().finish())
}

pub async fn delete_bucket(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let bucket = path.into_inner();
    if let Err(e) = middleware::authenticate(&req, &body, &state).await {
        return middleware::render_error(&req, e);
    }
    match delete_bucket_inner(&state, &bucket) {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

fn delete_bucket_inner(state: &AppState, bucket: &str) -> S3Result<HttpResponse> {
    state
        .metadata
        .get_bucket(bucket)?
        .ok_or_else(|| S3Error::no_such_bucket(bucket))?;
    if state.metadata.count_objects(bucket)? > 0 {
        return Err(S3Error::bucket_not_empty(bucket));
    }
    state.metadata.delete_bucket(bucket)?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn head_bucket(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let bucket = path.into_inner();
    if let Err(e) = middleware::authenticate(&req, &body, &state).await {
        return middleware::render_error(&req, e);
    }
    match state.metadata.get_bucket(&bucket) {
        Ok(Some(row)) => HttpResponse::Ok()
            .insert_header(("x-amz-bucket-region", row.region))
            .finish(),
        Ok(None) => HttpResponse::NotFound().finish(),
        Err(_) => HttpResponse::InternalServerError().finish(),
    }
}

pub async fn bucket_get_dispatch(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let bucket = path.into_inner();
    let query = query_map(&req);
    if let Err(e) = middleware::authenticate(&req, &body, &state).await {
        return middleware::render_error(&req, e);
    }
    let result = if query.contains_key("location") {
        get_bucket_location(&state, &bucket)
    } else if query.contains_key("acl") {
        get_bucket_acl(&state, &bucket)
    } else if query.contains_key("uploads") {
        crate::s3::handlers::multipart::list_multipart_uploads(&state, &bucket, &query)
    } else {
        list_objects(&state, &bucket, &query)
    };
    match result {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

fn get_bucket_location(state: &AppState, bucket: &str) -> S3Result<HttpResponse> {
    let row = state
        .metadata
        .get_bucket(bucket)?
        .ok_or_else(|| S3Error::no_such_bucket(bucket))?;
    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .body(xml::location_constraint(&row.region)))
}

fn get_bucket_acl(state: &AppState, bucket: &str) -> S3Result<HttpResponse> {
    let row = state
        .metadata
        .get_bucket(bucket)?
        .ok_or_else(|| S3Error::no_such_bucket(bucket))?;
    let policy = crate::metadata::policy_from_json(&row.acl, &row.owner_id, &row.owner_display);
    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .body(policy.to_xml()))
}

fn list_objects(state: &AppState, bucket: &str, query: &std::collections::HashMap<String, String>) -> S3Result<HttpResponse> {
    state
        .metadata
        .get_bucket(bucket)?
        .ok_or_else(|| S3Error::no_such_bucket(bucket))?;

    let prefix = query.get("prefix").cloned().unwrap_or_default();
    let delimiter = query.get("delimiter").cloned().unwrap_or_default();
    let max_keys: u32 = query
        .get("max-keys")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000)
        .min(1000);
    let is_v2 = query.get("list-type").map(|v| v == "2").unwrap_or(false);

    if is_v2 {
        let continuation_token = query.get("continuation-token").map(String::as_str);
        let start_after = query.get("start-after").cloned().unwrap_or_default();
        let marker = continuation_token.unwrap_or(&start_after);
        let result = state.metadata.list_objects(bucket, &prefix, &delimiter, max_keys, marker, continuation_token)?;
        Ok(HttpResponse::Ok()
            .content_type("application/xml")
            .body(xml::list_objects_v2(bucket, &prefix, continuation_token, &start_after, max_keys, &delimiter, &result)))
    } else {
        let marker = query.get("marker").cloned().unwrap_or_default();
        let result = state.metadata.list_objects(bucket, &prefix, &delimiter, max_keys, &marker, None)?;
        Ok(HttpResponse::Ok()
            .content_type("application/xml")
            .body(xml::list_objects_v1(bucket, &prefix, &marker, max_keys, &delimiter, &result)))
    }
}

pub async fn list_buckets(req: HttpRequest, state: web::Data<AppState>, body: web::Bytes) -> HttpResponse {
    let principal = match middleware::authenticate(&req, &body, &state).await {
        Ok(p) => p,
        Err(e) => return middleware::render_error(&req, e),
    };
    match state.metadata.list_buckets(&principal.owner_id) {
        Ok(buckets) => HttpResponse::Ok()
            .content_type("application/xml")
            .body(xml::list_all_my_buckets(&principal.owner_id, &principal.display_name, &buckets)),
        Err(e) => middleware::render_error(&req, e),
    }
}

pub async fn delete_objects(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    let bucket = path.into_inner();
    if let Err(e) = middleware::authenticate(&req, &body, &state).await {
        return middleware::render_error(&req, e);
    }
    match delete_objects_inner(&state, &bucket, &body) {
        Ok(resp) => resp,
        Err(e) => middleware::render_error(&req, e),
    }
}

fn delete_objects_inner(state: &AppState, bucket: &str, body: &[u8]) -> S3Result<HttpResponse> {
    state
        .metadata
        .get_bucket(bucket)?
        .ok_or_else(|| S3Error::no_such_bucket(bucket))?;
    let (quiet, keys) = crate::s3::handlers::xmlreq::delete_request(body)?;

    let mut errors = Vec::new();
    for key in &keys {
        if let Err(e) = state.storage.delete(bucket, key) {
            log::warn!("best-effort blob delete failed for {bucket}/{key}, queuing for retry: {e}");
            if let Err(e) =
                state.metadata.enqueue_pending_delete(crate::metadata::PendingDeleteKind::Object, bucket, key, None)
            {
                log::error!("failed to queue retry delete for {bucket}/{key}: {e}");
            }
        }
    }
    let deleted = match state.metadata.delete_objects_meta(bucket, &keys) {
        Ok(deleted) => deleted,
        Err(e) => {
            errors.push((keys.join(","), "InternalError", e.to_string()));
            Vec::new()
        }
    };

    Ok(HttpResponse::Ok()
        .content_type("application/xml")
        .body(xml::delete_result(&deleted, &errors, quiet)))
}
