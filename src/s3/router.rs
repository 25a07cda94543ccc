//! Route registration implementing the method/path/query dispatch table.
//!
//! actix matches routes in registration order and the first satisfying
//! pattern wins, so the S3-bucket/object patterns are registered before
//! anything else; query-flag disambiguation within a single method+path
//! (e.g. `PUT /{bucket}` choosing between CreateBucket and PutBucketAcl)
//! happens inside a thin dispatch wrapper here rather than as separate
//! actix routes, since actix has no query-string route predicate.

use crate::app_state::AppState;
use crate::s3::handlers::{bucket, multipart, nonstandard, object, query_map};
use actix_web::{web, HttpRequest, HttpResponse};

/// `PUT /{bucket}/{key}`: UploadPart/UploadPartCopy win when both
/// `uploadId` and `partNumber` are present; otherwise fall through to
/// PutObjectAcl/CopyObject/PutObject.
async fn object_put_dispatch(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    payload: web::Payload,
) -> HttpResponse {
    let query = query_map(&req);
    if query.contains_key("uploadId") && query.contains_key("partNumber") {
        multipart::upload_part_dispatch(req, state, path, payload).await
    } else {
        object::put_dispatch(req, state, path, payload).await
    }
}

/// `GET /{bucket}/{key}`: `?acl` → GetObjectAcl, `?uploadId` → ListParts,
/// default → GetObject.
async fn object_get_dispatch(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    let query = query_map(&req);
    if query.contains_key("acl") {
        object::get_object_acl(req, state, path, body).await
    } else if query.contains_key("uploadId") {
        multipart::list_parts(req, state, path, body).await
    } else {
        object::get_object(req, state, path, body).await
    }
}

/// `DELETE /{bucket}/{key}`: `?uploadId` → AbortMultipartUpload, default →
/// DeleteObject.
async fn object_delete_dispatch(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    let query = query_map(&req);
    if query.contains_key("uploadId") {
        multipart::abort_multipart_upload(req, state, path, body).await
    } else {
        object::delete_object(req, state, path, body).await
    }
}

/// `POST /{bucket}/{key}`: `?uploads` → CreateMultipartUpload, `?uploadId`
/// → CompleteMultipartUpload.
async fn object_post_dispatch(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    let query = query_map(&req);
    if query.contains_key("uploads") {
        multipart::create_multipart_upload(req, state, path, body).await
    } else {
        multipart::complete_multipart_upload(req, state, path, body).await
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Non-standard endpoints, auth bypassed.
        .route("/health", web::get().to(nonstandard::health))
        .route("/metrics", web::get().to(nonstandard::metrics))
        .route("/docs", web::get().to(nonstandard::docs))
        // Bucket-level.
        .route("/{bucket}", web::put().to(bucket::create_or_put_acl))
        .route("/{bucket}", web::delete().to(bucket::delete_bucket))
        .route("/{bucket}", web::head().to(bucket::head_bucket))
        .route("/{bucket}", web::get().to(bucket::bucket_get_dispatch))
        .route("/{bucket}", web::post().to(bucket::delete_objects))
        // Object-level (key captured as a `.*` suffix so it may contain slashes).
        .route("/{bucket}/{key:.*}", web::put().to(object_put_dispatch))
        .route("/{bucket}/{key:.*}", web::head().to(object::head_object))
        .route("/{bucket}/{key:.*}", web::get().to(object_get_dispatch))
        .route("/{bucket}/{key:.*}", web::delete().to(object_delete_dispatch))
        .route("/{bucket}/{key:.*}", web::post().to(object_post_dispatch))
        // ListBuckets.
        .route("/", web::get().to(bucket::list_buckets));
}
