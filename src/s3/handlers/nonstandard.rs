//! Non-S3 operational endpoints: health check, metrics, and API
//! documentation. All three are on the auth allow-list
//! and never call `middleware::authenticate`.

use crate::app_state::AppState;
use actix_web::{web, HttpResponse};

pub async fn health() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("application/json")
        .body(r#"{"status":"ok"}"#)
}

pub async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.metrics.render())
}

pub async fn docs() -> HttpResponse {
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(DOCS_HTML)
}

const DOCS_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>BleepStore API</title></head>
<body>
<h1>BleepStore</h1>
<p>An S3-compatible object storage server. Requests are signed with AWS
Signature Version 4 (header or query-string flavor) unless auth is
disabled in configuration.</p>
<table border="1" cellpadding="4" cellspacing="0">
<tr><th>Method</th><th>Path</th><th>Query</th><th>Operation</th></tr>
<tr><td>GET</td><td>/</td><td></td><td>ListBuckets</td></tr>
<tr><td>PUT</td><td>/{bucket}</td><td>acl</td><td>PutBucketAcl</td></tr>
<tr><td>PUT</td><td>/{bucket}</td><td></td><td>CreateBucket</td></tr>
<tr><td>DELETE</td><td>/{bucket}</td><td></td><td>DeleteBucket</td></tr>
<tr><td>HEAD</td><td>/{bucket}</td><td></td><td>HeadBucket</td></tr>
<tr><td>GET</td><td>/{bucket}</td><td>location</td><td>GetBucketLocation</td></tr>
<tr><td>GET</td><td>/{bucket}</td><td>acl</td><td>GetBucketAcl</td></tr>
<tr><td>GET</td><td>/{bucket}</td><td>uploads</td><td>ListMultipartUploads</td></tr>
<tr><td>GET</td><td>/{bucket}</td><td></td><td>ListObjects (v1/v2)</td></tr>
<tr><td>POST</td><td>/{bucket}</td><td>delete</td><td>DeleteObjects</td></tr>
<tr><td>PUT</td><td>/{bucket}/{key}</td><td>uploadId &amp; partNumber</td><td>UploadPart / UploadPartCopy</td></tr>
<tr><td>PUT</td><td>/{bucket}/{key}</td><td>acl</td><td>PutObjectAcl</td></tr>
<tr><td>PUT</td><td>/{bucket}/{key}</td><td></td><td>PutObject / CopyObject</td></tr>
<tr><td>HEAD</td><td>/{bucket}/{key}</td><td></td><td>HeadObject</td></tr>
<tr><td>GET</td><td>/{bucket}/{key}</td><td>acl</td><td>GetObjectAcl</td></tr>
<tr><td>GET</td><td>/{bucket}/{key}</td><td>uploadId</td><td>ListParts</td></tr>
<tr><td>GET</td><td>/{bucket}/{key}</td><td></td><td>GetObject</td></tr>
<tr><td>DELETE</td><td>/{bucket}/{key}</td><td>uploadId</td><td>AbortMultipartUpload</td></tr>
<tr><td>DELETE</td><td>/{bucket}/{key}</td><td></td><td>DeleteObject</td></tr>
<tr><td>POST</td><td>/{bucket}/{key}</td><td>uploads</td><td>CreateMultipartUpload</td></tr>
<tr><td>POST</td><td>/{bucket}/{key}</td><td>uploadId</td><td>CompleteMultipartUpload</td></tr>
<tr><td>GET</td><td>/health</td><td></td><td>health check</td></tr>
<tr><td>GET</td><td>/metrics</td><td></td><td>Prometheus metrics</td></tr>
</table>
</body>
</html>"#;
