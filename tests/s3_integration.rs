//! End-to-end coverage of the S3 request-processing pipeline, driven
//! through the real router with an in-memory metadata/storage backend
//! (`AppState::new_for_testing`). Every request is signed the way a real
//! client would, exercising the SigV4 layer rather than bypassing it.

mod common;

use actix_web::{test, web, App};
use bleepstore::app_state::AppState;
use bleepstore::s3::router;
use common::sign_request;

fn test_app_state() -> AppState {
    AppState::new_for_testing()
}

fn extract_tag(body: &str, tag: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = body.find(&open).unwrap_or_else(|| panic!("missing <{tag}> in {body}")) + open.len();
    let end = body[start..].find(&close).unwrap() + start;
    body[start..end].to_string()
}

#[actix_web::test]
async fn health_check_bypasses_auth() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn unsigned_request_is_rejected() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("AccessDenied"));
}

#[actix_web::test]
async fn bad_signature_is_rejected() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let mut headers = sign_request("GET", "/", "", &[], b"");
    // Corrupt the signature while leaving everything else intact.
    for (name, value) in headers.iter_mut() {
        if name == "authorization" {
            value.push_str("00");
        }
    }
    let mut req = test::TestRequest::get().uri("/");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 403);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("SignatureDoesNotMatch"));
}

#[actix_web::test]
async fn create_bucket_put_get_round_trip() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let headers = sign_request("PUT", "/round-trip-bucket", "", &[], b"");
    let mut req = test::TestRequest::put().uri("/round-trip-bucket");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 200);

    let body_bytes = b"hello bleepstore";
    let headers = sign_request(
        "PUT",
        "/round-trip-bucket/greeting.txt",
        "",
        &[("content-type", "text/plain")],
        body_bytes,
    );
    let mut req = test::TestRequest::put()
        .uri("/round-trip-bucket/greeting.txt")
        .set_payload(body_bytes.to_vec());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 200);
    let put_etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();
    assert_eq!(put_etag, format!("\"{:x}\"", md5::compute(body_bytes)));

    let headers = sign_request("GET", "/round-trip-bucket/greeting.txt", "", &[], b"");
    let mut req = test::TestRequest::get().uri("/round-trip-bucket/greeting.txt");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("etag").unwrap().to_str().unwrap(), put_etag);
    let body = test::read_body(resp).await;
    assert_eq!(&body[..], body_bytes);
}

#[actix_web::test]
async fn head_object_missing_key_is_404_with_no_body() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let headers = sign_request("PUT", "/empty-bucket", "", &[], b"");
    let mut req = test::TestRequest::put().uri("/empty-bucket");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let headers = sign_request("HEAD", "/empty-bucket/nope.txt", "", &[], b"");
    let mut req = test::TestRequest::with_uri("/empty-bucket/nope.txt").method(actix_web::http::Method::HEAD);
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 404);
    let body = test::read_body(resp).await;
    assert!(body.is_empty());
}

#[actix_web::test]
async fn conditional_get_returns_304_on_matching_if_none_match() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let headers = sign_request("PUT", "/cond-bucket", "", &[], b"");
    let mut req = test::TestRequest::put().uri("/cond-bucket");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let body_bytes = b"conditional body";
    let headers = sign_request("PUT", "/cond-bucket/file.txt", "", &[], body_bytes);
    let mut req = test::TestRequest::put().uri("/cond-bucket/file.txt").set_payload(body_bytes.to_vec());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    let etag = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();

    let headers = sign_request("GET", "/cond-bucket/file.txt", "", &[("if-none-match", &etag)], b"");
    let mut req = test::TestRequest::get().uri("/cond-bucket/file.txt");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 304);
}

#[actix_web::test]
async fn range_request_returns_partial_content() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let headers = sign_request("PUT", "/range-bucket", "", &[], b"");
    let mut req = test::TestRequest::put().uri("/range-bucket");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let body_bytes = b"0123456789";
    let headers = sign_request("PUT", "/range-bucket/digits.txt", "", &[], body_bytes);
    let mut req = test::TestRequest::put().uri("/range-bucket/digits.txt").set_payload(body_bytes.to_vec());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let headers = sign_request("GET", "/range-bucket/digits.txt", "", &[("range", "bytes=2-5")], b"");
    let mut req = test::TestRequest::get().uri("/range-bucket/digits.txt");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 206);
    assert_eq!(resp.headers().get("content-range").unwrap().to_str().unwrap(), "bytes 2-5/10");
    let body = test::read_body(resp).await;
    assert_eq!(&body[..], b"2345");
}

#[actix_web::test]
async fn unsatisfiable_range_returns_416() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let headers = sign_request("PUT", "/range-bucket-2", "", &[], b"");
    let mut req = test::TestRequest::put().uri("/range-bucket-2");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let body_bytes = b"short";
    let headers = sign_request("PUT", "/range-bucket-2/f.txt", "", &[], body_bytes);
    let mut req = test::TestRequest::put().uri("/range-bucket-2/f.txt").set_payload(body_bytes.to_vec());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let headers = sign_request("GET", "/range-bucket-2/f.txt", "", &[("range", "bytes=100-200")], b"");
    let mut req = test::TestRequest::get().uri("/range-bucket-2/f.txt");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 416);
}

#[actix_web::test]
async fn list_objects_groups_common_prefixes_by_delimiter() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let headers = sign_request("PUT", "/listing-bucket", "", &[], b"");
    let mut req = test::TestRequest::put().uri("/listing-bucket");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    for key in ["photos/a.jpg", "photos/b.jpg", "readme.txt"] {
        let path = format!("/listing-bucket/{key}");
        let headers = sign_request("PUT", &path, "", &[], b"x");
        let mut req = test::TestRequest::put().uri(&path).set_payload(b"x".to_vec());
        for (name, value) in &headers {
            req = req.insert_header((name.as_str(), value.as_str()));
        }
        assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);
    }

    let query = "delimiter=%2F";
    let headers = sign_request("GET", "/listing-bucket", query, &[], b"");
    let mut req = test::TestRequest::get().uri(&format!("/listing-bucket?{query}"));
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 200);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("<Prefix>photos/</Prefix>"));
    assert!(body.contains("<Key>readme.txt</Key>"));
    assert!(!body.contains("photos/a.jpg"));
}

#[actix_web::test]
async fn multipart_upload_completes_with_composite_etag() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let headers = sign_request("PUT", "/mpu-bucket", "", &[], b"");
    let mut req = test::TestRequest::put().uri("/mpu-bucket");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let create_path = "/mpu-bucket/big.bin";
    let headers = sign_request("POST", create_path, "uploads", &[], b"");
    let mut req = test::TestRequest::post().uri(&format!("{create_path}?uploads"));
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 200);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    let upload_id = extract_tag(&body, "UploadId");

    let part1 = vec![b'a'; 5 * 1024 * 1024];
    let query1 = format!("partNumber=1&uploadId={upload_id}");
    let headers = sign_request("PUT", create_path, &query1, &[], &part1);
    let mut req = test::TestRequest::put().uri(&format!("{create_path}?{query1}")).set_payload(part1.clone());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 200);
    let etag1 = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();

    let part2 = b"tail-bytes".to_vec();
    let query2 = format!("partNumber=2&uploadId={upload_id}");
    let headers = sign_request("PUT", create_path, &query2, &[], &part2);
    let mut req = test::TestRequest::put().uri(&format!("{create_path}?{query2}")).set_payload(part2.clone());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 200);
    let etag2 = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();

    let complete_body = format!(
        "<CompleteMultipartUpload><Part><PartNumber>1</PartNumber><ETag>{etag1}</ETag></Part>\
         <Part><PartNumber>2</PartNumber><ETag>{etag2}</ETag></Part></CompleteMultipartUpload>"
    );
    let complete_query = format!("uploadId={upload_id}");
    let headers = sign_request("POST", create_path, &complete_query, &[], complete_body.as_bytes());
    let mut req = test::TestRequest::post()
        .uri(&format!("{create_path}?{complete_query}"))
        .set_payload(complete_body.clone());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 200);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    let composite_etag = extract_tag(&body, "ETag");
    assert!(composite_etag.ends_with("-2\""));

    let headers = sign_request("GET", create_path, "", &[], b"");
    let mut req = test::TestRequest::get().uri(create_path);
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 200);
    let fetched = test::read_body(resp).await;
    let mut expected = part1.clone();
    expected.extend_from_slice(&part2);
    assert_eq!(fetched.len(), expected.len());
    assert_eq!(&fetched[..], &expected[..]);
}

#[actix_web::test]
async fn multipart_upload_rejects_small_non_final_part() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let headers = sign_request("PUT", "/mpu-small-bucket", "", &[], b"");
    let mut req = test::TestRequest::put().uri("/mpu-small-bucket");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let create_path = "/mpu-small-bucket/small.bin";
    let headers = sign_request("POST", create_path, "uploads", &[], b"");
    let mut req = test::TestRequest::post().uri(&format!("{create_path}?uploads"));
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    let upload_id = extract_tag(&body, "UploadId");

    let part1 = b"too small".to_vec();
    let query1 = format!("partNumber=1&uploadId={upload_id}");
    let headers = sign_request("PUT", create_path, &query1, &[], &part1);
    let mut req = test::TestRequest::put().uri(&format!("{create_path}?{query1}")).set_payload(part1.clone());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    let etag1 = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();

    let part2 = b"also small".to_vec();
    let query2 = format!("partNumber=2&uploadId={upload_id}");
    let headers = sign_request("PUT", create_path, &query2, &[], &part2);
    let mut req = test::TestRequest::put().uri(&format!("{create_path}?{query2}")).set_payload(part2.clone());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    let etag2 = resp.headers().get("etag").unwrap().to_str().unwrap().to_string();

    let complete_body = format!(
        "<CompleteMultipartUpload><Part><PartNumber>1</PartNumber><ETag>{etag1}</ETag></Part>\
         <Part><PartNumber>2</PartNumber><ETag>{etag2}</ETag></Part></CompleteMultipartUpload>"
    );
    let complete_query = format!("uploadId={upload_id}");
    let headers = sign_request("POST", create_path, &complete_query, &[], complete_body.as_bytes());
    let mut req = test::TestRequest::post()
        .uri(&format!("{create_path}?{complete_query}"))
        .set_payload(complete_body.clone());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 400);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("EntityTooSmall"));
}

#[actix_web::test]
async fn presigned_url_get_succeeds_without_authorization_header() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let headers = sign_request("PUT", "/presign-bucket", "", &[], b"");
    let mut req = test::TestRequest::put().uri("/presign-bucket");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let body_bytes = b"presigned payload";
    let headers = sign_request("PUT", "/presign-bucket/obj.txt", "", &[], body_bytes);
    let mut req = test::TestRequest::put().uri("/presign-bucket/obj.txt").set_payload(body_bytes.to_vec());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let query = common::presign_query("GET", "/presign-bucket/obj.txt", 900);
    let req = test::TestRequest::get()
        .uri(&format!("/presign-bucket/obj.txt?{query}"))
        .insert_header(("host", common::TEST_HOST))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body = test::read_body(resp).await;
    assert_eq!(&body[..], body_bytes);
}

#[actix_web::test]
async fn delete_non_empty_bucket_is_conflict() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let headers = sign_request("PUT", "/nonempty-bucket", "", &[], b"");
    let mut req = test::TestRequest::put().uri("/nonempty-bucket");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let body_bytes = b"x";
    let headers = sign_request("PUT", "/nonempty-bucket/f.txt", "", &[], body_bytes);
    let mut req = test::TestRequest::put().uri("/nonempty-bucket/f.txt").set_payload(body_bytes.to_vec());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let headers = sign_request("DELETE", "/nonempty-bucket", "", &[], b"");
    let mut req = test::TestRequest::delete().uri("/nonempty-bucket");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 409);
    let body = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(body.contains("BucketNotEmpty"));
}

#[actix_web::test]
async fn delete_object_then_get_is_404() {
    let state = test_app_state();
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(router::configure)).await;

    let headers = sign_request("PUT", "/delete-bucket", "", &[], b"");
    let mut req = test::TestRequest::put().uri("/delete-bucket");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let body_bytes = b"gone soon";
    let headers = sign_request("PUT", "/delete-bucket/f.txt", "", &[], body_bytes);
    let mut req = test::TestRequest::put().uri("/delete-bucket/f.txt").set_payload(body_bytes.to_vec());
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    assert_eq!(test::call_service(&app, req.to_request()).await.status(), 200);

    let headers = sign_request("DELETE", "/delete-bucket/f.txt", "", &[], b"");
    let mut req = test::TestRequest::delete().uri("/delete-bucket/f.txt");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 204);

    let headers = sign_request("GET", "/delete-bucket/f.txt", "", &[], b"");
    let mut req = test::TestRequest::get().uri("/delete-bucket/f.txt");
    for (name, value) in &headers {
        req = req.insert_header((name.as_str(), value.as_str()));
    }
    let resp = test::call_service(&app, req.to_request()).await;
    assert_eq!(resp.status(), 404);
}
