//! Response XML rendering: hand-built string templates rather than a
//! serializer crate — `quick-xml` is reserved for parsing inbound bodies
//! (see `xml_util`'s module doc).

use crate::metadata::{
    BucketRow, ListMultipartUploadsResult, ListObjectsResult, ListPartsResult, MultipartUploadRow,
};
use crate::xml_util::escape;

const XML_HEADER: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
const NS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

pub fn list_all_my_buckets(owner_id: &str, owner_display: &str, buckets: &[BucketRow]) -> String {
    let mut entries = String::new();
    for b in buckets {
        entries.push_str(&format!(
            "<Bucket><Name>{}</Name><CreationDate>{}</CreationDate></Bucket>",
            escape(&b.name),
            escape(&b.created_at)
        ));
    }
    format!(
        "{XML_HEADER}<ListAllMyBucketsResult xmlns=\"{NS}\">\
         <Owner><ID>{}</ID><DisplayName>{}</DisplayName></Owner>\
         <Buckets>{entries}</Buckets></ListAllMyBucketsResult>",
        escape(owner_id),
        escape(owner_display)
    )
}

pub fn location_constraint(region: &str) -> String {
    if region == "us-east-1" {
        format!("{XML_HEADER}<LocationConstraint xmlns=\"{NS}\"/>")
    } else {
        format!(
            "{XML_HEADER}<LocationConstraint xmlns=\"{NS}\">{}</LocationConstraint>",
            escape(region)
        )
    }
}

fn contents_xml(result: &ListObjectsResult) -> String {
    let mut out = String::new();
    for obj in &result.contents {
        out.push_str(&format!(
            "<Contents><Key>{}</Key><LastModified>{}</LastModified><ETag>{}</ETag>\
             <Size>{}</Size><StorageClass>{}</StorageClass></Contents>",
            escape(&obj.key),
            escape(&obj.last_modified),
            escape(&obj.etag),
            obj.size,
            escape(&obj.storage_class)
        ));
    }
    out
}

fn common_prefixes_xml(result: &ListObjectsResult) -> String {
    let mut out = String::new();
    for cp in &result.common_prefixes {
        out.push_str(&format!("<CommonPrefixes><Prefix>{}</Prefix></CommonPrefixes>", escape(cp)));
    }
    out
}

#[allow(clippy::too_many_arguments)]
pub fn list_objects_v1(
    bucket: &str,
    prefix: &str,
    marker: &str,
    max_keys: u32,
    delimiter: &str,
    result: &ListObjectsResult,
) -> String {
    let mut body = format!(
        "{XML_HEADER}<ListBucketResult xmlns=\"{NS}\"><Name>{}</Name><Prefix>{}</Prefix>\
         <Marker>{}</Marker><MaxKeys>{max_keys}</MaxKeys>",
        escape(bucket),
        escape(prefix),
        escape(marker)
    );
    if !delimiter.is_empty() {
        body.push_str(&format!("<Delimiter>{}</Delimiter>", escape(delimiter)));
    }
    body.push_str(&format!("<IsTruncated>{}</IsTruncated>", result.is_truncated));
    if let Some(next) = &result.next_marker {
        body.push_str(&format!("<NextMarker>{}</NextMarker>", escape(next)));
    }
    body.push_str(&contents_xml(result));
    body.push_str(&common_prefixes_xml(result));
    body.push_str("</ListBucketResult>");
    body
}

#[allow(clippy::too_many_arguments)]
pub fn list_objects_v2(
    bucket: &str,
    prefix: &str,
    continuation_token: Option<&str>,
    start_after: &str,
    max_keys: u32,
    delimiter: &str,
    result: &ListObjectsResult,
) -> String {
    let mut body = format!(
        "{XML_HEADER}<ListBucketResult xmlns=\"{NS}\"><Name>{}</Name><Prefix>{}</Prefix>\
         <MaxKeys>{max_keys}</MaxKeys><KeyCount>{}</KeyCount>",
        escape(bucket),
        escape(prefix),
        result.key_count
    );
    if !delimiter.is_empty() {
        body.push_str(&format!("<Delimiter>{}</Delimiter>", escape(delimiter)));
    }
    if !start_after.is_empty() {
        body.push_str(&format!("<StartAfter>{}</StartAfter>", escape(start_after)));
    }
    if let Some(token) = continuation_token {
        body.push_str(&format!("<ContinuationToken>{}</ContinuationToken>", escape(token)));
    }
    body.push_str(&format!("<IsTruncated>{}</IsTruncated>", result.is_truncated));
    if let Some(next) = &result.next_continuation_token {
        body.push_str(&format!("<NextContinuationToken>{}</NextContinuationToken>", escape(next)));
    }
    body.push_str(&contents_xml(result));
    body.push_str(&common_prefixes_xml(result));
    body.push_str("</ListBucketResult>");
    body
}

pub fn initiate_multipart_upload_result(bucket: &str, key: &str, upload_id: &str) -> String {
    format!(
        "{XML_HEADER}<InitiateMultipartUploadResult xmlns=\"{NS}\">\
         <Bucket>{}</Bucket><Key>{}</Key><UploadId>{}</UploadId>\
         </InitiateMultipartUploadResult>",
        escape(bucket),
        escape(key),
        escape(upload_id)
    )
}

pub fn complete_multipart_upload_result(bucket: &str, key: &str, location: &str, etag: &str) -> String {
    format!(
        "{XML_HEADER}<CompleteMultipartUploadResult xmlns=\"{NS}\">\
         <Location>{}</Location><Bucket>{}</Bucket><Key>{}</Key><ETag>{}</ETag>\
         </CompleteMultipartUploadResult>",
        escape(location),
        escape(bucket),
        escape(key),
        escape(etag)
    )
}

pub fn copy_object_result(etag: &str, last_modified: &str) -> String {
    format!(
        "{XML_HEADER}<CopyObjectResult xmlns=\"{NS}\">\
         <ETag>{}</ETag><LastModified>{}</LastModified></CopyObjectResult>",
        escape(etag),
        escape(last_modified)
    )
}

pub fn copy_part_result(etag: &str, last_modified: &str) -> String {
    format!(
        "{XML_HEADER}<CopyPartResult xmlns=\"{NS}\">\
         <ETag>{}</ETag><LastModified>{}</LastModified></CopyPartResult>",
        escape(etag),
        escape(last_modified)
    )
}

#[allow(clippy::too_many_arguments)]
pub fn list_parts_result(
    bucket: &str,
    key: &str,
    upload_id: &str,
    owner_id: &str,
    owner_display: &str,
    storage_class: &str,
    part_number_marker: u32,
    max_parts: u32,
    result: &ListPartsResult,
) -> String {
    let mut parts = String::new();
    for part in &result.parts {
        parts.push_str(&format!(
            "<Part><PartNumber>{}</PartNumber><LastModified>{}</LastModified>\
             <ETag>{}</ETag><Size>{}</Size></Part>",
            part.part_number,
            escape(&part.last_modified),
            escape(&part.etag),
            part.size
        ));
    }
    format!(
        "{XML_HEADER}<ListPartsResult xmlns=\"{NS}\"><Bucket>{}</Bucket><Key>{}</Key>\
         <UploadId>{}</UploadId><Initiator><ID>{}</ID><DisplayName>{}</DisplayName></Initiator>\
         <Owner><ID>{}</ID><DisplayName>{}</DisplayName></Owner><StorageClass>{}</StorageClass>\
         <PartNumberMarker>{part_number_marker}</PartNumberMarker>\
         <NextPartNumberMarker>{}</NextPartNumberMarker><MaxParts>{max_parts}</MaxParts>\
         <IsTruncated>{}</IsTruncated>{parts}</ListPartsResult>",
        escape(bucket),
        escape(key),
        escape(upload_id),
        escape(owner_id),
        escape(owner_display),
        escape(owner_id),
        escape(owner_display),
        escape(storage_class),
        result.next_part_number_marker.unwrap_or(0),
        result.is_truncated
    )
}

fn upload_entry_xml(u: &MultipartUploadRow) -> String {
    format!(
        "<Upload><Key>{}</Key><UploadId>{}</UploadId>\
         <Initiator><ID>{}</ID><DisplayName>{}</DisplayName></Initiator>\
         <Owner><ID>{}</ID><DisplayName>{}</DisplayName></Owner>\
         <StorageClass>{}</StorageClass><Initiated>{}</Initiated></Upload>",
        escape(&u.key),
        escape(&u.upload_id),
        escape(&u.owner_id),
        escape(&u.owner_display),
        escape(&u.owner_id),
        escape(&u.owner_display),
        escape(&u.storage_class),
        escape(&u.initiated_at)
    )
}

#[allow(clippy::too_many_arguments)]
pub fn list_multipart_uploads_result(
    bucket: &str,
    prefix: &str,
    delimiter: &str,
    key_marker: &str,
    upload_id_marker: &str,
    max_uploads: u32,
    result: &ListMultipartUploadsResult,
) -> String {
    let mut body = format!(
        "{XML_HEADER}<ListMultipartUploadsResult xmlns=\"{NS}\"><Bucket>{}</Bucket>\
         <KeyMarker>{}</KeyMarker><UploadIdMarker>{}</UploadIdMarker>\
         <Prefix>{}</Prefix>",
        escape(bucket),
        escape(key_marker),
        escape(upload_id_marker),
        escape(prefix)
    );
    if !delimiter.is_empty() {
        body.push_str(&format!("<Delimiter>{}</Delimiter>", escape(delimiter)));
    }
    body.push_str(&format!("<MaxUploads>{max_uploads}</MaxUploads>"));
    if let Some(next) = &result.next_key_marker {
        body.push_str(&format!("<NextKeyMarker>{}</NextKeyMarker>", escape(next)));
    }
    if let Some(next) = &result.next_upload_id_marker {
        body.push_str(&format!("<NextUploadIdMarker>{}</NextUploadIdMarker>", escape(next)));
    }
    body.push_str(&format!("<IsTruncated>{}</IsTruncated>", result.is_truncated));
    for u in &result.uploads {
        body.push_str(&upload_entry_xml(u));
    }
    for cp in &result.common_prefixes {
        body.push_str(&format!("<CommonPrefixes><Prefix>{}</Prefix></CommonPrefixes>", escape(cp)));
    }
    body.push_str("</ListMultipartUploadsResult>");
    body
}

pub fn delete_result(deleted: &[String], errors: &[(String, &'static str, String)], quiet: bool) -> String {
    let mut body = format!("{XML_HEADER}<DeleteResult xmlns=\"{NS}\">");
    if !quiet {
        for key in deleted {
            body.push_str(&format!("<Deleted><Key>{}</Key></Deleted>", escape(key)));
        }
    }
    for (key, code, message) in errors {
        body.push_str(&format!(
            "<Error><Key>{}</Key><Code>{}</Code><Message>{}</Message></Error>",
            escape(key),
            escape(code),
            escape(message)
        ));
    }
    body.push_str("</DeleteResult>");
    body
}
