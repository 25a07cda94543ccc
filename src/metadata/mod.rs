//! Metadata catalog abstraction: the `MetadataStore` trait plus the
//! row/result shapes shared by every backend.

pub mod config;
pub mod memory_store;
pub mod sqlite_store;

use crate::acl;
use crate::error::S3Result;
use crate::model::{Credential, ObjectHeaders};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct BucketRow {
    pub name: String,
    pub region: String,
    pub owner_id: String,
    pub owner_display: String,
    pub acl: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct ObjectRow {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub headers: ObjectHeaders,
    pub storage_class: String,
    pub acl: String,
    pub user_metadata: BTreeMap<String, String>,
    pub last_modified: String,
}

#[derive(Debug, Clone)]
pub struct MultipartUploadRow {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub headers: ObjectHeaders,
    pub storage_class: String,
    pub acl: String,
    pub user_metadata: BTreeMap<String, String>,
    pub owner_id: String,
    pub owner_display: String,
    pub initiated_at: String,
}

#[derive(Debug, Clone)]
pub struct MultipartPartRow {
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
    pub last_modified: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsResult {
    pub contents: Vec<ObjectRow>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
    pub next_marker: Option<String>,
    pub key_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ListPartsResult {
    pub parts: Vec<MultipartPartRow>,
    pub is_truncated: bool,
    pub next_part_number_marker: Option<u32>,
}

/// What kind of blob a queued retry-delete targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingDeleteKind {
    /// A single object blob, deleted via `Storage::delete`.
    Object,
    /// A multipart upload's part directory, deleted via `Storage::delete_parts`.
    Parts,
}

#[derive(Debug, Clone)]
pub struct PendingDeleteRow {
    pub id: i64,
    pub kind: PendingDeleteKind,
    pub bucket: String,
    pub key: String,
    pub upload_id: Option<String>,
    pub attempts: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListMultipartUploadsResult {
    pub uploads: Vec<MultipartUploadRow>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
}

/// Parameters for completing a multipart upload: the final assembled
/// object's size/etag plus the content headers captured at initiate-time.
pub struct CompleteMultipartParams<'a> {
    pub bucket: &'a str,
    pub key: &'a str,
    pub upload_id: &'a str,
    pub size: u64,
    pub etag: &'a str,
    pub headers: &'a ObjectHeaders,
    pub storage_class: &'a str,
    pub acl: &'a str,
    pub user_metadata: &'a BTreeMap<String, String>,
}

/// The metadata catalog contract. Implementations are synchronous —
/// handlers offload calls with `web::block` rather than the trait itself
/// being `async`.
pub trait MetadataStore: Send + Sync {
    fn create_bucket(
        &self,
        bucket: &str,
        region: &str,
        owner_id: &str,
        owner_display: &str,
        acl: &str,
    ) -> S3Result<()>;
    fn bucket_exists(&self, bucket: &str) -> S3Result<bool>;
    fn get_bucket(&self, bucket: &str) -> S3Result<Option<BucketRow>>;
    fn list_buckets(&self, owner_id: &str) -> S3Result<Vec<BucketRow>>;
    fn delete_bucket(&self, bucket: &str) -> S3Result<()>;
    fn update_bucket_acl(&self, bucket: &str, acl: &str) -> S3Result<()>;
    fn count_objects(&self, bucket: &str) -> S3Result<u64>;

    #[allow(clippy::too_many_arguments)]
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        size: u64,
        etag: &str,
        headers: &ObjectHeaders,
        storage_class: &str,
        acl: &str,
        user_metadata: &BTreeMap<String, String>,
    ) -> S3Result<()>;
    fn get_object(&self, bucket: &str, key: &str) -> S3Result<Option<ObjectRow>>;
    fn object_exists(&self, bucket: &str, key: &str) -> S3Result<bool>;
    fn delete_object(&self, bucket: &str, key: &str) -> S3Result<()>;
    /// Deletes metadata rows for every key in `keys` that exists, returning
    /// the subset that was actually present (for the multi-object delete
    /// response's `Deleted` list).
    fn delete_objects_meta(&self, bucket: &str, keys: &[String]) -> S3Result<Vec<String>>;
    fn update_object_acl(&self, bucket: &str, key: &str, acl: &str) -> S3Result<()>;

    #[allow(clippy::too_many_arguments)]
    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
        marker: &str,
        continuation_token: Option<&str>,
    ) -> S3Result<ListObjectsResult>;

    #[allow(clippy::too_many_arguments)]
    fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        headers: &ObjectHeaders,
        storage_class: &str,
        acl: &str,
        user_metadata: &BTreeMap<String, String>,
        owner_id: &str,
        owner_display: &str,
    ) -> S3Result<()>;
    fn get_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> S3Result<Option<MultipartUploadRow>>;
    fn complete_multipart_upload(&self, params: CompleteMultipartParams<'_>) -> S3Result<()>;
    fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> S3Result<()>;

    fn put_part(&self, upload_id: &str, part_number: u32, size: u64, etag: &str) -> S3Result<()>;
    fn get_parts_for_completion(&self, upload_id: &str) -> S3Result<Vec<MultipartPartRow>>;
    fn list_parts(
        &self,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: u32,
    ) -> S3Result<ListPartsResult>;

    #[allow(clippy::too_many_arguments)]
    fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_uploads: u32,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> S3Result<ListMultipartUploadsResult>;

    fn get_credential(&self, access_key_id: &str) -> S3Result<Option<Credential>>;
    fn put_credential(
        &self,
        access_key_id: &str,
        secret_key: &str,
        owner_id: &str,
        display_name: &str,
    ) -> S3Result<()>;

    /// Delete every multipart upload (and its part rows) whose
    /// `initiated_at` is older than `ttl_secs`, returning `(bucket, key,
    /// upload_id)` for each so the caller can best-effort clean up the
    /// corresponding part blobs. Driven by a background task, not request
    /// handlers.
    fn reap_expired_uploads(&self, ttl_secs: i64) -> S3Result<Vec<(String, String, String)>>;

    /// Queue a blob delete that failed inline for background retry.
    fn enqueue_pending_delete(
        &self,
        kind: PendingDeleteKind,
        bucket: &str,
        key: &str,
        upload_id: Option<&str>,
    ) -> S3Result<()>;
    /// Pull up to `limit` queued deletes, oldest first, for the deletion
    /// worker to retry.
    fn list_pending_deletes(&self, limit: u32) -> S3Result<Vec<PendingDeleteRow>>;
    /// Drop a queued delete, either because it succeeded or because it
    /// exhausted its retry budget.
    fn remove_pending_delete(&self, id: i64) -> S3Result<()>;
    /// Record a failed retry attempt, returning the new attempt count.
    fn increment_pending_delete_attempts(&self, id: i64) -> S3Result<u32>;
}

/// Build a bucket/object's stored ACL representation, as JSON, from a
/// canned ACL token or an explicit `AccessControlPolicy`, defaulting to
/// private-to-owner when neither is supplied.
pub fn default_acl_json(owner_id: &str, owner_display: &str) -> String {
    policy_to_json(&acl::AccessControlPolicy::private(owner_id, owner_display))
}

pub fn policy_to_json(policy: &acl::AccessControlPolicy) -> String {
    // The XML rendering is the canonical form already; store it verbatim so
    // Get/PutBucketAcl round-trip without a separate JSON schema to keep in
    // sync with `acl::AccessControlPolicy`.
    policy.to_xml()
}

pub fn policy_from_json(stored: &str, owner_id: &str, owner_display: &str) -> acl::AccessControlPolicy {
    acl::AccessControlPolicy::from_xml(stored)
        .unwrap_or_else(|_| acl::AccessControlPolicy::private(owner_id, owner_display))
}
