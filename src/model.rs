//! Entities of the metadata catalog.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Bucket {
    pub name: String,
    pub region: String,
    pub owner_id: String,
    pub owner_display: String,
    pub acl: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectHeaders {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub content_disposition: Option<String>,
    pub cache_control: Option<String>,
    pub expires: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Object {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    /// Quoted: `"<md5hex>"` for single-part, `"<md5hex>-<N>"` for multipart.
    pub etag: String,
    pub headers: ObjectHeaders,
    pub storage_class: String,
    pub acl: String,
    pub user_metadata: BTreeMap<String, String>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    pub initiator_access_key: String,
    pub initiator_display_name: String,
    pub headers: ObjectHeaders,
    pub acl: String,
    pub user_metadata: BTreeMap<String, String>,
    pub initiated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub upload_id: String,
    pub part_number: u32,
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Credential {
    pub access_key_id: String,
    pub secret_key: String,
    pub owner_id: String,
    pub display_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

pub const MIN_PART_NUMBER: u32 = 1;
pub const MAX_PART_NUMBER: u32 = 10_000;
/// Parts other than the last must be at least 5 MiB, else EntityTooSmall.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
