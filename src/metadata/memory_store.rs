//! In-memory `MetadataStore` used by unit tests only. Not a general-purpose
//! backend — this exists solely so handler tests don't need a SQLite file
//! on disk.

use crate::error::S3Result;
use crate::metadata::{
    BucketRow, CompleteMultipartParams, ListMultipartUploadsResult, ListObjectsResult,
    ListPartsResult, MetadataStore, MultipartPartRow, MultipartUploadRow, ObjectRow,
    PendingDeleteKind, PendingDeleteRow,
};
use crate::model::{Credential, ObjectHeaders};
use crate::xml_util;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    buckets: HashMap<String, BucketRow>,
    objects: HashMap<(String, String), ObjectRow>,
    uploads: HashMap<String, MultipartUploadRow>,
    parts: HashMap<String, BTreeMap<u32, MultipartPartRow>>,
    credentials: HashMap<String, Credential>,
    pending_deletes: Vec<PendingDeleteRow>,
    next_pending_delete_id: i64,
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    state: Mutex<State>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn create_bucket(
        &self,
        bucket: &str,
        region: &str,
        owner_id: &str,
        owner_display: &str,
        acl: &str,
    ) -> S3Result<()> {
        let mut state = self.state.lock().unwrap();
        state.buckets.insert(
            bucket.to_string(),
            BucketRow {
                name: bucket.to_string(),
                region: region.to_string(),
                owner_id: owner_id.to_string(),
                owner_display: owner_display.to_string(),
                acl: acl.to_string(),
                created_at: xml_util::now_iso(),
            },
        );
        Ok(())
    }

    fn bucket_exists(&self, bucket: &str) -> S3Result<bool> {
        Ok(self.state.lock().unwrap().buckets.contains_key(bucket))
    }

    fn get_bucket(&self, bucket: &str) -> S3Result<Option<BucketRow>> {
        Ok(self.state.lock().unwrap().buckets.get(bucket).cloned())
    }

    fn list_buckets(&self, owner_id: &str) -> S3Result<Vec<BucketRow>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<BucketRow> = state
            .buckets
            .values()
            .filter(|b| owner_id.is_empty() || b.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    fn delete_bucket(&self, bucket: &str) -> S3Result<()> {
        self.state.lock().unwrap().buckets.remove(bucket);
        Ok(())
    }

    fn update_bucket_acl(&self, bucket: &str, acl: &str) -> S3Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.buckets.get_mut(bucket) {
            row.acl = acl.to_string();
        }
        Ok(())
    }

    fn count_objects(&self, bucket: &str) -> S3Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .keys()
            .filter(|(b, _)| b == bucket)
            .count() as u64)
    }

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
    ) -> S3Result<()> {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(
            (bucket.to_string(), key.to_string()),
            ObjectRow {
                key: key.to_string(),
                size,
                etag: etag.to_string(),
                headers: headers.clone(),
                storage_class: storage_class.to_string(),
                acl: acl.to_string(),
                user_metadata: user_metadata.clone(),
                last_modified: xml_util::now_iso(),
            },
        );
        Ok(())
    }

    fn get_object(&self, bucket: &str, key: &str) -> S3Result<Option<ObjectRow>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }

    fn object_exists(&self, bucket: &str, key: &str) -> S3Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .objects
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    fn delete_object(&self, bucket: &str, key: &str) -> S3Result<()> {
        self.state
            .lock()
            .unwrap()
            .objects
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    fn delete_objects_meta(&self, bucket: &str, keys: &[String]) -> S3Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        for key in keys {
            state.objects.remove(&(bucket.to_string(), key.clone()));
        }
        Ok(keys.to_vec())
    }

    fn update_object_acl(&self, bucket: &str, key: &str, acl: &str) -> S3Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.objects.get_mut(&(bucket.to_string(), key.to_string())) {
            row.acl = acl.to_string();
        }
        Ok(())
    }

    fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        max_keys: u32,
        marker: &str,
        continuation_token: Option<&str>,
    ) -> S3Result<ListObjectsResult> {
        if max_keys == 0 {
            return Ok(ListObjectsResult::default());
        }
        let start_after = continuation_token.filter(|s| !s.is_empty()).unwrap_or(marker);
        let state = self.state.lock().unwrap();
        let mut matching: Vec<&ObjectRow> = state
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix) && k.as_str() > start_after)
            .map(|(_, row)| row)
            .collect();
        matching.sort_by(|a, b| a.key.cmp(&b.key));

        let mut contents = Vec::new();
        let mut common_prefixes = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut consumed = 0usize;
        for row in &matching {
            consumed += 1;
            if !delimiter.is_empty() {
                let suffix = &row.key[prefix.len().min(row.key.len())..];
                if let Some(pos) = suffix.find(delimiter) {
                    let cp = format!("{prefix}{}", &suffix[..pos + delimiter.len()]);
                    if seen.insert(cp.clone()) {
                        common_prefixes.push(cp);
                        if contents.len() + common_prefixes.len() >= max_keys as usize {
                            break;
                        }
                    }
                    continue;
                }
            }
            contents.push((*row).clone());
            if contents.len() + common_prefixes.len() >= max_keys as usize {
                break;
            }
        }
        let total_returned = contents.len() + common_prefixes.len();
        let is_truncated = total_returned >= max_keys as usize && consumed < matching.len();
        let mut next_continuation_token = None;
        let mut next_marker = None;
        if is_truncated {
            let last_key = contents
                .last()
                .map(|o| o.key.clone())
                .or_else(|| common_prefixes.last().cloned());
            if let Some(last_key) = last_key {
                next_continuation_token = Some(last_key.clone());
                next_marker = Some(last_key);
            }
        }
        common_prefixes.sort();
        Ok(ListObjectsResult {
            contents,
            common_prefixes,
            is_truncated,
            next_continuation_token,
            next_marker,
            key_count: total_returned,
        })
    }

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
    ) -> S3Result<()> {
        let mut state = self.state.lock().unwrap();
        state.uploads.insert(
            upload_id.to_string(),
            MultipartUploadRow {
                upload_id: upload_id.to_string(),
                bucket: bucket.to_string(),
                key: key.to_string(),
                headers: headers.clone(),
                storage_class: storage_class.to_string(),
                acl: acl.to_string(),
                user_metadata: user_metadata.clone(),
                owner_id: owner_id.to_string(),
                owner_display: owner_display.to_string(),
                initiated_at: xml_util::now_iso(),
            },
        );
        state.parts.insert(upload_id.to_string(), BTreeMap::new());
        Ok(())
    }

    fn get_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> S3Result<Option<MultipartUploadRow>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .uploads
            .get(upload_id)
            .filter(|u| u.bucket == bucket && u.key == key)
            .cloned())
    }

    fn complete_multipart_upload(&self, params: CompleteMultipartParams<'_>) -> S3Result<()> {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(
            (params.bucket.to_string(), params.key.to_string()),
            ObjectRow {
                key: params.key.to_string(),
                size: params.size,
                etag: params.etag.to_string(),
                headers: params.headers.clone(),
                storage_class: params.storage_class.to_string(),
                acl: params.acl.to_string(),
                user_metadata: params.user_metadata.clone(),
                last_modified: xml_util::now_iso(),
            },
        );
        state.parts.remove(params.upload_id);
        state.uploads.remove(params.upload_id);
        Ok(())
    }

    fn abort_multipart_upload(&self, _bucket: &str, _key: &str, upload_id: &str) -> S3Result<()> {
        let mut state = self.state.lock().unwrap();
        state.parts.remove(upload_id);
        state.uploads.remove(upload_id);
        Ok(())
    }

    fn put_part(&self, upload_id: &str, part_number: u32, size: u64, etag: &str) -> S3Result<()> {
        let mut state = self.state.lock().unwrap();
        let parts = state
            .parts
            .entry(upload_id.to_string())
            .or_insert_with(BTreeMap::new);
        parts.insert(
            part_number,
            MultipartPartRow {
                part_number,
                size,
                etag: etag.to_string(),
                last_modified: xml_util::now_iso(),
            },
        );
        Ok(())
    }

    fn get_parts_for_completion(&self, upload_id: &str) -> S3Result<Vec<MultipartPartRow>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .parts
            .get(upload_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default())
    }

    fn list_parts(
        &self,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: u32,
    ) -> S3Result<ListPartsResult> {
        let state = self.state.lock().unwrap();
        let all: Vec<MultipartPartRow> = state
            .parts
            .get(upload_id)
            .map(|m| {
                m.values()
                    .filter(|p| p.part_number > part_number_marker)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let is_truncated = all.len() > max_parts as usize;
        let mut parts = all;
        parts.truncate(max_parts as usize);
        let next_part_number_marker = if is_truncated {
            parts.last().map(|p| p.part_number)
        } else {
            None
        };
        Ok(ListPartsResult {
            parts,
            is_truncated,
            next_part_number_marker,
        })
    }

    fn list_multipart_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        _delimiter: &str,
        max_uploads: u32,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> S3Result<ListMultipartUploadsResult> {
        let state = self.state.lock().unwrap();
        let mut uploads: Vec<MultipartUploadRow> = state
            .uploads
            .values()
            .filter(|u| {
                u.bucket == bucket
                    && u.key.starts_with(prefix)
                    && (u.key.as_str() > key_marker
                        || (u.key == key_marker && u.upload_id.as_str() > upload_id_marker))
            })
            .cloned()
            .collect();
        uploads.sort_by(|a, b| a.key.cmp(&b.key).then(a.initiated_at.cmp(&b.initiated_at)));
        let is_truncated = uploads.len() > max_uploads as usize;
        uploads.truncate(max_uploads as usize);
        let (next_key_marker, next_upload_id_marker) = if is_truncated {
            uploads
                .last()
                .map(|u| (Some(u.key.clone()), Some(u.upload_id.clone())))
                .unwrap_or((None, None))
        } else {
            (None, None)
        };
        Ok(ListMultipartUploadsResult {
            uploads,
            common_prefixes: Vec::new(),
            is_truncated,
            next_key_marker,
            next_upload_id_marker,
        })
    }

    fn get_credential(&self, access_key_id: &str) -> S3Result<Option<Credential>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .credentials
            .get(access_key_id)
            .filter(|c| c.active)
            .cloned())
    }

    fn put_credential(
        &self,
        access_key_id: &str,
        secret_key: &str,
        owner_id: &str,
        display_name: &str,
    ) -> S3Result<()> {
        let mut state = self.state.lock().unwrap();
        state.credentials.insert(
            access_key_id.to_string(),
            Credential {
                access_key_id: access_key_id.to_string(),
                secret_key: secret_key.to_string(),
                owner_id: owner_id.to_string(),
                display_name: display_name.to_string(),
                active: true,
                created_at: chrono::Utc::now(),
            },
        );
        Ok(())
    }

    fn reap_expired_uploads(&self, ttl_secs: i64) -> S3Result<Vec<(String, String, String)>> {
        let cutoff = xml_util::to_iso(chrono::Utc::now() - chrono::Duration::seconds(ttl_secs));
        let mut state = self.state.lock().unwrap();
        let expired: Vec<(String, String, String)> = state
            .uploads
            .values()
            .filter(|u| u.initiated_at < cutoff)
            .map(|u| (u.bucket.clone(), u.key.clone(), u.upload_id.clone()))
            .collect();
        for (_, _, upload_id) in &expired {
            state.uploads.remove(upload_id);
            state.parts.remove(upload_id);
        }
        Ok(expired)
    }

    fn enqueue_pending_delete(
        &self,
        kind: PendingDeleteKind,
        bucket: &str,
        key: &str,
        upload_id: Option<&str>,
    ) -> S3Result<()> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_pending_delete_id;
        state.next_pending_delete_id += 1;
        state.pending_deletes.push(PendingDeleteRow {
            id,
            kind,
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.map(str::to_string),
            attempts: 0,
            created_at: xml_util::now_iso(),
        });
        Ok(())
    }

    fn list_pending_deletes(&self, limit: u32) -> S3Result<Vec<PendingDeleteRow>> {
        let state = self.state.lock().unwrap();
        Ok(state.pending_deletes.iter().take(limit as usize).cloned().collect())
    }

    fn remove_pending_delete(&self, id: i64) -> S3Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pending_deletes.retain(|row| row.id != id);
        Ok(())
    }

    fn increment_pending_delete_attempts(&self, id: i64) -> S3Result<u32> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .pending_deletes
            .iter_mut()
            .find(|row| row.id == id)
            .expect("pending delete row must exist");
        row.attempts += 1;
        Ok(row.attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_credential() {
        let store = InMemoryMetadataStore::new();
        store.put_credential("AKID", "secret", "owner1", "Owner").unwrap();
        let cred = store.get_credential("AKID").unwrap().unwrap();
        assert_eq!(cred.secret_key, "secret");
    }

    #[test]
    fn list_objects_respects_prefix_and_max_keys() {
        let store = InMemoryMetadataStore::new();
        store.create_bucket("b", "us-east-1", "o", "Owner", "").unwrap();
        for key in ["a/1", "a/2", "b/1"] {
            store
                .put_object("b", key, 1, "\"e\"", &ObjectHeaders::default(), "STANDARD", "", &BTreeMap::new())
                .unwrap();
        }
        let result = store.list_objects("b", "a/", "", 1, "", None).unwrap();
        assert_eq!(result.contents.len(), 1);
        assert!(result.is_truncated);
    }
}
