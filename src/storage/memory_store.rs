//! In-memory `Storage` used by unit tests only — the blob-side counterpart
//! of `metadata::memory_store::InMemoryMetadataStore`. Not a
//! general-purpose backend.

use crate::error::{S3Error, S3Result};
use crate::storage::Storage;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryStorage {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    parts: Mutex<HashMap<(String, u32), Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(bucket: &str, key: &str) -> S3Error {
    S3Error::internal_error(format!("blob not found for {bucket}/{key}"))
}

impl Storage for InMemoryStorage {
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> S3Result<String> {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
        Ok(format!("{:x}", md5::compute(bytes)))
    }

    fn get(&self, bucket: &str, key: &str) -> S3Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| not_found(bucket, key))
    }

    fn get_range(
        &self,
        bucket: &str,
        key: &str,
        offset: Option<u64>,
        length: Option<u64>,
    ) -> S3Result<Vec<u8>> {
        let full = self.get(bucket, key)?;
        let start = offset.unwrap_or(0) as usize;
        let end = match length {
            Some(len) => (start + len as usize).min(full.len()),
            None => full.len(),
        };
        Ok(full[start.min(full.len())..end].to_vec())
    }

    fn delete(&self, bucket: &str, key: &str) -> S3Result<()> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    fn exists(&self, bucket: &str, key: &str) -> S3Result<bool> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), key.to_string())))
    }

    fn put_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        bytes: &[u8],
    ) -> S3Result<String> {
        self.parts
            .lock()
            .unwrap()
            .insert((upload_id.to_string(), part_number), bytes.to_vec());
        Ok(format!("{:x}", md5::compute(bytes)))
    }

    fn assemble_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> S3Result<String> {
        let parts = self.parts.lock().unwrap();
        let mut assembled = Vec::new();
        for &n in part_numbers {
            let bytes = parts
                .get(&(upload_id.to_string(), n))
                .ok_or_else(|| S3Error::internal_error(format!("missing part {n} for {upload_id}")))?;
            assembled.extend_from_slice(bytes);
        }
        drop(parts);
        self.put(bucket, key, &assembled)
    }

    fn delete_parts(&self, _bucket: &str, upload_id: &str) -> S3Result<()> {
        self.parts.lock().unwrap().retain(|(id, _), _| id != upload_id);
        Ok(())
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> S3Result<String> {
        let bytes = self.get(src_bucket, src_key)?;
        self.put(dst_bucket, dst_key, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let store = InMemoryStorage::new();
        store.put("b", "k", b"hello").unwrap();
        assert_eq!(store.get("b", "k").unwrap(), b"hello");
    }

    #[test]
    fn assemble_parts_concatenates_in_order() {
        let store = InMemoryStorage::new();
        store.put_part("b", "k", "U1", 1, b"a").unwrap();
        store.put_part("b", "k", "U1", 2, b"b").unwrap();
        store.assemble_parts("b", "k", "U1", &[1, 2]).unwrap();
        assert_eq!(store.get("b", "k").unwrap(), b"ab");
    }

    #[test]
    fn default_put_stream_buffers_then_delegates_to_put() {
        let store = InMemoryStorage::new();
        let chunks: crate::storage::ChunkIter =
            Box::new(vec![Ok(b"fo".to_vec()), Ok(b"o".to_vec())].into_iter());
        let (etag, size) = store.put_stream("b", "k", chunks).unwrap();
        assert_eq!(etag, format!("{:x}", md5::compute(b"foo")));
        assert_eq!(size, 3);
        assert_eq!(store.get("b", "k").unwrap(), b"foo");
    }
}
