//! Local filesystem blob backend, the reference `Storage` implementation:
//! bucket/key-addressed files under a root directory, written via
//! tmp-file-then-rename for crash safety.

use crate::error::{S3Error, S3Result};
use crate::storage::{Chunk, ChunkIter, Storage, STREAM_CHUNK_SIZE};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonically increasing suffix for tmp files, so concurrent writers to
/// the same key never collide on the same tmp path.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub struct LocalFsStorage {
    root: PathBuf,
}

impl LocalFsStorage {
    /// Opens (creating if absent) the storage root, and sweeps `.parts` for
    /// leftover temp files from a prior unclean shutdown.
    pub fn open(root: impl Into<PathBuf>) -> S3Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let store = Self { root };
        store.prune_orphaned_temp_files()?;
        Ok(store)
    }

    fn parts_root(&self) -> PathBuf {
        self.root.join(".parts")
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.root.join(bucket);
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.parts_root().join(upload_id).join(part_number.to_string())
    }

    fn tmp_sibling(target: &Path) -> PathBuf {
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        target.with_file_name(format!("{file_name}.tmp.{}.{n}", std::process::id()))
    }

    /// Write `bytes` to `target` via tmp-write/fsync/rename/fsync-dir, the
    /// atomic pattern every mutating operation uses. Readers observe either
    /// the prior blob at `target` or the new one in full.
    fn atomic_write(&self, target: &Path, bytes: &[u8]) -> S3Result<()> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = Self::tmp_sibling(target);
        {
            let mut f = File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, target)?;
        fsync_dir(target.parent().unwrap_or(&self.root))?;
        Ok(())
    }

    /// Streamed counterpart to `atomic_write`: writes each chunk as it
    /// arrives and hashes incrementally, so the object is never held whole
    /// in memory. Same tmp-write/fsync/rename/fsync-dir crash-safety as
    /// `atomic_write`.
    fn atomic_write_stream(&self, target: &Path, chunks: ChunkIter) -> S3Result<(String, u64)> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = Self::tmp_sibling(target);
        let mut context = md5::Context::new();
        let mut total = 0u64;
        {
            let mut f = File::create(&tmp)?;
            for chunk in chunks {
                let chunk = chunk?;
                f.write_all(&chunk)?;
                context.consume(&chunk);
                total += chunk.len() as u64;
            }
            f.sync_all()?;
        }
        fs::rename(&tmp, target)?;
        fsync_dir(target.parent().unwrap_or(&self.root))?;
        Ok((format!("{:x}", context.compute()), total))
    }

    fn prune_orphaned_temp_files(&self) -> S3Result<()> {
        let parts_root = self.parts_root();
        if !parts_root.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&parts_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for part_entry in fs::read_dir(entry.path())? {
                let part_entry = part_entry?;
                let name = part_entry.file_name();
                if name.to_string_lossy().contains(".tmp.") {
                    let _ = fs::remove_file(part_entry.path());
                }
            }
        }
        Ok(())
    }
}

fn fsync_dir(dir: &Path) -> S3Result<()> {
    // Directories cannot be opened for fsync on every platform (notably
    // Windows); best-effort only.
    if let Ok(f) = File::open(dir) {
        let _ = f.sync_all();
    }
    Ok(())
}

fn read_whole(path: &Path) -> S3Result<Vec<u8>> {
    let mut f = File::open(path).map_err(|e| not_found_or(e, path))?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

fn not_found_or(e: std::io::Error, path: &Path) -> S3Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        S3Error::internal_error(format!("blob not found at {}", path.display()))
    } else {
        S3Error::from(e)
    }
}

/// Lazily reads a file in `STREAM_CHUNK_SIZE` pieces, optionally stopping
/// after `remaining` bytes, so `get_stream` never materializes the whole
/// range at once.
struct FileChunks {
    file: File,
    remaining: Option<u64>,
}

impl Iterator for FileChunks {
    type Item = S3Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        let to_read = match self.remaining {
            Some(0) => return None,
            Some(r) => STREAM_CHUNK_SIZE.min(r as usize),
            None => STREAM_CHUNK_SIZE,
        };
        let mut buf = vec![0u8; to_read];
        match self.file.read(&mut buf) {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                if let Some(r) = self.remaining.as_mut() {
                    *r -= n as u64;
                }
                Some(Ok(buf))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

impl Storage for LocalFsStorage {
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> S3Result<String> {
        let path = self.object_path(bucket, key);
        self.atomic_write(&path, bytes)?;
        Ok(format!("{:x}", md5::compute(bytes)))
    }

    fn get(&self, bucket: &str, key: &str) -> S3Result<Vec<u8>> {
        read_whole(&self.object_path(bucket, key))
    }

    fn get_range(
        &self,
        bucket: &str,
        key: &str,
        offset: Option<u64>,
        length: Option<u64>,
    ) -> S3Result<Vec<u8>> {
        let path = self.object_path(bucket, key);
        match (offset, length) {
            (None, None) => read_whole(&path),
            (offset, length) => {
                let mut f = File::open(&path).map_err(|e| not_found_or(e, &path))?;
                let start = offset.unwrap_or(0);
                f.seek(SeekFrom::Start(start))?;
                match length {
                    Some(len) => {
                        let mut buf = vec![0u8; len as usize];
                        f.read_exact(&mut buf)?;
                        Ok(buf)
                    }
                    None => {
                        let mut buf = Vec::new();
                        f.read_to_end(&mut buf)?;
                        Ok(buf)
                    }
                }
            }
        }
    }

    fn put_stream(&self, bucket: &str, key: &str, chunks: ChunkIter) -> S3Result<(String, u64)> {
        let path = self.object_path(bucket, key);
        self.atomic_write_stream(&path, chunks)
    }

    fn get_stream(&self, bucket: &str, key: &str, offset: Option<u64>, length: Option<u64>) -> S3Result<ChunkIter> {
        let path = self.object_path(bucket, key);
        let mut f = File::open(&path).map_err(|e| not_found_or(e, &path))?;
        if let Some(start) = offset {
            f.seek(SeekFrom::Start(start))?;
        }
        Ok(Box::new(FileChunks { file: f, remaining: length }))
    }

    fn delete(&self, bucket: &str, key: &str) -> S3Result<()> {
        let path = self.object_path(bucket, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, bucket: &str, key: &str) -> S3Result<bool> {
        Ok(self.object_path(bucket, key).is_file())
    }

    fn put_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        bytes: &[u8],
    ) -> S3Result<String> {
        let path = self.part_path(upload_id, part_number);
        self.atomic_write(&path, bytes)?;
        Ok(format!("{:x}", md5::compute(bytes)))
    }

    fn put_part_stream(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: u32,
        chunks: ChunkIter,
    ) -> S3Result<(String, u64)> {
        let path = self.part_path(upload_id, part_number);
        self.atomic_write_stream(&path, chunks)
    }

    fn assemble_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_numbers: &[u32],
    ) -> S3Result<String> {
        let mut assembled = Vec::new();
        for &part_number in part_numbers {
            let part_path = self.part_path(upload_id, part_number);
            assembled.extend_from_slice(&read_whole(&part_path)?);
        }
        let target = self.object_path(bucket, key);
        self.atomic_write(&target, &assembled)?;
        Ok(format!("{:x}", md5::compute(&assembled)))
    }

    fn delete_parts(&self, _bucket: &str, upload_id: &str) -> S3Result<()> {
        let dir = self.parts_root().join(upload_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> S3Result<String> {
        let bytes = self.get(src_bucket, src_key)?;
        let target = self.object_path(dst_bucket, dst_key);
        self.atomic_write(&target, &bytes)?;
        Ok(format!("{:x}", md5::compute(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = LocalFsStorage::open(dir.path()).unwrap();
        let etag = store.put("b", "k", b"hello").unwrap();
        assert_eq!(etag, format!("{:x}", md5::compute(b"hello")));
        assert_eq!(store.get("b", "k").unwrap(), b"hello");
    }

    #[test]
    fn key_with_slashes_creates_nested_path() {
        let dir = tempdir().unwrap();
        let store = LocalFsStorage::open(dir.path()).unwrap();
        store.put("b", "a/b/c.txt", b"nested").unwrap();
        assert!(store.exists("b", "a/b/c.txt").unwrap());
        assert!(dir.path().join("b").join("a").join("b").join("c.txt").is_file());
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = LocalFsStorage::open(dir.path()).unwrap();
        store.put("b", "k", b"x").unwrap();
        store.delete("b", "k").unwrap();
        store.delete("b", "k").unwrap();
        assert!(!store.exists("b", "k").unwrap());
    }

    #[test]
    fn get_range_reads_a_slice() {
        let dir = tempdir().unwrap();
        let store = LocalFsStorage::open(dir.path()).unwrap();
        store.put("b", "k", b"0123456789").unwrap();
        let slice = store.get_range("b", "k", Some(2), Some(3)).unwrap();
        assert_eq!(slice, b"234");
    }

    #[test]
    fn assemble_parts_concatenates_in_listed_order() {
        let dir = tempdir().unwrap();
        let store = LocalFsStorage::open(dir.path()).unwrap();
        store.put_part("b", "k", "U1", 2, b"second").unwrap();
        store.put_part("b", "k", "U1", 1, b"first-").unwrap();
        let etag = store.assemble_parts("b", "k", "U1", &[1, 2]).unwrap();
        let assembled = store.get("b", "k").unwrap();
        assert_eq!(assembled, b"first-second");
        assert_eq!(etag, format!("{:x}", md5::compute(b"first-second")));
    }

    #[test]
    fn delete_parts_removes_the_whole_upload_dir() {
        let dir = tempdir().unwrap();
        let store = LocalFsStorage::open(dir.path()).unwrap();
        store.put_part("b", "k", "U1", 1, b"x").unwrap();
        store.delete_parts("b", "U1").unwrap();
        assert!(!store.parts_root().join("U1").exists());
        store.delete_parts("b", "U1").unwrap();
    }

    #[test]
    fn copy_object_duplicates_bytes_under_new_key() {
        let dir = tempdir().unwrap();
        let store = LocalFsStorage::open(dir.path()).unwrap();
        store.put("src", "k", b"payload").unwrap();
        store.copy_object("src", "k", "dst", "k2").unwrap();
        assert_eq!(store.get("dst", "k2").unwrap(), b"payload");
    }

    #[test]
    fn put_stream_writes_chunks_and_hashes_incrementally() {
        let dir = tempdir().unwrap();
        let store = LocalFsStorage::open(dir.path()).unwrap();
        let chunks: ChunkIter = Box::new(
            vec![Ok(b"hel".to_vec()), Ok(b"lo, ".to_vec()), Ok(b"world".to_vec())].into_iter(),
        );
        let (etag, size) = store.put_stream("b", "k", chunks).unwrap();
        assert_eq!(etag, format!("{:x}", md5::compute(b"hello, world")));
        assert_eq!(size, 12);
        assert_eq!(store.get("b", "k").unwrap(), b"hello, world");
    }

    #[test]
    fn get_stream_yields_the_whole_object_across_chunks() {
        let dir = tempdir().unwrap();
        let store = LocalFsStorage::open(dir.path()).unwrap();
        let body = vec![7u8; STREAM_CHUNK_SIZE * 2 + 10];
        store.put("b", "k", &body).unwrap();
        let mut collected = Vec::new();
        for chunk in store.get_stream("b", "k", None, None).unwrap() {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, body);
    }

    #[test]
    fn get_stream_honors_offset_and_length() {
        let dir = tempdir().unwrap();
        let store = LocalFsStorage::open(dir.path()).unwrap();
        store.put("b", "k", b"0123456789").unwrap();
        let mut collected = Vec::new();
        for chunk in store.get_stream("b", "k", Some(2), Some(3)).unwrap() {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"234");
    }

    #[test]
    fn put_part_stream_round_trips_through_assemble_parts() {
        let dir = tempdir().unwrap();
        let store = LocalFsStorage::open(dir.path()).unwrap();
        let chunks: ChunkIter = Box::new(vec![Ok(b"part-one".to_vec())].into_iter());
        let (etag, size) = store.put_part_stream("b", "k", "U1", 1, chunks).unwrap();
        assert_eq!(etag, format!("{:x}", md5::compute(b"part-one")));
        assert_eq!(size, 8);
        store.assemble_parts("b", "k", "U1", &[1]).unwrap();
        assert_eq!(store.get("b", "k").unwrap(), b"part-one");
    }
}
