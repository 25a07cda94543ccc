//! SQLite-backed metadata store: buckets/objects/multipart-upload/part/
//! credential tables behind a mutex-guarded `rusqlite::Connection`, with
//! the multipart-completion assemble-and-clear step wrapped in a single
//! transaction.

use crate::error::S3Result;
use crate::metadata::{
    BucketRow, CompleteMultipartParams, ListMultipartUploadsResult, ListObjectsResult,
    ListPartsResult, MetadataStore, MultipartPartRow, MultipartUploadRow, ObjectRow,
    PendingDeleteKind, PendingDeleteRow,
};
use crate::model::{Credential, ObjectHeaders};
use crate::xml_util;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::Mutex;

pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    pub fn open(db_path: &str) -> S3Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> S3Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    let schema_exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if schema_exists.is_some() {
        return Ok(());
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS buckets (
            name           TEXT PRIMARY KEY,
            region         TEXT NOT NULL DEFAULT 'us-east-1',
            owner_id       TEXT NOT NULL DEFAULT '',
            owner_display  TEXT NOT NULL DEFAULT '',
            acl            TEXT NOT NULL DEFAULT '',
            created_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS objects (
            bucket              TEXT NOT NULL,
            key                 TEXT NOT NULL,
            size                INTEGER NOT NULL,
            etag                TEXT NOT NULL,
            content_type        TEXT NOT NULL DEFAULT 'application/octet-stream',
            content_encoding    TEXT,
            content_language    TEXT,
            content_disposition TEXT,
            cache_control       TEXT,
            expires             TEXT,
            storage_class       TEXT NOT NULL DEFAULT 'STANDARD',
            acl                 TEXT NOT NULL DEFAULT '',
            user_metadata       TEXT NOT NULL DEFAULT '{}',
            last_modified       TEXT NOT NULL,
            delete_marker       INTEGER NOT NULL DEFAULT 0,

            PRIMARY KEY (bucket, key),
            FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_objects_bucket ON objects(bucket);
        CREATE INDEX IF NOT EXISTS idx_objects_bucket_prefix ON objects(bucket, key);

        CREATE TABLE IF NOT EXISTS multipart_uploads (
            upload_id           TEXT PRIMARY KEY,
            bucket              TEXT NOT NULL,
            key                 TEXT NOT NULL,
            content_type        TEXT NOT NULL DEFAULT 'application/octet-stream',
            content_encoding    TEXT,
            content_language    TEXT,
            content_disposition TEXT,
            cache_control       TEXT,
            expires             TEXT,
            storage_class       TEXT NOT NULL DEFAULT 'STANDARD',
            acl                 TEXT NOT NULL DEFAULT '',
            user_metadata       TEXT NOT NULL DEFAULT '{}',
            owner_id            TEXT NOT NULL DEFAULT '',
            owner_display       TEXT NOT NULL DEFAULT '',
            initiated_at        TEXT NOT NULL,

            FOREIGN KEY (bucket) REFERENCES buckets(name) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_uploads_bucket ON multipart_uploads(bucket);
        CREATE INDEX IF NOT EXISTS idx_uploads_bucket_key ON multipart_uploads(bucket, key);

        CREATE TABLE IF NOT EXISTS multipart_parts (
            upload_id      TEXT NOT NULL,
            part_number    INTEGER NOT NULL,
            size           INTEGER NOT NULL,
            etag           TEXT NOT NULL,
            last_modified  TEXT NOT NULL,

            PRIMARY KEY (upload_id, part_number),
            FOREIGN KEY (upload_id) REFERENCES multipart_uploads(upload_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS credentials (
            access_key_id  TEXT PRIMARY KEY,
            secret_key     TEXT NOT NULL,
            owner_id       TEXT NOT NULL DEFAULT '',
            display_name   TEXT NOT NULL DEFAULT '',
            active         INTEGER NOT NULL DEFAULT 1,
            created_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS schema_version (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS pending_deletes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            kind        TEXT NOT NULL,
            bucket      TEXT NOT NULL,
            key         TEXT NOT NULL,
            upload_id   TEXT,
            attempts    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?1)",
        params![xml_util::now_iso()],
    )?;
    Ok(())
}

fn user_metadata_to_json(meta: &BTreeMap<String, String>) -> String {
    serde_json::to_string(meta).unwrap_or_else(|_| "{}".to_string())
}

fn user_metadata_from_json(s: &str) -> BTreeMap<String, String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn parse_stored_timestamp(s: &str) -> DateTime<Utc> {
    xml_util::parse_iso(s).unwrap_or_else(Utc::now)
}

fn object_headers_from_row(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<ObjectHeaders> {
    Ok(ObjectHeaders {
        content_type: row.get(offset)?,
        content_encoding: row.get(offset + 1)?,
        content_language: row.get(offset + 2)?,
        content_disposition: row.get(offset + 3)?,
        cache_control: row.get(offset + 4)?,
        expires: row.get(offset + 5)?,
    })
}

impl MetadataStore for SqliteMetadataStore {
    fn create_bucket(
        &self,
        bucket: &str,
        region: &str,
        owner_id: &str,
        owner_display: &str,
        acl: &str,
    ) -> S3Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO buckets (name, region, owner_id, owner_display, acl, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![bucket, region, owner_id, owner_display, acl, xml_util::now_iso()],
        )?;
        Ok(())
    }

    fn bucket_exists(&self, bucket: &str) -> S3Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM buckets WHERE name = ?1", params![bucket], |r| r.get(0))
            .optional()?;
        Ok(exists.is_some())
    }

    fn get_bucket(&self, bucket: &str) -> S3Result<Option<BucketRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT name, region, owner_id, owner_display, acl, created_at FROM buckets WHERE name = ?1",
                params![bucket],
                |r| {
                    Ok(BucketRow {
                        name: r.get(0)?,
                        region: r.get(1)?,
                        owner_id: r.get(2)?,
                        owner_display: r.get(3)?,
                        acl: r.get(4)?,
                        created_at: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn list_buckets(&self, owner_id: &str) -> S3Result<Vec<BucketRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = if owner_id.is_empty() {
            conn.prepare(
                "SELECT name, region, owner_id, owner_display, acl, created_at FROM buckets ORDER BY name",
            )?
        } else {
            conn.prepare(
                "SELECT name, region, owner_id, owner_display, acl, created_at FROM buckets WHERE owner_id = ?1 ORDER BY name",
            )?
        };
        let map_row = |r: &rusqlite::Row| {
            Ok(BucketRow {
                name: r.get(0)?,
                region: r.get(1)?,
                owner_id: r.get(2)?,
                owner_display: r.get(3)?,
                acl: r.get(4)?,
                created_at: r.get(5)?,
            })
        };
        let rows = if owner_id.is_empty() {
            stmt.query_map([], map_row)?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            stmt.query_map(params![owner_id], map_row)?
                .collect::<Result<Vec<_>, _>>()?
        };
        Ok(rows)
    }

    fn delete_bucket(&self, bucket: &str) -> S3Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM buckets WHERE name = ?1", params![bucket])?;
        Ok(())
    }

    fn update_bucket_acl(&self, bucket: &str, acl: &str) -> S3Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE buckets SET acl = ?1 WHERE name = ?2",
            params![acl, bucket],
        )?;
        Ok(())
    }

    fn count_objects(&self, bucket: &str) -> S3Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE bucket = ?1",
            params![bucket],
            |r| r.get(0),
        )?;
        Ok(count as u64)
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
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO objects
                (bucket, key, size, etag, content_type, content_encoding, content_language,
                 content_disposition, cache_control, expires, storage_class, acl,
                 user_metadata, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                bucket,
                key,
                size as i64,
                etag,
                headers.content_type.clone().unwrap_or_else(|| "application/octet-stream".to_string()),
                headers.content_encoding,
                headers.content_language,
                headers.content_disposition,
                headers.cache_control,
                headers.expires,
                storage_class,
                acl,
                user_metadata_to_json(user_metadata),
                xml_util::now_iso(),
            ],
        )?;
        Ok(())
    }

    fn get_object(&self, bucket: &str, key: &str) -> S3Result<Option<ObjectRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT key, size, etag, content_type, content_encoding, content_language,
                        content_disposition, cache_control, expires, storage_class, acl,
                        user_metadata, last_modified
                 FROM objects WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
                |r| {
                    Ok(ObjectRow {
                        key: r.get(0)?,
                        size: r.get::<_, i64>(1)? as u64,
                        etag: r.get(2)?,
                        headers: object_headers_from_row(r, 3)?,
                        storage_class: r.get(9)?,
                        acl: r.get(10)?,
                        user_metadata: user_metadata_from_json(&r.get::<_, String>(11)?),
                        last_modified: r.get(12)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn object_exists(&self, bucket: &str, key: &str) -> S3Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM objects WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
                |r| r.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> S3Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM objects WHERE bucket = ?1 AND key = ?2",
            params![bucket, key],
        )?;
        Ok(())
    }

    fn delete_objects_meta(&self, bucket: &str, keys: &[String]) -> S3Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut deleted = Vec::new();
        for key in keys {
            conn.execute(
                "DELETE FROM objects WHERE bucket = ?1 AND key = ?2",
                params![bucket, key],
            )?;
            // S3's multi-delete reports every requested key as deleted,
            // whether or not it existed (idempotent semantics).
            deleted.push(key.clone());
        }
        Ok(deleted)
    }

    fn update_object_acl(&self, bucket: &str, key: &str, acl: &str) -> S3Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE objects SET acl = ?1 WHERE bucket = ?2 AND key = ?3",
            params![acl, bucket, key],
        )?;
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

        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT key, size, etag, last_modified, storage_class, user_metadata, \
             content_type, content_encoding, content_language, content_disposition, \
             cache_control, expires, acl \
             FROM objects WHERE bucket = ?1",
        );
        let bind_prefix = prefix.to_string();
        let bind_start_after = start_after.to_string();
        let mut param_refs: Vec<&dyn rusqlite::ToSql> = vec![&bucket];

        if !prefix.is_empty() {
            sql.push_str(&format!(" AND key LIKE ?{} || '%'", param_refs.len() + 1));
            param_refs.push(&bind_prefix);
        }
        if !start_after.is_empty() {
            sql.push_str(&format!(" AND key > ?{}", param_refs.len() + 1));
            param_refs.push(&bind_start_after);
        }
        sql.push_str(" ORDER BY key");

        // Without a delimiter every fetched row becomes exactly one Contents
        // entry, so `max_keys + 1` rows are always enough to both fill the
        // page and detect truncation. With a delimiter, many rows can
        // collapse into one CommonPrefixes entry, so no fixed multiple of
        // `max_keys` bounds how many rows must be read before the page is
        // full — fetch every matching row instead, the same guarantee
        // `memory_store::list_objects` gets for free from its full scan.
        if delimiter.is_empty() {
            let fetch_limit = max_keys as i64 + 1;
            sql.push_str(&format!(" LIMIT {fetch_limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<ObjectRow> = stmt
            .query_map(param_refs.as_slice(), |r| {
                Ok(ObjectRow {
                    key: r.get(0)?,
                    size: r.get::<_, i64>(1)? as u64,
                    etag: r.get(2)?,
                    last_modified: r.get(3)?,
                    storage_class: r.get(4)?,
                    user_metadata: user_metadata_from_json(&r.get::<_, String>(5)?),
                    headers: ObjectHeaders {
                        content_type: r.get(6)?,
                        content_encoding: r.get(7)?,
                        content_language: r.get(8)?,
                        content_disposition: r.get(9)?,
                        cache_control: r.get(10)?,
                        expires: r.get(11)?,
                    },
                    acl: r.get(12)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let total_fetched = rows.len();
        let mut contents = Vec::new();
        let mut common_prefixes = Vec::new();
        let mut seen_prefixes = std::collections::HashSet::new();
        let mut rows_consumed = 0usize;

        for row in rows {
            rows_consumed += 1;
            if !delimiter.is_empty() {
                let suffix = &row.key[prefix.len().min(row.key.len())..];
                if let Some(delim_pos) = suffix.find(delimiter) {
                    let cp = format!("{prefix}{}", &suffix[..delim_pos + delimiter.len()]);
                    if seen_prefixes.insert(cp.clone()) {
                        common_prefixes.push(cp);
                        if contents.len() + common_prefixes.len() >= max_keys as usize {
                            break;
                        }
                    }
                    continue;
                }
            }
            contents.push(row);
            if contents.len() + common_prefixes.len() >= max_keys as usize {
                break;
            }
        }

        let total_returned = contents.len() + common_prefixes.len();
        let is_truncated = total_returned >= max_keys as usize && rows_consumed < total_fetched;

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
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO multipart_uploads
                (upload_id, bucket, key, content_type, content_encoding, content_language,
                 content_disposition, cache_control, expires, storage_class, acl,
                 user_metadata, owner_id, owner_display, initiated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                upload_id,
                bucket,
                key,
                headers.content_type.clone().unwrap_or_else(|| "application/octet-stream".to_string()),
                headers.content_encoding,
                headers.content_language,
                headers.content_disposition,
                headers.cache_control,
                headers.expires,
                storage_class,
                acl,
                user_metadata_to_json(user_metadata),
                owner_id,
                owner_display,
                xml_util::now_iso(),
            ],
        )?;
        Ok(())
    }

    fn get_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> S3Result<Option<MultipartUploadRow>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT upload_id, bucket, key, content_type, content_encoding, content_language,
                        content_disposition, cache_control, expires, storage_class, acl,
                        user_metadata, owner_id, owner_display, initiated_at
                 FROM multipart_uploads WHERE upload_id = ?1 AND bucket = ?2 AND key = ?3",
                params![upload_id, bucket, key],
                |r| {
                    Ok(MultipartUploadRow {
                        upload_id: r.get(0)?,
                        bucket: r.get(1)?,
                        key: r.get(2)?,
                        headers: object_headers_from_row(r, 3)?,
                        storage_class: r.get(9)?,
                        acl: r.get(10)?,
                        user_metadata: user_metadata_from_json(&r.get::<_, String>(11)?),
                        owner_id: r.get(12)?,
                        owner_display: r.get(13)?,
                        initiated_at: r.get(14)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn complete_multipart_upload(&self, params_in: CompleteMultipartParams<'_>) -> S3Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO objects
                (bucket, key, size, etag, content_type, content_encoding, content_language,
                 content_disposition, cache_control, expires, storage_class, acl,
                 user_metadata, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                params_in.bucket,
                params_in.key,
                params_in.size as i64,
                params_in.etag,
                params_in
                    .headers
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                params_in.headers.content_encoding,
                params_in.headers.content_language,
                params_in.headers.content_disposition,
                params_in.headers.cache_control,
                params_in.headers.expires,
                params_in.storage_class,
                params_in.acl,
                user_metadata_to_json(params_in.user_metadata),
                xml_util::now_iso(),
            ],
        )?;
        tx.execute(
            "DELETE FROM multipart_parts WHERE upload_id = ?1",
            params![params_in.upload_id],
        )?;
        tx.execute(
            "DELETE FROM multipart_uploads WHERE upload_id = ?1",
            params![params_in.upload_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn abort_multipart_upload(&self, _bucket: &str, _key: &str, upload_id: &str) -> S3Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM multipart_parts WHERE upload_id = ?1",
            params![upload_id],
        )?;
        conn.execute(
            "DELETE FROM multipart_uploads WHERE upload_id = ?1",
            params![upload_id],
        )?;
        Ok(())
    }

    fn put_part(&self, upload_id: &str, part_number: u32, size: u64, etag: &str) -> S3Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO multipart_parts
                (upload_id, part_number, size, etag, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![upload_id, part_number, size as i64, etag, xml_util::now_iso()],
        )?;
        Ok(())
    }

    fn get_parts_for_completion(&self, upload_id: &str) -> S3Result<Vec<MultipartPartRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT part_number, size, etag, last_modified FROM multipart_parts
             WHERE upload_id = ?1 ORDER BY part_number",
        )?;
        let rows = stmt
            .query_map(params![upload_id], |r| {
                Ok(MultipartPartRow {
                    part_number: r.get::<_, i64>(0)? as u32,
                    size: r.get::<_, i64>(1)? as u64,
                    etag: r.get(2)?,
                    last_modified: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn list_parts(
        &self,
        upload_id: &str,
        part_number_marker: u32,
        max_parts: u32,
    ) -> S3Result<ListPartsResult> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT part_number, size, etag, last_modified FROM multipart_parts
             WHERE upload_id = ?1 AND part_number > ?2
             ORDER BY part_number LIMIT ?3",
        )?;
        let rows: Vec<MultipartPartRow> = stmt
            .query_map(
                params![upload_id, part_number_marker, max_parts as i64 + 1],
                |r| {
                    Ok(MultipartPartRow {
                        part_number: r.get::<_, i64>(0)? as u32,
                        size: r.get::<_, i64>(1)? as u64,
                        etag: r.get(2)?,
                        last_modified: r.get(3)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let is_truncated = rows.len() > max_parts as usize;
        let mut parts = rows;
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
        delimiter: &str,
        max_uploads: u32,
        key_marker: &str,
        upload_id_marker: &str,
    ) -> S3Result<ListMultipartUploadsResult> {
        let conn = self.conn.lock().unwrap();
        let mut sql = String::from(
            "SELECT upload_id, bucket, key, content_type, storage_class, owner_id, owner_display, initiated_at \
             FROM multipart_uploads WHERE bucket = ?1",
        );
        let bind_prefix = prefix.to_string();
        let bind_key_marker = key_marker.to_string();
        let bind_upload_id_marker = upload_id_marker.to_string();
        let mut param_refs: Vec<&dyn rusqlite::ToSql> = vec![&bucket];

        if !prefix.is_empty() {
            sql.push_str(&format!(" AND key LIKE ?{} || '%'", param_refs.len() + 1));
            param_refs.push(&bind_prefix);
        }
        if !key_marker.is_empty() {
            if !upload_id_marker.is_empty() {
                let n1 = param_refs.len() + 1;
                let n2 = n1 + 1;
                let n3 = n2 + 1;
                sql.push_str(&format!(" AND (key > ?{n1} OR (key = ?{n2} AND upload_id > ?{n3}))"));
                param_refs.push(&bind_key_marker);
                param_refs.push(&bind_key_marker);
                param_refs.push(&bind_upload_id_marker);
            } else {
                sql.push_str(&format!(" AND key > ?{}", param_refs.len() + 1));
                param_refs.push(&bind_key_marker);
            }
        }
        sql.push_str(&format!(" ORDER BY key, initiated_at LIMIT {}", max_uploads as i64 + 1));

        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<MultipartUploadRow> = stmt
            .query_map(param_refs.as_slice(), |r| {
                Ok(MultipartUploadRow {
                    upload_id: r.get(0)?,
                    bucket: r.get(1)?,
                    key: r.get(2)?,
                    headers: ObjectHeaders {
                        content_type: r.get(3)?,
                        ..Default::default()
                    },
                    storage_class: r.get(4)?,
                    acl: String::new(),
                    user_metadata: BTreeMap::new(),
                    owner_id: r.get(5)?,
                    owner_display: r.get(6)?,
                    initiated_at: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let total_fetched = rows.len();
        let mut uploads = Vec::new();
        let mut common_prefixes = Vec::new();
        let mut seen_prefixes = std::collections::HashSet::new();

        for row in rows {
            if !delimiter.is_empty() {
                let suffix = &row.key[prefix.len().min(row.key.len())..];
                if let Some(delim_pos) = suffix.find(delimiter) {
                    let cp = format!("{prefix}{}", &suffix[..delim_pos + delimiter.len()]);
                    if seen_prefixes.insert(cp.clone()) {
                        common_prefixes.push(cp);
                        if uploads.len() + common_prefixes.len() >= max_uploads as usize {
                            break;
                        }
                    }
                    continue;
                }
            }
            uploads.push(row);
            if uploads.len() + common_prefixes.len() >= max_uploads as usize {
                break;
            }
        }

        let total = uploads.len() + common_prefixes.len();
        let is_truncated = total_fetched > total && total >= max_uploads as usize;

        let (mut next_key_marker, mut next_upload_id_marker) = (None, None);
        if is_truncated {
            if let Some(last) = uploads.last() {
                next_key_marker = Some(last.key.clone());
                next_upload_id_marker = Some(last.upload_id.clone());
            }
        }

        common_prefixes.sort();

        Ok(ListMultipartUploadsResult {
            uploads,
            common_prefixes,
            is_truncated,
            next_key_marker,
            next_upload_id_marker,
        })
    }

    fn get_credential(&self, access_key_id: &str) -> S3Result<Option<Credential>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT access_key_id, secret_key, owner_id, display_name, active, created_at
                 FROM credentials WHERE access_key_id = ?1 AND active = 1",
                params![access_key_id],
                |r| {
                    Ok(Credential {
                        access_key_id: r.get(0)?,
                        secret_key: r.get(1)?,
                        owner_id: r.get(2)?,
                        display_name: r.get(3)?,
                        active: r.get::<_, i64>(4)? != 0,
                        created_at: parse_stored_timestamp(&r.get::<_, String>(5)?),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn put_credential(
        &self,
        access_key_id: &str,
        secret_key: &str,
        owner_id: &str,
        display_name: &str,
    ) -> S3Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO credentials
                (access_key_id, secret_key, owner_id, display_name, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![access_key_id, secret_key, owner_id, display_name, xml_util::now_iso()],
        )?;
        Ok(())
    }

    fn reap_expired_uploads(&self, ttl_secs: i64) -> S3Result<Vec<(String, String, String)>> {
        let cutoff = xml_util::to_iso(Utc::now() - chrono::Duration::seconds(ttl_secs));
        let conn = self.conn.lock().unwrap();
        let expired: Vec<(String, String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT bucket, key, upload_id FROM multipart_uploads WHERE initiated_at < ?1",
            )?;
            stmt.query_map(params![cutoff], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
                .collect::<Result<Vec<_>, _>>()?
        };
        for (_, _, upload_id) in &expired {
            conn.execute(
                "DELETE FROM multipart_uploads WHERE upload_id = ?1",
                params![upload_id],
            )?;
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
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pending_deletes (kind, bucket, key, upload_id, attempts, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![kind_to_str(kind), bucket, key, upload_id, xml_util::now_iso()],
        )?;
        Ok(())
    }

    fn list_pending_deletes(&self, limit: u32) -> S3Result<Vec<PendingDeleteRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, kind, bucket, key, upload_id, attempts, created_at
             FROM pending_deletes ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |r| {
                let kind: String = r.get(1)?;
                Ok(PendingDeleteRow {
                    id: r.get(0)?,
                    kind: kind_from_str(&kind),
                    bucket: r.get(2)?,
                    key: r.get(3)?,
                    upload_id: r.get(4)?,
                    attempts: r.get::<_, i64>(5)? as u32,
                    created_at: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn remove_pending_delete(&self, id: i64) -> S3Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM pending_deletes WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn increment_pending_delete_attempts(&self, id: i64) -> S3Result<u32> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE pending_deletes SET attempts = attempts + 1 WHERE id = ?1",
            params![id],
        )?;
        let attempts: i64 = conn.query_row(
            "SELECT attempts FROM pending_deletes WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        Ok(attempts as u32)
    }
}

fn kind_to_str(kind: PendingDeleteKind) -> &'static str {
    match kind {
        PendingDeleteKind::Object => "object",
        PendingDeleteKind::Parts => "parts",
    }
}

fn kind_from_str(s: &str) -> PendingDeleteKind {
    match s {
        "parts" => PendingDeleteKind::Parts,
        _ => PendingDeleteKind::Object,
    }
}
