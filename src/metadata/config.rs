//! Metadata backend selection: a small factory that turns a configured
//! backend name into the concrete `MetadataStore` implementation.

use crate::error::{S3Error, S3Result};
use crate::metadata::sqlite_store::SqliteMetadataStore;
use crate::metadata::MetadataStore;
use std::sync::Arc;

/// Build the configured `MetadataStore`. Only `sqlite` is a real backend;
/// anything else is rejected at startup rather than silently falling back,
/// since an unrecognized backend name is almost certainly a config typo.
pub fn build_metadata_store(backend: &str, db_path: &str) -> S3Result<Arc<dyn MetadataStore>> {
    match backend.to_lowercase().as_str() {
        "sqlite" => {
            log::info!("opening SQLite metadata store at {db_path}");
            Ok(Arc::new(SqliteMetadataStore::open(db_path)?))
        }
        other => Err(S3Error::internal_error(format!(
            "unknown metadata backend: {other}"
        ))),
    }
}
