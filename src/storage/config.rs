//! Blob storage backend selection, mirroring
//! `metadata::config::build_metadata_store`'s factory shape.

use crate::error::{S3Error, S3Result};
use crate::storage::gateway::{GatewayConfig, UnimplementedGateway};
use crate::storage::local_fs::LocalFsStorage;
use crate::storage::Storage;
use std::sync::Arc;

pub fn build_storage_store(
    backend: &str,
    local_root: &str,
    gateway: GatewayConfig,
) -> S3Result<Arc<dyn Storage>> {
    match backend.to_lowercase().as_str() {
        "local" => {
            log::info!("using local filesystem storage backend at {local_root}");
            Ok(Arc::new(LocalFsStorage::open(local_root)?))
        }
        "aws" => Ok(Arc::new(UnimplementedGateway::new("aws", gateway))),
        "gcp" => Ok(Arc::new(UnimplementedGateway::new("gcp", gateway))),
        "azure" => Ok(Arc::new(UnimplementedGateway::new("azure", gateway))),
        other => Err(S3Error::internal_error(format!(
            "unknown storage backend: {other}"
        ))),
    }
}
