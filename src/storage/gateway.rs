//! Cloud gateway backends: only their contract with the rest of the
//! system is specified here, not a working integration.
//!
//! AWS/GCP/Azure proxying is an external collaborator: this module defines
//! the contract a gateway must satisfy (the `Storage` trait, unchanged) and
//! the configuration shape each one is selected and parameterized by, but
//! does not vendor a cloud SDK. A concrete gateway plugs in behind the same
//! `storage::config::build_storage_store` factory that selects the local
//! backend, the moment one is written against a real SDK crate.

use crate::error::{S3Error, S3Result};
use crate::storage::Storage;

/// Upstream bucket/container coordinates common to all three clouds,
/// matching the `storage.aws_*` / `storage.gcp_*` / `storage.azure_*`
/// configuration options.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub upstream_bucket: String,
    pub region_or_project: String,
    pub key_prefix: String,
}

/// A `Storage` implementation that honors the contract (every call is a
/// legal, well-typed operation) but has no upstream SDK wired in yet.
/// Selecting `storage.backend = aws|gcp|azure` without that SDK present
/// fails loudly at startup via `NotImplemented` rather than silently
/// falling back to the local backend.
pub struct UnimplementedGateway {
    provider: &'static str,
    #[allow(dead_code)]
    config: GatewayConfig,
}

impl UnimplementedGateway {
    pub fn new(provider: &'static str, config: GatewayConfig) -> Self {
        Self { provider, config }
    }

    fn unimplemented(&self) -> S3Error {
        S3Error::not_implemented(format!(
            "the {} storage gateway is not compiled into this build",
            self.provider
        ))
    }
}

impl Storage for UnimplementedGateway {
    fn put(&self, _bucket: &str, _key: &str, _bytes: &[u8]) -> S3Result<String> {
        Err(self.unimplemented())
    }

    fn get(&self, _bucket: &str, _key: &str) -> S3Result<Vec<u8>> {
        Err(self.unimplemented())
    }

    fn get_range(
        &self,
        _bucket: &str,
        _key: &str,
        _offset: Option<u64>,
        _length: Option<u64>,
    ) -> S3Result<Vec<u8>> {
        Err(self.unimplemented())
    }

    fn delete(&self, _bucket: &str, _key: &str) -> S3Result<()> {
        Err(self.unimplemented())
    }

    fn exists(&self, _bucket: &str, _key: &str) -> S3Result<bool> {
        Err(self.unimplemented())
    }

    fn put_part(
        &self,
        _bucket: &str,
        _key: &str,
        _upload_id: &str,
        _part_number: u32,
        _bytes: &[u8],
    ) -> S3Result<String> {
        Err(self.unimplemented())
    }

    fn assemble_parts(
        &self,
        _bucket: &str,
        _key: &str,
        _upload_id: &str,
        _part_numbers: &[u32],
    ) -> S3Result<String> {
        Err(self.unimplemented())
    }

    fn delete_parts(&self, _bucket: &str, _upload_id: &str) -> S3Result<()> {
        Err(self.unimplemented())
    }

    fn copy_object(
        &self,
        _src_bucket: &str,
        _src_key: &str,
        _dst_bucket: &str,
        _dst_key: &str,
    ) -> S3Result<String> {
        Err(self.unimplemented())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_calls_fail_with_not_implemented() {
        let gw = UnimplementedGateway::new("aws", GatewayConfig::default());
        let err = gw.get("b", "k").unwrap_err();
        assert_eq!(err.code, "NotImplemented");
    }
}
