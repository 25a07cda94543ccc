//! HMAC-SHA256 signing-key derivation chain and the bounded signing-key
//! cache, built on the `hmac`+`sha2` crates.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Mutex;

type HmacSha256 = Hmac<Sha256>;

const SCOPE_TERMINATOR: &[u8] = b"aws4_request";
const SERVICE_NAME: &[u8] = b"s3";
/// Flush the whole cache rather than evicting individual entries once it
/// grows past this size; signing keys are cheap to re-derive and a full
/// LRU is not worth the complexity for a cache this small.
const MAX_CACHE_ENTRIES: usize = 100;

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(key).expect("HMAC accepts a key of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the 32-byte SigV4 signing key via the 4-step HMAC chain:
/// `HMAC("AWS4" || secret, date) -> HMAC(_, region) -> HMAC(_, "s3") ->
/// HMAC(_, "aws4_request")`.
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE_NAME);
    hmac_sha256(&k_service, SCOPE_TERMINATOR)
}

pub fn compute_signature(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    access_key: String,
    date: String,
    region: String,
}

/// Caches derived signing keys by (access_key, date, region) so repeated
/// requests within the same UTC day from the same caller skip the 4-step
/// HMAC chain. Bounded: the whole cache is cleared once it would grow past
/// `MAX_CACHE_ENTRIES`.
pub struct SigningKeyCache {
    entries: Mutex<HashMap<CacheKey, Vec<u8>>>,
}

impl Default for SigningKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SigningKeyCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn derive(&self, secret_key: &str, date: &str, region: &str, access_key: &str) -> Vec<u8> {
        let cache_key = CacheKey {
            access_key: access_key.to_string(),
            date: date.to_string(),
            region: region.to_string(),
        };
        let mut entries = self.entries.lock().expect("signing key cache poisoned");
        if let Some(key) = entries.get(&cache_key) {
            return key.clone();
        }
        let signing_key = derive_signing_key(secret_key, date, region);
        if entries.len() > MAX_CACHE_ENTRIES {
            entries.clear();
        }
        entries.insert(cache_key, signing_key.clone());
        signing_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_key_is_32_bytes() {
        let key = derive_signing_key("secret", "20260101", "us-east-1");
        assert_eq!(key.len(), 32);
    }

    #[test]
    fn signature_is_64_hex_chars() {
        let key = derive_signing_key("secret", "20260101", "us-east-1");
        let sig = compute_signature(&key, "hello");
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cache_returns_same_key_on_repeat_lookup() {
        let cache = SigningKeyCache::new();
        let a = cache.derive("secret", "20260101", "us-east-1", "AKID");
        let b = cache.derive("secret", "20260101", "us-east-1", "AKID");
        assert_eq!(a, b);
    }
}
