//! Per-request context attached by the common-headers and auth middleware:
//! the resolved principal plus the request-id pair SigV4 error responses
//! need to carry.

use actix_web::HttpMessage;
use serde::{Deserialize, Serialize};

/// The resolved identity of the caller, attached to request extensions by
/// the auth middleware on a successful SigV4 verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub access_key: String,
    pub owner_id: String,
    pub display_name: String,
}

/// Minted by the common-headers middleware before auth runs, so every
/// response — including auth failures — carries `x-amz-request-id` and
/// `x-amz-id-2`.
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub id2: String,
}

impl RequestIds {
    pub fn generate() -> Self {
        use base64::Engine;
        use rand::RngCore;
        let mut rng = rand::thread_rng();

        let mut id_bytes = [0u8; 8];
        rng.fill_bytes(&mut id_bytes);
        let request_id = hex::encode_upper(id_bytes);

        let mut id2_bytes = [0u8; 18];
        rng.fill_bytes(&mut id2_bytes);
        let id2 = base64::engine::general_purpose::STANDARD.encode(id2_bytes);

        Self { request_id, id2 }
    }
}

/// Fetch the `RequestIds` minted for this request by the common-headers
/// middleware. Panics only if the middleware stack was misconfigured
/// (missing the common-headers wrap), which is a programmer error, not a
/// runtime condition.
pub fn request_ids(req: &actix_web::HttpRequest) -> RequestIds {
    req.extensions()
        .get::<RequestIds>()
        .cloned()
        .unwrap_or_else(RequestIds::generate)
}

pub fn principal(req: &actix_web::HttpRequest) -> Option<Principal> {
    req.extensions().get::<Principal>().cloned()
}
