//! Request signing for the invocation endpoint.
//!
//! 署名は raw body の HMAC-SHA256 を hex にしたもの。
//! `Authorization: Bearer <hex>` で送る。

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authorization header")]
    Missing,

    #[error("authorization header is not a bearer token")]
    NotBearer,

    #[error("signature is not valid hex")]
    Malformed,

    #[error("signature mismatch")]
    Mismatch,
}

/// Shared-secret signer used by both sides of the endpoint.
#[derive(Clone)]
pub struct Signer {
    keyed: HmacSha256,
}

impl Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, InvalidLength> {
        Ok(Self {
            keyed: HmacSha256::new_from_slice(secret.as_ref())?,
        })
    }

    fn mac(&self) -> HmacSha256 {
        self.keyed.clone()
    }

    /// Lowercase hex HMAC-SHA256 of `body`.
    pub fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check an `Authorization` header value against `body`.
    ///
    /// Comparison is constant-time.
    pub fn verify(&self, body: &[u8], authorization: Option<&str>) -> Result<(), AuthError> {
        let header = authorization.ok_or(AuthError::Missing)?;
        let signature = header
            .strip_prefix(BEARER_PREFIX)
            .ok_or(AuthError::NotBearer)?;
        let signature = hex::decode(signature).map_err(|_| AuthError::Malformed)?;

        let mut mac = self.mac();
        mac.update(body);
        mac.verify_slice(&signature).map_err(|_| AuthError::Mismatch)
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("secret", &"<redacted>").finish()
    }
}

/// Header value for a signature.
pub fn bearer(signature: &str) -> String {
    format!("{BEARER_PREFIX}{signature}")
}
