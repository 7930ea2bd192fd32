//! HMAC-SHA256 webhook signatures.
//!
//! Signatures are lowercase hex over the raw request body (or a derived
//! string for the payment capture check). Verification goes through
//! `Mac::verify_slice`, which compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ProviderError;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex signature for a payload. Used by mocks and tests; real
/// providers compute this on their side.
pub fn sign(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature over a payload.
pub fn verify(payload: &[u8], signature_hex: &str, secret: &str) -> Result<(), ProviderError> {
    let expected = hex::decode(signature_hex.trim())
        .map_err(|_| ProviderError::Authentication("signature is not valid hex".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any size");
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| ProviderError::Authentication("signature mismatch".into()))
}
