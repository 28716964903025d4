//! Inbound webhook signature verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Verify a provider webhook signature: HMAC-SHA256 over
/// `timestamp ++ token`, hex-encoded. Invalid hex or a length mismatch
/// yields `false`; matching lengths are compared in constant time.
pub fn verify_webhook_signature(
    signing_key: &str,
    timestamp: &str,
    token: &str,
    signature: &str,
) -> bool {
    let mut mac =
        HmacSha256::new_from_slice(signing_key.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(token.as_bytes());
    let expected = mac.finalize().into_bytes();

    let Ok(provided) = hex::decode(signature) else {
        return false;
    };
    if provided.len() != expected.len() {
        return false;
    }
    bool::from(provided.as_slice().ct_eq(expected.as_slice()))
}
