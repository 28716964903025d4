//! Stateless unsubscribe tokens.
//!
//! A token is `base64url(payload_json).base64url(hmac_sha256(payload_b64))`,
//! a pure function of payload and secret: equal inputs always yield equal
//! tokens. There is no expiry and no revocation beyond the suppression list
//! itself; validity means the signature matches.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub email: String,
    pub campaign_id: String,
}

fn sign(payload_b64: &str, secret: &str) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload_b64.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Mint a signed unsubscribe token for one recipient of one campaign.
pub fn create_unsubscribe_token(email: &str, campaign_id: &str, secret: &str) -> String {
    let payload = TokenPayload {
        email: email.to_string(),
        campaign_id: campaign_id.to_string(),
    };
    let json = serde_json::to_string(&payload).expect("token payload serializes");
    let payload_b64 = URL_SAFE_NO_PAD.encode(json);
    let signature = URL_SAFE_NO_PAD.encode(sign(&payload_b64, secret));
    format!("{payload_b64}.{signature}")
}

/// Verify a token and recover its payload. Any structural failure — missing
/// separator, malformed base64, bad JSON, wrong field types — yields `None`;
/// signature bytes are only compared (constant-time) when lengths match.
pub fn verify_unsubscribe_token(token: &str, secret: &str) -> Option<TokenPayload> {
    let (payload_b64, signature_b64) = token.split_once('.')?;

    let provided = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;
    let expected = sign(payload_b64, secret);
    if provided.len() != expected.len() {
        return None;
    }
    if !bool::from(provided.as_slice().ct_eq(expected.as_slice())) {
        return None;
    }

    let payload_json = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    serde_json::from_slice(&payload_json).ok()
}
