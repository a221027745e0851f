use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::ServerError;

type HmacSha256 = Hmac<Sha256>;

/// The base64-encoded HMAC-SHA256 of `data`, keyed with `secret`. This is what transfer networks put in the
/// `X-Lpg-Signature` header of their webhooks.
pub fn calculate_hmac(secret: &str, data: &[u8]) -> Result<String, ServerError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServerError::ConfigurationError(format!("Invalid HMAC key. {e}")))?;
    mac.update(data);
    Ok(base64::encode(mac.finalize().into_bytes()))
}

/// Checks that `signature` is the base64-encoded HMAC-SHA256 of `data`, keyed with `secret`. The digests are compared
/// in constant time.
pub fn verify_hmac(secret: &str, data: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(data);
    mac.verify_slice(&expected).is_ok()
}
