//! HMAC signing for payment client secrets and gateway webhooks.

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 of `message` under `secret`, hex-encoded (64 characters).
///
/// # Errors
///
/// HMAC accepts keys of any length, so this only fails if the underlying
/// implementation rejects the key.
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Whether `signature` is the HMAC-SHA256 of `message` under `secret`.
#[must_use]
pub fn verify_signature(secret: &str, message: &str, signature: &str) -> bool {
    hmac_sha256_hex(secret, message).is_ok_and(|expected| constant_time_eq(&expected, signature))
}

/// Constant-time string comparison.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_hex_sha256() {
        let sig = hmac_sha256_hex("whsec", r#"{"type":"payment.succeeded"}"#).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn verify_accepts_only_matching_signature() {
        let body = r#"{"payment_id":"pi_mock_1"}"#;
        let sig = hmac_sha256_hex("whsec", body).unwrap();
        assert!(verify_signature("whsec", body, &sig));
        assert!(!verify_signature("other", body, &sig));
        assert!(!verify_signature("whsec", "tampered", &sig));
    }

    #[test]
    fn constant_time_eq_compares_length_and_bytes() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "ab"));
    }
}
