//! Signed URLs for backends without native presigning.
//!
//! A signed URL carries `expires` (unix seconds) and `signature` query
//! parameters. Signature = base64url(HMAC-SHA256(secret, "{key}:{expires}")).

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::traits::{StorageError, StorageResult};

type HmacSha256 = Hmac<Sha256>;

/// Append `expires` and `signature` query parameters to `url` for `key`.
pub fn sign_url(url: &str, key: &str, expires_in: Duration, secret: &[u8]) -> StorageResult<String> {
    let expires = SystemTime::now()
        .checked_add(expires_in)
        .unwrap_or(UNIX_EPOCH)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let signature = signature(key, expires, secret)?;
    let separator = if url.contains('?') { '&' } else { '?' };
    Ok(format!(
        "{}{}expires={}&signature={}",
        url, separator, expires, signature
    ))
}

/// Check a signature produced by [`sign_url`] for `key`.
///
/// Fails when the signature does not match or the expiry has passed.
pub fn verify_signature(
    key: &str,
    expires: u64,
    signature: &str,
    secret: &[u8],
) -> StorageResult<()> {
    let tag = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| StorageError::InvalidKey("malformed signature".to_string()))?;

    let mut mac = new_mac(secret)?;
    mac.update(payload(key, expires).as_bytes());
    mac.verify_slice(&tag)
        .map_err(|_| StorageError::InvalidKey("signature mismatch".to_string()))?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    if now > expires {
        return Err(StorageError::InvalidKey("signed URL has expired".to_string()));
    }

    Ok(())
}

fn signature(key: &str, expires: u64, secret: &[u8]) -> StorageResult<String> {
    let mut mac = new_mac(secret)?;
    mac.update(payload(key, expires).as_bytes());
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

fn new_mac(secret: &[u8]) -> StorageResult<HmacSha256> {
    HmacSha256::new_from_slice(secret)
        .map_err(|e| StorageError::ConfigError(format!("invalid signing secret: {}", e)))
}

fn payload(key: &str, expires: u64) -> String {
    format!("{}:{}", key, expires)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix(&format!("{}=", name)))
            .unwrap_or("")
    }

    #[test]
    fn test_sign_then_verify() {
        let url = sign_url(
            "/uploads/avatars/cat.jpg",
            "avatars/cat.jpg",
            Duration::from_secs(60),
            b"secret",
        )
        .unwrap();

        let expires: u64 = query_param(&url, "expires").parse().unwrap();
        let signature = query_param(&url, "signature");
        assert!(verify_signature("avatars/cat.jpg", expires, signature, b"secret").is_ok());
    }

    #[test]
    fn test_verify_rejects_other_key_or_secret() {
        let url = sign_url("/a", "avatars/cat.jpg", Duration::from_secs(60), b"secret").unwrap();
        let expires: u64 = query_param(&url, "expires").parse().unwrap();
        let signature = query_param(&url, "signature");

        assert!(verify_signature("avatars/dog.jpg", expires, signature, b"secret").is_err());
        assert!(verify_signature("avatars/cat.jpg", expires, signature, b"other").is_err());
        assert!(verify_signature("avatars/cat.jpg", expires + 1, signature, b"secret").is_err());
    }

    #[test]
    fn test_verify_rejects_expired() {
        let expires = 1_000;
        let signature = signature("a/b.png", expires, b"secret").unwrap();
        assert!(verify_signature("a/b.png", expires, &signature, b"secret").is_err());
    }

    #[test]
    fn test_sign_keeps_existing_query() {
        let url = sign_url("/a.png?v=2", "a.png", Duration::from_secs(5), b"k").unwrap();
        assert!(url.starts_with("/a.png?v=2&expires="));
    }
}
