//! At-rest encryption for the client-side license cache.
//!
//! AES-256-GCM. The GCM authentication tag doubles as tamper detection: a
//! cache file edited by hand fails to open and the client falls back to an
//! online check.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use rand::rngs::OsRng;
use rand::TryRngCore;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

use sha2::{Digest, Sha256};

use crate::errors::{LicenseError, LicenseResult};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes (96-bit).
pub const NONCE_SIZE: usize = 12;

/// Derive the cache sealing key from the deployment secret and client id.
///
/// The same inputs always yield the same key, so a reinstalled client can
/// reopen its cache; a cache copied to a different client id cannot be
/// opened.
pub fn derive_cache_key(secret: &str, client_id: &str) -> [u8; KEY_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(b"aegis_cache_v1:");
    hasher.update(secret.as_bytes());
    hasher.update(b":");
    hasher.update(client_id.as_bytes());
    let hash = hasher.finalize();

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&hash);
    key
}

/// Seal arbitrary bytes with AES-256-GCM.
///
/// Output format:
///   [nonce (12 bytes)] || [ciphertext+tag]
pub fn seal_bytes(plaintext: &[u8], key: &[u8]) -> LicenseResult<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(LicenseError::EncryptionError(format!(
            "invalid key length: expected {} bytes, got {}",
            KEY_SIZE,
            key.len()
        )));
    }

    let key = Key::<Aes256Gcm>::from_slice(key);
    let cipher = Aes256Gcm::new(key);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    let mut rng = OsRng;
    // If OsRng fails here, the environment is badly broken → hard panic is acceptable.
    rng.try_fill_bytes(&mut nonce_bytes)
        .expect("OsRng failed to generate nonce");
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| LicenseError::EncryptionError(format!("encryption failed: {e}")))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.append(&mut ciphertext);

    Ok(output)
}

/// Open bytes produced by `seal_bytes`.
pub fn open_bytes(ciphertext: &[u8], key: &[u8]) -> LicenseResult<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(LicenseError::DecryptionError(format!(
            "invalid key length: expected {} bytes, got {}",
            KEY_SIZE,
            key.len()
        )));
    }

    if ciphertext.len() <= NONCE_SIZE {
        return Err(LicenseError::DecryptionError(
            "ciphertext too short".to_string(),
        ));
    }

    let (nonce_bytes, ct) = ciphertext.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let key = Key::<Aes256Gcm>::from_slice(key);
    let cipher = Aes256Gcm::new(key);

    cipher
        .decrypt(nonce, ct)
        .map_err(|e| LicenseError::DecryptionError(format!("decryption failed: {e}")))
}

/// Seal bytes and return a Base64 string.
pub fn seal_to_base64(plaintext: &[u8], key: &[u8]) -> LicenseResult<String> {
    let sealed = seal_bytes(plaintext, key)?;
    Ok(B64.encode(sealed))
}

/// Open a Base64 ciphertext previously produced by `seal_to_base64`.
pub fn open_from_base64(ciphertext_b64: &str, key: &[u8]) -> LicenseResult<Vec<u8>> {
    let decoded = B64
        .decode(ciphertext_b64)
        .map_err(|e| LicenseError::DecryptionError(format!("base64 decode failed: {e}")))?;
    open_bytes(&decoded, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_seal_open_bytes() {
        let key = derive_cache_key("deployment-secret", "client-1");
        let data = b"cached license state";

        let sealed = seal_bytes(data, &key).expect("sealing should succeed");
        assert_ne!(sealed, data, "ciphertext must differ from plaintext");

        let opened = open_bytes(&sealed, &key).expect("opening should succeed");
        assert_eq!(opened, data);
    }

    #[test]
    fn round_trip_base64() {
        let key = derive_cache_key("deployment-secret", "client-1");
        let data = b"aegis base64 test";

        let encoded = seal_to_base64(data, &key).expect("sealing should succeed");
        let decoded = open_from_base64(&encoded, &key).expect("opening should succeed");

        assert_eq!(decoded, data);
    }

    #[test]
    fn different_client_id_gives_different_key() {
        let a = derive_cache_key("secret", "client-a");
        let b = derive_cache_key("secret", "client-b");
        assert_ne!(a, b);

        let sealed = seal_bytes(b"data", &a).unwrap();
        assert!(open_bytes(&sealed, &b).is_err());
    }

    #[test]
    fn rejects_wrong_key_size() {
        let key = [0u8; 16]; // too short
        assert!(seal_bytes(b"test", &key).is_err());
        assert!(open_bytes(&[0u8; NONCE_SIZE + 16], &key).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let key = derive_cache_key("secret", "client-1");
        let mut sealed = seal_bytes(b"original", &key).unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;

        assert!(open_bytes(&sealed, &key).is_err());
    }
}
