//! Opaque access token generation, lookup hashing and at-rest sealing.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::error::AccessError;

/// Generate a cryptographically random opaque access token
/// (32 bytes, base64url-encoded, no padding).
pub fn generate_access_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rand::Rng::random(&mut rng);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 hash of a raw access token, hex-encoded.
///
/// This is the value stored as `access_token.token_hash` and used for
/// lookups when a token is presented.
pub fn hash_access_token(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Encrypt a raw token with AES-256-GCM.
///
/// Returns `base64(nonce || ciphertext || tag)`.
pub fn seal_token(key: &[u8; 32], raw: &str) -> Result<String, AccessError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; 12];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, raw.as_bytes())
        .map_err(|e| AccessError::TokenSeal(format!("AES-GCM encrypt: {e}")))?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(combined))
}

/// Decrypt a token sealed by [`seal_token`].
pub fn open_token(key: &[u8; 32], sealed: &str) -> Result<String, AccessError> {
    let combined = STANDARD
        .decode(sealed)
        .map_err(|e| AccessError::TokenSeal(format!("base64 decode: {e}")))?;

    if combined.len() < 13 {
        return Err(AccessError::TokenSeal("ciphertext too short".into()));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(12);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| AccessError::TokenSeal(format!("AES-GCM decrypt: {e}")))?;

    String::from_utf8(plaintext).map_err(|e| AccessError::Crypto(e.to_string()))
}
