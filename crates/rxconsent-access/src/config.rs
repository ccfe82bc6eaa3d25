//! Consent protocol configuration.

use rxconsent_core::error::{RxError, RxResult};

/// Upper bound on both lifetimes: one day.
pub const MAX_TTL_SECS: u64 = 86_400;

fn invalid(message: &str) -> RxError {
    RxError::Validation {
        message: message.into(),
    }
}

/// Configuration for the consent registry, verifier and token issuer.
///
/// None of these values are protocol constants; deployments tune them.
#[derive(Debug, Clone)]
pub struct ConsentConfig {
    /// Lifetime of a consent request in seconds (default: 300 = 5 minutes).
    pub request_ttl_secs: u64,
    /// Lifetime of an access token in seconds (default: 600 = 10 minutes).
    pub session_ttl_secs: u64,
    /// Number of digits in the out-of-band OTP (default: 6).
    pub otp_length: usize,
    /// Wrong OTP submissions allowed before the request is denied
    /// (default: 5).
    pub max_otp_attempts: u32,
    /// Argon2id memory cost in KiB for OTP hashing (default: 19456).
    pub otp_hash_memory_kib: u32,
    /// Argon2id iteration count for OTP hashing (default: 2).
    pub otp_hash_iterations: u32,
    /// 256-bit AES-GCM key protecting stored access tokens.
    pub token_encryption_key: [u8; 32],
}

impl ConsentConfig {
    /// Check the values that would make the protocol unusable.
    pub fn validate(&self) -> RxResult<()> {
        if !(1..=MAX_TTL_SECS).contains(&self.request_ttl_secs) {
            return Err(invalid("request_ttl_secs must be between 1 and 86400"));
        }
        if !(1..=MAX_TTL_SECS).contains(&self.session_ttl_secs) {
            return Err(invalid("session_ttl_secs must be between 1 and 86400"));
        }
        if !(4..=10).contains(&self.otp_length) {
            return Err(invalid("otp_length must be between 4 and 10 digits"));
        }
        if self.max_otp_attempts == 0 {
            return Err(invalid("max_otp_attempts must be at least 1"));
        }
        Ok(())
    }
}

impl Default for ConsentConfig {
    /// Defaults use a freshly generated token encryption key, so tokens
    /// minted by one process cannot be re-delivered by another.
    fn default() -> Self {
        Self {
            request_ttl_secs: 300,
            session_ttl_secs: 600,
            otp_length: 6,
            max_otp_attempts: 5,
            otp_hash_memory_kib: 19456,
            otp_hash_iterations: 2,
            token_encryption_key: rand::random(),
        }
    }
}
