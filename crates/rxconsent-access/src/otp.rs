//! One-time passcode generation and Argon2id hashing.
//!
//! OTPs are short numeric codes, so they get the same slow hash as a
//! password. Only the PHC string is stored.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use rand::Rng;

use crate::config::ConsentConfig;
use crate::error::AccessError;

/// Generate a uniformly random numeric OTP of `length` digits.
pub fn generate_otp(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

/// Hash an OTP with Argon2id using the configured cost.
pub fn hash_otp(otp: &str, config: &ConsentConfig) -> Result<String, AccessError> {
    let params = argon2::Params::new(
        config.otp_hash_memory_kib,
        config.otp_hash_iterations,
        1,
        None,
    )
    .map_err(|e| AccessError::OtpHash(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    argon2
        .hash_password(otp.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AccessError::OtpHash(e.to_string()))
}

/// Verify a candidate OTP against a stored PHC hash.
///
/// Returns `Ok(false)` on mismatch and `Err` only for a malformed hash.
pub fn verify_otp(candidate: &str, hash: &str) -> Result<bool, AccessError> {
    let parsed = argon2::PasswordHash::new(hash)
        .map_err(|e| AccessError::OtpHash(format!("invalid hash format: {e}")))?;

    match Argon2::default().verify_password(candidate.trim().as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AccessError::OtpHash(format!("verify error: {e}"))),
    }
}
