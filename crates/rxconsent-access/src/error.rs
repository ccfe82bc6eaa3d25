//! Crypto-level error types for the access layer.

use rxconsent_core::error::RxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("OTP hashing failed: {0}")]
    OtpHash(String),

    #[error("token sealing failed: {0}")]
    TokenSeal(String),

    #[error("cryptography error: {0}")]
    Crypto(String),
}

impl From<AccessError> for RxError {
    fn from(err: AccessError) -> Self {
        RxError::Crypto(err.to_string())
    }
}
