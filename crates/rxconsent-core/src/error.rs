//! Error types for the consent protocol.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RxError {
    #[error("Unknown patient: {prn}")]
    UnknownPatient { prn: String },

    #[error("Consent request not found: {request_id}")]
    RequestNotFound { request_id: String },

    #[error("Consent request has expired")]
    RequestExpired,

    #[error("Consent request was already resolved")]
    AlreadyResolved,

    #[error("Invalid OTP ({attempts_remaining} attempts remaining)")]
    InvalidOtp { attempts_remaining: u32 },

    #[error("Too many OTP attempts")]
    TooManyAttempts,

    #[error("Access token has expired")]
    TokenExpired,

    #[error("Access token was issued for a different patient")]
    TokenMismatch,

    #[error("Access token is not recognised")]
    TokenInvalid,

    #[error("Access denied: {reason}")]
    Forbidden { reason: String },

    #[error("Notifier unavailable: {0}")]
    NotifierUnavailable(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cryptography error: {0}")]
    Crypto(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RxError {
    /// The operator may retry within the same approval cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RxError::InvalidOtp { .. })
    }

    /// The counter session must drop back to `Idle`.
    pub fn resets_session(&self) -> bool {
        matches!(self, RxError::TooManyAttempts | RxError::RequestExpired)
    }

    /// Errors raised by the token gate in front of clinical data.
    pub fn is_access_denial(&self) -> bool {
        matches!(
            self,
            RxError::TokenExpired
                | RxError::TokenMismatch
                | RxError::TokenInvalid
                | RxError::Forbidden { .. }
        )
    }
}

pub type RxResult<T> = Result<T, RxError>;
