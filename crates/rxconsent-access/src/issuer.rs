//! Access token issuer: one opaque token per approved consent request.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rxconsent_core::error::{RxError, RxResult};
use rxconsent_core::models::access_token::{AccessToken, CreateAccessToken};
use rxconsent_core::models::consent::{ConsentRequest, ConsentState};
use rxconsent_core::repository::AccessTokenRepository;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ConsentConfig;
use crate::token;

/// A raw access token together with its stored record.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The opaque bearer value handed to the counter.
    pub token: String,
    pub record: AccessToken,
}

impl IssuedToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.record.expires_at
    }
}

/// The validity rule for a presented token: it must have been issued for
/// `patient_prn` and `now` must be strictly before its expiry.
pub fn check_token(record: &AccessToken, patient_prn: &str, now: DateTime<Utc>) -> RxResult<()> {
    if record.patient_prn != patient_prn {
        return Err(RxError::TokenMismatch);
    }
    if now >= record.expires_at {
        return Err(RxError::TokenExpired);
    }
    Ok(())
}

/// Mints and validates access tokens.
///
/// Clones share the issuance lock, so every clone observes the
/// one-token-per-request rule.
#[derive(Clone)]
pub struct TokenIssuer<T: AccessTokenRepository> {
    tokens: T,
    config: ConsentConfig,
    issuance: Arc<Mutex<()>>,
}

impl<T: AccessTokenRepository> TokenIssuer<T> {
    pub fn new(tokens: T, config: ConsentConfig) -> Self {
        Self {
            tokens,
            config,
            issuance: Arc::new(Mutex::new(())),
        }
    }

    /// Issue the token for an approved request.
    ///
    /// Idempotent per request id: later calls return the token minted by
    /// the first one. A request gets exactly one token, so once that token
    /// has expired (or been cleaned up) this fails with `TokenExpired`
    /// instead of minting another.
    pub async fn issue(&self, request: &ConsentRequest) -> RxResult<IssuedToken> {
        if request.state != ConsentState::Approved {
            return Err(RxError::Forbidden {
                reason: format!(
                    "consent request {} is {}, not Approved",
                    request.id,
                    request.state.as_str()
                ),
            });
        }

        let _guard = self.issuance.lock().await;

        if let Some(existing) = self.tokens.find_by_request(request.id).await? {
            if Utc::now() >= existing.expires_at {
                return Err(RxError::TokenExpired);
            }
            debug!(request_id = %request.id, "Returning previously issued access token");
            return self.reopen(existing);
        }
        if let Some(issued_at) = request.token_issued_at {
            debug!(
                request_id = %request.id,
                issued_at = %issued_at,
                "Access token already issued and cleaned up"
            );
            return Err(RxError::TokenExpired);
        }

        let raw = token::generate_access_token();
        let issued_at = Utc::now();
        let input = CreateAccessToken {
            request_id: request.id,
            patient_prn: request.patient_prn.clone(),
            requested_by: request.requested_by.clone(),
            token_hash: token::hash_access_token(&raw),
            token_ciphertext: token::seal_token(&self.config.token_encryption_key, &raw)?,
            issued_at,
            expires_at: issued_at + Duration::seconds(self.config.session_ttl_secs as i64),
        };

        match self.tokens.create(input).await {
            Ok(record) => {
                info!(
                    request_id = %request.id,
                    prn = %record.patient_prn,
                    expires_at = %record.expires_at,
                    "Access token issued"
                );
                Ok(IssuedToken { token: raw, record })
            }
            // Another process won the unique index on request_id.
            Err(e) => match self.tokens.find_by_request(request.id).await? {
                Some(existing) => self.reopen(existing),
                None => Err(e),
            },
        }
    }

    /// Look up a presented token and check it against `patient_prn`.
    pub async fn validate(&self, raw: &str, patient_prn: &str) -> RxResult<AccessToken> {
        let record = self
            .tokens
            .get_by_token_hash(&token::hash_access_token(raw))
            .await
            .map_err(|e| match e {
                RxError::NotFound { .. } => RxError::TokenInvalid,
                other => other,
            })?;

        check_token(&record, patient_prn, Utc::now())?;
        Ok(record)
    }

    /// Record that the token has been presented at least once.
    pub async fn mark_consumed(&self, record: &AccessToken) -> RxResult<()> {
        if record.consumed {
            return Ok(());
        }
        self.tokens.mark_consumed(record.id).await
    }

    /// Delete expired tokens.
    pub async fn cleanup_expired(&self) -> RxResult<u64> {
        self.tokens.cleanup_expired(Utc::now()).await
    }

    fn reopen(&self, record: AccessToken) -> RxResult<IssuedToken> {
        let raw = token::open_token(&self.config.token_encryption_key, &record.token_ciphertext)?;
        Ok(IssuedToken { token: raw, record })
    }
}
