//! Access token domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored record of a minted access token. The raw token never lives
/// here in clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub id: Uuid,
    pub request_id: Uuid,
    pub patient_prn: String,
    pub requested_by: String,
    /// SHA-256 of the raw token, hex-encoded. Used for lookup.
    pub token_hash: String,
    /// AES-256-GCM encrypted raw token, for idempotent re-delivery.
    pub token_ciphertext: String,
    pub consumed: bool,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccessToken {
    pub request_id: Uuid,
    pub patient_prn: String,
    pub requested_by: String,
    pub token_hash: String,
    pub token_ciphertext: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
