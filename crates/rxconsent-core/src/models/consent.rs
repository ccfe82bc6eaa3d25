//! Consent request domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConsentState {
    Pending,
    Approved,
    Denied,
    Expired,
}

impl ConsentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentState::Pending => "Pending",
            ConsentState::Approved => "Approved",
            ConsentState::Denied => "Denied",
            ConsentState::Expired => "Expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(ConsentState::Pending),
            "Approved" => Some(ConsentState::Approved),
            "Denied" => Some(ConsentState::Denied),
            "Expired" => Some(ConsentState::Expired),
            _ => None,
        }
    }

    /// A request leaves `Pending` exactly once and never comes back.
    pub fn can_transition_to(&self, next: ConsentState) -> bool {
        matches!(self, ConsentState::Pending) && next != ConsentState::Pending
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, ConsentState::Pending)
    }
}

/// Which channel moved a request out of `Pending`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResolutionChannel {
    /// Out-of-band decision from the patient's own device.
    Patient,
    /// OTP entered at the counter.
    Otp,
    /// Expiry or attempt-cap enforcement.
    System,
}

impl ResolutionChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionChannel::Patient => "Patient",
            ResolutionChannel::Otp => "Otp",
            ResolutionChannel::System => "System",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Patient" => Some(ResolutionChannel::Patient),
            "Otp" => Some(ResolutionChannel::Otp),
            "System" => Some(ResolutionChannel::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRequest {
    pub id: Uuid,
    pub patient_prn: String,
    /// Operator that asked for access.
    pub requested_by: String,
    pub state: ConsentState,
    /// Argon2id PHC hash of the OTP sent out-of-band.
    pub otp_hash: String,
    pub otp_attempts: u32,
    pub resolved_via: Option<ResolutionChannel>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set when the request's one access token is minted. Kept after the
    /// token row itself is cleaned up.
    pub token_issued_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ConsentRequest {
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConsentRequest {
    pub patient_prn: String,
    pub requested_by: String,
    pub otp_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Out-of-band answer from the patient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PatientDecision {
    Approve,
    Deny,
}
