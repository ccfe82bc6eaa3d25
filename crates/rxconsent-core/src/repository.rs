//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Implementations live in the
//! database crate so that the protocol layer has no storage dependency.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RxResult;
use crate::models::{
    access_token::{AccessToken, CreateAccessToken},
    consent::{ConsentRequest, ConsentState, CreateConsentRequest, ResolutionChannel},
    patient::{CreatePatient, Patient},
    prescription::{CreatePrescription, Prescription},
};

// ---------------------------------------------------------------------------
// Identity Store (read-only from the protocol's perspective)
// ---------------------------------------------------------------------------

pub trait PatientRepository: Send + Sync {
    /// Register a patient. Used by enrolment and test fixtures, never by
    /// the consent protocol itself.
    fn create(&self, input: CreatePatient) -> impl Future<Output = RxResult<Patient>> + Send;
    /// Resolve a PRN. Fails with `NotFound` for unknown numbers.
    fn get_by_prn(&self, prn: &str) -> impl Future<Output = RxResult<Patient>> + Send;
}

// ---------------------------------------------------------------------------
// Consent requests
// ---------------------------------------------------------------------------

pub trait ConsentRequestRepository: Send + Sync {
    fn create(
        &self,
        input: CreateConsentRequest,
    ) -> impl Future<Output = RxResult<ConsentRequest>> + Send;
    fn get_by_id(&self, id: Uuid) -> impl Future<Output = RxResult<ConsentRequest>> + Send;
    /// Atomically increment `otp_attempts` while the request is still
    /// `Pending`. Returns `None` when the request is no longer pending.
    fn record_otp_attempt(&self, id: Uuid) -> impl Future<Output = RxResult<Option<u32>>> + Send;
    /// Check-and-set `Pending -> to`. Returns the updated request, or
    /// `None` when the request had already left `Pending`.
    fn resolve(
        &self,
        id: Uuid,
        to: ConsentState,
        via: ResolutionChannel,
    ) -> impl Future<Output = RxResult<Option<ConsentRequest>>> + Send;
    /// Record that the request's token was minted at `issued_at`. Only an
    /// `Approved` request with no earlier record is touched; returns
    /// whether this call set it.
    fn record_token_issued(
        &self,
        id: Uuid,
        issued_at: DateTime<Utc>,
    ) -> impl Future<Output = RxResult<bool>> + Send;
    /// Mark every overdue pending request `Expired`. Returns how many moved.
    fn expire_overdue(&self, now: DateTime<Utc>) -> impl Future<Output = RxResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Access tokens
// ---------------------------------------------------------------------------

pub trait AccessTokenRepository: Send + Sync {
    /// Storage enforces one token per `request_id`.
    fn create(&self, input: CreateAccessToken)
    -> impl Future<Output = RxResult<AccessToken>> + Send;
    fn find_by_request(
        &self,
        request_id: Uuid,
    ) -> impl Future<Output = RxResult<Option<AccessToken>>> + Send;
    fn get_by_token_hash(
        &self,
        token_hash: &str,
    ) -> impl Future<Output = RxResult<AccessToken>> + Send;
    fn mark_consumed(&self, id: Uuid) -> impl Future<Output = RxResult<()>> + Send;
    /// Remove all expired tokens.
    fn cleanup_expired(&self, now: DateTime<Utc>) -> impl Future<Output = RxResult<u64>> + Send;
}

// ---------------------------------------------------------------------------
// Prescriptions (read-only from the protocol's perspective)
// ---------------------------------------------------------------------------

pub trait PrescriptionRepository: Send + Sync {
    fn create(
        &self,
        input: CreatePrescription,
    ) -> impl Future<Output = RxResult<Prescription>> + Send;
    /// Most recent prescription for the patient. Fails with `NotFound`
    /// when the patient has none.
    fn get_latest_for_patient(
        &self,
        prn: &str,
    ) -> impl Future<Output = RxResult<Prescription>> + Send;
}
