//! Dual-channel verifier.
//!
//! A consent request can be resolved either by the patient's own device
//! (out-of-band decision) or by an OTP typed in at the counter. Both
//! paths end in the same conditional `Pending -> X` update; whichever
//! lands first wins and the other is told the request is already
//! resolved. Inside one process the read-check-write sequences are also
//! serialised so the paths never interleave.

use chrono::Utc;
use rxconsent_core::error::{RxError, RxResult};
use rxconsent_core::models::consent::{
    ConsentRequest, ConsentState, PatientDecision, ResolutionChannel,
};
use rxconsent_core::notify::Notifier;
use rxconsent_core::repository::{
    AccessTokenRepository, ConsentRequestRepository, PatientRepository,
};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::issuer::{IssuedToken, TokenIssuer};
use crate::otp;
use crate::registry::ConsentRegistry;

/// What the polling client sees for a request.
#[derive(Debug, Clone)]
pub struct ConsentStatus {
    pub request_id: Uuid,
    pub state: ConsentState,
    /// Who resolved the request, once it is resolved.
    pub resolved_via: Option<ResolutionChannel>,
    /// Present once the request is `Approved`.
    pub token: Option<IssuedToken>,
}

impl ConsentStatus {
    pub fn granted(&self) -> bool {
        self.token.is_some()
    }
}

/// Error for an OTP submitted against a request that is no longer
/// pending.
fn otp_conflict(state: ConsentState) -> RxError {
    match state {
        ConsentState::Approved => RxError::AlreadyResolved,
        ConsentState::Denied | ConsentState::Expired => RxError::RequestExpired,
        ConsentState::Pending => RxError::Internal("consent request is still pending".into()),
    }
}

/// Error for a patient decision arriving after the request was resolved.
fn decision_conflict(state: ConsentState) -> RxError {
    match state {
        ConsentState::Expired => RxError::RequestExpired,
        ConsentState::Approved | ConsentState::Denied => RxError::AlreadyResolved,
        ConsentState::Pending => RxError::Internal("consent request is still pending".into()),
    }
}

pub struct DualChannelVerifier<P, R, N, T>
where
    P: PatientRepository,
    R: ConsentRequestRepository,
    N: Notifier,
    T: AccessTokenRepository,
{
    registry: ConsentRegistry<P, R, N>,
    issuer: TokenIssuer<T>,
    resolution: Mutex<()>,
}

impl<P, R, N, T> DualChannelVerifier<P, R, N, T>
where
    P: PatientRepository,
    R: ConsentRequestRepository,
    N: Notifier,
    T: AccessTokenRepository,
{
    pub fn new(registry: ConsentRegistry<P, R, N>, issuer: TokenIssuer<T>) -> Self {
        Self {
            registry,
            issuer,
            resolution: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &ConsentRegistry<P, R, N> {
        &self.registry
    }

    pub fn issuer(&self) -> &TokenIssuer<T> {
        &self.issuer
    }

    /// Path A, read side: the polling view of a request.
    ///
    /// An approved request comes back with its token, minting it on first
    /// observation. Once that token has lapsed the call fails with
    /// `TokenExpired`. Expired requests are an error so the client stops
    /// polling.
    pub async fn check_status(&self, request_id: Uuid) -> RxResult<ConsentStatus> {
        let request = self.registry.get(request_id).await?;

        let token = match request.state {
            ConsentState::Pending | ConsentState::Denied => None,
            ConsentState::Approved => Some(self.grant(&request).await?),
            ConsentState::Expired => return Err(RxError::RequestExpired),
        };

        Ok(ConsentStatus {
            request_id,
            state: request.state,
            resolved_via: request.resolved_via,
            token,
        })
    }

    /// Path A, write side: the patient's own device approves or denies.
    pub async fn record_decision(
        &self,
        request_id: Uuid,
        decision: PatientDecision,
    ) -> RxResult<ConsentState> {
        let _guard = self.resolution.lock().await;

        let request = self.registry.get(request_id).await?;
        if request.state.is_resolved() {
            return Err(decision_conflict(request.state));
        }

        match decision {
            PatientDecision::Approve => {
                let approved = self
                    .transition(
                        request_id,
                        ConsentState::Approved,
                        ResolutionChannel::Patient,
                        decision_conflict,
                    )
                    .await?;
                info!(request_id = %request_id, prn = %approved.patient_prn, "Patient approved access");
                self.grant(&approved).await?;
                Ok(ConsentState::Approved)
            }
            PatientDecision::Deny => {
                let denied = self
                    .transition(
                        request_id,
                        ConsentState::Denied,
                        ResolutionChannel::Patient,
                        decision_conflict,
                    )
                    .await?;
                warn!(request_id = %request_id, prn = %denied.patient_prn, "Patient denied access");
                Ok(ConsentState::Denied)
            }
        }
    }

    /// Path B: an OTP typed in at the counter.
    pub async fn verify_otp(&self, request_id: Uuid, candidate: &str) -> RxResult<IssuedToken> {
        let _guard = self.resolution.lock().await;

        let request = self.registry.get(request_id).await?;
        if request.state.is_resolved() {
            return Err(otp_conflict(request.state));
        }

        let attempts = match self
            .registry
            .requests()
            .record_otp_attempt(request_id)
            .await?
        {
            Some(n) => n,
            None => return Err(self.conflict(request_id, otp_conflict).await),
        };
        let max = self.registry.config().max_otp_attempts;

        if otp::verify_otp(candidate, &request.otp_hash)? {
            if request.is_overdue(Utc::now()) {
                self.transition(
                    request_id,
                    ConsentState::Expired,
                    ResolutionChannel::System,
                    otp_conflict,
                )
                .await?;
                return Err(RxError::RequestExpired);
            }

            let approved = self
                .transition(
                    request_id,
                    ConsentState::Approved,
                    ResolutionChannel::Otp,
                    otp_conflict,
                )
                .await?;
            info!(
                request_id = %request_id,
                prn = %approved.patient_prn,
                attempts,
                "OTP verified; access approved"
            );
            return self.grant(&approved).await;
        }

        if attempts >= max {
            self.transition(
                request_id,
                ConsentState::Denied,
                ResolutionChannel::System,
                otp_conflict,
            )
            .await?;
            warn!(
                request_id = %request_id,
                attempts,
                "OTP attempt cap reached; consent request denied"
            );
            return Err(RxError::TooManyAttempts);
        }

        info!(request_id = %request_id, attempts, "Invalid OTP submitted");
        Err(RxError::InvalidOtp {
            attempts_remaining: max - attempts,
        })
    }

    /// Issue the request's token and durably note that it exists, so a
    /// later cleanup of the token row cannot lead to a second one.
    async fn grant(&self, request: &ConsentRequest) -> RxResult<IssuedToken> {
        let issued = self.issuer.issue(request).await?;
        if request.token_issued_at.is_none() {
            self.registry
                .requests()
                .record_token_issued(request.id, issued.record.issued_at)
                .await?;
        }
        Ok(issued)
    }

    async fn transition(
        &self,
        request_id: Uuid,
        to: ConsentState,
        via: ResolutionChannel,
        on_conflict: fn(ConsentState) -> RxError,
    ) -> RxResult<ConsentRequest> {
        match self.registry.requests().resolve(request_id, to, via).await? {
            Some(request) => Ok(request),
            None => Err(self.conflict(request_id, on_conflict).await),
        }
    }

    /// The conditional update found the request already resolved; report
    /// what it was resolved to.
    async fn conflict(&self, request_id: Uuid, on_conflict: fn(ConsentState) -> RxError) -> RxError {
        match self.registry.get(request_id).await {
            Ok(current) => on_conflict(current.state),
            Err(e) => e,
        }
    }
}
