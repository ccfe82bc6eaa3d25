//! Operator-facing consent service: the surface a counter client talks
//! to, plus the patient-device decision hook and maintenance sweep.

use chrono::{DateTime, Utc};
use rxconsent_core::error::RxResult;
use rxconsent_core::models::consent::{ConsentState, PatientDecision, ResolutionChannel};
use rxconsent_core::models::operator::OperatorContext;
use rxconsent_core::models::prescription::Prescription;
use rxconsent_core::notify::Notifier;
use rxconsent_core::repository::{
    AccessTokenRepository, ConsentRequestRepository, PatientRepository, PrescriptionRepository,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::config::ConsentConfig;
use crate::gate::PrescriptionGate;
use crate::issuer::TokenIssuer;
use crate::registry::ConsentRegistry;
use crate::verifier::DualChannelVerifier;

/// Result of `request_access`. Never carries the OTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAccessOutput {
    pub request_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub otp_delivered: bool,
}

/// Result of `check_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOutput {
    pub request_id: Uuid,
    pub state: ConsentState,
    /// `System` on a denial means the OTP attempt cap was hit.
    pub resolved_via: Option<ResolutionChannel>,
    pub granted: bool,
    pub access_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

/// A granted access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Counts from a maintenance sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub requests_expired: u64,
    pub tokens_removed: u64,
}

/// Consent protocol service.
///
/// Generic over repository and notifier implementations so that the
/// protocol layer has no dependency on the database crate.
pub struct AccessService<P, R, N, T, X>
where
    P: PatientRepository,
    R: ConsentRequestRepository,
    N: Notifier,
    T: AccessTokenRepository + Clone,
    X: PrescriptionRepository,
{
    verifier: DualChannelVerifier<P, R, N, T>,
    gate: PrescriptionGate<X, T>,
}

impl<P, R, N, T, X> AccessService<P, R, N, T, X>
where
    P: PatientRepository,
    R: ConsentRequestRepository,
    N: Notifier,
    T: AccessTokenRepository + Clone,
    X: PrescriptionRepository,
{
    pub fn new(
        patient_repo: P,
        request_repo: R,
        token_repo: T,
        prescription_repo: X,
        notifier: N,
        config: ConsentConfig,
    ) -> RxResult<Self> {
        config.validate()?;
        let issuer = TokenIssuer::new(token_repo, config.clone());
        let registry = ConsentRegistry::new(patient_repo, request_repo, notifier, config);
        Ok(Self {
            gate: PrescriptionGate::new(prescription_repo, issuer.clone()),
            verifier: DualChannelVerifier::new(registry, issuer),
        })
    }

    pub fn verifier(&self) -> &DualChannelVerifier<P, R, N, T> {
        &self.verifier
    }

    pub fn gate(&self) -> &PrescriptionGate<X, T> {
        &self.gate
    }

    /// Open a consent request for a patient.
    pub async fn request_access(
        &self,
        ctx: &OperatorContext,
        patient_prn: &str,
    ) -> RxResult<RequestAccessOutput> {
        let created = self.verifier.registry().create(ctx, patient_prn).await?;
        Ok(RequestAccessOutput {
            request_id: created.request.id,
            expires_at: created.request.expires_at,
            otp_delivered: created.otp_delivered,
        })
    }

    /// Poll a request.
    pub async fn check_status(&self, request_id: Uuid) -> RxResult<StatusOutput> {
        let status = self.verifier.check_status(request_id).await?;
        Ok(StatusOutput {
            request_id,
            state: status.state,
            resolved_via: status.resolved_via,
            granted: status.granted(),
            token_expires_at: status.token.as_ref().map(|t| t.expires_at()),
            access_token: status.token.map(|t| t.token),
        })
    }

    /// Submit an OTP read out by the patient at the counter.
    pub async fn verify_otp(&self, request_id: Uuid, otp: &str) -> RxResult<AccessGrant> {
        let issued = self.verifier.verify_otp(request_id, otp).await?;
        Ok(AccessGrant {
            expires_at: issued.expires_at(),
            access_token: issued.token,
        })
    }

    /// Decision signalled from the patient's own device.
    pub async fn record_decision(
        &self,
        request_id: Uuid,
        decision: PatientDecision,
    ) -> RxResult<ConsentState> {
        self.verifier.record_decision(request_id, decision).await
    }

    /// Latest prescription for `patient_prn`, released only against a
    /// token this operator obtained for that patient.
    pub async fn fetch_prescription(
        &self,
        ctx: &OperatorContext,
        patient_prn: &str,
        access_token: &str,
    ) -> RxResult<Prescription> {
        self.gate
            .fetch_latest_prescription_as(&ctx.operator_id, patient_prn, access_token)
            .await
    }

    /// Expire overdue requests and drop expired tokens.
    pub async fn sweep_expired(&self) -> RxResult<SweepReport> {
        let report = SweepReport {
            requests_expired: self.verifier.registry().expire_overdue().await?,
            tokens_removed: self.verifier.issuer().cleanup_expired().await?,
        };
        info!(
            requests_expired = report.requests_expired,
            tokens_removed = report.tokens_removed,
            "Expired consent state swept"
        );
        Ok(report)
    }
}
