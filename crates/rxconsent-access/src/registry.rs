//! Consent request registry: creation, lookup and lazy expiry.

use chrono::{Duration, Utc};
use rxconsent_core::error::{RxError, RxResult};
use rxconsent_core::models::consent::{
    ConsentRequest, ConsentState, CreateConsentRequest, ResolutionChannel,
};
use rxconsent_core::models::operator::OperatorContext;
use rxconsent_core::notify::Notifier;
use rxconsent_core::repository::{ConsentRequestRepository, PatientRepository};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ConsentConfig;
use crate::otp;

/// A freshly created consent request. The OTP is not part of it.
#[derive(Debug, Clone)]
pub struct CreatedRequest {
    pub request: ConsentRequest,
    /// `false` when the notifier failed. The request is still open but
    /// the operator has to be told the patient never got a code.
    pub otp_delivered: bool,
}

/// Creates and tracks outstanding access requests.
pub struct ConsentRegistry<P: PatientRepository, R: ConsentRequestRepository, N: Notifier> {
    patients: P,
    requests: R,
    notifier: N,
    config: ConsentConfig,
}

impl<P, R, N> ConsentRegistry<P, R, N>
where
    P: PatientRepository,
    R: ConsentRequestRepository,
    N: Notifier,
{
    pub fn new(patients: P, requests: R, notifier: N, config: ConsentConfig) -> Self {
        Self {
            patients,
            requests,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &ConsentConfig {
        &self.config
    }

    pub(crate) fn requests(&self) -> &R {
        &self.requests
    }

    /// Open a consent request for `patient_prn` on behalf of `operator`
    /// and send the OTP out-of-band.
    pub async fn create(
        &self,
        operator: &OperatorContext,
        patient_prn: &str,
    ) -> RxResult<CreatedRequest> {
        let prn = patient_prn.trim();
        if prn.is_empty() {
            return Err(RxError::UnknownPatient {
                prn: patient_prn.to_string(),
            });
        }

        let patient = self
            .patients
            .get_by_prn(prn)
            .await
            .map_err(|e| match e {
                RxError::NotFound { .. } => RxError::UnknownPatient {
                    prn: prn.to_string(),
                },
                other => other,
            })?;

        let otp = otp::generate_otp(self.config.otp_length);
        let otp_hash = otp::hash_otp(&otp, &self.config)?;
        let created_at = Utc::now();
        let expires_at = created_at + Duration::seconds(self.config.request_ttl_secs as i64);

        let request = self
            .requests
            .create(CreateConsentRequest {
                patient_prn: patient.prn.clone(),
                requested_by: operator.operator_id.clone(),
                otp_hash,
                created_at,
                expires_at,
            })
            .await?;

        info!(
            request_id = %request.id,
            prn = %request.patient_prn,
            operator = %operator.operator_id,
            expires_at = %request.expires_at,
            "Consent request created"
        );

        let otp_delivered = match self.notifier.notify(&patient.prn, &otp).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    request_id = %request.id,
                    prn = %request.patient_prn,
                    error = %e,
                    "OTP delivery failed; request stays open"
                );
                false
            }
        };

        Ok(CreatedRequest {
            request,
            otp_delivered,
        })
    }

    /// Fetch a request, moving an overdue `Pending` request to `Expired`
    /// before returning it.
    pub async fn get(&self, request_id: Uuid) -> RxResult<ConsentRequest> {
        let request = self.load(request_id).await?;

        if request.state != ConsentState::Pending || !request.is_overdue(Utc::now()) {
            return Ok(request);
        }

        match self
            .requests
            .resolve(request_id, ConsentState::Expired, ResolutionChannel::System)
            .await?
        {
            Some(expired) => {
                info!(request_id = %request_id, "Consent request expired");
                Ok(expired)
            }
            // Another channel resolved it in the meantime.
            None => self.load(request_id).await,
        }
    }

    /// Expire every overdue pending request in one pass.
    pub async fn expire_overdue(&self) -> RxResult<u64> {
        self.requests.expire_overdue(Utc::now()).await
    }

    async fn load(&self, request_id: Uuid) -> RxResult<ConsentRequest> {
        self.requests
            .get_by_id(request_id)
            .await
            .map_err(|e| match e {
                RxError::NotFound { .. } => RxError::RequestNotFound {
                    request_id: request_id.to_string(),
                },
                other => other,
            })
    }
}
