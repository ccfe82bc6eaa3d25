//! Token-gated access to prescriptions.

use rxconsent_core::error::{RxError, RxResult};
use rxconsent_core::models::prescription::Prescription;
use rxconsent_core::repository::{AccessTokenRepository, PrescriptionRepository};
use tracing::{info, warn};

use crate::issuer::TokenIssuer;

/// Front door to clinical data: nothing leaves without a valid token for
/// the requested patient.
pub struct PrescriptionGate<X: PrescriptionRepository, T: AccessTokenRepository> {
    prescriptions: X,
    issuer: TokenIssuer<T>,
}

impl<X: PrescriptionRepository, T: AccessTokenRepository> PrescriptionGate<X, T> {
    pub fn new(prescriptions: X, issuer: TokenIssuer<T>) -> Self {
        Self {
            prescriptions,
            issuer,
        }
    }

    /// Latest prescription for `prn`, if `token` grants access to it.
    pub async fn fetch_latest_prescription(&self, prn: &str, token: &str) -> RxResult<Prescription> {
        self.fetch(prn, token, None).await
    }

    /// Same as [`Self::fetch_latest_prescription`], additionally
    /// requiring the token to belong to `operator_id`.
    pub async fn fetch_latest_prescription_as(
        &self,
        operator_id: &str,
        prn: &str,
        token: &str,
    ) -> RxResult<Prescription> {
        self.fetch(prn, token, Some(operator_id)).await
    }

    async fn fetch(&self, prn: &str, token: &str, operator_id: Option<&str>) -> RxResult<Prescription> {
        let record = match self.issuer.validate(token, prn).await {
            Ok(record) => record,
            Err(e) => {
                warn!(prn = %prn, error = %e, "Prescription access refused");
                return Err(e);
            }
        };

        if operator_id.is_some_and(|op| op != record.requested_by) {
            warn!(
                prn = %prn,
                operator = operator_id.unwrap_or_default(),
                "Prescription access refused: token belongs to another operator"
            );
            return Err(RxError::Forbidden {
                reason: "access token was issued to a different operator".into(),
            });
        }

        self.issuer.mark_consumed(&record).await?;
        let prescription = self.prescriptions.get_latest_for_patient(prn).await?;
        info!(prn = %prn, prescription_id = %prescription.id, "Prescription released");
        Ok(prescription)
    }
}
