//! The operator surface the counter controller is written against.

use rxconsent_access::{AccessGrant, AccessService, RequestAccessOutput, StatusOutput};
use rxconsent_core::error::RxResult;
use rxconsent_core::models::operator::OperatorContext;
use rxconsent_core::models::prescription::Prescription;
use rxconsent_core::notify::Notifier;
use rxconsent_core::repository::{
    AccessTokenRepository, ConsentRequestRepository, PatientRepository, PrescriptionRepository,
};
use uuid::Uuid;

/// Calls a counter client makes against the consent service.
///
/// [`AccessService`] implements it in-process; tests substitute a
/// scripted fake.
pub trait ConsentGateway: Send + Sync {
    fn request_access(
        &self,
        ctx: &OperatorContext,
        patient_prn: &str,
    ) -> impl Future<Output = RxResult<RequestAccessOutput>> + Send;

    fn check_status(&self, request_id: Uuid) -> impl Future<Output = RxResult<StatusOutput>> + Send;

    fn verify_otp(
        &self,
        request_id: Uuid,
        otp: &str,
    ) -> impl Future<Output = RxResult<AccessGrant>> + Send;

    fn fetch_prescription(
        &self,
        ctx: &OperatorContext,
        patient_prn: &str,
        access_token: &str,
    ) -> impl Future<Output = RxResult<Prescription>> + Send;
}

impl<P, R, N, T, X> ConsentGateway for AccessService<P, R, N, T, X>
where
    P: PatientRepository,
    R: ConsentRequestRepository,
    N: Notifier,
    T: AccessTokenRepository + Clone,
    X: PrescriptionRepository,
{
    async fn request_access(
        &self,
        ctx: &OperatorContext,
        patient_prn: &str,
    ) -> RxResult<RequestAccessOutput> {
        AccessService::request_access(self, ctx, patient_prn).await
    }

    async fn check_status(&self, request_id: Uuid) -> RxResult<StatusOutput> {
        AccessService::check_status(self, request_id).await
    }

    async fn verify_otp(&self, request_id: Uuid, otp: &str) -> RxResult<AccessGrant> {
        AccessService::verify_otp(self, request_id, otp).await
    }

    async fn fetch_prescription(
        &self,
        ctx: &OperatorContext,
        patient_prn: &str,
        access_token: &str,
    ) -> RxResult<Prescription> {
        AccessService::fetch_prescription(self, ctx, patient_prn, access_token).await
    }
}
