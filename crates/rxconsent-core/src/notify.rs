//! Out-of-band notification contract.

use crate::error::RxResult;

/// Delivers a consent OTP to the patient's registered device.
///
/// Delivery is fire-and-forget from the protocol's point of view: an
/// `Err` is logged and surfaced to the operator but never fails the
/// consent request.
pub trait Notifier: Send + Sync {
    fn notify(&self, patient_prn: &str, otp: &str) -> impl Future<Output = RxResult<()>> + Send;
}
