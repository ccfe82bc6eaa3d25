//! Out-of-band notifier implementations.

use rxconsent_core::error::{RxError, RxResult};
use rxconsent_core::notify::Notifier;
use tokio::sync::mpsc;
use tracing::info;

/// Writes a delivery record to the log instead of sending anything.
/// The OTP itself is never logged.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    async fn notify(&self, patient_prn: &str, otp: &str) -> RxResult<()> {
        info!(prn = %patient_prn, digits = otp.len(), "Consent OTP dispatched");
        Ok(())
    }
}

/// An OTP handed to the patient's device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpDelivery {
    pub patient_prn: String,
    pub otp: String,
}

/// Forwards OTPs over an in-process channel to whatever plays the
/// patient's device.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<OtpDelivery>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OtpDelivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    async fn notify(&self, patient_prn: &str, otp: &str) -> RxResult<()> {
        self.tx
            .send(OtpDelivery {
                patient_prn: patient_prn.to_string(),
                otp: otp.to_string(),
            })
            .map_err(|_| RxError::NotifierUnavailable("patient device channel closed".into()))
    }
}
