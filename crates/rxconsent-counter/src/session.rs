//! Client-held counter session state.

use std::fmt;

use chrono::{DateTime, Utc};
use rxconsent_core::error::RxError;
use rxconsent_core::models::consent::ResolutionChannel;
use rxconsent_core::models::prescription::Prescription;
use uuid::Uuid;

/// Where the counter is in the consent cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CounterStatus {
    #[default]
    Idle,
    Requesting,
    AwaitingApproval,
    Verifying,
    Granted,
    Closed,
}

impl CounterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Requesting => "Requesting",
            Self::AwaitingApproval => "AwaitingApproval",
            Self::Verifying => "Verifying",
            Self::Granted => "Granted",
            Self::Closed => "Closed",
        }
    }

    /// A consent request is in flight and has not been resolved yet.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Self::Requesting | Self::AwaitingApproval | Self::Verifying
        )
    }
}

/// Operator-visible message produced by the last transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Denied,
    RequestExpired,
    TooManyAttempts,
    /// The request was approved but its access token has lapsed.
    SessionExpired,
    InvalidOtp { attempts_remaining: u32 },
    UnknownPatient,
    OtpNotDelivered,
    PrescriptionUnavailable(String),
    Error(String),
}

impl Notice {
    /// Notice for a `Denied` request. A denial by the system is the OTP
    /// attempt cap, not the patient.
    pub(crate) fn for_denial(resolved_via: Option<ResolutionChannel>) -> Self {
        match resolved_via {
            Some(ResolutionChannel::System) => Self::TooManyAttempts,
            _ => Self::Denied,
        }
    }
}

impl From<&RxError> for Notice {
    fn from(err: &RxError) -> Self {
        match err {
            RxError::UnknownPatient { .. } => Self::UnknownPatient,
            RxError::RequestExpired => Self::RequestExpired,
            RxError::TooManyAttempts => Self::TooManyAttempts,
            RxError::TokenExpired => Self::SessionExpired,
            RxError::InvalidOtp { attempts_remaining } => Self::InvalidOtp {
                attempts_remaining: *attempts_remaining,
            },
            other => Self::Error(other.to_string()),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied => f.write_str("the patient declined access"),
            Self::RequestExpired => f.write_str("the consent request expired"),
            Self::TooManyAttempts => {
                f.write_str("too many incorrect codes; start a new request")
            }
            Self::SessionExpired => {
                f.write_str("the access session expired; start a new request")
            }
            Self::InvalidOtp { attempts_remaining } => {
                write!(f, "incorrect code, {attempts_remaining} attempt(s) left")
            }
            Self::UnknownPatient => f.write_str("no patient with that PRN"),
            Self::OtpNotDelivered => {
                f.write_str("the code could not be sent to the patient's device")
            }
            Self::PrescriptionUnavailable(reason) => {
                write!(f, "prescription unavailable: {reason}")
            }
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Snapshot of the counter session published to the operator's view.
#[derive(Debug, Clone, Default)]
pub struct CounterSnapshot {
    pub status: CounterStatus,
    pub patient_prn: Option<String>,
    pub request_id: Option<Uuid>,
    pub request_expires_at: Option<DateTime<Utc>>,
    pub access_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub prescription: Option<Prescription>,
    pub notice: Option<Notice>,
}

impl CounterSnapshot {
    /// Fresh session for `prn`, waiting on the service to open a request.
    pub(crate) fn requesting(prn: String) -> Self {
        Self {
            status: CounterStatus::Requesting,
            patient_prn: Some(prn),
            ..Default::default()
        }
    }

    /// Back to Idle: the request and anything obtained through it are
    /// dropped, the PRN stays for display.
    pub(crate) fn reset_to_idle(&mut self, notice: Notice) {
        *self = Self {
            status: CounterStatus::Idle,
            patient_prn: self.patient_prn.take(),
            notice: Some(notice),
            ..Default::default()
        };
    }

    pub(crate) fn closed() -> Self {
        Self {
            status: CounterStatus::Closed,
            ..Default::default()
        }
    }
}
