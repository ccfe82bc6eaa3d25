//! rxconsent access: consent request registry, dual-channel verifier,
//! access token issuer and the token-gated prescription lookup.

pub mod config;
pub mod error;
pub mod gate;
pub mod issuer;
pub mod notifier;
pub mod otp;
pub mod registry;
pub mod service;
pub mod token;
pub mod verifier;

pub use config::ConsentConfig;
pub use error::AccessError;
pub use issuer::{IssuedToken, TokenIssuer, check_token};
pub use notifier::{ChannelNotifier, OtpDelivery, TracingNotifier};
pub use service::{AccessGrant, AccessService, RequestAccessOutput, StatusOutput, SweepReport};
pub use verifier::{ConsentStatus, DualChannelVerifier};
