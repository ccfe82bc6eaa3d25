//! Integration tests for the consent protocol against an in-memory
//! SurrealDB.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use rxconsent_access::{AccessService, ChannelNotifier, ConsentConfig, OtpDelivery};
use rxconsent_core::error::RxError;
use rxconsent_core::models::consent::{ConsentState, PatientDecision, ResolutionChannel};
use rxconsent_core::models::operator::OperatorContext;
use rxconsent_core::models::patient::CreatePatient;
use rxconsent_core::models::prescription::{CreatePrescription, PrescriptionItem};
use rxconsent_core::repository::{PatientRepository, PrescriptionRepository};
use rxconsent_db::repository::{
    SurrealAccessTokenRepository, SurrealConsentRequestRepository, SurrealPatientRepository,
    SurrealPrescriptionRepository,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tokio::sync::mpsc::UnboundedReceiver;

type Service = AccessService<
    SurrealPatientRepository<Db>,
    SurrealConsentRequestRepository<Db>,
    ChannelNotifier,
    SurrealAccessTokenRepository<Db>,
    SurrealPrescriptionRepository<Db>,
>;

fn test_config() -> ConsentConfig {
    ConsentConfig {
        otp_hash_memory_kib: 1024,
        otp_hash_iterations: 1,
        token_encryption_key: [9u8; 32],
        ..Default::default()
    }
}

fn operator() -> OperatorContext {
    OperatorContext::new("op-alice").at_terminal("counter-1")
}

/// Spin up in-memory DB, run migrations, register two patients with one
/// prescription each.
async fn setup(config: ConsentConfig) -> (Service, UnboundedReceiver<OtpDelivery>) {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    rxconsent_db::run_migrations(&db).await.unwrap();

    let patients = SurrealPatientRepository::new(db.clone());
    let prescriptions = SurrealPrescriptionRepository::new(db.clone());
    for (prn, name, drug) in [
        ("PRN-1001", "Asha Rao", "Amoxicillin"),
        ("PRN-1002", "Ben Okafor", "Metformin"),
    ] {
        patients
            .create(CreatePatient {
                prn: prn.into(),
                full_name: name.into(),
                phone: Some("+10000000000".into()),
            })
            .await
            .unwrap();
        prescriptions
            .create(CreatePrescription {
                patient_prn: prn.into(),
                prescriber: "Dr. Mehta".into(),
                items: vec![PrescriptionItem {
                    drug: drug.into(),
                    dosage: "500mg".into(),
                    quantity: 21,
                    instructions: Some("three times daily".into()),
                }],
                notes: None,
                prescribed_at: Utc::now() - Duration::days(1),
            })
            .await
            .unwrap();
    }

    let (notifier, rx) = ChannelNotifier::new();
    let service = AccessService::new(
        patients,
        SurrealConsentRequestRepository::new(db.clone()),
        SurrealAccessTokenRepository::new(db.clone()),
        prescriptions,
        notifier,
        config,
    )
    .unwrap();
    (service, rx)
}

/// A code guaranteed to differ from `otp` in its first digit.
fn wrong_otp(otp: &str) -> String {
    let mut chars: Vec<char> = otp.chars().collect();
    chars[0] = if chars[0] == '0' { '1' } else { '0' };
    chars.into_iter().collect()
}

#[tokio::test]
async fn correct_otp_grants_token_for_that_patient_only() {
    let (svc, mut rx) = setup(test_config()).await;
    let ctx = operator();

    let requested = svc.request_access(&ctx, "PRN-1001").await.unwrap();
    assert!(requested.otp_delivered);
    let delivery = rx.recv().await.unwrap();
    assert_eq!(delivery.patient_prn, "PRN-1001");

    let grant = svc
        .verify_otp(requested.request_id, &delivery.otp)
        .await
        .unwrap();
    assert!(!grant.access_token.is_empty());

    let request = svc
        .verifier()
        .registry()
        .get(requested.request_id)
        .await
        .unwrap();
    assert_eq!(request.state, ConsentState::Approved);
    assert_eq!(request.resolved_via, Some(ResolutionChannel::Otp));

    let prescription = svc
        .fetch_prescription(&ctx, "PRN-1001", &grant.access_token)
        .await
        .unwrap();
    assert_eq!(prescription.patient_prn, "PRN-1001");
    assert_eq!(prescription.items[0].drug, "Amoxicillin");

    let err = svc
        .fetch_prescription(&ctx, "PRN-1002", &grant.access_token)
        .await
        .unwrap_err();
    assert!(
        matches!(err, RxError::TokenMismatch),
        "expected TokenMismatch, got: {err:?}"
    );
}

#[tokio::test]
async fn status_after_otp_returns_the_same_token() {
    let (svc, mut rx) = setup(test_config()).await;
    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;

    let grant = svc.verify_otp(requested.request_id, &otp).await.unwrap();
    let status = svc.check_status(requested.request_id).await.unwrap();

    assert!(status.granted);
    assert_eq!(status.state, ConsentState::Approved);
    assert_eq!(status.access_token.as_deref(), Some(grant.access_token.as_str()));
    assert_eq!(status.token_expires_at, Some(grant.expires_at));
}

#[tokio::test]
async fn five_wrong_otps_deny_the_request() {
    let (svc, mut rx) = setup(test_config()).await;
    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;
    let bad = wrong_otp(&otp);

    for remaining in (1..=4).rev() {
        let err = svc.verify_otp(requested.request_id, &bad).await.unwrap_err();
        match err {
            RxError::InvalidOtp { attempts_remaining } => assert_eq!(attempts_remaining, remaining),
            other => panic!("expected InvalidOtp, got: {other:?}"),
        }
    }

    let err = svc.verify_otp(requested.request_id, &bad).await.unwrap_err();
    assert!(matches!(err, RxError::TooManyAttempts), "got: {err:?}");

    let request = svc
        .verifier()
        .registry()
        .get(requested.request_id)
        .await
        .unwrap();
    assert_eq!(request.state, ConsentState::Denied);
    assert_eq!(request.otp_attempts, 5);

    // Pollers can tell the lockout apart from a patient refusal.
    let status = svc.check_status(requested.request_id).await.unwrap();
    assert_eq!(status.state, ConsentState::Denied);
    assert_eq!(status.resolved_via, Some(ResolutionChannel::System));
    assert!(!status.granted);

    // The right code no longer helps.
    let err = svc.verify_otp(requested.request_id, &otp).await.unwrap_err();
    assert!(matches!(err, RxError::RequestExpired), "got: {err:?}");
}

#[tokio::test]
async fn wrong_then_right_otp_still_grants() {
    let (svc, mut rx) = setup(test_config()).await;
    let requested = svc.request_access(&operator(), "PRN-1002").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;

    assert!(matches!(
        svc.verify_otp(requested.request_id, &wrong_otp(&otp)).await,
        Err(RxError::InvalidOtp { .. })
    ));
    assert!(svc.verify_otp(requested.request_id, &otp).await.is_ok());
}

#[tokio::test]
async fn expired_request_reports_expiry_on_both_channels() {
    let config = ConsentConfig {
        request_ttl_secs: 1,
        ..test_config()
    };
    let (svc, mut rx) = setup(config).await;
    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;

    tokio::time::sleep(StdDuration::from_millis(1500)).await;

    let err = svc.check_status(requested.request_id).await.unwrap_err();
    assert!(matches!(err, RxError::RequestExpired), "got: {err:?}");

    let err = svc.verify_otp(requested.request_id, &otp).await.unwrap_err();
    assert!(matches!(err, RxError::RequestExpired), "got: {err:?}");

    let request = svc
        .verifier()
        .registry()
        .get(requested.request_id)
        .await
        .unwrap();
    assert_eq!(request.state, ConsentState::Expired);
    assert_eq!(request.resolved_via, Some(ResolutionChannel::System));
}

#[tokio::test]
async fn unknown_patient_is_rejected() {
    let (svc, _rx) = setup(test_config()).await;
    let err = svc.request_access(&operator(), "PRN-9999").await.unwrap_err();
    assert!(matches!(err, RxError::UnknownPatient { .. }), "got: {err:?}");

    let err = svc.request_access(&operator(), "   ").await.unwrap_err();
    assert!(matches!(err, RxError::UnknownPatient { .. }), "got: {err:?}");
}

#[tokio::test]
async fn unknown_request_is_not_found() {
    let (svc, _rx) = setup(test_config()).await;
    let missing = uuid::Uuid::new_v4();

    assert!(matches!(
        svc.check_status(missing).await,
        Err(RxError::RequestNotFound { .. })
    ));
    assert!(matches!(
        svc.verify_otp(missing, "123456").await,
        Err(RxError::RequestNotFound { .. })
    ));
    assert!(matches!(
        svc.record_decision(missing, PatientDecision::Approve).await,
        Err(RxError::RequestNotFound { .. })
    ));
}

#[tokio::test]
async fn patient_approval_wins_and_otp_gets_already_resolved() {
    let (svc, mut rx) = setup(test_config()).await;
    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;

    let state = svc
        .record_decision(requested.request_id, PatientDecision::Approve)
        .await
        .unwrap();
    assert_eq!(state, ConsentState::Approved);

    let err = svc.verify_otp(requested.request_id, &otp).await.unwrap_err();
    assert!(matches!(err, RxError::AlreadyResolved), "got: {err:?}");

    let first = svc.check_status(requested.request_id).await.unwrap();
    let second = svc.check_status(requested.request_id).await.unwrap();
    assert!(first.granted);
    assert_eq!(first.access_token, second.access_token);
}

#[tokio::test]
async fn racing_channels_resolve_exactly_once() {
    let (svc, mut rx) = setup(test_config()).await;

    for _ in 0..5 {
        let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
        let otp = rx.recv().await.unwrap().otp;

        let (decision, verified) = tokio::join!(
            svc.record_decision(requested.request_id, PatientDecision::Approve),
            svc.verify_otp(requested.request_id, &otp),
        );

        match (decision, verified) {
            (Ok(ConsentState::Approved), Err(RxError::AlreadyResolved)) => {}
            (Err(RxError::AlreadyResolved), Ok(_)) => {}
            other => panic!("expected exactly one winner, got: {other:?}"),
        }

        let status = svc.check_status(requested.request_id).await.unwrap();
        assert!(status.granted);
    }
}

#[tokio::test]
async fn concurrent_polls_share_one_token() {
    let (svc, mut rx) = setup(test_config()).await;
    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;

    let id = requested.request_id;
    let (a, b, c, grant) = tokio::join!(
        svc.check_status(id),
        svc.check_status(id),
        svc.check_status(id),
        svc.verify_otp(id, &otp),
    );
    let grant = grant.unwrap();

    for status in [a.unwrap(), b.unwrap(), c.unwrap()] {
        if let Some(token) = status.access_token {
            assert_eq!(token, grant.access_token);
        }
    }
    let after = svc.check_status(id).await.unwrap();
    assert_eq!(after.access_token, Some(grant.access_token));
}

#[tokio::test]
async fn denial_is_terminal() {
    let (svc, mut rx) = setup(test_config()).await;
    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;

    svc.record_decision(requested.request_id, PatientDecision::Deny)
        .await
        .unwrap();

    let status = svc.check_status(requested.request_id).await.unwrap();
    assert_eq!(status.state, ConsentState::Denied);
    assert!(!status.granted);
    assert!(status.access_token.is_none());

    assert!(matches!(
        svc.record_decision(requested.request_id, PatientDecision::Approve)
            .await,
        Err(RxError::AlreadyResolved)
    ));
    assert!(matches!(
        svc.verify_otp(requested.request_id, &otp).await,
        Err(RxError::RequestExpired)
    ));
}

#[tokio::test]
async fn token_is_bound_to_the_requesting_operator() {
    let (svc, mut rx) = setup(test_config()).await;
    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;
    let grant = svc.verify_otp(requested.request_id, &otp).await.unwrap();

    let err = svc
        .fetch_prescription(&OperatorContext::new("op-mallory"), "PRN-1001", &grant.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, RxError::Forbidden { .. }), "got: {err:?}");
}

#[tokio::test]
async fn unknown_token_is_invalid() {
    let (svc, _rx) = setup(test_config()).await;
    let err = svc
        .fetch_prescription(&operator(), "PRN-1001", "not-a-token")
        .await
        .unwrap_err();
    assert!(matches!(err, RxError::TokenInvalid), "got: {err:?}");
}

#[tokio::test]
async fn token_expires_after_session_ttl() {
    let config = ConsentConfig {
        session_ttl_secs: 1,
        ..test_config()
    };
    let (svc, mut rx) = setup(config).await;
    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;
    let grant = svc.verify_otp(requested.request_id, &otp).await.unwrap();

    tokio::time::sleep(StdDuration::from_millis(1500)).await;

    let err = svc
        .fetch_prescription(&operator(), "PRN-1001", &grant.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, RxError::TokenExpired), "got: {err:?}");

    // Polling does not hand the lapsed token back out.
    let err = svc.check_status(requested.request_id).await.unwrap_err();
    assert!(matches!(err, RxError::TokenExpired), "got: {err:?}");
}

#[tokio::test]
async fn swept_token_is_not_reissued_on_poll() {
    let config = ConsentConfig {
        session_ttl_secs: 1,
        ..test_config()
    };
    let (svc, mut rx) = setup(config).await;
    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;
    let grant = svc.verify_otp(requested.request_id, &otp).await.unwrap();

    let request = svc
        .verifier()
        .registry()
        .get(requested.request_id)
        .await
        .unwrap();
    assert!(request.token_issued_at.is_some());

    tokio::time::sleep(StdDuration::from_millis(1500)).await;

    let report = svc.sweep_expired().await.unwrap();
    assert_eq!(report.requests_expired, 0);
    assert_eq!(report.tokens_removed, 1);

    let err = svc.check_status(requested.request_id).await.unwrap_err();
    assert!(matches!(err, RxError::TokenExpired), "got: {err:?}");

    // Still refused on a second poll, and nothing new reached the store.
    let err = svc.check_status(requested.request_id).await.unwrap_err();
    assert!(matches!(err, RxError::TokenExpired), "got: {err:?}");
    let again = svc.sweep_expired().await.unwrap();
    assert_eq!(again.tokens_removed, 0);

    let err = svc
        .fetch_prescription(&operator(), "PRN-1001", &grant.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, RxError::TokenInvalid), "got: {err:?}");
}

#[tokio::test]
async fn patient_approval_records_token_issuance() {
    let (svc, _rx) = setup(test_config()).await;
    let requested = svc.request_access(&operator(), "PRN-1002").await.unwrap();

    svc.record_decision(requested.request_id, PatientDecision::Approve)
        .await
        .unwrap();

    let request = svc
        .verifier()
        .registry()
        .get(requested.request_id)
        .await
        .unwrap();
    let status = svc.check_status(requested.request_id).await.unwrap();
    let record = svc
        .verifier()
        .issuer()
        .validate(status.access_token.as_deref().unwrap(), "PRN-1002")
        .await
        .unwrap();
    assert_eq!(request.token_issued_at, Some(record.issued_at));
    assert_eq!(status.resolved_via, Some(ResolutionChannel::Patient));
}

#[tokio::test]
async fn invalid_config_is_rejected_at_construction() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();

    for config in [
        ConsentConfig {
            otp_length: 0,
            ..test_config()
        },
        ConsentConfig {
            session_ttl_secs: u64::MAX,
            ..test_config()
        },
    ] {
        let (notifier, _rx) = ChannelNotifier::new();
        let built: Result<Service, _> = AccessService::new(
            SurrealPatientRepository::new(db.clone()),
            SurrealConsentRequestRepository::new(db.clone()),
            SurrealAccessTokenRepository::new(db.clone()),
            SurrealPrescriptionRepository::new(db.clone()),
            notifier,
            config,
        );
        assert!(matches!(built, Err(RxError::Validation { .. })));
    }
}

#[tokio::test]
async fn token_can_be_read_repeatedly_and_is_marked_consumed() {
    let (svc, mut rx) = setup(test_config()).await;
    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;
    let grant = svc.verify_otp(requested.request_id, &otp).await.unwrap();

    for _ in 0..3 {
        svc.fetch_prescription(&operator(), "PRN-1001", &grant.access_token)
            .await
            .unwrap();
    }

    let record = svc
        .verifier()
        .issuer()
        .validate(&grant.access_token, "PRN-1001")
        .await
        .unwrap();
    assert!(record.consumed);
    assert_eq!(record.request_id, requested.request_id);
    assert_eq!(record.requested_by, "op-alice");
}

#[tokio::test]
async fn notifier_failure_does_not_fail_the_request() {
    let (svc, rx) = setup(test_config()).await;
    drop(rx);

    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    assert!(!requested.otp_delivered);

    let status = svc.check_status(requested.request_id).await.unwrap();
    assert_eq!(status.state, ConsentState::Pending);
}

#[tokio::test]
async fn issuing_for_a_pending_request_is_forbidden() {
    let (svc, _rx) = setup(test_config()).await;
    let requested = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let request = svc
        .verifier()
        .registry()
        .get(requested.request_id)
        .await
        .unwrap();

    let err = svc.verifier().issuer().issue(&request).await.unwrap_err();
    assert!(matches!(err, RxError::Forbidden { .. }), "got: {err:?}");
}

#[tokio::test]
async fn sweep_expires_overdue_requests() {
    let config = ConsentConfig {
        request_ttl_secs: 1,
        session_ttl_secs: 1,
        ..test_config()
    };
    let (svc, mut rx) = setup(config).await;

    let granted = svc.request_access(&operator(), "PRN-1001").await.unwrap();
    let otp = rx.recv().await.unwrap().otp;
    let grant = svc.verify_otp(granted.request_id, &otp).await.unwrap();

    svc.request_access(&operator(), "PRN-1001").await.unwrap();
    svc.request_access(&operator(), "PRN-1002").await.unwrap();

    tokio::time::sleep(StdDuration::from_millis(1500)).await;

    let report = svc.sweep_expired().await.unwrap();
    assert_eq!(report.requests_expired, 2);
    assert_eq!(report.tokens_removed, 1);

    let again = svc.sweep_expired().await.unwrap();
    assert_eq!(again.requests_expired, 0);
    assert_eq!(again.tokens_removed, 0);

    // The approved request stays approved but yields no fresh token, and
    // the swept one no longer opens the prescription.
    let err = svc.check_status(granted.request_id).await.unwrap_err();
    assert!(matches!(err, RxError::TokenExpired), "got: {err:?}");
    let err = svc
        .fetch_prescription(&operator(), "PRN-1001", &grant.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, RxError::TokenInvalid), "got: {err:?}");
}
