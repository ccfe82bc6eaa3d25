//! Integration tests for the consent protocol repositories.

use chrono::{Duration, Utc};
use rxconsent_core::error::RxError;
use rxconsent_core::models::access_token::CreateAccessToken;
use rxconsent_core::models::consent::{ConsentState, CreateConsentRequest, ResolutionChannel};
use rxconsent_core::models::patient::CreatePatient;
use rxconsent_core::models::prescription::{CreatePrescription, PrescriptionItem};
use rxconsent_core::repository::{
    AccessTokenRepository, ConsentRequestRepository, PatientRepository, PrescriptionRepository,
};
use rxconsent_db::repository::{
    SurrealAccessTokenRepository, SurrealConsentRequestRepository, SurrealPatientRepository,
    SurrealPrescriptionRepository,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

async fn setup() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    rxconsent_db::run_migrations(&db).await.unwrap();
    db
}

fn pending_request(prn: &str, ttl: Duration) -> CreateConsentRequest {
    let now = Utc::now();
    CreateConsentRequest {
        patient_prn: prn.into(),
        requested_by: "op-1".into(),
        otp_hash: "$argon2id$stub".into(),
        created_at: now,
        expires_at: now + ttl,
    }
}

fn token_for(request_id: Uuid, hash: &str, ttl: Duration) -> CreateAccessToken {
    let now = Utc::now();
    CreateAccessToken {
        request_id,
        patient_prn: "PRN-1001".into(),
        requested_by: "op-1".into(),
        token_hash: hash.into(),
        token_ciphertext: "sealed".into(),
        issued_at: now,
        expires_at: now + ttl,
    }
}

// ---------------------------------------------------------------------------
// Patients
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_and_resolve_patient_by_prn() {
    let repo = SurrealPatientRepository::new(setup().await);

    let created = repo
        .create(CreatePatient {
            prn: "PRN-1001".into(),
            full_name: "Asha Rao".into(),
            phone: Some("+15550100".into()),
        })
        .await
        .unwrap();

    let fetched = repo.get_by_prn("PRN-1001").await.unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.full_name, "Asha Rao");
    assert_eq!(fetched.phone.as_deref(), Some("+15550100"));
}

#[tokio::test]
async fn unknown_prn_is_not_found() {
    let repo = SurrealPatientRepository::new(setup().await);
    let err = repo.get_by_prn("PRN-404").await.unwrap_err();
    assert!(matches!(err, RxError::NotFound { .. }), "got: {err:?}");
}

// ---------------------------------------------------------------------------
// Consent requests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_request_is_pending_with_no_attempts() {
    let repo = SurrealConsentRequestRepository::new(setup().await);
    let created = repo
        .create(pending_request("PRN-1001", Duration::minutes(5)))
        .await
        .unwrap();

    assert_eq!(created.state, ConsentState::Pending);
    assert_eq!(created.otp_attempts, 0);
    assert!(created.resolved_via.is_none());

    let fetched = repo.get_by_id(created.id).await.unwrap();
    assert_eq!(fetched.patient_prn, "PRN-1001");
    assert_eq!(fetched.requested_by, "op-1");
}

#[tokio::test]
async fn request_ids_are_unique() {
    let repo = SurrealConsentRequestRepository::new(setup().await);
    let a = repo
        .create(pending_request("PRN-1001", Duration::minutes(5)))
        .await
        .unwrap();
    let b = repo
        .create(pending_request("PRN-1001", Duration::minutes(5)))
        .await
        .unwrap();
    assert_ne!(a.id, b.id);
}

#[tokio::test]
async fn resolve_is_check_and_set() {
    let repo = SurrealConsentRequestRepository::new(setup().await);
    let created = repo
        .create(pending_request("PRN-1001", Duration::minutes(5)))
        .await
        .unwrap();

    let approved = repo
        .resolve(created.id, ConsentState::Approved, ResolutionChannel::Otp)
        .await
        .unwrap()
        .expect("first resolution should win");
    assert_eq!(approved.state, ConsentState::Approved);
    assert_eq!(approved.resolved_via, Some(ResolutionChannel::Otp));
    assert!(approved.resolved_at.is_some());

    // The loser changes nothing.
    let second = repo
        .resolve(created.id, ConsentState::Denied, ResolutionChannel::Patient)
        .await
        .unwrap();
    assert!(second.is_none());
    assert_eq!(
        repo.get_by_id(created.id).await.unwrap().state,
        ConsentState::Approved
    );
}

#[tokio::test]
async fn denied_request_cannot_be_approved() {
    let repo = SurrealConsentRequestRepository::new(setup().await);
    let created = repo
        .create(pending_request("PRN-1001", Duration::minutes(5)))
        .await
        .unwrap();

    repo.resolve(created.id, ConsentState::Denied, ResolutionChannel::Patient)
        .await
        .unwrap();
    let again = repo
        .resolve(created.id, ConsentState::Approved, ResolutionChannel::Otp)
        .await
        .unwrap();

    assert!(again.is_none());
    assert_eq!(
        repo.get_by_id(created.id).await.unwrap().state,
        ConsentState::Denied
    );
}

#[tokio::test]
async fn resolving_back_to_pending_is_rejected() {
    let repo = SurrealConsentRequestRepository::new(setup().await);
    let created = repo
        .create(pending_request("PRN-1001", Duration::minutes(5)))
        .await
        .unwrap();

    let err = repo
        .resolve(created.id, ConsentState::Pending, ResolutionChannel::System)
        .await
        .unwrap_err();
    assert!(matches!(err, RxError::Validation { .. }));
}

#[tokio::test]
async fn otp_attempts_count_only_while_pending() {
    let repo = SurrealConsentRequestRepository::new(setup().await);
    let created = repo
        .create(pending_request("PRN-1001", Duration::minutes(5)))
        .await
        .unwrap();

    assert_eq!(repo.record_otp_attempt(created.id).await.unwrap(), Some(1));
    assert_eq!(repo.record_otp_attempt(created.id).await.unwrap(), Some(2));

    repo.resolve(created.id, ConsentState::Denied, ResolutionChannel::System)
        .await
        .unwrap();
    assert_eq!(repo.record_otp_attempt(created.id).await.unwrap(), None);
    assert_eq!(repo.get_by_id(created.id).await.unwrap().otp_attempts, 2);
}

#[tokio::test]
async fn expire_overdue_touches_only_pending_past_deadline() {
    let repo = SurrealConsentRequestRepository::new(setup().await);
    let overdue = repo
        .create(pending_request("PRN-1001", Duration::seconds(-1)))
        .await
        .unwrap();
    let fresh = repo
        .create(pending_request("PRN-1001", Duration::minutes(5)))
        .await
        .unwrap();
    let approved = repo
        .create(pending_request("PRN-1001", Duration::seconds(-1)))
        .await
        .unwrap();
    repo.resolve(approved.id, ConsentState::Approved, ResolutionChannel::Patient)
        .await
        .unwrap();

    assert_eq!(repo.expire_overdue(Utc::now()).await.unwrap(), 1);

    let overdue = repo.get_by_id(overdue.id).await.unwrap();
    assert_eq!(overdue.state, ConsentState::Expired);
    assert_eq!(overdue.resolved_via, Some(ResolutionChannel::System));
    assert_eq!(
        repo.get_by_id(fresh.id).await.unwrap().state,
        ConsentState::Pending
    );
    assert_eq!(
        repo.get_by_id(approved.id).await.unwrap().state,
        ConsentState::Approved
    );
}

#[tokio::test]
async fn token_issuance_is_recorded_once_and_only_when_approved() {
    let repo = SurrealConsentRequestRepository::new(setup().await);
    let created = repo
        .create(pending_request("PRN-1001", Duration::minutes(5)))
        .await
        .unwrap();
    assert!(created.token_issued_at.is_none());

    let at = Utc::now();
    assert!(!repo.record_token_issued(created.id, at).await.unwrap());

    repo.resolve(created.id, ConsentState::Approved, ResolutionChannel::Otp)
        .await
        .unwrap();
    assert!(repo.record_token_issued(created.id, at).await.unwrap());
    assert!(
        !repo
            .record_token_issued(created.id, at + Duration::minutes(1))
            .await
            .unwrap()
    );

    let fetched = repo.get_by_id(created.id).await.unwrap();
    assert_eq!(fetched.token_issued_at, Some(at));
    assert_eq!(fetched.state, ConsentState::Approved);
}

#[tokio::test]
async fn missing_request_is_not_found() {
    let repo = SurrealConsentRequestRepository::new(setup().await);
    let err = repo.get_by_id(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, RxError::NotFound { .. }));
}

// ---------------------------------------------------------------------------
// Access tokens
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_token_per_request() {
    let repo = SurrealAccessTokenRepository::new(setup().await);
    let request_id = Uuid::new_v4();

    let first = repo
        .create(token_for(request_id, "hash-a", Duration::minutes(10)))
        .await
        .unwrap();
    assert!(!first.consumed);

    let dup = repo
        .create(token_for(request_id, "hash-b", Duration::minutes(10)))
        .await;
    assert!(dup.is_err(), "second token for a request must be rejected");

    let found = repo.find_by_request(request_id).await.unwrap().unwrap();
    assert_eq!(found.id, first.id);
    assert_eq!(found.token_hash, "hash-a");
}

#[tokio::test]
async fn token_lookup_by_hash_and_consume() {
    let repo = SurrealAccessTokenRepository::new(setup().await);
    let created = repo
        .create(token_for(Uuid::new_v4(), "hash-x", Duration::minutes(10)))
        .await
        .unwrap();

    repo.mark_consumed(created.id).await.unwrap();

    let fetched = repo.get_by_token_hash("hash-x").await.unwrap();
    assert_eq!(fetched.id, created.id);
    assert!(fetched.consumed);

    assert!(matches!(
        repo.get_by_token_hash("hash-unknown").await,
        Err(RxError::NotFound { .. })
    ));
    assert!(repo.find_by_request(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn cleanup_removes_only_expired_tokens() {
    let repo = SurrealAccessTokenRepository::new(setup().await);
    repo.create(token_for(Uuid::new_v4(), "old", Duration::seconds(-5)))
        .await
        .unwrap();
    repo.create(token_for(Uuid::new_v4(), "live", Duration::minutes(10)))
        .await
        .unwrap();

    assert_eq!(repo.cleanup_expired(Utc::now()).await.unwrap(), 1);
    assert!(repo.get_by_token_hash("old").await.is_err());
    assert!(repo.get_by_token_hash("live").await.is_ok());

    // A second pass has nothing left to delete.
    assert_eq!(repo.cleanup_expired(Utc::now()).await.unwrap(), 0);
    assert!(repo.get_by_token_hash("live").await.is_ok());
}

// ---------------------------------------------------------------------------
// Prescriptions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn latest_prescription_wins() {
    let repo = SurrealPrescriptionRepository::new(setup().await);
    let now = Utc::now();

    for (drug, age_days) in [("Old-Drug", 30), ("New-Drug", 1)] {
        repo.create(CreatePrescription {
            patient_prn: "PRN-1001".into(),
            prescriber: "Dr. Mehta".into(),
            items: vec![PrescriptionItem {
                drug: drug.into(),
                dosage: "10mg".into(),
                quantity: 30,
                instructions: None,
            }],
            notes: Some("refill once".into()),
            prescribed_at: now - Duration::days(age_days),
        })
        .await
        .unwrap();
    }

    let latest = repo.get_latest_for_patient("PRN-1001").await.unwrap();
    assert_eq!(latest.items.len(), 1);
    assert_eq!(latest.items[0].drug, "New-Drug");
    assert_eq!(latest.notes.as_deref(), Some("refill once"));

    assert!(matches!(
        repo.get_latest_for_patient("PRN-2002").await,
        Err(RxError::NotFound { .. })
    ));
}
