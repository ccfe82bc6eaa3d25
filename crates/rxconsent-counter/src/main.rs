//! rxconsent counter: runs one consent cycle end to end with a simulated
//! patient device, against an embedded or remote SurrealDB.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use rxconsent_access::{AccessService, ChannelNotifier, ConsentConfig, OtpDelivery};
use rxconsent_core::error::RxResult;
use rxconsent_core::models::consent::PatientDecision;
use rxconsent_core::models::operator::OperatorContext;
use rxconsent_core::models::patient::CreatePatient;
use rxconsent_core::models::prescription::{CreatePrescription, PrescriptionItem};
use rxconsent_core::repository::{PatientRepository, PrescriptionRepository};
use rxconsent_counter::{CounterConfig, CounterController, CounterSnapshot, CounterStatus};
use rxconsent_db::repository::{
    SurrealAccessTokenRepository, SurrealConsentRequestRepository, SurrealPatientRepository,
    SurrealPrescriptionRepository,
};
use rxconsent_db::{DbConfig, DbCredentials, DbManager};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type Service = AccessService<
    SurrealPatientRepository<Any>,
    SurrealConsentRequestRepository<Any>,
    ChannelNotifier,
    SurrealAccessTokenRepository<Any>,
    SurrealPrescriptionRepository<Any>,
>;

/// What the simulated patient does with the consent prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PatientAction {
    /// Approve on the patient's own device.
    Approve,
    /// Decline on the patient's own device.
    Deny,
    /// Read the OTP out to the operator, who types it in.
    Otp,
    /// Do nothing and let the request expire.
    Ignore,
}

#[derive(Debug, Parser)]
#[command(
    name = "rxconsent-counter",
    about = "Pharmacy counter client for the patient data access consent protocol"
)]
struct Args {
    /// PRN entered at the counter.
    #[arg(long, env = "RXCONSENT_PRN", default_value = "PRN-1001")]
    prn: String,

    /// Operator identity presented with every call.
    #[arg(long, env = "RXCONSENT_OPERATOR", default_value = "counter-operator")]
    operator: String,

    /// Counter terminal identifier.
    #[arg(long, env = "RXCONSENT_TERMINAL")]
    terminal: Option<String>,

    /// How the simulated patient responds.
    #[arg(long, value_enum, default_value_t = PatientAction::Otp)]
    patient_action: PatientAction,

    /// SurrealDB endpoint, `mem://` for an embedded in-memory store.
    #[arg(long, env = "RXCONSENT_DB_ENDPOINT", default_value = "mem://")]
    db_endpoint: String,

    /// Root user for a SurrealDB server.
    #[arg(long, env = "RXCONSENT_DB_USER", requires = "db_pass")]
    db_user: Option<String>,

    #[arg(long, env = "RXCONSENT_DB_PASS", requires = "db_user")]
    db_pass: Option<String>,

    /// Consent request lifetime in seconds.
    #[arg(long, env = "RXCONSENT_REQUEST_TTL_SECS", default_value_t = 300)]
    request_ttl_secs: u64,

    /// Access token lifetime in seconds.
    #[arg(long, env = "RXCONSENT_SESSION_TTL_SECS", default_value_t = 600)]
    session_ttl_secs: u64,

    #[arg(long, env = "RXCONSENT_OTP_LENGTH", default_value_t = 6)]
    otp_length: usize,

    #[arg(long, env = "RXCONSENT_MAX_OTP_ATTEMPTS", default_value_t = 5)]
    max_otp_attempts: u32,

    /// Status poll interval in milliseconds.
    #[arg(long, env = "RXCONSENT_POLL_INTERVAL_MS", default_value_t = 500)]
    poll_interval_ms: u64,

    /// Stop polling a request after this many seconds even if it has not
    /// expired yet.
    #[arg(long, env = "RXCONSENT_MAX_POLL_SECS")]
    max_poll_secs: Option<u64>,
}

impl Args {
    fn consent_config(&self) -> ConsentConfig {
        ConsentConfig {
            request_ttl_secs: self.request_ttl_secs,
            session_ttl_secs: self.session_ttl_secs,
            otp_length: self.otp_length,
            max_otp_attempts: self.max_otp_attempts,
            ..Default::default()
        }
    }

    fn db_config(&self) -> DbConfig {
        let credentials = match (&self.db_user, &self.db_pass) {
            (Some(username), Some(password)) => Some(DbCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        DbConfig {
            endpoint: self.db_endpoint.clone(),
            credentials,
            ..Default::default()
        }
    }

    fn counter_config(&self) -> CounterConfig {
        CounterConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_duration: self.max_poll_secs.map(Duration::from_secs),
        }
    }

    fn operator(&self) -> OperatorContext {
        let ctx = OperatorContext::new(self.operator.clone());
        match &self.terminal {
            Some(terminal) => ctx.at_terminal(terminal.clone()),
            None => ctx,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                "rxconsent=info"
                    .parse()
                    .expect("static tracing directive is valid"),
            ),
        )
        .json()
        .init();

    let args = Args::parse();
    let config = args.consent_config();
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid consent configuration");
        std::process::exit(2);
    }

    info!("Starting rxconsent counter...");

    let db = match DbManager::open(&args.db_config()).await {
        Ok(manager) => manager.client().clone(),
        Err(e) => {
            error!(error = %e, "Failed to open the consent store");
            std::process::exit(1);
        }
    };

    let outcome = run(db, &args, config).await;

    match outcome {
        Ok(snapshot) => info!(status = snapshot.status.as_str(), "rxconsent counter stopped."),
        Err(e) => {
            error!(error = %e, "rxconsent counter failed");
            std::process::exit(1);
        }
    }
}

async fn run(
    db: Surreal<Any>,
    args: &Args,
    config: ConsentConfig,
) -> RxResult<CounterSnapshot> {
    seed_demo_patients(&db).await?;

    let (notifier, deliveries) = ChannelNotifier::new();
    let service = Arc::new(AccessService::new(
        SurrealPatientRepository::new(db.clone()),
        SurrealConsentRequestRepository::new(db.clone()),
        SurrealAccessTokenRepository::new(db.clone()),
        SurrealPrescriptionRepository::new(db),
        notifier,
        config.clone(),
    )?);

    let swept = service.sweep_expired().await?;
    info!(
        requests_expired = swept.requests_expired,
        tokens_removed = swept.tokens_removed,
        "Startup sweep complete"
    );

    let controller = CounterController::new(
        Arc::clone(&service),
        args.operator(),
        args.counter_config(),
    );
    let mut updates = controller.subscribe();

    let submitted = controller.submit(&args.prn).await;
    if submitted.status != CounterStatus::AwaitingApproval {
        report(&submitted);
        return Ok(submitted);
    }

    simulate_patient(
        &service,
        &controller,
        deliveries,
        args.patient_action,
        &submitted,
    )
    .await?;

    // Wait for the cycle to settle, bounded by the request lifetime.
    let settle = Duration::from_secs(config.request_ttl_secs) + Duration::from_secs(5);
    let settled_in_time = tokio::time::timeout(
        settle,
        updates.wait_for(|s| match s.status {
            CounterStatus::Granted => s.prescription.is_some() || s.notice.is_some(),
            CounterStatus::Idle | CounterStatus::Closed => true,
            _ => false,
        }),
    )
    .await
    .is_ok();
    if !settled_in_time {
        warn!("Counter session did not settle in time");
    }

    let settled = controller.snapshot();
    report(&settled);
    controller.close().await;
    Ok(settled)
}

/// Stand-in for the patient's phone: receives the OTP and responds.
async fn simulate_patient(
    service: &Service,
    controller: &CounterController<Service>,
    mut deliveries: UnboundedReceiver<OtpDelivery>,
    action: PatientAction,
    submitted: &CounterSnapshot,
) -> RxResult<()> {
    let Some(request_id) = submitted.request_id else {
        return Ok(());
    };
    let delivery = deliveries.recv().await;
    info!(
        request_id = %request_id,
        delivered = delivery.is_some(),
        action = ?action,
        "Patient device prompted"
    );

    match (action, delivery) {
        (PatientAction::Approve, _) => {
            service
                .record_decision(request_id, PatientDecision::Approve)
                .await?;
        }
        (PatientAction::Deny, _) => {
            service
                .record_decision(request_id, PatientDecision::Deny)
                .await?;
        }
        (PatientAction::Otp, Some(delivery)) => {
            controller.submit_otp(&delivery.otp).await;
        }
        (PatientAction::Otp, None) | (PatientAction::Ignore, _) => {}
    }
    Ok(())
}

fn report(snapshot: &CounterSnapshot) {
    let notice = snapshot.notice.as_ref().map(ToString::to_string);
    match &snapshot.prescription {
        Some(prescription) => {
            let drugs: Vec<&str> = prescription
                .items
                .iter()
                .map(|item| item.drug.as_str())
                .collect();
            info!(
                status = snapshot.status.as_str(),
                prn = ?snapshot.patient_prn,
                prescriber = %prescription.prescriber,
                drugs = ?drugs,
                "Prescription on screen"
            );
        }
        None => info!(
            status = snapshot.status.as_str(),
            prn = ?snapshot.patient_prn,
            notice = ?notice,
            "Counter session result"
        ),
    }
}

/// Register the demo patients unless a previous run already did.
async fn seed_demo_patients(db: &Surreal<Any>) -> RxResult<()> {
    let patients = SurrealPatientRepository::new(db.clone());
    let prescriptions = SurrealPrescriptionRepository::new(db.clone());

    for (prn, name, drug, dosage) in [
        ("PRN-1001", "Asha Rao", "Amoxicillin", "500mg three times daily"),
        ("PRN-1002", "Ben Okafor", "Metformin", "850mg twice daily"),
    ] {
        if patients.get_by_prn(prn).await.is_ok() {
            continue;
        }
        patients
            .create(CreatePatient {
                prn: prn.into(),
                full_name: name.into(),
                phone: None,
            })
            .await?;
        prescriptions
            .create(CreatePrescription {
                patient_prn: prn.into(),
                prescriber: "Dr. Mehta".into(),
                items: vec![PrescriptionItem {
                    drug: drug.into(),
                    dosage: dosage.into(),
                    quantity: 30,
                    instructions: Some("Take with food".into()),
                }],
                notes: None,
                prescribed_at: Utc::now(),
            })
            .await?;
        info!(prn = %prn, "Seeded demo patient");
    }
    Ok(())
}
